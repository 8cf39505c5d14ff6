//! Node deletion. Nodes reached through nested `delete` inputs are gathered
//! into one list first so every rule is checked before anything is removed.

use serde_json::Value;
use theseus_cypher::{
    BinaryOp, Clause, DeleteClause, Expr, ForeachClause, MatchClause, NodePattern, Pattern,
    ProjectionItem, RelationshipDetail, RelationshipDirection, ReturnClause, SubqueryClause,
    UnwindClause, WithClause,
};

use super::auth;
use super::context::Context;
use super::filter::{connection_where, node_filter};
use super::read::ROOT;
use super::write::{by_member, elements, input_map, relationship_field, scoped, Edge};
use crate::operation::ResolveTree;
use crate::prelude::*;
use crate::schema::{AuthOperation, Node, ValidationPhase};

/// `reduce(acc = [], l IN collect(list) | acc + l)`.
fn flattened(cx: &mut Context, list: &str) -> Expr {
    let acc = cx.value_var();
    let item = cx.value_var();
    Expr::Reduce {
        accumulator: acc.clone(),
        init: Box::new(Expr::list(Vec::new())),
        variable: item.clone(),
        list: Box::new(Expr::call("collect", vec![Expr::var(list)])),
        expr: Box::new(Expr::binary(
            BinaryOp::Add,
            Expr::var(acc),
            Expr::var(item),
        )),
    }
}

/// Collected nodes of `var` followed by every nested list.
fn combined(cx: &mut Context, var: &str, lists: &[String]) -> Expr {
    lists.iter().fold(
        Expr::call("collect", vec![Expr::var(var)]),
        |all, list| Expr::binary(BinaryOp::Add, all, flattened(cx, list)),
    )
}

/// Removes repeated nodes, keeping first occurrences.
fn deduplicated(cx: &mut Context, list: Expr) -> Expr {
    let acc = cx.value_var();
    let item = cx.value_var();
    Expr::Reduce {
        accumulator: acc.clone(),
        init: Box::new(Expr::list(Vec::new())),
        variable: item.clone(),
        list: Box::new(list),
        expr: Box::new(Expr::Case {
            base: None,
            alternatives: vec![(
                Expr::in_list(Expr::var(&item), Expr::var(&acc)),
                Expr::var(&acc),
            )],
            else_expr: Some(Box::new(Expr::binary(
                BinaryOp::Add,
                Expr::var(&acc),
                Expr::var(&item),
            ))),
        }),
    }
}

/// Subqueries gathering the nodes named by a `{ field: [{ where, delete }] }`
/// input below `var`. Returns the clauses and the list variables they bind.
fn gather_keyed(
    cx: &mut Context,
    node: &Node,
    var: &str,
    input: &Value,
) -> Result<(Vec<Clause>, Vec<String>)> {
    let mut clauses = Vec::new();
    let mut lists = Vec::new();
    if input.is_null() {
        return Ok((clauses, lists));
    }
    for (name, value) in input_map(input, &node.names.delete_input)? {
        let (field, rel) = relationship_field(node, name)?;
        for (member, value) in by_member(cx, rel, value)? {
            for (target, element) in elements(cx, rel, member, value)? {
                let edge = Edge {
                    parent: node,
                    parent_var: var,
                    field,
                    rel,
                    target,
                };
                let (clause, list) = gather(cx, &edge, &element)?;
                clauses.push(Clause::with_star());
                clauses.push(clause);
                lists.push(list);
            }
        }
    }
    Ok((clauses, lists))
}

/// `CALL { WITH parent OPTIONAL MATCH (parent)-[r]->(t) WHERE ... RETURN
/// <t and its nested deletes> AS list }` for one nested delete element.
fn gather(cx: &mut Context, edge: &Edge, element: &Value) -> Result<(Clause, String)> {
    let element = input_map(element, &edge.rel.names.delete_field_input)?;
    let where_value = element.get("where").unwrap_or(&Value::Null);
    auth::ensure_authenticated(cx, edge.target, AuthOperation::Delete)?;

    let target_var = cx.node_var();
    let rel_var = cx.node_var();
    let properties = edge.properties(cx);
    let delete_filter =
        auth::filter_predicate(cx, edge.target, &target_var, AuthOperation::Delete)?;
    let filter = connection_where(cx, edge.target, &target_var, properties, &rel_var, where_value)?
        .and_predicate(delete_filter);
    let mut body = vec![Clause::with_vars([edge.parent_var])];
    body.extend(filter.apply(MatchClause::optional(
        edge.pattern(Some(rel_var), &target_var),
    )));
    body.extend(auth::validate(
        cx,
        edge.target,
        &target_var,
        AuthOperation::Delete,
        ValidationPhase::Before,
        &[],
    )?);
    let nested = element.get("delete").unwrap_or(&Value::Null);
    let (nested_clauses, nested_lists) = gather_keyed(cx, edge.target, &target_var, nested)?;
    body.extend(nested_clauses);

    let list = cx.value_var();
    let gathered = combined(cx, &target_var, &nested_lists);
    body.push(Clause::Return(ReturnClause::single(gathered, &list)));
    Ok((Clause::Subquery(SubqueryClause::new(body)), list))
}

fn detach_delete_all(cx: &mut Context, list: Expr) -> Clause {
    let item = cx.value_var();
    Clause::Foreach(ForeachClause {
        variable: item.clone(),
        list,
        clauses: vec![Clause::Delete(DeleteClause {
            detach: true,
            items: vec![Expr::var(item)],
        })],
    })
}

/// `delete` element of an update's relationship input: removes the matched
/// targets and whatever their own nested `delete` names.
pub(crate) fn nested_delete(cx: &mut Context, edge: &Edge, element: &Value) -> Result<Vec<Clause>> {
    let (gathered, list) = gather(cx, edge, element)?;
    let unique = deduplicated(cx, Expr::var(&list));
    let body = vec![gathered, detach_delete_all(cx, unique)];
    Ok(scoped(cx, &[edge.parent_var], body))
}

/// Root `delete<Plural>` field. Returns one row with the number of nodes and
/// relationships removed.
pub(crate) fn delete(cx: &mut Context, type_name: &str, tree: &ResolveTree) -> Result<Vec<Clause>> {
    let node = cx
        .schema
        .node(type_name)
        .ok_or_else(|| TheseusError::schema(format!("Unknown node type {type_name}")))?;
    auth::ensure_authenticated(cx, node, AuthOperation::Delete)?;
    let where_value = tree.arg("where").cloned().unwrap_or(Value::Null);

    let delete_filter = auth::filter_predicate(cx, node, ROOT, AuthOperation::Delete)?;
    let filter = node_filter(cx, node, ROOT, &where_value)?.and_predicate(delete_filter);
    let mut clauses = filter.apply(MatchClause::new(Pattern::node(NodePattern::labelled(
        ROOT,
        &node.labels,
    ))));
    clauses.extend(auth::validate(
        cx,
        node,
        ROOT,
        AuthOperation::Delete,
        ValidationPhase::Before,
        &[],
    )?);
    let nested = tree.arg("delete").unwrap_or(&Value::Null);
    let (nested_clauses, lists) = gather_keyed(cx, node, ROOT, nested)?;
    clauses.extend(nested_clauses);

    let doomed = cx.value_var();
    let all = combined(cx, ROOT, &lists);
    let unique = deduplicated(cx, all);
    clauses.push(Clause::With(WithClause::new(vec![ProjectionItem::aliased(
        unique, &doomed,
    )])));

    let item = cx.value_var();
    let rel = cx.node_var();
    let relationships = cx.value_var();
    clauses.push(Clause::Subquery(SubqueryClause::new(vec![
        Clause::with_vars([doomed.as_str()]),
        Clause::Unwind(UnwindClause {
            expression: Expr::var(&doomed),
            variable: item.clone(),
        }),
        Clause::Match(MatchClause::optional(Pattern::relationship(
            NodePattern::named(&item),
            RelationshipDetail {
                variable: Some(rel.clone()),
                types: Vec::new(),
                direction: RelationshipDirection::Undirected,
                properties: Vec::new(),
            },
            NodePattern::default(),
        ))),
        Clause::Return(ReturnClause::single(
            Expr::Raw(format!("count(DISTINCT {rel})")),
            &relationships,
        )),
    ])));
    clauses.push(detach_delete_all(cx, Expr::var(&doomed)));
    clauses.push(Clause::Return(ReturnClause::new(vec![
        ProjectionItem::aliased(Expr::call("size", vec![Expr::var(&doomed)]), "nodesDeleted"),
        ProjectionItem::aliased(Expr::var(&relationships), "relationshipsDeleted"),
    ])));
    Ok(clauses)
}
