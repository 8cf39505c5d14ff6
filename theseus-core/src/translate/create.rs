use std::str::FromStr;

use serde_json::{Map, Value};
use theseus_cypher::{
    Clause, CreateClause, Expr, NodePattern, Pattern, ProjectionItem, ReturnClause, SetClause,
    SubqueryClause, UnwindClause,
};

use super::auth;
use super::context::Context;
use super::read::{visible, ROOT};
use super::projection::{project_node, Extras};
use super::write::{
    apply, by_member, cardinality_checks, create_properties, elements, elements_of, input_map,
    Edge, NestedOp,
};
use crate::operation::ResolveTree;
use crate::prelude::*;
use crate::schema::{AuthOperation, Node, TargetKind, ValidationPhase};

/// `CREATE (var:Labels) SET ...` for one input object.
fn create_clauses(
    cx: &mut Context,
    node: &Node,
    var: &str,
    input: &Map<String, Value>,
) -> Result<Vec<Clause>> {
    auth::ensure_authenticated(cx, node, AuthOperation::Create)?;
    auth::check_bind(cx, node, input)?;
    let mut clauses = vec![Clause::Create(CreateClause {
        patterns: vec![Pattern::node(NodePattern::labelled(var, &node.labels))],
    })];
    let items = create_properties(cx, &node.name, &node.fields, var, input)?;
    if !items.is_empty() {
        clauses.push(Clause::Set(SetClause { items }));
    }
    Ok(clauses)
}

/// Nested operations of a create input, the cardinality checks and the
/// rules validated after the write.
fn finish_node(
    cx: &mut Context,
    node: &Node,
    var: &str,
    input: &Map<String, Value>,
) -> Result<Vec<Clause>> {
    let mut clauses = Vec::new();
    for (name, value) in input {
        let Some(field) = node.field(name) else {
            continue;
        };
        let Some(rel) = field.as_relationship() else {
            continue;
        };
        for (member, ops) in by_member(cx, rel, value)? {
            for (key, op_value) in input_map(ops, &rel.names.create_field_input)? {
                let op = NestedOp::from_str(key)
                    .ok()
                    .filter(|op| {
                        matches!(
                            op,
                            NestedOp::Create | NestedOp::Connect | NestedOp::ConnectOrCreate
                        )
                    })
                    .ok_or_else(|| {
                        TheseusError::validation(format!(
                            "{key} is not allowed when creating {}.{name}",
                            node.name
                        ))
                    })?;
                for (target, element) in elements(cx, rel, member, op_value)? {
                    clauses.extend(apply(cx, op, node, var, field, rel, target, &element)?);
                }
            }
        }
    }
    clauses.extend(cardinality_checks(cx, node, var, None));
    let written: Vec<&str> = input.keys().map(String::as_str).collect();
    clauses.extend(auth::validate(
        cx,
        node,
        var,
        AuthOperation::Create,
        ValidationPhase::After,
        &written,
    )?);
    Ok(clauses)
}

/// `create` element of a relationship input: a new target node related to
/// the parent.
pub(crate) fn nested_create(cx: &mut Context, edge: &Edge, element: &Value) -> Result<Vec<Clause>> {
    let element = input_map(element, &edge.rel.names.create_field_input)?;
    let node_input = element.get("node").unwrap_or(&Value::Null);
    let node_input = if edge.rel.target_kind == TargetKind::Interface {
        // Interface inputs name the implementation to create.
        match node_input.get(&edge.target.name) {
            Some(input) => input,
            None => return Ok(Vec::new()),
        }
    } else {
        node_input
    };
    let empty = Map::new();
    let node_input = match node_input {
        Value::Null => &empty,
        other => input_map(other, &edge.target.names.create_input)?,
    };

    let target_var = cx.node_var();
    let rel_var = cx.node_var();
    let mut clauses = vec![Clause::with_star()];
    clauses.extend(create_clauses(cx, edge.target, &target_var, node_input)?);
    clauses.push(Clause::Create(CreateClause {
        patterns: vec![edge.link(Some(rel_var.clone()), &target_var)],
    }));
    if let Some(properties) = edge.properties(cx) {
        let edge_input = match element.get("edge") {
            None | Some(Value::Null) => &empty,
            Some(other) => input_map(other, &properties.name)?,
        };
        let items = create_properties(cx, &properties.name, &properties.fields, &rel_var, edge_input)?;
        if !items.is_empty() {
            clauses.push(Clause::Set(SetClause { items }));
        }
    }
    clauses.extend(finish_node(cx, edge.target, &target_var, node_input)?);
    Ok(clauses)
}

/// Root `create<Plural>` field. Each input runs in its own subquery; the
/// created nodes are then projected into the `data` column.
pub(crate) fn create(cx: &mut Context, type_name: &str, tree: &ResolveTree) -> Result<Vec<Clause>> {
    let node = cx
        .schema
        .node(type_name)
        .ok_or_else(|| TheseusError::schema(format!("Unknown node type {type_name}")))?;
    let inputs = elements_of(tree.arg("input").unwrap_or(&Value::Null));

    let mut clauses = Vec::new();
    let mut created = Vec::new();
    for input in inputs {
        let input = input_map(input, &node.names.create_input)?;
        let var = cx.node_var();
        let mut body = create_clauses(cx, node, &var, input)?;
        body.extend(finish_node(cx, node, &var, input)?);
        body.push(Clause::Return(ReturnClause::new(vec![ProjectionItem::new(
            Expr::var(&var),
        )])));
        clauses.push(Clause::Subquery(SubqueryClause::new(body)));
        created.push(var);
    }
    if created.is_empty() {
        return Ok(vec![Clause::Return(ReturnClause::single(
            Expr::list(Vec::new()),
            "data",
        ))]);
    }
    clauses.push(Clause::Unwind(UnwindClause {
        expression: Expr::list(created.iter().map(Expr::var).collect()),
        variable: ROOT.to_string(),
    }));
    clauses.extend(response(cx, node, tree)?);
    Ok(clauses)
}

/// Projects the mutated nodes bound to `this` into one `data` list, using
/// the selection under the response's `<plural>` field.
pub(crate) fn response(cx: &mut Context, node: &Node, tree: &ResolveTree) -> Result<Vec<Clause>> {
    let empty = ResolveTree::default();
    let selection = tree.field(&node.names.plural).unwrap_or(&empty);
    let mut clauses = visible(cx, node, ROOT)?;
    clauses.extend(project_node(cx, node, ROOT, selection, Extras::default())?.into_clauses(ROOT));
    clauses.push(Clause::Return(ReturnClause::single(
        Expr::call("collect", vec![Expr::var(ROOT)]),
        "data",
    )));
    Ok(clauses)
}
