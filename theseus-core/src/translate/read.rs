use indexmap::IndexMap;
use serde_json::Value;
use theseus_cypher::{
    Clause, Expr, MatchClause, NodePattern, Pattern, ProjectionItem, ReturnClause, SubqueryClause,
    UnwindClause, WithClause,
};

use super::aggregate::aggregate_fields;
use super::auth;
use super::connection::{connection_clauses, EdgeSource};
use super::context::Context;
use super::cypher_field::statement_call;
use super::filter::{entity_targets, node_filter, Filter};
use super::options::{page_node, page_projection, ListOptions};
use super::projection::{present_scalar, project_bound, project_node, Extras};
use crate::operation::ResolveTree;
use crate::prelude::*;
use crate::schema::{AuthOperation, Entity, Field, FieldKind, ListLimit, Node, TargetKind};

/// Variable the root object is bound to in every read statement.
pub(crate) const ROOT: &str = "this";

fn target_kind(entity: &Entity) -> TargetKind {
    match entity {
        Entity::Node(_) => TargetKind::Node,
        Entity::Interface(_) => TargetKind::Interface,
        Entity::Union(_) => TargetKind::Union,
    }
}

fn lookup_entity<'s>(cx: &Context<'s>, type_name: &str) -> Result<Entity<'s>> {
    cx.schema
        .entity(type_name)
        .ok_or_else(|| TheseusError::schema(format!("Unknown type {type_name}")))
}

/// `MATCH (var:Label) WHERE <where> AND <read rules>`.
fn matched(cx: &mut Context, node: &Node, var: &str, where_value: &Value) -> Result<Vec<Clause>> {
    auth::ensure_authenticated(cx, node, AuthOperation::Read)?;
    let read = auth::read_filter(cx, node, var)?;
    let filter = node_filter(cx, node, var, where_value)?.and_predicate(read);
    Ok(filter.apply(MatchClause::new(Pattern::node(NodePattern::labelled(
        var,
        &node.labels,
    )))))
}

fn return_root() -> Clause {
    Clause::Return(ReturnClause::new(vec![ProjectionItem::new(Expr::var(ROOT))]))
}

fn no_rows() -> Clause {
    Clause::Unwind(UnwindClause {
        expression: Expr::list(Vec::new()),
        variable: ROOT.to_string(),
    })
}

/// List read of a node, interface or union: one row per visible object.
pub(crate) fn read(cx: &mut Context, type_name: &str, tree: &ResolveTree) -> Result<Vec<Clause>> {
    let entity = lookup_entity(cx, type_name)?;
    let options = ListOptions::resolve(tree.arg("options"), None)?;
    let where_value = tree.arg("where").cloned().unwrap_or(Value::Null);
    let sort_fields: Vec<&str> = options.sort_keys().into_iter().map(|(name, _)| name).collect();

    if let Entity::Node(node) = entity {
        let limit = options.effective_limit(node.limit, cx.config);
        let mut clauses = matched(cx, node, ROOT, &where_value)?;
        let extras = if options.distinct {
            Extras {
                typename: false,
                sort: &sort_fields,
            }
        } else {
            clauses.extend(page_node(cx, node, ROOT, &options, limit)?);
            Extras::default()
        };
        clauses.extend(project_node(cx, node, ROOT, tree, extras)?.into_clauses(ROOT));
        if options.distinct {
            clauses.extend(page_projection(cx, ROOT, &options, limit));
        }
        clauses.push(return_root());
        return Ok(clauses);
    }

    let mut branches = Vec::new();
    for (node, branch_where) in entity_targets(cx, type_name, target_kind(&entity), &where_value)? {
        let var = cx.node_var();
        let mut branch = matched(cx, node, &var, &branch_where)?;
        let extras = Extras {
            typename: true,
            sort: &sort_fields,
        };
        branch.extend(project_node(cx, node, &var, tree, extras)?.into_clauses(&var));
        branch.push(Clause::Return(ReturnClause::single(Expr::var(&var), ROOT)));
        branches.push(branch);
    }
    if branches.is_empty() {
        return Ok(vec![no_rows(), return_root()]);
    }
    let limit = options.effective_limit(ListLimit::default(), cx.config);
    let mut clauses = vec![Clause::Subquery(SubqueryClause::union(branches))];
    clauses.extend(page_projection(cx, ROOT, &options, limit));
    clauses.push(return_root());
    Ok(clauses)
}

/// Root `<plural>Connection` field: one row holding `{ edges, totalCount }`.
pub(crate) fn connection(
    cx: &mut Context,
    type_name: &str,
    tree: &ResolveTree,
) -> Result<Vec<Clause>> {
    let entity = lookup_entity(cx, type_name)?;
    let where_value = tree.arg("where").cloned().unwrap_or(Value::Null);
    let mut sources = Vec::new();
    for (node, branch_where) in entity_targets(cx, type_name, target_kind(&entity), &where_value)? {
        let node_var = cx.node_var();
        let clauses = matched(cx, node, &node_var, &branch_where)?;
        sources.push(EdgeSource {
            node,
            clauses,
            node_var,
            rel_var: None,
        });
    }
    connection_clauses(cx, sources, None, entity.is_abstract(), tree, false, ROOT)
}

/// Root `<plural>Aggregate` field: one row holding the aggregation map.
pub(crate) fn aggregate(
    cx: &mut Context,
    type_name: &str,
    tree: &ResolveTree,
) -> Result<Vec<Clause>> {
    let entity = lookup_entity(cx, type_name)?;
    let where_value = tree.arg("where").cloned().unwrap_or(Value::Null);
    let no_fields = IndexMap::new();

    let (mut clauses, fields) = match entity {
        Entity::Node(node) => (matched(cx, node, ROOT, &where_value)?, &node.fields),
        Entity::Interface(_) | Entity::Union(_) => {
            let mut branches = Vec::new();
            for (node, branch_where) in
                entity_targets(cx, type_name, target_kind(&entity), &where_value)?
            {
                let var = cx.node_var();
                let mut branch = matched(cx, node, &var, &branch_where)?;
                branch.push(Clause::Return(ReturnClause::single(Expr::var(&var), ROOT)));
                branches.push(branch);
            }
            let fields = match entity {
                Entity::Interface(interface) => &interface.fields,
                _ => &no_fields,
            };
            if branches.is_empty() {
                (vec![no_rows()], fields)
            } else {
                (vec![Clause::Subquery(SubqueryClause::union(branches))], fields)
            }
        }
    };

    let selection = tree.selections();
    let mut entries: Vec<(String, Expr)> = selection
        .iter()
        .filter(|(_, field)| field.name == "count")
        .map(|(key, _)| (key.clone(), Expr::call("count", vec![Expr::var(ROOT)])))
        .collect();
    entries.extend(aggregate_fields(cx, fields, ROOT, &selection)?);
    clauses.push(Clause::Return(ReturnClause::single(Expr::map(entries), ROOT)));
    Ok(clauses)
}

/// Root field backed by a custom statement. Returns the clauses and whether
/// the rows carry scalars rather than objects.
pub(crate) fn cypher(
    cx: &mut Context,
    field: &Field,
    tree: &ResolveTree,
) -> Result<(Vec<Clause>, bool)> {
    let FieldKind::Cypher(cypher) = &field.kind else {
        return Err(TheseusError::schema(format!(
            "{} is not backed by a statement",
            field.name
        )));
    };
    let mut clauses = vec![
        statement_call(cx, None, cypher, &tree.args),
        Clause::With(WithClause::new(vec![ProjectionItem::aliased(
            Expr::var(&cypher.column_name),
            ROOT,
        )])),
    ];
    if cypher.target_kind.is_some() {
        clauses.extend(project_bound(cx, &field.type_ref.name, ROOT, tree)?);
        clauses.push(return_root());
        return Ok((clauses, false));
    }
    let value = match &cypher.scalar {
        Some(scalar) => present_scalar(Expr::var(ROOT), scalar, false, tree),
        None => Expr::var(ROOT),
    };
    clauses.push(Clause::Return(ReturnClause::single(value, ROOT)));
    Ok((clauses, true))
}

/// Rows of `var` restricted by a node's `where` and read rules, without
/// matching; used when the rows come from a write.
pub(crate) fn visible(cx: &mut Context, node: &Node, var: &str) -> Result<Vec<Clause>> {
    let read = auth::read_filter(cx, node, var)?;
    Ok(Filter::new(read).into_clauses())
}
