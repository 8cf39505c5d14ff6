//! `connect`, `connectOrCreate` and `disconnect` elements of relationship
//! inputs. Each element compiles into one subquery scoped to the parent row.

use serde_json::{Map, Value};
use theseus_cypher::{
    Clause, DeleteClause, Expr, ForeachClause, MatchClause, MergeClause, NodePattern, Pattern,
    SetClause, SetItem,
};

use super::auth;
use super::context::Context;
use super::filter::{check_interface_where, connection_where, node_filter};
use super::write::{
    cardinality_checks, create_properties, elements_of, input_map, keyed, scoped, Edge, NestedOp,
};
use crate::prelude::*;
use crate::schema::{AuthOperation, Node, TargetKind, ValidationPhase};

/// `CASE WHEN <any var> IS NULL THEN [] ELSE [<item>] END`, the list a
/// `FOREACH` iterates to write only when every variable is bound.
fn when_bound(vars: &[&str], item: Expr) -> Expr {
    let unbound = Expr::or_all(vars.iter().map(|var| Expr::is_null(Expr::var(*var))))
        .unwrap_or(Expr::bool(false));
    Expr::Case {
        base: None,
        alternatives: vec![(unbound, Expr::list(Vec::new()))],
        else_expr: Some(Box::new(Expr::list(vec![item]))),
    }
}

fn where_node<'v>(element: &'v Map<String, Value>) -> &'v Value {
    element
        .get("where")
        .and_then(|w| w.get("node"))
        .unwrap_or(&Value::Null)
}

fn check_where(cx: &Context, edge: &Edge, value: &Value) -> Result<()> {
    if edge.rel.target_kind == TargetKind::Interface {
        if let Some(interface) = cx.schema.interfaces.get(&edge.rel.target) {
            check_interface_where(interface, value)?;
        }
    }
    Ok(())
}

/// Rules of both ends checked for a relationship change in one phase.
fn validate_ends(
    cx: &mut Context,
    edge: &Edge,
    target_var: &str,
    operation: AuthOperation,
    phase: ValidationPhase,
) -> Result<Vec<Clause>> {
    let mut clauses = auth::validate(
        cx,
        edge.parent,
        edge.parent_var,
        operation,
        phase,
        &[edge.field.name.as_str()],
    )?;
    clauses.extend(auth::validate(cx, edge.target, target_var, operation, phase, &[])?);
    Ok(clauses)
}

fn ensure_ends(cx: &Context, edge: &Edge, operation: AuthOperation) -> Result<()> {
    auth::ensure_authenticated(cx, edge.parent, operation)?;
    auth::ensure_authenticated(cx, edge.target, operation)
}

/// `SET` items for the relationship's properties on creation.
fn edge_items(
    cx: &mut Context,
    edge: &Edge,
    rel_var: &str,
    input: Option<&Value>,
) -> Result<Vec<SetItem>> {
    let Some(properties) = edge.properties(cx) else {
        return Ok(Vec::new());
    };
    let empty = Map::new();
    let input = match input {
        None | Some(Value::Null) => &empty,
        Some(other) => input_map(other, &properties.name)?,
    };
    create_properties(cx, &properties.name, &properties.fields, rel_var, input)
}

/// Target's own single and required relationships of the same type, which
/// the new relationship may have exceeded.
fn target_cardinality(cx: &mut Context, edge: &Edge, target_var: &str) -> Vec<Clause> {
    let checks = cardinality_checks(cx, edge.target, target_var, Some(&edge.rel.rel_type));
    if checks.is_empty() {
        return checks;
    }
    let mut clauses = vec![Clause::With(
        theseus_cypher::WithClause::star()
            .filtered(Some(Expr::is_not_null(Expr::var(target_var)))),
    )];
    clauses.extend(checks);
    clauses
}

pub(crate) fn connect(cx: &mut Context, edge: &Edge, element: &Value) -> Result<Vec<Clause>> {
    let element = input_map(element, &edge.rel.names.connect_field_input)?;
    let where_value = where_node(element);
    check_where(cx, edge, where_value)?;
    ensure_ends(cx, edge, AuthOperation::Connect)?;

    let target_var = cx.node_var();
    let rel_var = cx.node_var();
    let connect_filter =
        auth::filter_predicate(cx, edge.target, &target_var, AuthOperation::Connect)?;
    let filter = node_filter(cx, edge.target, &target_var, where_value)?.and_predicate(connect_filter);
    let mut body = filter.apply(MatchClause::optional(Pattern::node(NodePattern::labelled(
        &target_var,
        &edge.target.labels,
    ))));
    body.extend(validate_ends(
        cx,
        edge,
        &target_var,
        AuthOperation::Connect,
        ValidationPhase::Before,
    )?);

    let items = edge_items(cx, edge, &rel_var, element.get("edge"))?;
    let overwrite = element
        .get("overwrite")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let (on_create, set) = if overwrite {
        (Vec::new(), items)
    } else {
        (items, Vec::new())
    };
    let mut writes = vec![Clause::Merge(MergeClause {
        pattern: edge.link(Some(rel_var), &target_var),
        on_create,
        on_match: Vec::new(),
    })];
    if !set.is_empty() {
        writes.push(Clause::Set(SetClause { items: set }));
    }
    body.push(Clause::Foreach(ForeachClause {
        variable: cx.value_var(),
        list: when_bound(&[edge.parent_var, target_var.as_str()], Expr::int(1)),
        clauses: writes,
    }));

    if let Some(nested) = element.get("connect") {
        for nested in elements_of(nested) {
            body.extend(keyed(cx, NestedOp::Connect, edge.target, &target_var, nested)?);
        }
    }
    body.extend(validate_ends(
        cx,
        edge,
        &target_var,
        AuthOperation::Connect,
        ValidationPhase::After,
    )?);
    body.extend(target_cardinality(cx, edge, &target_var));
    Ok(scoped(cx, &[edge.parent_var], body))
}

/// Unique-field properties identifying the node a `connectOrCreate` merges on.
fn merge_key(
    cx: &mut Context,
    target: &Node,
    where_value: &Value,
) -> Result<Vec<(String, Expr)>> {
    let map = input_map(where_value, &target.names.where_input)?;
    let mut properties = Vec::new();
    for (name, value) in map {
        let (_, primitive) = target
            .unique_fields()
            .find(|(field, _)| &field.name == name)
            .ok_or_else(|| {
                TheseusError::validation(format!(
                    "connectOrCreate on {} must match on unique fields, got {name}",
                    target.name
                ))
            })?;
        let value = cx.typed_param(&primitive.scalar, value.clone());
        properties.push((primitive.db_property.clone(), value));
    }
    if properties.is_empty() {
        return Err(TheseusError::validation(format!(
            "connectOrCreate on {} needs a unique field to match on",
            target.name
        )));
    }
    Ok(properties)
}

pub(crate) fn connect_or_create(
    cx: &mut Context,
    edge: &Edge,
    element: &Value,
) -> Result<Vec<Clause>> {
    if edge.rel.target_kind != TargetKind::Node {
        return Err(TheseusError::validation(format!(
            "connectOrCreate is not supported on abstract field {}.{}",
            edge.parent.name, edge.field.name
        )));
    }
    let element = input_map(element, &edge.rel.names.connect_or_create_field_input)?;
    ensure_ends(cx, edge, AuthOperation::Connect)?;
    auth::ensure_authenticated(cx, edge.target, AuthOperation::Create)?;

    let on_create = element.get("onCreate");
    let empty = Map::new();
    let node_input = match on_create.and_then(|c| c.get("node")) {
        None | Some(Value::Null) => &empty,
        Some(other) => input_map(other, &edge.target.names.create_input)?,
    };
    auth::check_bind(cx, edge.target, node_input)?;

    let target_var = cx.node_var();
    let rel_var = cx.node_var();
    let key = merge_key(cx, edge.target, where_node(element))?;
    let merged: Vec<String> = key.iter().map(|(property, _)| property.clone()).collect();
    let node_items: Vec<SetItem> =
        create_properties(cx, &edge.target.name, &edge.target.fields, &target_var, node_input)?
            .into_iter()
            .filter(|item| match &item.target {
                Expr::PropertyAccess { key, .. } => !merged.contains(key),
                _ => true,
            })
            .collect();
    let edge_items = edge_items(cx, edge, &rel_var, on_create.and_then(|c| c.get("edge")))?;

    let mut body = vec![
        Clause::Merge(MergeClause {
            pattern: Pattern::node(
                NodePattern::labelled(&target_var, &edge.target.labels).with_properties(key),
            ),
            on_create: node_items,
            on_match: Vec::new(),
        }),
        Clause::Merge(MergeClause {
            pattern: edge.link(Some(rel_var), &target_var),
            on_create: edge_items,
            on_match: Vec::new(),
        }),
    ];
    body.extend(validate_ends(
        cx,
        edge,
        &target_var,
        AuthOperation::Connect,
        ValidationPhase::After,
    )?);
    body.extend(target_cardinality(cx, edge, &target_var));
    Ok(scoped(cx, &[edge.parent_var], body))
}

pub(crate) fn disconnect(cx: &mut Context, edge: &Edge, element: &Value) -> Result<Vec<Clause>> {
    let element = input_map(element, &edge.rel.names.disconnect_field_input)?;
    let where_value = element.get("where").unwrap_or(&Value::Null);
    check_where(cx, edge, where_node(element))?;
    ensure_ends(cx, edge, AuthOperation::Disconnect)?;

    let target_var = cx.node_var();
    let rel_var = cx.node_var();
    let properties = edge.properties(cx);
    let disconnect_filter =
        auth::filter_predicate(cx, edge.target, &target_var, AuthOperation::Disconnect)?;
    let filter = connection_where(cx, edge.target, &target_var, properties, &rel_var, where_value)?
        .and_predicate(disconnect_filter);
    let mut body = filter.apply(MatchClause::optional(
        edge.pattern(Some(rel_var.clone()), &target_var),
    ));
    body.extend(validate_ends(
        cx,
        edge,
        &target_var,
        AuthOperation::Disconnect,
        ValidationPhase::Before,
    )?);
    let item = cx.value_var();
    body.push(Clause::Foreach(ForeachClause {
        variable: item.clone(),
        list: when_bound(&[rel_var.as_str()], Expr::var(&rel_var)),
        clauses: vec![Clause::Delete(DeleteClause {
            detach: false,
            items: vec![Expr::var(item)],
        })],
    }));
    if let Some(nested) = element.get("disconnect") {
        for nested in elements_of(nested) {
            body.extend(keyed(cx, NestedOp::Disconnect, edge.target, &target_var, nested)?);
        }
    }
    body.extend(validate_ends(
        cx,
        edge,
        &target_var,
        AuthOperation::Disconnect,
        ValidationPhase::After,
    )?);
    Ok(scoped(cx, &[edge.parent_var], body))
}
