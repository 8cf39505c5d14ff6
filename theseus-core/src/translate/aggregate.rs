use indexmap::IndexMap;
use serde_json::Value;
use theseus_cypher::{BinaryOp, Clause, Expr, MatchClause, NodePattern, ReturnClause, SubqueryClause};

use super::context::Context;
use super::filter::{abstract_target_filter, node_filter};
use super::projection::TYPENAME;
use super::{auth, property, traversal};
use crate::operation::ResolveTree;
use crate::prelude::*;
use crate::schema::{Field, FieldKind, PrimitiveField, RelationshipField, TargetKind};

/// `{ <key>: { min, max, average, sum, shortest, longest } }` for the
/// selected fields of `var`, keyed by response keys.
pub(crate) fn aggregate_fields(
    cx: &mut Context,
    fields: &IndexMap<String, Field>,
    var: &str,
    selection: &IndexMap<String, &ResolveTree>,
) -> Result<Vec<(String, Expr)>> {
    let mut entries = Vec::new();
    for (key, tree) in selection {
        if tree.name == TYPENAME || tree.name == "count" {
            continue;
        }
        let Some(field) = fields.get(&tree.name) else {
            continue;
        };
        let FieldKind::Primitive(primitive) = &field.kind else {
            return Err(TheseusError::validation(format!(
                "{} cannot be aggregated",
                field.name
            )));
        };
        entries.push((key.clone(), field_aggregation(cx, var, primitive, tree)?));
    }
    Ok(entries)
}

fn field_aggregation(
    cx: &mut Context,
    var: &str,
    primitive: &PrimitiveField,
    tree: &ResolveTree,
) -> Result<Expr> {
    let read = property(var, primitive);
    let scalar = &primitive.scalar;
    let present = |value: Expr| {
        if scalar.is_temporal() {
            Expr::call("toString", vec![value])
        } else {
            value
        }
    };
    let mut entries = Vec::new();
    for (key, sub) in tree.selections() {
        let value = match sub.name.as_str() {
            "min" => present(Expr::call("min", vec![read.clone()])),
            "max" => present(Expr::call("max", vec![read.clone()])),
            "average" => Expr::call("avg", vec![read.clone()]),
            "sum" => Expr::call("sum", vec![read.clone()]),
            "shortest" => by_length(cx, read.clone(), BinaryOp::Lt),
            "longest" => by_length(cx, read.clone(), BinaryOp::Gt),
            TYPENAME => continue,
            other => {
                return Err(TheseusError::validation(format!(
                    "Unknown aggregation {other}"
                )))
            }
        };
        entries.push((key, value));
    }
    Ok(Expr::map(entries))
}

/// First string in traversal order whose length wins the strict comparison.
fn by_length(cx: &mut Context, read: Expr, op: BinaryOp) -> Expr {
    let accumulator = cx.value_var();
    let item = cx.value_var();
    let replace = Expr::or_all([
        Expr::is_null(Expr::var(&accumulator)),
        Expr::binary(
            op,
            Expr::call("size", vec![Expr::var(&item)]),
            Expr::call("size", vec![Expr::var(&accumulator)]),
        ),
    ])
    .unwrap_or(Expr::bool(true));
    Expr::Reduce {
        accumulator: accumulator.clone(),
        init: Box::new(Expr::null()),
        variable: item.clone(),
        list: Box::new(Expr::call("collect", vec![read])),
        expr: Box::new(Expr::Case {
            base: None,
            alternatives: vec![(replace, Expr::var(item))],
            else_expr: Some(Box::new(Expr::var(accumulator))),
        }),
    }
}

/// `CALL { ... }` computing a `<field>Aggregate` selection:
/// `{ count, node { ... }, edge { ... } }`.
pub(crate) fn relationship_aggregate(
    cx: &mut Context,
    source: &str,
    rel: &RelationshipField,
    tree: &ResolveTree,
) -> Result<(Clause, String)> {
    let result = cx.value_var();
    let target = cx.node_var();
    let relationship = cx.node_var();
    let direction = rel.read_direction(tree.arg("directed").and_then(Value::as_bool));
    let where_value = tree.arg("where").cloned().unwrap_or(Value::Null);
    let properties = rel
        .properties
        .as_deref()
        .and_then(|name| cx.schema.relationship_properties(name));

    let (labels, filter, fields) = match rel.target_kind {
        TargetKind::Node => {
            let node = cx.schema.node(&rel.target).ok_or_else(|| {
                TheseusError::schema(format!("Unknown node type {}", rel.target))
            })?;
            let read = auth::read_filter(cx, node, &target)?;
            let filter = node_filter(cx, node, &target, &where_value)?.and_predicate(read);
            (node.labels.clone(), filter, Some(&node.fields))
        }
        TargetKind::Interface | TargetKind::Union => {
            let filter = abstract_target_filter(cx, rel, &target, &where_value)?;
            let fields = cx.schema.interfaces.get(&rel.target).map(|i| &i.fields);
            (Vec::new(), filter, fields)
        }
    };

    let mut entries = Vec::new();
    for (key, sub) in tree.selections() {
        match sub.name.as_str() {
            "count" => entries.push((
                key,
                Expr::call("count", vec![Expr::var(&target)]),
            )),
            "node" => {
                let fields = fields.ok_or_else(|| {
                    TheseusError::validation(format!("{} has no aggregatable node fields", rel.target))
                })?;
                let selection = sub.selections();
                entries.push((key, Expr::map(aggregate_fields(cx, fields, &target, &selection)?)));
            }
            "edge" => {
                let properties = properties.ok_or_else(|| {
                    TheseusError::validation(format!("{} has no relationship properties", rel.names.aggregate_field))
                })?;
                let selection = sub.selections();
                entries.push((
                    key,
                    Expr::map(aggregate_fields(cx, &properties.fields, &relationship, &selection)?),
                ));
            }
            _ => {}
        }
    }

    let pattern = traversal(
        source,
        rel,
        Some(relationship),
        NodePattern::labelled(&target, &labels),
        direction,
    );
    let mut clauses = vec![Clause::with_vars([source])];
    clauses.extend(filter.apply(MatchClause::new(pattern)));
    clauses.push(Clause::Return(ReturnClause::single(Expr::map(entries), &result)));
    Ok((Clause::Subquery(SubqueryClause::new(clauses)), result))
}
