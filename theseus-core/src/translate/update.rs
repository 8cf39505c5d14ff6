use std::collections::HashSet;
use std::str::FromStr;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use theseus_cypher::{BinaryOp, Clause, Expr, MatchClause, NodePattern, Pattern, SetClause, SetItem};

use super::auth;
use super::context::Context;
use super::create::response;
use super::filter::{connection_where, node_filter};
use super::read::ROOT;
use super::write::{
    apply, by_member, cardinality_checks, elements, input_map, keyed, scoped, update_timestamps,
    Edge, NestedOp,
};
use crate::errors::OVERFLOW;
use crate::operation::ResolveTree;
use crate::prelude::*;
use crate::schema::{AuthOperation, Field, FieldKind, Node, PrimitiveField, ScalarKind, ValidationPhase};

const INT_MAX: i64 = i32::MAX as i64;
const INT_MIN: i64 = i32::MIN as i64;

/// Suffixes that update a field relative to its stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arithmetic {
    Increment,
    Decrement,
    Add,
    Subtract,
    Multiply,
    Divide,
    Push,
    Pop,
}

impl Arithmetic {
    const SUFFIXES: [(&'static str, Arithmetic); 8] = [
        ("_INCREMENT", Arithmetic::Increment),
        ("_DECREMENT", Arithmetic::Decrement),
        ("_ADD", Arithmetic::Add),
        ("_SUBTRACT", Arithmetic::Subtract),
        ("_MULTIPLY", Arithmetic::Multiply),
        ("_DIVIDE", Arithmetic::Divide),
        ("_PUSH", Arithmetic::Push),
        ("_POP", Arithmetic::Pop),
    ];

    fn parse(key: &str) -> Option<(&str, Arithmetic)> {
        Self::SUFFIXES.iter().find_map(|(suffix, op)| {
            key.strip_suffix(suffix)
                .filter(|field| !field.is_empty())
                .map(|field| (field, *op))
        })
    }

    fn supports(self, field: &Field, scalar: &ScalarKind) -> bool {
        let list = field.type_ref.list;
        match self {
            Arithmetic::Increment | Arithmetic::Decrement => {
                !list && matches!(scalar, ScalarKind::Int | ScalarKind::BigInt)
            }
            Arithmetic::Add | Arithmetic::Subtract | Arithmetic::Multiply | Arithmetic::Divide => {
                !list && *scalar == ScalarKind::Float
            }
            Arithmetic::Push | Arithmetic::Pop => list,
        }
    }

    fn binary_op(self) -> BinaryOp {
        match self {
            Arithmetic::Increment | Arithmetic::Add | Arithmetic::Push => BinaryOp::Add,
            Arithmetic::Decrement | Arithmetic::Subtract => BinaryOp::Sub,
            Arithmetic::Multiply => BinaryOp::Mul,
            Arithmetic::Divide | Arithmetic::Pop => BinaryOp::Div,
        }
    }
}

/// Writes compiled from the scalar part of an update input.
#[derive(Default)]
struct ScalarWrites<'f> {
    /// Overflow guards evaluated before the `SET`.
    guards: Vec<Clause>,
    items: Vec<SetItem>,
    written: Vec<String>,
    relationships: Vec<(&'f Field, &'f Value)>,
}

/// Interface update inputs carry per-implementation values under `_on`.
fn resolve_on(node: &Node, input: &Map<String, Value>) -> Map<String, Value> {
    let mut merged: Map<String, Value> = input
        .iter()
        .filter(|(key, _)| key.as_str() != "_on")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if let Some(Value::Object(specific)) = input.get("_on").and_then(|on| on.get(&node.name)) {
        merged.extend(specific.iter().map(|(key, value)| (key.clone(), value.clone())));
    }
    merged
}

fn overflow_guard(
    cx: &Context,
    owner: &str,
    field: &Field,
    scalar: &ScalarKind,
    result: &Expr,
) -> Option<Clause> {
    let overflows = match scalar {
        ScalarKind::Int => Expr::or_all([
            Expr::binary(BinaryOp::Gt, result.clone(), Expr::int(INT_MAX)),
            Expr::binary(BinaryOp::Lt, result.clone(), Expr::int(INT_MIN)),
        ])?,
        ScalarKind::Float => Expr::binary(
            BinaryOp::Gt,
            Expr::call("abs", vec![result.clone()]),
            Expr::float(f64::MAX),
        ),
        _ => return None,
    };
    Some(cx.validate(overflows, &format!("{OVERFLOW}: {owner}.{}", field.name)))
}

/// BigInt input arrives as a JSON number or a decimal string.
fn bigint_amount(owner: &str, field: &Field, value: &Value) -> Result<i64> {
    let parsed = match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        TheseusError::validation(format!(
            "{owner}.{} expects a 64-bit integer, got {value}",
            field.name
        ))
    })
}

/// 64-bit sums can't be computed before checking them, so the stored value
/// is compared against the bound left after applying `amount`.
fn bigint_guard(cx: &Context, owner: &str, field: &Field, current: &Expr, amount: i64) -> Clause {
    let overflows = if amount >= 0 {
        Expr::binary(BinaryOp::Gt, current.clone(), Expr::int(i64::MAX - amount))
    } else {
        Expr::binary(BinaryOp::Lt, current.clone(), Expr::int(i64::MIN - amount))
    };
    cx.validate(overflows, &format!("{OVERFLOW}: {owner}.{}", field.name))
}

#[allow(clippy::too_many_arguments)]
fn arithmetic_item<'f>(
    cx: &mut Context,
    owner: &str,
    var: &str,
    field: &'f Field,
    primitive: &PrimitiveField,
    op: Arithmetic,
    value: &Value,
    writes: &mut ScalarWrites<'f>,
) -> Result<()> {
    if !op.supports(field, &primitive.scalar) {
        return Err(TheseusError::validation(format!(
            "{owner}.{} does not support this operation",
            field.name
        )));
    }
    if value.is_null() {
        return Err(TheseusError::validation(format!(
            "Cannot apply an arithmetic operation with null to {owner}.{}",
            field.name
        )));
    }
    let current = Expr::var(var).property(&primitive.db_property);
    if primitive.scalar == ScalarKind::BigInt {
        let amount = bigint_amount(owner, field, value)?;
        let (op, delta) = match op {
            Arithmetic::Decrement => (BinaryOp::Sub, amount.checked_neg()),
            _ => (BinaryOp::Add, Some(amount)),
        };
        let delta = delta.ok_or_else(|| {
            TheseusError::arithmetic(format!("{OVERFLOW}: {owner}.{}", field.name))
        })?;
        writes.guards.push(Clause::with_star());
        writes.guards.push(bigint_guard(cx, owner, field, &current, delta));
        let operand = cx.param(Value::from(amount));
        writes.items.push(SetItem::new(
            Expr::var(var).property(&primitive.db_property),
            Expr::binary(op, current, operand),
        ));
        return Ok(());
    }
    let result = match op {
        Arithmetic::Divide if value.as_f64() == Some(0.0) => {
            return Err(TheseusError::arithmetic(format!(
                "Division by zero on {owner}.{}",
                field.name
            )))
        }
        Arithmetic::Pop => {
            let count = value.as_u64().ok_or_else(|| {
                TheseusError::validation(format!("{owner}.{}_POP expects a positive integer", field.name))
            })?;
            if count == 0 {
                return Ok(());
            }
            let count = cx.param(Value::from(count));
            Expr::ListSlice {
                expr: Box::new(current),
                start: Some(Box::new(Expr::int(0))),
                end: Some(Box::new(Expr::UnaryOp {
                    op: theseus_cypher::UnaryOp::Neg,
                    expr: Box::new(count),
                })),
            }
        }
        Arithmetic::Push => {
            let items = match value {
                Value::Array(_) => value.clone(),
                other => Value::Array(vec![other.clone()]),
            };
            let pushed = cx.typed_param(&primitive.scalar, items);
            Expr::binary(
                BinaryOp::Add,
                Expr::call("coalesce", vec![current, Expr::list(Vec::new())]),
                pushed,
            )
        }
        _ => {
            let operand = cx.param(value.clone());
            Expr::binary(op.binary_op(), current, operand)
        }
    };
    if let Some(guard) = overflow_guard(cx, owner, field, &primitive.scalar, &result) {
        writes.guards.push(Clause::with_star());
        writes.guards.push(guard);
    }
    writes
        .items
        .push(SetItem::new(Expr::var(var).property(&primitive.db_property), result));
    Ok(())
}

fn scalar_writes<'f>(
    cx: &mut Context,
    owner: &str,
    fields: &'f IndexMap<String, Field>,
    var: &str,
    input: &'f Map<String, Value>,
) -> Result<ScalarWrites<'f>> {
    let mut writes = ScalarWrites::default();
    let mut mutated = HashSet::new();
    for (key, value) in input {
        let (name, op) = match fields.get(key) {
            Some(_) => (key.as_str(), None),
            None => match Arithmetic::parse(key) {
                Some((name, op)) => (name, Some(op)),
                None => {
                    return Err(TheseusError::validation(format!(
                        "Unknown field {owner}.{key}"
                    )))
                }
            },
        };
        let field = fields
            .get(name)
            .ok_or_else(|| TheseusError::validation(format!("Unknown field {owner}.{key}")))?;
        let primitive = match &field.kind {
            FieldKind::Primitive(primitive) => primitive,
            FieldKind::Relationship(_) if op.is_none() => {
                writes.relationships.push((field, value));
                continue;
            }
            _ => {
                return Err(TheseusError::validation(format!(
                    "{owner}.{name} cannot be written"
                )))
            }
        };
        if primitive.is_generated() {
            return Err(TheseusError::validation(format!(
                "{owner}.{name} is generated and cannot be set"
            )));
        }
        if !mutated.insert(name) {
            return Err(TheseusError::validation(format!(
                "Cannot mutate the same field multiple times in one Mutation: {name}"
            )));
        }
        writes.written.push(name.to_string());
        match op {
            Some(op) => arithmetic_item(cx, owner, var, field, primitive, op, value, &mut writes)?,
            None => {
                let value = cx.typed_param(&primitive.scalar, value.clone());
                writes
                    .items
                    .push(SetItem::new(Expr::var(var).property(&primitive.db_property), value));
            }
        }
    }
    Ok(writes)
}

/// BEFORE validation, property writes and nested relationship operations of
/// one node update. `touched` names relationship fields changed by sibling
/// connect/disconnect arguments. Returns the clauses and the names of written
/// fields.
fn update_writes(
    cx: &mut Context,
    node: &Node,
    var: &str,
    input: &Map<String, Value>,
    touched: &[String],
) -> Result<(Vec<Clause>, Vec<String>)> {
    let input = resolve_on(node, input);
    let writes = scalar_writes(cx, &node.name, &node.fields, var, &input)?;
    let mut written: Vec<&str> = writes
        .written
        .iter()
        .map(String::as_str)
        .chain(writes.relationships.iter().map(|(field, _)| field.name.as_str()))
        .collect();
    for field in touched {
        if !written.contains(&field.as_str()) {
            written.push(field.as_str());
        }
    }
    let mut clauses = auth::validate(
        cx,
        node,
        var,
        AuthOperation::Update,
        ValidationPhase::Before,
        &written,
    )?;
    let written: Vec<String> = written.into_iter().map(str::to_string).collect();

    clauses.extend(writes.guards);
    let mut items = writes.items;
    if !items.is_empty() {
        items.extend(update_timestamps(cx, &node.fields, var));
        clauses.push(Clause::Set(SetClause { items }));
    }

    for (field, value) in writes.relationships {
        let Some(rel) = field.as_relationship() else {
            continue;
        };
        for (member, value) in by_member(cx, rel, value)? {
            for (target, element) in elements(cx, rel, member, value)? {
                let element_map = input_map(&element, &rel.names.update_field_input)?;
                for (key, op_value) in element_map {
                    if key == "where" {
                        continue;
                    }
                    let op = NestedOp::from_str(key).map_err(|_| {
                        TheseusError::validation(format!(
                            "Unknown operation {key} on {}.{}",
                            node.name, field.name
                        ))
                    })?;
                    if op == NestedOp::Update {
                        let mut update = Map::new();
                        if let Some(where_value) = element_map.get("where") {
                            update.insert("where".to_string(), where_value.clone());
                        }
                        update.insert("update".to_string(), op_value.clone());
                        clauses.extend(apply(
                            cx,
                            op,
                            node,
                            var,
                            field,
                            rel,
                            target,
                            &Value::Object(update),
                        )?);
                        continue;
                    }
                    for (_, nested) in elements(cx, rel, Some(target), op_value)? {
                        clauses.extend(apply(cx, op, node, var, field, rel, target, &nested)?);
                    }
                }
            }
        }
    }
    Ok((clauses, written))
}

/// Cardinality checks and AFTER validation closing a node update.
fn update_checks(
    cx: &mut Context,
    node: &Node,
    var: &str,
    written: &[String],
) -> Result<Vec<Clause>> {
    let mut clauses = cardinality_checks(cx, node, var, None);
    let written: Vec<&str> = written.iter().map(String::as_str).collect();
    clauses.extend(auth::validate(
        cx,
        node,
        var,
        AuthOperation::Update,
        ValidationPhase::After,
        &written,
    )?);
    Ok(clauses)
}

/// `update` element of a relationship field's update input: matches related
/// nodes by the connection `where` and updates them and the relationship.
pub(crate) fn nested_update(cx: &mut Context, edge: &Edge, element: &Value) -> Result<Vec<Clause>> {
    let element = input_map(element, &edge.rel.names.update_field_input)?;
    let where_value = element.get("where").unwrap_or(&Value::Null);
    let update = element.get("update").unwrap_or(&Value::Null);
    auth::ensure_authenticated(cx, edge.target, AuthOperation::Update)?;

    let target_var = cx.node_var();
    let rel_var = cx.node_var();
    let properties = edge.properties(cx);
    let update_filter =
        auth::filter_predicate(cx, edge.target, &target_var, AuthOperation::Update)?;
    let filter = connection_where(cx, edge.target, &target_var, properties, &rel_var, where_value)?
        .and_predicate(update_filter);
    let mut body = filter.apply(MatchClause::new(edge.pattern(Some(rel_var.clone()), &target_var)));

    let mut written = Vec::new();
    if let Some(node_input) = update.get("node").filter(|v| !v.is_null()) {
        let node_input = input_map(node_input, &edge.target.names.update_input)?;
        let (clauses, fields) = update_writes(cx, edge.target, &target_var, node_input, &[])?;
        body.extend(clauses);
        written = fields;
    }
    if let Some(edge_input) = update.get("edge").filter(|v| !v.is_null()) {
        let properties = properties.ok_or_else(|| {
            TheseusError::validation(format!(
                "{}.{} has no relationship properties",
                edge.parent.name, edge.field.name
            ))
        })?;
        let edge_input = input_map(edge_input, &properties.name)?;
        let writes = scalar_writes(cx, &properties.name, &properties.fields, &rel_var, edge_input)?;
        body.extend(writes.guards);
        let mut items = writes.items;
        if !items.is_empty() {
            items.extend(update_timestamps(cx, &properties.fields, &rel_var));
            body.push(Clause::Set(SetClause { items }));
        }
    }
    body.extend(update_checks(cx, edge.target, &target_var, &written)?);
    Ok(scoped(cx, &[edge.parent_var], body))
}

/// Root `update<Plural>` field.
pub(crate) fn update(cx: &mut Context, type_name: &str, tree: &ResolveTree) -> Result<Vec<Clause>> {
    let node = cx
        .schema
        .node(type_name)
        .ok_or_else(|| TheseusError::schema(format!("Unknown node type {type_name}")))?;
    auth::ensure_authenticated(cx, node, AuthOperation::Update)?;
    let where_value = tree.arg("where").cloned().unwrap_or(Value::Null);

    let update_filter = auth::filter_predicate(cx, node, ROOT, AuthOperation::Update)?;
    let filter = node_filter(cx, node, ROOT, &where_value)?.and_predicate(update_filter);
    let mut clauses = filter.apply(MatchClause::new(Pattern::node(NodePattern::labelled(
        ROOT,
        &node.labels,
    ))));

    let operations: Vec<(NestedOp, &Value)> = [
        ("disconnect", NestedOp::Disconnect),
        ("connect", NestedOp::Connect),
        ("create", NestedOp::Create),
        ("connectOrCreate", NestedOp::ConnectOrCreate),
        ("delete", NestedOp::Delete),
    ]
    .into_iter()
    .filter_map(|(argument, op)| tree.arg(argument).map(|input| (op, input)))
    .collect();
    let mut touched: Vec<String> = Vec::new();
    for key in operations.iter().filter_map(|(_, input)| input.as_object()).flat_map(|map| map.keys()) {
        if !touched.contains(key) {
            touched.push(key.clone());
        }
    }

    let written = match tree.arg("update") {
        Some(update) => {
            let input = input_map(update, &node.names.update_input)?;
            let (writes, fields) = update_writes(cx, node, ROOT, input, &touched)?;
            clauses.extend(writes);
            fields
        }
        None => {
            if !touched.is_empty() {
                let fields: Vec<&str> = touched.iter().map(String::as_str).collect();
                clauses.extend(auth::validate(
                    cx,
                    node,
                    ROOT,
                    AuthOperation::Update,
                    ValidationPhase::Before,
                    &fields,
                )?);
            }
            touched
        }
    };
    for (op, input) in operations {
        clauses.extend(keyed(cx, op, node, ROOT, input)?);
    }
    clauses.extend(update_checks(cx, node, ROOT, &written)?);
    clauses.extend(response(cx, node, tree)?);
    Ok(clauses)
}
