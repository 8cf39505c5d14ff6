use indexmap::IndexMap;
use serde_json::{Map, Value};
use theseus_cypher::{BinaryOp, Clause, Expr, MatchClause, NodePattern, Pattern, ReturnClause};

use super::context::Context;
use super::{auth, cypher_field, property, traversal};
use crate::prelude::*;
use crate::schema::{
    Field, FieldKind, Interface, Node, PrimitiveField, RelationshipField, RelationshipProperties,
    ScalarKind, TargetKind,
};

/// Predicate over the current variable plus the subqueries it reads from.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct Filter {
    pub predicate: Option<Expr>,
    /// `CALL` subqueries that must run before the predicate is evaluated.
    pub preconditions: Vec<Clause>,
}

impl Filter {
    pub fn new(predicate: Option<Expr>) -> Self {
        Self {
            predicate,
            preconditions: Vec::new(),
        }
    }

    pub fn and(mut self, other: Filter) -> Self {
        self.preconditions.extend(other.preconditions);
        self.predicate = Expr::and_all(self.predicate.into_iter().chain(other.predicate));
        self
    }

    pub fn and_predicate(self, predicate: Option<Expr>) -> Self {
        self.and(Filter::new(predicate))
    }

    /// Clauses selecting the rows of `matched` that pass the filter.
    pub fn apply(self, matched: MatchClause) -> Vec<Clause> {
        if self.preconditions.is_empty() {
            return vec![Clause::Match(matched.filtered(self.predicate))];
        }
        let mut clauses = vec![Clause::Match(matched)];
        clauses.extend(self.into_clauses());
        clauses
    }

    /// Clauses filtering rows that are already bound.
    pub fn into_clauses(self) -> Vec<Clause> {
        let mut clauses = self.preconditions;
        if let Some(predicate) = self.predicate {
            clauses.push(Clause::With(
                theseus_cypher::WithClause::star().filtered(Some(predicate)),
            ));
        }
        clauses
    }
}

const OPERATORS: [&str; 21] = [
    "_NOT_STARTS_WITH",
    "_NOT_ENDS_WITH",
    "_NOT_CONTAINS",
    "_NOT_INCLUDES",
    "_STARTS_WITH",
    "_ENDS_WITH",
    "_DISTANCE",
    "_CONTAINS",
    "_INCLUDES",
    "_MATCHES",
    "_NOT_IN",
    "_SINGLE",
    "_SOME",
    "_NONE",
    "_ALL",
    "_NOT",
    "_LTE",
    "_GTE",
    "_IN",
    "_LT",
    "_GT",
];

enum FilterKey<'s> {
    Field(&'s Field, Option<&'static str>),
    Connection(&'s Field, Option<&'static str>),
    Aggregate(&'s Field),
}

fn parse_key<'s>(fields: &'s IndexMap<String, Field>, key: &str) -> Option<FilterKey<'s>> {
    if let Some(field) = fields.get(key) {
        return Some(FilterKey::Field(field, None));
    }
    let relationship = |name: &str| {
        fields
            .values()
            .find(|f| f.as_relationship().is_some_and(|r| r.names.connection_field == name))
    };
    if let Some(field) = fields.values().find(|f| {
        f.as_relationship()
            .is_some_and(|r| r.names.aggregate_field == key)
    }) {
        return Some(FilterKey::Aggregate(field));
    }
    if let Some(field) = relationship(key) {
        return Some(FilterKey::Connection(field, None));
    }
    for operator in OPERATORS {
        let Some(base) = key.strip_suffix(operator) else {
            continue;
        };
        if let Some(field) = fields.get(base) {
            return Some(FilterKey::Field(field, Some(operator)));
        }
        if let Some(field) = relationship(base) {
            return Some(FilterKey::Connection(field, Some(operator)));
        }
    }
    None
}

fn as_map<'v>(value: &'v Value, owner: &str) -> Result<Option<&'v Map<String, Value>>> {
    match value {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map)),
        other => Err(TheseusError::validation(format!(
            "{owner}Where must be an object, got {other}"
        ))),
    }
}

fn logical(
    cx: &mut Context,
    value: &Value,
    op: BinaryOp,
    mut each: impl FnMut(&mut Context, &Value) -> Result<Filter>,
) -> Result<Filter> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    let mut preconditions = Vec::new();
    let mut predicates = Vec::new();
    for item in items {
        let filter = each(cx, item)?;
        preconditions.extend(filter.preconditions);
        predicates.extend(filter.predicate);
    }
    let predicate = match op {
        BinaryOp::Or => Expr::or_all(predicates),
        _ => Expr::and_all(predicates),
    };
    Ok(Filter {
        predicate,
        preconditions,
    })
}

fn negate(filter: Filter) -> Filter {
    Filter {
        predicate: filter.predicate.map(Expr::not),
        preconditions: filter.preconditions,
    }
}

/// Rejects `_on` entries that don't name an implementation of the interface.
pub(crate) fn check_interface_where(interface: &Interface, value: &Value) -> Result<()> {
    if let Some(Value::Object(on)) = value.get("_on") {
        for type_name in on.keys() {
            if !interface.implementations.contains(type_name) {
                return Err(TheseusError::validation(format!(
                    "{type_name} does not implement {}",
                    interface.name
                )));
            }
        }
    }
    Ok(())
}

/// Shared keys merged with the `_on` entry for the node's type; the `_on`
/// entry wins for the same key.
fn resolve_on(node: &Node, map: &Map<String, Value>) -> Map<String, Value> {
    let mut merged: Map<String, Value> = map
        .iter()
        .filter(|(key, _)| key.as_str() != "_on")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if let Some(Value::Object(specific)) = map.get("_on").and_then(|on| on.get(&node.name)) {
        for (key, value) in specific {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

pub(crate) fn node_filter(cx: &mut Context, node: &Node, var: &str, value: &Value) -> Result<Filter> {
    let Some(map) = as_map(value, &node.name)? else {
        return Ok(Filter::default());
    };
    let map = if map.contains_key("_on") {
        resolve_on(node, map)
    } else {
        map.clone()
    };

    let mut filter = Filter::default();
    for (key, value) in &map {
        let part = match key.as_str() {
            "AND" => logical(cx, value, BinaryOp::And, |cx, v| node_filter(cx, node, var, v))?,
            "OR" => logical(cx, value, BinaryOp::Or, |cx, v| node_filter(cx, node, var, v))?,
            "NOT" => negate(node_filter(cx, node, var, value)?),
            "typename_IN" => {
                let names = value.as_array().ok_or_else(|| {
                    TheseusError::validation("typename_IN expects a list of type names")
                })?;
                Filter::new(Some(Expr::bool(
                    names.iter().any(|name| name.as_str() == Some(node.name.as_str())),
                )))
            }
            _ => match parse_key(&node.fields, key) {
                Some(FilterKey::Field(field, operator)) => {
                    field_filter(cx, node, var, field, operator, value)?
                }
                Some(FilterKey::Connection(field, operator)) => {
                    let rel = relationship_of(field)?;
                    connection_filter(cx, var, field, rel, operator, value)?
                }
                Some(FilterKey::Aggregate(field)) => {
                    let rel = relationship_of(field)?;
                    aggregate_filter(cx, var, field, rel, value)?
                }
                None => {
                    return Err(TheseusError::validation(format!(
                        "Unknown filter {key} on {}",
                        node.names.where_input
                    )))
                }
            },
        };
        filter = filter.and(part);
    }
    Ok(filter)
}

pub(crate) fn edge_filter(
    cx: &mut Context,
    properties: &RelationshipProperties,
    var: &str,
    value: &Value,
) -> Result<Filter> {
    let Some(map) = as_map(value, &properties.name)? else {
        return Ok(Filter::default());
    };
    let mut filter = Filter::default();
    for (key, value) in map {
        let part = match key.as_str() {
            "AND" => logical(cx, value, BinaryOp::And, |cx, v| {
                edge_filter(cx, properties, var, v)
            })?,
            "OR" => logical(cx, value, BinaryOp::Or, |cx, v| edge_filter(cx, properties, var, v))?,
            "NOT" => negate(edge_filter(cx, properties, var, value)?),
            _ => match parse_key(&properties.fields, key) {
                Some(FilterKey::Field(field, operator)) => {
                    let primitive = primitive_of(&properties.name, field)?;
                    Filter::new(Some(comparison(
                        cx,
                        property(var, primitive),
                        &properties.name,
                        field,
                        &primitive.scalar,
                        operator,
                        value,
                    )?))
                }
                _ => {
                    return Err(TheseusError::validation(format!(
                        "Unknown filter {key} on {}Where",
                        properties.name
                    )))
                }
            },
        };
        filter = filter.and(part);
    }
    Ok(filter)
}

fn relationship_of(field: &Field) -> Result<&RelationshipField> {
    field
        .as_relationship()
        .ok_or_else(|| TheseusError::validation(format!("{} is not a relationship", field.name)))
}

fn primitive_of<'f>(owner: &str, field: &'f Field) -> Result<&'f PrimitiveField> {
    field.as_primitive().ok_or_else(|| {
        TheseusError::validation(format!("{owner}.{} cannot be filtered", field.name))
    })
}

fn field_filter(
    cx: &mut Context,
    node: &Node,
    var: &str,
    field: &Field,
    operator: Option<&str>,
    value: &Value,
) -> Result<Filter> {
    match &field.kind {
        FieldKind::Primitive(primitive) => Ok(Filter::new(Some(comparison(
            cx,
            property(var, primitive),
            &node.name,
            field,
            &primitive.scalar,
            operator,
            value,
        )?))),
        FieldKind::Relationship(rel) => relationship_filter(cx, var, field, rel, operator, value),
        FieldKind::Cypher(cypher) => {
            let Some(scalar) = &cypher.scalar else {
                return Err(TheseusError::validation(format!(
                    "{}.{} returns objects and cannot be filtered",
                    node.name, field.name
                )));
            };
            if cx.in_auth {
                return Err(TheseusError::validation(format!(
                    "{}.{} is a @cypher field and cannot be used in authorization rules",
                    node.name, field.name
                )));
            }
            let (subquery, result) =
                cypher_field::scalar_subquery(cx, var, &node.name, field, cypher, &Map::new())?;
            let predicate = comparison(
                cx,
                Expr::var(result),
                &node.name,
                field,
                scalar,
                operator,
                value,
            )?;
            Ok(Filter {
                predicate: Some(predicate),
                preconditions: vec![subquery],
            })
        }
        _ => Err(TheseusError::validation(format!(
            "{}.{} cannot be filtered",
            node.name, field.name
        ))),
    }
}

/// Comparison of a scalar value read from the graph against user input.
fn comparison(
    cx: &mut Context,
    target: Expr,
    owner: &str,
    field: &Field,
    scalar: &ScalarKind,
    operator: Option<&str>,
    value: &Value,
) -> Result<Expr> {
    let unsupported = || {
        TheseusError::validation(format!(
            "{}{} is not supported on {owner}.{} of type {}",
            field.name,
            operator.unwrap_or(""),
            field.name,
            field.type_ref.name
        ))
    };
    let is_list = field.type_ref.list;
    let operator = operator.unwrap_or("");

    if value.is_null() {
        return match operator {
            "" => Ok(Expr::is_null(target)),
            "_NOT" => Ok(Expr::is_not_null(target)),
            _ => Err(TheseusError::validation(format!(
                "{}{operator} does not accept null",
                field.name
            ))),
        };
    }

    let text_op = |op: BinaryOp| -> Result<BinaryOp> {
        if scalar.is_textual() && !is_list {
            Ok(op)
        } else {
            Err(unsupported())
        }
    };

    Ok(match operator {
        "" => {
            let param = cx.typed_param(scalar, value.clone());
            Expr::eq(target, param)
        }
        "_NOT" => {
            let param = cx.typed_param(scalar, value.clone());
            Expr::not(Expr::eq(target, param))
        }
        "_IN" | "_NOT_IN" => {
            if !value.is_array() || is_list {
                return Err(unsupported());
            }
            let param = cx.typed_param(scalar, value.clone());
            let predicate = Expr::in_list(target, param);
            if operator == "_IN" {
                predicate
            } else {
                Expr::not(predicate)
            }
        }
        "_INCLUDES" | "_NOT_INCLUDES" => {
            if !is_list {
                return Err(unsupported());
            }
            let param = cx.typed_param(scalar, value.clone());
            let predicate = Expr::in_list(param, target);
            if operator == "_INCLUDES" {
                predicate
            } else {
                Expr::not(predicate)
            }
        }
        "_CONTAINS" | "_STARTS_WITH" | "_ENDS_WITH" | "_MATCHES" => {
            let op = text_op(match operator {
                "_CONTAINS" => BinaryOp::Contains,
                "_STARTS_WITH" => BinaryOp::StartsWith,
                "_ENDS_WITH" => BinaryOp::EndsWith,
                _ => BinaryOp::RegexMatch,
            })?;
            let param = cx.param(value.clone());
            Expr::binary(op, target, param)
        }
        "_NOT_CONTAINS" | "_NOT_STARTS_WITH" | "_NOT_ENDS_WITH" => {
            let op = text_op(match operator {
                "_NOT_CONTAINS" => BinaryOp::Contains,
                "_NOT_STARTS_WITH" => BinaryOp::StartsWith,
                _ => BinaryOp::EndsWith,
            })?;
            let param = cx.param(value.clone());
            Expr::not(Expr::binary(op, target, param))
        }
        "_LT" | "_LTE" | "_GT" | "_GTE" | "_DISTANCE" if scalar.is_spatial() && !is_list => {
            let op = match operator {
                "_LT" => BinaryOp::Lt,
                "_LTE" => BinaryOp::Lte,
                "_GT" => BinaryOp::Gt,
                "_GTE" => BinaryOp::Gte,
                _ => BinaryOp::Eq,
            };
            if value.get("point").is_none() || value.get("distance").is_none() {
                return Err(TheseusError::validation(format!(
                    "{}{operator} expects {{ point, distance }}",
                    field.name
                )));
            }
            let param = cx.param(value.clone());
            let distance = Expr::call(
                "point.distance",
                vec![
                    target,
                    Expr::call("point", vec![param.clone().property("point")]),
                ],
            );
            Expr::binary(op, distance, param.property("distance"))
        }
        "_LT" | "_LTE" | "_GT" | "_GTE" => {
            if !scalar.is_orderable() || is_list {
                return Err(unsupported());
            }
            let op = match operator {
                "_LT" => BinaryOp::Lt,
                "_LTE" => BinaryOp::Lte,
                "_GT" => BinaryOp::Gt,
                _ => BinaryOp::Gte,
            };
            let param = cx.typed_param(scalar, value.clone());
            Expr::binary(op, target, param)
        }
        _ => return Err(unsupported()),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quantifier {
    Some,
    None,
    All,
    Single,
}

fn quantifier(operator: Option<&str>, field: &Field) -> Result<Quantifier> {
    Ok(match operator {
        None | Some("_SOME") => Quantifier::Some,
        Some("_NONE") | Some("_NOT") => Quantifier::None,
        Some("_ALL") => Quantifier::All,
        Some("_SINGLE") => Quantifier::Single,
        Some(other) => {
            return Err(TheseusError::validation(format!(
                "{other} is not supported on relationship {}",
                field.name
            )))
        }
    })
}

/// Concrete target types a relationship input applies to, each with the
/// input that applies to it. Union inputs are keyed by member type and only
/// the named members are considered.
pub(crate) fn targets<'s>(
    cx: &Context<'s>,
    rel: &RelationshipField,
    value: &Value,
) -> Result<Vec<(&'s Node, Value)>> {
    entity_targets(cx, &rel.target, rel.target_kind, value)
}

pub(crate) fn entity_targets<'s>(
    cx: &Context<'s>,
    target: &str,
    kind: TargetKind,
    value: &Value,
) -> Result<Vec<(&'s Node, Value)>> {
    match kind {
        TargetKind::Node => {
            let node = cx
                .schema
                .node(target)
                .ok_or_else(|| TheseusError::schema(format!("Unknown node type {target}")))?;
            Ok(vec![(node, value.clone())])
        }
        TargetKind::Interface => {
            if let Some(interface) = cx.schema.interfaces.get(target) {
                check_interface_where(interface, value)?;
            }
            Ok(cx
                .schema
                .concrete_nodes(target)
                .into_iter()
                .map(|node| (node, value.clone()))
                .collect())
        }
        TargetKind::Union => {
            let members = cx.schema.concrete_nodes(target);
            let Some(map) = value.as_object() else {
                return Ok(members.into_iter().map(|n| (n, Value::Null)).collect());
            };
            let mut out = Vec::new();
            for (type_name, sub) in map {
                let node = members
                    .iter()
                    .find(|n| &n.name == type_name)
                    .ok_or_else(|| {
                        TheseusError::validation(format!(
                            "{type_name} is not a member of {target}"
                        ))
                    })?;
                out.push((*node, sub.clone()));
            }
            Ok(out)
        }
    }
}

fn combine(quantifier: Quantifier, branches: Vec<Expr>) -> Option<Expr> {
    match quantifier {
        Quantifier::Some => Expr::or_all(branches),
        Quantifier::None | Quantifier::All => Expr::and_all(branches),
        Quantifier::Single => {
            let sum = branches
                .into_iter()
                .reduce(|acc, count| Expr::binary(BinaryOp::Add, acc, count))?;
            Some(Expr::eq(sum, Expr::int(1)))
        }
    }
}

fn quantified(
    quantifier: Quantifier,
    pattern: Pattern,
    inner: Filter,
    target_auth: Option<Expr>,
) -> Expr {
    match quantifier {
        Quantifier::Some => {
            Expr::exists(inner.and_predicate(target_auth).apply(MatchClause::new(pattern)))
        }
        Quantifier::None => Expr::not(Expr::exists(
            inner.and_predicate(target_auth).apply(MatchClause::new(pattern)),
        )),
        Quantifier::All => {
            let Filter {
                predicate,
                preconditions,
            } = inner;
            let Some(predicate) = predicate else {
                return Expr::bool(true);
            };
            let violated = Expr::not(Expr::call("coalesce", vec![predicate, Expr::bool(false)]));
            let filter = Filter {
                predicate: Expr::and_all(target_auth.into_iter().chain([violated])),
                preconditions,
            };
            Expr::not(Expr::exists(filter.apply(MatchClause::new(pattern))))
        }
        Quantifier::Single => Expr::CountSubquery {
            clauses: inner.and_predicate(target_auth).apply(MatchClause::new(pattern)),
        },
    }
}

fn target_read_filter(cx: &mut Context, node: &Node, var: &str) -> Result<Option<Expr>> {
    if cx.in_auth {
        return Ok(None);
    }
    auth::read_filter(cx, node, var)
}

fn relationship_filter(
    cx: &mut Context,
    source: &str,
    field: &Field,
    rel: &RelationshipField,
    operator: Option<&str>,
    value: &Value,
) -> Result<Filter> {
    if value.is_null() {
        let exists = existence(cx, source, rel)?;
        return match operator {
            None => Ok(Filter::new(Some(Expr::not(exists)))),
            Some("_NOT") => Ok(Filter::new(Some(exists))),
            Some(other) => Err(TheseusError::validation(format!(
                "{}{other} does not accept null",
                field.name
            ))),
        };
    }
    let quantifier = quantifier(operator, field)?;
    let mut branches = Vec::new();
    for (node, sub) in targets(cx, rel, value)? {
        let target = cx.node_var();
        let inner = node_filter(cx, node, &target, &sub)?;
        let auth = target_read_filter(cx, node, &target)?;
        let pattern = traversal(
            source,
            rel,
            None,
            NodePattern::labelled(&target, &node.labels),
            rel.read_direction(None),
        );
        branches.push(quantified(quantifier, pattern, inner, auth));
    }
    Ok(Filter::new(combine(quantifier, branches)))
}

/// Filter over one variable bound to any concrete type of an abstract
/// target: `(var:Impl AND <where> AND <read rules>)` per type, joined with OR.
pub(crate) fn abstract_target_filter(
    cx: &mut Context,
    rel: &RelationshipField,
    var: &str,
    value: &Value,
) -> Result<Filter> {
    let mut preconditions = Vec::new();
    let mut branches = Vec::new();
    for (node, sub) in targets(cx, rel, value)? {
        let label = Expr::HasLabel {
            expr: Box::new(Expr::var(var)),
            labels: vec![node.main_label().to_string()],
        };
        let inner = node_filter(cx, node, var, &sub)?;
        let read = target_read_filter(cx, node, var)?;
        preconditions.extend(inner.preconditions);
        branches.extend(Expr::and_all(
            std::iter::once(label).chain(inner.predicate).chain(read),
        ));
    }
    Ok(Filter {
        predicate: Some(Expr::or_all(branches).unwrap_or(Expr::bool(false))),
        preconditions,
    })
}

fn existence(cx: &mut Context, source: &str, rel: &RelationshipField) -> Result<Expr> {
    let mut branches = Vec::new();
    for node in cx.schema.concrete_nodes(&rel.target) {
        let pattern = traversal(
            source,
            rel,
            None,
            NodePattern {
                variable: None,
                labels: node.labels.clone(),
                properties: Vec::new(),
            },
            rel.read_direction(None),
        );
        branches.push(Expr::exists(vec![Clause::Match(MatchClause::new(pattern))]));
    }
    Ok(Expr::or_all(branches).unwrap_or(Expr::bool(false)))
}

/// `{ node, edge, AND, OR, NOT }` over a matched target and relationship.
pub(crate) fn connection_where(
    cx: &mut Context,
    node: &Node,
    node_var: &str,
    properties: Option<&RelationshipProperties>,
    rel_var: &str,
    value: &Value,
) -> Result<Filter> {
    let Some(map) = as_map(value, "Connection")? else {
        return Ok(Filter::default());
    };
    let mut filter = Filter::default();
    for (key, value) in map {
        let part = match key.as_str() {
            "AND" => logical(cx, value, BinaryOp::And, |cx, v| {
                connection_where(cx, node, node_var, properties, rel_var, v)
            })?,
            "OR" => logical(cx, value, BinaryOp::Or, |cx, v| {
                connection_where(cx, node, node_var, properties, rel_var, v)
            })?,
            "NOT" => negate(connection_where(
                cx, node, node_var, properties, rel_var, value,
            )?),
            "node" => node_filter(cx, node, node_var, value)?,
            "edge" => match properties {
                Some(properties) => edge_filter(cx, properties, rel_var, value)?,
                None => {
                    return Err(TheseusError::validation(
                        "edge filters require relationship properties",
                    ))
                }
            },
            other => {
                return Err(TheseusError::validation(format!(
                    "Unknown connection filter {other}"
                )))
            }
        };
        filter = filter.and(part);
    }
    Ok(filter)
}

fn connection_filter(
    cx: &mut Context,
    source: &str,
    field: &Field,
    rel: &RelationshipField,
    operator: Option<&str>,
    value: &Value,
) -> Result<Filter> {
    let quantifier = quantifier(operator, field)?;
    let properties = rel
        .properties
        .as_deref()
        .and_then(|name| cx.schema.relationship_properties(name));
    let mut branches = Vec::new();
    for (node, sub) in targets(cx, rel, value)? {
        let target = cx.node_var();
        let relationship = cx.node_var();
        let inner = connection_where(cx, node, &target, properties, &relationship, &sub)?;
        let auth = target_read_filter(cx, node, &target)?;
        let pattern = traversal(
            source,
            rel,
            Some(relationship),
            NodePattern::labelled(&target, &node.labels),
            rel.read_direction(None),
        );
        branches.push(quantified(quantifier, pattern, inner, auth));
    }
    Ok(Filter::new(combine(quantifier, branches)))
}

const AGGREGATIONS: [&str; 9] = [
    "_SHORTEST_LENGTH",
    "_LONGEST_LENGTH",
    "_AVERAGE_LENGTH",
    "_SHORTEST",
    "_LONGEST",
    "_AVERAGE",
    "_MIN",
    "_MAX",
    "_SUM",
];

const AGGREGATE_COMPARATORS: [(&str, BinaryOp); 5] = [
    ("_EQUAL", BinaryOp::Eq),
    ("_GTE", BinaryOp::Gte),
    ("_LTE", BinaryOp::Lte),
    ("_GT", BinaryOp::Gt),
    ("_LT", BinaryOp::Lt),
];

fn aggregate_filter(
    cx: &mut Context,
    source: &str,
    field: &Field,
    rel: &RelationshipField,
    value: &Value,
) -> Result<Filter> {
    if cx.in_auth {
        return Err(TheseusError::validation(format!(
            "Aggregation filter {} is not supported in authorization rules",
            rel.names.aggregate_field
        )));
    }
    let target = cx.node_var();
    let relationship = cx.node_var();
    let result = cx.value_var();

    let (labels, target_filter, target_fields) = match rel.target_kind {
        TargetKind::Node => {
            let node = cx.schema.node(&rel.target).ok_or_else(|| {
                TheseusError::schema(format!("Unknown node type {}", rel.target))
            })?;
            let auth_filter = target_read_filter(cx, node, &target)?;
            (node.labels.clone(), Filter::new(auth_filter), Some(&node.fields))
        }
        TargetKind::Interface | TargetKind::Union => {
            let filter = abstract_target_filter(cx, rel, &target, &Value::Null)?;
            let fields = cx.schema.interfaces.get(&rel.target).map(|i| &i.fields);
            (Vec::new(), filter, fields)
        }
    };
    let properties = rel
        .properties
        .as_deref()
        .and_then(|name| cx.schema.relationship_properties(name));

    let Some(predicate) = aggregate_predicate(
        cx,
        field,
        &target,
        target_fields,
        &relationship,
        properties.map(|p| &p.fields),
        value,
    )?
    else {
        return Ok(Filter::default());
    };

    let pattern = traversal(
        source,
        rel,
        Some(relationship),
        NodePattern::labelled(&target, &labels),
        rel.read_direction(None),
    );
    let mut clauses = vec![Clause::with_vars([source])];
    clauses.extend(target_filter.apply(MatchClause::new(pattern)));
    clauses.push(Clause::Return(ReturnClause::single(predicate, &result)));
    let subquery = Clause::Subquery(theseus_cypher::SubqueryClause::new(clauses));
    Ok(Filter {
        predicate: Some(Expr::eq(Expr::var(result), Expr::bool(true))),
        preconditions: vec![subquery],
    })
}

fn aggregate_predicate(
    cx: &mut Context,
    field: &Field,
    target: &str,
    target_fields: Option<&IndexMap<String, Field>>,
    relationship: &str,
    edge_fields: Option<&IndexMap<String, Field>>,
    value: &Value,
) -> Result<Option<Expr>> {
    let Some(map) = as_map(value, &field.name)? else {
        return Ok(None);
    };
    let mut predicates = Vec::new();
    for (key, value) in map {
        let predicate = match key.as_str() {
            "AND" | "OR" => {
                let items = value.as_array().cloned().unwrap_or_else(|| vec![value.clone()]);
                let mut parts = Vec::new();
                for item in &items {
                    parts.extend(aggregate_predicate(
                        cx,
                        field,
                        target,
                        target_fields,
                        relationship,
                        edge_fields,
                        item,
                    )?);
                }
                if key == "AND" {
                    Expr::and_all(parts)
                } else {
                    Expr::or_all(parts)
                }
            }
            "NOT" => aggregate_predicate(
                cx,
                field,
                target,
                target_fields,
                relationship,
                edge_fields,
                value,
            )?
            .map(Expr::not),
            "node" => {
                let fields = target_fields.ok_or_else(|| {
                    TheseusError::validation(format!(
                        "{} does not support node aggregation filters",
                        field.name
                    ))
                })?;
                aggregate_fields(cx, fields, target, value)?
            }
            "edge" => {
                let fields = edge_fields.ok_or_else(|| {
                    TheseusError::validation(format!(
                        "{} has no relationship properties",
                        field.name
                    ))
                })?;
                aggregate_fields(cx, fields, relationship, value)?
            }
            count => {
                let op = match count.strip_prefix("count") {
                    Some("") => BinaryOp::Eq,
                    Some("_LT") => BinaryOp::Lt,
                    Some("_LTE") => BinaryOp::Lte,
                    Some("_GT") => BinaryOp::Gt,
                    Some("_GTE") => BinaryOp::Gte,
                    _ => {
                        return Err(TheseusError::validation(format!(
                            "Unknown aggregation filter {count} on {}",
                            field.name
                        )))
                    }
                };
                let param = cx.param(value.clone());
                Some(Expr::binary(
                    op,
                    Expr::call("count", vec![Expr::var(target)]),
                    param,
                ))
            }
        };
        predicates.extend(predicate);
    }
    Ok(Expr::and_all(predicates))
}

fn aggregate_fields(
    cx: &mut Context,
    fields: &IndexMap<String, Field>,
    var: &str,
    value: &Value,
) -> Result<Option<Expr>> {
    let Some(map) = as_map(value, "Aggregation")? else {
        return Ok(None);
    };
    let mut predicates = Vec::new();
    for (key, value) in map {
        let predicate = match key.as_str() {
            "AND" | "OR" => {
                let items = value.as_array().cloned().unwrap_or_else(|| vec![value.clone()]);
                let mut parts = Vec::new();
                for item in &items {
                    parts.extend(aggregate_fields(cx, fields, var, item)?);
                }
                if key == "AND" {
                    Expr::and_all(parts)
                } else {
                    Expr::or_all(parts)
                }
            }
            "NOT" => aggregate_fields(cx, fields, var, value)?.map(Expr::not),
            _ => Some(aggregate_comparison(cx, fields, var, key, value)?),
        };
        predicates.extend(predicate);
    }
    Ok(Expr::and_all(predicates))
}

fn aggregate_comparison(
    cx: &mut Context,
    fields: &IndexMap<String, Field>,
    var: &str,
    key: &str,
    value: &Value,
) -> Result<Expr> {
    let unknown = || TheseusError::validation(format!("Unknown aggregation filter {key}"));
    let (rest, op) = AGGREGATE_COMPARATORS
        .iter()
        .find_map(|(suffix, op)| key.strip_suffix(suffix).map(|rest| (rest, *op)))
        .ok_or_else(unknown)?;
    let (name, aggregation) = AGGREGATIONS
        .iter()
        .find_map(|suffix| rest.strip_suffix(suffix).map(|name| (name, *suffix)))
        .ok_or_else(unknown)?;
    let field = fields.get(name).ok_or_else(unknown)?;
    let primitive = field.as_primitive().ok_or_else(unknown)?;
    let scalar = &primitive.scalar;
    let read = property(var, primitive);

    let invalid = || {
        TheseusError::validation(format!(
            "{aggregation} is not supported on {name} of type {}",
            field.type_ref.name
        ))
    };
    let aggregated = match aggregation {
        "_SHORTEST_LENGTH" | "_SHORTEST" | "_LONGEST_LENGTH" | "_LONGEST" | "_AVERAGE_LENGTH" => {
            if !scalar.is_textual() {
                return Err(invalid());
            }
            let function = match aggregation {
                "_SHORTEST_LENGTH" | "_SHORTEST" => "min",
                "_LONGEST_LENGTH" | "_LONGEST" => "max",
                _ => "avg",
            };
            Expr::call(function, vec![Expr::call("size", vec![read])])
        }
        "_AVERAGE" | "_SUM" => {
            if !scalar.is_numeric() && *scalar != ScalarKind::Duration {
                return Err(invalid());
            }
            let function = if aggregation == "_SUM" { "sum" } else { "avg" };
            Expr::call(function, vec![read])
        }
        _ => {
            if !scalar.is_orderable() {
                return Err(invalid());
            }
            let function = if aggregation == "_MIN" { "min" } else { "max" };
            Expr::call(function, vec![read])
        }
    };
    let param = if aggregation == "_MIN" || aggregation == "_MAX" {
        cx.typed_param(scalar, value.clone())
    } else {
        cx.param(value.clone())
    };
    Ok(Expr::binary(op, aggregated, param))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::AuthContext;
    use crate::config::Config;
    use crate::schema::{SchemaDocument, SchemaModel};
    use serde_json::json;
    use std::collections::BTreeMap;
    use theseus_cypher::render_clauses;

    fn schema() -> SchemaModel {
        let document: SchemaDocument = serde_json::from_value(json!({
            "nodes": [
                {
                    "name": "Movie",
                    "implements": ["Production"],
                    "fields": [
                        {"name": "title", "type": "String"},
                        {
                            "name": "actors",
                            "type": "Actor",
                            "list": true,
                            "relationship": {"type": "ACTED_IN", "direction": "IN", "properties": "ActedIn"}
                        }
                    ]
                },
                {
                    "name": "Series",
                    "plural": "series",
                    "implements": ["Production"],
                    "fields": [{"name": "title", "type": "String"}]
                },
                {
                    "name": "Actor",
                    "fields": [
                        {"name": "name", "type": "String"},
                        {
                            "name": "movies",
                            "type": "Production",
                            "list": true,
                            "relationship": {"type": "ACTED_IN", "direction": "OUT", "properties": "ActedIn"}
                        }
                    ]
                },
                {
                    "name": "Document",
                    "implements": ["Asset"],
                    "fields": [
                        {"name": "title", "type": "String"},
                        {"name": "owner", "type": "String"}
                    ],
                    "authorization": {"filter": [{"where": {"node": {"owner": "$jwt.sub"}}}]}
                },
                {
                    "name": "Image",
                    "implements": ["Asset"],
                    "fields": [{"name": "title", "type": "String"}]
                },
                {
                    "name": "Folder",
                    "fields": [
                        {
                            "name": "assets",
                            "type": "Asset",
                            "list": true,
                            "relationship": {"type": "CONTAINS", "direction": "OUT"}
                        }
                    ]
                }
            ],
            "interfaces": [
                {"name": "Production", "fields": [{"name": "title", "type": "String"}]},
                {"name": "Asset", "fields": [{"name": "title", "type": "String"}]}
            ],
            "relationshipProperties": [
                {"name": "ActedIn", "fields": [{"name": "screenTime", "type": "Int"}]}
            ]
        }))
        .unwrap();
        SchemaModel::build(&document, &Config::default()).unwrap()
    }

    struct Compiled {
        predicate: String,
        preconditions: String,
        params: BTreeMap<String, Value>,
    }

    fn compile(type_name: &str, auth: &AuthContext, value: Value) -> Compiled {
        let schema = schema();
        let config = Config::default();
        let mut cx = Context::new(&schema, &config, auth);
        let node = schema.node(type_name).unwrap();
        let filter = node_filter(&mut cx, node, "this", &value).unwrap();
        Compiled {
            predicate: filter.predicate.as_ref().map(ToString::to_string).unwrap_or_default(),
            preconditions: render_clauses(&filter.preconditions, 0),
            params: cx.env.params().clone(),
        }
    }

    fn compile_err(type_name: &str, value: Value) -> TheseusError {
        let schema = schema();
        let config = Config::default();
        let auth = AuthContext::anonymous();
        let mut cx = Context::new(&schema, &config, &auth);
        let node = schema.node(type_name).unwrap();
        node_filter(&mut cx, node, "this", &value).unwrap_err()
    }

    #[test]
    fn on_entries_override_shared_keys_per_implementation() {
        let compiled = compile(
            "Actor",
            &AuthContext::anonymous(),
            json!({"movies_SOME": {"title": "Shared", "_on": {"Series": {"title": "Pilot"}}}}),
        );
        let text = &compiled.predicate;
        assert!(
            text.contains("MATCH (this)-[:ACTED_IN]->(this0:Movie)\n    WHERE this0.title = $param0"),
            "{text}"
        );
        assert!(
            text.contains("MATCH (this)-[:ACTED_IN]->(this1:Series)\n    WHERE this1.title = $param1"),
            "{text}"
        );
        assert!(text.contains("} OR EXISTS {"), "{text}");
        assert_eq!(compiled.params["param0"], json!("Shared"));
        assert_eq!(compiled.params["param1"], json!("Pilot"));
    }

    #[test]
    fn on_entries_must_name_implementations() {
        let err = compile_err("Actor", json!({"movies_SOME": {"_on": {"Actor": {}}}}));
        assert_eq!(err.code(), "BAD_USER_INPUT");
    }

    #[test]
    fn all_requires_every_related_node_to_match() {
        let compiled = compile("Movie", &AuthContext::anonymous(), json!({"actors_ALL": {"name": "Ada"}}));
        assert_eq!(
            compiled.predicate,
            "NOT (EXISTS {\n    MATCH (this)<-[:ACTED_IN]-(this0:Actor)\n    WHERE NOT (coalesce(this0.name = $param0, false))\n})"
        );
    }

    #[test]
    fn all_without_a_condition_always_holds() {
        let compiled = compile("Movie", &AuthContext::anonymous(), json!({"actors_ALL": {}}));
        assert_eq!(compiled.predicate, "");
    }

    #[test]
    fn single_counts_exactly_one_match() {
        let compiled = compile("Movie", &AuthContext::anonymous(), json!({"actors_SINGLE": {"name": "Ada"}}));
        assert_eq!(
            compiled.predicate,
            "COUNT {\n    MATCH (this)<-[:ACTED_IN]-(this0:Actor)\n    WHERE this0.name = $param0\n} = 1"
        );
    }

    #[test]
    fn none_negates_existence() {
        let compiled = compile("Movie", &AuthContext::anonymous(), json!({"actors_NONE": {"name": "Ada"}}));
        assert_eq!(
            compiled.predicate,
            "NOT (EXISTS {\n    MATCH (this)<-[:ACTED_IN]-(this0:Actor)\n    WHERE this0.name = $param0\n})"
        );
    }

    #[test]
    fn single_over_an_interface_sums_the_branches() {
        let compiled = compile("Actor", &AuthContext::anonymous(), json!({"movies_SINGLE": {"title": "A"}}));
        let text = &compiled.predicate;
        assert!(text.starts_with("COUNT {"), "{text}");
        assert!(text.contains("} + COUNT {"), "{text}");
        assert!(text.ends_with("} = 1"), "{text}");
    }

    #[test]
    fn connection_filters_read_node_and_edge() {
        let compiled = compile(
            "Movie",
            &AuthContext::anonymous(),
            json!({"actorsConnection_SOME": {"node": {"name": "Ada"}, "edge": {"screenTime_GT": 5}}}),
        );
        assert_eq!(
            compiled.predicate,
            "EXISTS {\n    MATCH (this)<-[this1:ACTED_IN]-(this0:Actor)\n    WHERE this0.name = $param0 AND this1.screenTime > $param1\n}"
        );
        assert_eq!(compiled.params["param1"], json!(5));
    }

    #[test]
    fn connection_edge_filters_need_properties() {
        let err = compile_err("Folder", json!({"assetsConnection_SOME": {"edge": {"weight": 1}}}));
        assert_eq!(err.code(), "BAD_USER_INPUT");
    }

    #[test]
    fn aggregation_filters_count_and_edge_properties() {
        let compiled = compile(
            "Movie",
            &AuthContext::anonymous(),
            json!({"actorsAggregate": {"count_GT": 1, "edge": {"screenTime_SUM_GT": 10}}}),
        );
        assert_eq!(compiled.predicate, "var2 = true");
        assert_eq!(
            compiled.preconditions,
            "CALL {\n    WITH this\n    MATCH (this)<-[this1:ACTED_IN]-(this0:Actor)\n    RETURN count(this0) > $param0 AND sum(this1.screenTime) > $param1 AS var2\n}"
        );
        assert_eq!(compiled.params["param0"], json!(1));
        assert_eq!(compiled.params["param1"], json!(10));
    }

    #[test]
    fn aggregation_filters_over_interfaces_apply_target_read_rules() {
        let auth = AuthContext::with_jwt(json!({"sub": "u1"}));
        let compiled = compile("Folder", &auth, json!({"assetsAggregate": {"count": 2}}));
        let text = &compiled.preconditions;
        assert!(
            text.contains(
                "MATCH (this)-[this1:CONTAINS]->(this0)\n    WHERE (this0:Document AND this0.owner = $param0) OR this0:Image\n"
            ),
            "{text}"
        );
        assert!(text.contains("RETURN count(this0) = $param1 AS var2"), "{text}");
        assert_eq!(compiled.params["param0"], json!("u1"));
    }

    #[test]
    fn abstract_targets_keep_only_visible_branches() {
        let schema = schema();
        let config = Config::default();
        let auth = AuthContext::anonymous();
        let mut cx = Context::new(&schema, &config, &auth);
        let folder = schema.node("Folder").unwrap();
        let rel = folder.field("assets").and_then(Field::as_relationship).unwrap();
        let filter = abstract_target_filter(&mut cx, rel, "this0", &json!({"title": "Plan"})).unwrap();
        assert_eq!(
            filter.predicate.map(|p| p.to_string()).as_deref(),
            Some("this0:Image AND this0.title = $param1")
        );
        assert_eq!(cx.env.params()["param1"], json!("Plan"));
    }
}
