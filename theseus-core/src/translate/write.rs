//! Pieces shared by the mutation compilers.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use strum_macros::{Display, EnumString};
use theseus_cypher::{
    BinaryOp, Clause, Expr, MatchClause, NodePattern, ReturnClause, SetItem, SubqueryClause,
    WithClause,
};

use super::context::Context;
use super::{connect, create, delete, traversal, update};
use crate::errors::RELATIONSHIP_REQUIRED;
use crate::prelude::*;
use crate::schema::{
    Cardinality, Field, FieldKind, Node, RelationshipField, ScalarKind, TargetKind,
    TimestampOperation,
};

/// Nested operation on a relationship field, named as in the input types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "camelCase")]
pub(crate) enum NestedOp {
    Create,
    Connect,
    ConnectOrCreate,
    Disconnect,
    Update,
    Delete,
}

/// A list input, or a single object treated as a list of one.
pub(crate) fn elements_of(value: &Value) -> Vec<&Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().filter(|item| !item.is_null()).collect(),
        other => vec![other],
    }
}

pub(crate) fn input_map<'v>(value: &'v Value, input_type: &str) -> Result<&'v Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| TheseusError::validation(format!("{input_type} expects an object")))
}

pub(crate) fn relationship_field<'n>(
    node: &'n Node,
    name: &str,
) -> Result<(&'n Field, &'n RelationshipField)> {
    node.field(name)
        .and_then(|field| field.as_relationship().map(|rel| (field, rel)))
        .ok_or_else(|| {
            TheseusError::validation(format!("{} has no relationship field {name}", node.name))
        })
}

/// Splits relationship input by union member; other targets pass through.
pub(crate) fn by_member<'s, 'v>(
    cx: &Context<'s>,
    rel: &RelationshipField,
    value: &'v Value,
) -> Result<Vec<(Option<&'s Node>, &'v Value)>> {
    if rel.target_kind != TargetKind::Union {
        return Ok(vec![(None, value)]);
    }
    let members = cx.schema.concrete_nodes(&rel.target);
    let mut out = Vec::new();
    for (type_name, sub) in input_map(value, &rel.target)? {
        let node = members
            .iter()
            .find(|node| &node.name == type_name)
            .ok_or_else(|| {
                TheseusError::validation(format!("{type_name} is not a member of {}", rel.target))
            })?;
        out.push((Some(*node), sub));
    }
    Ok(out)
}

/// Element inputs paired with the concrete type each applies to. Interface
/// elements apply to every implementation.
pub(crate) fn elements<'s>(
    cx: &Context<'s>,
    rel: &RelationshipField,
    member: Option<&'s Node>,
    value: &Value,
) -> Result<Vec<(&'s Node, Value)>> {
    let targets = match member {
        Some(node) => vec![node],
        None if rel.target_kind == TargetKind::Union => {
            return Err(TheseusError::validation(format!(
                "Input for {} must be keyed by member type",
                rel.target
            )))
        }
        None => cx.schema.concrete_nodes(&rel.target),
    };
    let mut out = Vec::new();
    for element in elements_of(value) {
        for target in &targets {
            out.push((*target, element.clone()));
        }
    }
    Ok(out)
}

/// Compiles one element of a nested operation on `parent.field`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn apply(
    cx: &mut Context,
    op: NestedOp,
    parent: &Node,
    parent_var: &str,
    field: &Field,
    rel: &RelationshipField,
    target: &Node,
    element: &Value,
) -> Result<Vec<Clause>> {
    let edge = Edge {
        parent,
        parent_var,
        field,
        rel,
        target,
    };
    match op {
        NestedOp::Create => create::nested_create(cx, &edge, element),
        NestedOp::Connect => connect::connect(cx, &edge, element),
        NestedOp::ConnectOrCreate => connect::connect_or_create(cx, &edge, element),
        NestedOp::Disconnect => connect::disconnect(cx, &edge, element),
        NestedOp::Update => update::nested_update(cx, &edge, element),
        NestedOp::Delete => delete::nested_delete(cx, &edge, element),
    }
}

/// Runs one operation for every relationship field named in `input`, the
/// shape of the top-level `connect`, `disconnect`, `create`, `delete` and
/// `connectOrCreate` arguments and of nested `connect` / `disconnect` /
/// `delete` inputs.
pub(crate) fn keyed(
    cx: &mut Context,
    op: NestedOp,
    node: &Node,
    var: &str,
    input: &Value,
) -> Result<Vec<Clause>> {
    let mut clauses = Vec::new();
    if input.is_null() {
        return Ok(clauses);
    }
    for (name, value) in input_map(input, &format!("{op} input of {}", node.name))? {
        let (field, rel) = relationship_field(node, name)?;
        for (member, value) in by_member(cx, rel, value)? {
            for (target, element) in elements(cx, rel, member, value)? {
                clauses.extend(apply(cx, op, node, var, field, rel, target, &element)?);
            }
        }
    }
    Ok(clauses)
}

/// One parent-to-target relationship being written.
pub(crate) struct Edge<'e> {
    pub parent: &'e Node,
    pub parent_var: &'e str,
    pub field: &'e Field,
    pub rel: &'e RelationshipField,
    pub target: &'e Node,
}

impl Edge<'_> {
    /// `(parent)-[rel_var:TYPE]->(target_var:Label)` in the declared direction.
    pub fn pattern(&self, rel_var: Option<String>, target_var: &str) -> theseus_cypher::Pattern {
        traversal(
            self.parent_var,
            self.rel,
            rel_var,
            NodePattern::labelled(target_var, &self.target.labels),
            self.rel.direction,
        )
    }

    /// Same traversal with both ends already bound, for creating the
    /// relationship.
    pub fn link(&self, rel_var: Option<String>, target_var: &str) -> theseus_cypher::Pattern {
        traversal(
            self.parent_var,
            self.rel,
            rel_var,
            NodePattern::named(target_var),
            self.rel.direction,
        )
    }

    pub fn properties<'s>(&self, cx: &Context<'s>) -> Option<&'s crate::schema::RelationshipProperties> {
        self.rel
            .properties
            .as_deref()
            .and_then(|name| cx.schema.relationship_properties(name))
    }
}

/// `WITH *` then `CALL { WITH <imports> <body> RETURN count(*) AS varN }`,
/// keeping the outer row count unchanged.
pub(crate) fn scoped(cx: &mut Context, imports: &[&str], body: Vec<Clause>) -> Vec<Clause> {
    let result = cx.value_var();
    let mut clauses = vec![Clause::with_vars(imports.iter().copied())];
    clauses.extend(body);
    clauses.push(Clause::Return(ReturnClause::single(Expr::CountStar, result)));
    vec![
        Clause::with_star(),
        Clause::Subquery(SubqueryClause::new(clauses)),
    ]
}

/// Current value written for a timestamp field.
fn timestamp(cx: &Context, scalar: &ScalarKind) -> Expr {
    match scalar.cast_function() {
        Some(function) if *scalar != ScalarKind::DateTime => Expr::call(function, vec![]),
        _ => cx.now(),
    }
}

/// `SET` items for a new node or relationship: the given values plus
/// generated ids, defaults and creation timestamps.
pub(crate) fn create_properties(
    cx: &mut Context,
    owner: &str,
    fields: &IndexMap<String, Field>,
    var: &str,
    input: &Map<String, Value>,
) -> Result<Vec<SetItem>> {
    let mut items = Vec::new();
    for (name, value) in input {
        let field = fields
            .get(name)
            .ok_or_else(|| TheseusError::validation(format!("Unknown field {owner}.{name}")))?;
        match &field.kind {
            FieldKind::Primitive(primitive) => {
                if primitive.is_generated() {
                    return Err(TheseusError::validation(format!(
                        "{owner}.{name} is generated and cannot be set"
                    )));
                }
                if value.is_null() {
                    continue;
                }
                let value = cx.typed_param(&primitive.scalar, value.clone());
                items.push(SetItem::new(
                    Expr::var(var).property(&primitive.db_property),
                    value,
                ));
            }
            FieldKind::Relationship(_) => {}
            _ => {
                return Err(TheseusError::validation(format!(
                    "{owner}.{name} cannot be written"
                )))
            }
        }
    }
    for field in fields.values() {
        let Some(primitive) = field.as_primitive() else {
            continue;
        };
        if input.get(&field.name).is_some_and(|value| !value.is_null()) {
            continue;
        }
        let value = if primitive.autogenerate {
            Some(cx.uuid())
        } else if primitive.timestamps.contains(&TimestampOperation::Create) {
            Some(timestamp(cx, &primitive.scalar))
        } else {
            match &primitive.default {
                Some(default) => Some(cx.typed_param(&primitive.scalar, default.clone())),
                None => None,
            }
        };
        if let Some(value) = value {
            items.push(SetItem::new(
                Expr::var(var).property(&primitive.db_property),
                value,
            ));
        }
    }
    Ok(items)
}

/// `SET` items refreshing update timestamps.
pub(crate) fn update_timestamps(
    cx: &Context,
    fields: &IndexMap<String, Field>,
    var: &str,
) -> Vec<SetItem> {
    fields
        .values()
        .filter_map(Field::as_primitive)
        .filter(|primitive| primitive.timestamps.contains(&TimestampOperation::Update))
        .map(|primitive| {
            SetItem::new(
                Expr::var(var).property(&primitive.db_property),
                timestamp(cx, &primitive.scalar),
            )
        })
        .collect()
}

/// Aborts unless every required or single relationship of the node written
/// to `var` is related the allowed number of times. `only_type` restricts the
/// checks to relationships of one type.
pub(crate) fn cardinality_checks(
    cx: &mut Context,
    node: &Node,
    var: &str,
    only_type: Option<&str>,
) -> Vec<Clause> {
    let mut clauses = Vec::new();
    for field in node.fields.values() {
        let Some(rel) = field.as_relationship() else {
            continue;
        };
        if only_type.is_some_and(|rel_type| rel_type != rel.rel_type) {
            continue;
        }
        if rel.cardinality == Cardinality::List {
            continue;
        }
        let count = cx.value_var();
        let (allowed, message) = match rel.cardinality {
            Cardinality::List => continue,
            Cardinality::Required => (
                Expr::eq(Expr::var(&count), Expr::int(1)),
                format!(
                    "{RELATIONSHIP_REQUIRED}: {}.{} required exactly once",
                    node.name, field.name
                ),
            ),
            Cardinality::Single => (
                Expr::binary(BinaryOp::Lte, Expr::var(&count), Expr::int(1)),
                format!(
                    "{RELATIONSHIP_REQUIRED}: {}.{} must not be related more than once",
                    node.name, field.name
                ),
            ),
        };
        let labels = match rel.target_kind {
            TargetKind::Node => cx
                .schema
                .node(&rel.target)
                .map(|target| target.labels.clone())
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        let relationship = cx.node_var();
        let pattern = traversal(
            var,
            rel,
            Some(relationship.clone()),
            NodePattern {
                labels,
                ..NodePattern::default()
            },
            rel.direction,
        );
        let body = vec![
            Clause::with_vars([var]),
            Clause::Match(MatchClause::new(pattern)),
            Clause::With(WithClause::new(vec![theseus_cypher::ProjectionItem::aliased(
                Expr::call("count", vec![Expr::var(&relationship)]),
                &count,
            )])),
            cx.validate(Expr::not(allowed), &message),
            Clause::Return(ReturnClause::single(Expr::var(&count), &count)),
        ];
        clauses.push(Clause::with_star());
        clauses.push(Clause::Subquery(SubqueryClause::new(body)));
    }
    clauses
}
