//! Relay style connections: `edges { node, properties, cursor }`, `pageInfo`
//! and `totalCount`.
//!
//! Matches are collected into a list first so `totalCount` sees the whole
//! match set; the window is then cut from the (sorted) list. Cursors encode
//! the position in that list and are produced while shaping the result.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use indexmap::IndexMap;
use serde_json::Value;
use theseus_cypher::{
    Clause, Expr, MatchClause, NodePattern, OrderItem, ProjectionItem, ReturnClause,
    SubqueryClause, UnwindClause, WithClause,
};

use super::context::Context;
use super::filter::{connection_where, targets, Filter};
use super::options::{order_by, sort_key, SortOrder};
use super::projection::{edge_projection, project_node, Extras};
use super::{auth, property, traversal};
use crate::config::Config;
use crate::operation::ResolveTree;
use crate::prelude::*;
use crate::schema::{Field, ListLimit, Node, RelationshipField, RelationshipProperties, TargetKind};

const CURSOR_PREFIX: &str = "arrayconnection:";

pub fn encode_cursor(index: u64) -> String {
    STANDARD.encode(format!("{CURSOR_PREFIX}{index}"))
}

pub fn decode_cursor(cursor: &str) -> Result<u64> {
    let invalid = || TheseusError::validation(format!("Invalid cursor {cursor}"));
    let bytes = STANDARD.decode(cursor).map_err(|_| invalid())?;
    let text = String::from_utf8(bytes).map_err(|_| invalid())?;
    text.strip_prefix(CURSOR_PREFIX)
        .and_then(|index| index.parse().ok())
        .ok_or_else(invalid)
}

/// Slice of the full match list a connection returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionWindow {
    pub offset: u64,
    pub limit: Option<u64>,
    /// Trailing slice taken when the end of the window is unknown.
    pub last: Option<u64>,
}

impl ConnectionWindow {
    pub fn from_args(tree: &ResolveTree, declared: ListLimit, config: &Config) -> Result<Self> {
        let count = |name: &str| -> Result<Option<u64>> {
            match tree.arg(name) {
                None => Ok(None),
                Some(value) => value.as_u64().map(Some).ok_or_else(|| {
                    TheseusError::validation(format!("{name} must be a non-negative integer"))
                }),
            }
        };
        let cursor = |name: &str| -> Result<Option<u64>> {
            match tree.arg(name) {
                None => Ok(None),
                Some(Value::String(cursor)) => decode_cursor(cursor).map(Some),
                Some(other) => Err(TheseusError::validation(format!(
                    "{name} must be a cursor, got {other}"
                ))),
            }
        };
        let after = cursor("after")?;
        let before = cursor("before")?;
        let last = count("last")?;
        let max = declared.max.or(config.cypher.max_limit);
        let first = match count("first")? {
            Some(first) => Some(max.map_or(first, |max| first.min(max))),
            None if last.is_none() => declared.default.or(max),
            None => None,
        };

        let mut start = match after {
            Some(after) => after.checked_add(1).ok_or_else(|| {
                TheseusError::validation(format!("Invalid cursor {after}: past the last position"))
            })?,
            None => 0,
        };
        let mut end = before;
        if let Some(first) = first {
            let bound = start.saturating_add(first);
            end = Some(end.map_or(bound, |end| end.min(bound)));
        }
        let mut trailing = None;
        match (last, end) {
            (Some(last), Some(bound)) => start = start.max(bound.saturating_sub(last)),
            // `page[-0..]` would be the whole page.
            (Some(0), None) => end = Some(start),
            (Some(last), None) => trailing = Some(last),
            (None, _) => {}
        }
        Ok(Self {
            offset: start,
            limit: end.map(|end| end.saturating_sub(start)),
            last: trailing,
        })
    }

    /// Position of the first returned edge in the full match list.
    pub fn start_index(&self, total: u64, returned: u64) -> u64 {
        match self.last {
            Some(_) => total.saturating_sub(returned).max(self.offset),
            None => self.offset,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortSide {
    Node,
    Edge,
}

fn parse_sort(value: Option<&Value>, nested: bool) -> Result<Vec<(SortSide, String, SortOrder)>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let entries: Vec<IndexMap<String, Value>> = serde_json::from_value(value.clone())
        .map_err(|err| TheseusError::validation(format!("Invalid sort: {err}")))?;
    let order = |value: &Value| -> Result<SortOrder> {
        serde_json::from_value(value.clone())
            .map_err(|err| TheseusError::validation(format!("Invalid sort direction: {err}")))
    };
    let mut out = Vec::new();
    for entry in entries {
        for (key, value) in entry {
            if !nested {
                out.push((SortSide::Node, key, order(&value)?));
                continue;
            }
            let side = match key.as_str() {
                "node" => SortSide::Node,
                "edge" => SortSide::Edge,
                other => {
                    return Err(TheseusError::validation(format!(
                        "Unknown connection sort key {other}"
                    )))
                }
            };
            let fields: IndexMap<String, Value> = serde_json::from_value(value)
                .map_err(|err| TheseusError::validation(format!("Invalid sort: {err}")))?;
            for (field, direction) in fields {
                out.push((side, field, order(&direction)?));
            }
        }
    }
    Ok(out)
}

/// Clauses binding one concrete node type (and the relationship, when
/// traversing one) filtered by the connection's `where`.
pub(crate) struct EdgeSource<'s> {
    pub node: &'s Node,
    pub clauses: Vec<Clause>,
    pub node_var: String,
    pub rel_var: Option<String>,
}

/// Compiles the part shared by nested and root connections. The returned
/// clauses end with `RETURN { edges, totalCount } AS <result>`.
pub(crate) fn connection_clauses(
    cx: &mut Context,
    mut sources: Vec<EdgeSource>,
    properties: Option<&RelationshipProperties>,
    polymorphic: bool,
    tree: &ResolveTree,
    nested: bool,
    result: &str,
) -> Result<Vec<Clause>> {
    if sources.is_empty() {
        return Ok(vec![Clause::Return(ReturnClause::single(
            Expr::map(vec![
                ("edges".to_string(), Expr::list(Vec::new())),
                ("totalCount".to_string(), Expr::int(0)),
            ]),
            result,
        ))]);
    }
    let declared = match (polymorphic, sources.first()) {
        (false, Some(source)) => source.node.limit,
        _ => ListLimit::default(),
    };
    let window = ConnectionWindow::from_args(tree, declared, cx.config)?;
    let sort = parse_sort(tree.arg("sort"), nested)?;
    let edges_tree = tree.field("edges");
    let node_tree = edges_tree.and_then(|edges| edges.field("node"));
    let properties_tree = edges_tree.and_then(|edges| edges.field("properties"));

    let edges = cx.value_var();
    let total = cx.value_var();
    let page = cx.value_var();
    let edge = cx.value_var();
    let node_var = cx.node_var();
    let rel_var = cx.node_var();

    let mut clauses = Vec::new();
    let mut order_items = Vec::new();
    let node_projection;

    if polymorphic || sources.len() != 1 {
        let node_sort: Vec<&str> = sort
            .iter()
            .filter(|(side, _, _)| *side == SortSide::Node)
            .map(|(_, name, _)| name.as_str())
            .collect();
        let mut branches = Vec::new();
        for source in sources {
            let mut branch = source.clauses;
            let projected = match node_tree {
                Some(node_tree) => {
                    let extras = Extras {
                        typename: true,
                        sort: &node_sort,
                    };
                    let projection =
                        project_node(cx, source.node, &source.node_var, node_tree, extras)?;
                    branch.extend(projection.into_clauses(&source.node_var));
                    Expr::var(&source.node_var)
                }
                None => Expr::map(vec![(
                    "__typename".to_string(),
                    Expr::string(&source.node.name),
                )]),
            };
            let mut entries = vec![("node".to_string(), projected)];
            if let Some(rel) = &source.rel_var {
                entries.push(("relationship".to_string(), Expr::var(rel)));
            }
            branch.push(Clause::Return(ReturnClause::single(Expr::map(entries), &edge)));
            branches.push(branch);
        }
        clauses.push(Clause::Subquery(SubqueryClause::union(branches)));
        clauses.push(Clause::With(WithClause::new(vec![ProjectionItem::aliased(
            Expr::call("collect", vec![Expr::var(&edge)]),
            &edges,
        )])));
        for (side, name, order) in &sort {
            let expr = match side {
                SortSide::Node => Expr::var(&node_var).property(sort_key(name)),
                SortSide::Edge => edge_sort(properties, &rel_var, name)?,
            };
            order_items.push(OrderItem {
                expr,
                direction: order.direction(),
            });
        }
        node_projection = Vec::new();
    } else {
        let Some(source) = sources.pop() else {
            return Err(TheseusError::validation("connection has no target type"));
        };
        clauses.extend(source.clauses);
        let mut entries = vec![("node".to_string(), Expr::var(&source.node_var))];
        if let Some(rel) = &source.rel_var {
            entries.push(("relationship".to_string(), Expr::var(rel)));
        }
        clauses.push(Clause::With(WithClause::new(vec![ProjectionItem::aliased(
            Expr::call("collect", vec![Expr::map(entries)]),
            &edges,
        )])));
        for (side, name, order) in &sort {
            let expr = match side {
                SortSide::Node => {
                    let primitive = source
                        .node
                        .field(name)
                        .and_then(Field::as_primitive)
                        .ok_or_else(|| {
                            TheseusError::validation(format!(
                                "Cannot sort {} by {name}",
                                source.node.name
                            ))
                        })?;
                    property(&node_var, primitive)
                }
                SortSide::Edge => edge_sort(properties, &rel_var, name)?,
            };
            order_items.push(OrderItem {
                expr,
                direction: order.direction(),
            });
        }
        node_projection = match node_tree {
            Some(node_tree) => {
                project_node(cx, source.node, &node_var, node_tree, Extras::default())?
                    .into_clauses(&node_var)
            }
            None => Vec::new(),
        };
    }

    clauses.push(Clause::With(WithClause::new(vec![
        ProjectionItem::new(Expr::var(&edges)),
        ProjectionItem::aliased(Expr::call("size", vec![Expr::var(&edges)]), &total),
    ])));

    let skip = (window.offset > 0).then(|| cx.param(Value::from(window.offset)));
    let limit = window.limit.map(|limit| cx.param(Value::from(limit)));

    let mut page_clauses = vec![
        Clause::with_vars([edges.as_str()]),
        Clause::Unwind(UnwindClause {
            expression: Expr::var(&edges),
            variable: edge.clone(),
        }),
        Clause::With(WithClause::new(vec![
            ProjectionItem::aliased(Expr::var(&edge).property("node"), &node_var),
            ProjectionItem::aliased(Expr::var(&edge).property("relationship"), &rel_var),
        ])),
    ];
    if !order_items.is_empty() || skip.is_some() || limit.is_some() {
        page_clauses.push(Clause::With(WithClause {
            order: order_by(order_items),
            skip,
            limit,
            ..WithClause::star()
        }));
    }
    page_clauses.extend(node_projection);

    let mut edge_entries = vec![("node".to_string(), Expr::var(&node_var))];
    if let (Some(properties), Some(properties_tree)) = (properties, properties_tree) {
        edge_entries.push((
            "properties".to_string(),
            edge_projection(&rel_var, properties, properties_tree),
        ));
    }
    page_clauses.push(Clause::Return(ReturnClause::single(
        Expr::call("collect", vec![Expr::map(edge_entries)]),
        &page,
    )));
    clauses.push(Clause::Subquery(SubqueryClause::new(page_clauses)));

    if let Some(last) = window.last {
        let last = cx.param(Value::from(last));
        clauses.push(Clause::With(WithClause::new(vec![
            ProjectionItem::new(Expr::var(&total)),
            ProjectionItem::aliased(
                Expr::ListSlice {
                    expr: Box::new(Expr::var(&page)),
                    start: Some(Box::new(Expr::UnaryOp {
                        op: theseus_cypher::UnaryOp::Neg,
                        expr: Box::new(last),
                    })),
                    end: None,
                },
                &page,
            ),
        ])));
    }
    clauses.push(Clause::Return(ReturnClause::single(
        Expr::map(vec![
            ("edges".to_string(), Expr::var(&page)),
            ("totalCount".to_string(), Expr::var(&total)),
        ]),
        result,
    )));
    Ok(clauses)
}

fn edge_sort(
    properties: Option<&RelationshipProperties>,
    rel_var: &str,
    name: &str,
) -> Result<Expr> {
    properties
        .and_then(|p| p.fields.get(name))
        .and_then(Field::as_primitive)
        .map(|primitive| property(rel_var, primitive))
        .ok_or_else(|| TheseusError::validation(format!("Cannot sort edges by {name}")))
}

/// `CALL { ... }` returning `{ edges, totalCount }` for a nested connection
/// field.
pub(crate) fn connection_subquery(
    cx: &mut Context,
    source: &str,
    rel: &RelationshipField,
    tree: &ResolveTree,
) -> Result<(Clause, String)> {
    let result = cx.value_var();
    let direction = rel.read_direction(tree.arg("directed").and_then(Value::as_bool));
    let where_value = tree.arg("where").cloned().unwrap_or(Value::Null);
    let properties = rel
        .properties
        .as_deref()
        .and_then(|name| cx.schema.relationship_properties(name));

    let mut sources = Vec::new();
    for (node, branch_where) in targets(cx, rel, &where_value)? {
        let node_var = cx.node_var();
        let rel_var = cx.node_var();
        let filter = connection_where(cx, node, &node_var, properties, &rel_var, &branch_where)?;
        let read = auth::read_filter(cx, node, &node_var)?;
        let pattern = traversal(
            source,
            rel,
            Some(rel_var.clone()),
            NodePattern::labelled(&node_var, &node.labels),
            direction,
        );
        let mut clauses = vec![Clause::with_vars([source])];
        clauses.extend(Filter::and_predicate(filter, read).apply(MatchClause::new(pattern)));
        sources.push(EdgeSource {
            node,
            clauses,
            node_var,
            rel_var: Some(rel_var),
        });
    }
    let polymorphic = rel.target_kind != TargetKind::Node;
    let mut clauses = vec![];
    if polymorphic {
        clauses.push(Clause::with_vars([source]));
    }
    clauses.extend(connection_clauses(
        cx, sources, properties, polymorphic, tree, true, &result,
    )?);
    Ok((Clause::Subquery(SubqueryClause::new(clauses)), result))
}
