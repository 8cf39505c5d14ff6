use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use theseus_cypher::{Clause, Expr, OrderBy, OrderItem, SortDirection, WithClause};

use super::context::Context;
use super::{cypher_field, property};
use crate::config::Config;
use crate::prelude::*;
use crate::schema::{FieldKind, ListLimit, Node};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub(crate) enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn direction(self) -> SortDirection {
        match self {
            SortOrder::Asc => SortDirection::Asc,
            SortOrder::Desc => SortDirection::Desc,
        }
    }
}

/// `options` argument of list fields.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct ListOptions {
    pub sort: Vec<IndexMap<String, SortOrder>>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub distinct: bool,
}

impl ListOptions {
    /// Caller options replace the declared defaults as a whole.
    pub fn resolve(caller: Option<&Value>, declared: Option<&Value>) -> Result<Self> {
        match caller.or(declared) {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|err| TheseusError::validation(format!("Invalid options: {err}"))),
        }
    }

    /// Sort keys in the order they were given.
    pub fn sort_keys(&self) -> Vec<(&str, SortOrder)> {
        self.sort
            .iter()
            .flat_map(|entry| entry.iter().map(|(key, order)| (key.as_str(), *order)))
            .collect()
    }

    /// Requested limit bounded by the type's `@limit` or the configured cap.
    pub fn effective_limit(&self, declared: ListLimit, config: &Config) -> Option<u64> {
        let max = declared.max.or(config.cypher.max_limit);
        let requested = self.limit.or(declared.default).or(max);
        match (requested, max) {
            (Some(requested), Some(max)) => Some(requested.min(max)),
            (requested, _) => requested,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sort.is_empty() && self.limit.is_none() && self.offset.is_none() && !self.distinct
    }
}

/// Key under which a sort value is carried in a projected map.
pub(crate) fn sort_key(field: &str) -> String {
    format!("__sort_{field}")
}

fn skip_limit(
    cx: &mut Context,
    offset: Option<u64>,
    limit: Option<u64>,
) -> (Option<Expr>, Option<Expr>) {
    let skip = offset
        .filter(|offset| *offset > 0)
        .map(|offset| cx.param(Value::from(offset)));
    let limit = limit.map(|limit| cx.param(Value::from(limit)));
    (skip, limit)
}

/// Sorts and slices rows on the node variable, before projection.
pub(crate) fn page_node(
    cx: &mut Context,
    node: &Node,
    var: &str,
    options: &ListOptions,
    limit: Option<u64>,
) -> Result<Vec<Clause>> {
    let mut clauses = Vec::new();
    let mut items = Vec::new();
    for (name, order) in options.sort_keys() {
        let field = node.field(name).ok_or_else(|| {
            TheseusError::validation(format!("Cannot sort {} by unknown field {name}", node.name))
        })?;
        let expr = match &field.kind {
            FieldKind::Primitive(primitive) => property(var, primitive),
            FieldKind::Cypher(cypher) if cypher.scalar.is_some() => {
                let (subquery, result) =
                    cypher_field::scalar_subquery(cx, var, &node.name, field, cypher, &Map::new())?;
                clauses.push(subquery);
                Expr::var(result)
            }
            _ => {
                return Err(TheseusError::validation(format!(
                    "Cannot sort {} by {name}",
                    node.name
                )))
            }
        };
        items.push(OrderItem {
            expr,
            direction: order.direction(),
        });
    }
    let (skip, limit) = skip_limit(cx, options.offset, limit);
    if items.is_empty() && skip.is_none() && limit.is_none() {
        return Ok(clauses);
    }
    clauses.push(Clause::With(WithClause {
        order: order_by(items),
        skip,
        limit,
        ..WithClause::star()
    }));
    Ok(clauses)
}

/// Sorts, deduplicates and slices rows of an already projected map.
/// Sort values are read from the `__sort_<field>` keys the projection adds.
pub(crate) fn page_projection(
    cx: &mut Context,
    var: &str,
    options: &ListOptions,
    limit: Option<u64>,
) -> Option<Clause> {
    let items: Vec<OrderItem> = options
        .sort_keys()
        .into_iter()
        .map(|(name, order)| OrderItem {
            expr: Expr::var(var).property(sort_key(name)),
            direction: order.direction(),
        })
        .collect();
    let (skip, limit) = skip_limit(cx, options.offset, limit);
    if items.is_empty() && skip.is_none() && limit.is_none() && !options.distinct {
        return None;
    }
    Some(Clause::With(WithClause {
        distinct: options.distinct,
        order: order_by(items),
        skip,
        limit,
        ..WithClause::new(vec![theseus_cypher::ProjectionItem::new(Expr::var(var))])
    }))
}

pub(crate) fn order_by(items: Vec<OrderItem>) -> Option<OrderBy> {
    if items.is_empty() {
        None
    } else {
        Some(OrderBy { items })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn caller_options_replace_declared_defaults() {
        let declared = json!({"limit": 5, "sort": [{"title": "ASC"}]});
        let options = ListOptions::resolve(Some(&json!({"offset": 2})), Some(&declared)).unwrap();
        assert_eq!(options.offset, Some(2));
        assert_eq!(options.limit, None);
        assert!(options.sort.is_empty());

        let options = ListOptions::resolve(None, Some(&declared)).unwrap();
        assert_eq!(options.limit, Some(5));
        assert_eq!(options.sort_keys(), vec![("title", SortOrder::Asc)]);
    }

    #[test]
    fn rejects_unknown_option_keys() {
        let err = ListOptions::resolve(Some(&json!({"first": 1})), None).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Validation(_)));
    }

    #[test]
    fn limits_are_capped() {
        let config = Config::default();
        let declared = ListLimit {
            default: Some(10),
            max: Some(20),
        };
        let caller = ListOptions {
            limit: Some(50),
            ..Default::default()
        };
        assert_eq!(caller.effective_limit(declared, &config), Some(20));
        assert_eq!(
            ListOptions::default().effective_limit(declared, &config),
            Some(10)
        );
        assert_eq!(
            ListOptions::default().effective_limit(ListLimit::default(), &config),
            None
        );
    }
}
