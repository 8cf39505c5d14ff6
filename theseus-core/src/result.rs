//! Turns the rows of a compiled statement into the GraphQL value of its root
//! field: cursors and page info for connections, concrete types for abstract
//! values, external field resolvers, and removal of helper keys.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::claims::AuthContext;
use crate::config::Config;
use crate::operation::ResolveTree;
use crate::prelude::*;
use crate::schema::{Entity, FieldKind, ListLimit, Node, SchemaModel};
use crate::translate::{encode_cursor, ConnectionWindow, ResultShape};

const TYPENAME: &str = "__typename";
const SORT_PREFIX: &str = "__sort_";

/// Resolver for one `Type.field`, called with the projected parent object.
pub type FieldResolver =
    Arc<dyn Fn(&Map<String, Value>, &ResolveTree, &AuthContext) -> Result<Value> + Send + Sync>;

pub type FieldResolvers = HashMap<String, FieldResolver>;

pub struct Shaper<'a> {
    pub schema: &'a SchemaModel,
    pub config: &'a Config,
    pub auth: &'a AuthContext,
    pub resolvers: &'a FieldResolvers,
}

/// Connection type names used for `__typename`.
struct ConnectionNames<'n> {
    connection: &'n str,
    edge: &'n str,
}

fn column(rows: Vec<Value>, name: &str) -> Vec<Value> {
    rows.into_iter()
        .map(|mut row| row.get_mut(name).map(Value::take).unwrap_or(Value::Null))
        .collect()
}

fn first(values: Vec<Value>) -> Value {
    values.into_iter().next().unwrap_or(Value::Null)
}

impl Shaper<'_> {
    pub fn shape(&self, shape: &ResultShape, tree: &ResolveTree, rows: Vec<Value>) -> Result<Value> {
        match shape {
            ResultShape::Read { type_name } => {
                let objects = column(rows, "this")
                    .into_iter()
                    .map(|value| self.entity_value(type_name, value, tree))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Array(objects))
            }
            ResultShape::Connection { type_name } => {
                let entity = self.entity(type_name)?;
                let names = ConnectionNames {
                    connection: &entity.names().connection_type,
                    edge: &entity.names().edge_type,
                };
                let value = first(column(rows, "this"));
                self.connection(type_name, &names, value, tree)
            }
            ResultShape::Aggregate { type_name } => {
                let mut value = first(column(rows, "this"));
                if let (Some(map), Some(key)) = (value.as_object_mut(), typename_key(tree)) {
                    let entity = self.entity(type_name)?;
                    map.insert(key, Value::String(entity.names().aggregate_selection.clone()));
                }
                Ok(value)
            }
            ResultShape::Cypher {
                type_name,
                list,
                scalar,
            } => {
                let mut values = column(rows, "this");
                if !scalar {
                    values = values
                        .into_iter()
                        .map(|value| self.entity_value(type_name, value, tree))
                        .collect::<Result<Vec<_>>>()?;
                }
                Ok(if *list {
                    Value::Array(values)
                } else {
                    first(values)
                })
            }
            ResultShape::Create { type_name } | ResultShape::Update { type_name } => {
                let node = self
                    .schema
                    .node(type_name)
                    .ok_or_else(|| TheseusError::schema(format!("Unknown node type {type_name}")))?;
                let data = first(column(rows, "data"));
                let response_type = match shape {
                    ResultShape::Create { .. } => &node.names.create_response,
                    _ => &node.names.update_response,
                };
                let mut response = Map::new();
                for (key, field) in tree.selections() {
                    let value = match field.name.as_str() {
                        TYPENAME => Value::String(response_type.clone()),
                        name if name == node.names.plural => {
                            self.entity_value(type_name, data.clone(), field)?
                        }
                        _ => Value::Null,
                    };
                    response.insert(key, value);
                }
                Ok(Value::Object(response))
            }
            ResultShape::Delete => {
                let row = first(rows);
                let mut response = Map::new();
                for (key, field) in tree.selections() {
                    let value = match field.name.as_str() {
                        TYPENAME => Value::String("DeleteInfo".to_string()),
                        name => row.get(name).cloned().unwrap_or(Value::Null),
                    };
                    response.insert(key, value);
                }
                Ok(Value::Object(response))
            }
        }
    }

    fn entity(&self, type_name: &str) -> Result<Entity<'_>> {
        self.schema
            .entity(type_name)
            .ok_or_else(|| TheseusError::schema(format!("Unknown type {type_name}")))
    }

    /// Shapes a projected object, a list of them, or `null`.
    fn entity_value(&self, type_name: &str, value: Value, tree: &ResolveTree) -> Result<Value> {
        match value {
            Value::Array(items) => Ok(Value::Array(
                items
                    .into_iter()
                    .map(|item| self.entity_value(type_name, item, tree))
                    .collect::<Result<Vec<_>>>()?,
            )),
            Value::Object(map) => self.object(type_name, map, tree),
            other => Ok(other),
        }
    }

    fn concrete(&self, type_name: &str, map: &Map<String, Value>) -> Option<&Node> {
        match self.schema.entity(type_name)? {
            Entity::Node(node) => Some(node),
            Entity::Interface(_) | Entity::Union(_) => map
                .get(TYPENAME)
                .and_then(Value::as_str)
                .and_then(|name| self.schema.node(name)),
        }
    }

    fn object(&self, type_name: &str, mut raw: Map<String, Value>, tree: &ResolveTree) -> Result<Value> {
        let Some(node) = self.concrete(type_name, &raw) else {
            raw.retain(|key, _| !key.starts_with(SORT_PREFIX));
            return Ok(Value::Object(raw));
        };
        let selection = tree.fields_for(&node.type_names());
        let mut shaped = Map::new();
        for (key, field_tree) in selection {
            let resolver = self.resolvers.get(&format!("{}.{}", node.name, field_tree.name));
            let value = match resolver {
                Some(resolve) => resolve(&raw, field_tree, self.auth)?,
                None => {
                    let value = raw.get_mut(&key).map(Value::take).unwrap_or(Value::Null);
                    self.field_value(node, field_tree, value)?
                }
            };
            shaped.insert(key, value);
        }
        Ok(Value::Object(shaped))
    }

    fn field_value(&self, node: &Node, tree: &ResolveTree, value: Value) -> Result<Value> {
        if tree.name == TYPENAME {
            return Ok(Value::String(node.name.clone()));
        }
        if let Some(field) = node.field(&tree.name) {
            return match &field.kind {
                FieldKind::Relationship(rel) => self.entity_value(&rel.target, value, tree),
                FieldKind::Cypher(cypher) if cypher.target_kind.is_some() => {
                    self.entity_value(&field.type_ref.name, value, tree)
                }
                FieldKind::Ignored(_) => Ok(Value::Null),
                _ => Ok(value),
            };
        }
        let connection = node.fields.values().find_map(|field| {
            field
                .as_relationship()
                .filter(|rel| rel.names.connection_field == tree.name)
        });
        match connection {
            Some(rel) => {
                let names = ConnectionNames {
                    connection: &rel.names.connection_type,
                    edge: &rel.names.relationship_type,
                };
                self.connection(&rel.target, &names, value, tree)
            }
            None => Ok(value),
        }
    }

    /// `{ edges, totalCount }` from the statement, completed with cursors
    /// and `pageInfo` computed from the same window the statement used.
    fn connection(
        &self,
        target: &str,
        names: &ConnectionNames,
        value: Value,
        tree: &ResolveTree,
    ) -> Result<Value> {
        let total = value.get("totalCount").and_then(Value::as_u64).unwrap_or(0);
        let edges = match value.get("edges") {
            Some(Value::Array(edges)) => edges.clone(),
            _ => Vec::new(),
        };
        let declared = self
            .schema
            .node(target)
            .map_or(ListLimit::default(), |node| node.limit);
        let window = ConnectionWindow::from_args(tree, declared, self.config)?;
        let returned = edges.len() as u64;
        let start = window.start_index(total, returned);

        let mut shaped = Map::new();
        for (key, field) in tree.selections() {
            let value = match field.name.as_str() {
                TYPENAME => Value::String(names.connection.to_string()),
                "totalCount" => Value::from(total),
                "edges" => {
                    let mut shaped_edges = Vec::with_capacity(edges.len());
                    for (offset, edge) in edges.iter().enumerate() {
                        let index = start.saturating_add(offset as u64);
                        shaped_edges.push(self.edge(target, names, edge, index, field)?);
                    }
                    Value::Array(shaped_edges)
                }
                "pageInfo" => page_info(field, start, returned, total),
                _ => Value::Null,
            };
            shaped.insert(key, value);
        }
        Ok(Value::Object(shaped))
    }

    fn edge(
        &self,
        target: &str,
        names: &ConnectionNames,
        edge: &Value,
        index: u64,
        tree: &ResolveTree,
    ) -> Result<Value> {
        let mut shaped = Map::new();
        for (key, field) in tree.selections() {
            let value = match field.name.as_str() {
                TYPENAME => Value::String(names.edge.to_string()),
                "cursor" => Value::String(encode_cursor(index)),
                "node" => {
                    let node = edge.get("node").cloned().unwrap_or(Value::Null);
                    self.entity_value(target, node, field)?
                }
                "properties" => edge.get("properties").cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            };
            shaped.insert(key, value);
        }
        Ok(Value::Object(shaped))
    }
}

fn typename_key(tree: &ResolveTree) -> Option<String> {
    tree.selections()
        .into_iter()
        .find(|(_, field)| field.name == TYPENAME)
        .map(|(key, _)| key)
}

fn page_info(tree: &ResolveTree, start: u64, returned: u64, total: u64) -> Value {
    let cursor = |index: u64| Value::String(encode_cursor(index));
    let mut info = Map::new();
    for (key, field) in tree.selections() {
        let value = match field.name.as_str() {
            TYPENAME => Value::String("PageInfo".to_string()),
            "hasPreviousPage" => Value::Bool(start > 0),
            "hasNextPage" => Value::Bool(start.saturating_add(returned) < total),
            "startCursor" if returned > 0 => cursor(start),
            "endCursor" if returned > 0 => cursor(start.saturating_add(returned - 1)),
            _ => Value::Null,
        };
        info.insert(key, value);
    }
    Value::Object(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_info_reflects_the_window() {
        let tree = ResolveTree::new("pageInfo").with_fields(
            "PageInfo",
            vec![
                ResolveTree::new("hasNextPage"),
                ResolveTree::new("hasPreviousPage"),
                ResolveTree::new("startCursor"),
                ResolveTree::new("endCursor"),
            ],
        );
        assert_eq!(
            page_info(&tree, 2, 2, 5),
            json!({
                "hasNextPage": true,
                "hasPreviousPage": true,
                "startCursor": encode_cursor(2),
                "endCursor": encode_cursor(3),
            })
        );
        assert_eq!(
            page_info(&tree, 0, 0, 0),
            json!({
                "hasNextPage": false,
                "hasPreviousPage": false,
                "startCursor": null,
                "endCursor": null,
            })
        );
    }

    #[test]
    fn page_info_at_the_last_position_does_not_overflow() {
        let tree = ResolveTree::new("pageInfo").with_fields(
            "PageInfo",
            vec![ResolveTree::new("hasNextPage"), ResolveTree::new("endCursor")],
        );
        assert_eq!(
            page_info(&tree, u64::MAX, 2, 3),
            json!({"hasNextPage": false, "endCursor": encode_cursor(u64::MAX)})
        );
    }

    #[test]
    fn columns_default_to_null() {
        let rows = vec![json!({"this": 1}), json!({"other": 2})];
        assert_eq!(column(rows, "this"), vec![json!(1), Value::Null]);
    }
}
