use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::claims::AuthContext;
use crate::schema::OperationKind;

/// One selected field with its arguments and sub-selections, grouped by the
/// type condition they were selected under.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResolveTree {
    pub name: String,
    pub alias: Option<String>,
    pub args: Map<String, Value>,
    pub fields_by_type_name: IndexMap<String, IndexMap<String, ResolveTree>>,
}

impl ResolveTree {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_args(mut self, args: Value) -> Self {
        if let Value::Object(args) = args {
            self.args = args;
        }
        self
    }

    pub fn with_fields(mut self, type_name: impl Into<String>, fields: Vec<ResolveTree>) -> Self {
        let entry = self.fields_by_type_name.entry(type_name.into()).or_default();
        for field in fields {
            entry.insert(field.response_key().to_string(), field);
        }
        self
    }

    /// Key the field's value is returned under.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name).filter(|value| !value.is_null())
    }

    /// Selections that apply to an object of the given type names, the
    /// concrete type first. Earlier type names win for the same response key.
    pub fn fields_for(&self, type_names: &[&str]) -> IndexMap<String, &ResolveTree> {
        let mut out = IndexMap::new();
        for type_name in type_names {
            if let Some(fields) = self.fields_by_type_name.get(*type_name) {
                for (key, field) in fields {
                    out.entry(key.clone()).or_insert(field);
                }
            }
        }
        out
    }

    /// Selections under every type condition; the first one wins for the
    /// same response key.
    pub fn selections(&self) -> IndexMap<String, &ResolveTree> {
        let mut out = IndexMap::new();
        for fields in self.fields_by_type_name.values() {
            for (key, field) in fields {
                out.entry(key.clone()).or_insert(field);
            }
        }
        out
    }

    /// First selection of the named field under any type condition.
    pub fn field(&self, name: &str) -> Option<&ResolveTree> {
        self.fields_by_type_name
            .values()
            .flat_map(|fields| fields.values())
            .find(|field| field.name == name)
    }

    /// Every selection of the named field under any type condition.
    pub fn fields_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ResolveTree> {
        self.fields_by_type_name
            .values()
            .flat_map(|fields| fields.values())
            .filter(move |field| field.name == name)
    }

    pub fn has_selection(&self) -> bool {
        self.fields_by_type_name.values().any(|fields| !fields.is_empty())
    }
}

/// A GraphQL operation after parsing and validation: the root fields to
/// resolve and the caller's authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLRequest {
    pub operation: OperationKind,
    pub fields: Vec<ResolveTree>,
    #[serde(default)]
    pub auth: AuthContext,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQLResponse {
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    pub path: Vec<String>,
    pub extensions: ErrorExtensions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorExtensions {
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn concrete_selection_wins_over_interface() {
        let tree = ResolveTree::new("productions")
            .with_fields(
                "Production",
                vec![ResolveTree::new("title"), ResolveTree::new("id")],
            )
            .with_fields(
                "Movie",
                vec![ResolveTree::new("runtime").with_alias("title")],
            );
        let fields = tree.fields_for(&["Movie", "Production"]);
        let keys: Vec<&str> = fields.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["title", "id"]);
        assert_eq!(fields["title"].name, "runtime");

        let series = tree.fields_for(&["Series", "Production"]);
        assert_eq!(series["title"].name, "title");
    }

    #[test]
    fn null_arguments_read_as_absent() {
        let tree = ResolveTree::new("movies").with_args(json!({"where": null, "options": {"limit": 1}}));
        assert!(tree.arg("where").is_none());
        assert_eq!(tree.arg("options"), Some(&json!({"limit": 1})));
    }

    #[test]
    fn deserializes_resolve_info_shape() {
        let tree: ResolveTree = serde_json::from_value(json!({
            "name": "movies",
            "alias": "films",
            "args": {"where": {"title": "Matrix"}},
            "fieldsByTypeName": {"Movie": {"title": {"name": "title", "alias": "title"}}}
        }))
        .unwrap();
        assert_eq!(tree.response_key(), "films");
        assert!(tree.field("title").is_some());
    }
}
