//! Serialized form of a type-checked GraphQL schema with its directive
//! arguments already extracted. The GraphQL layer produces it; the builder
//! lowers it into a [`SchemaModel`](super::SchemaModel).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::auth::{AuthOperation, ValidationPhase};
use super::model::{RelationshipDirection, TimestampOperation};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchemaDocument {
    pub nodes: Vec<NodeDocument>,
    pub interfaces: Vec<InterfaceDocument>,
    pub unions: Vec<UnionDocument>,
    pub relationship_properties: Vec<PropertiesDocument>,
    pub enums: Vec<EnumDocument>,
    pub scalars: Vec<String>,
    /// `extend type X @authorization(...)` blocks.
    pub extensions: Vec<ExtensionDocument>,
    /// Root `Query` fields carrying `@cypher`.
    pub queries: Vec<FieldDocument>,
    /// Root `Mutation` fields carrying `@cypher`.
    pub mutations: Vec<FieldDocument>,
}

impl SchemaDocument {
    pub fn from_json_str(input: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn from_toml_str(input: &str) -> crate::Result<Self> {
        Ok(toml::from_str(input)?)
    }

    /// Reads a document, picking the format from the file extension.
    pub fn load(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&text),
            _ => Self::from_json_str(&text),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeDocument {
    pub name: String,
    /// `@node(labels: [...])`; the first label is the main label.
    pub labels: Option<Vec<String>>,
    /// `@plural(value)`.
    pub plural: Option<String>,
    pub implements: Vec<String>,
    pub fields: Vec<FieldDocument>,
    pub authorization: Option<AuthorizationDocument>,
    pub auth: Option<LegacyAuthDocument>,
    /// `@limit(default, max)`.
    pub limit: Option<LimitDocument>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InterfaceDocument {
    pub name: String,
    pub implements: Vec<String>,
    pub fields: Vec<FieldDocument>,
    pub authorization: Option<AuthorizationDocument>,
    pub auth: Option<LegacyAuthDocument>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UnionDocument {
    pub name: String,
    pub types: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PropertiesDocument {
    pub name: String,
    pub fields: Vec<FieldDocument>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EnumDocument {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExtensionDocument {
    pub name: String,
    pub authorization: Option<AuthorizationDocument>,
    pub auth: Option<LegacyAuthDocument>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LimitDocument {
    pub default: Option<u64>,
    pub max: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldDocument {
    pub name: String,
    /// Named type with list/non-null wrappers stripped.
    #[serde(rename = "type")]
    pub type_name: String,
    pub list: bool,
    pub required: bool,
    pub alias: Option<String>,
    pub id: Option<IdDocument>,
    pub unique: Option<UniqueDocument>,
    pub default: Option<Value>,
    pub coalesce: Option<Value>,
    pub timestamp: Option<TimestampDocument>,
    pub relationship: Option<RelationshipDocument>,
    pub declare_relationship: bool,
    pub cypher: Option<CypherDocument>,
    pub computed: Option<ComputedDocument>,
    pub custom_resolver: Option<CustomResolverDocument>,
    pub ignore: bool,
    pub arguments: Vec<ArgumentDocument>,
    pub authorization: Option<AuthorizationDocument>,
    pub auth: Option<LegacyAuthDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IdDocument {
    pub autogenerate: bool,
}

impl Default for IdDocument {
    fn default() -> Self {
        Self { autogenerate: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UniqueDocument {
    pub constraint_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimestampDocument {
    /// Empty means both CREATE and UPDATE.
    pub operations: Vec<TimestampOperation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipDocument {
    #[serde(rename = "type")]
    pub rel_type: String,
    pub direction: RelationshipDirection,
    #[serde(default)]
    pub properties: Option<String>,
    #[serde(default)]
    pub query_direction: Option<QueryDirectionDocument>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryDirectionDocument {
    DefaultDirected,
    DefaultUndirected,
    DirectedOnly,
    UndirectedOnly,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CypherDocument {
    pub statement: String,
    pub column_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ComputedDocument {
    pub template: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CustomResolverDocument {
    pub requires: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ArgumentDocument {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthorizationDocument {
    pub filter: Vec<FilterRuleDocument>,
    pub validate: Vec<ValidateRuleDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterRuleDocument {
    /// Empty means every operation a filter can apply to.
    pub operations: Vec<AuthOperation>,
    pub require_authentication: bool,
    #[serde(rename = "where")]
    pub condition: ConditionDocument,
}

impl Default for FilterRuleDocument {
    fn default() -> Self {
        Self {
            operations: Vec::new(),
            require_authentication: true,
            condition: ConditionDocument::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidateRuleDocument {
    pub operations: Vec<AuthOperation>,
    /// Empty means both BEFORE and AFTER, restricted per operation.
    pub when: Vec<ValidationPhase>,
    pub require_authentication: bool,
    #[serde(rename = "where")]
    pub condition: ConditionDocument,
}

impl Default for ValidateRuleDocument {
    fn default() -> Self {
        Self {
            operations: Vec::new(),
            when: Vec::new(),
            require_authentication: true,
            condition: ConditionDocument::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConditionDocument {
    pub node: Option<Value>,
    pub jwt: Option<Value>,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LegacyAuthDocument {
    pub rules: Vec<LegacyRuleDocument>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LegacyRuleDocument {
    pub operations: Vec<AuthOperation>,
    pub is_authenticated: Option<bool>,
    pub allow_unauthenticated: bool,
    pub roles: Vec<String>,
    /// Object condition or the string `"*"`.
    pub allow: Option<Value>,
    pub bind: Option<Value>,
    #[serde(rename = "where")]
    pub condition: Option<Value>,
}
