use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};

use super::auth::RuleSet;
use super::naming::{EntityNames, RelationshipNames};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum OperationKind {
    Query,
    Mutation,
}

/// Root field of the generated API mapped to what it operates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RootField {
    Read(String),
    Connection(String),
    Aggregate(String),
    Create(String),
    Update(String),
    Delete(String),
    Cypher(String),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaModel {
    pub nodes: IndexMap<String, Node>,
    pub interfaces: IndexMap<String, Interface>,
    pub unions: IndexMap<String, Union>,
    pub relationship_properties: IndexMap<String, RelationshipProperties>,
    pub enums: IndexMap<String, Vec<String>>,
    pub queries: IndexMap<String, Field>,
    pub mutations: IndexMap<String, Field>,
    #[serde(skip)]
    pub(crate) root_fields: HashMap<(OperationKind, String), RootField>,
}

#[derive(Debug, Clone, Copy)]
pub enum Entity<'a> {
    Node(&'a Node),
    Interface(&'a Interface),
    Union(&'a Union),
}

impl<'a> Entity<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            Entity::Node(node) => &node.name,
            Entity::Interface(interface) => &interface.name,
            Entity::Union(union) => &union.name,
        }
    }

    pub fn names(&self) -> &'a EntityNames {
        match self {
            Entity::Node(node) => &node.names,
            Entity::Interface(interface) => &interface.names,
            Entity::Union(union) => &union.names,
        }
    }

    pub fn is_abstract(&self) -> bool {
        !matches!(self, Entity::Node(_))
    }
}

impl SchemaModel {
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn entity(&self, name: &str) -> Option<Entity<'_>> {
        if let Some(node) = self.nodes.get(name) {
            return Some(Entity::Node(node));
        }
        if let Some(interface) = self.interfaces.get(name) {
            return Some(Entity::Interface(interface));
        }
        self.unions.get(name).map(Entity::Union)
    }

    /// Concrete node types a target resolves to, in declaration order.
    pub fn concrete_nodes(&self, name: &str) -> Vec<&Node> {
        match self.entity(name) {
            Some(Entity::Node(node)) => vec![node],
            Some(Entity::Interface(interface)) => interface
                .implementations
                .iter()
                .filter_map(|n| self.nodes.get(n))
                .collect(),
            Some(Entity::Union(union)) => union
                .members
                .iter()
                .filter_map(|n| self.nodes.get(n))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn root_field(&self, operation: OperationKind, name: &str) -> Option<&RootField> {
        self.root_fields.get(&(operation, name.to_string()))
    }

    pub fn root_fields(&self) -> impl Iterator<Item = (&(OperationKind, String), &RootField)> {
        self.root_fields.iter()
    }

    pub fn relationship_properties(&self, name: &str) -> Option<&RelationshipProperties> {
        self.relationship_properties.get(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ListLimit {
    pub default: Option<u64>,
    pub max: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub name: String,
    pub labels: Vec<String>,
    pub interfaces: Vec<String>,
    pub fields: IndexMap<String, Field>,
    pub authorization: RuleSet,
    pub limit: ListLimit,
    pub names: EntityNames,
}

impl Node {
    pub fn main_label(&self) -> &str {
        self.labels.first().map(String::as_str).unwrap_or(&self.name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// The concrete type name followed by its interfaces, used to collect the
    /// selection made through fragments on any of them.
    pub fn type_names(&self) -> Vec<&str> {
        std::iter::once(self.name.as_str())
            .chain(self.interfaces.iter().map(String::as_str))
            .collect()
    }

    pub fn unique_fields(&self) -> impl Iterator<Item = (&Field, &PrimitiveField)> {
        self.fields.values().filter_map(|field| match &field.kind {
            FieldKind::Primitive(p) if p.unique.is_some() || p.id => Some((field, p)),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Interface {
    pub name: String,
    pub fields: IndexMap<String, Field>,
    pub implementations: Vec<String>,
    pub authorization: RuleSet,
    pub names: EntityNames,
}

#[derive(Debug, Clone, Serialize)]
pub struct Union {
    pub name: String,
    pub members: Vec<String>,
    pub names: EntityNames,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelationshipProperties {
    pub name: String,
    pub fields: IndexMap<String, Field>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeRef {
    pub name: String,
    pub list: bool,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Field {
    pub name: String,
    pub type_ref: TypeRef,
    pub kind: FieldKind,
    pub authorization: RuleSet,
}

impl Field {
    pub fn as_primitive(&self) -> Option<&PrimitiveField> {
        match &self.kind {
            FieldKind::Primitive(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_relationship(&self) -> Option<&RelationshipField> {
        match &self.kind {
            FieldKind::Relationship(r) => Some(r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum FieldKind {
    Primitive(PrimitiveField),
    Relationship(RelationshipField),
    Computed(ComputedField),
    Cypher(CypherField),
    Ignored(IgnoredField),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ScalarKind {
    Id,
    String,
    Int,
    BigInt,
    Float,
    Boolean,
    DateTime,
    Date,
    Time,
    LocalDateTime,
    LocalTime,
    Duration,
    Point,
    CartesianPoint,
    Enum(String),
    Custom(String),
}

impl ScalarKind {
    pub fn builtin(name: &str) -> Option<Self> {
        Some(match name {
            "ID" => ScalarKind::Id,
            "String" => ScalarKind::String,
            "Int" => ScalarKind::Int,
            "BigInt" => ScalarKind::BigInt,
            "Float" => ScalarKind::Float,
            "Boolean" => ScalarKind::Boolean,
            "DateTime" => ScalarKind::DateTime,
            "Date" => ScalarKind::Date,
            "Time" => ScalarKind::Time,
            "LocalDateTime" => ScalarKind::LocalDateTime,
            "LocalTime" => ScalarKind::LocalTime,
            "Duration" => ScalarKind::Duration,
            "Point" => ScalarKind::Point,
            "CartesianPoint" => ScalarKind::CartesianPoint,
            _ => return None,
        })
    }

    /// Cypher function converting a parameter into the stored value type.
    pub fn cast_function(&self) -> Option<&'static str> {
        match self {
            ScalarKind::DateTime => Some("datetime"),
            ScalarKind::Date => Some("date"),
            ScalarKind::Time => Some("time"),
            ScalarKind::LocalDateTime => Some("localdatetime"),
            ScalarKind::LocalTime => Some("localtime"),
            ScalarKind::Duration => Some("duration"),
            ScalarKind::Point | ScalarKind::CartesianPoint => Some("point"),
            _ => None,
        }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            ScalarKind::DateTime
                | ScalarKind::Date
                | ScalarKind::Time
                | ScalarKind::LocalDateTime
                | ScalarKind::LocalTime
                | ScalarKind::Duration
        )
    }

    pub fn is_spatial(&self) -> bool {
        matches!(self, ScalarKind::Point | ScalarKind::CartesianPoint)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ScalarKind::Int | ScalarKind::BigInt | ScalarKind::Float)
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, ScalarKind::Id | ScalarKind::String)
    }

    pub fn is_orderable(&self) -> bool {
        self.is_numeric() || self.is_textual() || self.is_temporal()
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TimestampOperation {
    Create,
    Update,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrimitiveField {
    pub scalar: ScalarKind,
    /// Graph property name, differs from the field name under `@alias`.
    pub db_property: String,
    pub default: Option<Value>,
    pub coalesce: Option<Value>,
    /// `@id` field; unique and optionally autogenerated.
    pub id: bool,
    pub autogenerate: bool,
    /// Constraint name for `@unique` (and `@id`) fields.
    pub unique: Option<String>,
    pub timestamps: BTreeSet<TimestampOperation>,
}

impl PrimitiveField {
    /// Autogenerated and timestamp fields are written by the compiler only.
    pub fn is_generated(&self) -> bool {
        self.autogenerate || !self.timestamps.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipDirection {
    In,
    Out,
    Undirected,
}

impl RelationshipDirection {
    pub fn as_cypher(self) -> theseus_cypher::RelationshipDirection {
        match self {
            RelationshipDirection::Out => theseus_cypher::RelationshipDirection::LeftToRight,
            RelationshipDirection::In => theseus_cypher::RelationshipDirection::RightToLeft,
            RelationshipDirection::Undirected => theseus_cypher::RelationshipDirection::Undirected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TargetKind {
    Node,
    Interface,
    Union,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Cardinality {
    List,
    Single,
    Required,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QueryDirection {
    DefaultDirected,
    DefaultUndirected,
    DirectedOnly,
    UndirectedOnly,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelationshipField {
    pub rel_type: String,
    pub direction: RelationshipDirection,
    pub target: String,
    pub target_kind: TargetKind,
    pub properties: Option<String>,
    pub cardinality: Cardinality,
    pub query_direction: QueryDirection,
    /// Declared default of the field's `options` argument.
    pub default_options: Option<Value>,
    pub names: RelationshipNames,
}

impl RelationshipField {
    pub fn is_list(&self) -> bool {
        self.cardinality == Cardinality::List
    }

    /// Direction used when reading, honouring the `directed` field argument.
    pub fn read_direction(&self, directed: Option<bool>) -> RelationshipDirection {
        let undirected = match self.query_direction {
            QueryDirection::DirectedOnly => false,
            QueryDirection::UndirectedOnly => true,
            QueryDirection::DefaultDirected => directed == Some(false),
            QueryDirection::DefaultUndirected => directed != Some(true),
        };
        if undirected {
            RelationshipDirection::Undirected
        } else {
            self.direction
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComputedField {
    pub template: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CypherArgument {
    pub name: String,
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CypherField {
    pub statement: String,
    pub column_name: String,
    pub arguments: Vec<CypherArgument>,
    /// Set when the field returns nodes, interfaces or unions.
    pub target_kind: Option<TargetKind>,
    pub scalar: Option<ScalarKind>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IgnoredField {
    pub requires: Vec<String>,
}
