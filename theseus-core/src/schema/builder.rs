use std::collections::{BTreeSet, HashMap, HashSet};

use indexmap::IndexMap;
use serde_json::Value;
use strum::IntoEnumIterator;
use tracing::{debug, warn};

use super::auth::{
    AuthOperation, AuthorizationRule, RuleCondition, RuleEffect, RuleSet, ValidationPhase,
};
use super::document::*;
use super::model::*;
use super::naming::{EntityNames, RelationshipNames};
use crate::config::Config;
use crate::prelude::*;

const FILTER_OPERATIONS: [AuthOperation; 5] = [
    AuthOperation::Read,
    AuthOperation::Update,
    AuthOperation::Delete,
    AuthOperation::Connect,
    AuthOperation::Disconnect,
];

impl SchemaModel {
    /// Resolves every type reference, flattens inherited authorization and
    /// builds the root field lookup. The result is read-only.
    pub fn build(document: &SchemaDocument, config: &Config) -> Result<Self> {
        Builder::new(document, config)?.build()
    }
}

struct Builder<'a> {
    document: &'a SchemaDocument,
    config: &'a Config,
    extensions: HashMap<&'a str, Vec<&'a ExtensionDocument>>,
}

impl<'a> Builder<'a> {
    fn new(document: &'a SchemaDocument, config: &'a Config) -> Result<Self> {
        let mut seen = HashSet::new();
        let names = document
            .nodes
            .iter()
            .map(|n| n.name.as_str())
            .chain(document.interfaces.iter().map(|i| i.name.as_str()))
            .chain(document.unions.iter().map(|u| u.name.as_str()))
            .chain(document.relationship_properties.iter().map(|p| p.name.as_str()))
            .chain(document.enums.iter().map(|e| e.name.as_str()));
        for name in names {
            if !seen.insert(name) {
                return Err(TheseusError::schema(format!("Type {name} is defined twice")));
            }
        }

        let mut extensions: HashMap<&str, Vec<&ExtensionDocument>> = HashMap::new();
        for extension in &document.extensions {
            if !seen.contains(extension.name.as_str()) {
                return Err(TheseusError::schema(format!(
                    "Cannot extend unknown type {}",
                    extension.name
                )));
            }
            extensions
                .entry(extension.name.as_str())
                .or_default()
                .push(extension);
        }

        Ok(Self {
            document,
            config,
            extensions,
        })
    }

    fn build(self) -> Result<SchemaModel> {
        let mut model = SchemaModel::default();

        for doc in &self.document.enums {
            model.enums.insert(doc.name.clone(), doc.values.clone());
        }

        for doc in &self.document.relationship_properties {
            let mut fields = IndexMap::new();
            for field in &doc.fields {
                let built = self.field(&doc.name, field)?;
                if !matches!(built.kind, FieldKind::Primitive(_)) {
                    return Err(TheseusError::schema(format!(
                        "Relationship properties {}.{} must be a scalar field",
                        doc.name, field.name
                    )));
                }
                fields.insert(field.name.clone(), built);
            }
            model.relationship_properties.insert(
                doc.name.clone(),
                RelationshipProperties {
                    name: doc.name.clone(),
                    fields,
                },
            );
        }

        let mut interface_rules: HashMap<String, RuleSet> = HashMap::new();
        for doc in &self.document.interfaces {
            interface_rules.insert(
                doc.name.clone(),
                self.type_rules(&doc.name, &doc.authorization, &doc.auth)?,
            );
        }
        // Interfaces inherit from the interfaces they implement.
        for doc in &self.document.interfaces {
            for parent in self.interface_closure(&doc.name)? {
                if parent == doc.name {
                    continue;
                }
                if let Some(parent_rules) = interface_rules.get(&parent).cloned() {
                    if let Some(rules) = interface_rules.get_mut(&doc.name) {
                        rules.extend(&parent_rules);
                    }
                }
            }
        }

        for doc in &self.document.interfaces {
            let mut fields = IndexMap::new();
            for field in &doc.fields {
                fields.insert(field.name.clone(), self.field(&doc.name, field)?);
            }
            let implementations = self
                .document
                .nodes
                .iter()
                .filter(|node| {
                    self.node_interfaces(node)
                        .map(|closure| closure.contains(&doc.name))
                        .unwrap_or(false)
                })
                .map(|node| node.name.clone())
                .collect();
            model.interfaces.insert(
                doc.name.clone(),
                Interface {
                    name: doc.name.clone(),
                    fields,
                    implementations,
                    authorization: interface_rules.get(&doc.name).cloned().unwrap_or_default(),
                    names: EntityNames::new(&doc.name, None),
                },
            );
        }

        for doc in &self.document.unions {
            for member in &doc.types {
                if !self.document.nodes.iter().any(|n| &n.name == member) {
                    return Err(TheseusError::schema(format!(
                        "Union {} member {member} is not a node type",
                        doc.name
                    )));
                }
            }
            model.unions.insert(
                doc.name.clone(),
                Union {
                    name: doc.name.clone(),
                    members: doc.types.clone(),
                    names: EntityNames::new(&doc.name, None),
                },
            );
        }

        for doc in &self.document.nodes {
            let node = self.node(doc, &model, &interface_rules)?;
            model.nodes.insert(node.name.clone(), node);
        }

        self.check_declared_relationships(&model)?;

        for doc in &self.document.queries {
            model.queries.insert(doc.name.clone(), self.field("Query", doc)?);
        }
        for doc in &self.document.mutations {
            model
                .mutations
                .insert(doc.name.clone(), self.field("Mutation", doc)?);
        }

        model.root_fields = root_fields(&model)?;
        debug!(
            "built schema model: {} nodes, {} interfaces, {} unions, {} root fields",
            model.nodes.len(),
            model.interfaces.len(),
            model.unions.len(),
            model.root_fields.len()
        );
        Ok(model)
    }

    fn node(
        &self,
        doc: &NodeDocument,
        model: &SchemaModel,
        interface_rules: &HashMap<String, RuleSet>,
    ) -> Result<Node> {
        let interfaces = self.node_interfaces(doc)?;
        for interface in &interfaces {
            if !model.interfaces.contains_key(interface) {
                return Err(TheseusError::schema(format!(
                    "{} implements unknown interface {interface}",
                    doc.name
                )));
            }
        }

        let mut authorization = self.type_rules(&doc.name, &doc.authorization, &doc.auth)?;
        for interface in &interfaces {
            if let Some(rules) = interface_rules.get(interface) {
                authorization.extend(rules);
            }
        }

        let mut fields = IndexMap::new();
        for field in &doc.fields {
            let mut built = self.field(&doc.name, field)?;
            for interface in &interfaces {
                if let Some(inherited) = model
                    .interfaces
                    .get(interface)
                    .and_then(|i| i.fields.get(&field.name))
                {
                    built.authorization.extend(&inherited.authorization);
                }
            }
            fields.insert(field.name.clone(), built);
        }
        // Fields declared on an interface with their directives are inherited
        // by implementers that don't redeclare them.
        for interface in &interfaces {
            let Some(interface) = model.interfaces.get(interface) else {
                continue;
            };
            for (name, field) in &interface.fields {
                if fields.contains_key(name) {
                    continue;
                }
                let Some(source) = self.interface_field_doc(&interface.name, name) else {
                    continue;
                };
                if source.declare_relationship {
                    continue;
                }
                let mut inherited = self.field(&doc.name, source)?;
                inherited.authorization = field.authorization.clone();
                fields.insert(name.clone(), inherited);
            }
        }

        let labels = match &doc.labels {
            Some(labels) if !labels.is_empty() => labels.clone(),
            _ => vec![doc.name.clone()],
        };
        let limit = doc
            .limit
            .as_ref()
            .map(|limit| ListLimit {
                default: limit.default,
                max: limit.max,
            })
            .unwrap_or_default();
        if let (Some(default), Some(max)) = (limit.default, limit.max) {
            if default > max {
                return Err(TheseusError::schema(format!(
                    "{} @limit default {default} is greater than max {max}",
                    doc.name
                )));
            }
        }

        Ok(Node {
            name: doc.name.clone(),
            labels,
            interfaces,
            fields,
            authorization,
            limit,
            names: EntityNames::new(&doc.name, doc.plural.as_deref()),
        })
    }

    fn interface_field_doc(&self, interface: &str, field: &str) -> Option<&FieldDocument> {
        self.document
            .interfaces
            .iter()
            .find(|i| i.name == interface)
            .and_then(|i| i.fields.iter().find(|f| f.name == field))
    }

    /// Directly and transitively implemented interfaces.
    fn node_interfaces(&self, doc: &NodeDocument) -> Result<Vec<String>> {
        let mut out: Vec<String> = Vec::new();
        for interface in &doc.implements {
            for name in self.interface_closure(interface)? {
                if !out.contains(&name) {
                    out.push(name);
                }
            }
        }
        Ok(out)
    }

    fn interface_closure(&self, name: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            if out.contains(&current) {
                continue;
            }
            let doc = self
                .document
                .interfaces
                .iter()
                .find(|i| i.name == current)
                .ok_or_else(|| TheseusError::schema(format!("Unknown interface {current}")))?;
            stack.extend(doc.implements.iter().cloned());
            out.push(current);
        }
        Ok(out)
    }

    fn check_declared_relationships(&self, model: &SchemaModel) -> Result<()> {
        for doc in &self.document.interfaces {
            for field in doc.fields.iter().filter(|f| f.declare_relationship) {
                let Some(interface) = model.interfaces.get(&doc.name) else {
                    continue;
                };
                for implementation in &interface.implementations {
                    let fulfilled = model
                        .node(implementation)
                        .and_then(|node| node.field(&field.name))
                        .is_some_and(|f| matches!(f.kind, FieldKind::Relationship(_)));
                    if !fulfilled {
                        return Err(TheseusError::schema(format!(
                            "{implementation} must declare relationship field {} required by {}",
                            field.name, doc.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn target_kind(&self, name: &str) -> Option<TargetKind> {
        if self.document.nodes.iter().any(|n| n.name == name) {
            Some(TargetKind::Node)
        } else if self.document.interfaces.iter().any(|i| i.name == name) {
            Some(TargetKind::Interface)
        } else if self.document.unions.iter().any(|u| u.name == name) {
            Some(TargetKind::Union)
        } else {
            None
        }
    }

    fn scalar(&self, name: &str) -> Option<ScalarKind> {
        ScalarKind::builtin(name)
            .or_else(|| {
                self.document
                    .enums
                    .iter()
                    .any(|e| e.name == name)
                    .then(|| ScalarKind::Enum(name.to_string()))
            })
            .or_else(|| {
                self.document
                    .scalars
                    .iter()
                    .any(|s| s == name)
                    .then(|| ScalarKind::Custom(name.to_string()))
            })
    }

    fn field(&self, owner: &str, doc: &FieldDocument) -> Result<Field> {
        let type_ref = TypeRef {
            name: doc.type_name.clone(),
            list: doc.list,
            required: doc.required,
        };
        let authorization = field_rules(owner, &doc.authorization, &doc.auth)?;
        let kind = if let Some(rel) = &doc.relationship {
            let target_kind = self.target_kind(&doc.type_name).ok_or_else(|| {
                TheseusError::schema(format!(
                    "{owner}.{} targets unknown type {}",
                    doc.name, doc.type_name
                ))
            })?;
            if let Some(properties) = &rel.properties {
                if !self
                    .document
                    .relationship_properties
                    .iter()
                    .any(|p| &p.name == properties)
                {
                    return Err(TheseusError::schema(format!(
                        "{owner}.{} uses unknown relationship properties {properties}",
                        doc.name
                    )));
                }
            }
            let cardinality = if doc.list {
                Cardinality::List
            } else if doc.required {
                Cardinality::Required
            } else {
                Cardinality::Single
            };
            let query_direction = match rel.query_direction {
                None | Some(QueryDirectionDocument::DefaultDirected) => {
                    QueryDirection::DefaultDirected
                }
                Some(QueryDirectionDocument::DefaultUndirected) => {
                    QueryDirection::DefaultUndirected
                }
                Some(QueryDirectionDocument::DirectedOnly) => QueryDirection::DirectedOnly,
                Some(QueryDirectionDocument::UndirectedOnly) => QueryDirection::UndirectedOnly,
            };
            FieldKind::Relationship(RelationshipField {
                rel_type: rel.rel_type.clone(),
                direction: rel.direction,
                target: doc.type_name.clone(),
                target_kind,
                properties: rel.properties.clone(),
                cardinality,
                query_direction,
                default_options: doc
                    .arguments
                    .iter()
                    .find(|arg| arg.name == "options")
                    .and_then(|arg| arg.default.clone()),
                names: RelationshipNames::new(owner, &doc.name),
            })
        } else if let Some(cypher) = &doc.cypher {
            if cypher.column_name.is_empty() {
                return Err(TheseusError::schema(format!(
                    "{owner}.{} @cypher requires a columnName",
                    doc.name
                )));
            }
            if self.config.cypher.lint_custom_statements {
                if let Err(err) = theseus_cypher::check_syntax(&cypher.statement) {
                    warn!("{owner}.{}: @cypher statement did not lint: {err}", doc.name);
                }
            }
            FieldKind::Cypher(CypherField {
                statement: cypher.statement.clone(),
                column_name: cypher.column_name.clone(),
                arguments: doc
                    .arguments
                    .iter()
                    .map(|arg| CypherArgument {
                        name: arg.name.clone(),
                        default: arg.default.clone(),
                    })
                    .collect(),
                target_kind: self.target_kind(&doc.type_name),
                scalar: self.scalar(&doc.type_name),
            })
        } else if let Some(computed) = &doc.computed {
            FieldKind::Computed(ComputedField {
                template: computed.template.clone(),
            })
        } else if doc.ignore || doc.custom_resolver.is_some() {
            FieldKind::Ignored(IgnoredField {
                requires: doc
                    .custom_resolver
                    .as_ref()
                    .map(|r| r.requires.clone())
                    .unwrap_or_default(),
            })
        } else if doc.declare_relationship {
            let target_kind = self.target_kind(&doc.type_name).ok_or_else(|| {
                TheseusError::schema(format!(
                    "{owner}.{} declares a relationship to unknown type {}",
                    doc.name, doc.type_name
                ))
            })?;
            // Placeholder resolved per implementer; never traversed directly.
            FieldKind::Relationship(RelationshipField {
                rel_type: String::new(),
                direction: RelationshipDirection::Out,
                target: doc.type_name.clone(),
                target_kind,
                properties: None,
                cardinality: if doc.list {
                    Cardinality::List
                } else {
                    Cardinality::Single
                },
                query_direction: QueryDirection::DefaultDirected,
                default_options: None,
                names: RelationshipNames::new(owner, &doc.name),
            })
        } else {
            let scalar = self.scalar(&doc.type_name).ok_or_else(|| {
                TheseusError::schema(format!(
                    "{owner}.{} has unknown type {}; object fields need @relationship, @cypher or @ignore",
                    doc.name, doc.type_name
                ))
            })?;
            let db_property = doc.alias.clone().unwrap_or_else(|| doc.name.clone());
            let timestamps: BTreeSet<TimestampOperation> = match &doc.timestamp {
                Some(ts) if ts.operations.is_empty() => {
                    [TimestampOperation::Create, TimestampOperation::Update].into()
                }
                Some(ts) => ts.operations.iter().copied().collect(),
                None => BTreeSet::new(),
            };
            if !timestamps.is_empty() && !scalar.is_temporal() {
                return Err(TheseusError::schema(format!(
                    "{owner}.{} @timestamp requires a temporal type",
                    doc.name
                )));
            }
            let unique = doc
                .unique
                .as_ref()
                .map(|u| {
                    u.constraint_name
                        .clone()
                        .unwrap_or_else(|| format!("{owner}_{db_property}"))
                })
                .or_else(|| doc.id.as_ref().map(|_| format!("{owner}_{db_property}")));
            FieldKind::Primitive(PrimitiveField {
                scalar,
                default: doc.default.clone(),
                coalesce: doc.coalesce.clone(),
                id: doc.id.is_some(),
                autogenerate: doc.id.as_ref().is_some_and(|id| id.autogenerate),
                unique,
                timestamps,
                db_property,
            })
        };
        Ok(Field {
            name: doc.name.clone(),
            type_ref,
            kind,
            authorization,
        })
    }

    fn type_rules(
        &self,
        origin: &str,
        authorization: &Option<AuthorizationDocument>,
        auth: &Option<LegacyAuthDocument>,
    ) -> Result<RuleSet> {
        let mut rules = field_rules(origin, authorization, auth)?;
        if let Some(extensions) = self.extensions.get(origin) {
            for extension in extensions {
                if let Some(doc) = &extension.authorization {
                    rules.rules.extend(lower_authorization(origin, doc));
                }
                if let Some(doc) = &extension.auth {
                    rules.rules.extend(lower_legacy(origin, doc)?);
                }
            }
        }
        Ok(rules)
    }
}

fn field_rules(
    origin: &str,
    authorization: &Option<AuthorizationDocument>,
    auth: &Option<LegacyAuthDocument>,
) -> Result<RuleSet> {
    let mut rules = RuleSet::default();
    if let Some(doc) = authorization {
        rules.rules.extend(lower_authorization(origin, doc));
    }
    if let Some(doc) = auth {
        rules.rules.extend(lower_legacy(origin, doc)?);
    }
    Ok(rules)
}

fn operation_set(requested: &[AuthOperation], allowed: &[AuthOperation]) -> BTreeSet<AuthOperation> {
    if requested.is_empty() {
        allowed.iter().copied().collect()
    } else {
        requested
            .iter()
            .copied()
            .filter(|op| allowed.contains(op))
            .collect()
    }
}

fn condition(doc: &ConditionDocument) -> RuleCondition {
    RuleCondition {
        node: doc.node.clone(),
        jwt: doc.jwt.clone(),
        roles: doc.roles.clone(),
    }
}

pub(crate) fn lower_authorization(origin: &str, doc: &AuthorizationDocument) -> Vec<AuthorizationRule> {
    let mut rules = Vec::new();
    for filter in &doc.filter {
        let operations = operation_set(&filter.operations, &FILTER_OPERATIONS);
        if operations.is_empty() {
            continue;
        }
        rules.push(AuthorizationRule {
            operations,
            effect: RuleEffect::Filter,
            require_authentication: filter.require_authentication,
            condition: condition(&filter.condition),
            origin: origin.to_string(),
        });
    }
    let all: Vec<AuthOperation> = AuthOperation::iter().collect();
    for validate in &doc.validate {
        let phases = if validate.when.is_empty() {
            vec![ValidationPhase::Before, ValidationPhase::After]
        } else {
            validate.when.clone()
        };
        for phase in phases {
            let operations: BTreeSet<AuthOperation> = operation_set(&validate.operations, &all)
                .into_iter()
                .filter(|op| phase.applies_to(*op))
                .collect();
            if operations.is_empty() {
                continue;
            }
            rules.push(AuthorizationRule {
                operations,
                effect: RuleEffect::Validate(phase),
                require_authentication: validate.require_authentication,
                condition: condition(&validate.condition),
                origin: origin.to_string(),
            });
        }
    }
    rules
}

/// Lowers `@auth` rules: `allow` checks existing data, `bind` checks written
/// data, `where` filters, and a rule with only `roles`/`isAuthenticated`
/// gates every operation it lists.
pub(crate) fn lower_legacy(origin: &str, doc: &LegacyAuthDocument) -> Result<Vec<AuthorizationRule>> {
    use AuthOperation::*;
    let mut rules = Vec::new();
    for rule in &doc.rules {
        let require_authentication =
            !rule.allow_unauthenticated && rule.is_authenticated != Some(false);
        let mut push = |effect: RuleEffect, allowed: &[AuthOperation], node: Option<Value>| {
            let operations = operation_set(&rule.operations, allowed);
            if operations.is_empty() {
                return;
            }
            rules.push(AuthorizationRule {
                operations,
                effect,
                require_authentication,
                condition: RuleCondition {
                    node,
                    jwt: None,
                    roles: rule.roles.clone(),
                },
                origin: origin.to_string(),
            });
        };

        let node_condition = |value: &Value, key: &str| -> Result<Option<Value>> {
            match value {
                Value::String(s) if s == "*" => Ok(None),
                Value::Object(_) => Ok(Some(value.clone())),
                other => Err(TheseusError::schema(format!(
                    "{origin} @auth {key} must be an object or \"*\", got {other}"
                ))),
            }
        };

        let mut has_part = false;
        if let Some(allow) = &rule.allow {
            has_part = true;
            let node = node_condition(allow, "allow")?;
            push(
                RuleEffect::Validate(ValidationPhase::Before),
                &[Read, Update, Delete, Connect, Disconnect],
                node,
            );
        }
        if let Some(bind) = &rule.bind {
            has_part = true;
            let node = node_condition(bind, "bind")?;
            push(
                RuleEffect::Validate(ValidationPhase::After),
                &[Create, Update, Connect, Disconnect],
                node,
            );
        }
        if let Some(condition) = &rule.condition {
            has_part = true;
            let node = node_condition(condition, "where")?;
            push(RuleEffect::Filter, &FILTER_OPERATIONS, node);
        }
        if !has_part && (!rule.roles.is_empty() || rule.is_authenticated == Some(true)) {
            push(
                RuleEffect::Validate(ValidationPhase::Before),
                &[Read, Update, Delete, Connect, Disconnect],
                None,
            );
            push(RuleEffect::Validate(ValidationPhase::After), &[Create], None);
        }
    }
    Ok(rules)
}

fn root_fields(model: &SchemaModel) -> Result<HashMap<(OperationKind, String), RootField>> {
    let mut out = HashMap::new();
    let mut insert = |kind: OperationKind, name: &str, field: RootField| -> Result<()> {
        if out.insert((kind, name.to_string()), field).is_some() {
            return Err(TheseusError::schema(format!(
                "{kind} field {name} is generated twice"
            )));
        }
        Ok(())
    };

    for node in model.nodes.values() {
        let names = &node.names;
        insert(OperationKind::Query, &names.read, RootField::Read(node.name.clone()))?;
        insert(
            OperationKind::Query,
            &names.connection,
            RootField::Connection(node.name.clone()),
        )?;
        insert(
            OperationKind::Query,
            &names.aggregate,
            RootField::Aggregate(node.name.clone()),
        )?;
        insert(
            OperationKind::Mutation,
            &names.create,
            RootField::Create(node.name.clone()),
        )?;
        insert(
            OperationKind::Mutation,
            &names.update,
            RootField::Update(node.name.clone()),
        )?;
        insert(
            OperationKind::Mutation,
            &names.delete,
            RootField::Delete(node.name.clone()),
        )?;
    }
    for interface in model.interfaces.values() {
        if interface.implementations.is_empty() {
            continue;
        }
        let names = &interface.names;
        insert(
            OperationKind::Query,
            &names.read,
            RootField::Read(interface.name.clone()),
        )?;
        insert(
            OperationKind::Query,
            &names.connection,
            RootField::Connection(interface.name.clone()),
        )?;
        insert(
            OperationKind::Query,
            &names.aggregate,
            RootField::Aggregate(interface.name.clone()),
        )?;
    }
    for union in model.unions.values() {
        insert(
            OperationKind::Query,
            &union.names.read,
            RootField::Read(union.name.clone()),
        )?;
    }
    for name in model.queries.keys() {
        insert(OperationKind::Query, name, RootField::Cypher(name.clone()))?;
    }
    for name in model.mutations.keys() {
        insert(OperationKind::Mutation, name, RootField::Cypher(name.clone()))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document() -> SchemaDocument {
        serde_json::from_value(json!({
            "nodes": [
                {
                    "name": "Movie",
                    "implements": ["Production"],
                    "fields": [
                        {"name": "id", "type": "ID", "required": true, "id": {}},
                        {"name": "title", "type": "String"},
                        {"name": "actors", "type": "Actor", "list": true,
                         "relationship": {"type": "ACTED_IN", "direction": "IN", "properties": "ActedIn"}}
                    ],
                    "auth": {"rules": [{"operations": ["UPDATE"], "allow": {"id": "$jwt.sub"}}]}
                },
                {
                    "name": "Actor",
                    "fields": [
                        {"name": "name", "type": "String"},
                        {"name": "movies", "type": "Production", "list": true,
                         "relationship": {"type": "ACTED_IN", "direction": "OUT"}}
                    ]
                }
            ],
            "interfaces": [
                {
                    "name": "Production",
                    "fields": [{"name": "title", "type": "String"}],
                    "authorization": {"filter": [{"where": {"node": {"title_NOT": "secret"}}}]}
                }
            ],
            "relationshipProperties": [
                {"name": "ActedIn", "fields": [{"name": "screenTime", "type": "Int"}]}
            ],
            "extensions": [
                {"name": "Actor", "authorization": {"validate": [{"operations": ["DELETE"], "where": {"jwt": {"admin": true}}}]}}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn resolves_fields_and_root_names() {
        let model = SchemaModel::build(&document(), &Config::default()).unwrap();
        let movie = model.node("Movie").unwrap();
        let actors = movie.field("actors").unwrap().as_relationship().unwrap();
        assert_eq!(actors.target_kind, TargetKind::Node);
        assert_eq!(actors.cardinality, Cardinality::List);
        assert_eq!(actors.properties.as_deref(), Some("ActedIn"));

        let id = movie.field("id").unwrap().as_primitive().unwrap();
        assert!(id.id && id.autogenerate);
        assert_eq!(id.unique.as_deref(), Some("Movie_id"));

        assert_eq!(
            model.root_field(OperationKind::Query, "productions"),
            Some(&RootField::Read("Production".to_string()))
        );
        assert_eq!(
            model.root_field(OperationKind::Mutation, "deleteActors"),
            Some(&RootField::Delete("Actor".to_string()))
        );
        assert_eq!(model.interfaces["Production"].implementations, vec!["Movie"]);
    }

    #[test]
    fn flattens_interface_and_extension_rules() {
        let model = SchemaModel::build(&document(), &Config::default()).unwrap();
        let movie = model.node("Movie").unwrap();
        assert!(movie.authorization.has(AuthOperation::Read, RuleEffect::Filter));
        assert!(movie.authorization.has(
            AuthOperation::Update,
            RuleEffect::Validate(ValidationPhase::Before)
        ));
        assert!(!movie.authorization.has(
            AuthOperation::Create,
            RuleEffect::Validate(ValidationPhase::Before)
        ));

        let actor = model.node("Actor").unwrap();
        assert!(actor.authorization.has(
            AuthOperation::Delete,
            RuleEffect::Validate(ValidationPhase::Before)
        ));
        assert!(!actor.authorization.has(
            AuthOperation::Delete,
            RuleEffect::Validate(ValidationPhase::After)
        ));
        assert!(actor.fields.values().all(|f| f.authorization.is_empty()));
    }

    #[test]
    fn legacy_rules_lower_by_part() {
        let doc: LegacyAuthDocument = serde_json::from_value(json!({
            "rules": [
                {"allow": {"id": "$jwt.sub"}, "bind": {"id": "$jwt.sub"}},
                {"operations": ["CREATE"], "roles": ["admin"]},
                {"where": "*", "allowUnauthenticated": true}
            ]
        }))
        .unwrap();
        let rules = lower_legacy("User", &doc).unwrap();
        assert_eq!(rules.len(), 4);
        assert_eq!(rules[0].effect, RuleEffect::Validate(ValidationPhase::Before));
        assert!(!rules[0].operations.contains(&AuthOperation::Create));
        assert_eq!(rules[1].effect, RuleEffect::Validate(ValidationPhase::After));
        assert!(rules[1].operations.contains(&AuthOperation::Create));
        assert_eq!(rules[2].operations, [AuthOperation::Create].into());
        assert_eq!(rules[2].condition.roles, vec!["admin"]);
        assert_eq!(rules[3].effect, RuleEffect::Filter);
        assert!(!rules[3].require_authentication);
        assert!(rules[3].condition.node.is_none());
    }

    #[test]
    fn rejects_unknown_targets() {
        let mut doc = document();
        doc.nodes[1].fields[1].type_name = "Missing".to_string();
        let err = SchemaModel::build(&doc, &Config::default()).unwrap_err();
        assert!(err.to_string().contains("unknown type Missing"));
    }

    #[test]
    fn declared_relationships_must_be_implemented() {
        let mut doc = document();
        doc.interfaces[0].fields.push(FieldDocument {
            name: "reviews".to_string(),
            type_name: "Actor".to_string(),
            list: true,
            declare_relationship: true,
            ..Default::default()
        });
        let err = SchemaModel::build(&doc, &Config::default()).unwrap_err();
        assert!(err.to_string().contains("must declare relationship field reviews"));
    }
}
