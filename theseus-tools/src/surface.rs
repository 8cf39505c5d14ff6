//! The GraphQL surface generated for a schema: root fields, input types and
//! relationship types per entity, rendered as a plain text report.

use serde::Serialize;
use theseus_core::schema::{
    EntityNames, Field, RelationshipDirection, RelationshipField, SchemaModel,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Node,
    Interface,
    Union,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipSurface {
    pub field: String,
    /// `(:Movie)<-[:ACTED_IN]-(:Actor)`
    pub pattern: String,
    pub connection_field: String,
    pub connection_type: String,
    pub relationship_type: String,
    pub inputs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySurface {
    pub name: String,
    pub kind: EntityKind,
    pub queries: Vec<String>,
    pub mutations: Vec<String>,
    pub inputs: Vec<String>,
    pub types: Vec<String>,
    pub relationships: Vec<RelationshipSurface>,
}

fn relationship_surface(source: &str, field: &Field, rel: &RelationshipField) -> RelationshipSurface {
    let edge = format!("[:{}]", rel.rel_type);
    let pattern = match rel.direction {
        RelationshipDirection::Out => format!("(:{source})-{edge}->(:{})", rel.target),
        RelationshipDirection::In => format!("(:{source})<-{edge}-(:{})", rel.target),
        RelationshipDirection::Undirected => format!("(:{source})-{edge}-(:{})", rel.target),
    };
    let names = &rel.names;
    RelationshipSurface {
        field: field.name.clone(),
        pattern,
        connection_field: names.connection_field.clone(),
        connection_type: names.connection_type.clone(),
        relationship_type: names.relationship_type.clone(),
        inputs: vec![
            names.connection_where.clone(),
            names.create_field_input.clone(),
            names.connect_field_input.clone(),
            names.connect_or_create_field_input.clone(),
            names.update_field_input.clone(),
            names.disconnect_field_input.clone(),
            names.delete_field_input.clone(),
        ],
    }
}

fn read_fields(names: &EntityNames) -> Vec<String> {
    vec![
        names.read.clone(),
        names.connection.clone(),
        names.aggregate.clone(),
    ]
}

/// One entry per node, implemented interface and union, in declaration
/// order.
pub fn schema_surface(schema: &SchemaModel) -> Vec<EntitySurface> {
    let mut out = Vec::new();
    for node in schema.nodes.values() {
        let names = &node.names;
        out.push(EntitySurface {
            name: node.name.clone(),
            kind: EntityKind::Node,
            queries: read_fields(names),
            mutations: vec![
                names.create.clone(),
                names.update.clone(),
                names.delete.clone(),
            ],
            inputs: vec![
                names.where_input.clone(),
                names.create_input.clone(),
                names.update_input.clone(),
                names.connect_input.clone(),
                names.disconnect_input.clone(),
                names.delete_input.clone(),
                names.options.clone(),
                names.sort.clone(),
            ],
            types: vec![
                names.connection_type.clone(),
                names.edge_type.clone(),
                names.aggregate_selection.clone(),
                names.create_response.clone(),
                names.update_response.clone(),
            ],
            relationships: node
                .fields
                .values()
                .filter_map(|field| {
                    field
                        .as_relationship()
                        .map(|rel| relationship_surface(&node.name, field, rel))
                })
                .collect(),
        });
    }
    for interface in schema.interfaces.values() {
        // Interfaces nothing implements get no root fields.
        if interface.implementations.is_empty() {
            continue;
        }
        let names = &interface.names;
        out.push(EntitySurface {
            name: interface.name.clone(),
            kind: EntityKind::Interface,
            queries: read_fields(names),
            mutations: Vec::new(),
            inputs: vec![
                names.where_input.clone(),
                names.options.clone(),
                names.sort.clone(),
            ],
            types: vec![
                names.connection_type.clone(),
                names.edge_type.clone(),
                names.aggregate_selection.clone(),
            ],
            relationships: Vec::new(),
        });
    }
    for union in schema.unions.values() {
        out.push(EntitySurface {
            name: union.name.clone(),
            kind: EntityKind::Union,
            queries: vec![union.names.read.clone()],
            mutations: Vec::new(),
            inputs: vec![union.names.where_input.clone()],
            types: Vec::new(),
            relationships: Vec::new(),
        });
    }
    out
}

fn write_list(report: &mut String, label: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    report.push_str(&format!("  {label}: {}\n", items.join(", ")));
}

pub fn write_surface_report(surface: &[EntitySurface]) -> String {
    let mut report = String::from("Generated surface:\n");
    for entity in surface {
        let kind = match entity.kind {
            EntityKind::Node => "node",
            EntityKind::Interface => "interface",
            EntityKind::Union => "union",
        };
        report.push_str(&format!("{} ({kind})\n", entity.name));
        write_list(&mut report, "queries", &entity.queries);
        write_list(&mut report, "mutations", &entity.mutations);
        write_list(&mut report, "inputs", &entity.inputs);
        write_list(&mut report, "types", &entity.types);
        for rel in &entity.relationships {
            report.push_str(&format!(
                "  {}: {} ({}, {})\n",
                rel.field, rel.pattern, rel.connection_type, rel.relationship_type
            ));
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use theseus_core::config::Config;
    use theseus_core::schema::SchemaDocument;

    fn schema() -> SchemaModel {
        let document: SchemaDocument = serde_json::from_value(json!({
            "nodes": [
                {
                    "name": "Movie",
                    "implements": ["Production"],
                    "fields": [
                        {"name": "title", "type": "String"},
                        {"name": "actors", "type": "Actor", "list": true,
                         "relationship": {"type": "ACTED_IN", "direction": "IN"}}
                    ]
                },
                {"name": "Actor", "fields": [{"name": "name", "type": "String"}]}
            ],
            "interfaces": [
                {"name": "Production", "fields": [{"name": "title", "type": "String"}]},
                {"name": "Orphan", "fields": [{"name": "title", "type": "String"}]}
            ],
            "unions": [{"name": "Searchable", "types": ["Movie", "Actor"]}]
        }))
        .unwrap();
        SchemaModel::build(&document, &Config::default()).unwrap()
    }

    #[test]
    fn lists_generated_names_per_entity() {
        let surface = schema_surface(&schema());
        let names: Vec<&str> = surface.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Movie", "Actor", "Production", "Searchable"]);

        let movie = &surface[0];
        assert_eq!(movie.queries, vec!["movies", "moviesConnection", "moviesAggregate"]);
        assert_eq!(movie.mutations, vec!["createMovies", "updateMovies", "deleteMovies"]);
        assert_eq!(movie.relationships[0].pattern, "(:Movie)<-[:ACTED_IN]-(:Actor)");
        assert_eq!(movie.relationships[0].connection_type, "MovieActorsConnection");
        assert_eq!(surface[3].queries, vec!["searchables"]);
    }

    #[test]
    fn report_lists_each_entity() {
        let report = write_surface_report(&schema_surface(&schema()));
        assert!(report.starts_with("Generated surface:\nMovie (node)\n"));
        assert!(report.contains("  mutations: createMovies, updateMovies, deleteMovies\n"));
        assert!(report.contains(
            "  actors: (:Movie)<-[:ACTED_IN]-(:Actor) (MovieActorsConnection, MovieActorsRelationship)\n"
        ));
        assert!(report.contains("Searchable (union)\n  queries: searchables\n  inputs: SearchableWhere\n"));
        assert!(!report.contains("Orphan"));
    }
}
