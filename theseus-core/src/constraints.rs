//! Uniqueness constraints declared with `@unique` and `@id(unique: true)`.

use serde::Serialize;
use theseus_cypher::{escape_name, CypherStatement};
use tracing::info;

use crate::backend::{AccessMode, GraphBackend};
use crate::prelude::*;
use crate::schema::SchemaModel;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UniqueConstraint {
    pub name: String,
    pub label: String,
    pub property: String,
}

impl UniqueConstraint {
    pub fn statement(&self) -> CypherStatement {
        CypherStatement {
            text: format!(
                "CREATE CONSTRAINT {} IF NOT EXISTS FOR (n:{}) REQUIRE n.{} IS UNIQUE",
                escape_name(&self.name),
                escape_name(&self.label),
                escape_name(&self.property),
            ),
            ..CypherStatement::default()
        }
    }
}

/// One constraint per unique field, on the type's main label.
pub fn unique_constraints(schema: &SchemaModel) -> Vec<UniqueConstraint> {
    let mut constraints = Vec::new();
    for node in schema.nodes.values() {
        let label = node.main_label();
        for (_, primitive) in node.unique_fields() {
            constraints.push(UniqueConstraint {
                name: primitive
                    .unique
                    .clone()
                    .unwrap_or_else(|| format!("{}_{}", node.name, primitive.db_property)),
                label: label.to_string(),
                property: primitive.db_property.clone(),
            });
        }
    }
    constraints
}

/// Creates every missing uniqueness constraint.
pub async fn assert_constraints(backend: &dyn GraphBackend, schema: &SchemaModel) -> Result<()> {
    for constraint in unique_constraints(schema) {
        info!(
            label = %constraint.label,
            property = %constraint.property,
            "asserting unique constraint"
        );
        backend.execute(constraint.statement(), AccessMode::Write).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::schema::SchemaDocument;
    use serde_json::json;

    #[test]
    fn unique_fields_become_constraints() {
        let document: SchemaDocument = serde_json::from_value(json!({
            "nodes": [{
                "name": "Movie",
                "fields": [
                    {"name": "id", "type": "ID", "required": true, "id": {"autogenerate": true}},
                    {"name": "isan", "type": "String", "unique": {"constraintName": "movie_isan"}},
                    {"name": "title", "type": "String"}
                ]
            }]
        }))
        .unwrap();
        let schema = SchemaModel::build(&document, &Config::default()).unwrap();
        let constraints = unique_constraints(&schema);
        assert_eq!(constraints.len(), 2);
        assert_eq!(constraints[0].name, "Movie_id");
        assert_eq!(
            constraints[1].statement().text,
            "CREATE CONSTRAINT movie_isan IF NOT EXISTS FOR (n:Movie) REQUIRE n.isan IS UNIQUE"
        );
    }
}
