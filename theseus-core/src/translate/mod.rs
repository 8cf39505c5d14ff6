//! Compilation of one root field of a GraphQL operation into a single Cypher
//! statement.

mod aggregate;
mod auth;
mod connect;
mod connection;
mod context;
mod create;
mod cypher_field;
mod delete;
mod filter;
mod options;
mod projection;
mod read;
mod update;
mod write;

use serde::Serialize;
use serde_json::Value;
use theseus_cypher::{
    validate_statement, CypherStatement, Expr, NodePattern, Pattern, RelationshipDetail, Statement,
    ValidationMode,
};
use tracing::debug;

pub use connection::{decode_cursor, encode_cursor, ConnectionWindow};

use crate::backend::AccessMode;
use crate::claims::AuthContext;
use crate::config::Config;
use crate::operation::ResolveTree;
use crate::prelude::*;
use crate::schema::{
    OperationKind, PrimitiveField, RelationshipDirection, RelationshipField, RootField,
    SchemaModel,
};
use context::Context;

/// How the rows returned by a statement map onto the field's value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ResultShape {
    /// One row per object, projected map in column `this`.
    Read { type_name: String },
    /// One row, `{ edges, totalCount }` in column `this`.
    Connection { type_name: String },
    /// One row, aggregation map keyed by response keys in column `this`.
    Aggregate { type_name: String },
    /// Rows of `this`; objects of `type_name` or scalars.
    Cypher {
        type_name: String,
        list: bool,
        scalar: bool,
    },
    /// One row, projected objects in column `data`.
    Create { type_name: String },
    Update { type_name: String },
    /// One row with `nodesDeleted` and `relationshipsDeleted`.
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub statement: CypherStatement,
    pub shape: ResultShape,
    pub mode: AccessMode,
}

/// Compiles a root field and checks the statement before it is handed to a
/// backend. The same inputs always produce the same text and parameters.
pub fn translate(
    schema: &SchemaModel,
    config: &Config,
    auth: &AuthContext,
    operation: OperationKind,
    tree: &ResolveTree,
) -> Result<Translation> {
    let root = schema.root_field(operation, &tree.name).ok_or_else(|| {
        TheseusError::validation(format!("Unknown {operation} field {}", tree.name))
    })?;
    let mut cx = Context::new(schema, config, auth);
    let (clauses, shape, mode) = match root {
        RootField::Read(name) => (
            read::read(&mut cx, name, tree)?,
            ResultShape::Read {
                type_name: name.clone(),
            },
            AccessMode::Read,
        ),
        RootField::Connection(name) => (
            read::connection(&mut cx, name, tree)?,
            ResultShape::Connection {
                type_name: name.clone(),
            },
            AccessMode::Read,
        ),
        RootField::Aggregate(name) => (
            read::aggregate(&mut cx, name, tree)?,
            ResultShape::Aggregate {
                type_name: name.clone(),
            },
            AccessMode::Read,
        ),
        RootField::Cypher(name) => {
            let field = match operation {
                OperationKind::Query => schema.queries.get(name),
                OperationKind::Mutation => schema.mutations.get(name),
            }
            .ok_or_else(|| TheseusError::schema(format!("Unknown {operation} field {name}")))?;
            let mode = match operation {
                OperationKind::Query => AccessMode::Read,
                OperationKind::Mutation => AccessMode::Write,
            };
            let (clauses, scalar) = read::cypher(&mut cx, field, tree)?;
            (
                clauses,
                ResultShape::Cypher {
                    type_name: field.type_ref.name.clone(),
                    list: field.type_ref.list,
                    scalar,
                },
                mode,
            )
        }
        RootField::Create(name) => (
            create::create(&mut cx, name, tree)?,
            ResultShape::Create {
                type_name: name.clone(),
            },
            AccessMode::Write,
        ),
        RootField::Update(name) => (
            update::update(&mut cx, name, tree)?,
            ResultShape::Update {
                type_name: name.clone(),
            },
            AccessMode::Write,
        ),
        RootField::Delete(name) => (
            delete::delete(&mut cx, name, tree)?,
            ResultShape::Delete,
            AccessMode::Write,
        ),
    };
    let ast = Statement::new(clauses);
    let statement = cx.env.finish(&ast);
    let validation = match mode {
        AccessMode::Read => ValidationMode::ReadOnly,
        AccessMode::Write => ValidationMode::ReadWrite,
    };
    validate_statement(&ast, &statement.params, validation)?;
    debug!(
        field = %tree.name,
        params = statement.params.len(),
        "compiled statement:\n{}",
        statement.text
    );
    Ok(Translation {
        statement,
        shape,
        mode,
    })
}

/// Reads a primitive field's graph property, applying `@coalesce`.
pub(crate) fn property(var: &str, field: &PrimitiveField) -> Expr {
    let read = Expr::var(var).property(&field.db_property);
    match &field.coalesce {
        Some(value) => Expr::call("coalesce", vec![read, literal(value)]),
        None => read,
    }
}

/// Inline Cypher literal for schema-declared values.
pub(crate) fn literal(value: &Value) -> Expr {
    match value {
        Value::Null => Expr::null(),
        Value::Bool(b) => Expr::bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Expr::int(i),
            None => Expr::float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => Expr::string(s),
        Value::Array(items) => Expr::list(items.iter().map(literal).collect()),
        Value::Object(map) => Expr::map(
            map.iter()
                .map(|(key, value)| (key.clone(), literal(value)))
                .collect(),
        ),
    }
}

/// `(source)-[rel_var:TYPE]->(target)` in the given direction.
pub(crate) fn traversal(
    source: &str,
    rel: &RelationshipField,
    rel_var: Option<String>,
    target: NodePattern,
    direction: RelationshipDirection,
) -> Pattern {
    Pattern::relationship(
        NodePattern::named(source),
        RelationshipDetail::new(rel_var, &rel.rel_type, direction.as_cypher()),
        target,
    )
}
