#![allow(dead_code)]

use serde_json::Value;
use theseus_core::claims::AuthContext;
use theseus_core::config::Config;
use theseus_core::operation::ResolveTree;
use theseus_core::schema::{OperationKind, SchemaDocument, SchemaModel};
use theseus_core::translate::{translate, Translation};
use theseus_core::Result;

pub const MOVIES: &str = include_str!("../fixtures/movies.json");

pub fn document() -> SchemaDocument {
    SchemaDocument::from_json_str(MOVIES).expect("fixture schema parses")
}

pub fn schema() -> SchemaModel {
    SchemaModel::build(&document(), &Config::default()).expect("fixture schema builds")
}

pub fn compile(
    operation: OperationKind,
    tree: &ResolveTree,
    auth: &AuthContext,
) -> Result<Translation> {
    translate(&schema(), &Config::default(), auth, operation, tree)
}

pub fn query(tree: &ResolveTree) -> Translation {
    compile(OperationKind::Query, tree, &AuthContext::anonymous()).expect("query compiles")
}

pub fn mutation(tree: &ResolveTree, auth: &AuthContext) -> Result<Translation> {
    compile(OperationKind::Mutation, tree, auth)
}

/// Selection of plain fields under one type condition.
pub fn select(name: &str, type_name: &str, fields: &[&str]) -> ResolveTree {
    ResolveTree::new(name).with_fields(
        type_name,
        fields.iter().map(|field| ResolveTree::new(*field)).collect(),
    )
}

pub fn param<'t>(translation: &'t Translation, name: &str) -> &'t Value {
    translation
        .statement
        .params
        .get(name)
        .unwrap_or_else(|| panic!("missing parameter {name} in {:?}", translation.statement.params))
}
