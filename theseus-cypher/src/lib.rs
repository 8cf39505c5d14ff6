mod ast;
mod env;
mod render;
mod validate;

pub use ast::*;
pub use env::{CypherStatement, Environment};
pub use render::{escape_name, render_clauses};
pub use validate::{validate_statement, ValidationMode};

use thiserror::Error;
use tree_sitter::{Parser, Tree};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Cypher parser failed to initialize")]
    Language,
    #[error("Cypher parse returned no tree")]
    ParseFailed,
    #[error("Cypher syntax error at {row}:{column}")]
    Syntax { row: usize, column: usize },
}

#[derive(Debug, Error)]
pub enum CypherError {
    #[error("{0}")]
    Parse(#[from] ParseError),
    #[error("Semantic error: {message}")]
    Semantic { message: String },
    #[error("Parameter ${name} is referenced but not bound")]
    UnboundParameter { name: String },
}

impl CypherError {
    pub(crate) fn semantic(message: impl Into<String>) -> Self {
        CypherError::Semantic {
            message: message.into(),
        }
    }
}

pub fn parse_cypher(input: &str) -> Result<Tree, ParseError> {
    let mut parser = Parser::new();
    let language = tree_sitter::Language::new(tree_sitter_cypher::LANGUAGE);
    parser
        .set_language(&language)
        .map_err(|_| ParseError::Language)?;
    let tree = parser.parse(input, None).ok_or(ParseError::ParseFailed)?;
    let root = tree.root_node();
    if root.has_error() {
        let position = first_error(root).unwrap_or_else(|| root.start_position());
        return Err(ParseError::Syntax {
            row: position.row + 1,
            column: position.column + 1,
        });
    }
    Ok(tree)
}

/// Lints user-supplied statement templates. Only syntax is checked.
pub fn check_syntax(input: &str) -> Result<(), ParseError> {
    parse_cypher(input).map(|_| ())
}

fn first_error(node: tree_sitter::Node<'_>) -> Option<tree_sitter::Point> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_position());
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() {
            if let Some(point) = first_error(child) {
                return Some(point);
            }
        }
    }
    None
}
