pub(crate) mod actor;
pub mod memgraph;
pub mod memgraph_async;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use strum_macros::Display;
use theseus_cypher::CypherStatement;

use crate::prelude::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[strum(serialize_all = "lowercase")]
pub enum AccessMode {
    Read,
    Write,
}

/// Runs one generated statement inside its own transaction and returns the
/// rows as JSON objects keyed by column name.
#[async_trait]
pub trait GraphBackend: Send + Sync + std::fmt::Debug {
    async fn execute(&self, statement: CypherStatement, mode: AccessMode) -> Result<Vec<Value>>;
    async fn shutdown(&self);
}
