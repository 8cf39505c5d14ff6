use rsmgclient::ConnectParams;
use serde_json::Value;
use theseus_cypher::CypherStatement;

use super::actor::GraphActor;
use super::memgraph::Memgraph;
use super::{AccessMode, GraphBackend};
use crate::prelude::*;

/// Async handle for interacting with Memgraph via message passing.
#[derive(Clone, Debug)]
pub struct MemgraphAsync {
    actor: GraphActor,
}

impl MemgraphAsync {
    /// Start the actor by connecting from a URL.
    pub fn try_new_from_url(url: &str) -> Result<Self> {
        let url = url.to_string();
        Self::spawn_with(move || Memgraph::try_new_from_url(&url))
    }

    /// Start the actor by connecting from ConnectParams.
    pub fn try_new(params: ConnectParams) -> Result<Self> {
        let host = params.host;
        let port = params.port;
        let username = params.username;
        let password = params.password;
        let client_name = params.client_name;
        Self::spawn_with(move || {
            Memgraph::try_new(ConnectParams {
                host,
                port,
                username,
                password,
                client_name,
                ..Default::default()
            })
        })
    }

    fn spawn_with<F>(connect_fn: F) -> Result<Self>
    where
        F: FnOnce() -> Result<Memgraph> + Send + 'static,
    {
        let actor = GraphActor::spawn("memgraph", connect_fn)?;
        Ok(Self { actor })
    }
}

#[async_trait::async_trait]
impl GraphBackend for MemgraphAsync {
    async fn execute(&self, statement: CypherStatement, mode: AccessMode) -> Result<Vec<Value>> {
        self.actor.run(statement, mode).await
    }

    async fn shutdown(&self) {
        self.actor.shutdown().await
    }
}
