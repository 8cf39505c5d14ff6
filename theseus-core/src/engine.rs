//! Resolves GraphQL operations: one compiled statement per root field,
//! executed on a [`GraphBackend`] and shaped into the response.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::{join_all, BoxFuture};
use serde_json::{Map, Value};
use tracing::{error, info};

use crate::backend::GraphBackend;
use crate::claims::AuthContext;
use crate::config::Config;
use crate::operation::{ErrorExtensions, GraphQLError, GraphQLRequest, GraphQLResponse, ResolveTree};
use crate::prelude::*;
use crate::result::{FieldResolver, FieldResolvers, Shaper};
use crate::schema::{OperationKind, SchemaModel};
use crate::translate::{translate, Translation};

/// Replaces translation for one root field (`Query.x` / `Mutation.x`).
pub type RootResolver =
    Arc<dyn Fn(ResolveTree, AuthContext) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

#[derive(Clone)]
pub struct Engine {
    schema: Arc<SchemaModel>,
    config: Arc<Config>,
    backend: Arc<dyn GraphBackend>,
    root_resolvers: HashMap<String, RootResolver>,
    field_resolvers: FieldResolvers,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("backend", &self.backend)
            .field("root_resolvers", &self.root_resolvers.keys().collect::<Vec<_>>())
            .field("field_resolvers", &self.field_resolvers.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn resolver_key(operation: OperationKind, field: &str) -> String {
    format!("{operation}.{field}")
}

impl Engine {
    pub fn new(schema: Arc<SchemaModel>, config: Arc<Config>, backend: Arc<dyn GraphBackend>) -> Self {
        Self {
            schema,
            config,
            backend,
            root_resolvers: HashMap::new(),
            field_resolvers: HashMap::new(),
        }
    }

    pub fn with_root_resolver(
        mut self,
        operation: OperationKind,
        field: &str,
        resolver: RootResolver,
    ) -> Self {
        self.root_resolvers
            .insert(resolver_key(operation, field), resolver);
        self
    }

    /// Registers a resolver for `Type.field`; it receives the projected
    /// parent object, including the fields the schema declares it requires.
    pub fn with_field_resolver(mut self, type_name: &str, field: &str, resolver: FieldResolver) -> Self {
        self.field_resolvers
            .insert(format!("{type_name}.{field}"), resolver);
        self
    }

    pub fn schema(&self) -> &SchemaModel {
        &self.schema
    }

    /// Compiles a root field without executing it.
    pub fn translate(
        &self,
        operation: OperationKind,
        tree: &ResolveTree,
        auth: &AuthContext,
    ) -> Result<Translation> {
        translate(&self.schema, &self.config, auth, operation, tree)
    }

    /// Resolves one root field to its GraphQL value.
    #[tracing::instrument(level = "debug", skip_all, fields(field = %tree.name))]
    pub async fn resolve_field(
        &self,
        operation: OperationKind,
        tree: &ResolveTree,
        auth: &AuthContext,
    ) -> Result<Value> {
        if let Some(resolver) = self.root_resolvers.get(&resolver_key(operation, &tree.name)) {
            return resolver(tree.clone(), auth.clone()).await;
        }
        let translation = self.translate(operation, tree, auth)?;
        let started = Instant::now();
        let rows = self
            .backend
            .execute(translation.statement, translation.mode)
            .await?;
        info!(
            field = %tree.name,
            rows = rows.len(),
            "executed in {} ms",
            started.elapsed().as_millis()
        );
        let shaper = Shaper {
            schema: &self.schema,
            config: &self.config,
            auth,
            resolvers: &self.field_resolvers,
        };
        shaper.shape(&translation.shape, tree, rows)
    }

    /// Resolves every root field of a request. Query fields run concurrently,
    /// mutation fields one after another. A failed field is `null` in `data`
    /// and reported in `errors`.
    pub async fn execute(&self, request: &GraphQLRequest) -> GraphQLResponse {
        let results = match request.operation {
            OperationKind::Query => {
                join_all(
                    request
                        .fields
                        .iter()
                        .map(|tree| self.resolve_field(request.operation, tree, &request.auth)),
                )
                .await
            }
            OperationKind::Mutation => {
                let mut results = Vec::with_capacity(request.fields.len());
                for tree in &request.fields {
                    results.push(
                        self.resolve_field(request.operation, tree, &request.auth)
                            .await,
                    );
                }
                results
            }
        };

        let mut response = GraphQLResponse {
            data: Map::new(),
            errors: Vec::new(),
        };
        for (tree, result) in request.fields.iter().zip(results) {
            let key = tree.response_key().to_string();
            match result {
                Ok(value) => {
                    response.data.insert(key, value);
                }
                Err(err) => {
                    error!(field = %tree.name, "field failed: {err}");
                    response.errors.push(GraphQLError {
                        message: err.to_string(),
                        path: vec![key.clone()],
                        extensions: ErrorExtensions {
                            code: err.code().to_string(),
                        },
                    });
                    response.data.insert(key, Value::Null);
                }
            }
        }
        response
    }

    pub async fn shutdown(&self) {
        self.backend.shutdown().await;
    }
}
