mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use theseus_core::backend::memgraph_async::MemgraphAsync;
use theseus_core::backend::{AccessMode, GraphBackend};
use theseus_core::config::Config;
use theseus_core::constraints::{assert_constraints, unique_constraints};
use theseus_core::engine::Engine;
use theseus_core::operation::GraphQLRequest;
use theseus_core::schema::{SchemaDocument, SchemaModel};
use theseus_core::translate::translate;
use theseus_cypher::CypherStatement;
use theseus_tools::logger;
use theseus_tools::{schema_surface, write_surface_report};

use crate::error::CliResult;

#[derive(Parser, Debug)]
#[command(name = "theseus-cli")]
#[command(about = "Compile GraphQL operations into Cypher and run them on Memgraph", long_about = None)]
struct Cli {
    /// Type definitions, JSON or TOML.
    #[arg(long, env = "THESEUS_SCHEMA")]
    schema: PathBuf,
    #[arg(long, env = "THESEUS_CONFIG")]
    config: Option<PathBuf>,
    /// Overrides `[backend] url` from the config file.
    #[arg(long, env = "GRAPH_URL")]
    graph_url: Option<String>,
    #[arg(long, env = "THESEUS_LOG_LEVEL", default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the statement compiled for every root field of a request.
    Translate {
        #[arg(long)]
        request: PathBuf,
    },
    /// Run a request against the graph and print the GraphQL response.
    Execute {
        #[arg(long)]
        request: PathBuf,
    },
    /// Print the generated root fields, inputs and types.
    Surface {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print the uniqueness constraints, or create them with `--apply`.
    Constraints {
        #[arg(long, default_value_t = false)]
        apply: bool,
    },
}

#[derive(Serialize)]
struct TranslatedField {
    field: String,
    mode: AccessMode,
    #[serde(flatten)]
    statement: CypherStatement,
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    logger::setup(&["theseus_cli", "theseus_core"], &cli.log_level);

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(url) = &cli.graph_url {
        config.backend.url = url.clone();
    }
    let document = SchemaDocument::load(&cli.schema)?;
    let schema = SchemaModel::build(&document, &config)?;
    info!(
        nodes = schema.nodes.len(),
        interfaces = schema.interfaces.len(),
        unions = schema.unions.len(),
        "schema compiled from {}",
        cli.schema.display()
    );

    match cli.command {
        Command::Translate { request } => {
            let request = read_request(&request)?;
            let mut translated = Vec::with_capacity(request.fields.len());
            for tree in &request.fields {
                let translation =
                    translate(&schema, &config, &request.auth, request.operation, tree)?;
                translated.push(TranslatedField {
                    field: tree.response_key().to_string(),
                    mode: translation.mode,
                    statement: translation.statement,
                });
            }
            println!("{}", serde_json::to_string_pretty(&translated)?);
        }
        Command::Execute { request } => {
            let request = read_request(&request)?;
            let runtime = runtime()?;
            let backend: Arc<dyn GraphBackend> =
                Arc::new(MemgraphAsync::try_new_from_url(&config.backend.url)?);
            let engine = Engine::new(Arc::new(schema), Arc::new(config), backend);
            let response = runtime.block_on(async {
                let response = engine.execute(&request).await;
                engine.shutdown().await;
                response
            });
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Surface { json } => {
            let surface = schema_surface(&schema);
            if json {
                println!("{}", serde_json::to_string_pretty(&surface)?);
            } else {
                print!("{}", write_surface_report(&surface));
            }
        }
        Command::Constraints { apply } => {
            if !apply {
                for constraint in unique_constraints(&schema) {
                    println!("{};", constraint.statement().text);
                }
                return Ok(());
            }
            let runtime = runtime()?;
            let backend = MemgraphAsync::try_new_from_url(&config.backend.url)?;
            runtime.block_on(async {
                let result = assert_constraints(&backend, &schema).await;
                backend.shutdown().await;
                result
            })?;
        }
    }
    Ok(())
}

fn runtime() -> CliResult<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

fn read_request(path: &Path) -> CliResult<GraphQLRequest> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
