use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use theseus_cypher::CypherStatement;
use tokio::sync::oneshot;
use tracing::{error, info};

use super::AccessMode;
use crate::prelude::*;

/// Blocking connection owned by the actor thread.
pub(crate) trait GraphConnection {
    fn run(&mut self, statement: &CypherStatement, mode: AccessMode) -> Result<Vec<Value>>;
}

enum Command {
    Run {
        statement: CypherStatement,
        mode: AccessMode,
        resp: oneshot::Sender<Result<Vec<Value>>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Serialises access to a blocking connection through a dedicated thread.
#[derive(Debug, Clone)]
pub(crate) struct GraphActor {
    tx: Sender<Command>,
    label: &'static str,
}

impl GraphActor {
    pub(crate) fn spawn<C, F>(label: &'static str, connect_fn: F) -> Result<Self>
    where
        C: GraphConnection,
        F: FnOnce() -> Result<C> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Command>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        thread::Builder::new()
            .name(format!("{label}-actor"))
            .spawn(move || {
                let mut connection = match connect_fn() {
                    Ok(connection) => connection,
                    Err(err) => {
                        error!("{label}: failed to connect: {err:?}");
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        Command::Run {
                            statement,
                            mode,
                            resp,
                        } => {
                            let started = Instant::now();
                            let res = connection.run(&statement, mode);
                            let elapsed_ms = started.elapsed().as_millis();
                            info!(
                                "{label}: {mode} statement ({elapsed_ms} ms, {} params)",
                                statement.params.len()
                            );
                            if let Err(err) = &res {
                                error!("{label}: statement failed: {err}");
                            }
                            let _ = resp.send(res);
                        }
                        Command::Shutdown { resp } => {
                            let _ = resp.send(());
                            break;
                        }
                    }
                }
            })
            .map_err(|e| std::io::Error::other(format!("Failed to spawn {label} actor: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { tx, label }),
            Ok(Err(err)) => Err(err),
            Err(err) => Err(std::io::Error::other(format!(
                "{label} actor failed to signal readiness: {err}"
            ))
            .into()),
        }
    }

    pub(crate) async fn run(
        &self,
        statement: CypherStatement,
        mode: AccessMode,
    ) -> Result<Vec<Value>> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(Command::Run {
                statement,
                mode,
                resp: resp_tx,
            })
            .map_err(|e| {
                std::io::Error::other(format!(
                    "{label} actor is not available: {e}",
                    label = self.label
                ))
            })?;
        resp_rx.await.map_err(|e| {
            std::io::Error::other(format!(
                "{label} actor response dropped: {e}",
                label = self.label
            ))
        })?
    }

    pub(crate) async fn shutdown(&self) {
        let (resp_tx, resp_rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown { resp: resp_tx }).is_ok() {
            let _ = tokio::time::timeout(Duration::from_secs(5), resp_rx).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorded {
        statements: Vec<(String, AccessMode)>,
    }

    struct TestConnection {
        recorded: Arc<Mutex<Recorded>>,
        fail: bool,
    }

    impl GraphConnection for TestConnection {
        fn run(&mut self, statement: &CypherStatement, mode: AccessMode) -> Result<Vec<Value>> {
            if self.fail {
                return Err(TheseusError::from_database_message("Forbidden"));
            }
            self.recorded
                .lock()
                .unwrap()
                .statements
                .push((statement.text.clone(), mode));
            Ok(vec![json!({ "this": { "title": "The Matrix" } })])
        }
    }

    fn statement(text: &str) -> CypherStatement {
        CypherStatement {
            text: text.to_string(),
            ..CypherStatement::default()
        }
    }

    fn spawn(fail: bool) -> (GraphActor, Arc<Mutex<Recorded>>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let shared = recorded.clone();
        let actor = GraphActor::spawn("test", move || {
            Ok(TestConnection {
                recorded: shared,
                fail,
            })
        })
        .unwrap();
        (actor, recorded)
    }

    #[tokio::test]
    async fn actor_runs_statements_in_order() {
        let (actor, recorded) = spawn(false);
        let rows = actor
            .run(statement("MATCH (this:Movie) RETURN this"), AccessMode::Read)
            .await
            .unwrap();
        assert_eq!(rows, vec![json!({ "this": { "title": "The Matrix" } })]);
        actor
            .run(statement("CREATE (this0:Movie) RETURN this0"), AccessMode::Write)
            .await
            .unwrap();
        actor.shutdown().await;

        let recorded = recorded.lock().unwrap();
        assert_eq!(
            recorded.statements,
            vec![
                ("MATCH (this:Movie) RETURN this".to_string(), AccessMode::Read),
                ("CREATE (this0:Movie) RETURN this0".to_string(), AccessMode::Write),
            ]
        );
    }

    #[tokio::test]
    async fn actor_propagates_statement_errors() {
        let (actor, _) = spawn(true);
        let err = actor
            .run(statement("MATCH (n) RETURN n"), AccessMode::Read)
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Forbidden));
    }

    #[tokio::test]
    async fn actor_rejects_after_shutdown() {
        let (actor, _) = spawn(false);
        actor.shutdown().await;
        assert!(actor
            .run(statement("MATCH (n) RETURN n"), AccessMode::Read)
            .await
            .is_err());
    }

    #[test]
    fn actor_reports_connect_failures() {
        let actor = GraphActor::spawn::<TestConnection, _>("test", move || {
            Err(std::io::Error::other("connect failed").into())
        });
        assert!(actor.is_err());
    }
}
