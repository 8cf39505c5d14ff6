mod common;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::FutureExt;
use pretty_assertions::assert_eq;
use serde_json::{json, Map, Value};
use theseus_core::backend::{AccessMode, GraphBackend};
use theseus_core::claims::AuthContext;
use theseus_core::config::Config;
use theseus_core::engine::Engine;
use theseus_core::errors::TheseusError;
use theseus_core::operation::{GraphQLRequest, ResolveTree};
use theseus_core::schema::OperationKind;
use theseus_core::translate::encode_cursor;
use theseus_cypher::CypherStatement;

/// Records every statement and answers with queued rows.
#[derive(Debug, Default)]
struct RecordingBackend {
    executed: Mutex<Vec<(CypherStatement, AccessMode)>>,
    replies: Mutex<VecDeque<theseus_core::Result<Vec<Value>>>>,
}

impl RecordingBackend {
    fn replying(replies: Vec<theseus_core::Result<Vec<Value>>>) -> Arc<Self> {
        Arc::new(Self {
            executed: Mutex::new(Vec::new()),
            replies: Mutex::new(replies.into()),
        })
    }

    fn executed(&self) -> Vec<(CypherStatement, AccessMode)> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl GraphBackend for RecordingBackend {
    async fn execute(
        &self,
        statement: CypherStatement,
        mode: AccessMode,
    ) -> theseus_core::Result<Vec<Value>> {
        self.executed.lock().unwrap().push((statement, mode));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn shutdown(&self) {}
}

fn engine(backend: Arc<RecordingBackend>) -> Engine {
    Engine::new(
        Arc::new(common::schema()),
        Arc::new(Config::default()),
        backend,
    )
}

fn request(operation: OperationKind, fields: Vec<ResolveTree>) -> GraphQLRequest {
    GraphQLRequest {
        operation,
        fields,
        auth: AuthContext::anonymous(),
    }
}

#[tokio::test]
async fn reads_are_shaped_into_the_selection() {
    let backend = RecordingBackend::replying(vec![Ok(vec![
        json!({"this": {"title": "Arrival", "__sort_title": "Arrival"}}),
        json!({"this": {"title": "Heat"}}),
    ])]);
    let engine = engine(backend.clone());
    let tree = common::select("movies", "Movie", &["title"]).with_alias("films");
    let response = engine
        .execute(&request(OperationKind::Query, vec![tree]))
        .await;

    assert!(response.errors.is_empty());
    assert_eq!(
        Value::Object(response.data),
        json!({"films": [{"title": "Arrival"}, {"title": "Heat"}]})
    );
    let executed = backend.executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].1, AccessMode::Read);
}

#[tokio::test]
async fn connections_get_cursors_and_page_info() {
    let backend = RecordingBackend::replying(vec![Ok(vec![json!({"this": {
        "totalCount": 5,
        "edges": [{"node": {"title": "A"}}, {"node": {"title": "B"}}]
    }})])]);
    let engine = engine(backend);
    let tree = ResolveTree::new("moviesConnection")
        .with_args(json!({"first": 2}))
        .with_fields(
            "MoviesConnection",
            vec![
                ResolveTree::new("totalCount"),
                ResolveTree::new("pageInfo").with_fields(
                    "PageInfo",
                    vec![
                        ResolveTree::new("hasNextPage"),
                        ResolveTree::new("hasPreviousPage"),
                    ],
                ),
                ResolveTree::new("edges").with_fields(
                    "MovieEdge",
                    vec![
                        ResolveTree::new("cursor"),
                        ResolveTree::new("node").with_fields("Movie", vec![ResolveTree::new("title")]),
                    ],
                ),
            ],
        );
    let value = engine
        .resolve_field(OperationKind::Query, &tree, &AuthContext::anonymous())
        .await
        .unwrap();
    assert_eq!(
        value,
        json!({
            "totalCount": 5,
            "pageInfo": {"hasNextPage": true, "hasPreviousPage": false},
            "edges": [
                {"cursor": encode_cursor(0), "node": {"title": "A"}},
                {"cursor": encode_cursor(1), "node": {"title": "B"}}
            ]
        })
    );
}

fn paged_movies(args: Value) -> ResolveTree {
    ResolveTree::new("moviesConnection").with_args(args).with_fields(
        "MoviesConnection",
        vec![
            ResolveTree::new("pageInfo").with_fields(
                "PageInfo",
                vec![
                    ResolveTree::new("hasNextPage"),
                    ResolveTree::new("hasPreviousPage"),
                    ResolveTree::new("endCursor"),
                ],
            ),
            ResolveTree::new("edges").with_fields(
                "MovieEdge",
                vec![
                    ResolveTree::new("cursor"),
                    ResolveTree::new("node").with_fields("Movie", vec![ResolveTree::new("title")]),
                ],
            ),
        ],
    )
}

fn page(titles: &[&str]) -> theseus_core::Result<Vec<Value>> {
    let edges: Vec<Value> = titles
        .iter()
        .map(|title| json!({"node": {"title": title}}))
        .collect();
    Ok(vec![json!({"this": {"totalCount": 5, "edges": edges}})])
}

#[tokio::test]
async fn end_cursor_continues_without_overlap() {
    let backend = RecordingBackend::replying(vec![page(&["A", "B"]), page(&["C", "D"])]);
    let engine = engine(backend.clone());
    let auth = AuthContext::anonymous();

    let first = engine
        .resolve_field(OperationKind::Query, &paged_movies(json!({"first": 2})), &auth)
        .await
        .unwrap();
    let end_cursor = first["pageInfo"]["endCursor"].clone();
    assert_eq!(end_cursor, json!(encode_cursor(1)));
    assert_eq!(first["pageInfo"]["hasPreviousPage"], json!(false));

    let second = engine
        .resolve_field(
            OperationKind::Query,
            &paged_movies(json!({"first": 2, "after": end_cursor})),
            &auth,
        )
        .await
        .unwrap();
    assert_eq!(
        second,
        json!({
            "pageInfo": {
                "hasNextPage": true,
                "hasPreviousPage": true,
                "endCursor": encode_cursor(3)
            },
            "edges": [
                {"cursor": encode_cursor(2), "node": {"title": "C"}},
                {"cursor": encode_cursor(3), "node": {"title": "D"}}
            ]
        })
    );

    let executed = backend.executed();
    assert_eq!(executed.len(), 2);
    assert!(!executed[0].0.text.contains("SKIP"), "{}", executed[0].0.text);
    assert_eq!(executed[1].0.params["param0"], json!(2));
}

#[tokio::test]
async fn abstract_results_resolve_their_concrete_type() {
    let backend = RecordingBackend::replying(vec![Ok(vec![
        json!({"this": {"__typename": "Movie", "title": "Heat"}}),
        json!({"this": {"__typename": "Series", "title": "Dark", "episodes": 26}}),
    ])]);
    let engine = engine(backend);
    let tree = ResolveTree::new("productions")
        .with_fields(
            "Production",
            vec![ResolveTree::new("__typename"), ResolveTree::new("title")],
        )
        .with_fields("Series", vec![ResolveTree::new("episodes")]);
    let value = engine
        .resolve_field(OperationKind::Query, &tree, &AuthContext::anonymous())
        .await
        .unwrap();
    assert_eq!(
        value,
        json!([
            {"__typename": "Movie", "title": "Heat"},
            {"__typename": "Series", "title": "Dark", "episodes": 26}
        ])
    );
}

#[tokio::test]
async fn mutation_fields_run_in_order_and_fail_independently() {
    let backend = RecordingBackend::replying(vec![
        Err(TheseusError::from_database_message(
            "Failed to invoke procedure: Forbidden",
        )),
        Ok(vec![json!({"nodesDeleted": 2, "relationshipsDeleted": 3})]),
    ]);
    let engine = engine(backend.clone());
    let create = ResolveTree::new("createMovies")
        .with_args(json!({"input": [{"title": "A"}]}))
        .with_fields(
            "CreateMoviesMutationResponse",
            vec![ResolveTree::new("movies").with_fields("Movie", vec![ResolveTree::new("title")])],
        );
    let delete = ResolveTree::new("deleteMovies").with_fields(
        "DeleteInfo",
        vec![ResolveTree::new("nodesDeleted"), ResolveTree::new("relationshipsDeleted")],
    );
    let response = engine
        .execute(&request(OperationKind::Mutation, vec![create, delete]))
        .await;

    assert_eq!(response.data["createMovies"], Value::Null);
    assert_eq!(
        response.data["deleteMovies"],
        json!({"nodesDeleted": 2, "relationshipsDeleted": 3})
    );
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].message, "Forbidden");
    assert_eq!(response.errors[0].path, vec!["createMovies".to_string()]);
    assert_eq!(response.errors[0].extensions.code, "FORBIDDEN");

    let executed = backend.executed();
    assert_eq!(executed.len(), 2);
    assert!(executed[0].0.text.contains("CREATE (this0:Movie)"));
    assert!(executed[1].0.text.contains("DETACH DELETE"));
    assert!(executed.iter().all(|(_, mode)| *mode == AccessMode::Write));
}

#[tokio::test]
async fn compile_errors_never_reach_the_backend() {
    let backend = RecordingBackend::replying(Vec::new());
    let engine = engine(backend.clone());
    let tree = common::select("movies", "Movie", &["title"])
        .with_args(json!({"where": {"budget_GT": 1}}));
    let response = engine
        .execute(&request(OperationKind::Query, vec![tree]))
        .await;
    assert_eq!(response.data["movies"], Value::Null);
    assert_eq!(response.errors[0].extensions.code, "BAD_USER_INPUT");
    assert!(backend.executed().is_empty());
}

#[tokio::test]
async fn root_resolvers_replace_translation() {
    let backend = RecordingBackend::replying(Vec::new());
    let engine = engine(backend.clone()).with_root_resolver(
        OperationKind::Query,
        "movies",
        Arc::new(|_: ResolveTree, _: AuthContext| {
            async { Ok::<_, TheseusError>(json!([{"title": "Custom"}])) }.boxed()
        }),
    );
    let tree = common::select("movies", "Movie", &["title"]);
    let value = engine
        .resolve_field(OperationKind::Query, &tree, &AuthContext::anonymous())
        .await
        .unwrap();
    assert_eq!(value, json!([{"title": "Custom"}]));
    assert!(backend.executed().is_empty());
}

#[tokio::test]
async fn field_resolvers_see_the_projected_parent() {
    let backend = RecordingBackend::replying(vec![Ok(vec![json!({"this": {"title": "heat"}})])]);
    let engine = engine(backend).with_field_resolver(
        "Movie",
        "title",
        Arc::new(|parent: &Map<String, Value>, _: &ResolveTree, _: &AuthContext| {
            Ok::<_, TheseusError>(parent
                .get("title")
                .and_then(Value::as_str)
                .map(str::to_uppercase)
                .into())
        }),
    );
    let tree = common::select("movies", "Movie", &["title"]);
    let value = engine
        .resolve_field(OperationKind::Query, &tree, &AuthContext::anonymous())
        .await
        .unwrap();
    assert_eq!(value, json!([{"title": "HEAT"}]));
}
