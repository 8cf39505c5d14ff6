mod common;

use common::{mutation, param};
use pretty_assertions::assert_eq;
use serde_json::json;
use theseus_core::backend::AccessMode;
use theseus_core::claims::AuthContext;
use theseus_core::errors::ErrorKind;
use theseus_core::operation::ResolveTree;

fn movies_response(fields: &[&str]) -> ResolveTree {
    ResolveTree::new("movies").with_fields(
        "Movie",
        fields.iter().map(|field| ResolveTree::new(*field)).collect(),
    )
}

fn update_movies(args: serde_json::Value) -> theseus_core::Result<String> {
    let tree = ResolveTree::new("updateMovies")
        .with_args(args)
        .with_fields("UpdateMoviesMutationResponse", vec![movies_response(&["title"])]);
    mutation(&tree, &AuthContext::anonymous()).map(|t| t.statement.text)
}

#[test]
fn create_sets_input_then_generated_values() {
    let tree = ResolveTree::new("createMovies")
        .with_args(json!({"input": [{"title": "Arrival"}]}))
        .with_fields("CreateMoviesMutationResponse", vec![movies_response(&["id", "title"])]);
    let translation = mutation(&tree, &AuthContext::anonymous()).unwrap();
    let text = &translation.statement.text;

    assert!(text.starts_with("CALL {\n    CREATE (this0:Movie)\n"), "{text}");
    assert!(
        text.contains("SET this0.title = $param0, this0.id = randomUUID()"),
        "{text}"
    );
    assert!(text.contains("UNWIND [this0] AS this"), "{text}");
    assert!(
        text.ends_with("WITH this { .id, .title } AS this\nRETURN collect(this) AS data"),
        "{text}"
    );
    assert_eq!(param(&translation, "param0"), &json!("Arrival"));
    assert_eq!(translation.mode, AccessMode::Write);
}

#[test]
fn each_input_is_created_in_its_own_subquery() {
    let tree = ResolveTree::new("createMovies")
        .with_args(json!({"input": [{"title": "A"}, {"title": "B"}]}))
        .with_fields("CreateMoviesMutationResponse", vec![movies_response(&["title"])]);
    let text = mutation(&tree, &AuthContext::anonymous()).unwrap().statement.text;
    assert!(text.contains("CREATE (this0:Movie)"), "{text}");
    assert!(text.contains("CREATE (this1:Movie)"), "{text}");
    assert!(text.contains("UNWIND [this0, this1] AS this"), "{text}");
}

#[test]
fn empty_create_returns_an_empty_list() {
    let tree = ResolveTree::new("createMovies")
        .with_args(json!({"input": []}))
        .with_fields("CreateMoviesMutationResponse", vec![movies_response(&["title"])]);
    let text = mutation(&tree, &AuthContext::anonymous()).unwrap().statement.text;
    assert_eq!(text, "RETURN [] AS data");
}

#[test]
fn generated_fields_cannot_be_written() {
    let tree = ResolveTree::new("createMovies")
        .with_args(json!({"input": [{"id": "m1", "title": "A"}]}))
        .with_fields("CreateMoviesMutationResponse", vec![movies_response(&["title"])]);
    let err = mutation(&tree, &AuthContext::anonymous()).unwrap_err();
    assert_eq!(err.code(), "BAD_USER_INPUT");
}

#[test]
fn nested_create_links_and_sets_edge_properties() {
    let tree = ResolveTree::new("createMovies")
        .with_args(json!({"input": [{
            "title": "The Matrix",
            "actors": {"create": [{"node": {"name": "Keanu"}, "edge": {"role": "Neo"}}]}
        }]}))
        .with_fields("CreateMoviesMutationResponse", vec![movies_response(&["title"])]);
    let text = mutation(&tree, &AuthContext::anonymous()).unwrap().statement.text;
    assert!(text.contains("CREATE (this1:Actor)"), "{text}");
    assert!(text.contains("[this2:ACTED_IN]"), "{text}");
    assert!(text.contains("SET this2.role = $param"), "{text}");
}

#[test]
fn arithmetic_and_assignment_are_exclusive() {
    let err = update_movies(json!({"update": {"viewers": 1, "viewers_INCREMENT": 1}})).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Validation(_)));
    assert_eq!(
        err.to_string(),
        "Cannot mutate the same field multiple times in one Mutation: viewers"
    );
}

#[test]
fn increments_are_guarded_against_overflow() {
    let text = update_movies(json!({
        "where": {"title": "Arrival"},
        "update": {"viewers_INCREMENT": 10}
    }))
    .unwrap();
    assert!(text.starts_with("MATCH (this:Movie)\nWHERE this.title = $param0\n"), "{text}");
    assert!(
        text.contains(
            "CALL apoc.util.validate(this.viewers + $param1 > 2147483647 OR this.viewers + $param1 < -2147483648, \"Overflow: Movie.viewers\", [0])"
        ),
        "{text}"
    );
    let guard = text.find("\"Overflow: Movie.viewers\"").unwrap();
    let write = text.find("SET this.viewers = this.viewers + $param1").unwrap();
    assert!(guard < write, "{text}");
}

#[test]
fn bigint_increments_compare_against_the_remaining_headroom() {
    let text = update_movies(json!({"update": {"revenue_INCREMENT": 5}})).unwrap();
    assert!(
        text.contains(
            "CALL apoc.util.validate(this.revenue > 9223372036854775802, \"Overflow: Movie.revenue\", [0])"
        ),
        "{text}"
    );
    let guard = text.find("\"Overflow: Movie.revenue\"").unwrap();
    let write = text.find("SET this.revenue = this.revenue + $param0").unwrap();
    assert!(guard < write, "{text}");
}

#[test]
fn bigint_decrements_accept_string_amounts() {
    let text = update_movies(json!({"update": {"revenue_DECREMENT": "5"}})).unwrap();
    assert!(
        text.contains(
            "CALL apoc.util.validate(this.revenue < -9223372036854775803, \"Overflow: Movie.revenue\", [0])"
        ),
        "{text}"
    );
    assert!(text.contains("SET this.revenue = this.revenue - $param0"), "{text}");
}

#[test]
fn bigint_amounts_outside_64_bits_are_rejected() {
    let err = update_movies(json!({"update": {"revenue_INCREMENT": "9223372036854775808"}})).unwrap_err();
    assert_eq!(err.code(), "BAD_USER_INPUT");
    let err = update_movies(json!({"update": {"revenue_DECREMENT": i64::MIN}})).unwrap_err();
    assert_eq!(err.code(), "ARITHMETIC_ERROR");
}

fn update_users(auth: &AuthContext, args: serde_json::Value) -> String {
    let tree = ResolveTree::new("updateUsers").with_args(args).with_fields(
        "UpdateUsersMutationResponse",
        vec![ResolveTree::new("users").with_fields("User", vec![ResolveTree::new("id")])],
    );
    mutation(&tree, auth).unwrap().statement.text
}

#[test]
fn connecting_alongside_scalar_writes_checks_relationship_field_rules() {
    let auth = AuthContext::with_jwt(json!({"sub": "u1"}));
    let text = update_users(
        &auth,
        json!({
            "update": {"name": "Ada"},
            "connect": {"posts": [{"where": {"node": {"id": "p1"}}}]}
        }),
    );
    let checked = text
        .find("apoc.util.validate(NOT (this.id = $param")
        .unwrap_or_else(|| panic!("posts rule missing: {text}"));
    let written = text.find("SET this.name = ").expect("scalar write");
    assert!(checked < written, "{text}");
}

#[test]
fn connecting_without_scalar_writes_checks_relationship_field_rules() {
    let auth = AuthContext::with_jwt(json!({"sub": "u1"}));
    let text = update_users(
        &auth,
        json!({"disconnect": {"posts": [{"where": {"node": {"id": "p1"}}}]}}),
    );
    assert!(text.contains("apoc.util.validate(NOT (this.id = $param"), "{text}");
}

#[test]
fn scalar_only_updates_skip_relationship_field_rules() {
    let auth = AuthContext::with_jwt(json!({"sub": "u1"}));
    let text = update_users(&auth, json!({"update": {"name": "Ada"}}));
    assert!(!text.contains("\"Forbidden\""), "{text}");
}

#[test]
fn division_by_zero_is_rejected() {
    let err = update_movies(json!({"update": {"rating_DIVIDE": 0}})).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Arithmetic(_)));
    assert_eq!(err.code(), "ARITHMETIC_ERROR");
    assert_eq!(err.to_string(), "Division by zero on Movie.rating");
}

#[test]
fn arithmetic_must_match_the_field_type() {
    let err = update_movies(json!({"update": {"title_INCREMENT": 1}})).unwrap_err();
    assert_eq!(err.code(), "BAD_USER_INPUT");
    let err = update_movies(json!({"update": {"viewers_MULTIPLY": 2}})).unwrap_err();
    assert_eq!(err.code(), "BAD_USER_INPUT");
}

#[test]
fn list_push_appends_to_the_stored_list() {
    let text = update_movies(json!({"update": {"tags_PUSH": ["noir"]}})).unwrap();
    assert!(
        text.contains("SET this.tags = coalesce(this.tags, []) + $param0"),
        "{text}"
    );
}

#[test]
fn popping_nothing_writes_nothing() {
    let text = update_movies(json!({"update": {"tags_POP": 0}})).unwrap();
    assert!(!text.contains("SET "), "{text}");
}

#[test]
fn delete_removes_matched_nodes_and_reports_counts() {
    let tree = ResolveTree::new("deleteMovies")
        .with_args(json!({"where": {"title": "Arrival"}}))
        .with_fields(
            "DeleteInfo",
            vec![ResolveTree::new("nodesDeleted"), ResolveTree::new("relationshipsDeleted")],
        );
    let translation = mutation(&tree, &AuthContext::anonymous()).unwrap();
    let text = &translation.statement.text;
    assert!(text.starts_with("MATCH (this:Movie)\nWHERE this.title = $param0\n"), "{text}");
    assert!(text.contains("DETACH DELETE"), "{text}");
    assert!(text.contains("AS nodesDeleted"), "{text}");
    assert!(text.contains("AS relationshipsDeleted"), "{text}");
    assert_eq!(translation.mode, AccessMode::Write);
}
