mod common;

use common::{compile, mutation, param, select};
use proptest::prelude::*;
use serde_json::json;
use theseus_core::claims::AuthContext;
use theseus_core::errors::ErrorKind;
use theseus_core::operation::ResolveTree;
use theseus_core::schema::OperationKind;

fn documents(auth: &AuthContext, args: serde_json::Value) -> theseus_core::Result<String> {
    let tree = select("documents", "Document", &["title"]).with_args(args);
    compile(OperationKind::Query, &tree, auth).map(|t| t.statement.text)
}

#[test]
fn filter_rules_hide_everything_from_anonymous_callers() {
    let text = documents(&AuthContext::anonymous(), json!({})).unwrap();
    assert!(text.starts_with("MATCH (this:Document)\nWHERE false\n"), "{text}");
}

#[test]
fn filter_rules_bind_claims_as_parameters() {
    let auth = AuthContext::with_jwt(json!({"sub": "user-1"}));
    let tree = select("documents", "Document", &["title"]);
    let translation = compile(OperationKind::Query, &tree, &auth).unwrap();
    assert!(
        translation
            .statement
            .text
            .contains("WHERE this.owner = $param0"),
        "{}",
        translation.statement.text
    );
    assert_eq!(param(&translation, "param0"), &json!("user-1"));
}

#[test]
fn missing_claims_never_match() {
    let auth = AuthContext::with_jwt(json!({"name": "no subject"}));
    let text = documents(&auth, json!({})).unwrap();
    assert!(text.contains("WHERE false"), "{text}");
}

#[test]
fn delete_validation_requires_the_role() {
    let tree = ResolveTree::new("deleteDocuments")
        .with_fields("DeleteInfo", vec![ResolveTree::new("nodesDeleted")]);

    let err = mutation(&tree, &AuthContext::anonymous()).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Forbidden));

    let user = AuthContext::with_jwt(json!({"sub": "u1", "roles": ["user"]}));
    let text = mutation(&tree, &user).unwrap().statement.text;
    assert!(text.contains("apoc.util.validate(true, \"Forbidden\", [0])"), "{text}");

    let admin = AuthContext::with_jwt(json!({"sub": "u1", "roles": ["admin"]}));
    let text = mutation(&tree, &admin).unwrap().statement.text;
    assert!(!text.contains("\"Forbidden\""), "{text}");
}

#[test]
fn create_bind_rejects_foreign_creator_before_execution() {
    let auth = AuthContext::with_jwt(json!({"sub": "u1"}));
    let tree = ResolveTree::new("createPosts")
        .with_args(json!({"input": [{"content": "hi", "creator": "u2"}]}))
        .with_fields("CreatePostsMutationResponse", vec![ResolveTree::new("info")]);
    let err = mutation(&tree, &auth).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Forbidden));
    assert_eq!(err.code(), "FORBIDDEN");
}

#[test]
fn nested_create_bind_fails_the_whole_mutation() {
    let auth = AuthContext::with_jwt(json!({"sub": "u1"}));
    let tree = ResolveTree::new("createUsers")
        .with_args(json!({"input": [{
            "id": "u1",
            "name": "Ada",
            "posts": {"create": [{"node": {"content": "hi", "creator": "u2"}}]}
        }]}))
        .with_fields("CreateUsersMutationResponse", vec![ResolveTree::new("info")]);
    let err = mutation(&tree, &auth).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Forbidden));
}

#[test]
fn create_bind_is_checked_after_the_write() {
    let auth = AuthContext::with_jwt(json!({"sub": "u1"}));
    let tree = ResolveTree::new("createPosts")
        .with_args(json!({"input": [{"content": "hi", "creator": "u1"}]}))
        .with_fields(
            "CreatePostsMutationResponse",
            vec![ResolveTree::new("posts").with_fields("Post", vec![ResolveTree::new("id")])],
        );
    let text = mutation(&tree, &auth).unwrap().statement.text;
    let created = text.find("CREATE (this0:Post)").expect("create clause");
    let checked = text
        .find("apoc.util.validate(NOT (this0.creator = $param")
        .expect("bind check");
    assert!(created < checked, "{text}");
}

#[test]
fn unauthenticated_create_is_rejected_up_front() {
    let tree = ResolveTree::new("createPosts")
        .with_args(json!({"input": [{"content": "hi"}]}))
        .with_fields("CreatePostsMutationResponse", vec![ResolveTree::new("info")]);
    let err = mutation(&tree, &AuthContext::anonymous()).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Forbidden));
}

fn folders(auth: &AuthContext, fields: Vec<ResolveTree>) -> String {
    let tree = ResolveTree::new("folders").with_fields("Folder", fields);
    compile(OperationKind::Query, &tree, auth).unwrap().statement.text
}

#[test]
fn nested_reads_apply_the_target_rules() {
    let documents = || select("documents", "Document", &["title"]);

    let text = folders(&AuthContext::anonymous(), vec![documents()]);
    assert!(
        text.contains("MATCH (this)-[:CONTAINS]->(this1:Document)\n    WHERE false"),
        "{text}"
    );

    let auth = AuthContext::with_jwt(json!({"sub": "u1"}));
    let translation = compile(
        OperationKind::Query,
        &ResolveTree::new("folders").with_fields("Folder", vec![documents()]),
        &auth,
    )
    .unwrap();
    let text = &translation.statement.text;
    assert!(
        text.contains("MATCH (this)-[:CONTAINS]->(this1:Document)\n    WHERE this1.owner = $param0"),
        "{text}"
    );
    assert_eq!(param(&translation, "param0"), &json!("u1"));
}

#[test]
fn nested_filters_only_see_readable_targets() {
    let tree = select("folders", "Folder", &["name"])
        .with_args(json!({"where": {"documents_SOME": {"title": "Plan"}}}));
    let text = compile(OperationKind::Query, &tree, &AuthContext::anonymous())
        .unwrap()
        .statement
        .text;
    assert!(
        text.contains("MATCH (this)-[:CONTAINS]->(this0:Document)\n    WHERE false\n}"),
        "{text}"
    );
}

#[test]
fn interface_aggregates_apply_each_implementation_rules() {
    let aggregate = || {
        ResolveTree::new("assetsAggregate")
            .with_fields("FolderAssetAssetsAggregationSelection", vec![ResolveTree::new("count")])
    };

    let text = folders(&AuthContext::anonymous(), vec![aggregate()]);
    assert!(
        text.contains("MATCH (this)-[this2:CONTAINS]->(this1)\n    WHERE this1:Image\n"),
        "{text}"
    );

    let auth = AuthContext::with_jwt(json!({"sub": "u1"}));
    let text = folders(&auth, vec![aggregate()]);
    assert!(
        text.contains("WHERE (this1:Document AND this1.owner = $param0) OR this1:Image\n"),
        "{text}"
    );
    assert!(text.contains("RETURN { count: count(this1) } AS var0"), "{text}");
}

proptest! {
    #[test]
    fn user_filters_and_rules_are_conjoined(title in "[a-zA-Z ]{0,12}", sub in "[a-z0-9-]{1,8}") {
        let auth = AuthContext::with_jwt(json!({"sub": sub.clone()}));
        let tree = select("documents", "Document", &["title"])
            .with_args(json!({"where": {"title": title.clone()}}));
        let translation = compile(OperationKind::Query, &tree, &auth).unwrap();
        prop_assert!(translation
            .statement
            .text
            .contains("WHERE this.title = $param1 AND this.owner = $param0"));
        prop_assert_eq!(&translation.statement.params["param0"], &json!(sub));
        prop_assert_eq!(&translation.statement.params["param1"], &json!(title));
    }

    #[test]
    fn caller_where_cannot_escape_the_rule(title in "[a-z]{1,6}") {
        let auth = AuthContext::with_jwt(json!({"sub": "u1"}));
        let tree = select("documents", "Document", &["title"])
            .with_args(json!({"where": {"OR": [{"title": title}, {"owner_NOT": "u1"}]}}));
        let text = compile(OperationKind::Query, &tree, &auth).unwrap().statement.text;
        prop_assert!(text.contains(") AND this.owner = $param0"), "{}", text);
    }
}
