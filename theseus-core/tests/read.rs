mod common;

use common::{compile, param, query, select};
use pretty_assertions::assert_eq;
use serde_json::json;
use theseus_core::backend::AccessMode;
use theseus_core::claims::AuthContext;
use theseus_core::operation::ResolveTree;
use theseus_core::schema::OperationKind;
use theseus_core::translate::ResultShape;

#[test]
fn plain_read_projects_selected_fields() {
    let translation = query(&select("movies", "Movie", &["title"]));
    assert_eq!(
        translation.statement.text,
        "MATCH (this:Movie)\nWITH this { .title } AS this\nRETURN this"
    );
    assert!(translation.statement.params.is_empty());
    assert_eq!(translation.mode, AccessMode::Read);
    assert_eq!(
        translation.shape,
        ResultShape::Read {
            type_name: "Movie".to_string()
        }
    );
}

#[test]
fn where_values_are_parameters() {
    let tree = select("movies", "Movie", &["title"])
        .with_args(json!({"where": {"title": "The Matrix", "released_GT": 1999}}));
    let translation = query(&tree);
    let text = &translation.statement.text;
    assert!(
        text.contains("WHERE this.title = $param0 AND this.released > $param1"),
        "{text}"
    );
    assert!(!text.contains("The Matrix"));
    assert_eq!(param(&translation, "param0"), &json!("The Matrix"));
    assert_eq!(param(&translation, "param1"), &json!(1999));
}

#[test]
fn logical_operators_nest() {
    let tree = select("movies", "Movie", &["title"]).with_args(json!({
        "where": {"OR": [{"title_STARTS_WITH": "The"}, {"NOT": {"released_IN": [1999, 2003]}}]}
    }));
    let text = query(&tree).statement.text;
    assert!(
        text.contains("WHERE this.title STARTS WITH $param0 OR NOT (this.released IN $param1)"),
        "{text}"
    );
}

#[test]
fn null_filters_test_presence() {
    let tree = select("movies", "Movie", &["title"])
        .with_args(json!({"where": {"rating": null, "title_NOT": null}}));
    let text = query(&tree).statement.text;
    assert!(
        text.contains("WHERE this.rating IS NULL AND this.title IS NOT NULL"),
        "{text}"
    );
}

#[test]
fn unknown_filters_are_rejected() {
    let tree = select("movies", "Movie", &["title"]).with_args(json!({"where": {"budget": 1}}));
    let err = compile(OperationKind::Query, &tree, &AuthContext::anonymous()).unwrap_err();
    assert_eq!(err.code(), "BAD_USER_INPUT");
    assert!(err.to_string().contains("MovieWhere"));
}

#[test]
fn sort_and_pagination_happen_before_projection() {
    let tree = select("movies", "Movie", &["title"]).with_args(json!({
        "options": {"sort": [{"released": "DESC"}], "offset": 1, "limit": 2}
    }));
    let translation = query(&tree);
    assert_eq!(
        translation.statement.text,
        "MATCH (this:Movie)\nWITH *\nORDER BY this.released DESC\nSKIP $param0\nLIMIT $param1\nWITH this { .title } AS this\nRETURN this"
    );
    assert_eq!(param(&translation, "param0"), &json!(1));
    assert_eq!(param(&translation, "param1"), &json!(2));
}

#[test]
fn distinct_reads_page_after_projection() {
    let tree = select("actors", "Actor", &["born"]).with_args(json!({
        "options": {"distinct": true, "sort": [{"born": "ASC"}], "limit": 2}
    }));
    let translation = query(&tree);
    let text = &translation.statement.text;
    assert!(
        text.contains("WITH this { .born, __sort_born: this.born } AS this"),
        "{text}"
    );
    assert!(
        text.ends_with("WITH DISTINCT this\nORDER BY this.__sort_born ASC\nLIMIT $param0\nRETURN this"),
        "{text}"
    );
    assert_eq!(param(&translation, "param0"), &json!(2));
}

#[test]
fn nested_relationships_use_subqueries() {
    let actors = ResolveTree::new("actors")
        .with_args(json!({"where": {"name_CONTAINS": "Kea"}}))
        .with_fields("Actor", vec![ResolveTree::new("name")]);
    let tree = ResolveTree::new("movies")
        .with_fields("Movie", vec![ResolveTree::new("title"), actors]);
    let text = query(&tree).statement.text;
    assert!(text.contains("CALL {\n    WITH this"), "{text}");
    assert!(text.contains("MATCH (this)<-[:ACTED_IN]-(this1:Actor)"), "{text}");
    assert!(text.contains("WHERE this1.name CONTAINS $param0"), "{text}");
    assert!(text.contains("RETURN collect(this1) AS var0"), "{text}");
    assert!(text.contains("actors: var0"), "{text}");
}

#[test]
fn interface_reads_union_every_implementation() {
    let tree = ResolveTree::new("productions")
        .with_fields("Production", vec![ResolveTree::new("title")])
        .with_fields("Series", vec![ResolveTree::new("episodes")]);
    let text = query(&tree).statement.text;
    assert!(text.contains("MATCH (this0:Movie)"), "{text}");
    assert!(text.contains("MATCH (this1:Series)"), "{text}");
    assert!(text.contains("UNION"), "{text}");
    assert!(text.contains("this0 { __typename: \"Movie\", .title }"), "{text}");
    assert!(
        text.contains("this1 { __typename: \"Series\", .episodes, .title }"),
        "{text}"
    );
}

#[test]
fn union_where_restricts_members() {
    let tree = ResolveTree::new("searchables")
        .with_args(json!({"where": {"Actor": {"name": "Keanu"}}}))
        .with_fields("Actor", vec![ResolveTree::new("name")]);
    let text = query(&tree).statement.text;
    assert!(text.contains(":Actor"), "{text}");
    assert!(!text.contains(":Movie"), "{text}");
    assert!(!text.contains("UNION"), "{text}");
}

#[test]
fn empty_union_filter_returns_no_rows() {
    let tree = ResolveTree::new("searchables")
        .with_args(json!({"where": {}}))
        .with_fields("Actor", vec![ResolveTree::new("name")]);
    assert_eq!(query(&tree).statement.text, "UNWIND [] AS this\nRETURN this");
}

#[test]
fn aggregations_collect_in_one_row() {
    let rating = ResolveTree::new("rating").with_fields(
        "FloatAggregateSelection",
        vec![
            ResolveTree::new("min"),
            ResolveTree::new("max"),
            ResolveTree::new("average"),
        ],
    );
    let tree = ResolveTree::new("seriesAggregate")
        .with_fields("SeriesAggregateSelection", vec![ResolveTree::new("count"), rating]);
    let translation = query(&tree);
    assert_eq!(
        translation.statement.text,
        "MATCH (this:Series)\nRETURN { count: count(this), rating: { min: min(this.rating), max: max(this.rating), average: avg(this.rating) } } AS this"
    );
}

#[test]
fn interface_aggregates_filter_every_implementation() {
    let aggregate = ResolveTree::new("moviesAggregate")
        .with_args(json!({"where": {"title": "Arrival", "_on": {"Series": {"title": "Dark"}}}}))
        .with_fields("ActorProductionMoviesAggregationSelection", vec![ResolveTree::new("count")]);
    let tree = ResolveTree::new("actors").with_fields("Actor", vec![aggregate]);
    let translation = query(&tree);
    let text = &translation.statement.text;
    assert!(
        text.contains(
            "MATCH (this)-[this2:ACTED_IN]->(this1)\n    WHERE (this1:Movie AND this1.title = $param0) OR (this1:Series AND this1.title = $param1)\n"
        ),
        "{text}"
    );
    assert!(text.contains("RETURN { count: count(this1) } AS var0"), "{text}");
    assert_eq!(param(&translation, "param0"), &json!("Arrival"));
    assert_eq!(param(&translation, "param1"), &json!("Dark"));
}

#[test]
fn compilation_is_deterministic() {
    let actors = ResolveTree::new("actorsConnection")
        .with_args(json!({"first": 3, "sort": [{"edge": {"screenTime": "DESC"}}]}))
        .with_fields(
            "MovieActorsConnection",
            vec![ResolveTree::new("totalCount"), ResolveTree::new("edges").with_fields(
                "MovieActorsRelationship",
                vec![
                    ResolveTree::new("node").with_fields("Actor", vec![ResolveTree::new("name")]),
                    ResolveTree::new("properties")
                        .with_fields("ActedIn", vec![ResolveTree::new("role")]),
                ],
            )],
        );
    let tree = ResolveTree::new("movies")
        .with_args(json!({"where": {"title_IN": ["A", "B"]}, "options": {"limit": 5}}))
        .with_fields("Movie", vec![ResolveTree::new("title"), actors]);
    assert_eq!(query(&tree).statement, query(&tree).statement);
}

#[test]
fn requests_deserialize_from_resolve_info_json() {
    let request: theseus_core::operation::GraphQLRequest =
        serde_json::from_str(include_str!("../../demos/request.json")).unwrap();
    assert_eq!(request.operation, OperationKind::Query);
    assert!(request.auth.is_authenticated());
    let movies = compile(request.operation, &request.fields[0], &request.auth).unwrap();
    let text = &movies.statement.text;
    assert!(text.contains("EXISTS {"), "{text}");
    assert!(text.contains("ORDER BY this.released DESC"), "{text}");
    let documents = compile(request.operation, &request.fields[1], &request.auth).unwrap();
    assert!(documents.statement.text.contains("this.owner = $param0"));
}
