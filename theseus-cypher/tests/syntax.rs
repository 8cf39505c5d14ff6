use theseus_cypher::{check_syntax, parse_cypher, ParseError};

#[test]
fn accepts_plain_read_templates() {
    for input in [
        "MATCH (n) RETURN n",
        "MATCH (a:Actor)-[:ACTED_IN]->(m:Movie) WHERE m.title = $title RETURN a",
        "MATCH (m:Movie) RETURN count(m) AS total",
    ] {
        check_syntax(input).unwrap_or_else(|err| panic!("{input}: {err}"));
    }
}

#[test]
fn reports_position_of_syntax_errors() {
    let err = check_syntax("MATCH (n RETURN n").unwrap_err();
    assert!(matches!(err, ParseError::Syntax { row: 1, .. }), "{err:?}");
}

#[test]
fn parse_returns_tree_for_valid_input() {
    let tree = parse_cypher("MATCH (n:Movie) RETURN n.title").unwrap();
    assert!(!tree.root_node().has_error());
}
