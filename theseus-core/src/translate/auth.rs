//! Weaving of authorization rules into compiled statements.
//!
//! `filter` rules become predicates AND-ed into the `WHERE` of every match
//! that reaches the guarded type. `validate` rules become calls to the
//! configured validation procedure that abort the transaction with
//! `Forbidden`. Rules sharing an operation and effect are OR-ed; the parts of
//! a single rule are AND-ed.

use serde_json::{Map, Value};
use theseus_cypher::{Clause, Expr};
use tracing::debug;

use super::context::Context;
use super::filter::node_filter;
use crate::claims::{matches_claims, substitute};
use crate::prelude::*;
use crate::schema::{AuthOperation, AuthorizationRule, Node, RuleEffect, ValidationPhase};

fn rule_predicate(
    cx: &mut Context,
    node: &Node,
    var: &str,
    rule: &AuthorizationRule,
) -> Result<Expr> {
    if rule.require_authentication && !cx.auth.is_authenticated() {
        return Ok(Expr::bool(false));
    }
    let condition = &rule.condition;
    if let Some(jwt) = &condition.jwt {
        if !matches_claims(jwt, cx.auth, cx.config)? {
            return Ok(Expr::bool(false));
        }
    }
    if !condition.roles.is_empty() && !cx.auth.has_any_role(cx.config, &condition.roles) {
        return Ok(Expr::bool(false));
    }
    let Some(where_tree) = &condition.node else {
        return Ok(Expr::bool(true));
    };
    let Some(resolved) = substitute(where_tree, cx.auth, cx.config) else {
        return Ok(Expr::bool(false));
    };
    let filter = cx.in_auth(|cx| node_filter(cx, node, var, &resolved))?;
    if !filter.preconditions.is_empty() {
        return Err(TheseusError::validation(format!(
            "Authorization rule on {} uses a filter that needs a subquery",
            rule.origin
        )));
    }
    Ok(filter.predicate.unwrap_or(Expr::bool(true)))
}

/// OR of the given rules; `None` when there are none.
fn any_rule<'r>(
    cx: &mut Context,
    node: &Node,
    var: &str,
    rules: impl Iterator<Item = &'r AuthorizationRule>,
) -> Result<Option<Expr>> {
    let rules: Vec<&AuthorizationRule> = rules.collect();
    if rules.is_empty() {
        return Ok(None);
    }
    let mut predicates = Vec::with_capacity(rules.len());
    for rule in rules {
        predicates.push(rule_predicate(cx, node, var, rule)?);
    }
    Ok(Some(Expr::or_all(predicates).unwrap_or(Expr::bool(false))))
}

/// Drops predicates that are statically satisfied.
fn constraining(predicate: Option<Expr>) -> Option<Expr> {
    predicate.filter(|p| p.as_bool() != Some(true))
}

pub(crate) fn filter_predicate(
    cx: &mut Context,
    node: &Node,
    var: &str,
    operation: AuthOperation,
) -> Result<Option<Expr>> {
    let rules = node.authorization.matching(operation, RuleEffect::Filter);
    Ok(constraining(any_rule(cx, node, var, rules)?))
}

pub(crate) fn read_filter(cx: &mut Context, node: &Node, var: &str) -> Result<Option<Expr>> {
    filter_predicate(cx, node, var, AuthOperation::Read)
}

/// Conjunction of the type-level rules and the rules of every listed field.
pub(crate) fn validate_predicate(
    cx: &mut Context,
    node: &Node,
    var: &str,
    operation: AuthOperation,
    phase: ValidationPhase,
    fields: &[&str],
) -> Result<Option<Expr>> {
    let effect = RuleEffect::Validate(phase);
    let mut groups = Vec::new();
    groups.extend(any_rule(
        cx,
        node,
        var,
        node.authorization.matching(operation, effect),
    )?);
    for name in fields {
        if let Some(field) = node.field(name) {
            groups.extend(any_rule(
                cx,
                node,
                var,
                field.authorization.matching(operation, effect),
            )?);
        }
    }
    Ok(constraining(Expr::and_all(groups)))
}

pub(crate) fn validate(
    cx: &mut Context,
    node: &Node,
    var: &str,
    operation: AuthOperation,
    phase: ValidationPhase,
    fields: &[&str],
) -> Result<Vec<Clause>> {
    Ok(
        match validate_predicate(cx, node, var, operation, phase, fields)? {
            Some(predicate) => cx.require(predicate),
            None => Vec::new(),
        },
    )
}

/// Fails with `Forbidden` before any round trip when the request carries no
/// claims and every validation rule for the operation demands them.
pub(crate) fn ensure_authenticated(
    cx: &Context,
    node: &Node,
    operation: AuthOperation,
) -> Result<()> {
    if cx.auth.is_authenticated() {
        return Ok(());
    }
    let mut rules = node
        .authorization
        .rules
        .iter()
        .filter(|rule| {
            rule.operations.contains(&operation) && matches!(rule.effect, RuleEffect::Validate(_))
        })
        .peekable();
    if rules.peek().is_some() && rules.all(|rule| rule.require_authentication) {
        debug!(node = %node.name, %operation, "unauthenticated request rejected");
        return Err(TheseusError::forbidden());
    }
    Ok(())
}

/// Rejects a create whose literal input already violates every CREATE rule
/// checked after the write, so nothing reaches the database.
pub(crate) fn check_bind(cx: &Context, node: &Node, input: &Map<String, Value>) -> Result<()> {
    let rules: Vec<&AuthorizationRule> = node
        .authorization
        .matching(
            AuthOperation::Create,
            RuleEffect::Validate(ValidationPhase::After),
        )
        .collect();
    if rules.is_empty() {
        return Ok(());
    }
    let mut violated = true;
    for rule in rules {
        if statically_satisfiable(cx, rule, input)? {
            violated = false;
            break;
        }
    }
    if violated {
        debug!(node = %node.name, "create input violates authorization rules");
        return Err(TheseusError::forbidden());
    }
    Ok(())
}

fn statically_satisfiable(
    cx: &Context,
    rule: &AuthorizationRule,
    input: &Map<String, Value>,
) -> Result<bool> {
    if rule.require_authentication && !cx.auth.is_authenticated() {
        return Ok(false);
    }
    let condition = &rule.condition;
    if let Some(jwt) = &condition.jwt {
        if !matches_claims(jwt, cx.auth, cx.config)? {
            return Ok(false);
        }
    }
    if !condition.roles.is_empty() && !cx.auth.has_any_role(cx.config, &condition.roles) {
        return Ok(false);
    }
    let Some(where_tree) = &condition.node else {
        return Ok(true);
    };
    let Some(resolved) = substitute(where_tree, cx.auth, cx.config) else {
        return Ok(false);
    };
    Ok(evaluate_input(&resolved, input) != Some(false))
}

/// Three-valued evaluation of a where-tree against literal input values.
/// `None` when the outcome depends on data the input doesn't carry.
fn evaluate_input(condition: &Value, input: &Map<String, Value>) -> Option<bool> {
    let map = condition.as_object()?;
    let mut outcome = Some(true);
    for (key, expected) in map {
        let part = match key.as_str() {
            "AND" => all_of(expected, input),
            "OR" => match expected {
                Value::Array(items) => {
                    let parts: Vec<Option<bool>> =
                        items.iter().map(|c| evaluate_input(c, input)).collect();
                    if parts.contains(&Some(true)) {
                        Some(true)
                    } else if parts.iter().all(|p| *p == Some(false)) {
                        Some(false)
                    } else {
                        None
                    }
                }
                other => evaluate_input(other, input),
            },
            "NOT" => evaluate_input(expected, input).map(|b| !b),
            field => match input.get(field) {
                Some(actual) if !actual.is_object() => Some(actual == expected),
                _ => None,
            },
        };
        outcome = match (outcome, part) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        };
    }
    outcome
}

fn all_of(value: &Value, input: &Map<String, Value>) -> Option<bool> {
    match value {
        Value::Array(items) => {
            let mut outcome = Some(true);
            for item in items {
                outcome = match (outcome, evaluate_input(item, input)) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                };
            }
            outcome
        }
        other => evaluate_input(other, input),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn evaluates_literal_input_with_three_values() {
        let written = input(json!({"id": "p1", "creator": "u2"}));
        assert_eq!(evaluate_input(&json!({"creator": "u1"}), &written), Some(false));
        assert_eq!(evaluate_input(&json!({"creator": "u2"}), &written), Some(true));
        assert_eq!(evaluate_input(&json!({"owner": "u2"}), &written), None);
        assert_eq!(
            evaluate_input(&json!({"OR": [{"owner": "u2"}, {"creator": "u1"}]}), &written),
            None
        );
        assert_eq!(
            evaluate_input(&json!({"AND": [{"id": "p1"}, {"creator": "u1"}]}), &written),
            Some(false)
        );
        assert_eq!(evaluate_input(&json!({"NOT": {"creator": "u1"}}), &written), Some(true));
    }
}
