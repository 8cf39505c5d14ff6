//! Decoded JWT claims and the static evaluation of claim conditions used by
//! authorization rules.

use serde::{Deserialize, Serialize};
use regex::Regex;
use serde_json::{Map, Value};

use crate::config::Config;
use crate::prelude::*;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthContext {
    /// Verified and decoded claims; `None` for unauthenticated requests.
    pub jwt: Option<Value>,
    /// Free-form request context referenced as `$context.<path>`.
    pub context: Map<String, Value>,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_jwt(jwt: Value) -> Self {
        Self {
            jwt: Some(jwt),
            context: Map::new(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.jwt.is_some()
    }

    /// Claims as seen by rule conditions; empty when unauthenticated.
    pub fn claims(&self) -> Value {
        self.jwt
            .clone()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }

    pub fn claim(&self, path: &str) -> Option<&Value> {
        self.jwt.as_ref().and_then(|jwt| lookup(jwt, path))
    }

    pub fn roles(&self, config: &Config) -> Vec<String> {
        match self.claim(&config.authorization.roles_path) {
            Some(Value::Array(roles)) => roles
                .iter()
                .filter_map(|role| role.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(role)) => vec![role.clone()],
            _ => Vec::new(),
        }
    }

    pub fn has_any_role(&self, config: &Config, required: &[String]) -> bool {
        let roles = self.roles(config);
        required.iter().any(|role| roles.contains(role))
    }
}

/// Splits a dot path, honouring `\.` as a literal dot inside a segment.
pub fn split_path(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => current.push(chars.next().unwrap_or('\\')),
            '.' => segments.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    segments.push(current);
    segments
}

pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in split_path(path) {
        current = current.as_object()?.get(&segment)?;
    }
    Some(current)
}

/// Replaces `"$jwt.<path>"` and `"$context.<path>"` strings in a rule
/// condition with the referenced values. `None` when a referenced value is
/// missing, which leaves the rule unsatisfied.
pub fn substitute(value: &Value, auth: &AuthContext, config: &Config) -> Option<Value> {
    match value {
        Value::String(s) => {
            if let Some(path) = s.strip_prefix("$jwt.") {
                auth.claim(config.claim_path(path)).cloned()
            } else if let Some(path) = s.strip_prefix("$context.") {
                let context = Value::Object(auth.context.clone());
                lookup(&context, path).cloned()
            } else {
                Some(value.clone())
            }
        }
        Value::Array(items) => items
            .iter()
            .map(|item| substitute(item, auth, config))
            .collect::<Option<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, item) in map {
                out.insert(key.clone(), substitute(item, auth, config)?);
            }
            Some(Value::Object(out))
        }
        other => Some(other.clone()),
    }
}

const CLAIM_OPERATORS: [&str; 14] = [
    "_NOT_INCLUDES",
    "_NOT_IN",
    "_INCLUDES",
    "_STARTS_WITH",
    "_ENDS_WITH",
    "_CONTAINS",
    "_MATCHES",
    "_IN",
    "_NOT",
    "_LTE",
    "_GTE",
    "_LT",
    "_GT",
    "_EQ",
];

/// Evaluates a `jwt` where-tree against the request's claims.
pub fn matches_claims(condition: &Value, auth: &AuthContext, config: &Config) -> Result<bool> {
    let Some(map) = condition.as_object() else {
        return Err(TheseusError::validation(
            "jwt condition must be an object",
        ));
    };
    let claims = auth.claims();
    for (key, expected) in map {
        let satisfied = match key.as_str() {
            "AND" => all_of(expected, |c| matches_claims(c, auth, config))?,
            "OR" => any_of(expected, |c| matches_claims(c, auth, config))?,
            "NOT" => !matches_claims(expected, auth, config)?,
            _ => {
                let (claim, operator) = split_operator(key);
                let expected = substitute(expected, auth, config).unwrap_or(Value::Null);
                let actual = lookup(&claims, config.claim_path(claim));
                compare_claim(actual, operator, &expected)?
            }
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn all_of(value: &Value, f: impl Fn(&Value) -> Result<bool>) -> Result<bool> {
    match value {
        Value::Array(items) => {
            for item in items {
                if !f(item)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        other => f(other),
    }
}

fn any_of(value: &Value, f: impl Fn(&Value) -> Result<bool>) -> Result<bool> {
    match value {
        Value::Array(items) => {
            for item in items {
                if f(item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => f(other),
    }
}

fn split_operator(key: &str) -> (&str, &str) {
    for operator in CLAIM_OPERATORS {
        if let Some(claim) = key.strip_suffix(operator) {
            if !claim.is_empty() {
                return (claim, operator);
            }
        }
    }
    (key, "")
}

fn compare_claim(actual: Option<&Value>, operator: &str, expected: &Value) -> Result<bool> {
    let actual = actual.unwrap_or(&Value::Null);
    let ordering = || match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64().zip(b.as_f64()).and_then(|(a, b)| a.partial_cmp(&b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };
    let text = |f: fn(&str, &str) -> bool| match (actual, expected) {
        (Value::String(a), Value::String(b)) => f(a, b),
        _ => false,
    };
    Ok(match operator {
        "" | "_EQ" => actual == expected,
        "_NOT" => actual != expected,
        "_IN" => expected.as_array().is_some_and(|xs| xs.contains(actual)),
        "_NOT_IN" => expected.as_array().is_some_and(|xs| !xs.contains(actual)),
        "_INCLUDES" => actual.as_array().is_some_and(|xs| xs.contains(expected)),
        "_NOT_INCLUDES" => actual.as_array().is_some_and(|xs| !xs.contains(expected)),
        "_CONTAINS" => text(|a, b| a.contains(b)),
        "_STARTS_WITH" => text(|a, b| a.starts_with(b)),
        "_ENDS_WITH" => text(|a, b| a.ends_with(b)),
        "_MATCHES" => match (actual, expected) {
            (Value::String(a), Value::String(pattern)) => {
                // Anchored like Cypher's `=~`.
                let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|err| {
                    TheseusError::validation(format!("Invalid pattern {pattern}: {err}"))
                })?;
                regex.is_match(a)
            }
            _ => false,
        },
        "_LT" => ordering().is_some_and(|o| o.is_lt()),
        "_LTE" => ordering().is_some_and(|o| o.is_le()),
        "_GT" => ordering().is_some_and(|o| o.is_gt()),
        "_GTE" => ordering().is_some_and(|o| o.is_ge()),
        other => {
            return Err(TheseusError::validation(format!(
                "Operator {other} is not supported on JWT claims"
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn splits_escaped_paths() {
        assert_eq!(split_path("a.b"), vec!["a", "b"]);
        assert_eq!(
            split_path("https://example\\.com/claims.roles"),
            vec!["https://example.com/claims", "roles"]
        );
    }

    #[test]
    fn looks_up_nested_claims() {
        let auth = AuthContext::with_jwt(json!({
            "sub": "u1",
            "realm_access": {"roles": ["admin"]},
            "app.io": {"org": "o1"}
        }));
        assert_eq!(auth.claim("sub"), Some(&json!("u1")));
        assert_eq!(auth.claim("app\\.io.org"), Some(&json!("o1")));

        let mut config = Config::default();
        config.authorization.roles_path = "realm_access.roles".to_string();
        assert!(auth.has_any_role(&config, &["admin".to_string()]));
        assert!(!auth.has_any_role(&config, &["editor".to_string()]));
    }

    #[test]
    fn substitutes_claim_references() {
        let auth = AuthContext::with_jwt(json!({"sub": "u1"}));
        let config = Config::default();
        assert_eq!(
            substitute(&json!({"id": "$jwt.sub", "name": "x"}), &auth, &config),
            Some(json!({"id": "u1", "name": "x"}))
        );
        assert_eq!(substitute(&json!({"id": "$jwt.missing"}), &auth, &config), None);
        assert_eq!(
            substitute(&json!({"id": "$jwt.sub"}), &AuthContext::anonymous(), &config),
            None
        );
    }

    #[test]
    fn evaluates_claim_conditions() {
        let config = Config::default();
        let auth = AuthContext::with_jwt(json!({"roles": ["admin"], "level": 3, "sub": "u1"}));
        assert!(matches_claims(&json!({"roles_INCLUDES": "admin"}), &auth, &config).unwrap());
        assert!(matches_claims(&json!({"level_GT": 2, "sub": "u1"}), &auth, &config).unwrap());
        assert!(!matches_claims(&json!({"level_GT": 3}), &auth, &config).unwrap());
        assert!(matches_claims(
            &json!({"OR": [{"sub": "nobody"}, {"level_IN": [1, 3]}]}),
            &auth,
            &config
        )
        .unwrap());
        assert!(!matches_claims(&json!({"sub": "u1"}), &AuthContext::anonymous(), &config).unwrap());
    }

    #[test]
    fn matches_claims_against_anchored_patterns() {
        let config = Config::default();
        let auth = AuthContext::with_jwt(json!({"email": "ada@example.com"}));
        assert!(matches_claims(&json!({"email_MATCHES": ".*@example\\.com"}), &auth, &config).unwrap());
        assert!(!matches_claims(&json!({"email_MATCHES": "example"}), &auth, &config).unwrap());
        assert!(!matches_claims(&json!({"missing_MATCHES": ".*"}), &auth, &config).unwrap());
        let err = matches_claims(&json!({"email_MATCHES": "("}), &auth, &config).unwrap_err();
        assert_eq!(err.code(), "BAD_USER_INPUT");
    }
}
