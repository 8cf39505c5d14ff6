use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ast::{Expr, Statement};

/// Rendered statement text together with its bound parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CypherStatement {
    pub text: String,
    pub params: BTreeMap<String, Value>,
}

/// Hands out variable and parameter names for one statement.
///
/// Names come from monotonically increasing counters so compiling the same
/// operation twice yields the same text, and two names never collide within
/// one statement.
#[derive(Debug, Default)]
pub struct Environment {
    next_variable: usize,
    next_param: usize,
    params: BTreeMap<String, Value>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Node or relationship variable: `this0`, `this1`, ...
    pub fn node_variable(&mut self) -> String {
        let id = self.next_variable;
        self.next_variable += 1;
        format!("this{id}")
    }

    /// Variable holding a computed value: `var0`, `var1`, ...
    pub fn value_variable(&mut self) -> String {
        let id = self.next_variable;
        self.next_variable += 1;
        format!("var{id}")
    }

    pub fn param(&mut self, value: Value) -> Expr {
        Expr::Parameter(self.param_name(value))
    }

    pub fn param_name(&mut self, value: Value) -> String {
        let name = format!("param{}", self.next_param);
        self.next_param += 1;
        self.params.insert(name.clone(), value);
        name
    }

    /// Binds a value under a fixed name (`jwt`), reusing an existing binding.
    pub fn named_param(&mut self, name: &str, value: Value) -> Expr {
        self.params.entry(name.to_string()).or_insert(value);
        Expr::Parameter(name.to_string())
    }

    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    pub fn finish(self, statement: &Statement) -> CypherStatement {
        CypherStatement {
            text: statement.to_string(),
            params: self.params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn counters_are_shared_between_variable_kinds() {
        let mut env = Environment::new();
        assert_eq!(env.node_variable(), "this0");
        assert_eq!(env.value_variable(), "var1");
        assert_eq!(env.node_variable(), "this2");
    }

    #[test]
    fn params_are_unique_and_recorded() {
        let mut env = Environment::new();
        let first = env.param(json!("a"));
        let second = env.param(json!("a"));
        assert_ne!(first, second);
        assert_eq!(env.params().len(), 2);
        assert_eq!(env.params()["param1"], json!("a"));
    }

    #[test]
    fn named_param_keeps_first_value() {
        let mut env = Environment::new();
        env.named_param("jwt", json!({"sub": "1"}));
        env.named_param("jwt", json!({"sub": "2"}));
        assert_eq!(env.params()["jwt"], json!({"sub": "1"}));
    }
}
