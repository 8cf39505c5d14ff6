use serde_json::Value;
use theseus_cypher::{CallClause, Clause, Environment, Expr};

use crate::claims::AuthContext;
use crate::config::Config;
use crate::errors::FORBIDDEN;
use crate::schema::{ScalarKind, SchemaModel};

/// State threaded through the compilation of one root field.
pub(crate) struct Context<'a> {
    pub schema: &'a SchemaModel,
    pub config: &'a Config,
    pub auth: &'a AuthContext,
    pub env: Environment,
    /// Set while compiling an authorization condition; nested relationship
    /// filters then skip the target's own rules.
    pub in_auth: bool,
}

impl<'a> Context<'a> {
    pub fn new(schema: &'a SchemaModel, config: &'a Config, auth: &'a AuthContext) -> Self {
        Self {
            schema,
            config,
            auth,
            env: Environment::new(),
            in_auth: false,
        }
    }

    pub fn node_var(&mut self) -> String {
        self.env.node_variable()
    }

    pub fn value_var(&mut self) -> String {
        self.env.value_variable()
    }

    pub fn param(&mut self, value: Value) -> Expr {
        self.env.param(value)
    }

    /// Parameter converted to the stored representation of the scalar.
    pub fn typed_param(&mut self, scalar: &ScalarKind, value: Value) -> Expr {
        match (scalar.cast_function(), &value) {
            (_, Value::Null) => self.param(value),
            (Some(function), Value::Array(items)) => {
                let items = items.clone();
                let list = self.param(Value::Array(items));
                let item = self.value_var();
                Expr::ListComprehension {
                    variable: item.clone(),
                    list: Box::new(list),
                    where_clause: None,
                    map: Some(Box::new(Expr::call(function, vec![Expr::var(item)]))),
                }
            }
            (Some(function), _) => {
                let param = self.param(value);
                Expr::call(function, vec![param])
            }
            (None, _) => self.param(value),
        }
    }

    pub fn jwt(&mut self) -> Expr {
        let claims = self.auth.claims();
        self.env.named_param("jwt", claims)
    }

    pub fn context_param(&mut self) -> Expr {
        let context = Value::Object(self.auth.context.clone());
        self.env.named_param("context", context)
    }

    /// `CALL <validate>(<abort when>, "<message>", [0])`.
    pub fn validate(&self, abort_when: Expr, message: &str) -> Clause {
        Clause::Call(CallClause {
            name: self.config.cypher.validate_procedure.clone(),
            args: vec![abort_when, Expr::string(message), Expr::list(vec![Expr::int(0)])],
            yields: None,
        })
    }

    /// Aborts with `Forbidden` unless the predicate holds.
    pub fn require(&self, predicate: Expr) -> Vec<Clause> {
        vec![Clause::with_star(), self.validate(Expr::not(predicate), FORBIDDEN)]
    }

    pub fn uuid(&self) -> Expr {
        Expr::call(self.config.cypher.uuid_function.clone(), vec![])
    }

    pub fn now(&self) -> Expr {
        Expr::call(self.config.cypher.datetime_function.clone(), vec![])
    }

    /// Runs `f` in authorization-condition mode.
    pub fn in_auth<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let previous = std::mem::replace(&mut self.in_auth, true);
        let out = f(self);
        self.in_auth = previous;
        out
    }
}
