use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumIter, EnumString};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthOperation {
    Create,
    Read,
    Update,
    Delete,
    Connect,
    Disconnect,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationPhase {
    Before,
    After,
}

impl ValidationPhase {
    /// Phases in which an operation can be validated: existing data is checked
    /// BEFORE, written data AFTER.
    pub fn applies_to(self, operation: AuthOperation) -> bool {
        match self {
            ValidationPhase::Before => operation != AuthOperation::Create,
            ValidationPhase::After => !matches!(
                operation,
                AuthOperation::Read | AuthOperation::Delete
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RuleEffect {
    Filter,
    Validate(ValidationPhase),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleCondition {
    /// Where-tree over the guarded node, may reference `$jwt.*` / `$context.*`.
    pub node: Option<Value>,
    /// Where-tree over the decoded claims.
    pub jwt: Option<Value>,
    pub roles: Vec<String>,
}

impl RuleCondition {
    pub fn is_empty(&self) -> bool {
        self.node.is_none() && self.jwt.is_none() && self.roles.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthorizationRule {
    pub operations: BTreeSet<AuthOperation>,
    pub effect: RuleEffect,
    pub require_authentication: bool,
    pub condition: RuleCondition,
    /// Type or interface the rule was declared on.
    pub origin: String,
}

impl AuthorizationRule {
    pub fn applies(&self, operation: AuthOperation, effect: RuleEffect) -> bool {
        self.effect == effect && self.operations.contains(&operation)
    }
}

/// Rules attached to a type or a field after inheritance has been flattened.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleSet {
    pub rules: Vec<AuthorizationRule>,
}

impl RuleSet {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn matching(
        &self,
        operation: AuthOperation,
        effect: RuleEffect,
    ) -> impl Iterator<Item = &AuthorizationRule> {
        self.rules
            .iter()
            .filter(move |rule| rule.applies(operation, effect))
    }

    pub fn has(&self, operation: AuthOperation, effect: RuleEffect) -> bool {
        self.matching(operation, effect).next().is_some()
    }

    pub fn extend(&mut self, other: &RuleSet) {
        for rule in &other.rules {
            if !self.rules.contains(rule) {
                self.rules.push(rule.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn phases_follow_operation_semantics() {
        assert!(!ValidationPhase::Before.applies_to(AuthOperation::Create));
        assert!(ValidationPhase::After.applies_to(AuthOperation::Create));
        assert!(!ValidationPhase::After.applies_to(AuthOperation::Read));
        assert!(ValidationPhase::Before.applies_to(AuthOperation::Disconnect));
        assert!(ValidationPhase::After.applies_to(AuthOperation::Update));
    }

    #[test]
    fn operations_parse_from_directive_names() {
        assert_eq!(
            AuthOperation::from_str("DISCONNECT").unwrap(),
            AuthOperation::Disconnect
        );
        assert_eq!(AuthOperation::Create.to_string(), "CREATE");
    }
}
