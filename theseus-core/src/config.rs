use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::prelude::*;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub authorization: AuthorizationConfig,
    pub cypher: CypherConfig,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    /// Dot path of the roles list inside the decoded claims.
    pub roles_path: String,
    /// Claim name used in `jwt` rule conditions mapped to its dot path.
    pub claim_paths: BTreeMap<String, String>,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            roles_path: "roles".to_string(),
            claim_paths: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CypherConfig {
    /// Procedure called as `proc(predicate, message, params)` that aborts the
    /// transaction when the predicate holds.
    pub validate_procedure: String,
    pub uuid_function: String,
    pub datetime_function: String,
    pub lint_custom_statements: bool,
    /// Upper bound applied to every list limit when a type declares none.
    pub max_limit: Option<u64>,
}

impl Default for CypherConfig {
    fn default() -> Self {
        Self {
            validate_procedure: "apoc.util.validate".to_string(),
            uuid_function: "randomUUID".to_string(),
            datetime_function: "datetime".to_string(),
            lint_custom_statements: true,
            max_limit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "bolt://localhost:7687".to_string(),
        }
    }
}

impl Config {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        Ok(toml::from_str(input)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn claim_path<'a>(&'a self, claim: &'a str) -> &'a str {
        self.authorization
            .claim_paths
            .get(claim)
            .map(String::as_str)
            .unwrap_or(claim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_sections() {
        let config = Config::from_toml_str(
            r#"
            [authorization]
            roles_path = "realm_access.roles"

            [authorization.claim_paths]
            org = "app\\.example\\.com/org"
            "#,
        )
        .unwrap();
        assert_eq!(config.authorization.roles_path, "realm_access.roles");
        assert_eq!(config.claim_path("org"), "app\\.example\\.com/org");
        assert_eq!(config.claim_path("sub"), "sub");
        assert_eq!(config.cypher.validate_procedure, "apoc.util.validate");
        assert_eq!(config.backend.url, "bolt://localhost:7687");
    }
}
