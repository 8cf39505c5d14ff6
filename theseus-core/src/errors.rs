use crate::backend::memgraph::MemgraphError;
use thiserror::Error;

pub const FORBIDDEN: &str = "Forbidden";
pub const RELATIONSHIP_REQUIRED: &str = "RELATIONSHIP-REQUIRED";
pub const OVERFLOW: &str = "Overflow";

#[derive(Error, Debug)]
#[error(transparent)]
pub struct TheseusError(Box<ErrorKind>);

#[derive(Error, Debug)]
pub enum ErrorKind {
    #[error("Forbidden")]
    Forbidden,
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Constraint(String),
    #[error("{0}")]
    Arithmetic(String),
    #[error("{0}")]
    Database(String),
    #[error("SchemaError: {0}")]
    Schema(String),
    #[error("CypherError: {0}")]
    Cypher(#[from] theseus_cypher::CypherError),
    #[error("MemgraphError: {0}")]
    MemgraphError(#[from] MemgraphError),
    #[error("SerdeJsonError: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
    #[error("TomlError: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("IoError: {0}")]
    IoError(#[from] std::io::Error),
}

impl<E> From<E> for TheseusError
where
    ErrorKind: From<E>,
{
    fn from(err: E) -> Self {
        TheseusError(Box::new(ErrorKind::from(err)))
    }
}

impl TheseusError {
    pub fn forbidden() -> Self {
        TheseusError(Box::new(ErrorKind::Forbidden))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        TheseusError(Box::new(ErrorKind::Validation(message.into())))
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        TheseusError(Box::new(ErrorKind::Constraint(message.into())))
    }

    pub fn arithmetic(message: impl Into<String>) -> Self {
        TheseusError(Box::new(ErrorKind::Arithmetic(message.into())))
    }

    pub fn schema(message: impl Into<String>) -> Self {
        TheseusError(Box::new(ErrorKind::Schema(message.into())))
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    /// Classifies a message raised by the database while running a generated
    /// statement. Validation procedures surface their message verbatim, so the
    /// markers written by the compiler identify the failure.
    pub fn from_database_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = if message.contains(FORBIDDEN) {
            ErrorKind::Forbidden
        } else if message.contains(RELATIONSHIP_REQUIRED) {
            ErrorKind::Constraint(extract_marker(&message, RELATIONSHIP_REQUIRED))
        } else if message.contains(OVERFLOW) || message.to_lowercase().contains("overflow") {
            ErrorKind::Arithmetic(extract_marker(&message, OVERFLOW))
        } else if message.contains("already exists with") || message.contains("violates") {
            ErrorKind::Constraint(message)
        } else {
            ErrorKind::Database(message)
        };
        TheseusError(Box::new(kind))
    }

    /// Stable `extensions.code` value for GraphQL error objects.
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::Validation(_) => "BAD_USER_INPUT",
            ErrorKind::Constraint(_) => "CONSTRAINT_VIOLATION",
            ErrorKind::Arithmetic(_) => "ARITHMETIC_ERROR",
            ErrorKind::Database(_) | ErrorKind::MemgraphError(_) => "DATABASE_ERROR",
            _ => "INTERNAL_SERVER_ERROR",
        }
    }
}

fn extract_marker(message: &str, marker: &str) -> String {
    message
        .find(marker)
        .map(|idx| message[idx..].trim_end_matches(['"', '\'', ')']).to_string())
        .unwrap_or_else(|| message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_message_is_stable() {
        assert_eq!(TheseusError::forbidden().to_string(), "Forbidden");
    }

    #[test]
    fn classifies_database_messages() {
        let err = TheseusError::from_database_message(
            "Failed to invoke procedure `apoc.util.validate`: Caused by: java.lang.RuntimeException: Forbidden",
        );
        assert!(matches!(err.kind(), ErrorKind::Forbidden));

        let err = TheseusError::from_database_message(
            "RuntimeException: RELATIONSHIP-REQUIRED: Movie.director required exactly once",
        );
        assert!(matches!(err.kind(), ErrorKind::Constraint(_)));
        assert_eq!(
            err.to_string(),
            "RELATIONSHIP-REQUIRED: Movie.director required exactly once"
        );

        let err = TheseusError::from_database_message("Overflow: Movie.viewers");
        assert!(matches!(err.kind(), ErrorKind::Arithmetic(_)));

        let err = TheseusError::from_database_message("Unknown function 'foo'");
        assert_eq!(err.code(), "DATABASE_ERROR");
    }
}
