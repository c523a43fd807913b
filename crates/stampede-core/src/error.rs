use thiserror::Error;

/// Canonical error type for stampede operations.
///
/// Per-request failures observed while generating load are *not* represented here; they are
/// recorded in the run's error ledger instead. `CoreError` covers the operational failures a
/// caller has to fix and retry: bad configuration, missing sessions or policies, and storage I/O.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Entity was not found.
    #[error("{entity} `{id}` was not found")]
    NotFound {
        /// Entity type name (e.g. `"session"`).
        entity: &'static str,
        /// Identifier of the missing entity.
        id: String,
    },

    /// Test configuration failed structural validation. No traffic was generated.
    #[error("invalid test configuration: {}", errors.join("; "))]
    InvalidConfig {
        /// Every structural problem found, in discovery order.
        errors: Vec<String>,
    },

    /// I/O error occurred during file or network operations.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error occurred.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error occurred.
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Object store backend failure, with the operation and key that failed.
    #[error("storage error: {0}")]
    StorageError(String),

    /// Validation error for input data.
    #[error("validation error: {0}")]
    ValidationError(String),
}

impl CoreError {
    /// Creates a `NotFound` variant.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates an `InvalidConfig` variant.
    #[must_use]
    pub fn invalid_config(errors: Vec<String>) -> Self {
        Self::InvalidConfig { errors }
    }

    /// Returns true for lookups that failed because the entity does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_eof() || err.is_syntax() || err.is_data() {
            Self::DeserializationError(err.to_string())
        } else {
            Self::SerializationError(err.to_string())
        }
    }
}

/// Convenient result alias for stampede operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_lists_every_error() {
        let err = CoreError::invalid_config(vec![
            "max_users must be greater than 0".to_string(),
            "scenarios must not be empty".to_string(),
        ]);

        let message = err.to_string();
        assert!(message.contains("max_users"));
        assert!(message.contains("scenarios"));
    }

    #[test]
    fn test_json_syntax_error_is_deserialization() {
        let err: CoreError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, CoreError::DeserializationError(_)));
    }

    #[test]
    fn test_not_found_helper() {
        let err = CoreError::not_found("session", "abc");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "session `abc` was not found");
    }
}
