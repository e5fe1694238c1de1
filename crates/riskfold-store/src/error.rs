//! Store error types

use thiserror::Error;

/// Store error
#[derive(Error, Debug)]
pub enum StoreError {
    /// Table does not exist
    #[error("Unknown table '{0}'")]
    UnknownTable(String),

    /// Namespace does not exist
    #[error("Unknown namespace '{0}'")]
    UnknownNamespace(String),

    /// Column does not exist in the table
    #[error("Unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },

    /// Identifier failed validation or is not on the allow-list
    #[error("Invalid identifier '{0}'")]
    InvalidIdentifier(String),

    /// Two rows share a unique key
    #[error("Duplicate key {key} in table '{table}'")]
    DuplicateKey { table: String, key: String },

    /// Row width does not match the column list
    #[error("Row has {actual} values but table '{table}' has {expected} columns")]
    RowWidth {
        table: String,
        expected: usize,
        actual: usize,
    },

    /// Database or driver failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for riskfold_core::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownColumn { table, column } => {
                riskfold_core::Error::UnknownColumn { table, column }
            }
            StoreError::InvalidIdentifier(name) => {
                riskfold_core::Error::Config(format!("Invalid identifier '{}'", name))
            }
            other => riskfold_core::Error::Store(other.to_string()),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_column_becomes_config_error() {
        let err: riskfold_core::Error = StoreError::UnknownColumn {
            table: "semantic.ems_runs".to_string(),
            column: "suicide_flag".to_string(),
        }
        .into();
        assert!(err.is_config());
    }

    #[test]
    fn test_backend_error_is_infrastructure() {
        let err: riskfold_core::Error = StoreError::Backend("connection reset".to_string()).into();
        assert!(!err.is_config());
        assert!(!err.is_fold_local());
        assert_eq!(err.to_string(), "Store error: Backend error: connection reset");
    }
}
