//! Pipeline error types
//!
//! Errors fall into three groups. Configuration errors are fatal for the whole run.
//! Data-availability errors are fatal for the fold that raised them; batch builders
//! record them and move on to the next fold. Infrastructure errors wrap the store,
//! the file system and the serializers.

use crate::value::PersonDate;
use chrono::NaiveDate;
use thiserror::Error;

/// Pipeline error
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Latest validation date precedes the absolute training start
    #[error(
        "Invalid date order: latest validation date {latest_validation_date} precedes absolute train start {absolute_train_start}"
    )]
    InvalidDateOrder {
        absolute_train_start: NaiveDate,
        latest_validation_date: NaiveDate,
    },

    /// The anchor fold has no training date satisfying the history constraints
    #[error("No training dates satisfy the history constraints for validation date {0}")]
    NoHistory(NaiveDate),

    /// Same column name in the categorical and numerical partitions
    #[error("Columns appear in more than one feature partition: {0:?}")]
    AmbiguousColumns(Vec<String>),

    /// A definition references a column the source table does not have
    #[error("Unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },

    /// Selected labels do not match any known label group
    #[error("Label group not defined for labels {0:?}")]
    UnknownLabelGroup(Vec<String>),

    /// A train or validation slice of the master matrix came back empty
    #[error(
        "Empty {slice} slice for fold validated on {validation_date}; a requested as-of date is probably missing from the master matrix"
    )]
    EmptySlice {
        slice: &'static str,
        validation_date: NaiveDate,
    },

    /// Missing values where none are allowed
    #[error("Missing values in column '{0}'")]
    MissingValues(String),

    /// Two rows share a (person_id, as_of_date) key
    #[error("Duplicate row for key {0}")]
    DuplicateKey(PersonDate),

    /// Relational store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Artifact cache failure
    #[error("Cache error: {0}")]
    Cache(String),

    /// Model training or scoring failure
    #[error("Model error: {0}")]
    Model(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether a batch over folds may record this error and continue with the next fold
    pub fn is_fold_local(&self) -> bool {
        matches!(
            self,
            Error::EmptySlice { .. } | Error::MissingValues(_) | Error::Model(_) | Error::Cache(_)
        )
    }

    /// Whether this error stems from configuration and must stop the run
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::InvalidDateOrder { .. }
                | Error::NoHistory(_)
                | Error::AmbiguousColumns(_)
                | Error::UnknownColumn { .. }
                | Error::UnknownLabelGroup(_)
        )
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let empty = Error::EmptySlice {
            slice: "train",
            validation_date: date,
        };
        assert!(empty.is_fold_local());
        assert!(!empty.is_config());

        let ambiguous = Error::AmbiguousColumns(vec!["dem_age".to_string()]);
        assert!(ambiguous.is_config());
        assert!(!ambiguous.is_fold_local());
    }

    #[test]
    fn test_error_display() {
        let err = Error::UnknownColumn {
            table: "ems_runs".to_string(),
            column: "suicide_flag".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Unknown column 'suicide_flag' in table 'ems_runs'"
        );
    }
}
