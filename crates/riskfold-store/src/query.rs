//! Event queries against source tables

use crate::table::TableRef;
use chrono::NaiveDate;
use riskfold_core::Filter;
use serde::{Deserialize, Serialize};

/// Select rows of a source table by date bounds and structured filters.
///
/// Rows whose date is NULL never match a bounded query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventQuery {
    pub table: TableRef,

    /// Projected columns, in output order
    pub columns: Vec<String>,

    /// Column the date bounds apply to
    pub date_column: String,

    /// Inclusive upper bound
    #[serde(default)]
    pub on_or_before: Option<NaiveDate>,

    /// Exclusive lower bound
    #[serde(default)]
    pub after: Option<NaiveDate>,

    #[serde(default)]
    pub filters: Vec<Filter>,
}

impl EventQuery {
    pub fn new(table: TableRef, columns: Vec<String>, date_column: impl Into<String>) -> Self {
        Self {
            table,
            columns,
            date_column: date_column.into(),
            on_or_before: None,
            after: None,
            filters: Vec::new(),
        }
    }

    pub fn on_or_before(mut self, date: NaiveDate) -> Self {
        self.on_or_before = Some(date);
        self
    }

    pub fn after(mut self, date: NaiveDate) -> Self {
        self.after = Some(date);
        self
    }

    pub fn with_filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }

    /// Every column the query touches
    pub fn referenced_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.date_column.as_str()))
            .chain(self.filters.iter().map(|f| f.column.as_str()))
    }

    /// Whether a row date falls within the bounds
    pub fn date_in_bounds(&self, date: Option<NaiveDate>) -> bool {
        if self.on_or_before.is_none() && self.after.is_none() {
            return true;
        }
        let Some(date) = date else {
            return false;
        };
        self.on_or_before.map_or(true, |upper| date <= upper)
            && self.after.map_or(true, |lower| date > lower)
    }
}
