//! Tables as exchanged with the store

use crate::error::{Result, StoreError};
use chrono::NaiveDate;
use riskfold_core::{is_valid_identifier, PersonDate, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Namespace-qualified table name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub namespace: String,
    pub name: String,
}

impl TableRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse `namespace.name`
    pub fn parse(qualified: &str) -> Result<Self> {
        match qualified.split_once('.') {
            Some((namespace, name)) => {
                let table = Self::new(namespace, name);
                table.validate()?;
                Ok(table)
            }
            None => Err(StoreError::InvalidIdentifier(qualified.to_string())),
        }
    }

    /// Both parts must be plain lowercase identifiers
    pub fn validate(&self) -> Result<()> {
        for part in [&self.namespace, &self.name] {
            if !is_valid_identifier(part) {
                return Err(StoreError::InvalidIdentifier(part.clone()));
            }
        }
        Ok(())
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// Column types understood by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Bool,
    Date,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Row-major table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<Column>,

    #[serde(default)]
    pub rows: Vec<Vec<Value>>,

    /// Columns whose combined values must be unique
    #[serde(default)]
    pub unique_key: Vec<String>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            unique_key: Vec::new(),
        }
    }

    pub fn with_unique_key(mut self, key: &[&str]) -> Self {
        self.unique_key = key.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Index of `name`, or `UnknownColumn` naming `table`
    pub fn require_column(&self, table: &str, name: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| StoreError::UnknownColumn {
                table: table.to_string(),
                column: name.to_string(),
            })
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(StoreError::RowWidth {
                table: String::new(),
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Check row widths and the unique key
    pub fn check(&self, table: &str) -> Result<()> {
        for row in &self.rows {
            if row.len() != self.columns.len() {
                return Err(StoreError::RowWidth {
                    table: table.to_string(),
                    expected: self.columns.len(),
                    actual: row.len(),
                });
            }
        }
        if self.unique_key.is_empty() {
            return Ok(());
        }

        let key_idx = self
            .unique_key
            .iter()
            .map(|k| self.require_column(table, k))
            .collect::<Result<Vec<_>>>()?;

        let mut seen = HashSet::with_capacity(self.rows.len());
        for row in &self.rows {
            let key: Vec<String> = key_idx
                .iter()
                .map(|&i| row[i].to_category().unwrap_or_else(|| "NULL".to_string()))
                .collect();
            if !seen.insert(key.clone()) {
                return Err(StoreError::DuplicateKey {
                    table: table.to_string(),
                    key: format!("({})", key.join(", ")),
                });
            }
        }
        Ok(())
    }

    /// The `(person_id, as_of_date)` key of a row
    pub fn person_date(row: &[Value], person_idx: usize, date_idx: usize) -> Option<PersonDate> {
        let person_id = row.get(person_idx)?.as_i64()?;
        let as_of_date: NaiveDate = row.get(date_idx)?.as_date()?;
        Some(PersonDate::new(person_id, as_of_date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn cohort() -> Table {
        Table::new(vec![
            Column::new("person_id", ColumnType::Integer),
            Column::new("as_of_date", ColumnType::Date),
        ])
        .with_unique_key(&["person_id", "as_of_date"])
    }

    #[test]
    fn test_table_ref_parse() {
        let table = TableRef::parse("modeling.cohort").unwrap();
        assert_eq!(table, TableRef::new("modeling", "cohort"));
        assert_eq!(table.to_string(), "modeling.cohort");
        assert!(TableRef::parse("cohort").is_err());
        assert!(TableRef::parse("modeling.\"cohort\"").is_err());
    }

    #[test]
    fn test_unique_key_check() {
        let mut table = cohort();
        table.push_row(vec![Value::from(1i64), Value::from(date(2019, 1, 1))]).unwrap();
        table.push_row(vec![Value::from(1i64), Value::from(date(2019, 7, 1))]).unwrap();
        assert!(table.check("modeling.cohort").is_ok());

        table.push_row(vec![Value::from(1i64), Value::from(date(2019, 1, 1))]).unwrap();
        assert!(matches!(
            table.check("modeling.cohort"),
            Err(StoreError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn test_push_row_width() {
        let mut table = cohort();
        assert!(table.push_row(vec![Value::from(1i64)]).is_err());
    }

    #[test]
    fn test_person_date() {
        let row = vec![Value::from(7i64), Value::from(date(2019, 1, 1))];
        assert_eq!(
            Table::person_date(&row, 0, 1),
            Some(PersonDate::new(7, date(2019, 1, 1)))
        );
        assert_eq!(Table::person_date(&[Value::Null, Value::Null], 0, 1), None);
    }
}
