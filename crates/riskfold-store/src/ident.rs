//! SQL identifier handling
//!
//! Identifiers are never bound as parameters, so every table and column name that
//! reaches SQL text must pass [`quote_ident`] and, for source tables, the allow-list
//! derived from the pipeline configuration.

use crate::error::{Result, StoreError};
use crate::query::EventQuery;
use riskfold_core::{is_valid_identifier, PipelineConfig};
use std::collections::{BTreeMap, BTreeSet};

/// Validate and double-quote an identifier
pub fn quote_ident(name: &str) -> Result<String> {
    if is_valid_identifier(name) {
        Ok(format!("\"{}\"", name))
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Source tables and columns the configuration references
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierAllowList {
    namespace: String,
    tables: BTreeMap<String, BTreeSet<String>>,
}

impl IdentifierAllowList {
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut list = Self {
            namespace: config.source_namespace.clone(),
            tables: BTreeMap::new(),
        };

        let cohort = &config.cohort;
        list.allow(
            &cohort.events_table,
            [
                cohort.person_column.as_str(),
                cohort.date_column.as_str(),
                cohort.source_column.as_str(),
            ]
            .into_iter()
            .chain(cohort.county_column.as_deref()),
        );

        for definition in &config.labels.definitions {
            list.allow(
                &definition.source_table,
                [
                    definition.person_column.as_str(),
                    definition.date_column.as_str(),
                ]
                .into_iter()
                .chain(definition.county_column.as_deref())
                .chain(definition.filters.iter().map(|f| f.column.as_str())),
            );
        }

        for (name, table) in &config.features {
            let columns = table.source_columns();
            list.allow(table.source_table(name), columns.iter().map(String::as_str));
        }

        list
    }

    fn allow<'a>(&mut self, table: &str, columns: impl Iterator<Item = &'a str>) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .extend(columns.map(str::to_string));
    }

    pub fn is_allowed(&self, table: &str, column: &str) -> bool {
        self.tables
            .get(table)
            .is_some_and(|columns| columns.contains(column))
    }

    /// Reject a query touching anything the configuration does not name
    pub fn check(&self, query: &EventQuery) -> Result<()> {
        if query.table.namespace != self.namespace || !self.tables.contains_key(&query.table.name) {
            return Err(StoreError::InvalidIdentifier(query.table.to_string()));
        }
        for column in query.referenced_columns() {
            if !self.is_allowed(&query.table.name, column) {
                return Err(StoreError::InvalidIdentifier(format!(
                    "{}.{}",
                    query.table, column
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TableRef;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("as_of_date").unwrap(), "\"as_of_date\"");
        assert!(quote_ident("x\"; drop schema modeling; --").is_err());
    }

    #[test]
    fn test_allow_list_check() {
        let mut list = IdentifierAllowList {
            namespace: "semantic".to_string(),
            tables: BTreeMap::new(),
        };
        list.allow("ems_runs", ["joid", "run_date"].into_iter());

        let query = EventQuery::new(
            TableRef::new("semantic", "ems_runs"),
            vec!["joid".to_string()],
            "run_date",
        );
        assert!(list.check(&query).is_ok());

        let query = EventQuery::new(
            TableRef::new("semantic", "ems_runs"),
            vec!["ssn".to_string()],
            "run_date",
        );
        assert!(list.check(&query).is_err());

        let query = EventQuery::new(
            TableRef::new("modeling", "ems_runs"),
            vec!["joid".to_string()],
            "run_date",
        );
        assert!(list.check(&query).is_err());
    }
}
