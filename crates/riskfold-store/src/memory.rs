//! In-memory store
//!
//! Tables live in nested maps behind a `tokio::sync::RwLock`. Suitable for tests and
//! for offline runs over a JSON snapshot; data is lost when the process exits.

use super::Store;
use crate::error::{Result, StoreError};
use crate::query::EventQuery;
use crate::table::{Column, Table, TableRef};
use riskfold_core::{is_valid_identifier, Filter};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::RwLock;

type Namespaces = BTreeMap<String, BTreeMap<String, Table>>;

/// In-memory store backend
pub struct MemoryStore {
    namespaces: RwLock<Namespaces>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(BTreeMap::new()),
        }
    }

    /// Load a snapshot of the form `{ "<namespace>": { "<table>": Table } }`
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let namespaces: Namespaces = serde_json::from_str(&content)?;
        for (namespace, tables) in &namespaces {
            for (name, table) in tables {
                TableRef::new(namespace.as_str(), name.as_str()).validate()?;
                table.check(&format!("{}.{}", namespace, name))?;
            }
        }
        tracing::info!(
            path = %path.as_ref().display(),
            namespaces = namespaces.len(),
            "Loaded store snapshot"
        );
        Ok(Self {
            namespaces: RwLock::new(namespaces),
        })
    }

    /// Write every namespace to a JSON snapshot
    pub async fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = {
            let namespaces = self.namespaces.read().await;
            serde_json::to_string(&*namespaces)?
        };
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Insert a table, creating its namespace when needed
    pub async fn insert_table(&self, table: &TableRef, data: Table) -> Result<()> {
        table.validate()?;
        data.check(&table.to_string())?;
        let mut namespaces = self.namespaces.write().await;
        namespaces
            .entry(table.namespace.clone())
            .or_default()
            .insert(table.name.clone(), data);
        Ok(())
    }

    fn lookup<'a>(namespaces: &'a Namespaces, table: &TableRef) -> Result<&'a Table> {
        namespaces
            .get(&table.namespace)
            .and_then(|tables| tables.get(&table.name))
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
    }

    fn filter_indices(data: &Table, table: &str, filters: &[Filter]) -> Result<Vec<usize>> {
        filters
            .iter()
            .map(|f| data.require_column(table, &f.column))
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn fetch_events(&self, query: &EventQuery) -> Result<Table> {
        query.table.validate()?;
        let namespaces = self.namespaces.read().await;
        let data = Self::lookup(&namespaces, &query.table)?;
        let name = query.table.to_string();

        let projection = query
            .columns
            .iter()
            .map(|c| data.require_column(&name, c))
            .collect::<Result<Vec<_>>>()?;
        let date_idx = data.require_column(&name, &query.date_column)?;
        let filter_idx = Self::filter_indices(data, &name, &query.filters)?;

        let mut result = Table::new(
            projection
                .iter()
                .map(|&i| Column::new(data.columns[i].name.clone(), data.columns[i].ty))
                .collect(),
        );
        for row in &data.rows {
            if !query.date_in_bounds(row[date_idx].as_date()) {
                continue;
            }
            let matches = query
                .filters
                .iter()
                .zip(&filter_idx)
                .all(|(filter, &i)| filter.matches(&row[i]));
            if matches {
                result
                    .rows
                    .push(projection.iter().map(|&i| row[i].clone()).collect());
            }
        }

        tracing::debug!(table = %name, rows = result.len(), "Fetched events");
        Ok(result)
    }

    async fn replace_table(&self, table: &TableRef, data: Table) -> Result<()> {
        table.validate()?;
        for column in &data.columns {
            if !is_valid_identifier(&column.name) {
                return Err(StoreError::InvalidIdentifier(column.name.clone()));
            }
        }
        data.check(&table.to_string())?;

        let mut namespaces = self.namespaces.write().await;
        let tables = namespaces
            .get_mut(&table.namespace)
            .ok_or_else(|| StoreError::UnknownNamespace(table.namespace.clone()))?;
        tracing::debug!(table = %table, rows = data.len(), "Replaced table");
        tables.insert(table.name.clone(), data);
        Ok(())
    }

    async fn read_table(&self, table: &TableRef, filters: &[Filter]) -> Result<Table> {
        table.validate()?;
        let namespaces = self.namespaces.read().await;
        let data = Self::lookup(&namespaces, table)?;
        let name = table.to_string();
        let filter_idx = Self::filter_indices(data, &name, filters)?;

        let mut result = Table::new(data.columns.clone());
        result.unique_key = data.unique_key.clone();
        result.rows = data
            .rows
            .iter()
            .filter(|row| {
                filters
                    .iter()
                    .zip(&filter_idx)
                    .all(|(filter, &i)| filter.matches(&row[i]))
            })
            .cloned()
            .collect();
        Ok(result)
    }

    async fn create_namespace(&self, namespace: &str) -> Result<()> {
        if !is_valid_identifier(namespace) {
            return Err(StoreError::InvalidIdentifier(namespace.to_string()));
        }
        let mut namespaces = self.namespaces.write().await;
        namespaces.entry(namespace.to_string()).or_default();
        Ok(())
    }

    async fn drop_namespace(&self, namespace: &str) -> Result<()> {
        if !is_valid_identifier(namespace) {
            return Err(StoreError::InvalidIdentifier(namespace.to_string()));
        }
        let mut namespaces = self.namespaces.write().await;
        namespaces.remove(namespace);
        Ok(())
    }

    async fn list_tables(&self, namespace: &str) -> Result<Vec<String>> {
        let namespaces = self.namespaces.read().await;
        Ok(namespaces
            .get(namespace)
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ColumnType;
    use chrono::NaiveDate;
    use riskfold_core::{FilterOp, Value};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn ems_store() -> MemoryStore {
        let store = MemoryStore::new();
        let mut runs = Table::new(vec![
            Column::new("joid", ColumnType::Integer),
            Column::new("run_date", ColumnType::Date),
            Column::new("impression", ColumnType::Text),
        ]);
        runs.push_row(vec![Value::from(1i64), Value::from(date(2019, 1, 1)), Value::from("OVERDOSE")])
            .unwrap();
        runs.push_row(vec![Value::from(1i64), Value::from(date(2019, 3, 1)), Value::from("FALL")])
            .unwrap();
        runs.push_row(vec![Value::from(2i64), Value::Null, Value::from("OVERDOSE")])
            .unwrap();
        store
            .insert_table(&TableRef::new("semantic", "ems_runs"), runs)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_fetch_events_bounds_and_filters() {
        let store = ems_store().await;
        let query = EventQuery::new(
            TableRef::new("semantic", "ems_runs"),
            vec!["joid".to_string(), "run_date".to_string()],
            "run_date",
        )
        .on_or_before(date(2019, 3, 1))
        .after(date(2018, 12, 31));

        let events = store.fetch_events(&query).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events.column_names(), vec!["joid", "run_date"]);

        let query = query.with_filters(vec![Filter::new("impression", FilterOp::Eq, "OVERDOSE")]);
        let events = store.fetch_events(&query).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_unbounded_query_keeps_null_dates() {
        let store = ems_store().await;
        let query = EventQuery::new(
            TableRef::new("semantic", "ems_runs"),
            vec!["joid".to_string()],
            "run_date",
        );
        assert_eq!(store.fetch_events(&query).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_table_and_column() {
        let store = ems_store().await;
        let query = EventQuery::new(
            TableRef::new("semantic", "jail_bookings"),
            vec!["joid".to_string()],
            "booking_date",
        );
        assert!(matches!(
            store.fetch_events(&query).await,
            Err(StoreError::UnknownTable(_))
        ));

        let query = EventQuery::new(
            TableRef::new("semantic", "ems_runs"),
            vec!["suicide_flag".to_string()],
            "run_date",
        );
        assert!(matches!(
            store.fetch_events(&query).await,
            Err(StoreError::UnknownColumn { .. })
        ));
    }

    #[tokio::test]
    async fn test_namespace_lifecycle() {
        let store = MemoryStore::new();
        let table = TableRef::new("features", "ems_num");
        let data = Table::new(vec![Column::new("person_id", ColumnType::Integer)]);

        assert!(matches!(
            store.replace_table(&table, data.clone()).await,
            Err(StoreError::UnknownNamespace(_))
        ));

        store.create_namespace("features").await.unwrap();
        store.replace_table(&table, data).await.unwrap();
        assert_eq!(store.list_tables("features").await.unwrap(), vec!["ems_num"]);

        store.drop_namespace("features").await.unwrap();
        assert!(store.list_tables("features").await.unwrap().is_empty());
    }
}
