//! riskfold store - the relational store seam
//!
//! Every pipeline stage reads and writes tables through the [`Store`] trait. The
//! in-memory backend serves tests and offline runs from JSON snapshots; the PostgreSQL
//! backend (feature `postgres`) issues parameterized queries only.

pub mod error;
pub mod ident;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod query;
pub mod table;

pub use error::{Result, StoreError};
pub use ident::{quote_ident, IdentifierAllowList};
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;
pub use query::EventQuery;
pub use table::{Column, ColumnType, Table, TableRef};

use riskfold_core::Filter;

/// Trait for relational store backends
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Rows of a source table within optional date bounds, projected to the query columns
    async fn fetch_events(&self, query: &EventQuery) -> Result<Table>;

    /// Replace a table's content. The table's unique key is enforced before anything is written.
    async fn replace_table(&self, table: &TableRef, data: Table) -> Result<()>;

    /// All columns of the rows matching every filter
    async fn read_table(&self, table: &TableRef, filters: &[Filter]) -> Result<Table>;

    /// Create a namespace if it does not exist
    async fn create_namespace(&self, namespace: &str) -> Result<()>;

    /// Drop a namespace and every table in it
    async fn drop_namespace(&self, namespace: &str) -> Result<()>;

    /// Table names within a namespace, sorted
    async fn list_tables(&self, namespace: &str) -> Result<Vec<String>>;
}
