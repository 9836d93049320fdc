//! The local database collaborator.
//!
//! Repositories, the change log, and the key mapping store all persist
//! through one [`Database`] handle. The trait is deliberately row-level:
//! rows are JSON objects keyed by column name, with an integer `id`.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryDatabase;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;

use crate::{error::Result, RecordId, Row, TableSchema};
use async_trait::async_trait;
use serde_json::Value;

/// A conjunction of column equality conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    /// Match every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match rows with the given id.
    pub fn id(id: RecordId) -> Self {
        Self::all().eq(crate::schema::ID_COLUMN, id)
    }

    /// Add an equality condition.
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    /// The conditions in insertion order.
    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    /// Check a row against every condition. A missing column matches null.
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions
            .iter()
            .all(|(column, value)| row.get(column).unwrap_or(&Value::Null) == value)
    }
}

/// Row storage shared by every table of the local replica.
///
/// Implementations serialize their own writes; every call completes
/// before the caller proceeds. Failures are returned, never absorbed.
#[async_trait]
pub trait Database: Send + Sync {
    /// Create the table if it does not exist yet.
    async fn ensure_table(&self, schema: &TableSchema) -> Result<()>;

    /// Rows matching the filter, ordered by id ascending.
    async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>>;

    /// Insert or replace a row. A row without an id is assigned
    /// `max(id) + 1`. Returns the row's id.
    async fn insert(&self, table: &str, row: Row) -> Result<RecordId>;

    /// Set the given column values on every matching row.
    async fn update(&self, table: &str, filter: &Filter, values: Row) -> Result<u64>;

    /// Delete every matching row.
    async fn delete(&self, table: &str, filter: &Filter) -> Result<u64>;
}
