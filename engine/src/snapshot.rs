//! Snapshot types for persisting and restoring an in-memory database.
//!
//! Snapshots are the bridge between [`MemoryDatabase`](crate::MemoryDatabase)
//! and durable storage. They are designed for deterministic serialization.

use crate::{error::Result, schema::ID_COLUMN, Error, RecordId, Row, TableName, TableSchema};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Contents of one table at snapshot time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSnapshot {
    /// Declared schema of the table
    pub schema: TableSchema,
    /// Rows keyed by id
    pub rows: BTreeMap<RecordId, Row>,
}

/// A point-in-time snapshot of every table, including the change log and
/// key mapping ledgers.
///
/// Uses BTreeMap instead of HashMap for deterministic serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Tables by name
    pub tables: BTreeMap<TableName, TableSnapshot>,
}

impl Default for DatabaseSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseSnapshot {
    /// Create a new empty snapshot.
    pub fn new() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            tables: BTreeMap::new(),
        }
    }

    /// Count total rows across all tables.
    pub fn row_count(&self) -> usize {
        self.tables.values().map(|t| t.rows.len()).sum()
    }

    /// Validate format version, schemas, and every row.
    pub fn validate(&self) -> Result<()> {
        if self.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported format version {}",
                self.format_version
            )));
        }

        for (name, table) in &self.tables {
            if *name != table.schema.name {
                return Err(Error::InvalidSnapshot(format!(
                    "table '{}' stored under key '{}'",
                    table.schema.name, name
                )));
            }
            table.schema.validate_identifiers()?;

            for (id, row) in &table.rows {
                if row.get(ID_COLUMN).and_then(|v| v.as_i64()) != Some(*id) {
                    return Err(Error::InvalidSnapshot(format!(
                        "row {id} in '{name}' has a mismatched id"
                    )));
                }
                table.schema.validate_row(row)?;
            }
        }

        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON and validate.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }
}
