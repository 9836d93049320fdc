//! The record abstraction shared by local and remote collaborators.

use crate::{error::Result, schema::ID_COLUMN, ColumnDef, Error, RecordId, Row};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

/// An application value stored in one table.
///
/// Records have a stable integer id, structural equality, and a statically
/// declared column layout used to create and validate storage tables.
/// Serialization must produce an object with an integer `id` field plus one
/// field per declared column.
pub trait Record:
    Serialize + DeserializeOwned + Clone + PartialEq + Debug + Send + Sync + 'static
{
    /// The record's identifier within its table.
    fn id(&self) -> RecordId;

    /// Replace the record's identifier.
    fn set_id(&mut self, id: RecordId);

    /// Columns of the backing table, excluding `id`.
    fn columns() -> Vec<ColumnDef>;
}

/// Convert a record into a storage row.
pub fn to_row<R: Record>(record: &R) -> Result<Row> {
    let value = serde_json::to_value(record).map_err(|e| Error::InvalidRow {
        table: std::any::type_name::<R>().to_string(),
        message: e.to_string(),
    })?;

    match value {
        serde_json::Value::Object(mut row) => {
            row.insert(ID_COLUMN.to_string(), record.id().into());
            Ok(row)
        }
        other => Err(Error::InvalidRow {
            table: std::any::type_name::<R>().to_string(),
            message: format!("record must serialize to an object, got {other}"),
        }),
    }
}

/// Convert a storage row back into a record.
pub fn from_row<R: Record>(table: &str, row: Row) -> Result<R> {
    serde_json::from_value(serde_json::Value::Object(row)).map_err(|e| Error::InvalidRow {
        table: table.to_string(),
        message: e.to_string(),
    })
}

/// Read the integer id of a row.
pub fn row_id(table: &str, row: &Row) -> Result<RecordId> {
    row.get(ID_COLUMN)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| Error::InvalidRow {
            table: table.to_string(),
            message: "row has no integer id".into(),
        })
}
