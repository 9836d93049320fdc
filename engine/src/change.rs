//! Pending change types.
//!
//! A pending change is the single outstanding local mutation intention for
//! one record. The change log keeps at most one per (record, table).

use crate::{error::Result, record::row_id, Error, RecordId, Row, TableName, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Kind of local mutation awaiting replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Locally updated record
    Update,
    /// Locally inserted record
    Insert,
    /// Locally deleted record
    Delete,
}

impl ChangeType {
    /// Storage code for this change type.
    pub fn code(&self) -> i64 {
        match self {
            ChangeType::Update => 0,
            ChangeType::Insert => 1,
            ChangeType::Delete => 2,
        }
    }

    /// Parse a storage code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ChangeType::Update),
            1 => Some(ChangeType::Insert),
            2 => Some(ChangeType::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeType::Update => write!(f, "update"),
            ChangeType::Insert => write!(f, "insert"),
            ChangeType::Delete => write!(f, "delete"),
        }
    }
}

/// A local mutation that has not been replayed against the remote yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    /// Sequence id assigned by the ledger
    pub id: i64,
    /// Kind of mutation
    pub change_type: ChangeType,
    /// Record the mutation applies to
    pub record_id: RecordId,
    /// Table the record lives in
    pub table_name: TableName,
    /// When the intention was recorded (milliseconds since epoch)
    pub timestamp: Timestamp,
}

impl PendingChange {
    /// Encode as a ledger row. The sequence id is left for the store to assign.
    pub(crate) fn new_row(
        change_type: ChangeType,
        record_id: RecordId,
        table_name: &str,
        timestamp: Timestamp,
    ) -> Row {
        let mut row = Row::new();
        row.insert("change_type".into(), json!(change_type.code()));
        row.insert("record_id".into(), json!(record_id));
        row.insert("table_name".into(), json!(table_name));
        row.insert("timestamp".into(), json!(timestamp));
        row
    }

    /// Decode a ledger row.
    pub(crate) fn from_row(ledger: &str, row: &Row) -> Result<Self> {
        let invalid = |message: &str| Error::InvalidRow {
            table: ledger.to_string(),
            message: message.to_string(),
        };

        let code = row
            .get("change_type")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| invalid("missing change_type"))?;

        Ok(Self {
            id: row_id(ledger, row)?,
            change_type: ChangeType::from_code(code)
                .ok_or_else(|| invalid(&format!("unknown change_type {code}")))?,
            record_id: row
                .get("record_id")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| invalid("missing record_id"))?,
            table_name: row
                .get("table_name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| invalid("missing table_name"))?
                .to_string(),
            timestamp: row
                .get("timestamp")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| invalid("missing timestamp"))?,
        })
    }
}

/// The successful remote replay of one pending change.
///
/// `result` carries the authoritative record returned by insert/update and
/// is `None` for delete confirmations.
#[derive(Debug, Clone, PartialEq)]
pub struct Replayed<R> {
    pub change: PendingChange,
    pub result: Option<R>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip() {
        for ty in [ChangeType::Update, ChangeType::Insert, ChangeType::Delete] {
            assert_eq!(ChangeType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(ChangeType::from_code(9), None);
    }

    #[test]
    fn row_encoding() {
        let mut row = PendingChange::new_row(ChangeType::Delete, 42, "todos", 1000);
        row.insert("id".into(), json!(3));

        let change = PendingChange::from_row("track", &row).unwrap();
        assert_eq!(
            change,
            PendingChange {
                id: 3,
                change_type: ChangeType::Delete,
                record_id: 42,
                table_name: "todos".into(),
                timestamp: 1000,
            }
        );
    }

    #[test]
    fn bad_change_type() {
        let mut row = PendingChange::new_row(ChangeType::Insert, 1, "todos", 1);
        row.insert("id".into(), json!(1));
        row.insert("change_type".into(), json!(7));
        assert!(matches!(
            PendingChange::from_row("track", &row),
            Err(Error::InvalidRow { .. })
        ));
    }

    #[test]
    fn serialization_format() {
        let change = PendingChange {
            id: 1,
            change_type: ChangeType::Insert,
            record_id: 5,
            table_name: "todos".into(),
            timestamp: 10,
        };
        let json = serde_json::to_string(&change).unwrap();
        assert!(json.contains("\"changeType\":\"insert\""));
        assert!(json.contains("recordId"));
    }
}
