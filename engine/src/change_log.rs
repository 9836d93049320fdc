//! The change log: one outstanding local mutation per (record, table).
//!
//! # Precedence
//!
//! Recording a change applies these rules before writing:
//!
//! 1. `Update` over a pending `Insert` or `Delete` is a no-op. The stronger
//!    intention already covers the edit.
//! 2. `Delete` over a pending `Insert` removes the entry and records
//!    nothing. The record never reached the remote, so no call is needed.
//! 3. Anything else replaces the existing entry with a fresh one.

use crate::{
    change::PendingChange, database::Filter, error::Result, ChangeType, ColumnDef, ColumnType,
    Database, RecordId, TableSchema, Timestamp,
};
use std::sync::Arc;

/// Table holding the change log rows.
pub const TRACK_TABLE: &str = "track";

fn track_schema() -> TableSchema {
    TableSchema::new(
        TRACK_TABLE,
        vec![
            ColumnDef::required("change_type", ColumnType::Integer),
            ColumnDef::required("record_id", ColumnType::Integer),
            ColumnDef::required("table_name", ColumnType::Text),
            ColumnDef::required("timestamp", ColumnType::Integer),
        ],
    )
}

fn now() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

fn key(record_id: RecordId, table_name: &str) -> Filter {
    Filter::all()
        .eq("record_id", record_id)
        .eq("table_name", table_name)
}

/// Durable ledger of pending local mutations.
#[derive(Clone)]
pub struct ChangeLog {
    db: Arc<dyn Database>,
}

impl std::fmt::Debug for ChangeLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeLog").finish_non_exhaustive()
    }
}

impl ChangeLog {
    /// Open the change log, creating its table if needed.
    pub async fn open(db: Arc<dyn Database>) -> Result<Self> {
        db.ensure_table(&track_schema()).await?;
        Ok(Self { db })
    }

    /// Record a local mutation, applying precedence rules.
    pub async fn record(
        &self,
        record_id: RecordId,
        table_name: &str,
        change_type: ChangeType,
    ) -> Result<()> {
        let existing = self.change_for(record_id, table_name).await?;

        match (change_type, existing.as_ref().map(|c| c.change_type)) {
            (ChangeType::Update, Some(ChangeType::Insert | ChangeType::Delete)) => {
                tracing::debug!(
                    table = table_name,
                    record_id,
                    "update superseded by pending change"
                );
                return Ok(());
            }
            (ChangeType::Delete, Some(ChangeType::Insert)) => {
                tracing::debug!(
                    table = table_name,
                    record_id,
                    "delete cancels unsynced insert"
                );
                return self.clear(record_id, table_name).await;
            }
            _ => {}
        }

        self.clear(record_id, table_name).await?;
        self.db
            .insert(
                TRACK_TABLE,
                PendingChange::new_row(change_type, record_id, table_name, now()),
            )
            .await?;

        tracing::debug!(
            table = table_name,
            record_id,
            change = %change_type,
            "recorded pending change"
        );
        Ok(())
    }

    /// The pending change for a record, if any.
    pub async fn change_for(
        &self,
        record_id: RecordId,
        table_name: &str,
    ) -> Result<Option<PendingChange>> {
        let rows = self.db.select(TRACK_TABLE, &key(record_id, table_name)).await?;
        rows.first()
            .map(|row| PendingChange::from_row(TRACK_TABLE, row))
            .transpose()
    }

    /// All pending changes of a table, in sequence order.
    ///
    /// The returned vector is a snapshot; later ledger writes do not
    /// affect it.
    pub async fn changes_for(&self, table_name: &str) -> Result<Vec<PendingChange>> {
        self.select(&Filter::all().eq("table_name", table_name))
            .await
    }

    /// Every pending change across all tables, in sequence order.
    pub async fn all(&self) -> Result<Vec<PendingChange>> {
        self.select(&Filter::all()).await
    }

    async fn select(&self, filter: &Filter) -> Result<Vec<PendingChange>> {
        self.db
            .select(TRACK_TABLE, filter)
            .await?
            .iter()
            .map(|row| PendingChange::from_row(TRACK_TABLE, row))
            .collect()
    }

    /// Remove the entry for a record. Absent entries are fine.
    pub async fn clear(&self, record_id: RecordId, table_name: &str) -> Result<()> {
        self.db
            .delete(TRACK_TABLE, &key(record_id, table_name))
            .await?;
        Ok(())
    }

    /// Remove every entry of a table.
    pub async fn clear_all(&self, table_name: &str) -> Result<()> {
        let removed = self
            .db
            .delete(TRACK_TABLE, &Filter::all().eq("table_name", table_name))
            .await?;
        tracing::debug!(table = table_name, removed, "cleared pending changes");
        Ok(())
    }

    /// Remove every entry of every table.
    pub async fn clear_everything(&self) -> Result<()> {
        self.db.delete(TRACK_TABLE, &Filter::all()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryDatabase;

    async fn change_log() -> ChangeLog {
        ChangeLog::open(Arc::new(MemoryDatabase::new()))
            .await
            .unwrap()
    }

    async fn type_of(log: &ChangeLog, id: RecordId) -> Option<ChangeType> {
        log.change_for(id, "todos")
            .await
            .unwrap()
            .map(|c| c.change_type)
    }

    #[tokio::test]
    async fn records_single_entry() {
        let log = change_log().await;
        log.record(1, "todos", ChangeType::Insert).await.unwrap();

        let change = log.change_for(1, "todos").await.unwrap().unwrap();
        assert_eq!(change.change_type, ChangeType::Insert);
        assert_eq!(change.record_id, 1);
        assert_eq!(change.table_name, "todos");
        assert!(change.timestamp > 0);
    }

    #[tokio::test]
    async fn update_does_not_override_insert_or_delete() {
        let log = change_log().await;

        log.record(1, "todos", ChangeType::Insert).await.unwrap();
        log.record(1, "todos", ChangeType::Update).await.unwrap();
        assert_eq!(type_of(&log, 1).await, Some(ChangeType::Insert));

        log.record(2, "todos", ChangeType::Delete).await.unwrap();
        log.record(2, "todos", ChangeType::Update).await.unwrap();
        assert_eq!(type_of(&log, 2).await, Some(ChangeType::Delete));
    }

    #[tokio::test]
    async fn delete_cancels_insert() {
        let log = change_log().await;
        log.record(1, "todos", ChangeType::Insert).await.unwrap();
        log.record(1, "todos", ChangeType::Delete).await.unwrap();

        assert_eq!(type_of(&log, 1).await, None);
        assert!(log.changes_for("todos").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_replaces_update() {
        let log = change_log().await;
        log.record(1, "todos", ChangeType::Update).await.unwrap();
        log.record(1, "todos", ChangeType::Delete).await.unwrap();
        assert_eq!(type_of(&log, 1).await, Some(ChangeType::Delete));
        assert_eq!(log.changes_for("todos").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn repeated_update_replaces_entry() {
        let log = change_log().await;
        log.record(1, "todos", ChangeType::Update).await.unwrap();
        let first = log.change_for(1, "todos").await.unwrap().unwrap();
        log.record(1, "todos", ChangeType::Update).await.unwrap();
        let second = log.change_for(1, "todos").await.unwrap().unwrap();

        assert_eq!(log.changes_for("todos").await.unwrap().len(), 1);
        assert_eq!(second.change_type, ChangeType::Update);
        assert!(second.timestamp >= first.timestamp);
    }

    #[tokio::test]
    async fn insert_after_delete_replaces() {
        let log = change_log().await;
        log.record(1, "todos", ChangeType::Delete).await.unwrap();
        log.record(1, "todos", ChangeType::Insert).await.unwrap();
        assert_eq!(type_of(&log, 1).await, Some(ChangeType::Insert));
    }

    #[tokio::test]
    async fn keys_are_scoped_by_table() {
        let log = change_log().await;
        log.record(1, "todos", ChangeType::Insert).await.unwrap();
        log.record(1, "lists", ChangeType::Update).await.unwrap();

        assert_eq!(type_of(&log, 1).await, Some(ChangeType::Insert));
        assert_eq!(log.changes_for("lists").await.unwrap().len(), 1);
        assert_eq!(log.all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn changes_for_is_a_snapshot_in_sequence_order() {
        let log = change_log().await;
        log.record(3, "todos", ChangeType::Insert).await.unwrap();
        log.record(1, "todos", ChangeType::Update).await.unwrap();
        log.record(2, "todos", ChangeType::Delete).await.unwrap();

        let snapshot = log.changes_for("todos").await.unwrap();
        log.clear_all("todos").await.unwrap();

        let ids: Vec<_> = snapshot.iter().map(|c| c.record_id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
        assert!(log.changes_for("todos").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let log = change_log().await;
        log.clear(9, "todos").await.unwrap();
        log.record(9, "todos", ChangeType::Update).await.unwrap();
        log.clear(9, "todos").await.unwrap();
        log.clear(9, "todos").await.unwrap();
        assert_eq!(type_of(&log, 9).await, None);
    }

    #[tokio::test]
    async fn clear_everything() {
        let log = change_log().await;
        log.record(1, "todos", ChangeType::Insert).await.unwrap();
        log.record(1, "lists", ChangeType::Insert).await.unwrap();
        log.clear_everything().await.unwrap();
        assert!(log.all().await.unwrap().is_empty());
    }
}
