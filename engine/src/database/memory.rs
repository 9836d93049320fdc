//! In-memory database backend.

use super::{Database, Filter};
use crate::{
    error::Result,
    record::row_id,
    schema::ID_COLUMN,
    snapshot::{DatabaseSnapshot, TableSnapshot},
    Error, RecordId, Row, TableName, TableSchema,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone)]
struct MemoryTable {
    schema: TableSchema,
    rows: BTreeMap<RecordId, Row>,
}

impl MemoryTable {
    fn next_id(&self) -> RecordId {
        self.rows.keys().next_back().map_or(1, |id| id + 1)
    }
}

/// A [`Database`] that keeps every table in memory.
///
/// Rows are validated against the declared schema on every write. The
/// whole state can be exported to and restored from a
/// [`DatabaseSnapshot`].
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    tables: RwLock<HashMap<TableName, MemoryTable>>,
    disconnected: AtomicBool,
}

impl MemoryDatabase {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the connection: every call fails until [`reconnect`](Self::reconnect).
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    /// Restore the connection.
    pub fn reconnect(&self) {
        self.disconnected.store(false, Ordering::SeqCst);
    }

    fn check_connection(&self) -> Result<()> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(Error::Storage("no database connection".into()));
        }
        Ok(())
    }

    /// Names of all tables, sorted.
    pub fn table_names(&self) -> Vec<TableName> {
        let mut names: Vec<_> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Export every table as a snapshot.
    pub fn export_state(&self) -> DatabaseSnapshot {
        let mut snapshot = DatabaseSnapshot::new();
        for (name, table) in self.tables.read().iter() {
            snapshot.tables.insert(
                name.clone(),
                TableSnapshot {
                    schema: table.schema.clone(),
                    rows: table.rows.clone(),
                },
            );
        }
        snapshot
    }

    /// Replace the whole state with a snapshot.
    pub fn import_state(&self, snapshot: DatabaseSnapshot) -> Result<()> {
        snapshot.validate()?;

        let tables = snapshot
            .tables
            .into_iter()
            .map(|(name, table)| {
                (
                    name,
                    MemoryTable {
                        schema: table.schema,
                        rows: table.rows,
                    },
                )
            })
            .collect();

        *self.tables.write() = tables;
        Ok(())
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn ensure_table(&self, schema: &TableSchema) -> Result<()> {
        self.check_connection()?;
        schema.validate_identifiers()?;

        self.tables
            .write()
            .entry(schema.name.clone())
            .or_insert_with(|| MemoryTable {
                schema: schema.clone(),
                rows: BTreeMap::new(),
            });
        Ok(())
    }

    async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>> {
        self.check_connection()?;
        let tables = self.tables.read();
        let table = tables
            .get(table)
            .ok_or_else(|| Error::TableNotFound(table.to_string()))?;

        Ok(table
            .rows
            .values()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect())
    }

    async fn insert(&self, table: &str, mut row: Row) -> Result<RecordId> {
        self.check_connection()?;
        let mut tables = self.tables.write();
        let entry = tables
            .get_mut(table)
            .ok_or_else(|| Error::TableNotFound(table.to_string()))?;

        entry.schema.validate_row(&row)?;

        let id = match row.get(ID_COLUMN) {
            Some(_) => row_id(table, &row)?,
            None => {
                let id = entry.next_id();
                row.insert(ID_COLUMN.to_string(), id.into());
                id
            }
        };

        entry.rows.insert(id, row);
        Ok(id)
    }

    async fn update(&self, table: &str, filter: &Filter, values: Row) -> Result<u64> {
        self.check_connection()?;
        let mut tables = self.tables.write();
        let entry = tables
            .get_mut(table)
            .ok_or_else(|| Error::TableNotFound(table.to_string()))?;

        entry.schema.validate_values(&values)?;
        if values.contains_key(ID_COLUMN) {
            return Err(Error::InvalidRow {
                table: table.to_string(),
                message: "id cannot be updated in place".into(),
            });
        }

        let mut affected = 0;
        for row in entry.rows.values_mut().filter(|row| filter.matches(row)) {
            for (column, value) in &values {
                row.insert(column.clone(), value.clone());
            }
            affected += 1;
        }
        Ok(affected)
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<u64> {
        self.check_connection()?;
        let mut tables = self.tables.write();
        let entry = tables
            .get_mut(table)
            .ok_or_else(|| Error::TableNotFound(table.to_string()))?;

        let before = entry.rows.len();
        entry.rows.retain(|_, row| !filter.matches(row));
        Ok((before - entry.rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ColumnDef, ColumnType};
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    async fn todos_db() -> MemoryDatabase {
        let db = MemoryDatabase::new();
        db.ensure_table(&TableSchema::new(
            "todos",
            vec![
                ColumnDef::required("title", ColumnType::Text),
                ColumnDef::nullable("list_id", ColumnType::Integer),
            ],
        ))
        .await
        .unwrap();
        db
    }

    #[tokio::test]
    async fn insert_assigns_ids() {
        let db = todos_db().await;
        let a = db.insert("todos", row(json!({"title": "a"}))).await.unwrap();
        let b = db.insert("todos", row(json!({"title": "b"}))).await.unwrap();
        assert_eq!((a, b), (1, 2));

        let c = db
            .insert("todos", row(json!({"id": 10, "title": "c"})))
            .await
            .unwrap();
        assert_eq!(c, 10);
        let d = db.insert("todos", row(json!({"title": "d"}))).await.unwrap();
        assert_eq!(d, 11);
    }

    #[tokio::test]
    async fn insert_replaces_existing() {
        let db = todos_db().await;
        db.insert("todos", row(json!({"id": 1, "title": "a"})))
            .await
            .unwrap();
        db.insert("todos", row(json!({"id": 1, "title": "b"})))
            .await
            .unwrap();

        let rows = db.select("todos", &Filter::all()).await.unwrap();
        assert_eq!(rows, vec![row(json!({"id": 1, "title": "b"}))]);
    }

    #[tokio::test]
    async fn select_orders_by_id() {
        let db = todos_db().await;
        for id in [3, 1, 2] {
            db.insert("todos", row(json!({"id": id, "title": id.to_string()})))
                .await
                .unwrap();
        }
        let ids: Vec<_> = db
            .select("todos", &Filter::all())
            .await
            .unwrap()
            .iter()
            .map(|r| r["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn update_and_delete() {
        let db = todos_db().await;
        db.insert("todos", row(json!({"id": 1, "title": "a", "list_id": 5})))
            .await
            .unwrap();
        db.insert("todos", row(json!({"id": 2, "title": "b", "list_id": 5})))
            .await
            .unwrap();

        let affected = db
            .update(
                "todos",
                &Filter::all().eq("list_id", 5),
                row(json!({"list_id": 50})),
            )
            .await
            .unwrap();
        assert_eq!(affected, 2);

        let deleted = db.delete("todos", &Filter::id(1)).await.unwrap();
        assert_eq!(deleted, 1);
        let rows = db.select("todos", &Filter::all()).await.unwrap();
        assert_eq!(rows, vec![row(json!({"id": 2, "title": "b", "list_id": 50}))]);
    }

    #[tokio::test]
    async fn unknown_table() {
        let db = MemoryDatabase::new();
        assert_eq!(
            db.select("nope", &Filter::all()).await,
            Err(Error::TableNotFound("nope".into()))
        );
    }

    #[tokio::test]
    async fn rejects_invalid_rows() {
        let db = todos_db().await;
        let result = db.insert("todos", row(json!({"title": 1}))).await;
        assert!(matches!(result, Err(Error::TypeMismatch { .. })));
    }

    #[tokio::test]
    async fn disconnect_fails_every_call() {
        let db = todos_db().await;
        db.disconnect();
        assert!(matches!(
            db.select("todos", &Filter::all()).await,
            Err(Error::Storage(_))
        ));
        db.reconnect();
        assert!(db.select("todos", &Filter::all()).await.is_ok());
    }

    #[tokio::test]
    async fn export_import_roundtrip() {
        let db = todos_db().await;
        db.insert("todos", row(json!({"title": "a"}))).await.unwrap();

        let snapshot = db.export_state();
        let json = snapshot.to_json().unwrap();

        let restored = MemoryDatabase::new();
        restored
            .import_state(DatabaseSnapshot::from_json(&json).unwrap())
            .unwrap();
        assert_eq!(restored.table_names(), vec!["todos".to_string()]);
        assert_eq!(
            restored.select("todos", &Filter::all()).await.unwrap(),
            vec![row(json!({"id": 1, "title": "a"}))]
        );
    }
}
