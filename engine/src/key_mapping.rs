//! Key mapping: bridging locally minted ids to remote-assigned ids.
//!
//! When the remote authority answers an insert with a different id, the
//! sync engine records a [`KeyMapping`]. At the end of the pass,
//! [`KeyMappingStore::remap_foreign_keys`] rewrites every declared foreign
//! key column that still holds the local id, then clears the ledger.

use crate::{
    database::Filter, error::Result, record::row_id, ColumnDef, ColumnType, Database, Error,
    RecordId, Row, TableName, TableSchema,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Table holding key mapping rows.
pub const KEY_MAPPING_TABLE: &str = "key_mapping";

fn key_mapping_schema() -> TableSchema {
    TableSchema::new(
        KEY_MAPPING_TABLE,
        vec![
            ColumnDef::required("table_name", ColumnType::Text),
            ColumnDef::required("local_id", ColumnType::Integer),
            ColumnDef::required("remote_id", ColumnType::Integer),
        ],
    )
}

/// A local id to remote id correspondence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMapping {
    /// Sequence id assigned by the ledger
    pub id: i64,
    /// Table whose record was renumbered
    pub table_name: TableName,
    /// Temporary id minted locally
    pub local_id: RecordId,
    /// Id assigned by the remote authority
    pub remote_id: RecordId,
}

fn invalid(message: String) -> Error {
    Error::InvalidRow {
        table: KEY_MAPPING_TABLE.to_string(),
        message,
    }
}

fn int_column(row: &Row, name: &str) -> Result<i64> {
    row.get(name)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| invalid(format!("{name} must be an integer")))
}

impl KeyMapping {
    fn from_row(row: &Row) -> Result<Self> {
        let table_name = row
            .get("table_name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| invalid("missing table_name".into()))?;

        Ok(Self {
            id: row_id(KEY_MAPPING_TABLE, row)?,
            table_name: table_name.to_string(),
            local_id: int_column(row, "local_id")?,
            remote_id: int_column(row, "remote_id")?,
        })
    }
}

/// A column of a child table that may hold a parent's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    /// Column in the child table
    pub field: String,
    /// Table the column points into
    pub parent_table: TableName,
}

/// Declared foreign-key relationships, keyed by child table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationships {
    tables: BTreeMap<TableName, Vec<ForeignKey>>,
}

impl Relationships {
    /// No relationships.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that `child_table.field` references `parent_table`.
    pub fn with(
        mut self,
        child_table: impl Into<TableName>,
        field: impl Into<String>,
        parent_table: impl Into<TableName>,
    ) -> Self {
        self.tables
            .entry(child_table.into())
            .or_default()
            .push(ForeignKey {
                field: field.into(),
                parent_table: parent_table.into(),
            });
        self
    }

    /// Foreign keys declared for a child table.
    pub fn foreign_keys(&self, child_table: &str) -> &[ForeignKey] {
        self.tables
            .get(child_table)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Iterate (child table, foreign keys) in table-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&TableName, &Vec<ForeignKey>)> {
        self.tables.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Transient ledger of id reassignments for the current sync pass.
#[derive(Clone)]
pub struct KeyMappingStore {
    db: Arc<dyn Database>,
}

impl std::fmt::Debug for KeyMappingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMappingStore").finish_non_exhaustive()
    }
}

impl KeyMappingStore {
    /// Open the store, creating its table if needed.
    pub async fn open(db: Arc<dyn Database>) -> Result<Self> {
        db.ensure_table(&key_mapping_schema()).await?;
        Ok(Self { db })
    }

    /// Append a mapping entry.
    pub async fn record_mapping(
        &self,
        table_name: &str,
        local_id: RecordId,
        remote_id: RecordId,
    ) -> Result<()> {
        let mut row = Row::new();
        row.insert("table_name".into(), json!(table_name));
        row.insert("local_id".into(), json!(local_id));
        row.insert("remote_id".into(), json!(remote_id));
        self.db.insert(KEY_MAPPING_TABLE, row).await?;

        tracing::debug!(table = table_name, local_id, remote_id, "recorded key mapping");
        Ok(())
    }

    /// Every recorded mapping, in sequence order.
    pub async fn mappings(&self) -> Result<Vec<KeyMapping>> {
        self.select(&Filter::all()).await
    }

    /// Mappings recorded for one parent table.
    pub async fn mappings_for(&self, table_name: &str) -> Result<Vec<KeyMapping>> {
        self.select(&Filter::all().eq("table_name", table_name))
            .await
    }

    async fn select(&self, filter: &Filter) -> Result<Vec<KeyMapping>> {
        self.db
            .select(KEY_MAPPING_TABLE, filter)
            .await?
            .iter()
            .map(KeyMapping::from_row)
            .collect()
    }

    /// Remove every mapping.
    pub async fn clear(&self) -> Result<()> {
        self.db.delete(KEY_MAPPING_TABLE, &Filter::all()).await?;
        Ok(())
    }

    /// Rewrite foreign keys that still hold a remapped local id, then clear
    /// all mappings. Returns the number of rows rewritten.
    ///
    /// Each row is rewritten at most once per relationship, so a remote id
    /// that happens to equal another mapping's local id is never remapped
    /// a second time. Child tables missing from the local database are
    /// skipped.
    pub async fn remap_foreign_keys(&self, relationships: &Relationships) -> Result<usize> {
        let mut by_parent: HashMap<TableName, HashMap<RecordId, RecordId>> = HashMap::new();
        for mapping in self.mappings().await? {
            by_parent
                .entry(mapping.table_name)
                .or_default()
                .insert(mapping.local_id, mapping.remote_id);
        }

        let mut rewritten = 0;
        if !by_parent.is_empty() {
            for (child_table, foreign_keys) in relationships.iter() {
                rewritten += self
                    .remap_table(child_table, foreign_keys, &by_parent)
                    .await?;
            }
        }

        self.clear().await?;
        if rewritten > 0 {
            tracing::info!(rewritten, "remapped foreign keys");
        }
        Ok(rewritten)
    }

    async fn remap_table(
        &self,
        child_table: &str,
        foreign_keys: &[ForeignKey],
        by_parent: &HashMap<TableName, HashMap<RecordId, RecordId>>,
    ) -> Result<usize> {
        let mut rewritten = 0;

        for foreign_key in foreign_keys {
            let Some(ids) = by_parent.get(&foreign_key.parent_table) else {
                continue;
            };

            let rows = match self.db.select(child_table, &Filter::all()).await {
                Ok(rows) => rows,
                Err(Error::TableNotFound(_)) => {
                    tracing::debug!(table = child_table, "child table absent, skipping remap");
                    return Ok(rewritten);
                }
                Err(e) => return Err(e),
            };

            for row in &rows {
                let Some(remote_id) = row
                    .get(&foreign_key.field)
                    .and_then(|v| v.as_i64())
                    .and_then(|local_id| ids.get(&local_id))
                else {
                    continue;
                };

                let id = row_id(child_table, row)?;
                let mut values = Row::new();
                values.insert(foreign_key.field.clone(), json!(remote_id));
                self.db.update(child_table, &Filter::id(id), values).await?;
                rewritten += 1;
            }
        }

        Ok(rewritten)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryDatabase;

    async fn setup() -> (Arc<MemoryDatabase>, KeyMappingStore) {
        let db = Arc::new(MemoryDatabase::new());
        db.ensure_table(&TableSchema::new(
            "comments",
            vec![
                ColumnDef::required("body", ColumnType::Text),
                ColumnDef::nullable("post_id", ColumnType::Integer),
            ],
        ))
        .await
        .unwrap();
        let store = KeyMappingStore::open(db.clone()).await.unwrap();
        (db, store)
    }

    async fn comment(db: &MemoryDatabase, id: i64, post_id: Option<i64>) {
        db.insert(
            "comments",
            json!({"id": id, "body": format!("c{id}"), "post_id": post_id})
                .as_object()
                .cloned()
                .unwrap(),
        )
        .await
        .unwrap();
    }

    async fn post_ids(db: &MemoryDatabase) -> Vec<Option<i64>> {
        db.select("comments", &Filter::all())
            .await
            .unwrap()
            .iter()
            .map(|r| r["post_id"].as_i64())
            .collect()
    }

    #[tokio::test]
    async fn records_and_lists_mappings() {
        let (_, store) = setup().await;
        store.record_mapping("posts", 1, 101).await.unwrap();
        store.record_mapping("users", 1, 55).await.unwrap();

        let all = store.mappings().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].local_id, 1);
        assert_eq!(all[0].remote_id, 101);

        let posts = store.mappings_for("posts").await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].table_name, "posts");
    }

    #[tokio::test]
    async fn rewrites_matching_foreign_keys_and_clears() {
        let (db, store) = setup().await;
        comment(&db, 1, Some(1)).await;
        comment(&db, 2, Some(2)).await;
        comment(&db, 3, None).await;

        store.record_mapping("posts", 1, 101).await.unwrap();
        let relationships = Relationships::new().with("comments", "post_id", "posts");

        let rewritten = store.remap_foreign_keys(&relationships).await.unwrap();
        assert_eq!(rewritten, 1);
        assert_eq!(post_ids(&db).await, vec![Some(101), Some(2), None]);
        assert!(store.mappings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mappings_of_other_parents_are_ignored() {
        let (db, store) = setup().await;
        comment(&db, 1, Some(1)).await;

        store.record_mapping("users", 1, 77).await.unwrap();
        let relationships = Relationships::new().with("comments", "post_id", "posts");

        assert_eq!(store.remap_foreign_keys(&relationships).await.unwrap(), 0);
        assert_eq!(post_ids(&db).await, vec![Some(1)]);
        assert!(store.mappings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn chained_mappings_do_not_cascade() {
        let (db, store) = setup().await;
        comment(&db, 1, Some(1)).await;
        comment(&db, 2, Some(2)).await;

        // 1 -> 2 and 2 -> 3 in the same pass
        store.record_mapping("posts", 1, 2).await.unwrap();
        store.record_mapping("posts", 2, 3).await.unwrap();
        let relationships = Relationships::new().with("comments", "post_id", "posts");

        assert_eq!(store.remap_foreign_keys(&relationships).await.unwrap(), 2);
        assert_eq!(post_ids(&db).await, vec![Some(2), Some(3)]);
    }

    #[tokio::test]
    async fn missing_child_table_is_skipped() {
        let (db, store) = setup().await;
        comment(&db, 1, Some(1)).await;
        store.record_mapping("posts", 1, 101).await.unwrap();

        let relationships = Relationships::new()
            .with("attachments", "post_id", "posts")
            .with("comments", "post_id", "posts");

        assert_eq!(store.remap_foreign_keys(&relationships).await.unwrap(), 1);
        assert_eq!(post_ids(&db).await, vec![Some(101)]);
    }

    #[tokio::test]
    async fn clears_even_without_relationships() {
        let (_, store) = setup().await;
        store.record_mapping("posts", 1, 101).await.unwrap();
        assert_eq!(
            store
                .remap_foreign_keys(&Relationships::new())
                .await
                .unwrap(),
            0
        );
        assert!(store.mappings().await.unwrap().is_empty());
    }

    #[test]
    fn relationships_builder() {
        let relationships = Relationships::new()
            .with("comments", "post_id", "posts")
            .with("comments", "author_id", "users");

        let fks = relationships.foreign_keys("comments");
        assert_eq!(fks.len(), 2);
        assert_eq!(fks[1].field, "author_id");
        assert_eq!(fks[1].parent_table, "users");
        assert!(relationships.foreign_keys("posts").is_empty());
        assert!(!relationships.is_empty());
    }
}
