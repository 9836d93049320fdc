//! Repository - local CRUD access to one table of the replica.
//!
//! Every mutating call takes a `track` flag. Tracked writes record the
//! matching intention in the [`ChangeLog`]; the sync engine always writes
//! untracked.

use crate::{
    change::PendingChange,
    database::Filter,
    error::Result,
    record::{from_row, to_row},
    ChangeLog, ChangeType, Database, Error, Record, RecordId, TableName, TableSchema,
};
use std::marker::PhantomData;
use std::sync::Arc;

/// How [`Repository::create`] picks an id for a new local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdAllocation {
    /// One past the highest id in the table or its pending changes.
    #[default]
    Sequential,
    /// One below the lowest id in the table and below zero, so temporary
    /// ids never collide with positive remote ids.
    Negative,
}

/// Typed access to the rows of one table.
pub struct Repository<R: Record> {
    db: Arc<dyn Database>,
    change_log: ChangeLog,
    schema: TableSchema,
    id_allocation: IdAllocation,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> std::fmt::Debug for Repository<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("table", &self.schema.name)
            .field("id_allocation", &self.id_allocation)
            .finish_non_exhaustive()
    }
}

impl<R: Record> Repository<R> {
    /// Open a repository, creating the table from `R::columns()` if needed.
    pub async fn open(
        db: Arc<dyn Database>,
        change_log: ChangeLog,
        table: impl Into<TableName>,
    ) -> Result<Self> {
        let schema = TableSchema::new(table, R::columns());
        db.ensure_table(&schema).await?;

        Ok(Self {
            db,
            change_log,
            schema,
            id_allocation: IdAllocation::default(),
            _record: PhantomData,
        })
    }

    /// Builder-style id allocation override.
    pub fn with_id_allocation(mut self, id_allocation: IdAllocation) -> Self {
        self.id_allocation = id_allocation;
        self
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// Declared schema of the table.
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// The change log this repository reports to.
    pub fn change_log(&self) -> &ChangeLog {
        &self.change_log
    }

    /// All records, ordered by id.
    pub async fn get_all(&self) -> Result<Vec<R>> {
        self.db
            .select(self.name(), &Filter::all())
            .await?
            .into_iter()
            .map(|row| from_row(self.name(), row))
            .collect()
    }

    /// A record by id.
    pub async fn get(&self, id: RecordId) -> Result<Option<R>> {
        self.db
            .select(self.name(), &Filter::id(id))
            .await?
            .into_iter()
            .next()
            .map(|row| from_row(self.name(), row))
            .transpose()
    }

    /// Highest id in the table, or 0 when empty.
    pub async fn last_id(&self) -> Result<RecordId> {
        Ok(self
            .get_all()
            .await?
            .iter()
            .map(R::id)
            .max()
            .unwrap_or(0))
    }

    /// Ids still named by a pending change are taken even when the row is
    /// gone, so a fresh record never overwrites an unsynced delete.
    async fn next_local_id(&self) -> Result<RecordId> {
        let records = self.get_all().await?;
        let pending = self.changes().await?;
        let ids = records
            .iter()
            .map(R::id)
            .chain(pending.iter().map(|c| c.record_id));
        Ok(match self.id_allocation {
            IdAllocation::Sequential => ids.max().unwrap_or(0) + 1,
            IdAllocation::Negative => ids.min().unwrap_or(0).min(0) - 1,
        })
    }

    /// Assign a fresh local id and insert the record, tracked.
    pub async fn create(&self, mut record: R) -> Result<R> {
        record.set_id(self.next_local_id().await?);
        self.insert(&record, true).await?;
        Ok(record)
    }

    /// Insert or replace a record.
    pub async fn insert(&self, record: &R, track: bool) -> Result<()> {
        self.db.insert(self.name(), to_row(record)?).await?;
        if track {
            self.change_log
                .record(record.id(), self.name(), ChangeType::Insert)
                .await?;
        }
        Ok(())
    }

    /// Overwrite the record with the same id.
    ///
    /// An untracked update of a missing record is a no-op; a tracked one
    /// fails with [`Error::RecordNotFound`].
    pub async fn update(&self, record: &R, track: bool) -> Result<()> {
        let mut values = to_row(record)?;
        values.remove(crate::schema::ID_COLUMN);

        let affected = self
            .db
            .update(self.name(), &Filter::id(record.id()), values)
            .await?;

        if track {
            if affected == 0 {
                return Err(self.not_found(record.id()));
            }
            self.change_log
                .record(record.id(), self.name(), ChangeType::Update)
                .await?;
        }
        Ok(())
    }

    /// Delete a record by id.
    ///
    /// An untracked delete of a missing record is a no-op; a tracked one
    /// fails with [`Error::RecordNotFound`].
    pub async fn delete(&self, id: RecordId, track: bool) -> Result<()> {
        let affected = self.db.delete(self.name(), &Filter::id(id)).await?;

        if track {
            if affected == 0 {
                return Err(self.not_found(id));
            }
            self.change_log
                .record(id, self.name(), ChangeType::Delete)
                .await?;
        }
        Ok(())
    }

    /// Delete every record, untracked.
    pub async fn clear(&self) -> Result<()> {
        self.db.delete(self.name(), &Filter::all()).await?;
        Ok(())
    }

    /// Pending changes of this table.
    pub async fn changes(&self) -> Result<Vec<PendingChange>> {
        self.change_log.changes_for(self.name()).await
    }

    /// Forget the pending change of one record.
    pub async fn clear_changes(&self, id: RecordId) -> Result<()> {
        self.change_log.clear(id, self.name()).await
    }

    fn not_found(&self, id: RecordId) -> Error {
        Error::RecordNotFound {
            table: self.name().to_string(),
            id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ColumnDef, ColumnType, MemoryDatabase};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Todo {
        id: RecordId,
        title: String,
        done: bool,
    }

    impl Todo {
        fn new(id: RecordId, title: &str) -> Self {
            Self {
                id,
                title: title.into(),
                done: false,
            }
        }
    }

    impl Record for Todo {
        fn id(&self) -> RecordId {
            self.id
        }

        fn set_id(&mut self, id: RecordId) {
            self.id = id;
        }

        fn columns() -> Vec<ColumnDef> {
            vec![
                ColumnDef::required("title", ColumnType::Text),
                ColumnDef::required("done", ColumnType::Bool),
            ]
        }
    }

    async fn repository() -> Repository<Todo> {
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let log = ChangeLog::open(db.clone()).await.unwrap();
        Repository::open(db, log, "todos").await.unwrap()
    }

    async fn pending(repo: &Repository<Todo>) -> Vec<(RecordId, ChangeType)> {
        repo.changes()
            .await
            .unwrap()
            .into_iter()
            .map(|c| (c.record_id, c.change_type))
            .collect()
    }

    #[tokio::test]
    async fn create_assigns_sequential_ids() {
        let repo = repository().await;
        let a = repo.create(Todo::new(0, "a")).await.unwrap();
        let b = repo.create(Todo::new(0, "b")).await.unwrap();

        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(repo.get_all().await.unwrap(), vec![a, b]);
        assert_eq!(
            pending(&repo).await,
            vec![(1, ChangeType::Insert), (2, ChangeType::Insert)]
        );
        assert_eq!(repo.last_id().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn create_with_negative_ids() {
        let repo = repository()
            .await
            .with_id_allocation(IdAllocation::Negative);
        repo.insert(&Todo::new(5, "remote"), false).await.unwrap();

        let a = repo.create(Todo::new(0, "a")).await.unwrap();
        let b = repo.create(Todo::new(0, "b")).await.unwrap();
        assert_eq!((a.id, b.id), (-1, -2));
    }

    #[tokio::test]
    async fn create_skips_ids_with_pending_delete() {
        let repo = repository().await;
        repo.insert(&Todo::new(1, "synced"), false).await.unwrap();
        repo.delete(1, true).await.unwrap();

        let todo = repo.create(Todo::new(0, "new")).await.unwrap();
        assert_eq!(todo.id, 2);
        assert_eq!(
            pending(&repo).await,
            vec![(1, ChangeType::Delete), (2, ChangeType::Insert)]
        );

        let negative = repository()
            .await
            .with_id_allocation(IdAllocation::Negative);
        negative.insert(&Todo::new(-1, "draft"), false).await.unwrap();
        negative.delete(-1, true).await.unwrap();
        assert_eq!(negative.create(Todo::new(0, "c")).await.unwrap().id, -2);
    }

    #[tokio::test]
    async fn untracked_writes_leave_no_changes() {
        let repo = repository().await;
        repo.insert(&Todo::new(1, "a"), false).await.unwrap();
        repo.update(&Todo::new(1, "b"), false).await.unwrap();
        repo.update(&Todo::new(9, "missing"), false).await.unwrap();
        repo.delete(9, false).await.unwrap();

        assert_eq!(repo.get(1).await.unwrap(), Some(Todo::new(1, "b")));
        assert!(pending(&repo).await.is_empty());
    }

    #[tokio::test]
    async fn tracked_update_and_delete() {
        let repo = repository().await;
        repo.insert(&Todo::new(1, "a"), false).await.unwrap();

        repo.update(&Todo::new(1, "b"), true).await.unwrap();
        assert_eq!(pending(&repo).await, vec![(1, ChangeType::Update)]);

        repo.delete(1, true).await.unwrap();
        assert_eq!(pending(&repo).await, vec![(1, ChangeType::Delete)]);
        assert_eq!(repo.get(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn tracked_write_of_missing_record_fails() {
        let repo = repository().await;
        assert_eq!(
            repo.update(&Todo::new(3, "x"), true).await,
            Err(Error::RecordNotFound {
                table: "todos".into(),
                id: 3
            })
        );
        assert!(matches!(
            repo.delete(3, true).await,
            Err(Error::RecordNotFound { .. })
        ));
        assert!(pending(&repo).await.is_empty());
    }

    #[tokio::test]
    async fn create_then_delete_cancels() {
        let repo = repository().await;
        let todo = repo.create(Todo::new(0, "a")).await.unwrap();
        repo.delete(todo.id, true).await.unwrap();
        assert!(pending(&repo).await.is_empty());
    }

    #[tokio::test]
    async fn clear_and_clear_changes() {
        let repo = repository().await;
        let todo = repo.create(Todo::new(0, "a")).await.unwrap();
        repo.clear_changes(todo.id).await.unwrap();
        assert!(pending(&repo).await.is_empty());

        repo.clear().await.unwrap();
        assert!(repo.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn storage_failures_surface() {
        let db = Arc::new(MemoryDatabase::new());
        let log = ChangeLog::open(db.clone()).await.unwrap();
        let repo: Repository<Todo> = Repository::open(db.clone(), log, "todos").await.unwrap();

        db.disconnect();
        assert!(matches!(
            repo.insert(&Todo::new(1, "a"), true).await,
            Err(Error::Storage(_))
        ));
    }
}
