//! Application-facing facade over one synchronized table.

use crate::{
    change::PendingChange,
    error::Result,
    key_mapping::{KeyMappingStore, Relationships},
    remote::RemoteClient,
    repository::Repository,
    sync::{SyncEngine, SyncOutcome},
    ChangeLog, Database, Record, RecordId, TableName,
};
use std::sync::Arc;

/// Local CRUD with change tracking, plus sync against the remote.
///
/// Local writes never touch the network. [`sync`](Self::sync) fetches the
/// remote table and runs one [`SyncEngine`] pass.
pub struct RecordService<R: Record> {
    repository: Arc<Repository<R>>,
    remote: Arc<dyn RemoteClient<R>>,
    engine: SyncEngine<R>,
}

impl<R: Record> std::fmt::Debug for RecordService<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordService")
            .field("table", &self.repository.name())
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl<R: Record> RecordService<R> {
    pub fn new(
        repository: Arc<Repository<R>>,
        remote: Arc<dyn RemoteClient<R>>,
        key_mapping: KeyMappingStore,
        relationships: Relationships,
    ) -> Self {
        let engine = SyncEngine::new(
            repository.clone(),
            remote.clone(),
            key_mapping,
            relationships,
        );
        Self {
            repository,
            remote,
            engine,
        }
    }

    /// Open the change log, key mapping store and table on `db` and wire
    /// them to `remote`.
    pub async fn open(
        db: Arc<dyn Database>,
        table: impl Into<TableName>,
        remote: Arc<dyn RemoteClient<R>>,
        relationships: Relationships,
    ) -> Result<Self> {
        let change_log = ChangeLog::open(db.clone()).await?;
        let key_mapping = KeyMappingStore::open(db.clone()).await?;
        let repository = Repository::open(db, change_log, table).await?;
        Ok(Self::new(
            Arc::new(repository),
            remote,
            key_mapping,
            relationships,
        ))
    }

    pub fn repository(&self) -> &Arc<Repository<R>> {
        &self.repository
    }

    pub fn engine(&self) -> &SyncEngine<R> {
        &self.engine
    }

    /// All local records.
    pub async fn get(&self) -> Result<Vec<R>> {
        self.repository.get_all().await
    }

    pub async fn get_by_id(&self, id: RecordId) -> Result<Option<R>> {
        self.repository.get(id).await
    }

    /// Create locally with a fresh id. Returns the stored record.
    pub async fn create(&self, record: R) -> Result<R> {
        self.repository.create(record).await
    }

    pub async fn update(&self, record: &R) -> Result<()> {
        self.repository.update(record, true).await
    }

    pub async fn delete(&self, id: RecordId) -> Result<()> {
        self.repository.delete(id, true).await
    }

    /// The remote table, without touching local state.
    pub async fn fetch(&self) -> Result<Vec<R>> {
        self.remote.fetch().await
    }

    /// Pending local changes of this table.
    pub async fn changes(&self) -> Result<Vec<PendingChange>> {
        self.repository.changes().await
    }

    /// Fetch the remote table and run one pass.
    ///
    /// A failed fetch is returned before any phase runs.
    pub async fn sync(&self) -> Result<Vec<R>> {
        Ok(self.sync_with_report().await?.records)
    }

    pub async fn sync_with_report(&self) -> Result<SyncOutcome<R>> {
        let remote = self.fetch().await?;
        let local = self.repository.get_all().await?;
        self.engine.sync_with_report(&local, &remote).await
    }

    /// Run one pass against an already fetched remote snapshot.
    pub async fn sync_with(&self, remote_records: &[R]) -> Result<Vec<R>> {
        let local = self.repository.get_all().await?;
        self.engine.sync(&local, remote_records).await
    }
}
