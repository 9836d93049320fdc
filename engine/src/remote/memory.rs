//! In-process remote authority.

use super::RemoteClient;
use crate::{error::Result, Error, Record, RecordId, RemoteMethod, TableName};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

/// Which optional remote calls are configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub insert: bool,
    pub update: bool,
    pub delete: bool,
}

impl Capabilities {
    /// Every call is configured.
    pub const ALL: Self = Self {
        insert: true,
        update: true,
        delete: true,
    };

    /// Only fetch is configured.
    pub const FETCH_ONLY: Self = Self {
        insert: false,
        update: false,
        delete: false,
    };
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::ALL
    }
}

#[derive(Debug)]
struct State<R> {
    records: BTreeMap<RecordId, R>,
    next_id: RecordId,
    failures: HashMap<RemoteMethod, Error>,
    calls: HashMap<RemoteMethod, usize>,
}

/// A [`RemoteClient`] that keeps the authoritative table in memory.
///
/// Inserts get ids from a monotonic sequence that never reuses an id,
/// so the returned record usually carries a different id than the
/// local one. Deleting an absent id succeeds.
#[derive(Debug)]
pub struct MemoryRemote<R: Record> {
    table: TableName,
    capabilities: Capabilities,
    state: Mutex<State<R>>,
}

impl<R: Record> MemoryRemote<R> {
    pub fn new(table: impl Into<TableName>) -> Self {
        Self {
            table: table.into(),
            capabilities: Capabilities::default(),
            state: Mutex::new(State {
                records: BTreeMap::new(),
                next_id: 1,
                failures: HashMap::new(),
                calls: HashMap::new(),
            }),
        }
    }

    /// Builder-style capability override.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Start the id sequence at `next_id` (e.g. 101).
    pub fn with_next_id(self, next_id: RecordId) -> Self {
        self.state.lock().next_id = next_id;
        self
    }

    /// Store records with their own ids, as if another replica wrote
    /// them. The id sequence moves past the highest seeded id.
    pub fn seed(&self, records: impl IntoIterator<Item = R>) {
        let mut state = self.state.lock();
        for record in records {
            state.next_id = state.next_id.max(record.id() + 1);
            state.records.insert(record.id(), record);
        }
    }

    /// Remove a record without counting a call.
    pub fn remove(&self, id: RecordId) -> Option<R> {
        self.state.lock().records.remove(&id)
    }

    /// Current content, ordered by id.
    pub fn records(&self) -> Vec<R> {
        self.state.lock().records.values().cloned().collect()
    }

    /// Make the next call of `method` fail with `error`.
    pub fn fail_next(&self, method: RemoteMethod, error: Error) {
        self.state.lock().failures.insert(method, error);
    }

    /// Number of calls of `method`, failed ones included.
    pub fn calls(&self, method: RemoteMethod) -> usize {
        self.state.lock().calls.get(&method).copied().unwrap_or(0)
    }

    /// Insert, update and delete calls combined.
    pub fn write_calls(&self) -> usize {
        [RemoteMethod::Insert, RemoteMethod::Update, RemoteMethod::Delete]
            .into_iter()
            .map(|method| self.calls(method))
            .sum()
    }

    fn not_configured(&self, method: RemoteMethod) -> Error {
        Error::CapabilityNotConfigured {
            table: self.table.clone(),
            method,
        }
    }

    /// Count the call and consume an injected failure, if any.
    fn begin(&self, state: &mut State<R>, method: RemoteMethod) -> Result<()> {
        *state.calls.entry(method).or_insert(0) += 1;
        match state.failures.remove(&method) {
            Some(error) => {
                tracing::debug!(table = %self.table, %method, "injected remote failure");
                Err(error)
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<R: Record> RemoteClient<R> for MemoryRemote<R> {
    fn table(&self) -> &str {
        &self.table
    }

    async fn fetch(&self) -> Result<Vec<R>> {
        let mut state = self.state.lock();
        self.begin(&mut state, RemoteMethod::Fetch)?;
        Ok(state.records.values().cloned().collect())
    }

    fn can_insert(&self) -> bool {
        self.capabilities.insert
    }

    fn can_update(&self) -> bool {
        self.capabilities.update
    }

    fn can_delete(&self) -> bool {
        self.capabilities.delete
    }

    async fn insert(&self, record: &R) -> Result<R> {
        if !self.capabilities.insert {
            return Err(self.not_configured(RemoteMethod::Insert));
        }
        let mut state = self.state.lock();
        self.begin(&mut state, RemoteMethod::Insert)?;

        let mut stored = record.clone();
        stored.set_id(state.next_id);
        state.next_id += 1;
        state.records.insert(stored.id(), stored.clone());
        Ok(stored)
    }

    async fn update(&self, record: &R) -> Result<R> {
        if !self.capabilities.update {
            return Err(self.not_configured(RemoteMethod::Update));
        }
        let mut state = self.state.lock();
        self.begin(&mut state, RemoteMethod::Update)?;

        // Last writer wins, including over a record another replica removed.
        state.next_id = state.next_id.max(record.id() + 1);
        state.records.insert(record.id(), record.clone());
        Ok(record.clone())
    }

    async fn delete(&self, id: RecordId) -> Result<()> {
        if !self.capabilities.delete {
            return Err(self.not_configured(RemoteMethod::Delete));
        }
        let mut state = self.state.lock();
        self.begin(&mut state, RemoteMethod::Delete)?;
        state.records.remove(&id);
        Ok(())
    }
}
