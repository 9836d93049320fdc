//! The sync engine: one pass converging a table with its remote.
//!
//! # Algorithm
//!
//! A pass runs four phases strictly in order over a fixed local snapshot,
//! a remote snapshot fetched by the caller, and the table's pending
//! changes read once up front:
//!
//! 1. **Prune**: delete local records the remote no longer has, unless an
//!    insert for them is still pending.
//! 2. **Replay**: send pending changes to the remote one at a time,
//!    collecting the successful responses. Nothing local is written yet.
//! 3. **Merge**: copy remote records into the local store where no local
//!    intention contradicts them.
//! 4. **Reconcile**: clear replayed changes and those whose record is
//!    gone, adopt remote-assigned ids and rewrite foreign keys that still
//!    point at temporary ids.
//!
//! A remote failure in phase 2 aborts the pass before any response is
//! applied, so every pending change survives for the next attempt. Local
//! store failures abort the same way.

use crate::{
    change::{PendingChange, Replayed},
    error::Result,
    key_mapping::{KeyMappingStore, Relationships},
    remote::RemoteClient,
    repository::Repository,
    ChangeType, Record, RecordId, TableName,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Why a pending change was not replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    /// The record is no longer in the local snapshot. The entry is
    /// dropped at the end of the pass.
    RecordMissing,
    /// The remote has no handler for this kind of change
    NotConfigured,
}

/// What one sync pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Table the pass ran on
    pub table: TableName,
    /// Local records deleted in phase 1
    pub pruned: Vec<RecordId>,
    /// Changes the remote accepted in phase 2
    pub replayed: Vec<PendingChange>,
    /// Changes not replayed in phase 2
    pub skipped: Vec<(PendingChange, SkipReason)>,
    /// Remote records written locally in phase 3
    pub merged: Vec<RecordId>,
    /// `(local, remote)` id pairs adopted in phase 4
    pub remapped: Vec<(RecordId, RecordId)>,
    /// Child rows whose foreign key was rewritten
    pub foreign_keys_rewritten: usize,
}

impl SyncReport {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Self::default()
        }
    }

    /// Whether the pass issued no remote writes and changed nothing locally.
    pub fn is_noop(&self) -> bool {
        self.pruned.is_empty()
            && self.replayed.is_empty()
            && self.merged.is_empty()
            && self.remapped.is_empty()
            && self.foreign_keys_rewritten == 0
    }
}

/// Result of [`SyncEngine::sync_with_report`].
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome<R> {
    /// The table's full content after the pass, ordered by id
    pub records: Vec<R>,
    pub report: SyncReport,
}

/// Converges one table with its remote authority.
///
/// The engine holds no lock of its own. Callers must not run two passes
/// over the same table at once.
pub struct SyncEngine<R: Record> {
    repository: Arc<Repository<R>>,
    remote: Arc<dyn RemoteClient<R>>,
    key_mapping: KeyMappingStore,
    relationships: Relationships,
}

impl<R: Record> std::fmt::Debug for SyncEngine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("table", &self.repository.name())
            .field("relationships", &self.relationships)
            .finish_non_exhaustive()
    }
}

impl<R: Record> SyncEngine<R> {
    pub fn new(
        repository: Arc<Repository<R>>,
        remote: Arc<dyn RemoteClient<R>>,
        key_mapping: KeyMappingStore,
        relationships: Relationships,
    ) -> Self {
        Self {
            repository,
            remote,
            key_mapping,
            relationships,
        }
    }

    pub fn repository(&self) -> &Arc<Repository<R>> {
        &self.repository
    }

    pub fn remote(&self) -> &Arc<dyn RemoteClient<R>> {
        &self.remote
    }

    pub fn relationships(&self) -> &Relationships {
        &self.relationships
    }

    /// Run one pass and return the table's content afterwards.
    pub async fn sync(&self, local: &[R], remote: &[R]) -> Result<Vec<R>> {
        Ok(self.sync_with_report(local, remote).await?.records)
    }

    /// Run one pass and describe what it did.
    pub async fn sync_with_report(&self, local: &[R], remote: &[R]) -> Result<SyncOutcome<R>> {
        let table = self.repository.name();
        tracing::debug!(
            table,
            local = local.len(),
            remote = remote.len(),
            "starting sync pass"
        );

        match self.run(local, remote).await {
            Ok(outcome) => {
                let report = &outcome.report;
                tracing::info!(
                    table,
                    pruned = report.pruned.len(),
                    replayed = report.replayed.len(),
                    skipped = report.skipped.len(),
                    merged = report.merged.len(),
                    remapped = report.remapped.len(),
                    foreign_keys = report.foreign_keys_rewritten,
                    "sync pass complete"
                );
                Ok(outcome)
            }
            Err(e) => {
                tracing::warn!(table, error = %e, remote = e.is_remote(), "sync pass aborted");
                Err(e)
            }
        }
    }

    async fn run(&self, local: &[R], remote: &[R]) -> Result<SyncOutcome<R>> {
        let mut report = SyncReport::new(self.repository.name());

        // Read once; phase 4 clears entries but the pass never re-reads.
        let changes = self.repository.changes().await?;
        let pending: HashMap<RecordId, ChangeType> = changes
            .iter()
            .map(|c| (c.record_id, c.change_type))
            .collect();

        let mut current: BTreeMap<RecordId, &R> = local.iter().map(|r| (r.id(), r)).collect();

        self.prune(remote, &pending, &mut current, &mut report)
            .await?;
        let replayed = self.replay(&changes, &current, &mut report).await?;
        self.merge(remote, &pending, &current, &mut report).await?;
        self.reconcile(replayed, &mut report).await?;

        report.foreign_keys_rewritten = self
            .key_mapping
            .remap_foreign_keys(&self.relationships)
            .await?;

        Ok(SyncOutcome {
            records: self.repository.get_all().await?,
            report,
        })
    }

    /// Phase 1.
    async fn prune(
        &self,
        remote: &[R],
        pending: &HashMap<RecordId, ChangeType>,
        current: &mut BTreeMap<RecordId, &R>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let remote_ids: HashSet<RecordId> = remote.iter().map(R::id).collect();

        let stale: Vec<RecordId> = current
            .keys()
            .copied()
            .filter(|id| !remote_ids.contains(id) && pending.get(id) != Some(&ChangeType::Insert))
            .collect();

        for id in stale {
            tracing::debug!(table = self.repository.name(), id, "pruning record absent remotely");
            self.repository.delete(id, false).await?;
            current.remove(&id);
            report.pruned.push(id);
        }
        Ok(())
    }

    /// Phase 2. Returns the successful replays in change-log order.
    async fn replay(
        &self,
        changes: &[PendingChange],
        current: &BTreeMap<RecordId, &R>,
        report: &mut SyncReport,
    ) -> Result<Vec<Replayed<R>>> {
        let table = self.repository.name();
        let mut replayed = Vec::with_capacity(changes.len());

        for change in changes {
            let id = change.record_id;
            let result = match change.change_type {
                ChangeType::Insert | ChangeType::Update => {
                    let Some(record) = current.get(&id) else {
                        tracing::debug!(table, id, change = %change.change_type, "record gone, skipping replay");
                        report.skipped.push((change.clone(), SkipReason::RecordMissing));
                        continue;
                    };

                    let insert = change.change_type == ChangeType::Insert;
                    let configured = if insert {
                        self.remote.can_insert()
                    } else {
                        self.remote.can_update()
                    };
                    if !configured {
                        tracing::debug!(table, id, change = %change.change_type, "remote call not configured, leaving pending");
                        report.skipped.push((change.clone(), SkipReason::NotConfigured));
                        continue;
                    }

                    let response = if insert {
                        self.remote.insert(record).await?
                    } else {
                        self.remote.update(record).await?
                    };
                    Some(response)
                }
                ChangeType::Delete => {
                    if self.remote.can_delete() {
                        self.remote.delete(id).await?;
                    } else {
                        tracing::debug!(table, id, "remote delete not configured, dropping change");
                    }
                    None
                }
            };

            tracing::debug!(table, id, change = %change.change_type, "replayed change");
            report.replayed.push(change.clone());
            replayed.push(Replayed {
                change: change.clone(),
                result,
            });
        }
        Ok(replayed)
    }

    /// Phase 3.
    async fn merge(
        &self,
        remote: &[R],
        pending: &HashMap<RecordId, ChangeType>,
        current: &BTreeMap<RecordId, &R>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let table = self.repository.name();

        for record in remote {
            let id = record.id();
            let write = match (current.get(&id), pending.get(&id)) {
                // A pending delete or update owns this id.
                (None, Some(_)) => false,
                (None, None) => true,
                (Some(_), Some(ChangeType::Insert)) => {
                    tracing::debug!(table, id, "remote record collides with unsynced insert, overwriting");
                    true
                }
                (Some(local), None) => *local != record,
                (Some(_), Some(_)) => false,
            };

            if write {
                self.repository.insert(record, false).await?;
                report.merged.push(id);
            }
        }
        Ok(())
    }

    /// Phase 4.
    async fn reconcile(&self, replayed: Vec<Replayed<R>>, report: &mut SyncReport) -> Result<()> {
        let table = self.repository.name();

        // An intention for a record that no longer exists can never be replayed.
        for (change, reason) in &report.skipped {
            if *reason == SkipReason::RecordMissing {
                self.repository.clear_changes(change.record_id).await?;
            }
        }

        for Replayed { change, result } in replayed {
            let local_id = change.record_id;
            self.repository.clear_changes(local_id).await?;

            let Some(result) = result else {
                continue;
            };

            let remote_id = result.id();
            if remote_id != local_id {
                tracing::debug!(table, local_id, remote_id, "adopting remote id");
                self.key_mapping
                    .record_mapping(table, local_id, remote_id)
                    .await?;
                self.repository.delete(local_id, false).await?;
                self.repository.insert(&result, false).await?;
                report.remapped.push((local_id, remote_id));
            } else {
                self.repository.update(&result, false).await?;
            }
        }
        Ok(())
    }
}
