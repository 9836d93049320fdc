//! # Offsync Engine
//!
//! An offline-first sync engine for record collections.
//!
//! Applications mutate a local replica while disconnected. Every local
//! write records an intention in a durable change log. A sync pass later
//! replays those intentions against the remote authority, merges remote
//! truth back into the replica and adopts the ids the remote assigned.
//!
//! ## Core Concepts
//!
//! ### Records and storage
//!
//! A [`Record`] is a serde value with an integer id and a statically
//! declared column layout ([`ColumnDef`]). Rows live in a [`Database`]:
//! - [`MemoryDatabase`] - in-process tables, snapshot export/import
//! - [`SqliteDatabase`] - SQLite through `sqlx` (feature `sqlite`)
//!
//! [`Repository`] gives typed CRUD over one table and reports tracked
//! writes to the [`ChangeLog`].
//!
//! ### Change log
//!
//! At most one [`PendingChange`] exists per record. Recording applies
//! precedence: an update never weakens a pending insert or delete, and a
//! delete of an unsynced insert cancels both.
//!
//! ### Remote client
//!
//! [`RemoteClient`] fetches and writes the authoritative table:
//! - [`MemoryRemote`] - in-process authority, useful for tests
//! - [`HttpRemote`] - JSON over REST (feature `http`)
//!
//! ### Sync
//!
//! [`SyncEngine`] runs the four-phase pass (prune, replay, merge,
//! reconcile). When the remote assigns a new id, the [`KeyMappingStore`]
//! rewrites declared foreign keys ([`Relationships`]) in child tables.
//!
//! ## Quick Start
//!
//! ```rust
//! use offsync_engine::{
//!     ColumnDef, ColumnType, MemoryDatabase, MemoryRemote, Record, RecordId,
//!     RecordService, Relationships,
//! };
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct Todo {
//!     id: RecordId,
//!     title: String,
//! }
//!
//! impl Record for Todo {
//!     fn id(&self) -> RecordId { self.id }
//!     fn set_id(&mut self, id: RecordId) { self.id = id; }
//!     fn columns() -> Vec<ColumnDef> {
//!         vec![ColumnDef::required("title", ColumnType::Text)]
//!     }
//! }
//!
//! # async fn run() -> offsync_engine::Result<()> {
//! // 1. Wire a service to a local database and a remote
//! let remote = Arc::new(MemoryRemote::<Todo>::new("todos").with_next_id(100));
//! let service: RecordService<Todo> = RecordService::open(
//!     Arc::new(MemoryDatabase::new()),
//!     "todos",
//!     remote,
//!     Relationships::new(),
//! )
//! .await?;
//!
//! // 2. Write offline
//! let todo = service.create(Todo { id: 0, title: "milk".into() }).await?;
//! assert_eq!(todo.id, 1);
//!
//! // 3. Sync: the remote assigns its own id
//! let records = service.sync().await?;
//! assert_eq!(records, vec![Todo { id: 100, title: "milk".into() }]);
//! assert!(service.changes().await?.is_empty());
//! # Ok(())
//! # }
//! # tokio::runtime::Runtime::new().unwrap().block_on(run()).unwrap();
//! ```
//!
//! ## Persistence
//!
//! Use [`MemoryDatabase::export_state`] and [`MemoryDatabase::import_state`]
//! with [`DatabaseSnapshot`] to persist the in-memory replica. Snapshots
//! serialize to JSON with deterministic ordering.

pub mod change;
pub mod change_log;
pub mod database;
pub mod error;
pub mod key_mapping;
pub mod record;
pub mod remote;
pub mod repository;
pub mod schema;
pub mod service;
pub mod snapshot;
pub mod sync;

// Re-export main types at crate root
pub use change::{ChangeType, PendingChange, Replayed};
pub use change_log::ChangeLog;
pub use database::{Database, Filter, MemoryDatabase};
#[cfg(feature = "sqlite")]
pub use database::SqliteDatabase;
pub use error::{Error, RemoteMethod, Result};
pub use key_mapping::{ForeignKey, KeyMapping, KeyMappingStore, Relationships};
pub use record::Record;
#[cfg(feature = "http")]
pub use remote::{HttpRemote, Route, Routes};
pub use remote::{Capabilities, MemoryRemote, RemoteClient};
pub use repository::{IdAllocation, Repository};
pub use schema::{ColumnDef, ColumnType, TableSchema};
pub use service::RecordService;
pub use snapshot::{DatabaseSnapshot, TableSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use sync::{SkipReason, SyncEngine, SyncOutcome, SyncReport};

/// Type aliases for clarity
pub type RecordId = i64;
pub type TableName = String;
/// Milliseconds since the Unix epoch
pub type Timestamp = i64;
/// A stored row: column name to JSON value, `id` included
pub type Row = serde_json::Map<String, serde_json::Value>;
