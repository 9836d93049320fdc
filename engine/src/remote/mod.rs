//! The remote client collaborator.
//!
//! A [`RemoteClient`] talks to the authoritative copy of one table. Fetch
//! is mandatory; insert, update and delete are capabilities the engine
//! checks before calling. A change whose capability is missing stays
//! pending for a later pass.

#[cfg(feature = "http")]
mod http;
mod memory;

#[cfg(feature = "http")]
pub use http::{HttpRemote, Route, Routes};
pub use memory::{Capabilities, MemoryRemote};

use crate::{error::Result, Error, Record, RecordId, RemoteMethod};
use async_trait::async_trait;

/// Fetch/insert/update/delete against the remote authority.
#[async_trait]
pub trait RemoteClient<R: Record>: Send + Sync {
    /// Name of the remote table, used in error reports.
    fn table(&self) -> &str;

    /// The full remote content of the table.
    async fn fetch(&self) -> Result<Vec<R>>;

    /// Insert a record. The response is authoritative and may carry a
    /// different id than the input.
    async fn insert(&self, record: &R) -> Result<R>;

    /// Whether [`insert`](Self::insert) is configured.
    fn can_insert(&self) -> bool {
        true
    }

    /// Whether [`update`](Self::update) is configured.
    fn can_update(&self) -> bool {
        false
    }

    /// Whether [`delete`](Self::delete) is configured.
    fn can_delete(&self) -> bool {
        false
    }

    /// Update a record in place.
    async fn update(&self, _record: &R) -> Result<R> {
        Err(Error::CapabilityNotConfigured {
            table: self.table().to_string(),
            method: RemoteMethod::Update,
        })
    }

    /// Delete a record by id.
    async fn delete(&self, _id: RecordId) -> Result<()> {
        Err(Error::CapabilityNotConfigured {
            table: self.table().to_string(),
            method: RemoteMethod::Delete,
        })
    }
}
