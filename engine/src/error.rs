//! Error types for the offsync engine.

use crate::{RecordId, TableName};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A call the engine can make against the remote authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteMethod {
    Fetch,
    Insert,
    Update,
    Delete,
}

impl fmt::Display for RemoteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteMethod::Fetch => write!(f, "fetch"),
            RemoteMethod::Insert => write!(f, "insert"),
            RemoteMethod::Update => write!(f, "update"),
            RemoteMethod::Delete => write!(f, "delete"),
        }
    }
}

/// All possible errors from the offsync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Remote errors
    #[error("remote {method} is not configured for table '{table}'")]
    CapabilityNotConfigured {
        table: TableName,
        method: RemoteMethod,
    },

    #[error("failed to decode response from {path}: {message}")]
    Decode { path: String, message: String },

    #[error("request to {path} failed: {message}")]
    Transport { path: String, message: String },

    // Storage errors
    #[error("storage error: {0}")]
    Storage(String),

    #[error("table not found: {0}")]
    TableNotFound(TableName),

    #[error("record {id} not found in table '{table}'")]
    RecordNotFound { table: TableName, id: RecordId },

    #[error("invalid row in table '{table}': {message}")]
    InvalidRow { table: TableName, message: String },

    #[error("missing required column: {0}")]
    MissingRequiredColumn(String),

    #[error("type mismatch for column '{column}': expected {expected}, got {got}")]
    TypeMismatch {
        column: String,
        expected: String,
        got: String,
    },

    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

impl Error {
    /// Whether the error originated from the remote authority rather than
    /// the local store.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Error::CapabilityNotConfigured { .. } | Error::Decode { .. } | Error::Transport { .. }
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::TableNotFound("todos".into());
        assert_eq!(err.to_string(), "table not found: todos");

        let err = Error::CapabilityNotConfigured {
            table: "todos".into(),
            method: RemoteMethod::Update,
        };
        assert_eq!(
            err.to_string(),
            "remote update is not configured for table 'todos'"
        );

        let err = Error::Transport {
            path: "/tables/todos/records".into(),
            message: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "request to /tables/todos/records failed: connection refused"
        );

        let err = Error::TypeMismatch {
            column: "done".into(),
            expected: "Bool".into(),
            got: "String".into(),
        };
        assert_eq!(
            err.to_string(),
            "type mismatch for column 'done': expected Bool, got String"
        );
    }

    #[test]
    fn remote_classification() {
        assert!(Error::Decode {
            path: "/x".into(),
            message: "bad".into()
        }
        .is_remote());
        assert!(!Error::Storage("no connection".into()).is_remote());
        assert!(!Error::RecordNotFound {
            table: "todos".into(),
            id: 1
        }
        .is_remote());
    }
}
