/*
    errors.rs - Error types for the record store

    `NotFound` is the only error a caller sees in normal operation. The rest
    come from the host-side collaborators: event log files and snapshots.
*/

use crate::account::AccountAddress;
use std::sync::PoisonError;
use thiserror::Error;

/// Abort code reported when an account has no stored message
pub const ENO_MESSAGE: u64 = 0;

#[derive(Debug, Error)]
pub enum StoreError {
    /// No record exists for the account
    #[error("No message stored for account {0}")]
    NotFound(AccountAddress),

    /// Storage I/O error
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Checksum mismatch or truncated frame
    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    /// The event sink refused an append
    #[error("Event log error: {0}")]
    EventLog(String),

    /// Another host already holds the data directory
    #[error("Data directory {0} is locked by another process")]
    Locked(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Numeric abort code, for errors that carry one
    pub fn code(&self) -> Option<u64> {
        match self {
            StoreError::NotFound(_) => Some(ENO_MESSAGE),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

pub(crate) fn handle_poison<T>(_err: PoisonError<T>) -> StoreError {
    StoreError::Internal("Lock poisoned: a thread panicked while holding the lock".to_string())
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Storage(err.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
