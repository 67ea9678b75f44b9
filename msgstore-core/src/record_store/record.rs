//! Stored record and change event types

use serde::{Deserialize, Serialize};

use crate::account::AccountAddress;

/// The single message an account holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub message: String,

    /// Number of change events emitted for this record so far
    pub event_count: u64,
}

impl Record {
    pub fn new(message: String) -> Self {
        Record {
            message,
            event_count: 0,
        }
    }
}

/// Emitted when an existing record's message is replaced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageChangeEvent {
    pub account: AccountAddress,
    /// Per-account position, starting at 0
    pub sequence_number: u64,
    pub from_message: String,
    pub to_message: String,
}
