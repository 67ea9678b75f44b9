//! Test fixtures for addresses, signers and event sinks

use crate::account::{AccountAddress, Signer};
use crate::record_store::{EventSink, MessageChangeEvent, StoreError, StoreResult};

pub fn address(text: &str) -> AccountAddress {
    text.parse().expect("valid test address")
}

/// Signer for `text` without going through `Authenticator`
pub fn signer(text: &str) -> Signer {
    Signer::new(address(text))
}

/// Event sink that rejects every append
pub struct FailingEventLog;

impl EventSink for FailingEventLog {
    fn append(&self, _event: &MessageChangeEvent) -> StoreResult<u64> {
        Err(StoreError::EventLog("sink unavailable".to_string()))
    }
}
