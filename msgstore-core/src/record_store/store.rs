/*
    store.rs - Per-account message records

    Each account holds at most one Record. The first write creates it
    silently; every later write emits a MessageChangeEvent carrying the old
    and new message, then overwrites. The event is appended before the
    record changes, under the write lock, so a failed append leaves the
    record untouched.
*/

use crate::account::{AccountAddress, Signer};
use crate::record_store::errors::{handle_poison, StoreError, StoreResult};
use crate::record_store::event_log::{EventSink, MemoryEventLog};
use crate::record_store::record::{MessageChangeEvent, Record};
use crate::record_store::snapshot::StateSnapshot;
use metrics::counter;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Counts describing the store's current contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub records_count: usize,
    pub events_emitted: u64,
}

pub struct RecordStore {
    records: RwLock<HashMap<AccountAddress, Record>>,
    events: Arc<dyn EventSink>,
}

impl RecordStore {
    /// Create an empty store writing change events to `events`
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        RecordStore {
            records: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Create an empty store backed by a fresh in-memory event log
    pub fn with_memory_log() -> (Self, Arc<MemoryEventLog>) {
        let log = Arc::new(MemoryEventLog::new());
        (Self::new(log.clone()), log)
    }

    /// Rebuild a store from a committed snapshot
    ///
    /// Crate-internal: outside callers cannot seed records without a
    /// `Signer`.
    ///
    /// ```compile_fail
    /// use std::sync::Arc;
    /// use msgstore_core::record_store::{MemoryEventLog, RecordStore, StateSnapshot};
    ///
    /// let snapshot = StateSnapshot::new(1, Default::default());
    /// let _store = RecordStore::restore(snapshot, Arc::new(MemoryEventLog::new()));
    /// ```
    pub(crate) fn restore(snapshot: StateSnapshot, events: Arc<dyn EventSink>) -> Self {
        RecordStore {
            records: RwLock::new(snapshot.records.into_iter().collect()),
            events,
        }
    }

    pub fn exists(&self, address: &AccountAddress) -> StoreResult<bool> {
        Ok(self.records.read().map_err(handle_poison)?.contains_key(address))
    }

    /// Current message for `address`
    ///
    /// Fails with `NotFound` until the account has written at least once.
    pub fn get_message(&self, address: &AccountAddress) -> StoreResult<String> {
        let records = self.records.read().map_err(handle_poison)?;
        match records.get(address) {
            Some(record) => {
                debug!(account = %address, "read message");
                Ok(record.message.clone())
            }
            None => {
                counter!("msgstore_read_not_found_total").increment(1);
                debug!(account = %address, "no message stored");
                Err(StoreError::NotFound(*address))
            }
        }
    }

    /// Create or replace the signer's own message
    pub fn set_message(&self, signer: &Signer, message: impl Into<String>) -> StoreResult<()> {
        let account = signer.address();
        let message = message.into();
        let mut records = self.records.write().map_err(handle_poison)?;

        match records.entry(account) {
            Entry::Vacant(slot) => {
                slot.insert(Record::new(message));
                counter!("msgstore_records_created_total").increment(1);
                info!(%account, "created message record");
            }
            Entry::Occupied(mut slot) => {
                let record = slot.get_mut();
                let event = MessageChangeEvent {
                    account,
                    sequence_number: record.event_count,
                    from_message: record.message.clone(),
                    to_message: message.clone(),
                };
                let log_seq = self.events.append(&event)?;

                record.message = message;
                record.event_count += 1;

                counter!("msgstore_records_updated_total").increment(1);
                info!(
                    %account,
                    sequence_number = event.sequence_number,
                    log_seq,
                    "updated message record"
                );
            }
        }

        Ok(())
    }

    /// Copy of every record, ordered by address
    pub fn records(&self) -> StoreResult<BTreeMap<AccountAddress, Record>> {
        Ok(self
            .records
            .read()
            .map_err(handle_poison)?
            .iter()
            .map(|(address, record)| (*address, record.clone()))
            .collect())
    }

    pub fn stats(&self) -> StoreResult<StoreStats> {
        let records = self.records.read().map_err(handle_poison)?;
        Ok(StoreStats {
            records_count: records.len(),
            events_emitted: records.values().map(|record| record.event_count).sum(),
        })
    }
}
