/*
    Record store - one message per account, with change auditing
*/

pub mod errors;
pub mod event_log;
pub mod record;
pub mod snapshot;
pub mod store;

pub use errors::{StoreError, StoreResult, ENO_MESSAGE};
pub use event_log::{EventLogEntry, EventSink, FileEventLog, MemoryEventLog};
pub use record::{MessageChangeEvent, Record};
pub use snapshot::{SnapshotManager, SnapshotMetadata, StateSnapshot};
pub use store::{RecordStore, StoreStats};

/// Milliseconds since the Unix epoch, or 0 if the clock is before it
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
