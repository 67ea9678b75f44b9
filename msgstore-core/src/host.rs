//! Local host
//!
//! Plays the execution environment around a `RecordStore`: restores state
//! from the latest snapshot, authenticates incoming requests, and commits a
//! new snapshot after every accepted write.
//!
//! One `LocalHost` owns a data directory at a time; it holds an exclusive
//! lock on `LOCK` until dropped. Reads that go through
//! [`LocalHost::read_message`] take no lock and create nothing on disk.

use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::account::{AccountAddress, AccountError, Authenticator, SetMessageRequest};
use crate::config::StoreConfig;
use crate::record_store::{
    EventSink, FileEventLog, MemoryEventLog, MessageChangeEvent, RecordStore, SnapshotManager,
    StateSnapshot, StoreError, StoreResult,
};

pub const EVENT_LOG_FILE: &str = "events.log";
pub const SNAPSHOT_DIR: &str = "snapshots";
pub const LOCK_FILE: &str = "LOCK";

#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Auth(#[from] AccountError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type HostResult<T> = Result<T, HostError>;

enum EventLogHandle {
    Memory(Arc<MemoryEventLog>),
    File(Arc<FileEventLog>),
}

impl EventLogHandle {
    fn sink(&self) -> Arc<dyn EventSink> {
        match self {
            EventLogHandle::Memory(log) => log.clone(),
            EventLogHandle::File(log) => log.clone(),
        }
    }

    fn events(&self) -> StoreResult<Vec<MessageChangeEvent>> {
        match self {
            EventLogHandle::Memory(log) => log.events(),
            EventLogHandle::File(log) => log.read_events(),
        }
    }
}

fn lock_data_dir(data_dir: &Path) -> StoreResult<File> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(data_dir.join(LOCK_FILE))?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
            Err(StoreError::Locked(data_dir.display().to_string()))
        }
        Err(err) => Err(err.into()),
    }
}

/// Latest committed snapshot with any newer logged changes replayed on top
///
/// Returns the snapshot and the number of events it had missed.
fn recover_state(
    snapshot: Option<StateSnapshot>,
    logged: &[MessageChangeEvent],
) -> (StateSnapshot, usize) {
    let mut snapshot = snapshot.unwrap_or_else(|| StateSnapshot::new(0, BTreeMap::new()));
    let replayed = snapshot.apply_events(logged);
    (snapshot, replayed)
}

pub struct LocalHost {
    config: StoreConfig,
    store: RecordStore,
    authenticator: Authenticator,
    snapshots: SnapshotManager,
    event_log: EventLogHandle,
    _lock: File,
}

impl LocalHost {
    /// Open (or initialise) the state under `config.data_dir`
    ///
    /// Fails with `StoreError::Locked` while another host has it open.
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let lock = lock_data_dir(&config.data_dir)?;

        let event_log = if config.persist_events {
            EventLogHandle::File(Arc::new(FileEventLog::open(
                config.data_dir.join(EVENT_LOG_FILE),
            )?))
        } else {
            EventLogHandle::Memory(Arc::new(MemoryEventLog::new()))
        };

        let snapshots = SnapshotManager::new(config.data_dir.join(SNAPSHOT_DIR))?;
        let latest = snapshots.load_latest()?;
        if let Some(snapshot) = &latest {
            info!(
                version = snapshot.metadata.version,
                records = snapshot.metadata.records_count,
                "restored snapshot"
            );
        }

        let logged = match &event_log {
            EventLogHandle::File(log) => log.read_events()?,
            EventLogHandle::Memory(_) => Vec::new(),
        };
        let (snapshot, replayed) = recover_state(latest, &logged);

        let host = LocalHost {
            config: config.clone(),
            store: RecordStore::restore(snapshot, event_log.sink()),
            authenticator: Authenticator::new(),
            snapshots,
            event_log,
            _lock: lock,
        };

        if replayed > 0 {
            warn!(replayed, "event log was ahead of the latest snapshot");
            host.commit()?;
        }

        Ok(host)
    }

    /// Read one account's committed message without opening the host
    pub fn read_message(config: &StoreConfig, address: &AccountAddress) -> StoreResult<String> {
        let latest = SnapshotManager::read_latest(&config.data_dir.join(SNAPSHOT_DIR))?;
        let logged = Self::read_events(config, None)?;
        let (snapshot, _) = recover_state(latest, &logged);

        RecordStore::restore(snapshot, Arc::new(MemoryEventLog::new())).get_message(address)
    }

    /// Read persisted change events without opening the host
    ///
    /// Hosts that keep events in memory have none on disk.
    pub fn read_events(
        config: &StoreConfig,
        account: Option<&AccountAddress>,
    ) -> StoreResult<Vec<MessageChangeEvent>> {
        if !config.persist_events {
            return Ok(Vec::new());
        }
        let mut events = FileEventLog::read_events_at(&config.data_dir.join(EVENT_LOG_FILE))?;
        if let Some(account) = account {
            events.retain(|event| &event.account == account);
        }
        Ok(events)
    }

    /// Authenticate `request`, apply it, and commit the resulting state
    pub fn submit_set_message(&self, request: &SetMessageRequest) -> HostResult<()> {
        let signer = self.authenticator.authenticate(request)?;
        self.store.set_message(&signer, request.message.clone())?;
        self.commit()?;
        Ok(())
    }

    pub fn get_message(&self, address: &AccountAddress) -> StoreResult<String> {
        self.store.get_message(address)
    }

    /// Change events in append order, optionally for one account
    pub fn events(&self, account: Option<&AccountAddress>) -> StoreResult<Vec<MessageChangeEvent>> {
        let mut events = self.event_log.events()?;
        if let Some(account) = account {
            events.retain(|event| &event.account == account);
        }
        Ok(events)
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    fn commit(&self) -> StoreResult<()> {
        self.snapshots.create_snapshot(self.store.records()?)?;
        self.snapshots
            .cleanup_old_snapshots(self.config.snapshot_keep)
    }
}
