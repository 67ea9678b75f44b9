/*
    snapshot.rs - Committed record state

    Hosts commit the full record map after each accepted write. Files are
    written to a temp name, synced, then renamed, so a reader sees either
    the previous snapshot or the new one.
*/

use crate::account::AccountAddress;
use crate::record_store::errors::{StoreError, StoreResult};
use crate::record_store::now_millis;
use crate::record_store::record::{MessageChangeEvent, Record};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{create_dir_all, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

const SNAPSHOT_PREFIX: &str = "snapshot_";
const SNAPSHOT_EXT: &str = "bin";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub version: u32,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    pub records_count: usize,
}

/// Committed record map
///
/// Only the crate builds snapshots, so records reach a `RecordStore`
/// through signed writes or through state this crate committed itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub metadata: SnapshotMetadata,
    pub(crate) records: BTreeMap<AccountAddress, Record>,
}

impl StateSnapshot {
    pub(crate) fn new(version: u32, records: BTreeMap<AccountAddress, Record>) -> Self {
        StateSnapshot {
            metadata: SnapshotMetadata {
                version,
                timestamp: now_millis(),
                records_count: records.len(),
            },
            records,
        }
    }

    pub fn records(&self) -> &BTreeMap<AccountAddress, Record> {
        &self.records
    }

    /// Replay change events the snapshot has not seen yet
    ///
    /// An event is newer than the snapshot when its sequence number is at or
    /// past the record's `event_count`. Returns how many events were applied.
    pub(crate) fn apply_events(&mut self, events: &[MessageChangeEvent]) -> usize {
        let mut applied = 0;
        for event in events {
            let record = self
                .records
                .entry(event.account)
                .or_insert_with(|| Record::new(event.from_message.clone()));
            if event.sequence_number < record.event_count {
                continue;
            }
            record.message = event.to_message.clone();
            record.event_count = event.sequence_number + 1;
            applied += 1;
        }
        self.metadata.records_count = self.records.len();
        applied
    }
}

/// Committed snapshot files in `dir` as (version, path), oldest first
fn list_snapshots(dir: &Path) -> StoreResult<Vec<(u32, PathBuf)>> {
    let mut files: Vec<(u32, PathBuf)> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some(SNAPSHOT_EXT))
        .filter_map(|path| {
            let version = path
                .file_stem()?
                .to_str()?
                .strip_prefix(SNAPSHOT_PREFIX)?
                .parse::<u32>()
                .ok()?;
            Some((version, path))
        })
        .collect();

    files.sort_by_key(|(version, _)| *version);
    Ok(files)
}

fn load_newest(dir: &Path) -> StoreResult<Option<StateSnapshot>> {
    let Some((version, path)) = list_snapshots(dir)?.pop() else {
        return Ok(None);
    };

    let data = std::fs::read(&path)?;
    let snapshot: StateSnapshot = bincode::deserialize(&data)?;

    if snapshot.metadata.version != version {
        return Err(StoreError::CorruptedData(format!(
            "{} holds version {}",
            path.display(),
            snapshot.metadata.version
        )));
    }

    Ok(Some(snapshot))
}

/// Writes and loads versioned snapshots in one directory
pub struct SnapshotManager {
    snapshots_dir: PathBuf,
    current_version: AtomicU32,
}

impl SnapshotManager {
    pub fn new(snapshots_dir: PathBuf) -> StoreResult<Self> {
        create_dir_all(&snapshots_dir)?;

        let manager = SnapshotManager {
            snapshots_dir,
            current_version: AtomicU32::new(0),
        };
        let latest = manager
            .snapshot_files()?
            .last()
            .map(|(version, _)| *version)
            .unwrap_or(0);
        manager.current_version.store(latest, Ordering::SeqCst);

        Ok(manager)
    }

    fn path_for(&self, version: u32, ext: &str) -> PathBuf {
        self.snapshots_dir
            .join(format!("{}{:010}.{}", SNAPSHOT_PREFIX, version, ext))
    }

    fn snapshot_files(&self) -> StoreResult<Vec<(u32, PathBuf)>> {
        list_snapshots(&self.snapshots_dir)
    }

    /// Write a new snapshot of `records`, returning its metadata
    pub fn create_snapshot(
        &self,
        records: BTreeMap<AccountAddress, Record>,
    ) -> StoreResult<SnapshotMetadata> {
        let version = self.current_version.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = StateSnapshot::new(version, records);

        let data = bincode::serialize(&snapshot)?;

        let temp_path = self.path_for(version, "tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&temp_path, self.path_for(version, SNAPSHOT_EXT))?;

        debug!(
            version,
            records = snapshot.metadata.records_count,
            "committed snapshot"
        );
        Ok(snapshot.metadata)
    }

    /// Load the newest snapshot, if any has been committed
    pub fn load_latest(&self) -> StoreResult<Option<StateSnapshot>> {
        load_newest(&self.snapshots_dir)
    }

    /// Load the newest snapshot in `dir` without creating anything
    pub fn read_latest(dir: &Path) -> StoreResult<Option<StateSnapshot>> {
        if !dir.is_dir() {
            return Ok(None);
        }
        load_newest(dir)
    }

    /// Remove all but the `keep_count` newest snapshots
    pub fn cleanup_old_snapshots(&self, keep_count: usize) -> StoreResult<()> {
        let snapshots = self.snapshot_files()?;
        if snapshots.len() <= keep_count {
            return Ok(());
        }

        for (_, path) in snapshots.iter().take(snapshots.len() - keep_count) {
            std::fs::remove_file(path)?;
        }

        Ok(())
    }

    pub fn current_version(&self) -> u32 {
        self.current_version.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn records(entries: &[(&str, &str)]) -> BTreeMap<AccountAddress, Record> {
        entries
            .iter()
            .map(|(addr, msg)| (addr.parse().unwrap(), Record::new(msg.to_string())))
            .collect()
    }

    #[test]
    fn test_load_latest_empty() {
        let dir = tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path().to_path_buf()).unwrap();
        assert!(manager.load_latest().unwrap().is_none());
        assert_eq!(manager.current_version(), 0);
    }

    #[test]
    fn test_create_and_load_latest() {
        let dir = tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path().to_path_buf()).unwrap();

        manager.create_snapshot(records(&[("0x1", "old")])).unwrap();
        let meta = manager
            .create_snapshot(records(&[("0x1", "new"), ("0x2", "other")]))
            .unwrap();
        assert_eq!(meta.version, 2);
        assert_eq!(meta.records_count, 2);

        let loaded = manager.load_latest().unwrap().unwrap();
        assert_eq!(loaded.metadata.version, 2);
        assert_eq!(loaded.records, records(&[("0x1", "new"), ("0x2", "other")]));
    }

    #[test]
    fn test_reopen_continues_versions() {
        let dir = tempdir().unwrap();
        {
            let manager = SnapshotManager::new(dir.path().to_path_buf()).unwrap();
            for _ in 0..11 {
                manager.create_snapshot(records(&[("0x1", "m")])).unwrap();
            }
        }

        let manager = SnapshotManager::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(manager.current_version(), 11);
        let meta = manager.create_snapshot(records(&[])).unwrap();
        assert_eq!(meta.version, 12);
        assert!(manager.load_latest().unwrap().unwrap().records.is_empty());
    }

    #[test]
    fn test_cleanup_keeps_newest() {
        let dir = tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path().to_path_buf()).unwrap();
        for i in 0..5 {
            manager
                .create_snapshot(records(&[("0x1", i.to_string().as_str())]))
                .unwrap();
        }

        manager.cleanup_old_snapshots(2).unwrap();

        let versions: Vec<u32> = manager
            .snapshot_files()
            .unwrap()
            .into_iter()
            .map(|(v, _)| v)
            .collect();
        assert_eq!(versions, vec![4, 5]);
        assert_eq!(
            manager.load_latest().unwrap().unwrap().records,
            records(&[("0x1", "4")])
        );
    }

    #[test]
    fn test_stray_files_are_ignored() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hi").unwrap();
        std::fs::write(dir.path().join("snapshot_0000000009.tmp"), b"partial").unwrap();

        let manager = SnapshotManager::new(dir.path().to_path_buf()).unwrap();
        assert!(manager.load_latest().unwrap().is_none());
    }

    fn change(account: &str, seq: u64, from: &str, to: &str) -> MessageChangeEvent {
        MessageChangeEvent {
            account: account.parse().unwrap(),
            sequence_number: seq,
            from_message: from.to_string(),
            to_message: to.to_string(),
        }
    }

    #[test]
    fn test_apply_events_skips_what_snapshot_has_seen() {
        let mut base = records(&[("0x1", "b")]);
        base.get_mut(&"0x1".parse().unwrap()).unwrap().event_count = 1;
        let mut snapshot = StateSnapshot::new(3, base);

        let applied = snapshot.apply_events(&[
            change("0x1", 0, "a", "b"),
            change("0x1", 1, "b", "c"),
            change("0x2", 0, "x", "y"),
        ]);

        assert_eq!(applied, 2);
        let one = &snapshot.records()[&"0x1".parse().unwrap()];
        assert_eq!((one.message.as_str(), one.event_count), ("c", 2));
        let two = &snapshot.records()[&"0x2".parse().unwrap()];
        assert_eq!((two.message.as_str(), two.event_count), ("y", 1));
        assert_eq!(snapshot.metadata.records_count, 2);
    }

    #[test]
    fn test_apply_events_is_idempotent() {
        let mut snapshot = StateSnapshot::new(1, records(&[("0x1", "a")]));
        let events = [change("0x1", 0, "a", "b")];

        assert_eq!(snapshot.apply_events(&events), 1);
        assert_eq!(snapshot.apply_events(&events), 0);
        assert_eq!(snapshot.records()[&"0x1".parse().unwrap()].message, "b");
    }

    #[test]
    fn test_read_latest_does_not_create_dir() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("snapshots");

        assert!(SnapshotManager::read_latest(&missing).unwrap().is_none());
        assert!(!missing.exists());

        let manager = SnapshotManager::new(missing.clone()).unwrap();
        manager.create_snapshot(records(&[("0x1", "m")])).unwrap();
        let loaded = SnapshotManager::read_latest(&missing).unwrap().unwrap();
        assert_eq!(loaded.records(), &records(&[("0x1", "m")]));
    }
}
