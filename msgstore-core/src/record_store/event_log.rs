/*
    event_log.rs - Append-only change event log

    The record store writes every MessageChangeEvent to an EventSink and
    never reads it back. Two sinks are provided:
    - MemoryEventLog: in-process, for tests and ephemeral hosts
    - FileEventLog: durable, checksummed frames on disk

    File frame layout: [seq:8][timestamp:8][len:4][json:len][crc32:4], all
    integers little-endian.
*/

use crate::account::AccountAddress;
use crate::record_store::errors::{handle_poison, StoreError, StoreResult};
use crate::record_store::now_millis;
use crate::record_store::record::MessageChangeEvent;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Fixed bytes per frame besides the payload
const FRAME_OVERHEAD: usize = 8 + 8 + 4 + 4;

/// Destination for change events, owned by the host
pub trait EventSink: Send + Sync {
    /// Append one event, returning its position in the log
    fn append(&self, event: &MessageChangeEvent) -> StoreResult<u64>;
}

/// In-memory event log
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    events: RwLock<Vec<MessageChangeEvent>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> StoreResult<Vec<MessageChangeEvent>> {
        Ok(self.events.read().map_err(handle_poison)?.clone())
    }

    pub fn events_for(&self, account: &AccountAddress) -> StoreResult<Vec<MessageChangeEvent>> {
        Ok(self
            .events
            .read()
            .map_err(handle_poison)?
            .iter()
            .filter(|event| &event.account == account)
            .cloned()
            .collect())
    }

    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.events.read().map_err(handle_poison)?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl EventSink for MemoryEventLog {
    fn append(&self, event: &MessageChangeEvent) -> StoreResult<u64> {
        let mut events = self.events.write().map_err(handle_poison)?;
        events.push(event.clone());
        Ok(events.len() as u64 - 1)
    }
}

/// One decoded frame of a `FileEventLog`
#[derive(Debug, Clone)]
pub struct EventLogEntry {
    pub seq: u64,
    /// Milliseconds since the Unix epoch at append time
    pub timestamp: u64,
    pub data: Vec<u8>,
    pub checksum: u32,
}

impl EventLogEntry {
    fn new(seq: u64, timestamp: u64, data: Vec<u8>) -> Self {
        let checksum = crc32fast::hash(&data);
        EventLogEntry {
            seq,
            timestamp,
            data,
            checksum,
        }
    }

    pub fn verify_checksum(&self) -> bool {
        crc32fast::hash(&self.data) == self.checksum
    }

    pub fn event(&self) -> StoreResult<MessageChangeEvent> {
        Ok(serde_json::from_slice(&self.data)?)
    }

    fn encoded_len(&self) -> usize {
        FRAME_OVERHEAD + self.data.len()
    }

    fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.encoded_len());
        frame.extend_from_slice(&self.seq.to_le_bytes());
        frame.extend_from_slice(&self.timestamp.to_le_bytes());
        frame.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        frame.extend_from_slice(&self.data);
        frame.extend_from_slice(&self.checksum.to_le_bytes());
        frame
    }
}

struct LogWriter {
    file: File,
    next_seq: u64,
    /// Offset just past the last complete frame
    size: u64,
    /// Set when a failed append could not be rolled back
    broken: bool,
}

/// File operations an append needs, so rollback can be exercised in tests
trait FrameTarget: Write {
    fn sync(&mut self) -> std::io::Result<()>;
    fn truncate_to(&mut self, len: u64) -> std::io::Result<()>;
}

impl FrameTarget for File {
    fn sync(&mut self) -> std::io::Result<()> {
        self.sync_data()
    }

    fn truncate_to(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len)
    }
}

/// Write one whole frame, or cut the target back to `good_len`
///
/// Returns `Ok(false)` if the write failed but was rolled back, and an
/// error only when the rollback itself failed.
fn write_frame(target: &mut impl FrameTarget, frame: &[u8], good_len: u64) -> StoreResult<bool> {
    let written = target.write_all(frame).and_then(|_| target.sync());
    match written {
        Ok(()) => Ok(true),
        Err(err) => {
            warn!(error = %err, "event append failed, rolling back");
            target
                .truncate_to(good_len)
                .and_then(|_| target.sync())
                .map_err(|rollback| {
                    StoreError::EventLog(format!(
                        "append failed ({}) and rollback failed ({})",
                        err, rollback
                    ))
                })?;
            Ok(false)
        }
    }
}

/// Durable append-only event log
pub struct FileEventLog {
    path: PathBuf,
    writer: Mutex<LogWriter>,
}

impl FileEventLog {
    /// Create or reopen a log, resuming after its last entry
    ///
    /// A torn final frame, left by a crash mid-append, is cut off. A
    /// checksum mismatch in a complete frame is reported as corruption.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        let scan = scan_entries(&path)?;
        if scan.torn_tail {
            warn!(
                path = %path.display(),
                valid_len = scan.valid_len,
                "truncating torn event log tail"
            );
            file.set_len(scan.valid_len)?;
            file.sync_data()?;
        }
        let next_seq = scan.entries.last().map(|entry| entry.seq + 1).unwrap_or(0);

        debug!(path = %path.display(), entries = scan.entries.len(), "opened event log");

        Ok(FileEventLog {
            path,
            writer: Mutex::new(LogWriter {
                file,
                next_seq,
                size: scan.valid_len,
                broken: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry, verifying checksums
    pub fn read_all(&self) -> StoreResult<Vec<EventLogEntry>> {
        let _writer = self.writer.lock().map_err(handle_poison)?;
        let scan = scan_entries(&self.path)?;
        if scan.torn_tail {
            return Err(StoreError::CorruptedData(
                "Truncated event log frame".to_string(),
            ));
        }
        Ok(scan.entries)
    }

    /// Decode every event in append order
    pub fn read_events(&self) -> StoreResult<Vec<MessageChangeEvent>> {
        self.read_all()?.iter().map(EventLogEntry::event).collect()
    }

    /// Decode the complete events in the log at `path` without opening it
    /// for writing
    ///
    /// A missing file holds no events. A torn final frame is an append that
    /// never finished, so it is left out.
    pub fn read_events_at(path: &Path) -> StoreResult<Vec<MessageChangeEvent>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        scan_entries(path)?
            .entries
            .iter()
            .map(EventLogEntry::event)
            .collect()
    }

    pub fn size(&self) -> StoreResult<u64> {
        Ok(self.writer.lock().map_err(handle_poison)?.size)
    }

    /// Sequence number the next append will receive
    pub fn next_seq(&self) -> StoreResult<u64> {
        Ok(self.writer.lock().map_err(handle_poison)?.next_seq)
    }
}

impl EventSink for FileEventLog {
    fn append(&self, event: &MessageChangeEvent) -> StoreResult<u64> {
        let data = serde_json::to_vec(event)?;
        let mut writer = self.writer.lock().map_err(handle_poison)?;
        if writer.broken {
            return Err(StoreError::EventLog(
                "log holds an unrolled partial frame; reopen to repair".to_string(),
            ));
        }

        let entry = EventLogEntry::new(writer.next_seq, now_millis(), data);
        let frame = entry.encode();
        let good_len = writer.size;

        match write_frame(&mut writer.file, &frame, good_len) {
            Ok(true) => {}
            Ok(false) => {
                return Err(StoreError::EventLog(format!(
                    "append of seq {} failed and was rolled back",
                    entry.seq
                )))
            }
            Err(err) => {
                writer.broken = true;
                return Err(err);
            }
        }

        writer.size += frame.len() as u64;
        writer.next_seq += 1;

        Ok(entry.seq)
    }
}

struct LogScan {
    entries: Vec<EventLogEntry>,
    /// Length of the prefix made of complete frames
    valid_len: u64,
    torn_tail: bool,
}

fn scan_entries(path: &Path) -> StoreResult<LogScan> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    let mut valid_len = 0u64;

    while !reader.fill_buf()?.is_empty() {
        let Some(entry) = read_frame(&mut reader)? else {
            return Ok(LogScan {
                entries,
                valid_len,
                torn_tail: true,
            });
        };
        if !entry.verify_checksum() {
            return Err(StoreError::CorruptedData(format!(
                "Invalid checksum at seq {}",
                entry.seq
            )));
        }
        valid_len += entry.encoded_len() as u64;
        entries.push(entry);
    }

    Ok(LogScan {
        entries,
        valid_len,
        torn_tail: false,
    })
}

/// Read one frame; `None` means the input ended mid-frame
fn read_frame(reader: &mut impl Read) -> StoreResult<Option<EventLogEntry>> {
    let mut seq = [0u8; 8];
    let mut timestamp = [0u8; 8];
    let mut len = [0u8; 4];
    for field in [&mut seq[..], &mut timestamp[..], &mut len[..]] {
        if !read_full(reader, field)? {
            return Ok(None);
        }
    }
    let len = u32::from_le_bytes(len) as u64;

    // Bounded by what is actually on disk, so a garbage length cannot
    // trigger a huge allocation.
    let mut data = Vec::new();
    reader.by_ref().take(len).read_to_end(&mut data)?;
    if (data.len() as u64) < len {
        return Ok(None);
    }

    let mut checksum = [0u8; 4];
    if !read_full(reader, &mut checksum)? {
        return Ok(None);
    }

    Ok(Some(EventLogEntry {
        seq: u64::from_le_bytes(seq),
        timestamp: u64::from_le_bytes(timestamp),
        data,
        checksum: u32::from_le_bytes(checksum),
    }))
}

/// `read_exact` that reports end-of-input as `false` instead of an error
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> StoreResult<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn event(account: &str, seq: u64, from: &str, to: &str) -> MessageChangeEvent {
        MessageChangeEvent {
            account: account.parse().unwrap(),
            sequence_number: seq,
            from_message: from.to_string(),
            to_message: to.to_string(),
        }
    }

    #[test]
    fn test_memory_log_filters_by_account() {
        let log = MemoryEventLog::new();
        assert!(log.is_empty().unwrap());

        assert_eq!(log.append(&event("0x1", 0, "a", "b")).unwrap(), 0);
        assert_eq!(log.append(&event("0x2", 0, "x", "y")).unwrap(), 1);
        assert_eq!(log.append(&event("0x1", 1, "b", "c")).unwrap(), 2);

        let for_one = log.events_for(&"0x1".parse().unwrap()).unwrap();
        assert_eq!(for_one.len(), 2);
        assert_eq!(for_one[1].to_message, "c");
        assert_eq!(log.len().unwrap(), 3);
    }

    #[test]
    fn test_file_log_append_and_read() {
        let dir = tempdir().unwrap();
        let log = FileEventLog::open(dir.path().join("events.log")).unwrap();

        let first = event("0x1", 0, "Hello", "World");
        let second = event("0x1", 1, "World", "");

        assert_eq!(log.append(&first).unwrap(), 0);
        assert_eq!(log.append(&second).unwrap(), 1);

        let entries = log.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(EventLogEntry::verify_checksum));
        assert_eq!(log.read_events().unwrap(), vec![first, second]);

        let expected_size: u64 = entries.iter().map(|e| e.encoded_len() as u64).sum();
        assert_eq!(log.size().unwrap(), expected_size);
    }

    #[test]
    fn test_reopen_resumes_sequence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");

        {
            let log = FileEventLog::open(&path).unwrap();
            log.append(&event("0x1", 0, "a", "b")).unwrap();
            log.append(&event("0x1", 1, "b", "c")).unwrap();
        }

        let log = FileEventLog::open(&path).unwrap();
        assert_eq!(log.next_seq().unwrap(), 2);
        assert_eq!(log.append(&event("0x1", 2, "c", "d")).unwrap(), 2);
        assert_eq!(log.read_events().unwrap().len(), 3);
    }

    #[test]
    fn test_corrupted_payload_is_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");

        let log = FileEventLog::open(&path).unwrap();
        log.append(&event("0x1", 0, "a", "b")).unwrap();
        drop(log);

        let mut bytes = std::fs::read(&path).unwrap();
        // First payload byte sits right after seq, timestamp and length.
        bytes[20] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            FileEventLog::open(&path),
            Err(StoreError::CorruptedData(_))
        ));
    }

    #[test]
    fn test_torn_tail_is_cut_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");

        let log = FileEventLog::open(&path).unwrap();
        log.append(&event("0x1", 0, "a", "b")).unwrap();
        log.append(&event("0x1", 1, "b", "c")).unwrap();
        drop(log);

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();

        let log = FileEventLog::open(&path).unwrap();
        assert_eq!(log.next_seq().unwrap(), 1);
        assert_eq!(log.read_events().unwrap(), vec![event("0x1", 0, "a", "b")]);

        assert_eq!(log.append(&event("0x1", 1, "b", "d")).unwrap(), 1);
        drop(log);

        let log = FileEventLog::open(&path).unwrap();
        let events = log.read_events().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].to_message, "d");
    }

    #[test]
    fn test_garbage_length_is_a_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");

        let log = FileEventLog::open(&path).unwrap();
        log.append(&event("0x1", 0, "a", "b")).unwrap();
        drop(log);

        let good_len = std::fs::metadata(&path).unwrap().len();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(&7u64.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(b"{\"acc");
        std::fs::write(&path, bytes).unwrap();

        let log = FileEventLog::open(&path).unwrap();
        assert_eq!(log.size().unwrap(), good_len);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);
        assert_eq!(log.next_seq().unwrap(), 1);
    }

    #[test]
    fn test_read_events_at_leaves_file_alone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");
        assert!(FileEventLog::read_events_at(&path).unwrap().is_empty());
        assert!(!path.exists());

        let log = FileEventLog::open(&path).unwrap();
        log.append(&event("0x1", 0, "a", "b")).unwrap();
        drop(log);

        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(&[1, 2, 3]);
        std::fs::write(&path, &bytes).unwrap();

        let events = FileEventLog::read_events_at(&path).unwrap();
        assert_eq!(events, vec![event("0x1", 0, "a", "b")]);
        assert_eq!(std::fs::read(&path).unwrap(), bytes);
    }

    /// In-memory target whose sync can be made to fail
    struct FlakyTarget {
        bytes: Vec<u8>,
        fail_sync: bool,
        fail_truncate: bool,
    }

    impl Write for FlakyTarget {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.bytes.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl FrameTarget for FlakyTarget {
        fn sync(&mut self) -> std::io::Result<()> {
            if self.fail_sync {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "fsync failed"))
            } else {
                Ok(())
            }
        }

        fn truncate_to(&mut self, len: u64) -> std::io::Result<()> {
            if self.fail_truncate {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "read-only"));
            }
            self.bytes.truncate(len as usize);
            self.fail_sync = false;
            Ok(())
        }
    }

    #[test]
    fn test_failed_sync_rolls_back_frame() {
        let mut target = FlakyTarget {
            bytes: b"prefix".to_vec(),
            fail_sync: true,
            fail_truncate: false,
        };

        let written = write_frame(&mut target, b"new frame", 6).unwrap();

        assert!(!written);
        assert_eq!(target.bytes, b"prefix");
    }

    #[test]
    fn test_failed_rollback_is_an_error() {
        let mut target = FlakyTarget {
            bytes: b"prefix".to_vec(),
            fail_sync: true,
            fail_truncate: true,
        };

        let err = write_frame(&mut target, b"new frame", 6).unwrap_err();
        assert!(matches!(err, StoreError::EventLog(_)));
    }

    #[test]
    fn test_successful_write_keeps_frame() {
        let mut target = FlakyTarget {
            bytes: Vec::new(),
            fail_sync: false,
            fail_truncate: false,
        };

        assert!(write_frame(&mut target, b"frame", 0).unwrap());
        assert_eq!(target.bytes, b"frame");
    }
}
