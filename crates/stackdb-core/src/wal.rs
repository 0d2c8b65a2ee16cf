//! Write-ahead log
//!
//! The log is the only durable state of an on-disk engine. Every batch is
//! appended as one record before the in-memory table is touched:
//! 1. Serialize the batch into a record (CRC32C over the payload)
//! 2. Append the record to the current log file
//! 3. If the caller asked for sync, `durable_sync()` the file
//! 4. Return; only now may the caller apply the batch in RAM
//!
//! Log files are named `wal-{sequence:016x}.log` and replayed in sequence order.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{EngineError, EngineResult};
use crate::format::{deserialize_record, record_len, serialize_record, BatchOp, Record, RecordKind, HEADER_SIZE, MAGIC_ARRAY};
use crate::platform_durability::durable_sync;

pub(crate) const LOG_PREFIX: &str = "wal-";
pub(crate) const LOG_SUFFIX: &str = ".log";

/// File name for the log with the given sequence number
pub fn log_file_name(sequence: u64) -> String {
    format!("{}{:016x}{}", LOG_PREFIX, sequence, LOG_SUFFIX)
}

/// All log files in `wal_dir`, sorted by sequence number.
pub fn list_log_files(wal_dir: &Path) -> EngineResult<Vec<(u64, PathBuf)>> {
    let dir_entries = std::fs::read_dir(wal_dir)
        .map_err(EngineError::io_at(wal_dir, "Failed to read log directory"))?;

    let mut files = Vec::new();
    for entry in dir_entries {
        let entry = entry.map_err(EngineError::io_at(wal_dir, "Failed to read directory entry"))?;
        let path = entry.path();
        let sequence = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|name| name.strip_prefix(LOG_PREFIX))
            .and_then(|rest| rest.strip_suffix(LOG_SUFFIX))
            .and_then(|hex| u64::from_str_radix(hex, 16).ok());
        if let Some(sequence) = sequence {
            files.push((sequence, path));
        }
    }

    files.sort_by_key(|(sequence, _)| *sequence);
    Ok(files)
}

fn open_log(path: &Path) -> EngineResult<(File, u64)> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(EngineError::io_at(path, "Failed to open log file"))?;
    let size = file
        .metadata()
        .map_err(EngineError::io_at(path, "Failed to stat log file"))?
        .len();
    Ok((file, size))
}

/// Appends batch records to the current log file, rotating when it grows
/// past the configured size.
///
/// A record must be fully appended (and synced, when requested) before the
/// caller applies the batch to the in-memory table.
pub struct WalWriter {
    /// Current log file handle
    file: File,
    /// Path to current log file (for error context)
    path: PathBuf,
    /// Current file size in bytes (tracked to avoid stat calls)
    size: u64,
    /// Log directory for file rotation
    wal_dir: PathBuf,
    /// Sequence number of the current file
    sequence: u64,
    /// Rotate once a file would grow past this many bytes
    rotation_size: u64,
}

impl WalWriter {
    /// Open a writer in `wal_dir` on a new file after the highest existing
    /// sequence.
    ///
    /// Existing files are never appended to: one may end in a torn record,
    /// and anything written behind it would be unreachable on replay.
    pub fn new<P: AsRef<Path>>(wal_dir: P, rotation_size: u64) -> EngineResult<Self> {
        let wal_dir = wal_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&wal_dir)
            .map_err(EngineError::io_at(&wal_dir, "Failed to create log directory"))?;

        let sequence = list_log_files(&wal_dir)?
            .last()
            .map_or(1, |(sequence, _)| *sequence + 1);
        let path = wal_dir.join(log_file_name(sequence));
        let (file, size) = open_log(&path)?;

        Ok(Self { file, path, size, wal_dir, sequence, rotation_size })
    }

    /// Append one batch as a single record. Returns the bytes written.
    pub fn append_batch(&mut self, ops: &[BatchOp], sync: bool) -> EngineResult<u64> {
        let record = serialize_record(RecordKind::Batch, ops)?;

        if self.size > 0 && self.size + record.len() as u64 > self.rotation_size {
            self.rotate()?;
        }

        self.file
            .write_all(&record)
            .map_err(EngineError::io_at(&self.path, "Log write failed"))?;

        if sync {
            durable_sync(&self.file).map_err(EngineError::io_at(&self.path, "Log durable_sync failed"))?;
        }

        self.size += record.len() as u64;
        Ok(record.len() as u64)
    }

    /// Rotate to a new log file. Syncs the current file before switching.
    fn rotate(&mut self) -> EngineResult<()> {
        durable_sync(&self.file).map_err(EngineError::io_at(&self.path, "Log sync before rotation failed"))?;
        let next = self.sequence + 1;
        self.switch_to(next)?;
        tracing::debug!(path = %self.path.display(), "rotated write-ahead log");
        Ok(())
    }

    /// Continue appending in the file with the given sequence number.
    pub(crate) fn switch_to(&mut self, sequence: u64) -> EngineResult<()> {
        let path = self.wal_dir.join(log_file_name(sequence));
        let (file, size) = open_log(&path)?;
        self.file = file;
        self.path = path;
        self.size = size;
        self.sequence = sequence;
        Ok(())
    }

    /// Current log file path (for diagnostics)
    pub fn current_path(&self) -> &Path {
        &self.path
    }

    /// Current log file size in bytes
    pub fn current_size(&self) -> u64 {
        self.size
    }

    /// Sequence number of the current log file
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Sync the current file without writing anything.
    pub fn sync(&self) -> EngineResult<()> {
        durable_sync(&self.file).map_err(EngineError::io_at(&self.path, "Log sync failed"))
    }
}

/// Replays the records of every log file in a directory.
pub struct WalReader {
    wal_dir: PathBuf,
}

impl WalReader {
    pub fn new<P: AsRef<Path>>(wal_dir: P) -> Self {
        Self { wal_dir: wal_dir.as_ref().to_path_buf() }
    }

    /// Recover all records from all log files in sequence order.
    ///
    /// Per file:
    /// 1. Validate magic bytes; on mismatch scan forward for the next magic
    /// 2. If the record extends past end of file, stop: that is the crash point
    /// 3. Verify CRC32C; on failure skip the record and resync on the next magic
    pub fn recover_records(&self) -> EngineResult<Vec<Record>> {
        let mut records = Vec::new();
        for (_, path) in list_log_files(&self.wal_dir)? {
            records.extend(self.recover_from_file(&path)?);
        }
        Ok(records)
    }

    fn recover_from_file(&self, path: &Path) -> EngineResult<Vec<Record>> {
        let mut file = File::open(path).map_err(EngineError::io_at(path, "Failed to open log file for recovery"))?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)
            .map_err(EngineError::io_at(path, "Failed to read log file"))?;

        let mut records = Vec::new();
        let mut offset = 0;

        while offset + HEADER_SIZE <= buffer.len() {
            if buffer[offset..offset + 4] != MAGIC_ARRAY {
                tracing::warn!(path = %path.display(), offset, "bad magic in log, scanning for next record");
                match find_next_magic(&buffer, offset + 1) {
                    Some(next) => { offset = next; continue; }
                    None => break,
                }
            }

            let total = match record_len(&buffer[offset..]) {
                Some(total) => total,
                None => break,
            };

            if offset + total > buffer.len() {
                tracing::warn!(
                    path = %path.display(),
                    offset,
                    needed = total,
                    available = buffer.len() - offset,
                    "torn record at end of log, discarding it"
                );
                break;
            }

            match deserialize_record(&buffer[offset..offset + total]) {
                Ok(record) => {
                    records.push(record);
                    offset += total;
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), offset, %err, "corrupt log record skipped");
                    match find_next_magic(&buffer, offset + 1) {
                        Some(next) => { offset = next; continue; }
                        None => break,
                    }
                }
            }
        }

        Ok(records)
    }
}

/// Position of the next record magic at or after `start`.
fn find_next_magic(buffer: &[u8], start: usize) -> Option<usize> {
    if buffer.len() < 4 {
        return None;
    }
    (start..=buffer.len() - 4).find(|&i| buffer[i..i + 4] == MAGIC_ARRAY)
}
