//! Compaction — dead space reclamation for the write-ahead log
//!
//! The log only ever grows: overwritten values and deleted keys stay in it
//! until compaction rewrites the live table as a single snapshot record.
//!
//! Crash safety comes from the atomic rename pattern:
//! 1. Write the snapshot to `wal-{seq}.log.compact`
//! 2. durable_sync the temp file
//! 3. Rename it to `wal-{seq}.log` (atomic on POSIX)
//! 4. durable_sync the directory
//! 5. Remove every log with a lower sequence, sync the directory again
//!
//! A crash between 3 and 5 is harmless: replay meets the older logs first
//! and then the snapshot record, which replaces the whole table.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, EngineResult};
use crate::format::{serialize_record, BatchOp, RecordKind};
use crate::platform_durability::{durable_sync, sync_dir};
use crate::wal::{list_log_files, log_file_name};

const COMPACT_SUFFIX: &str = ".compact";

/// Result of a compaction run.
#[derive(Debug)]
pub struct CompactionResult {
    /// Path to the snapshot log
    pub file_path: PathBuf,
    /// Live entries written to the snapshot
    pub live_entries: usize,
    /// Log files removed
    pub removed_files: usize,
    /// Total log bytes before compaction
    pub original_bytes: u64,
    /// Size of the snapshot log
    pub compacted_bytes: u64,
}

impl CompactionResult {
    /// Ratio of dead bytes in the original log (0.0 = no waste, 1.0 = all waste).
    pub fn dead_space_ratio(&self) -> f64 {
        if self.original_bytes == 0 {
            return 0.0;
        }
        self.bytes_saved() as f64 / self.original_bytes as f64
    }

    /// Space saved in bytes.
    pub fn bytes_saved(&self) -> u64 {
        self.original_bytes.saturating_sub(self.compacted_bytes)
    }
}

/// Write `entries` as a snapshot log with sequence `sequence` and remove all
/// older logs.
///
/// The caller must guarantee nothing appends to the log directory while this
/// runs, and must continue writing at `sequence + 1` afterwards.
pub fn compact_log(
    wal_dir: &Path,
    sequence: u64,
    entries: &[BatchOp],
) -> EngineResult<CompactionResult> {
    let original_bytes = total_log_bytes(wal_dir)?;

    let final_path = wal_dir.join(log_file_name(sequence));
    let temp_path = temp_path_for(&final_path);
    let record = serialize_record(RecordKind::Snapshot, entries)?;

    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(EngineError::io_at(&temp_path, "Failed to create compaction file"))?;
        file.write_all(&record)
            .map_err(EngineError::io_at(&temp_path, "Failed to write compaction file"))?;
        durable_sync(&file).map_err(EngineError::io_at(&temp_path, "Failed to sync compaction file"))?;
    }

    fs::rename(&temp_path, &final_path)
        .map_err(EngineError::io_at(&final_path, "Failed to install compacted log"))?;
    sync_dir(wal_dir).map_err(EngineError::io_at(wal_dir, "Failed to sync log directory"))?;

    let removed_files = remove_logs_before(wal_dir, sequence)?;

    Ok(CompactionResult {
        file_path: final_path,
        live_entries: entries.len(),
        removed_files,
        original_bytes,
        compacted_bytes: record.len() as u64,
    })
}

/// Delete every log whose sequence is below `sequence`.
fn remove_logs_before(wal_dir: &Path, sequence: u64) -> EngineResult<usize> {
    let mut removed = 0;
    for (seq, path) in list_log_files(wal_dir)? {
        if seq < sequence {
            fs::remove_file(&path).map_err(EngineError::io_at(&path, "Failed to remove compacted log"))?;
            removed += 1;
        }
    }
    if removed > 0 {
        sync_dir(wal_dir).map_err(EngineError::io_at(wal_dir, "Failed to sync log directory"))?;
    }
    Ok(removed)
}

/// Remove leftovers of a compaction that crashed before its rename.
pub fn remove_stale_compactions(wal_dir: &Path) -> EngineResult<usize> {
    let dir_entries = fs::read_dir(wal_dir).map_err(EngineError::io_at(wal_dir, "Failed to read log directory"))?;
    let mut removed = 0;
    for entry in dir_entries.flatten() {
        let path = entry.path();
        let is_stale = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |name| name.ends_with(COMPACT_SUFFIX));
        if is_stale {
            fs::remove_file(&path).map_err(EngineError::io_at(&path, "Failed to remove stale compaction file"))?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Sum of the sizes of all log files in `wal_dir`.
pub fn total_log_bytes(wal_dir: &Path) -> EngineResult<u64> {
    let mut total = 0;
    for (_, path) in list_log_files(wal_dir)? {
        total += fs::metadata(&path)
            .map_err(EngineError::io_at(&path, "Failed to stat log file"))?
            .len();
    }
    Ok(total)
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(COMPACT_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::{WalReader, WalWriter};
    use tempfile::TempDir;

    fn put(k: &[u8], v: &[u8]) -> BatchOp {
        BatchOp::Put { key: k.to_vec(), value: v.to_vec() }
    }

    #[test]
    fn test_compaction_replaces_older_logs() {
        let temp = TempDir::new().unwrap();
        let mut writer = WalWriter::new(temp.path(), 1024 * 1024).unwrap();
        for i in 0..50u8 {
            writer.append_batch(&[put(b"hot", &[i; 64])], false).unwrap();
        }
        let next = writer.sequence() + 1;
        drop(writer);

        let live = vec![put(b"hot", &[49; 64])];
        let result = compact_log(temp.path(), next, &live).unwrap();

        assert_eq!(result.live_entries, 1);
        assert_eq!(result.removed_files, 1);
        assert!(result.dead_space_ratio() > 0.9);
        assert!(result.bytes_saved() > 0);

        let files = list_log_files(temp.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, next);

        let records = WalReader::new(temp.path()).recover_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, RecordKind::Snapshot);
        assert_eq!(records[0].ops, live);
    }

    #[test]
    fn test_stale_compaction_files_removed() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("wal-0000000000000003.log.compact"), b"half").unwrap();
        std::fs::write(temp.path().join(log_file_name(2)), b"").unwrap();

        assert_eq!(remove_stale_compactions(temp.path()).unwrap(), 1);
        assert_eq!(list_log_files(temp.path()).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_result_ratio() {
        let result = CompactionResult {
            file_path: PathBuf::from("x"),
            live_entries: 0,
            removed_files: 0,
            original_bytes: 0,
            compacted_bytes: 36,
        };
        assert_eq!(result.dead_space_ratio(), 0.0);
        assert_eq!(result.bytes_saved(), 0);
    }
}
