//! Core storage engine — an ordered table in RAM made durable by a log.
//!
//! **Read path**: `BTreeMap` lookups under a `RwLock`, never touching disk
//! **Write path**: one log record per batch, then the in-memory table
//! **Ordering**: keys iterate in ascending lexicographic byte order
//!
//! The engine is the ordered-store contract the typed layer is built on:
//! point reads, atomic multi-entry batches, a forward seek primitive, range
//! size estimates, and open-time switches for memory-only and wipe modes.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};

use crate::compaction::{compact_log, remove_stale_compactions, total_log_bytes, CompactionResult};
use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::format::{check_op_size, BatchOp, Record, RecordKind};
use crate::wal::{WalReader, WalWriter};

/// Subdirectory of the engine path holding the log files
const WAL_DIR: &str = "wal";

/// Bookkeeping cost of one table entry beyond its key and value bytes
const ENTRY_OVERHEAD: usize = 2 * std::mem::size_of::<Vec<u8>>() + 16;

#[derive(Default)]
struct Table {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Sum of key and value lengths of all live entries
    live_bytes: u64,
}

impl Table {
    fn apply(&mut self, op: BatchOp) {
        match op {
            BatchOp::Put { key, value } => {
                let key_len = key.len() as u64;
                let value_len = value.len() as u64;
                match self.entries.insert(key, value) {
                    Some(old) => self.live_bytes = self.live_bytes - old.len() as u64 + value_len,
                    None => self.live_bytes += key_len + value_len,
                }
            }
            BatchOp::Delete { key } => {
                if let Some(old) = self.entries.remove(&key) {
                    self.live_bytes -= (key.len() + old.len()) as u64;
                }
            }
        }
    }

    fn apply_record(&mut self, record: Record) {
        if record.kind == RecordKind::Snapshot {
            self.entries.clear();
            self.live_bytes = 0;
        }
        for op in record.ops {
            self.apply(op);
        }
    }
}

struct LogState {
    writer: WalWriter,
    wal_dir: PathBuf,
    /// Bytes of all log files, live or dead
    log_bytes: u64,
}

/// Ordered key-value engine: RAM `BTreeMap` + write-ahead log.
///
/// All public methods take `&self`. Readers share the table through a
/// `RwLock`; writers serialize on the log `Mutex` and hold it while the batch
/// is applied, so the table always reflects a prefix of the log.
pub struct Engine {
    table: RwLock<Table>,
    /// `None` for memory-only engines
    log: Option<Mutex<LogState>>,
    path: PathBuf,
    config: Config,
}

impl Engine {
    /// Open or create an engine at `path`.
    ///
    /// Honours `wipe_data` (destroy first), `memory_only` (no files at all)
    /// and `force_compact` (compact right after recovery).
    pub fn open<P: AsRef<Path>>(path: P, config: Config) -> EngineResult<Self> {
        config.validate().map_err(EngineError::InvalidConfig)?;
        let path = path.as_ref().to_path_buf();

        if config.memory_only {
            tracing::debug!(path = %path.display(), "opening memory-only engine");
            return Ok(Self { table: RwLock::new(Table::default()), log: None, path, config });
        }

        if config.wipe_data {
            tracing::info!(path = %path.display(), "wiping existing data");
            Self::destroy(&path)?;
        }

        let wal_dir = path.join(WAL_DIR);
        std::fs::create_dir_all(&wal_dir)
            .map_err(EngineError::io_at(&wal_dir, "Failed to create log directory"))?;

        let stale = remove_stale_compactions(&wal_dir)?;
        if stale > 0 {
            tracing::warn!(path = %wal_dir.display(), stale, "removed unfinished compaction files");
        }

        let mut table = Table::default();
        for record in WalReader::new(&wal_dir).recover_records()? {
            table.apply_record(record);
        }

        let log_bytes = total_log_bytes(&wal_dir)?;
        let writer = WalWriter::new(&wal_dir, config.wal_rotation_size_bytes)?;

        if !table.entries.is_empty() {
            tracing::info!(
                path = %wal_dir.display(),
                entries = table.entries.len(),
                log_bytes,
                "recovered entries from write-ahead log"
            );
        }

        let force_compact = config.force_compact;
        let engine = Self {
            table: RwLock::new(table),
            log: Some(Mutex::new(LogState { writer, wal_dir, log_bytes })),
            path,
            config,
        };

        if force_compact {
            engine.compact()?;
        }

        Ok(engine)
    }

    /// Remove every on-disk artifact of an engine at `path`.
    pub fn destroy<P: AsRef<Path>>(path: P) -> EngineResult<()> {
        let path = path.as_ref();
        if path.exists() {
            std::fs::remove_dir_all(path).map_err(EngineError::io_at(path, "Failed to destroy store"))?;
        }
        Ok(())
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        let table = self.table.read();
        Ok(table.entries.get(key).cloned())
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.table.read().entries.contains_key(key)
    }

    /// Apply `ops` atomically, in order.
    ///
    /// The whole batch becomes one log record: after a crash it is either
    /// replayed completely or not at all. With `sync` the record is forced
    /// to persistent storage before the table changes.
    pub fn write_batch(&self, ops: &[BatchOp], sync: bool) -> EngineResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        for op in ops {
            check_op_size(op, self.config.max_key_size, self.config.max_value_size)?;
        }

        let Some(log) = &self.log else {
            let mut table = self.table.write();
            for op in ops {
                table.apply(op.clone());
            }
            return Ok(());
        };

        let mut log = log.lock();
        let written = log.writer.append_batch(ops, sync)?;
        log.log_bytes += written;

        let live_bytes = {
            let mut table = self.table.write();
            for op in ops {
                table.apply(op.clone());
            }
            table.live_bytes
        };

        // The batch is durable and visible at this point; a failed
        // compaction is retried on a later write.
        if self.should_compact(log.log_bytes, live_bytes) {
            if let Err(err) = self.compact_locked(&mut log) {
                tracing::warn!(path = %log.wal_dir.display(), %err, "automatic compaction failed");
            }
        }
        Ok(())
    }

    fn should_compact(&self, log_bytes: u64, live_bytes: u64) -> bool {
        if log_bytes <= self.config.cache_bytes as u64 {
            return false;
        }
        let dead = log_bytes.saturating_sub(live_bytes);
        dead as f64 / log_bytes as f64 > self.config.compaction_trigger_ratio
    }

    /// Rewrite the log as a single snapshot of the live table.
    ///
    /// Returns `None` for memory-only engines.
    pub fn compact(&self) -> EngineResult<Option<CompactionResult>> {
        match &self.log {
            Some(log) => {
                let mut log = log.lock();
                self.compact_locked(&mut log).map(Some)
            }
            None => Ok(None),
        }
    }

    fn compact_locked(&self, log: &mut LogState) -> EngineResult<CompactionResult> {
        let snapshot: Vec<BatchOp> = {
            let table = self.table.read();
            table
                .entries
                .iter()
                .map(|(key, value)| BatchOp::Put { key: key.clone(), value: value.clone() })
                .collect()
        };

        // New appends go past the snapshot before older files are unlinked
        let sequence = log.writer.sequence() + 1;
        log.writer.sync()?;
        log.writer.switch_to(sequence + 1)?;

        let result = compact_log(&log.wal_dir, sequence, &snapshot)?;
        log.log_bytes = result.compacted_bytes;

        tracing::info!(
            path = %result.file_path.display(),
            live_entries = result.live_entries,
            removed_files = result.removed_files,
            bytes_saved = result.bytes_saved(),
            "compacted write-ahead log"
        );
        Ok(result)
    }

    /// First entry strictly after (`Excluded`) or at/after (`Included`) the
    /// bound, in key order. This is the engine's forward cursor primitive.
    pub fn seek_entry(&self, from: Bound<&[u8]>) -> Option<(Vec<u8>, Vec<u8>)> {
        let table = self.table.read();
        table
            .entries
            .range::<[u8], _>((from, Bound::Unbounded))
            .next()
            .map(|(key, value)| (key.clone(), value.clone()))
    }

    /// Approximate bytes occupied by keys in `[begin, end)`.
    pub fn approximate_size(&self, begin: &[u8], end: &[u8]) -> u64 {
        if begin >= end {
            return 0;
        }
        let table = self.table.read();
        table
            .entries
            .range::<[u8], _>((Bound::Included(begin), Bound::Excluded(end)))
            .map(|(key, value)| (key.len() + value.len()) as u64)
            .sum()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.table.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().entries.is_empty()
    }

    /// Estimated RAM held by the table, in bytes.
    pub fn memory_usage(&self) -> usize {
        let table = self.table.read();
        table.live_bytes as usize + table.entries.len() * ENTRY_OVERHEAD
    }

    /// Bytes currently occupied by log files (0 for memory-only engines).
    pub fn log_bytes(&self) -> u64 {
        self.log.as_ref().map_or(0, |log| log.lock().log_bytes)
    }

    /// Force any unsynced log records to persistent storage.
    pub fn sync(&self) -> EngineResult<()> {
        match &self.log {
            Some(log) => log.lock().writer.sync(),
            None => Ok(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_memory_only(&self) -> bool {
        self.log.is_none()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(log) = self.log.as_mut() {
            if let Err(err) = log.get_mut().writer.sync() {
                tracing::warn!(path = %self.path.display(), %err, "failed to sync log on close");
            }
        }
    }
}
