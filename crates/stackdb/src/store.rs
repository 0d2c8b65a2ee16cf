//! Typed store over the ordered engine
//!
//! `Store` owns one `Engine` and adds the typed surface on top of it:
//! keys and values go through the codec, values are obfuscated with the
//! per-store key, and engine failures are mapped into `DbError`.
//!
//! All public methods take `&self`; the engine does its own locking.

use std::path::{Path, PathBuf};

use stackdb_core::{BatchOp, Config, Engine};

use crate::batch::WriteBatch;
use crate::codec::{Decode, Encode};
use crate::error::{fatal_engine_error, DbError, DbResult};
use crate::iterator::StoreIterator;
use crate::kv::{KvRead, KvStore};
use crate::obfuscation::ObfuscateKey;
use crate::value::{PendingChanges, Value};

/// Parameters for `Store::open`.
#[derive(Debug, Clone)]
pub struct DbParams {
    /// Directory holding the store's files
    pub path: PathBuf,
    /// Engine configuration (cache size, memory-only, wipe, force compact)
    pub config: Config,
    /// Generate an obfuscation key if the store is created empty
    pub obfuscate: bool,
}

impl DbParams {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        DbParams { path: path.into(), config: Config::default(), obfuscate: false }
    }

    /// Memory-only store: nothing is read from or written to disk.
    pub fn in_memory() -> Self {
        DbParams {
            path: PathBuf::from("memory"),
            config: Config::minimal().with_memory_only(true),
            obfuscate: false,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_obfuscate(mut self, obfuscate: bool) -> Self {
        self.obfuscate = obfuscate;
        self
    }

    pub fn with_cache_bytes(mut self, cache_bytes: usize) -> Self {
        self.config = self.config.with_cache_bytes(cache_bytes);
        self
    }

    pub fn with_memory_only(mut self, memory_only: bool) -> Self {
        self.config = self.config.with_memory_only(memory_only);
        self
    }

    pub fn with_wipe_data(mut self, wipe_data: bool) -> Self {
        self.config = self.config.with_wipe_data(wipe_data);
        self
    }

    pub fn with_force_compact(mut self, force_compact: bool) -> Self {
        self.config = self.config.with_force_compact(force_compact);
        self
    }
}

/// Ordered, persistent key-value store with typed access.
pub struct Store {
    engine: Engine,
    name: String,
    obfuscate_key: ObfuscateKey,
    reserved_key: Vec<u8>,
}

impl Store {
    /// Open (or create) the store described by `params`.
    ///
    /// A store that has an obfuscation key keeps using it. A new, empty
    /// store opened with `obfuscate` gets a fresh random key, persisted
    /// with a synced write before any other data. Everything else uses the
    /// zero key, which leaves values untouched.
    pub fn open(params: DbParams) -> DbResult<Self> {
        if params.path.as_os_str().is_empty() {
            return Err(DbError::InvalidParams("store path is empty".into()));
        }

        let engine = Engine::open(&params.path, params.config.clone())?;
        let name = params
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| params.path.display().to_string());

        let mut store = Store {
            engine,
            name,
            obfuscate_key: ObfuscateKey::zero(),
            reserved_key: ObfuscateKey::reserved_key(),
        };

        // The stored key is itself written with the zero key.
        let existing: Option<ObfuscateKey> = store.read_encoded(&store.reserved_key);
        match existing {
            Some(key) => store.obfuscate_key = key,
            None if params.obfuscate && store.is_empty() => {
                let key = ObfuscateKey::generate();
                store.engine.write_batch(
                    &[BatchOp::Put { key: store.reserved_key.clone(), value: key.encode() }],
                    true,
                )?;
                tracing::info!(store = %store.name, key = %key.to_hex(), "wrote new obfuscation key");
                store.obfuscate_key = key;
            }
            None => {}
        }

        tracing::info!(
            store = %store.name,
            path = ?store.storage_path(),
            key = %store.obfuscate_key.to_hex(),
            "opened store with obfuscation key"
        );
        Ok(store)
    }

    /// Remove all files of the store at `path`.
    pub fn destroy<P: AsRef<Path>>(path: P) -> DbResult<()> {
        Engine::destroy(path)?;
        Ok(())
    }

    /// Last path component, used to tag log lines.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing directory, `None` for memory-only stores.
    pub fn storage_path(&self) -> Option<&Path> {
        if self.engine.is_memory_only() {
            None
        } else {
            Some(self.engine.path())
        }
    }

    pub fn obfuscate_key(&self) -> &ObfuscateKey {
        &self.obfuscate_key
    }

    /// Empty batch bound to this store's obfuscation key.
    pub fn new_batch(&self) -> WriteBatch {
        WriteBatch::new(self.obfuscate_key.clone())
    }

    /// Typed read. `None` if the key is absent or its value does not
    /// decode as `V`.
    pub fn read<K, V>(&self, key: &K) -> Option<V>
    where
        K: Encode + ?Sized,
        V: Decode,
    {
        self.read_encoded(&key.encode())
    }

    /// De-obfuscated value bytes without decoding.
    pub fn read_raw_bytes(&self, key: &[u8]) -> Option<Vec<u8>> {
        let mut value = match self.engine.get(key) {
            Ok(value) => value?,
            Err(err) => fatal_engine_error("read", &err),
        };
        self.obfuscate_key.xor_in_place(&mut value);
        Some(value)
    }

    /// True if `key` holds user data. The obfuscation key record is not
    /// user data.
    pub fn exists<K: Encode + ?Sized>(&self, key: &K) -> bool {
        self.exists_encoded(&key.encode())
    }

    pub fn write<K, V>(&self, key: &K, value: &V, sync: bool) -> DbResult<()>
    where
        K: Encode + ?Sized,
        V: Encode + ?Sized,
    {
        let mut batch = self.new_batch();
        batch.write(key, value);
        self.write_batch(&batch, sync)
    }

    pub fn erase<K: Encode + ?Sized>(&self, key: &K, sync: bool) -> DbResult<()> {
        let mut batch = self.new_batch();
        batch.erase(key);
        self.write_batch(&batch, sync)
    }

    /// Apply every operation of `batch` atomically, in staging order.
    /// With `sync` the write reaches persistent storage before returning.
    pub fn write_batch(&self, batch: &WriteBatch, sync: bool) -> DbResult<()> {
        if batch.obfuscate_key() != &self.obfuscate_key {
            return Err(DbError::InvalidParams(format!(
                "batch was created for another store ({})",
                self.name
            )));
        }
        if batch.is_empty() {
            return Ok(());
        }
        self.engine.write_batch(batch.ops(), sync).map_err(|err| {
            tracing::error!(store = %self.name, %err, ops = batch.len(), "batch write failed");
            DbError::from(err)
        })
    }

    /// Approximate bytes occupied by keys in `[begin, end)`.
    pub fn estimate_size<K: Encode + ?Sized>(&self, begin: &K, end: &K) -> u64 {
        self.engine.approximate_size(&begin.encode(), &end.encode())
    }

    /// True if the store holds no user data. The obfuscation key record
    /// does not count.
    pub fn is_empty(&self) -> bool {
        let mut it = self.new_iterator();
        it.seek_to_first();
        !it.valid()
    }

    /// Estimated RAM held by the engine's table.
    pub fn dynamic_memory_usage(&self) -> usize {
        self.engine.memory_usage()
    }

    /// Unpositioned iterator over the store.
    pub fn new_iterator(&self) -> StoreIterator<'_> {
        StoreIterator::new(self)
    }

    /// Rewrite the log as a single snapshot now.
    pub fn compact(&self) -> DbResult<()> {
        self.engine.compact()?;
        Ok(())
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.engine
    }

    pub(crate) fn reserved_key(&self) -> &[u8] {
        &self.reserved_key
    }

    fn exists_encoded(&self, key: &[u8]) -> bool {
        key != self.reserved_key.as_slice() && self.engine.contains_key(key)
    }

    fn read_encoded<V: Decode>(&self, key: &[u8]) -> Option<V> {
        let bytes = self.read_raw_bytes(key)?;
        V::decode(&bytes).ok()
    }
}

impl KvRead for Store {
    type Iter<'a> = StoreIterator<'a>;

    fn read_raw<V: Value>(&self, key: &[u8]) -> Option<V> {
        self.read_encoded(key)
    }

    fn exists_raw(&self, key: &[u8]) -> bool {
        self.exists_encoded(key)
    }

    fn raw_iter(&self) -> StoreIterator<'_> {
        self.new_iterator()
    }
}

impl KvStore for Store {
    /// Stages `changes` into one batch and applies it with a single engine
    /// write.
    fn commit_changes(&self, changes: &mut PendingChanges) -> DbResult<()> {
        let mut batch = self.new_batch();
        changes.deliver_to(&mut batch)?;
        self.write_batch(&batch, false)?;
        *changes = PendingChanges::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_at(temp: &TempDir, obfuscate: bool) -> Store {
        Store::open(DbParams::new(temp.path().join("db")).with_obfuscate(obfuscate)).unwrap()
    }

    #[test]
    fn test_typed_write_read_erase() {
        let store = Store::open(DbParams::in_memory()).unwrap();
        store.write(&(b'c', 1u32), &String::from("coin"), false).unwrap();

        assert_eq!(store.read::<_, String>(&(b'c', 1u32)), Some("coin".to_string()));
        assert!(store.exists(&(b'c', 1u32)));
        assert_eq!(store.read::<_, u64>(&(b'c', 2u32)), None);

        store.erase(&(b'c', 1u32), false).unwrap();
        assert!(!store.exists(&(b'c', 1u32)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_undecodable_value_reads_as_absent() {
        let store = Store::open(DbParams::in_memory()).unwrap();
        store.write(&1u8, &7u8, false).unwrap();
        assert_eq!(store.read::<_, u64>(&1u8), None);
        assert_eq!(store.read::<_, u8>(&1u8), Some(7));
    }

    #[test]
    fn test_new_obfuscated_store_hides_values() {
        let temp = TempDir::new().unwrap();
        let store = open_at(&temp, true);
        assert!(!store.obfuscate_key().is_zero());
        assert!(store.is_empty());

        store.write(&1u32, &[0u8; 16], true).unwrap();
        let on_engine = store.engine().get(&1u32.encode()).unwrap().unwrap();
        assert_ne!(on_engine, vec![0u8; 16]);
        assert_eq!(store.read::<_, [u8; 16]>(&1u32), Some([0u8; 16]));
    }

    #[test]
    fn test_obfuscation_key_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let key = {
            let store = open_at(&temp, true);
            store.write(&"k", &42u64, true).unwrap();
            store.obfuscate_key().clone()
        };

        let store = open_at(&temp, false);
        assert_eq!(store.obfuscate_key(), &key);
        assert_eq!(store.read::<_, u64>(&"k"), Some(42));
    }

    #[test]
    fn test_existing_plain_store_keeps_zero_key() {
        let temp = TempDir::new().unwrap();
        {
            let store = open_at(&temp, false);
            store.write(&1u8, &1u8, true).unwrap();
        }
        let store = open_at(&temp, true);
        assert!(store.obfuscate_key().is_zero());
        assert_eq!(store.read::<_, u8>(&1u8), Some(1));
    }

    #[test]
    fn test_obfuscation_record_is_not_user_data() {
        let temp = TempDir::new().unwrap();
        let store = open_at(&temp, true);
        let reserved = ObfuscateKey::reserved_key();
        assert!(store.engine().contains_key(&reserved));

        assert!(!store.exists("\0obfuscate_key"));
        assert!(!store.exists_raw(&reserved));
        store.write(&"obfuscate_key", &1u8, false).unwrap();
        assert!(store.exists("obfuscate_key"));
    }

    #[test]
    fn test_batch_from_other_store_rejected() {
        let temp = TempDir::new().unwrap();
        let a = Store::open(DbParams::new(temp.path().join("a")).with_obfuscate(true)).unwrap();
        let b = Store::open(DbParams::new(temp.path().join("b")).with_obfuscate(true)).unwrap();

        let mut batch = a.new_batch();
        batch.write(&1u8, &1u8);
        assert!(matches!(b.write_batch(&batch, false), Err(DbError::InvalidParams(_))));
        a.write_batch(&batch, false).unwrap();
    }

    #[test]
    fn test_estimate_size() {
        let store = Store::open(DbParams::in_memory()).unwrap();
        for i in 0..10u32 {
            store.write(&i, &vec![0u8; 100], false).unwrap();
        }
        assert!(store.estimate_size(&0u32, &10u32) >= 1000);
        assert_eq!(store.estimate_size(&5u32, &5u32), 0);
        assert_eq!(store.estimate_size(&9u32, &1u32), 0);
    }

    #[test]
    fn test_memory_store_has_no_path() {
        let store = Store::open(DbParams::in_memory()).unwrap();
        assert!(store.storage_path().is_none());
        assert_eq!(store.name(), "memory");

        let temp = TempDir::new().unwrap();
        let disk = open_at(&temp, false);
        assert_eq!(disk.storage_path(), Some(temp.path().join("db").as_path()));
        assert_eq!(disk.name(), "db");
    }

    #[test]
    fn test_empty_path_rejected() {
        assert!(matches!(Store::open(DbParams::new("")), Err(DbError::InvalidParams(_))));
    }

    #[test]
    fn test_destroy_removes_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("db");
        {
            let store = Store::open(DbParams::new(&path)).unwrap();
            store.write(&1u8, &1u8, true).unwrap();
        }
        Store::destroy(&path).unwrap();
        let store = Store::open(DbParams::new(&path)).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_wipe_data_on_open() {
        let temp = TempDir::new().unwrap();
        {
            let store = open_at(&temp, false);
            store.write(&1u8, &1u8, true).unwrap();
        }
        let store = Store::open(DbParams::new(temp.path().join("db")).with_wipe_data(true)).unwrap();
        assert!(store.is_empty());
        assert!(store.dynamic_memory_usage() == 0);
    }
}
