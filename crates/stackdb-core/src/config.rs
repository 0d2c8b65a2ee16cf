//! Engine configuration
//!
//! Provides presets for different hardware classes plus chainable setters
//! for the per-open switches (memory-only, wipe, compact on open).

/// Engine configuration. Passed explicitly to `Engine::open`; nothing is
/// read from process-wide state.
#[derive(Debug, Clone)]
pub struct Config {
    /// Dead log bytes tolerated before automatic compaction is considered
    pub cache_bytes: usize,
    /// Keep everything in RAM; no files are created or read
    pub memory_only: bool,
    /// Remove any existing data at the path before opening
    pub wipe_data: bool,
    /// Compact the log immediately after recovery
    pub force_compact: bool,
    /// Log file rotation threshold (bytes)
    pub wal_rotation_size_bytes: u64,
    /// Compaction trigger: compact when dead log ratio exceeds this
    pub compaction_trigger_ratio: f64,
    /// Maximum key size in bytes
    pub max_key_size: usize,
    /// Maximum value size in bytes
    pub max_value_size: usize,
}

impl Config {
    /// Server-class node: large cache, rare compaction
    pub fn server() -> Self {
        Self {
            cache_bytes: 450 * 1024 * 1024,
            memory_only: false,
            wipe_data: false,
            force_compact: false,
            wal_rotation_size_bytes: 128 * 1024 * 1024,
            compaction_trigger_ratio: 0.5,
            max_key_size: 1024,
            max_value_size: 32 * 1024 * 1024,
        }
    }

    /// Desktop-class machine
    pub fn desktop() -> Self {
        Self {
            cache_bytes: 64 * 1024 * 1024,
            memory_only: false,
            wipe_data: false,
            force_compact: false,
            wal_rotation_size_bytes: 64 * 1024 * 1024,
            compaction_trigger_ratio: 0.4,
            max_key_size: 1024,
            max_value_size: 16 * 1024 * 1024,
        }
    }

    /// Minimal footprint: small cache, aggressive compaction
    pub fn minimal() -> Self {
        Self {
            cache_bytes: 8 * 1024 * 1024,
            memory_only: false,
            wipe_data: false,
            force_compact: false,
            wal_rotation_size_bytes: 8 * 1024 * 1024,
            compaction_trigger_ratio: 0.3,
            max_key_size: 512,
            max_value_size: 4 * 1024 * 1024,
        }
    }

    pub fn with_cache_bytes(mut self, cache_bytes: usize) -> Self {
        self.cache_bytes = cache_bytes;
        self
    }

    pub fn with_memory_only(mut self, memory_only: bool) -> Self {
        self.memory_only = memory_only;
        self
    }

    pub fn with_wipe_data(mut self, wipe_data: bool) -> Self {
        self.wipe_data = wipe_data;
        self
    }

    pub fn with_force_compact(mut self, force_compact: bool) -> Self {
        self.force_compact = force_compact;
        self
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_bytes == 0 {
            return Err("cache_bytes must be > 0".into());
        }
        if self.wal_rotation_size_bytes < 64 * 1024 {
            return Err("wal_rotation_size_bytes must be >= 64KB".into());
        }
        if self.compaction_trigger_ratio <= 0.0 || self.compaction_trigger_ratio >= 1.0 {
            return Err("compaction_trigger_ratio must be in (0.0, 1.0)".into());
        }
        if self.max_key_size == 0 || self.max_key_size > crate::format::MAX_KEY_SIZE {
            return Err(format!("max_key_size must be in [1, {}]", crate::format::MAX_KEY_SIZE));
        }
        if self.max_value_size == 0 || self.max_value_size > crate::format::MAX_VALUE_SIZE {
            return Err("max_value_size must be in [1, 128MB]".into());
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::desktop()
    }
}
