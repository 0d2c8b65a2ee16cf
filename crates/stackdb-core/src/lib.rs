//! stackdb core — ordered, log-structured key-value engine
//!
//! An embedded single-writer key-value engine that keeps its table in RAM,
//! ordered by key, and makes it durable with a write-ahead log.
//!
//! # Architecture
//!
//! - **Read path**: ordered `BTreeMap` under a `RwLock`
//! - **Write path**: every batch is one CRC32C-checked log record, appended
//!   before the table changes, so batches are atomic across crashes
//! - **Compaction**: the log is periodically rewritten as one snapshot record
//!
//! Values are opaque bytes here. Typed access, obfuscation and transaction
//! overlays live in the `stackdb` crate.

pub mod compaction;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod platform_durability;
pub mod wal;

pub use compaction::CompactionResult;
pub use config::Config;
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use format::{BatchOp, Operation};
pub use wal::{WalReader, WalWriter};
