//! Error types for engine operations
//!
//! Every engine failure is an `EngineError`. Variants carry enough context
//! (file, offset, sizes) to diagnose log corruption after the fact.

use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub enum EngineError {
    /// Filesystem call failed; `path` is the file or directory involved
    Io {
        path: Option<PathBuf>,
        kind: std::io::ErrorKind,
        message: String,
    },

    /// A log record is structurally invalid at `offset`
    WalCorrupted { path: PathBuf, offset: u64, reason: String },

    /// Record payload does not match its CRC32C
    ChecksumMismatch { path: PathBuf, expected: u32, actual: u32, offset: u64 },

    /// Record header promises more bytes than the file holds
    TornWrite { path: PathBuf, expected_size: u32, available_bytes: u64, offset: u64 },

    /// Key or value above the configured limit (`component` says which)
    OversizedEntry { entry_size: u64, max_size: u64, component: &'static str },

    /// Expected record magic, found `found_bytes`
    NoMagicFound { path: PathBuf, offset: u64, found_bytes: [u8; 4] },

    /// Rejected by `Config::validate`
    InvalidConfig(String),
}

impl EngineError {
    /// Build a mapper from `std::io::Error` that records the failing path.
    pub(crate) fn io_at<'a>(path: &'a Path, context: &'a str) -> impl FnOnce(std::io::Error) -> EngineError + 'a {
        move |e| EngineError::Io {
            path: Some(path.to_path_buf()),
            kind: e.kind(),
            message: format!("{}: {}", context, e),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Io { path, kind, message } => {
                if let Some(path) = path {
                    write!(f, "I/O error in {}: {} ({})", path.display(), message, kind)
                } else {
                    write!(f, "I/O error: {} ({})", message, kind)
                }
            }

            EngineError::WalCorrupted { path, offset, reason } => {
                write!(f, "log corrupted in {} at offset {}: {}", path.display(), offset, reason)
            }

            EngineError::ChecksumMismatch { path, expected, actual, offset } => {
                write!(f, "Checksum mismatch in {} at offset {}: expected 0x{:08x}, got 0x{:08x}",
                       path.display(), offset, expected, actual)
            }

            EngineError::TornWrite { path, expected_size, available_bytes, offset } => {
                write!(f, "Torn write in {} at offset {}: expected {} bytes, only {} available",
                       path.display(), offset, expected_size, available_bytes)
            }

            EngineError::OversizedEntry { entry_size, max_size, component } => {
                write!(f, "Entry {} too large: {} bytes exceeds limit of {} bytes",
                       component, entry_size, max_size)
            }

            EngineError::NoMagicFound { path, offset, found_bytes } => {
                write!(f, "Magic bytes not found in {} at offset {}: found {:02x}{:02x}{:02x}{:02x}",
                       path.display(), offset, found_bytes[0], found_bytes[1], found_bytes[2], found_bytes[3])
            }

            EngineError::InvalidConfig(reason) => write!(f, "Invalid configuration: {}", reason),
        }
    }
}

impl Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io {
            path: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
