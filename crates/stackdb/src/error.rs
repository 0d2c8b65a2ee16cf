//! Error types for the typed store layer

use std::error::Error;
use std::fmt;

use stackdb_core::EngineError;

use crate::codec::DecodeError;

#[derive(Debug)]
pub enum DbError {
    /// The storage engine failed to open, write or compact
    Engine(EngineError),
    /// Stored bytes could not be decoded into the requested type
    Decode(DecodeError),
    /// Open parameters rejected before the engine was touched
    InvalidParams(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::Engine(err) => write!(f, "Storage engine error: {}", err),
            DbError::Decode(err) => write!(f, "Decode error: {}", err),
            DbError::InvalidParams(msg) => write!(f, "Invalid database parameters: {}", msg),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DbError::Engine(err) => Some(err),
            DbError::Decode(err) => Some(err),
            DbError::InvalidParams(_) => None,
        }
    }
}

impl From<EngineError> for DbError {
    fn from(err: EngineError) -> Self {
        DbError::Engine(err)
    }
}

impl From<DecodeError> for DbError {
    fn from(err: DecodeError) -> Self {
        DbError::Decode(err)
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Reads have no error channel: an engine failure on the read path means
/// the store can no longer be trusted, so it is logged and the process
/// unwinds.
pub(crate) fn fatal_engine_error(context: &str, err: &EngineError) -> ! {
    tracing::error!(%err, context, "fatal storage engine error");
    panic!("fatal storage engine error ({}): {}", context, err);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_source() {
        let err: DbError = DecodeError::InvalidValue("bool must be 0 or 1").into();
        assert!(err.to_string().contains("bool must be 0 or 1"));
        assert!(err.source().is_some());

        let err: DbError = EngineError::InvalidConfig("cache_bytes must be > 0".into()).into();
        assert!(err.to_string().starts_with("Storage engine error"));

        let err = DbError::InvalidParams("empty path".into());
        assert!(err.source().is_none());
    }

    #[test]
    #[should_panic(expected = "fatal storage engine error")]
    fn test_fatal_engine_error_panics() {
        fatal_engine_error("read", &EngineError::InvalidConfig("boom".into()));
    }
}
