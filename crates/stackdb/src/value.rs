//! Typed values held by transaction overlays
//!
//! An overlay keeps pending writes as typed values, not bytes, so reads
//! inside the transaction skip the decode step. Each pending write is
//! boxed behind a small object-safe trait; reading it back with a different
//! type than it was written with is a programming error.

use std::any::{self, Any};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::codec::{Decode, Encode};
use crate::error::DbResult;
use crate::kv::CommitTarget;

/// Anything that can be stored in a transaction overlay.
pub trait Value: Encode + Decode + Clone + Send + Sync + 'static {}

impl<T> Value for T where T: Encode + Decode + Clone + Send + Sync + 'static {}

trait ErasedValue: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn encode_erased(&self) -> Vec<u8>;
    fn type_name(&self) -> &'static str;
}

impl<V: Value> ErasedValue for V {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn encode_erased(&self) -> Vec<u8> {
        self.encode()
    }

    fn type_name(&self) -> &'static str {
        any::type_name::<V>()
    }
}

/// One pending write: the typed value plus its encoded size.
///
/// Not `Clone`. A commit moves each pending value into its target exactly
/// once, and a nested overlay receives the box itself, original type intact.
pub struct PendingValue {
    value: Box<dyn ErasedValue>,
    size: usize,
}

impl PendingValue {
    pub fn new<V: Value>(value: V) -> Self {
        let size = value.encoded_size();
        PendingValue { value: Box::new(value), size }
    }

    /// Encoded size of the value in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The value, if it was written as a `V`.
    pub fn downcast_ref<V: Value>(&self) -> Option<&V> {
        (*self.value).as_any().downcast_ref::<V>()
    }

    /// Rust type the value was written with.
    pub fn type_name(&self) -> &'static str {
        (*self.value).type_name()
    }

    pub fn encode(&self) -> Vec<u8> {
        (*self.value).encode_erased()
    }
}

impl fmt::Debug for PendingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingValue")
            .field("type", &self.type_name())
            .field("size", &self.size)
            .finish()
    }
}

/// Writes and deletes staged by an overlay, keyed by encoded key. A key is
/// never in both sets.
#[derive(Debug, Default)]
pub struct PendingChanges {
    pub(crate) writes: BTreeMap<Vec<u8>, PendingValue>,
    pub(crate) deletes: BTreeSet<Vec<u8>>,
}

impl PendingChanges {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.deletes.is_empty()
    }

    /// Number of staged operations.
    pub fn len(&self) -> usize {
        self.writes.len() + self.deletes.len()
    }

    /// Deliver every delete, then every write, to `target`. The changes
    /// themselves are left in place.
    pub fn deliver_to<T: CommitTarget + ?Sized>(&self, target: &mut T) -> DbResult<()> {
        for key in &self.deletes {
            target.commit_erase(key)?;
        }
        for (key, value) in &self.writes {
            target.commit_write(key, value)?;
        }
        Ok(())
    }
}
