//! Seams between stores, overlays and commit targets
//!
//! An overlay can be stacked on anything that implements `KvRead`: the
//! store itself or another overlay. `Overlay::commit` hands the whole set of
//! pending changes to a `KvStore` parent in one call, and `commit_into`
//! replays them into any `CommitTarget`, such as a write batch.

use crate::error::DbResult;
use crate::value::{PendingChanges, PendingValue, Value};

/// Forward cursor over encoded keys.
pub trait KvIterator {
    fn valid(&self) -> bool;

    fn seek_to_first(&mut self);

    /// Position at the first key `>= key`.
    fn seek_raw(&mut self, key: &[u8]);

    /// Advance one key. No-op when invalid.
    fn next(&mut self);

    /// Current key, `None` when invalid.
    fn raw_key(&self) -> Option<&[u8]>;
}

/// Read side of a layer an overlay can sit on.
pub trait KvRead {
    type Iter<'a>: KvIterator
    where
        Self: 'a;

    /// Typed point read by encoded key. `None` if absent or undecodable.
    fn read_raw<V: Value>(&self, key: &[u8]) -> Option<V>;

    fn exists_raw(&self, key: &[u8]) -> bool;

    fn raw_iter(&self) -> Self::Iter<'_>;
}

/// Layers an overlay can commit into through a shared reference.
pub trait KvStore: KvRead {
    /// Apply every delete, then every write, of `changes` as one unit.
    ///
    /// On success `changes` is left empty. On error nothing was applied
    /// and `changes` is untouched.
    fn commit_changes(&self, changes: &mut PendingChanges) -> DbResult<()>;
}

/// Destination of `Overlay::commit_into`. Deletes are delivered before
/// writes.
pub trait CommitTarget {
    fn commit_erase(&mut self, key: &[u8]) -> DbResult<()>;

    fn commit_write(&mut self, key: &[u8], value: &PendingValue) -> DbResult<()>;
}
