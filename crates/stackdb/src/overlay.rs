//! Transaction overlays
//!
//! An `Overlay` buffers typed writes and deletes in memory on top of a
//! parent layer (a `Store` or another `Overlay`). Reads see the overlay
//! first and fall through to the parent. Nothing reaches the parent until
//! `commit`, which delivers every delete and then every write to the
//! target. The overlay is emptied only once the target has accepted all of
//! them.
//!
//! # Thread Safety
//!
//! All public methods take `&self`; the pending state sits behind a
//! `parking_lot::RwLock`. The parent is only borrowed, so it must outlive
//! the overlay.

use std::any;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::codec::Encode;
use crate::error::DbResult;
use crate::kv::{CommitTarget, KvRead, KvStore};
use crate::merge::OverlayIterator;
use crate::value::{PendingChanges, PendingValue, Value};

#[derive(Default)]
struct OverlayState {
    pending: PendingChanges,
    memory_usage: i64,
}

pub struct Overlay<'p, P: KvRead> {
    parent: &'p P,
    state: RwLock<OverlayState>,
    negative_usage_reported: AtomicBool,
}

fn type_mismatch(key: &[u8], stored: &'static str, requested: &'static str) -> ! {
    tracing::error!(key = ?key, stored, requested, "overlay value read with the wrong type");
    panic!("overlay value type mismatch: stored {}, requested {}", stored, requested);
}

impl<'p, P: KvRead> Overlay<'p, P> {
    pub fn new(parent: &'p P) -> Self {
        Overlay {
            parent,
            state: RwLock::new(OverlayState::default()),
            negative_usage_reported: AtomicBool::new(false),
        }
    }

    pub fn parent(&self) -> &'p P {
        self.parent
    }

    /// Typed read through the overlay.
    ///
    /// # Panics
    ///
    /// If `key` has a pending write of a type other than `V`.
    pub fn read<K: Encode + ?Sized, V: Value>(&self, key: &K) -> Option<V> {
        self.read_raw(&key.encode())
    }

    pub fn read_raw<V: Value>(&self, key: &[u8]) -> Option<V> {
        {
            let state = self.state.read();
            if state.pending.deletes.contains(key) {
                return None;
            }
            if let Some(pending) = state.pending.writes.get(key) {
                return match pending.downcast_ref::<V>() {
                    Some(value) => Some(value.clone()),
                    None => type_mismatch(key, pending.type_name(), any::type_name::<V>()),
                };
            }
        }
        self.parent.read_raw(key)
    }

    pub fn exists<K: Encode + ?Sized>(&self, key: &K) -> bool {
        self.exists_raw(&key.encode())
    }

    pub fn exists_raw(&self, key: &[u8]) -> bool {
        {
            let state = self.state.read();
            if state.pending.deletes.contains(key) {
                return false;
            }
            if state.pending.writes.contains_key(key) {
                return true;
            }
        }
        self.parent.exists_raw(key)
    }

    /// Stage `key -> value`, replacing any pending write or delete of `key`.
    pub fn write<K: Encode + ?Sized, V: Value>(&self, key: &K, value: V) {
        self.insert_pending(key.encode(), PendingValue::new(value));
    }

    pub fn write_raw<V: Value>(&self, key: &[u8], value: V) {
        self.insert_pending(key.to_vec(), PendingValue::new(value));
    }

    /// Stage a delete of `key`, replacing any pending write of it.
    pub fn erase<K: Encode + ?Sized>(&self, key: &K) {
        self.erase_raw(&key.encode());
    }

    pub fn erase_raw(&self, key: &[u8]) {
        let mut state = self.state.write();
        if let Some(old) = state.pending.writes.remove(key) {
            state.memory_usage -= (key.len() + old.size()) as i64;
        }
        if state.pending.deletes.insert(key.to_vec()) {
            state.memory_usage += key.len() as i64;
        }
    }

    /// Discard everything pending.
    pub fn clear(&self) {
        *self.state.write() = OverlayState::default();
    }

    /// True when nothing is pending.
    pub fn is_clean(&self) -> bool {
        self.state.read().pending.is_empty()
    }

    /// Approximate bytes held by pending keys and encoded values.
    /// A negative internal count is reported once and read as 0.
    pub fn memory_usage(&self) -> usize {
        let usage = self.state.read().memory_usage;
        if usage < 0 {
            if !self.negative_usage_reported.swap(true, Ordering::Relaxed) {
                tracing::warn!(usage, "overlay memory usage went negative, reporting 0");
            }
            return 0;
        }
        usage as usize
    }

    /// Deliver all deletes, then all writes, to `target` and clear the
    /// overlay.
    ///
    /// If the target fails the overlay keeps everything it held; what the
    /// target already accepted is up to the caller to discard.
    pub fn commit_into<T: CommitTarget + ?Sized>(&self, target: &mut T) -> DbResult<()> {
        let mut state = self.state.write();
        tracing::trace!(
            writes = state.pending.writes.len(),
            deletes = state.pending.deletes.len(),
            "committing overlay into target"
        );
        state.pending.deliver_to(target)?;
        *state = OverlayState::default();
        Ok(())
    }

    /// Merged iterator over the overlay and its parent.
    pub fn iter(&self) -> OverlayIterator<'_, 'p, P> {
        OverlayIterator::new(self)
    }

    fn insert_pending(&self, key: Vec<u8>, value: PendingValue) {
        let mut state = self.state.write();
        let key_len = key.len() as i64;
        if state.pending.deletes.remove(&key) {
            state.memory_usage -= key_len;
        }
        let added = key_len + value.size() as i64;
        if let Some(old) = state.pending.writes.insert(key, value) {
            state.memory_usage -= key_len + old.size() as i64;
        }
        state.memory_usage += added;
    }

    /// True if `key` has a pending write or delete.
    pub(crate) fn shadows(&self, key: &[u8]) -> bool {
        let state = self.state.read();
        state.pending.writes.contains_key(key) || state.pending.deletes.contains(key)
    }

    /// First pending write key within `from..`.
    pub(crate) fn first_write_from(&self, from: Bound<&[u8]>) -> Option<Vec<u8>> {
        let state = self.state.read();
        state
            .pending
            .writes
            .range::<[u8], _>((from, Bound::Unbounded))
            .next()
            .map(|(key, _)| key.clone())
    }

    #[cfg(test)]
    fn force_memory_usage(&self, usage: i64) {
        self.state.write().memory_usage = usage;
    }
}

impl<'p, P: KvStore> Overlay<'p, P> {
    /// Commit into the parent layer as one unit. On error neither the
    /// parent nor the overlay has changed.
    pub fn commit(&self) -> DbResult<()> {
        let mut state = self.state.write();
        tracing::trace!(ops = state.pending.len(), "committing overlay into parent");
        self.parent.commit_changes(&mut state.pending)?;
        *state = OverlayState::default();
        Ok(())
    }
}

impl<'p, P: KvRead + 'p> KvRead for Overlay<'p, P> {
    type Iter<'a> = OverlayIterator<'a, 'p, P> where Self: 'a;

    fn read_raw<V: Value>(&self, key: &[u8]) -> Option<V> {
        Overlay::read_raw(self, key)
    }

    fn exists_raw(&self, key: &[u8]) -> bool {
        Overlay::exists_raw(self, key)
    }

    fn raw_iter(&self) -> OverlayIterator<'_, 'p, P> {
        self.iter()
    }
}

impl<'p, P: KvRead + 'p> KvStore for Overlay<'p, P> {
    /// Values are moved into this overlay, original types intact.
    fn commit_changes(&self, changes: &mut PendingChanges) -> DbResult<()> {
        let PendingChanges { writes, deletes } = std::mem::take(changes);
        for key in &deletes {
            self.erase_raw(key);
        }
        for (key, value) in writes {
            self.insert_pending(key, value);
        }
        Ok(())
    }
}
