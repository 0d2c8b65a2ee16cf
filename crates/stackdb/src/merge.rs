//! Merged iteration over an overlay and its parent
//!
//! Two legs advance in step: the overlay's pending writes and an iterator
//! on the parent. The parent leg is filtered so that it never rests on a
//! key the overlay writes or deletes; the filter runs after every parent
//! move, including the initial seek. The visible key is the smaller of
//! the two legs. Both legs re-read the overlay on each step, so pending
//! changes made during iteration may or may not be seen.

use std::ops::Bound;

use crate::codec::{Decode, Encode};
use crate::kv::{KvIterator, KvRead};
use crate::overlay::Overlay;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
    Writes,
    Parent,
}

pub struct OverlayIterator<'a, 'p, P: KvRead + 'p> {
    overlay: &'a Overlay<'p, P>,
    parent: P::Iter<'p>,
    write_key: Option<Vec<u8>>,
    current: Leg,
}

impl<'a, 'p, P: KvRead + 'p> OverlayIterator<'a, 'p, P> {
    pub(crate) fn new(overlay: &'a Overlay<'p, P>) -> Self {
        OverlayIterator {
            overlay,
            parent: overlay.parent().raw_iter(),
            write_key: None,
            current: Leg::Writes,
        }
    }

    pub fn valid(&self) -> bool {
        self.write_key.is_some() || self.parent.valid()
    }

    pub fn seek_to_first(&mut self) {
        self.write_key = self.overlay.first_write_from(Bound::Unbounded);
        self.parent.seek_to_first();
        self.settle();
    }

    /// Position at the first visible key `>= key`.
    pub fn seek<K: Encode + ?Sized>(&mut self, key: &K) {
        self.seek_raw(&key.encode());
    }

    pub fn seek_raw(&mut self, key: &[u8]) {
        self.write_key = self.overlay.first_write_from(Bound::Included(key));
        self.parent.seek_raw(key);
        self.settle();
    }

    /// Advance the leg that supplied the current key. No-op when invalid.
    pub fn next(&mut self) {
        if !self.valid() {
            return;
        }
        match self.current {
            Leg::Parent => self.parent.next(),
            Leg::Writes => {
                if let Some(key) = self.write_key.take() {
                    self.write_key = self.overlay.first_write_from(Bound::Excluded(key.as_slice()));
                }
            }
        }
        self.settle();
    }

    pub fn raw_key(&self) -> Option<&[u8]> {
        match self.current {
            Leg::Writes => self.write_key.as_deref(),
            Leg::Parent => self.parent.raw_key(),
        }
    }

    pub fn key<K: Decode>(&self) -> Option<K> {
        K::decode(self.raw_key()?).ok()
    }

    /// Value of the current key as seen through the overlay.
    ///
    /// # Panics
    ///
    /// If the key has a pending write of a type other than `V`.
    pub fn value<V: Value>(&self) -> Option<V> {
        self.overlay.read_raw(self.raw_key()?)
    }

    /// Length of the encoded current key, 0 when invalid.
    pub fn key_size(&self) -> usize {
        self.raw_key().map_or(0, <[u8]>::len)
    }

    /// Skip shadowed parent keys, then pick the leg with the smaller key.
    /// On equal keys the overlay's write wins.
    fn settle(&mut self) {
        while let Some(key) = self.parent.raw_key() {
            if !self.overlay.shadows(key) {
                break;
            }
            self.parent.next();
        }

        self.current = match (self.write_key.as_deref(), self.parent.raw_key()) {
            (Some(write), Some(parent)) if parent < write => Leg::Parent,
            (None, Some(_)) => Leg::Parent,
            _ => Leg::Writes,
        };
    }
}

impl<'p, P: KvRead + 'p> KvIterator for OverlayIterator<'_, 'p, P> {
    fn valid(&self) -> bool {
        OverlayIterator::valid(self)
    }

    fn seek_to_first(&mut self) {
        OverlayIterator::seek_to_first(self)
    }

    fn seek_raw(&mut self, key: &[u8]) {
        OverlayIterator::seek_raw(self, key)
    }

    fn next(&mut self) {
        OverlayIterator::next(self)
    }

    fn raw_key(&self) -> Option<&[u8]> {
        OverlayIterator::raw_key(self)
    }
}
