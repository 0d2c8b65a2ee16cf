//! Forward iterator over a `Store`
//!
//! The iterator remembers the entry it is on and re-seeks the engine past
//! that key on every step, so it never holds an engine lock between calls.
//! Writes made while iterating may or may not be observed. The
//! obfuscation key record is never yielded.

use std::ops::Bound;

use crate::codec::{Decode, Encode};
use crate::kv::KvIterator;
use crate::store::Store;

pub struct StoreIterator<'a> {
    store: &'a Store,
    current: Option<(Vec<u8>, Vec<u8>)>,
}

impl<'a> StoreIterator<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        StoreIterator { store, current: None }
    }

    fn position(&mut self, from: Bound<&[u8]>) {
        let engine = self.store.engine();
        let reserved = self.store.reserved_key();
        let mut entry = engine.seek_entry(from);
        if entry.as_ref().map_or(false, |(key, _)| key.as_slice() == reserved) {
            entry = engine.seek_entry(Bound::Excluded(reserved));
        }
        self.current = entry;
    }

    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    pub fn seek_to_first(&mut self) {
        self.position(Bound::Unbounded);
    }

    /// Position at the first key `>= key`.
    pub fn seek<K: Encode + ?Sized>(&mut self, key: &K) {
        self.seek_raw(&key.encode());
    }

    pub fn seek_raw(&mut self, key: &[u8]) {
        self.position(Bound::Included(key));
    }

    /// Advance to the next key. Does nothing on an invalid iterator.
    pub fn next(&mut self) {
        if let Some((key, _)) = self.current.take() {
            self.position(Bound::Excluded(key.as_slice()));
        }
    }

    pub fn raw_key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(key, _)| key.as_slice())
    }

    /// Current key decoded as `K`.
    pub fn key<K: Decode>(&self) -> Option<K> {
        K::decode(self.raw_key()?).ok()
    }

    /// De-obfuscated bytes of the current value.
    pub fn raw_value(&self) -> Option<Vec<u8>> {
        let (_, value) = self.current.as_ref()?;
        let mut value = value.clone();
        self.store.obfuscate_key().xor_in_place(&mut value);
        Some(value)
    }

    /// Current value decoded as `V`.
    pub fn value<V: Decode>(&self) -> Option<V> {
        V::decode(&self.raw_value()?).ok()
    }

    /// Length of the encoded current key, 0 when invalid.
    pub fn key_size(&self) -> usize {
        self.raw_key().map_or(0, <[u8]>::len)
    }

    /// Length of the stored current value, 0 when invalid.
    pub fn value_size(&self) -> usize {
        self.current.as_ref().map_or(0, |(_, value)| value.len())
    }
}

impl KvIterator for StoreIterator<'_> {
    fn valid(&self) -> bool {
        StoreIterator::valid(self)
    }

    fn seek_to_first(&mut self) {
        StoreIterator::seek_to_first(self)
    }

    fn seek_raw(&mut self, key: &[u8]) {
        StoreIterator::seek_raw(self, key)
    }

    fn next(&mut self) {
        StoreIterator::next(self)
    }

    fn raw_key(&self) -> Option<&[u8]> {
        StoreIterator::raw_key(self)
    }
}
