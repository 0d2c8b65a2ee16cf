//! Write batches
//!
//! A batch stages puts and deletes and is applied to a `Store` as one
//! atomic engine write. Values are encoded and obfuscated at staging time
//! with the key of the store that created the batch.

use stackdb_core::BatchOp;

use crate::codec::Encode;
use crate::error::DbResult;
use crate::kv::CommitTarget;
use crate::obfuscation::ObfuscateKey;
use crate::value::PendingValue;

/// Ordered list of staged mutations for one store.
#[derive(Debug, Clone)]
pub struct WriteBatch {
    obfuscate_key: ObfuscateKey,
    ops: Vec<BatchOp>,
    size_estimate: usize,
}

/// Bytes one length field adds to the estimate: lengths above 127 take an
/// extra varint byte.
fn len_overhead(len: usize) -> usize {
    usize::from(len > 127)
}

impl WriteBatch {
    pub(crate) fn new(obfuscate_key: ObfuscateKey) -> Self {
        WriteBatch { obfuscate_key, ops: Vec::new(), size_estimate: 0 }
    }

    /// Stage `key -> value`.
    pub fn write<K, V>(&mut self, key: &K, value: &V)
    where
        K: Encode + ?Sized,
        V: Encode + ?Sized,
    {
        self.write_raw(&key.encode(), value.encode());
    }

    /// Stage an already encoded key and value. The value is obfuscated here.
    pub fn write_raw(&mut self, key: &[u8], mut value: Vec<u8>) {
        self.obfuscate_key.xor_in_place(&mut value);
        self.size_estimate += 3 + len_overhead(key.len()) + key.len() + len_overhead(value.len()) + value.len();
        self.ops.push(BatchOp::Put { key: key.to_vec(), value });
    }

    /// Stage a delete of `key`.
    pub fn erase<K: Encode + ?Sized>(&mut self, key: &K) {
        self.erase_raw(&key.encode());
    }

    pub fn erase_raw(&mut self, key: &[u8]) {
        self.size_estimate += 2 + len_overhead(key.len()) + key.len();
        self.ops.push(BatchOp::Delete { key: key.to_vec() });
    }

    /// Drop all staged operations and reset the estimate.
    pub fn clear(&mut self) {
        self.ops.clear();
        self.size_estimate = 0;
    }

    /// Rough serialized size of the staged operations.
    pub fn size_estimate(&self) -> usize {
        self.size_estimate
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub(crate) fn obfuscate_key(&self) -> &ObfuscateKey {
        &self.obfuscate_key
    }
}

impl CommitTarget for WriteBatch {
    fn commit_erase(&mut self, key: &[u8]) -> DbResult<()> {
        self.erase_raw(key);
        Ok(())
    }

    fn commit_write(&mut self, key: &[u8], value: &PendingValue) -> DbResult<()> {
        self.write_raw(key, value.encode());
        Ok(())
    }
}
