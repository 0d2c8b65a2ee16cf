//! Binary format of log records
//!
//! One record carries one whole batch, so replay applies a batch completely
//! or not at all:
//!
//! RecordHeader (32 bytes) + op_count(u32 LE) + op*
//!
//! where each op is kind(u8) + key_len(u16 LE) + value_len(u32 LE) + key + value.

use crate::error::{EngineError, EngineResult};

/// Magic bytes identifying a record: "SDB1" in ASCII
pub const MAGIC_ARRAY: [u8; 4] = *b"SDB1";

/// Largest key the record format can express
pub const MAX_KEY_SIZE: usize = u16::MAX as usize;

/// Largest value the engine accepts (128MB)
pub const MAX_VALUE_SIZE: usize = 128 * 1024 * 1024;

/// Header size in bytes
pub const HEADER_SIZE: usize = 32;

/// Per-op header: kind(1) + key_len(2) + value_len(4)
const OP_HEADER_SIZE: usize = 7;

/// Single mutation inside a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    /// Insert or update a key-value pair
    Put = 1,
    /// Delete a key
    Delete = 2,
}

impl Operation {
    fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Operation::Put),
            2 => Some(Operation::Delete),
            _ => None,
        }
    }
}

/// What replaying a record means for the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// Apply the ops on top of the current table
    Batch = 1,
    /// Replace the whole table with the ops (written by compaction)
    Snapshot = 2,
}

impl RecordKind {
    fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(RecordKind::Batch),
            2 => Some(RecordKind::Snapshot),
            _ => None,
        }
    }
}

/// A staged mutation as the engine consumes it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl BatchOp {
    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key } => key,
        }
    }

    pub fn value(&self) -> Option<&[u8]> {
        match self {
            BatchOp::Put { value, .. } => Some(value),
            BatchOp::Delete { .. } => None,
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            BatchOp::Put { .. } => Operation::Put,
            BatchOp::Delete { .. } => Operation::Delete,
        }
    }

    fn encoded_len(&self) -> usize {
        OP_HEADER_SIZE + self.key().len() + self.value().map_or(0, <[u8]>::len)
    }
}

/// Fixed-size header for each record
///
/// Layout:
///   [0..4]   magic:    [u8;4] - "SDB1"
///   [4..8]   length:   u32    - payload length in bytes
///   [8..12]  checksum: u32    - CRC32C of payload bytes
///   [12]     kind:     u8     - record kind
///   [13..32] reserved, zero
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub magic: [u8; 4],
    pub length: u32,
    pub checksum: u32,
    pub kind: u8,
}

impl RecordHeader {
    pub fn new(length: u32, checksum: u32, kind: RecordKind) -> Self {
        Self { magic: MAGIC_ARRAY, length, checksum, kind: kind as u8 }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        buf[12] = self.kind;
        buf
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            magic: [bytes[0], bytes[1], bytes[2], bytes[3]],
            length: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            checksum: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            kind: bytes[12],
        }
    }
}

/// A decoded record
#[derive(Debug, Clone)]
pub struct Record {
    pub kind: RecordKind,
    pub ops: Vec<BatchOp>,
}

/// Check an op against the format limits before anything is allocated.
pub fn check_op_size(op: &BatchOp, max_key: usize, max_value: usize) -> EngineResult<()> {
    if op.key().len() > max_key {
        return Err(EngineError::OversizedEntry {
            entry_size: op.key().len() as u64,
            max_size: max_key as u64,
            component: "key",
        });
    }
    if let Some(value) = op.value() {
        if value.len() > max_value {
            return Err(EngineError::OversizedEntry {
                entry_size: value.len() as u64,
                max_size: max_value as u64,
                component: "value",
            });
        }
    }
    Ok(())
}

/// Serialize a list of ops into one complete record.
pub fn serialize_record<'a, I>(kind: RecordKind, ops: I) -> EngineResult<Vec<u8>>
where
    I: IntoIterator<Item = &'a BatchOp>,
    I::IntoIter: Clone,
{
    let ops = ops.into_iter();
    let mut count = 0u32;
    let mut payload_size = 4usize;
    for op in ops.clone() {
        check_op_size(op, MAX_KEY_SIZE, MAX_VALUE_SIZE)?;
        payload_size += op.encoded_len();
        count += 1;
    }

    if payload_size > u32::MAX as usize {
        return Err(EngineError::OversizedEntry {
            entry_size: payload_size as u64,
            max_size: u32::MAX as u64,
            component: "record",
        });
    }

    let mut buffer = Vec::with_capacity(HEADER_SIZE + payload_size);
    buffer.extend_from_slice(&[0u8; HEADER_SIZE]);
    buffer.extend_from_slice(&count.to_le_bytes());
    for op in ops {
        let value = op.value().unwrap_or(&[]);
        buffer.push(op.operation() as u8);
        buffer.extend_from_slice(&(op.key().len() as u16).to_le_bytes());
        buffer.extend_from_slice(&(value.len() as u32).to_le_bytes());
        buffer.extend_from_slice(op.key());
        buffer.extend_from_slice(value);
    }

    let checksum = crc32c::crc32c(&buffer[HEADER_SIZE..]);
    let header = RecordHeader::new(payload_size as u32, checksum, kind);
    buffer[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    Ok(buffer)
}

fn corrupted(offset: usize, reason: String) -> EngineError {
    EngineError::WalCorrupted {
        path: std::path::PathBuf::from("<buffer>"),
        offset: offset as u64,
        reason,
    }
}

/// Deserialize one record from the start of `data`.
pub fn deserialize_record(data: &[u8]) -> EngineResult<Record> {
    if data.len() < HEADER_SIZE {
        return Err(corrupted(0, format!("Record too short: {} bytes, need at least {}", data.len(), HEADER_SIZE)));
    }

    let mut header_bytes = [0u8; HEADER_SIZE];
    header_bytes.copy_from_slice(&data[..HEADER_SIZE]);
    let header = RecordHeader::from_bytes(&header_bytes);

    if header.magic != MAGIC_ARRAY {
        return Err(EngineError::NoMagicFound {
            path: std::path::PathBuf::from("<buffer>"),
            offset: 0,
            found_bytes: header.magic,
        });
    }

    let payload_end = HEADER_SIZE + header.length as usize;
    if data.len() < payload_end {
        return Err(EngineError::TornWrite {
            path: std::path::PathBuf::from("<buffer>"),
            expected_size: header.length,
            available_bytes: (data.len() - HEADER_SIZE) as u64,
            offset: HEADER_SIZE as u64,
        });
    }

    let payload = &data[HEADER_SIZE..payload_end];
    let computed = crc32c::crc32c(payload);
    if computed != header.checksum {
        return Err(EngineError::ChecksumMismatch {
            path: std::path::PathBuf::from("<buffer>"),
            expected: header.checksum,
            actual: computed,
            offset: HEADER_SIZE as u64,
        });
    }

    let kind = RecordKind::from_u8(header.kind)
        .ok_or_else(|| corrupted(12, format!("Invalid record kind: {}", header.kind)))?;

    if payload.len() < 4 {
        return Err(corrupted(HEADER_SIZE, "Payload too short for op count".to_string()));
    }
    let count = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;

    let mut ops = Vec::with_capacity(count.min(payload.len() / OP_HEADER_SIZE));
    let mut pos = 4;
    for _ in 0..count {
        if payload.len() < pos + OP_HEADER_SIZE {
            return Err(corrupted(HEADER_SIZE + pos, "Payload ends inside an op header".to_string()));
        }
        let op_byte = payload[pos];
        let key_len = u16::from_le_bytes([payload[pos + 1], payload[pos + 2]]) as usize;
        let value_len = u32::from_le_bytes([
            payload[pos + 3], payload[pos + 4], payload[pos + 5], payload[pos + 6],
        ]) as usize;
        let key_start = pos + OP_HEADER_SIZE;
        let value_start = key_start + key_len;
        let op_end = value_start + value_len;
        if payload.len() < op_end {
            return Err(corrupted(HEADER_SIZE + pos, format!(
                "Payload too short: need {} bytes for key({}) + value({})", op_end, key_len, value_len,
            )));
        }

        let key = payload[key_start..value_start].to_vec();
        let op = match Operation::from_u8(op_byte) {
            Some(Operation::Put) => BatchOp::Put { key, value: payload[value_start..op_end].to_vec() },
            Some(Operation::Delete) => BatchOp::Delete { key },
            None => return Err(corrupted(HEADER_SIZE + pos, format!("Invalid operation type: {}", op_byte))),
        };
        ops.push(op);
        pos = op_end;
    }

    if pos != payload.len() {
        return Err(corrupted(HEADER_SIZE + pos, format!("{} trailing bytes after last op", payload.len() - pos)));
    }

    Ok(Record { kind, ops })
}

/// Total on-disk size of the record starting at `data`, if its header is readable.
pub fn record_len(data: &[u8]) -> Option<usize> {
    if data.len() < 8 {
        return None;
    }
    let length = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
    Some(HEADER_SIZE + length)
}
