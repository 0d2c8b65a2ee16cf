//! Value obfuscation
//!
//! Stored values are XORed with a short per-store key so that on-disk data
//! does not contain recognisable byte patterns. This is not encryption.
//! Keys are never obfuscated, so key order is unaffected.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;

use crate::codec::{Decode, DecodeError, Encode};

/// Length of a freshly generated obfuscation key
pub const OBFUSCATE_KEY_NUM_BYTES: usize = 8;

/// Record name of the stored obfuscation key. Written with the string
/// encoding, so the on-disk key is `0x0e 0x00 "obfuscate_key"`.
pub const OBFUSCATE_KEY_KEY: &str = "\0obfuscate_key";

/// XOR keystream applied to every stored value.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct ObfuscateKey(Vec<u8>);

impl ObfuscateKey {
    /// All-zero key: obfuscation is the identity. Used for stores created
    /// without obfuscation and while the stored key itself is being read.
    pub fn zero() -> Self {
        ObfuscateKey(vec![0; OBFUSCATE_KEY_NUM_BYTES])
    }

    /// Fresh random key from the OS generator. Never all zero.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; OBFUSCATE_KEY_NUM_BYTES];
        loop {
            OsRng.fill_bytes(&mut bytes);
            if bytes.iter().any(|&b| b != 0) {
                return ObfuscateKey(bytes);
            }
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        ObfuscateKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// XOR `data` with the key, repeated cyclically from offset 0.
    /// Applying it twice restores the input.
    pub fn xor_in_place(&self, data: &mut [u8]) {
        if self.is_zero() {
            return;
        }
        for (byte, k) in data.iter_mut().zip(self.0.iter().cycle()) {
            *byte ^= k;
        }
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Encoded store key under which the obfuscation key lives.
    pub fn reserved_key() -> Vec<u8> {
        OBFUSCATE_KEY_KEY.encode()
    }
}

impl fmt::Debug for ObfuscateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObfuscateKey({})", self.to_hex())
    }
}

impl Encode for ObfuscateKey {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.0.encode_to(out)
    }

    fn encoded_size(&self) -> usize {
        self.0.encoded_size()
    }
}

impl Decode for ObfuscateKey {
    fn decode_from(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Vec::<u8>::decode_from(input).map(ObfuscateKey)
    }
}
