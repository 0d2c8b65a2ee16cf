//! Value and key encoding
//!
//! Keys are compared as raw bytes, so every fixed-width integer is written
//! big-endian (signed integers with the sign bit flipped) and byte order
//! equals numeric order. Variable-length data carries a Bitcoin-style
//! compact-size length prefix.

use std::error::Error;
use std::fmt;

/// Longest length prefix accepted when decoding (32MB)
pub const MAX_DECODED_LEN: u64 = 0x0200_0000;

/// Initial buffer capacity for encoded values
const PREALLOC_SIZE: usize = 64;

/// Decoding failure. Surfaces as "not found" at the typed read boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended before the value was complete
    UnexpectedEnd { needed: usize, remaining: usize },
    /// Bytes do not form a valid value of the requested type
    InvalidValue(&'static str),
    /// Length prefix above `MAX_DECODED_LEN`
    LengthOverflow(u64),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnexpectedEnd { needed, remaining } => {
                write!(f, "unexpected end of input: needed {} bytes, {} remaining", needed, remaining)
            }
            DecodeError::InvalidValue(what) => write!(f, "invalid encoded value: {}", what),
            DecodeError::LengthOverflow(len) => {
                write!(f, "length prefix {} exceeds limit of {}", len, MAX_DECODED_LEN)
            }
        }
    }
}

impl Error for DecodeError {}

/// Types that can be written as key or value bytes.
pub trait Encode {
    /// Append the encoding of `self` to `out`.
    fn encode_to(&self, out: &mut Vec<u8>);

    /// Exact number of bytes `encode_to` appends.
    fn encoded_size(&self) -> usize {
        let mut buf = Vec::with_capacity(PREALLOC_SIZE);
        self.encode_to(&mut buf);
        buf.len()
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PREALLOC_SIZE);
        self.encode_to(&mut out);
        out
    }
}

/// Types that can be read back from key or value bytes.
pub trait Decode: Sized {
    /// Decode from the front of `input`, advancing it past the consumed bytes.
    fn decode_from(input: &mut &[u8]) -> Result<Self, DecodeError>;

    /// Decode from the front of `bytes`; trailing bytes are ignored.
    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut input = bytes;
        Self::decode_from(&mut input)
    }
}

fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    if input.len() < n {
        return Err(DecodeError::UnexpectedEnd { needed: n, remaining: input.len() });
    }
    let (head, tail) = input.split_at(n);
    *input = tail;
    Ok(head)
}

/// Append a compact-size integer (1, 3, 5 or 9 bytes).
pub fn write_compact_size(out: &mut Vec<u8>, n: u64) {
    if n < 253 {
        out.push(n as u8);
    } else if n <= 0xFFFF {
        out.push(253);
        out.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xFFFF_FFFF {
        out.push(254);
        out.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        out.push(255);
        out.extend_from_slice(&n.to_le_bytes());
    }
}

/// Encoded width of a compact-size integer.
pub fn compact_size_len(n: u64) -> usize {
    match n {
        0..=252 => 1,
        253..=0xFFFF => 3,
        0x1_0000..=0xFFFF_FFFF => 5,
        _ => 9,
    }
}

/// Read a compact-size integer, rejecting non-canonical encodings.
pub fn read_compact_size(input: &mut &[u8]) -> Result<u64, DecodeError> {
    let tag = take(input, 1)?[0];
    let (value, min) = match tag {
        0..=252 => return Ok(tag as u64),
        253 => {
            let b = take(input, 2)?;
            (u16::from_le_bytes([b[0], b[1]]) as u64, 253)
        }
        254 => {
            let b = take(input, 4)?;
            (u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64, 0x1_0000)
        }
        255 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(take(input, 8)?);
            (u64::from_le_bytes(buf), 0x1_0000_0000)
        }
    };
    if value < min {
        return Err(DecodeError::InvalidValue("non-canonical compact size"));
    }
    Ok(value)
}

fn read_len(input: &mut &[u8]) -> Result<usize, DecodeError> {
    let len = read_compact_size(input)?;
    if len > MAX_DECODED_LEN {
        return Err(DecodeError::LengthOverflow(len));
    }
    Ok(len as usize)
}

macro_rules! impl_unsigned {
    ($($ty:ty),*) => {$(
        impl Encode for $ty {
            fn encode_to(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_be_bytes());
            }

            fn encoded_size(&self) -> usize {
                std::mem::size_of::<$ty>()
            }
        }

        impl Decode for $ty {
            fn decode_from(input: &mut &[u8]) -> Result<Self, DecodeError> {
                const WIDTH: usize = std::mem::size_of::<$ty>();
                let mut buf = [0u8; WIDTH];
                buf.copy_from_slice(take(input, WIDTH)?);
                Ok(<$ty>::from_be_bytes(buf))
            }
        }
    )*};
}

impl_unsigned!(u8, u16, u32, u64);

macro_rules! impl_signed {
    ($($ty:ty => $unsigned:ty),*) => {$(
        impl Encode for $ty {
            fn encode_to(&self, out: &mut Vec<u8>) {
                let flipped = (*self as $unsigned) ^ (1 << (<$unsigned>::BITS - 1));
                out.extend_from_slice(&flipped.to_be_bytes());
            }

            fn encoded_size(&self) -> usize {
                std::mem::size_of::<$ty>()
            }
        }

        impl Decode for $ty {
            fn decode_from(input: &mut &[u8]) -> Result<Self, DecodeError> {
                let raw = <$unsigned>::decode_from(input)?;
                Ok((raw ^ (1 << (<$unsigned>::BITS - 1))) as $ty)
            }
        }
    )*};
}

impl_signed!(i32 => u32, i64 => u64);

impl Encode for bool {
    fn encode_to(&self, out: &mut Vec<u8>) {
        out.push(*self as u8);
    }

    fn encoded_size(&self) -> usize {
        1
    }
}

impl Decode for bool {
    fn decode_from(input: &mut &[u8]) -> Result<Self, DecodeError> {
        match take(input, 1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecodeError::InvalidValue("bool must be 0 or 1")),
        }
    }
}

impl<const N: usize> Encode for [u8; N] {
    fn encode_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }

    fn encoded_size(&self) -> usize {
        N
    }
}

impl<const N: usize> Decode for [u8; N] {
    fn decode_from(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(take(input, N)?);
        Ok(buf)
    }
}

impl Encode for [u8] {
    fn encode_to(&self, out: &mut Vec<u8>) {
        write_compact_size(out, self.len() as u64);
        out.extend_from_slice(self);
    }

    fn encoded_size(&self) -> usize {
        compact_size_len(self.len() as u64) + self.len()
    }
}

impl Encode for Vec<u8> {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.as_slice().encode_to(out)
    }

    fn encoded_size(&self) -> usize {
        self.as_slice().encoded_size()
    }
}

impl Decode for Vec<u8> {
    fn decode_from(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = read_len(input)?;
        Ok(take(input, len)?.to_vec())
    }
}

impl Encode for str {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.as_bytes().encode_to(out)
    }

    fn encoded_size(&self) -> usize {
        self.as_bytes().encoded_size()
    }
}

impl Encode for String {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.as_str().encode_to(out)
    }

    fn encoded_size(&self) -> usize {
        self.as_str().encoded_size()
    }
}

impl Decode for String {
    fn decode_from(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let bytes = Vec::<u8>::decode_from(input)?;
        String::from_utf8(bytes).map_err(|_| DecodeError::InvalidValue("string is not valid UTF-8"))
    }
}

impl<T: Encode + ?Sized> Encode for &T {
    fn encode_to(&self, out: &mut Vec<u8>) {
        (**self).encode_to(out)
    }

    fn encoded_size(&self) -> usize {
        (**self).encoded_size()
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode_to(&self, out: &mut Vec<u8>) {
        match self {
            None => out.push(0),
            Some(value) => {
                out.push(1);
                value.encode_to(out);
            }
        }
    }

    fn encoded_size(&self) -> usize {
        1 + self.as_ref().map_or(0, Encode::encoded_size)
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode_from(input: &mut &[u8]) -> Result<Self, DecodeError> {
        match take(input, 1)?[0] {
            0 => Ok(None),
            1 => T::decode_from(input).map(Some),
            _ => Err(DecodeError::InvalidValue("option tag must be 0 or 1")),
        }
    }
}

macro_rules! impl_tuple {
    ($($name:ident),+) => {
        impl<$($name: Encode),+> Encode for ($($name,)+) {
            #[allow(non_snake_case)]
            fn encode_to(&self, out: &mut Vec<u8>) {
                let ($($name,)+) = self;
                $($name.encode_to(out);)+
            }

            #[allow(non_snake_case)]
            fn encoded_size(&self) -> usize {
                let ($($name,)+) = self;
                0 $(+ $name.encoded_size())+
            }
        }

        impl<$($name: Decode),+> Decode for ($($name,)+) {
            fn decode_from(input: &mut &[u8]) -> Result<Self, DecodeError> {
                Ok(($($name::decode_from(input)?,)+))
            }
        }
    };
}

impl_tuple!(A, B);
impl_tuple!(A, B, C);
