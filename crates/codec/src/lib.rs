//! # Codec
//!
//! Byte-level primitives for the backup disk format: bounded big-endian
//! integer encoding, length-prefixed sized frames, and xxHash64 digests.
//!
//! Everything in this crate operates on opaque bytes and plain streams.
//! Structured payload encoding (Avro) lives a layer up, in `payload`.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use std::ops::Range;

use thiserror::Error;

/// Valid input range for [`write_uint32`].
pub const UINT32_RANGE: Range<i128> = 0..1 << 32;

/// Valid input range for [`write_uint64`].
pub const UINT64_RANGE: Range<i128> = 0..1 << 64;

/// Size of an xxHash64 digest in bytes.
pub const DIGEST_BYTES: usize = 8;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("value {value} is too small for valid range {min}..{max}")]
    IntegerBelowBound { value: i128, min: i128, max: i128 },
    #[error("value {value} is too large for valid range {min}..{max}")]
    IntegerAboveBound { value: i128, min: i128, max: i128 },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    /// A frame or fixed-width field claims more bytes than remain in the
    /// stream.
    #[error("stream ended before {expected} expected bytes were consumed")]
    InvalidBytesConsumed { expected: usize },
    /// Stored digest does not match the digest recomputed over the data.
    #[error("checksum mismatch: stored {stored:02x?}, computed {computed:02x?}")]
    InvalidChecksum {
        stored: Vec<u8>,
        computed: [u8; DIGEST_BYTES],
    },
    #[error("io error: {0}")]
    Io(io::Error),
}

/// Classifies an out-of-range integer as below or above `valid`.
///
/// Valid values vastly outnumber invalid ones, so callers do not pre-check:
/// they let the primitive conversion fail and derive the error here.
fn out_of_bounds(valid: Range<i128>, value: i128) -> EncodeError {
    if value < valid.start {
        EncodeError::IntegerBelowBound {
            value,
            min: valid.start,
            max: valid.end,
        }
    } else {
        EncodeError::IntegerAboveBound {
            value,
            min: valid.start,
            max: valid.end,
        }
    }
}

/// Maps `UnexpectedEof` to [`DecodeError::InvalidBytesConsumed`]. Any other
/// I/O failure is passed through as-is.
fn eof_means_truncated(error: io::Error, expected: usize) -> DecodeError {
    if error.kind() == io::ErrorKind::UnexpectedEof {
        DecodeError::InvalidBytesConsumed { expected }
    } else {
        DecodeError::Io(error)
    }
}

/// Writes `value` as 4 bytes big-endian.
pub fn write_uint32<W: Write>(out: &mut W, value: i128) -> Result<(), EncodeError> {
    match u32::try_from(value) {
        Ok(v) => Ok(out.write_u32::<BigEndian>(v)?),
        Err(_) => Err(out_of_bounds(UINT32_RANGE, value)),
    }
}

/// Writes `value` as 8 bytes big-endian.
pub fn write_uint64<W: Write>(out: &mut W, value: i128) -> Result<(), EncodeError> {
    match u64::try_from(value) {
        Ok(v) => Ok(out.write_u64::<BigEndian>(v)?),
        Err(_) => Err(out_of_bounds(UINT64_RANGE, value)),
    }
}

/// Reads exactly 4 bytes as a big-endian u32.
///
/// Any 4-byte pattern is a valid value; the only failure mode is a stream
/// that ends early.
pub fn read_uint32<R: Read>(input: &mut R) -> Result<u32, DecodeError> {
    input
        .read_u32::<BigEndian>()
        .map_err(|e| eof_means_truncated(e, 4))
}

/// Reads exactly 8 bytes as a big-endian u64.
pub fn read_uint64<R: Read>(input: &mut R) -> Result<u64, DecodeError> {
    input
        .read_u64::<BigEndian>()
        .map_err(|e| eof_means_truncated(e, 8))
}

/// Writes an opaque payload preceded by its 4-byte big-endian length.
pub fn write_sized<W: Write>(out: &mut W, payload: &[u8]) -> Result<(), EncodeError> {
    write_uint32(out, payload.len() as i128)?;
    out.write_all(payload)?;
    Ok(())
}

/// Reads one sized frame: a 4-byte length prefix followed by exactly that
/// many payload bytes.
///
/// # Errors
///
/// [`DecodeError::InvalidBytesConsumed`] if the stream holds fewer bytes
/// than the prefix claims.
pub fn read_sized<R: Read>(input: &mut R) -> Result<Vec<u8>, DecodeError> {
    let size = read_uint32(input)? as usize;
    let mut payload = vec![0u8; size];
    input
        .read_exact(&mut payload)
        .map_err(|e| eof_means_truncated(e, size))?;
    Ok(payload)
}

/// Computes the 8-byte big-endian xxHash64 digest of `data`.
///
/// Fast corruption detection only; not tamper-resistant.
pub fn digest(data: &[u8]) -> [u8; DIGEST_BYTES] {
    xxhash_rust::xxh64::xxh64(data, 0).to_be_bytes()
}

/// Recomputes the digest of `data` and compares it byte-for-byte against
/// `stored`.
pub fn verify_digest(data: &[u8], stored: &[u8]) -> Result<(), DecodeError> {
    let computed = digest(data);
    if stored != computed {
        return Err(DecodeError::InvalidChecksum {
            stored: stored.to_vec(),
            computed,
        });
    }
    Ok(())
}
