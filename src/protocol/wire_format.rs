//! Frame header encoding and decoding.
//!
//! Every frame starts with a single 32-bit header word:
//! ```text
//! ┌─────────┬──────────────────────────────┐
//! │ Version │ Body length                  │
//! │ 4 bits  │ 28 bits                      │
//! └─────────┴──────────────────────────────┘
//! ```
//!
//! The word is written Little Endian, whatever the host byte order.

use crate::error::{OlaError, Result};

/// Header size in bytes (fixed, exactly 4).
pub const HEADER_SIZE: usize = 4;

/// The only protocol version this client speaks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Bit offset of the version nibble.
const VERSION_SHIFT: u32 = 28;

/// Mask selecting the 28-bit length field.
pub const SIZE_MASK: u32 = 0x0FFF_FFFF;

/// Largest body length representable in a header (2^28 - 1).
pub const MAX_BODY_SIZE: usize = SIZE_MASK as usize;

/// Pack the protocol version and `body_length` into a header word.
///
/// The caller must ensure `body_length <= MAX_BODY_SIZE`; larger values are
/// truncated to 28 bits.
///
/// # Example
///
/// ```
/// use ola_client::protocol::{decode_header, encode_header};
///
/// let word = encode_header(100);
/// assert_eq!(word >> 28, 1);
/// assert_eq!(decode_header(word).unwrap(), 100);
/// ```
#[inline]
pub fn encode_header(body_length: u32) -> u32 {
    debug_assert!(body_length <= SIZE_MASK);
    (PROTOCOL_VERSION << VERSION_SHIFT) | (body_length & SIZE_MASK)
}

/// Extract the body length from a header word.
///
/// Fails with a protocol error if the version nibble is not
/// [`PROTOCOL_VERSION`].
pub fn decode_header(word: u32) -> Result<u32> {
    let version = word >> VERSION_SHIFT;
    if version != PROTOCOL_VERSION {
        return Err(OlaError::Protocol(format!(
            "Unsupported protocol version {} (expected {})",
            version, PROTOCOL_VERSION
        )));
    }
    Ok(word & SIZE_MASK)
}

/// Encode a header word to its on-wire bytes.
#[inline]
pub fn header_to_bytes(word: u32) -> [u8; HEADER_SIZE] {
    word.to_le_bytes()
}

/// Decode on-wire bytes into a header word.
#[inline]
pub fn header_from_bytes(buf: [u8; HEADER_SIZE]) -> u32 {
    u32::from_le_bytes(buf)
}
