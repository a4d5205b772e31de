//! Protocol module - wire format, framing, and the RPC envelope.
//!
//! This module implements the binary protocol spoken with the daemon:
//! - 4-byte header encoding/decoding (version nibble + 28-bit length)
//! - Frame building and full-read frame parsing
//! - The protobuf `RpcMessage` envelope

mod envelope;
mod frame;
mod wire_format;

pub use envelope::{MessageType, RpcMessage};
pub use frame::{build_frame, encode_frame, read_frame, Frame};
pub use wire_format::{
    decode_header, encode_header, header_from_bytes, header_to_bytes, HEADER_SIZE, MAX_BODY_SIZE,
    PROTOCOL_VERSION, SIZE_MASK,
};
