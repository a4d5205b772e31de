//! Frame reading and building.
//!
//! A frame is a 4-byte header followed by a body holding one serialized
//! [`RpcMessage`]. Reading uses full-read semantics: a header or body cut
//! short by EOF is an I/O error, while a bad header is a protocol error.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::envelope::RpcMessage;
use super::wire_format::{
    decode_header, encode_header, header_from_bytes, header_to_bytes, HEADER_SIZE, MAX_BODY_SIZE,
    SIZE_MASK,
};
use crate::error::{OlaError, Result};

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Raw header word.
    pub header: u32,
    /// Serialized envelope.
    pub body: Bytes,
}

impl Frame {
    /// Body length announced by the header.
    #[inline]
    pub fn body_len(&self) -> usize {
        (self.header & SIZE_MASK) as usize
    }

    /// Parse the body as an envelope.
    pub fn envelope(&self) -> Result<RpcMessage> {
        RpcMessage::from_bytes(self.body.clone())
    }
}

/// Build a complete frame as a single contiguous buffer.
///
/// # Example
///
/// ```
/// use ola_client::protocol::{build_frame, HEADER_SIZE};
///
/// let bytes = build_frame(b"hello").unwrap();
/// assert_eq!(bytes.len(), HEADER_SIZE + 5);
/// ```
pub fn build_frame(body: &[u8]) -> Result<Bytes> {
    if body.len() > MAX_BODY_SIZE {
        return Err(OlaError::FrameTooLarge(body.len()));
    }
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + body.len());
    buf.put_slice(&header_to_bytes(encode_header(body.len() as u32)));
    buf.put_slice(body);
    Ok(buf.freeze())
}

/// Serialize an envelope and wrap it in a frame.
pub fn encode_frame(envelope: &RpcMessage) -> Result<Bytes> {
    build_frame(&envelope.to_bytes())
}

/// Read exactly one frame from `reader`.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_buf).await?;

    let header = header_from_bytes(header_buf);
    let length = decode_header(header)? as usize;

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;

    Ok(Frame {
        header,
        body: Bytes::from(body),
    })
}
