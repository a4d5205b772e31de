//! Protobuf codec using `prost`.

use bytes::Bytes;
use prost::Message;

use crate::error::Result;

/// Protobuf codec for daemon method messages.
pub struct ProtoCodec;

impl ProtoCodec {
    /// Encode a message to protobuf bytes.
    ///
    /// Encoding into a growable buffer cannot run out of space, so this is
    /// infallible.
    #[inline]
    pub fn encode<T: Message>(value: &T) -> Bytes {
        Bytes::from(value.encode_to_vec())
    }

    /// Decode protobuf bytes to a message.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a valid encoding of `T`.
    #[inline]
    pub fn decode<T: Message + Default>(bytes: Bytes) -> Result<T> {
        Ok(T::decode(bytes)?)
    }
}
