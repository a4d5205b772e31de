//! RPC envelope carried in every frame body.
//!
//! The envelope is the daemon's protobuf `RpcMessage`. Its `buffer` field
//! holds the method-specific message, serialized independently and opaque at
//! this layer.

use bytes::Bytes;
use prost::Message;

use crate::error::Result;

/// Envelope type discriminator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    Request = 1,
    Response = 2,
    ResponseCancel = 3,
    ResponseFailed = 4,
    ResponseNotImplemented = 5,
    Disconnect = 6,
    DescriptorRequest = 7,
    DescriptorResponse = 8,
    RequestNone = 9,
    ResponseNone = 10,
    StreamRequest = 11,
}

/// Wire-level envelope.
#[derive(Clone, PartialEq, Message)]
pub struct RpcMessage {
    /// Raw [`MessageType`] value; unknown values are preserved.
    #[prost(enumeration = "MessageType", required, tag = "1")]
    pub kind: i32,
    /// Correlation id.
    #[prost(uint32, optional, tag = "2")]
    pub id: Option<u32>,
    /// Method name (requests only).
    #[prost(string, optional, tag = "3")]
    pub name: Option<String>,
    /// Nested method-specific payload.
    #[prost(bytes = "bytes", optional, tag = "4")]
    pub buffer: Option<Bytes>,
}

impl RpcMessage {
    /// Build a REQUEST envelope.
    pub fn request(id: u32, name: &str, buffer: Bytes) -> Self {
        Self {
            kind: MessageType::Request as i32,
            id: Some(id),
            name: Some(name.to_string()),
            buffer: Some(buffer),
        }
    }

    /// Build a RESPONSE envelope.
    pub fn response(id: u32, buffer: Bytes) -> Self {
        Self {
            kind: MessageType::Response as i32,
            id: Some(id),
            name: None,
            buffer: Some(buffer),
        }
    }

    /// Build a RESPONSE_FAILED envelope carrying a UTF-8 reason.
    pub fn response_failed(id: u32, reason: &str) -> Self {
        Self {
            kind: MessageType::ResponseFailed as i32,
            id: Some(id),
            name: None,
            buffer: Some(Bytes::copy_from_slice(reason.as_bytes())),
        }
    }

    /// Typed view of the envelope type, `None` for values this client does not know.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::try_from(self.kind).ok()
    }

    /// Correlation id, `0` when absent.
    #[inline]
    pub fn correlation_id(&self) -> u32 {
        self.id.unwrap_or_default()
    }

    /// Payload, empty when absent.
    pub fn payload(&self) -> Bytes {
        self.buffer.clone().unwrap_or_default()
    }

    /// Serialize the envelope.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.encode_to_vec())
    }

    /// Parse an envelope from a frame body.
    pub fn from_bytes(body: Bytes) -> Result<Self> {
        Ok(Self::decode(body)?)
    }
}
