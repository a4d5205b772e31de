//! Daemon method messages.
//!
//! A subset of the daemon's protobuf API covering the calls a lighting
//! controller makes every frame: pushing DMX data, reading it back and
//! listing universes. Other methods can be sent through
//! [`Client::send_request`](crate::Client::send_request) with caller-defined
//! `prost` types.

use bytes::Bytes;

/// Method name for sending a universe's DMX values.
pub const UPDATE_DMX_DATA: &str = "UpdateDmxData";
/// Method name for reading a universe's DMX values.
pub const GET_DMX: &str = "GetDmx";
/// Method name for listing universe details.
pub const GET_UNIVERSE_INFO: &str = "GetUniverseInfo";

/// How a universe merges multiple input sources.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MergeMode {
    Htp = 1,
    Ltp = 2,
}

/// DMX values for one universe.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DmxData {
    #[prost(int32, required, tag = "1")]
    pub universe: i32,
    #[prost(bytes = "bytes", required, tag = "2")]
    pub data: Bytes,
    #[prost(int32, optional, tag = "3")]
    pub priority: Option<i32>,
}

/// Empty acknowledgement.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Ack {}

/// Request naming exactly one universe.
#[derive(Clone, PartialEq, prost::Message)]
pub struct UniverseRequest {
    #[prost(int32, required, tag = "1")]
    pub universe: i32,
}

/// Request naming one universe, or all of them when `universe` is absent.
#[derive(Clone, PartialEq, prost::Message)]
pub struct OptionalUniverseRequest {
    #[prost(int32, optional, tag = "1")]
    pub universe: Option<i32>,
}

/// Description of one universe.
#[derive(Clone, PartialEq, prost::Message)]
pub struct UniverseInfo {
    #[prost(int32, required, tag = "1")]
    pub universe: i32,
    #[prost(string, required, tag = "2")]
    pub name: String,
    #[prost(enumeration = "MergeMode", required, tag = "3")]
    pub merge_mode: i32,
    #[prost(int32, required, tag = "4")]
    pub input_port_count: i32,
    #[prost(int32, required, tag = "5")]
    pub output_port_count: i32,
    #[prost(int32, required, tag = "6")]
    pub rdm_devices: i32,
}

/// Reply to [`GET_UNIVERSE_INFO`].
#[derive(Clone, PartialEq, prost::Message)]
pub struct UniverseInfoReply {
    #[prost(message, repeated, tag = "1")]
    pub universe: Vec<UniverseInfo>,
}
