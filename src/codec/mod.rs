//! Codec module - serialization/deserialization for method payloads.
//!
//! Method payloads travel inside the envelope's `buffer` field and are
//! serialized independently of it. The daemon speaks protobuf, so the
//! default codec is [`ProtoCodec`] over `prost` messages.
//!
//! # Design
//!
//! Codecs are marker structs with static methods rather than trait objects,
//! so the codec is picked at compile time.
//!
//! # Example
//!
//! ```
//! use ola_client::codec::ProtoCodec;
//! use ola_client::messages::UniverseRequest;
//!
//! let encoded = ProtoCodec::encode(&UniverseRequest { universe: 1 });
//! let decoded: UniverseRequest = ProtoCodec::decode(encoded).unwrap();
//! assert_eq!(decoded.universe, 1);
//! ```

mod proto;

pub use proto::ProtoCodec;
