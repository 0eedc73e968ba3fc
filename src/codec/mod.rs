//! Codec module - serialization/deserialization for command payloads.
//!
//! The codec tag in the flags byte selects how a structured payload is
//! encoded:
//!
//! - [`Codec::Json`] - `serde_json`
//! - [`Codec::Protobuf`] - `prost`
//! - [`Codec::None`] / [`Codec::Reserved`] - raw bytes; a structured payload
//!   cannot be decoded from them
//!
//! Every command schema in [`payloads`] derives both serde and prost, so
//! [`PayloadCodec`] can pick the encoding at runtime from the frame.
//!
//! # Example
//!
//! ```
//! use msgswitch::codec::{CommandForward, PayloadCodec};
//! use msgswitch::protocol::Codec;
//!
//! let cmd = CommandForward { targets: vec![2, 3] };
//! let json = PayloadCodec::encode(Codec::Json, &cmd).unwrap();
//! assert_eq!(&json[..], br#"{"targets":[2,3]}"#);
//!
//! let pb = PayloadCodec::encode(Codec::Protobuf, &cmd).unwrap();
//! let decoded: CommandForward = PayloadCodec::decode(Codec::Protobuf, &pb).unwrap();
//! assert_eq!(decoded, cmd);
//! ```

mod payloads;

pub use payloads::{
    CommandEndpointInfoReq, CommandForward, CommandInfo, CommandInfoReq, CommandKickout,
    CommandKickoutResult, CommandReject, CommandRegister, CommandRegisterResult, CommandSetup,
    CommandSubscribe, EndpointInfo,
};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ProtocolError, Result};
use crate::protocol::Codec;

/// A payload schema that can travel in either structured encoding.
pub trait CommandPayload: prost::Message + Default + Serialize + DeserializeOwned {}

impl<T> CommandPayload for T where T: prost::Message + Default + Serialize + DeserializeOwned {}

/// Codec dispatcher for command payloads.
pub struct PayloadCodec;

impl PayloadCodec {
    /// Decode a payload with the codec named by the frame.
    ///
    /// An empty payload decodes to the schema default under any codec.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::UnsupportedCodec`] for a non-empty payload tagged
    /// `none` or reserved, [`ProtocolError::MalformedPayload`] when the bytes
    /// do not match the schema.
    pub fn decode<T: CommandPayload>(codec: Codec, bytes: &[u8]) -> std::result::Result<T, ProtocolError> {
        if bytes.is_empty() {
            return Ok(T::default());
        }
        match codec {
            Codec::Json => serde_json::from_slice(bytes)
                .map_err(|e| ProtocolError::MalformedPayload(e.to_string())),
            Codec::Protobuf => {
                T::decode(bytes).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
            }
            Codec::None | Codec::Reserved => Err(ProtocolError::UnsupportedCodec),
        }
    }

    /// Encode a value with the given codec.
    ///
    /// # Errors
    ///
    /// Fails for `none`/reserved codecs and when JSON serialization fails.
    pub fn encode<T: CommandPayload>(codec: Codec, value: &T) -> Result<Bytes> {
        match codec {
            Codec::Json => Ok(Bytes::from(serde_json::to_vec(value)?)),
            Codec::Protobuf => Ok(Bytes::from(value.encode_to_vec())),
            Codec::None | Codec::Reserved => Err(ProtocolError::UnsupportedCodec.into()),
        }
    }
}
