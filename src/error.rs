//! Error types for msgswitch.
//!
//! Three layers, matching how far an error is allowed to travel:
//!
//! - [`FrameError`]: the byte stream is corrupt. Fatal for the connection.
//! - [`ProtocolError`]: the request is well framed but not acceptable.
//!   Answered with a RESULT frame, connection stays open.
//! - [`SwitchError`]: everything else (I/O, codecs, configuration), plus the
//!   two layers above via `#[from]`.

use thiserror::Error;

/// Framing errors. The stream cannot be resynchronized after one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Fewer bytes than the header, or than the declared payload length.
    #[error("truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// Header fields that can never be valid.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// Payload does not fit the length field or the configured maximum.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },
}

/// Per-request protocol errors, reported back in a RESULT frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A role-gated command arrived on a connection without a registered endpoint.
    #[error("endpoint not registered")]
    UnregisteredSender,

    /// Codec tag is `none` or reserved for a structured payload.
    #[error("Unsupported codec of message payload")]
    UnsupportedCodec,

    /// Registered, but the role is not allowed to run the command.
    #[error("the operation not allowed for role: {0}")]
    RoleNotPermitted(&'static str),

    /// Command value unknown or without a handler.
    #[error("unsupported command: {0}")]
    UnsupportedCommand(u8),

    /// Payload could not be decoded into the command's schema.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// Main error type for all msgswitch operations.
#[derive(Debug, Error)]
pub enum SwitchError {
    /// I/O error on a socket or configuration file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protobuf encode error.
    #[error("protobuf encode error: {0}")]
    ProtobufEncode(#[from] prost::EncodeError),

    /// Protobuf decode error.
    #[error("protobuf decode error: {0}")]
    ProtobufDecode(#[from] prost::DecodeError),

    /// Corrupt framing.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Request rejected at the protocol level.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - write queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// No RESULT arrived in time (client side).
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// The switch answered with a nonzero errcode (client side).
    #[error("command failed ({errcode}): {message}")]
    CommandFailed { errcode: i8, message: String },
}

/// Result type alias using SwitchError.
pub type Result<T> = std::result::Result<T, SwitchError>;
