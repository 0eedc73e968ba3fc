//! RESULT and heartbeat frame builders.
//!
//! A RESULT frame keeps the command of the request it answers and sets the
//! response bit. Its payload is a one-byte `errcode` followed by the data.

use bytes::{BufMut, Bytes, BytesMut};

use super::frame::Frame;
use super::wire_format::{Codec, Command, Flags};

/// Error code for a successful request.
pub const ERRCODE_OK: i8 = 0;

/// Error code for any failed request.
pub const ERRCODE_FAILED: i8 = 1;

/// Codec stamped on a RESULT frame: the request's, or JSON when the request
/// did not name a structured codec.
#[inline]
pub fn result_codec(request_codec: Codec) -> Codec {
    if request_codec.is_structured() {
        request_codec
    } else {
        Codec::Json
    }
}

/// Build a RESULT frame for `command`.
///
/// # Example
///
/// ```
/// use msgswitch::protocol::{build_result, Codec, Command, ResultMessage};
///
/// let frame = build_result(Command::Echo.as_u8(), Codec::None, 0, b"hi");
/// assert!(frame.is_response());
/// assert_eq!(frame.codec(), Codec::Json);
///
/// let result = ResultMessage::parse(frame.payload()).unwrap();
/// assert_eq!(result.data, b"hi");
/// ```
pub fn build_result(command: u8, request_codec: Codec, errcode: i8, data: &[u8]) -> Frame {
    let mut payload = BytesMut::with_capacity(1 + data.len());
    payload.put_i8(errcode);
    payload.put_slice(data);
    Frame::new(
        command,
        Flags::response(result_codec(request_codec)),
        payload.freeze(),
    )
}

/// Heartbeat request: `HEARTBEAT`, no codec, empty payload.
pub fn build_heartbeat_request() -> Frame {
    Frame::request(Command::Heartbeat, Codec::None, Bytes::new())
}

/// Heartbeat response: `HEARTBEAT` with the response bit, empty payload.
pub fn build_heartbeat_response() -> Frame {
    Frame::new(
        Command::Heartbeat.as_u8(),
        Flags::response(Codec::None),
        Bytes::new(),
    )
}
