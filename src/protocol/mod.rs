//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the binary protocol shared by the switch and its
//! peers:
//! - command header encoding/decoding with the self-inclusive length option
//! - frame buffer for accumulating partial reads
//! - typed views over `SVC`, `PUBLISH_2` and RESULT payloads
//! - RESULT and heartbeat frame builders

mod frame;
mod frame_buffer;
mod messages;
mod result;
mod wire_format;

pub use frame::{build_frame, decode_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use messages::{PublishingMessage, ResultMessage, ServiceMessage};
pub use result::{
    build_heartbeat_request, build_heartbeat_response, build_result, result_codec, ERRCODE_FAILED,
    ERRCODE_OK,
};
pub use wire_format::{
    flags, Codec, Command, Flags, Header, LengthConvention, PayloadLen, HEADER_SIZE,
    MAX_PAYLOAD_SIZE, PAYLOAD_LEN_OFFSET, PAYLOAD_LEN_SIZE,
};
