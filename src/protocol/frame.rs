//! Frame struct with typed accessors.
//!
//! Represents a complete protocol frame with header and payload.
//! Uses `bytes::Bytes` so a forwarded payload is shared, not copied, across
//! every target it fans out to.
//!
//! # Example
//!
//! ```
//! use msgswitch::protocol::{Codec, Command, Frame, LengthConvention};
//! use bytes::Bytes;
//!
//! let frame = Frame::request(Command::Echo, Codec::Json, Bytes::from_static(b"hello"));
//! let wire = frame.encode(LengthConvention::IncludesSelf).unwrap();
//! let (decoded, used) = Frame::decode(&wire, LengthConvention::IncludesSelf).unwrap();
//!
//! assert_eq!(used, wire.len());
//! assert_eq!(decoded.payload(), b"hello");
//! ```

use bytes::Bytes;

use super::wire_format::{Codec, Command, Flags, Header, LengthConvention, HEADER_SIZE};
use crate::error::FrameError;

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded header. `header.payload_length == payload.len()`.
    pub header: Header,
    /// Payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame from raw command value, flags and payload.
    pub fn new(command: u8, flags: Flags, payload: Bytes) -> Self {
        Self {
            header: Header::new(command, flags, payload.len()),
            payload,
        }
    }

    /// Create a request frame.
    pub fn request(command: Command, codec: Codec, payload: Bytes) -> Self {
        Self::new(command.as_u8(), Flags::request(codec), payload)
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Raw command value.
    #[inline]
    pub fn command_value(&self) -> u8 {
        self.header.command
    }

    /// Typed command, `None` if unassigned.
    #[inline]
    pub fn command(&self) -> Option<Command> {
        self.header.command()
    }

    #[inline]
    pub fn flags(&self) -> Flags {
        self.header.flags
    }

    #[inline]
    pub fn codec(&self) -> Codec {
        self.header.codec()
    }

    /// Check if this is a response.
    #[inline]
    pub fn is_response(&self) -> bool {
        self.header.is_response()
    }

    /// Encoded size on the wire.
    #[inline]
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Decode one frame from the front of `buf`.
    ///
    /// Returns the frame and the number of bytes it occupied.
    pub fn decode(buf: &[u8], convention: LengthConvention) -> Result<(Self, usize), FrameError> {
        let (header, payload) = decode_frame(buf, convention)?;
        Ok((
            Self {
                header,
                payload: Bytes::copy_from_slice(payload),
            },
            header.frame_size(),
        ))
    }

    /// Encode header and payload into one contiguous buffer.
    pub fn encode(&self, convention: LengthConvention) -> Result<Bytes, FrameError> {
        build_frame(&self.header, &self.payload, convention).map(Bytes::from)
    }
}

/// Split `buf` into a header and a payload slice.
///
/// Fails with [`FrameError::Truncated`] when the buffer holds less than the
/// header or less than the declared payload.
pub fn decode_frame(buf: &[u8], convention: LengthConvention) -> Result<(Header, &[u8]), FrameError> {
    let header = Header::decode(buf, convention)?;
    let end = header.frame_size();
    if buf.len() < end {
        return Err(FrameError::Truncated {
            needed: end,
            available: buf.len(),
        });
    }
    Ok((header, &buf[HEADER_SIZE..end]))
}

/// Build a complete frame as a single byte vector.
///
/// The header's `payload_length` is taken from `payload`, so a stale header
/// length can never reach the wire.
pub fn build_frame(
    header: &Header,
    payload: &[u8],
    convention: LengthConvention,
) -> Result<Vec<u8>, FrameError> {
    let header = Header::new(header.command, header.flags, payload.len());
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode(convention)?);
    buf.extend_from_slice(payload);
    Ok(buf)
}
