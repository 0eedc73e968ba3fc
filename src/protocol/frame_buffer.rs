//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: Need at least `HEADER_SIZE` bytes
//! - `WaitingForPayload`: Header parsed, need N more payload bytes
//!
//! The buffer applies the session's [`LengthConvention`] through
//! [`Header::decode`]; frames it yields always carry the logical length.
//!
//! # Example
//!
//! ```ignore
//! use msgswitch::protocol::{FrameBuffer, LengthConvention};
//!
//! let mut buffer = FrameBuffer::new(LengthConvention::IncludesSelf);
//!
//! // Data arrives in chunks from socket
//! let frames = buffer.push(&chunk)?;
//!
//! for frame in frames {
//!     println!("Got frame with command: {}", frame.command_value());
//! }
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{Header, LengthConvention, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use super::Frame;
use crate::error::FrameError;

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for complete header.
    WaitingForHeader,
    /// Header parsed, waiting for payload bytes.
    WaitingForPayload { header: Header },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Length convention of this session.
    convention: LengthConvention,
    /// Maximum allowed payload size.
    max_payload_size: usize,
}

impl FrameBuffer {
    /// Create a new frame buffer for the given convention.
    ///
    /// Default capacity: 16KB, max payload: whatever the length field allows.
    pub fn new(convention: LengthConvention) -> Self {
        Self::with_max_payload(convention, MAX_PAYLOAD_SIZE)
    }

    /// Create a new frame buffer with custom max payload size.
    pub fn with_max_payload(convention: LengthConvention, max_payload_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(16 * 1024),
            state: State::WaitingForHeader,
            convention,
            max_payload_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// If data is fragmented, partial data is buffered internally for the
    /// next push.
    ///
    /// # Errors
    ///
    /// Any [`FrameError`] means the stream is no longer aligned on frame
    /// boundaries; the caller must drop the connection.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>, FrameError> {
        self.feed(data);

        let mut frames = Vec::new();

        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    /// Append data without extracting anything.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Extract the next complete frame, if any.
    ///
    /// Frames ahead of a corrupt header are still returned; the error comes
    /// once the corrupt header is reached.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        self.try_extract_one()
    }

    /// Try to extract a single frame from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on a protocol violation
    fn try_extract_one(&mut self) -> Result<Option<Frame>, FrameError> {
        match &self.state {
            State::WaitingForHeader => {
                if self.buffer.len() < HEADER_SIZE {
                    return Ok(None);
                }

                let header = Header::decode(&self.buffer[..HEADER_SIZE], self.convention)?;
                header.validate(self.max_payload_size)?;

                let _ = self.buffer.split_to(HEADER_SIZE);

                if header.payload_length == 0 {
                    return Ok(Some(Frame {
                        header,
                        payload: Bytes::new(),
                    }));
                }

                self.state = State::WaitingForPayload { header };
                self.try_extract_one()
            }

            State::WaitingForPayload { header } => {
                let remaining = header.payload_length;

                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                let payload = self.buffer.split_to(remaining).freeze();
                let header = *header;

                self.state = State::WaitingForHeader;

                Ok(Some(Frame { header, payload }))
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Codec, Command, Flags};

    fn make_frame_bytes(command: Command, payload: &[u8], convention: LengthConvention) -> Vec<u8> {
        Frame::new(
            command.as_u8(),
            Flags::request(Codec::Json),
            Bytes::copy_from_slice(payload),
        )
        .encode(convention)
        .unwrap()
        .to_vec()
    }

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new(LengthConvention::PayloadOnly);
        let bytes = make_frame_bytes(Command::Echo, b"hello", LengthConvention::PayloadOnly);

        let frames = buffer.push(&bytes).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command(), Some(Command::Echo));
        assert_eq!(&frames[0].payload[..], b"hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_self_inclusive_frames() {
        let mut buffer = FrameBuffer::new(LengthConvention::IncludesSelf);
        let mut combined = make_frame_bytes(Command::Echo, b"one", LengthConvention::IncludesSelf);
        combined.extend(make_frame_bytes(Command::Fwd, b"", LengthConvention::IncludesSelf));
        combined.extend(make_frame_bytes(Command::Info, b"three", LengthConvention::IncludesSelf));

        let frames = buffer.push(&combined).unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(&frames[0].payload[..], b"one");
        assert!(frames[1].payload.is_empty());
        assert_eq!(frames[2].header.payload_length, 5);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_header() {
        let mut buffer = FrameBuffer::new(LengthConvention::PayloadOnly);
        let bytes = make_frame_bytes(Command::Echo, b"test", LengthConvention::PayloadOnly);

        let frames = buffer.push(&bytes[..HEADER_SIZE - 1]).unwrap();
        assert!(frames.is_empty());
        assert_eq!(buffer.state_name(), "WaitingForHeader");

        let frames = buffer.push(&bytes[HEADER_SIZE - 1..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_payload() {
        let mut buffer = FrameBuffer::new(LengthConvention::IncludesSelf);
        let payload = b"this is a longer payload that will be fragmented";
        let bytes = make_frame_bytes(Command::Publish, payload, LengthConvention::IncludesSelf);

        let partial_len = HEADER_SIZE + 10;
        let frames = buffer.push(&bytes[..partial_len]).unwrap();
        assert!(frames.is_empty());
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        let frames = buffer.push(&bytes[partial_len..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].payload[..], payload);
    }

    #[test]
    fn test_max_payload_validation() {
        let mut buffer = FrameBuffer::with_max_payload(LengthConvention::PayloadOnly, 100);
        let header = Header::new(Command::Publish.as_u8(), Flags::default(), 1000);
        let header_bytes = header.encode(LengthConvention::PayloadOnly).unwrap();

        let result = buffer.push(&header_bytes);

        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_reserved_flag_bits_rejected() {
        let mut buffer = FrameBuffer::new(LengthConvention::PayloadOnly);
        let header = Header::new(Command::Echo.as_u8(), Flags::from_bits(0b0000_0100), 0);
        let bytes = header.encode(LengthConvention::PayloadOnly).unwrap();

        assert!(matches!(
            buffer.push(&bytes),
            Err(FrameError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_frames_ahead_of_corrupt_header() {
        let mut buffer = FrameBuffer::new(LengthConvention::PayloadOnly);
        let mut bytes = make_frame_bytes(Command::Echo, b"ok", LengthConvention::PayloadOnly);
        let corrupt = Header::new(Command::Echo.as_u8(), Flags::from_bits(0b0000_0001), 0);
        bytes.extend_from_slice(&corrupt.encode(LengthConvention::PayloadOnly).unwrap());
        buffer.feed(&bytes);

        let frame = buffer.next_frame().unwrap().unwrap();
        assert_eq!(frame.payload(), b"ok");
        assert!(matches!(
            buffer.next_frame(),
            Err(FrameError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = FrameBuffer::new(LengthConvention::PayloadOnly);
        let bytes = make_frame_bytes(Command::Echo, b"test", LengthConvention::PayloadOnly);
        buffer.push(&bytes[..HEADER_SIZE]).unwrap();
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        buffer.clear();

        assert_eq!(buffer.state_name(), "WaitingForHeader");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new(LengthConvention::IncludesSelf);
        let bytes = make_frame_bytes(Command::Echo, b"hi", LengthConvention::IncludesSelf);

        let mut all_frames = Vec::new();
        for byte in &bytes {
            all_frames.extend(buffer.push(&[*byte]).unwrap());
        }

        assert_eq!(all_frames.len(), 1);
        assert_eq!(&all_frames[0].payload[..], b"hi");
    }
}
