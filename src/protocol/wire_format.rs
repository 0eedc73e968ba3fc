//! Wire format encoding and decoding.
//!
//! Implements the command header:
//! ```text
//! ┌─────────┬───────┬──────────────────┬─────────────────────┐
//! │ Command │ Flags │ Payload length   │ Payload             │
//! │ 1 byte  │ 1 byte│ u16 BE (u32 BE   │ payload_length bytes│
//! │         │       │ with wide-length)│                     │
//! └─────────┴───────┴──────────────────┴─────────────────────┘
//! ```
//!
//! Flags byte:
//! ```text
//!   bit 7      bits 6-5     bits 4-0
//! ┌──────────┬───────────┬──────────┐
//! │ response │   codec   │ reserved │
//! └──────────┴───────────┴──────────┘
//! ```
//!
//! The length field may count its own width ("self-inclusive"). Whether it
//! does is a [`LengthConvention`] fixed per switch instance, and this module
//! is the only place that adds or subtracts that width.

use crate::error::FrameError;

/// Integer type of the payload length field.
#[cfg(not(feature = "wide-length"))]
pub type PayloadLen = u16;

/// Integer type of the payload length field.
#[cfg(feature = "wide-length")]
pub type PayloadLen = u32;

/// Width of the payload length field in bytes.
pub const PAYLOAD_LEN_SIZE: usize = std::mem::size_of::<PayloadLen>();

/// Offset of the payload length field inside the header.
pub const PAYLOAD_LEN_OFFSET: usize = 2;

/// Header size in bytes (fixed at compile time).
pub const HEADER_SIZE: usize = PAYLOAD_LEN_OFFSET + PAYLOAD_LEN_SIZE;

/// Largest logical payload a single frame can carry.
pub const MAX_PAYLOAD_SIZE: usize = PayloadLen::MAX as usize - PAYLOAD_LEN_SIZE;

/// Command identifiers.
///
/// Values are part of the wire format. `HEARTBEAT` and `RESULT` sit at the
/// top of the value space no matter how many ordinary commands exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Command {
    Undefined = 0,
    Echo = 1,
    Reg = 2,
    Fwd = 3,
    Unfwd = 4,
    Sub = 5,
    Unsub = 6,
    Reject = 7,
    Unreject = 8,
    Publish = 9,
    Publish2 = 10,
    Svc = 11,
    Info = 12,
    EpInfo = 13,
    Setup = 14,
    Proxy = 15,
    Kickout = 16,
    Exit = 17,
    Reload = 18,
    Heartbeat = 254,
    Result = 255,
}

impl Command {
    /// Every defined command, in wire order.
    pub const ALL: [Command; 21] = [
        Command::Undefined,
        Command::Echo,
        Command::Reg,
        Command::Fwd,
        Command::Unfwd,
        Command::Sub,
        Command::Unsub,
        Command::Reject,
        Command::Unreject,
        Command::Publish,
        Command::Publish2,
        Command::Svc,
        Command::Info,
        Command::EpInfo,
        Command::Setup,
        Command::Proxy,
        Command::Kickout,
        Command::Exit,
        Command::Reload,
        Command::Heartbeat,
        Command::Result,
    ];

    /// Map a wire value to a command, `None` for unassigned values.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0..=18 => Some(Self::ALL[value as usize]),
            254 => Some(Self::Heartbeat),
            255 => Some(Self::Result),
            _ => None,
        }
    }

    /// Wire value.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Short tag used in logs and INFO output.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Undefined => "UNDEFINED",
            Self::Echo => "ECHO",
            Self::Reg => "REG",
            Self::Fwd => "FWD",
            Self::Unfwd => "UNFWD",
            Self::Sub => "SUB",
            Self::Unsub => "UNSUB",
            Self::Reject => "REJECT",
            Self::Unreject => "UNREJECT",
            Self::Publish => "PUBLISH",
            Self::Publish2 => "PUBLISH_2",
            Self::Svc => "SVC",
            Self::Info => "INFO",
            Self::EpInfo => "EP_INFO",
            Self::Setup => "SETUP",
            Self::Proxy => "PROXY",
            Self::Kickout => "KICKOUT",
            Self::Exit => "EXIT",
            Self::Reload => "RELOAD",
            Self::Heartbeat => "HEARTBEAT",
            Self::Result => "RESULT",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.tag(), self.as_u8())
    }
}

/// Payload codec tag carried in the flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// Raw bytes, no structured encoding.
    None = 0,
    Json = 1,
    Protobuf = 2,
    /// Unassigned value 3.
    Reserved = 3,
}

impl Codec {
    /// Decode the 2-bit codec field.
    #[inline]
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::None,
            1 => Self::Json,
            2 => Self::Protobuf,
            _ => Self::Reserved,
        }
    }

    /// Whether structured payloads can be decoded with this codec.
    #[inline]
    pub fn is_structured(self) -> bool {
        matches!(self, Self::Json | Self::Protobuf)
    }
}

/// Flag bit constants for the protocol.
pub mod flags {
    /// Response flag: RESULT (1) or request (0).
    pub const IS_RESPONSE: u8 = 0b1000_0000;
    /// Codec field mask (bits 5-6).
    pub const CODEC_MASK: u8 = 0b0110_0000;
    /// Codec field shift.
    pub const CODEC_SHIFT: u8 = 5;
    /// Reserved bits mask (bits 0-4).
    pub const RESERVED_MASK: u8 = 0b0001_1111;
}

/// The flags byte, with named accessors over the packed bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u8);

impl Flags {
    /// Request flags with the given codec.
    pub fn request(codec: Codec) -> Self {
        let mut f = Self(0);
        f.set_codec(codec);
        f
    }

    /// Response flags with the given codec.
    pub fn response(codec: Codec) -> Self {
        let mut f = Self::request(codec);
        f.set_response(true);
        f
    }

    /// Wrap a raw flags byte.
    #[inline]
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw flags byte.
    #[inline]
    pub fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub fn codec(self) -> Codec {
        Codec::from_bits((self.0 & flags::CODEC_MASK) >> flags::CODEC_SHIFT)
    }

    #[inline]
    pub fn set_codec(&mut self, codec: Codec) {
        self.0 = (self.0 & !flags::CODEC_MASK) | ((codec as u8) << flags::CODEC_SHIFT);
    }

    #[inline]
    pub fn is_response(self) -> bool {
        self.0 & flags::IS_RESPONSE != 0
    }

    #[inline]
    pub fn set_response(&mut self, response: bool) {
        if response {
            self.0 |= flags::IS_RESPONSE;
        } else {
            self.0 &= !flags::IS_RESPONSE;
        }
    }

    /// Value of the reserved bits (must be zero on the wire).
    #[inline]
    pub fn reserved(self) -> u8 {
        self.0 & flags::RESERVED_MASK
    }
}

/// Whether the wire length field counts its own width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LengthConvention {
    /// `payload_length` is the payload byte count.
    #[default]
    PayloadOnly,
    /// `payload_length` is the payload byte count plus `PAYLOAD_LEN_SIZE`.
    IncludesSelf,
}

impl LengthConvention {
    /// Build from the `is_payload_length_including_self` switch.
    pub fn from_including_self(including_self: bool) -> Self {
        if including_self {
            Self::IncludesSelf
        } else {
            Self::PayloadOnly
        }
    }

    /// Bytes added on top of the logical payload length.
    #[inline]
    pub fn adjustment(self) -> usize {
        match self {
            Self::PayloadOnly => 0,
            Self::IncludesSelf => PAYLOAD_LEN_SIZE,
        }
    }

    /// Logical payload length to the value written on the wire.
    pub fn to_wire(self, logical: usize) -> Result<PayloadLen, FrameError> {
        let wire = logical + self.adjustment();
        PayloadLen::try_from(wire).map_err(|_| FrameError::PayloadTooLarge {
            size: logical,
            max: PayloadLen::MAX as usize - self.adjustment(),
        })
    }

    /// Wire value to the logical payload length.
    pub fn from_wire(self, wire: PayloadLen) -> Result<usize, FrameError> {
        (wire as usize)
            .checked_sub(self.adjustment())
            .ok_or_else(|| {
                FrameError::MalformedHeader(format!(
                    "self-inclusive payload length {} is smaller than its own width {}",
                    wire, PAYLOAD_LEN_SIZE
                ))
            })
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Raw command value (may be unassigned; see [`Command::from_u8`]).
    pub command: u8,
    /// Flags byte.
    pub flags: Flags,
    /// Logical payload length in bytes (never includes the field itself).
    pub payload_length: usize,
}

impl Header {
    /// Create a new header.
    pub fn new(command: u8, flags: Flags, payload_length: usize) -> Self {
        Self {
            command,
            flags,
            payload_length,
        }
    }

    /// Encode header to bytes (network byte order).
    ///
    /// # Example
    ///
    /// ```
    /// use msgswitch::protocol::{Codec, Command, Flags, Header, LengthConvention, HEADER_SIZE};
    ///
    /// let header = Header::new(Command::Echo.as_u8(), Flags::request(Codec::Json), 4);
    /// let bytes = header.encode(LengthConvention::PayloadOnly).unwrap();
    /// assert_eq!(bytes.len(), HEADER_SIZE);
    /// ```
    pub fn encode(&self, convention: LengthConvention) -> Result<[u8; HEADER_SIZE], FrameError> {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf, convention)?;
        Ok(buf)
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE`.
    pub fn encode_into(&self, buf: &mut [u8], convention: LengthConvention) -> Result<(), FrameError> {
        debug_assert!(buf.len() >= HEADER_SIZE);
        let wire_len = convention.to_wire(self.payload_length)?;
        buf[0] = self.command;
        buf[1] = self.flags.bits();
        buf[PAYLOAD_LEN_OFFSET..HEADER_SIZE].copy_from_slice(&wire_len.to_be_bytes());
        Ok(())
    }

    /// Decode header from bytes (network byte order).
    ///
    /// # Example
    ///
    /// ```
    /// use msgswitch::protocol::{Header, LengthConvention, HEADER_SIZE};
    ///
    /// let mut bytes = [0u8; HEADER_SIZE];
    /// bytes[0] = 1;
    /// bytes[HEADER_SIZE - 1] = 7;
    /// let header = Header::decode(&bytes, LengthConvention::PayloadOnly).unwrap();
    /// assert_eq!(header.command, 1);
    /// assert_eq!(header.payload_length, 7);
    /// ```
    pub fn decode(buf: &[u8], convention: LengthConvention) -> Result<Self, FrameError> {
        if buf.len() < HEADER_SIZE {
            return Err(FrameError::Truncated {
                needed: HEADER_SIZE,
                available: buf.len(),
            });
        }
        let mut len_bytes = [0u8; PAYLOAD_LEN_SIZE];
        len_bytes.copy_from_slice(&buf[PAYLOAD_LEN_OFFSET..HEADER_SIZE]);
        let wire_len = PayloadLen::from_be_bytes(len_bytes);

        Ok(Self {
            command: buf[0],
            flags: Flags::from_bits(buf[1]),
            payload_length: convention.from_wire(wire_len)?,
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Payload length doesn't exceed max
    /// - Reserved flag bits are 0
    pub fn validate(&self, max_payload_size: usize) -> Result<(), FrameError> {
        if self.payload_length > max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: self.payload_length,
                max: max_payload_size,
            });
        }

        if self.flags.reserved() != 0 {
            return Err(FrameError::MalformedHeader(
                "Reserved flag bits must be 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Typed command, `None` for unassigned values.
    #[inline]
    pub fn command(&self) -> Option<Command> {
        Command::from_u8(self.command)
    }

    /// Check if this is a response.
    #[inline]
    pub fn is_response(&self) -> bool {
        self.flags.is_response()
    }

    /// Codec tag.
    #[inline]
    pub fn codec(&self) -> Codec {
        self.flags.codec()
    }

    /// Total encoded size (header + payload).
    #[inline]
    pub fn frame_size(&self) -> usize {
        HEADER_SIZE + self.payload_length
    }
}
