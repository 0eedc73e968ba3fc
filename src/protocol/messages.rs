//! Typed views over payload prefixes.
//!
//! `SVC`, `PUBLISH_2` and response frames carry a small fixed header at the
//! start of the payload. The trailing parts (target list, body, result data)
//! are addressed by offset inside the payload slice; nothing here owns a copy
//! of them.
//!
//! ```text
//! ServiceMessage (8 bytes)
//! ┌──────────┬─────────┬────────────┬────────┐
//! │ svc_type │ svc_cmd │ session_id │ source │ body...
//! │ u8       │ u8      │ u32 BE     │ u16 BE │
//! └──────────┴─────────┴────────────┴────────┘
//!
//! PublishingMessage (5 + 2n bytes)
//! ┌──────────┬────────┬──────────────┬────────────────┐
//! │ msg_type │ source │ target_count │ targets[n]     │ body...
//! │ u8       │ u16 BE │ u16 BE       │ u16 BE each    │
//! └──────────┴────────┴──────────────┴────────────────┘
//!
//! ResultMessage (1 byte)
//! ┌─────────┐
//! │ errcode │ data...
//! │ i8      │
//! └─────────┘
//! ```

use std::borrow::Cow;

use bytes::{BufMut, Bytes, BytesMut};

use crate::endpoint::EndpointId;
use crate::error::ProtocolError;

/// Routing prefix of an `SVC` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceMessage {
    /// Service type used for routing; 0 addresses every service.
    pub svc_type: u8,
    /// Command understood by the service.
    pub svc_cmd: u8,
    /// Correlates a service reply with its request.
    pub session_id: u32,
    /// Requesting endpoint.
    pub source: EndpointId,
}

impl ServiceMessage {
    /// Encoded size of the prefix.
    pub const SIZE: usize = 8;
    const SOURCE_OFFSET: usize = 6;

    /// Parse the prefix, returning it together with the body slice.
    pub fn parse(payload: &[u8]) -> Result<(Self, &[u8]), ProtocolError> {
        if payload.len() < Self::SIZE {
            return Err(ProtocolError::MalformedPayload(format!(
                "service message needs {} bytes, got {}",
                Self::SIZE,
                payload.len()
            )));
        }
        let msg = Self {
            svc_type: payload[0],
            svc_cmd: payload[1],
            session_id: u32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]]),
            source: u16::from_be_bytes([payload[6], payload[7]]),
        };
        Ok((msg, &payload[Self::SIZE..]))
    }

    /// Encode the prefix followed by `body`.
    pub fn encode(&self, body: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE + body.len());
        buf.put_u8(self.svc_type);
        buf.put_u8(self.svc_cmd);
        buf.put_u32(self.session_id);
        buf.put_u16(self.source);
        buf.put_slice(body);
        buf.freeze()
    }

    /// Copy `payload` with the `source` field overwritten.
    ///
    /// `payload` must already have passed [`ServiceMessage::parse`].
    pub fn stamp_source(payload: &[u8], source: EndpointId) -> Bytes {
        let mut buf = BytesMut::from(payload);
        buf[Self::SOURCE_OFFSET..Self::SIZE].copy_from_slice(&source.to_be_bytes());
        buf.freeze()
    }
}

/// View over a `PUBLISH_2` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishingMessage<'a> {
    /// Application message type, matched against subscriptions.
    pub msg_type: u8,
    /// Publishing endpoint.
    pub source: EndpointId,
    targets: &'a [u8],
    body: &'a [u8],
}

impl<'a> PublishingMessage<'a> {
    /// Size of the fixed part, before the target list.
    pub const FIXED_SIZE: usize = 5;
    const SOURCE_OFFSET: usize = 1;

    /// Parse a payload. The declared target count must fit in the payload.
    pub fn parse(payload: &'a [u8]) -> Result<Self, ProtocolError> {
        if payload.len() < Self::FIXED_SIZE {
            return Err(ProtocolError::MalformedPayload(format!(
                "publishing message needs at least {} bytes, got {}",
                Self::FIXED_SIZE,
                payload.len()
            )));
        }
        let count = u16::from_be_bytes([payload[3], payload[4]]) as usize;
        let targets_end = Self::FIXED_SIZE + count * 2;
        if payload.len() < targets_end {
            return Err(ProtocolError::MalformedPayload(format!(
                "publishing message declares {} targets but carries {} bytes",
                count,
                payload.len()
            )));
        }
        Ok(Self {
            msg_type: payload[0],
            source: u16::from_be_bytes([payload[1], payload[2]]),
            targets: &payload[Self::FIXED_SIZE..targets_end],
            body: &payload[targets_end..],
        })
    }

    /// Number of explicit targets.
    pub fn target_count(&self) -> usize {
        self.targets.len() / 2
    }

    /// Explicit targets, in wire order.
    pub fn targets(&self) -> impl Iterator<Item = EndpointId> + 'a {
        self.targets
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
    }

    /// Published body after the target list.
    pub fn body(&self) -> &'a [u8] {
        self.body
    }

    /// Encode a publishing payload.
    pub fn encode(msg_type: u8, source: EndpointId, targets: &[EndpointId], body: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::FIXED_SIZE + targets.len() * 2 + body.len());
        buf.put_u8(msg_type);
        buf.put_u16(source);
        buf.put_u16(targets.len() as u16);
        for target in targets {
            buf.put_u16(*target);
        }
        buf.put_slice(body);
        buf.freeze()
    }

    /// Copy `payload` with the `source` field overwritten.
    ///
    /// `payload` must already have passed [`PublishingMessage::parse`].
    pub fn stamp_source(payload: &[u8], source: EndpointId) -> Bytes {
        let mut buf = BytesMut::from(payload);
        buf[Self::SOURCE_OFFSET..Self::SOURCE_OFFSET + 2].copy_from_slice(&source.to_be_bytes());
        buf.freeze()
    }
}

/// View over the payload of a response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultMessage<'a> {
    /// 0 on success.
    pub errcode: i8,
    /// Success payload, or UTF-8 error text when `errcode != 0`.
    pub data: &'a [u8],
}

impl<'a> ResultMessage<'a> {
    /// Size of the fixed part.
    pub const SIZE: usize = 1;

    pub fn parse(payload: &'a [u8]) -> Result<Self, ProtocolError> {
        match payload.split_first() {
            Some((errcode, data)) => Ok(Self {
                errcode: *errcode as i8,
                data,
            }),
            None => Err(ProtocolError::MalformedPayload(
                "result message is empty".to_string(),
            )),
        }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.errcode == 0
    }

    /// Error text (lossy for non-UTF-8 data).
    pub fn message(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.data)
    }
}
