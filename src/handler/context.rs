//! Context and reply types for command handlers.
//!
//! Handlers are synchronous: they get a [`CommandContext`] borrowing the
//! switch, the requesting connection and the inbound frame, and return a
//! [`Reply`] that the dispatcher turns into the RESULT frame.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use crate::codec::{CommandPayload, PayloadCodec};
use crate::connection::Connection;
use crate::endpoint::{EndpointRef, RegisterError};
use crate::error::{ProtocolError, SwitchError};
use crate::protocol::{result_codec, Codec, Frame};
use crate::switch::SwitchContext;
use crate::writer::OutboundFrame;

/// Everything a handler may look at or act on.
pub struct CommandContext<'a> {
    switch: &'a SwitchContext,
    connection: &'a Arc<Connection>,
    sender: Option<EndpointRef>,
    frame: &'a Frame,
}

impl<'a> CommandContext<'a> {
    pub fn new(
        switch: &'a SwitchContext,
        connection: &'a Arc<Connection>,
        sender: Option<EndpointRef>,
        frame: &'a Frame,
    ) -> Self {
        Self {
            switch,
            connection,
            sender,
            frame,
        }
    }

    #[inline]
    pub fn switch(&self) -> &'a SwitchContext {
        self.switch
    }

    #[inline]
    pub fn connection(&self) -> &'a Arc<Connection> {
        self.connection
    }

    /// Registered sender, if any.
    #[inline]
    pub fn sender(&self) -> Option<EndpointRef> {
        self.sender
    }

    /// Registered sender, or [`ProtocolError::UnregisteredSender`].
    pub fn require_sender(&self) -> Result<EndpointRef, CommandError> {
        self.sender
            .ok_or(CommandError::Protocol(ProtocolError::UnregisteredSender))
    }

    #[inline]
    pub fn frame(&self) -> &'a Frame {
        self.frame
    }

    /// Codec of the request frame.
    #[inline]
    pub fn codec(&self) -> Codec {
        self.frame.codec()
    }

    /// Encode a frame for other connections with the switch's convention.
    pub fn outbound(&self, frame: &Frame) -> Result<OutboundFrame, CommandError> {
        OutboundFrame::encode(frame, self.switch.convention())
            .map_err(|e| CommandError::Switch(e.into()))
    }

    /// Success reply carrying `value` in the RESULT codec.
    pub fn reply<T: CommandPayload>(&self, value: &T) -> Result<Reply, CommandError> {
        let data = PayloadCodec::encode(result_codec(self.codec()), value)?;
        Ok(Reply::Data(data))
    }
}

/// What the dispatcher sends back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// RESULT with `errcode=0` and this data.
    Data(Bytes),
    /// Response-flagged `HEARTBEAT` with an empty payload, no RESULT.
    Heartbeat,
}

impl Reply {
    /// RESULT with `errcode=0` and no data.
    pub fn empty() -> Self {
        Self::Data(Bytes::new())
    }
}

/// Why a command failed. Reported as RESULT `errcode=1` with the message.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Register(#[from] RegisterError),

    #[error(transparent)]
    Switch(#[from] SwitchError),

    #[error("{0}")]
    Failed(String),
}

impl CommandError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CommandRegisterResult;
    use crate::config::SwitchConfig;
    use crate::protocol::Command;
    use crate::writer::{WriterConfig, WriterHandle};

    fn fixture(codec: Codec) -> (Arc<SwitchContext>, Arc<Connection>, Frame) {
        let switch = SwitchContext::new(&SwitchConfig::default(), None);
        let (writer, _rx) = WriterHandle::detached(&WriterConfig::default());
        let connection = Connection::new(1, "peer", writer);
        let frame = Frame::request(Command::Reg, codec, Bytes::new());
        (switch, connection, frame)
    }

    #[test]
    fn test_reply_uses_result_codec() {
        let (switch, connection, frame) = fixture(Codec::None);
        let ctx = CommandContext::new(&switch, &connection, None, &frame);

        let reply = ctx.reply(&CommandRegisterResult { id: 3 }).unwrap();
        assert_eq!(reply, Reply::Data(Bytes::from_static(br#"{"id":3}"#)));
    }

    #[test]
    fn test_require_sender() {
        let (switch, connection, frame) = fixture(Codec::Json);
        let ctx = CommandContext::new(&switch, &connection, None, &frame);

        let err = ctx.require_sender().unwrap_err();
        assert_eq!(err.to_string(), "endpoint not registered");
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            CommandError::from(RegisterError::IdInUse(4)).to_string(),
            "endpoint id 4 already in use"
        );
        assert_eq!(CommandError::failed("no route").to_string(), "no route");
        assert_eq!(
            CommandError::from(ProtocolError::UnsupportedCodec).to_string(),
            "Unsupported codec of message payload"
        );
    }
}
