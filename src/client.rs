//! Protocol client for talking to a switch.
//!
//! The [`SwitchClientBuilder`] configures the wire convention, the payload
//! codec for typed commands and the writer limits. The [`SwitchClient`]
//! owns the connection:
//! 1. A writer task sends frames (same writer as the switch side)
//! 2. A reader task splits inbound frames into RESULT responses, heartbeat
//!    responses and data frames forwarded by other endpoints
//! 3. Requests wait for the next response, one at a time
//! 4. Optionally, a heartbeat task keeps an idle connection alive
//!
//! # Example
//!
//! ```ignore
//! use msgswitch::client::SwitchClient;
//! use msgswitch::codec::CommandRegister;
//!
//! let mut client = SwitchClient::builder().connect("127.0.0.1:6380").await?;
//! let id = client
//!     .register(CommandRegister {
//!         role: "endpoint".into(),
//!         access_code: "secret".into(),
//!         ..Default::default()
//!     })
//!     .await?;
//! client.publish(b"hello".as_slice()).await?;
//! ```

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::codec::{CommandPayload, CommandRegister, CommandRegisterResult, PayloadCodec};
use crate::endpoint::EndpointId;
use crate::error::{ProtocolError, Result, SwitchError};
use crate::protocol::{
    build_heartbeat_request, result_codec, Codec, Command, Frame, FrameBuffer, LengthConvention,
    PublishingMessage, ResultMessage, ServiceMessage, MAX_PAYLOAD_SIZE,
};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

/// Default time to wait for the switch to answer a request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Data frames buffered before new ones are dropped.
pub const DEFAULT_DATA_CAPACITY: usize = 1024;

/// Builder for a [`SwitchClient`].
#[derive(Debug, Clone)]
pub struct SwitchClientBuilder {
    convention: LengthConvention,
    codec: Codec,
    request_timeout: Duration,
    data_capacity: usize,
    heartbeat_interval: Option<Duration>,
    writer_config: WriterConfig,
}

impl SwitchClientBuilder {
    pub fn new() -> Self {
        Self {
            convention: LengthConvention::PayloadOnly,
            codec: Codec::Json,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            data_capacity: DEFAULT_DATA_CAPACITY,
            heartbeat_interval: None,
            writer_config: WriterConfig::default(),
        }
    }

    /// Must match the switch's `length_includes_self`.
    pub fn length_includes_self(mut self, including_self: bool) -> Self {
        self.convention = LengthConvention::from_including_self(including_self);
        self
    }

    /// Codec for typed command payloads.
    ///
    /// Default: JSON
    pub fn codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Default: 10 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Number of unread data frames kept before dropping.
    pub fn data_capacity(mut self, capacity: usize) -> Self {
        self.data_capacity = capacity.max(1);
        self
    }

    /// Send a heartbeat every `interval` so the switch does not close an
    /// idle connection. Keep it well below the switch's heartbeat timeout.
    ///
    /// Default: disabled
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval).filter(|i| !i.is_zero());
        self
    }

    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.writer_config.max_pending_frames = limit;
        self
    }

    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.writer_config.backpressure_timeout = timeout;
        self
    }

    /// Connect to a switch over TCP.
    pub async fn connect(self, addr: impl ToSocketAddrs) -> Result<SwitchClient> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(self.attach(reader, writer))
    }

    /// Run the client over an already connected byte stream.
    pub fn attach<R, W>(self, reader: R, writer: W) -> SwitchClient
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer, writer_task) = spawn_writer_task(writer, self.writer_config);
        let (responses_tx, responses) = mpsc::channel(16);
        let (heartbeats_tx, heartbeats) = mpsc::channel(4);
        let (data_tx, data) = mpsc::channel(self.data_capacity);

        let convention = self.convention;
        let channels = Inbound {
            responses: responses_tx,
            heartbeats: heartbeats_tx,
            data: data_tx,
        };
        let reader_task = tokio::spawn(async move {
            if let Err(e) = read_loop(reader, convention, channels).await {
                tracing::error!("client read loop error: {}", e);
            }
        });

        let keepalive = self
            .heartbeat_interval
            .map(|interval| Keepalive::spawn(writer.clone(), convention, interval));

        SwitchClient {
            writer,
            convention,
            codec: self.codec,
            request_timeout: self.request_timeout,
            responses,
            heartbeats,
            data,
            endpoint_id: None,
            keepalive,
            reader_task,
            writer_task,
        }
    }
}

impl Default for SwitchClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A connection to a switch.
///
/// Requests take `&mut self`: the switch answers in order, so at most one
/// request is outstanding.
pub struct SwitchClient {
    writer: WriterHandle,
    convention: LengthConvention,
    codec: Codec,
    request_timeout: Duration,
    responses: mpsc::Receiver<Frame>,
    heartbeats: mpsc::Receiver<Frame>,
    data: mpsc::Receiver<Frame>,
    endpoint_id: Option<EndpointId>,
    keepalive: Option<Keepalive>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<Result<()>>,
}

impl SwitchClient {
    pub fn builder() -> SwitchClientBuilder {
        SwitchClientBuilder::new()
    }

    /// Id assigned by the last successful [`SwitchClient::register`].
    pub fn endpoint_id(&self) -> Option<EndpointId> {
        self.endpoint_id
    }

    /// Send a frame without waiting for anything.
    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        let outbound = OutboundFrame::encode(frame, self.convention)?;
        self.writer.send(outbound).await
    }

    /// Send a frame and wait for the next RESULT frame.
    pub async fn request_frame(&mut self, frame: &Frame) -> Result<Frame> {
        self.send_frame(frame).await?;
        tokio::time::timeout(self.request_timeout, self.responses.recv())
            .await
            .map_err(|_| SwitchError::Timeout("response"))?
            .ok_or(SwitchError::ConnectionClosed)
    }

    /// Run a command and return the data of a successful RESULT.
    ///
    /// A nonzero errcode becomes [`SwitchError::CommandFailed`].
    pub async fn call(&mut self, command: Command, codec: Codec, payload: Bytes) -> Result<Bytes> {
        let reply = self
            .request_frame(&Frame::request(command, codec, payload))
            .await?;
        if reply.command_value() != command.as_u8() {
            return Err(ProtocolError::MalformedPayload(format!(
                "expected RESULT for command {}, got command {}",
                command.as_u8(),
                reply.command_value()
            ))
            .into());
        }

        let result = ResultMessage::parse(reply.payload())?;
        if !result.is_ok() {
            return Err(SwitchError::CommandFailed {
                errcode: result.errcode,
                message: result.message().into_owned(),
            });
        }
        Ok(reply.payload.slice(ResultMessage::SIZE..))
    }

    /// Run a command with a typed payload and typed result.
    pub async fn request<T, R>(&mut self, command: Command, payload: &T) -> Result<R>
    where
        T: CommandPayload,
        R: CommandPayload,
    {
        let codec = self.codec;
        let encoded = PayloadCodec::encode(codec, payload)?;
        let data = self.call(command, codec, encoded).await?;
        Ok(PayloadCodec::decode(result_codec(codec), &data)?)
    }

    /// Run a command with a typed payload whose RESULT carries no data.
    pub async fn command<T: CommandPayload>(&mut self, command: Command, payload: &T) -> Result<()> {
        let codec = self.codec;
        let encoded = PayloadCodec::encode(codec, payload)?;
        self.call(command, codec, encoded).await?;
        Ok(())
    }

    /// Register with the switch and remember the assigned id.
    pub async fn register(&mut self, request: CommandRegister) -> Result<EndpointId> {
        let reply: CommandRegisterResult = self.request(Command::Reg, &request).await?;
        let id = EndpointId::try_from(reply.id).map_err(|_| {
            SwitchError::from(ProtocolError::MalformedPayload(format!(
                "assigned id {} out of range",
                reply.id
            )))
        })?;
        self.endpoint_id = Some(id);
        Ok(id)
    }

    pub async fn echo(&mut self, payload: impl Into<Bytes>) -> Result<Bytes> {
        self.call(Command::Echo, Codec::None, payload.into()).await
    }

    /// Send a heartbeat and wait for the switch's heartbeat response.
    pub async fn heartbeat(&mut self) -> Result<()> {
        // Drop answers to keepalive heartbeats.
        while self.heartbeats.try_recv().is_ok() {}

        self.send_frame(&build_heartbeat_request()).await?;
        tokio::time::timeout(self.request_timeout, self.heartbeats.recv())
            .await
            .map_err(|_| SwitchError::Timeout("heartbeat"))?
            .map(|_| ())
            .ok_or(SwitchError::ConnectionClosed)
    }

    /// `PUBLISH` to this endpoint's forward targets.
    pub async fn publish(&mut self, body: impl Into<Bytes>) -> Result<()> {
        self.call(Command::Publish, Codec::None, body.into()).await?;
        Ok(())
    }

    /// `PUBLISH_2` to explicit targets, or to subscribers of `msg_type`
    /// when `targets` is empty.
    pub async fn publish_typed(
        &mut self,
        msg_type: u8,
        targets: &[EndpointId],
        body: &[u8],
    ) -> Result<()> {
        let source = self.endpoint_id.unwrap_or(0);
        let payload = PublishingMessage::encode(msg_type, source, targets, body);
        self.call(Command::Publish2, Codec::None, payload).await?;
        Ok(())
    }

    /// `SVC` request or reply.
    pub async fn service(&mut self, message: ServiceMessage, body: &[u8]) -> Result<()> {
        self.call(Command::Svc, Codec::None, message.encode(body))
            .await?;
        Ok(())
    }

    /// Next data frame forwarded by the switch; `None` once the connection
    /// is gone.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.data.recv().await
    }

    /// Next data frame if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.data.try_recv().ok()
    }

    pub fn is_backpressure_active(&self) -> bool {
        self.writer.is_backpressure_active()
    }

    /// Flush pending frames and close the connection.
    pub async fn close(self) -> Result<()> {
        let Self {
            writer,
            keepalive,
            reader_task,
            writer_task,
            ..
        } = self;
        if let Some(keepalive) = keepalive {
            keepalive.stop().await;
        }
        drop(writer);
        let flushed = writer_task.await.unwrap_or(Ok(()));
        reader_task.abort();
        flushed
    }
}

/// Periodic heartbeat sender; stops when dropped or on [`Keepalive::stop`].
struct Keepalive {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Keepalive {
    fn spawn(writer: WriterHandle, convention: LengthConvention, interval: Duration) -> Self {
        let (stop, mut stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + interval, interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stopped => return,
                    _ = ticks.tick() => {}
                }
                let sent = match OutboundFrame::encode(&build_heartbeat_request(), convention) {
                    Ok(frame) => writer.send(frame).await,
                    Err(e) => Err(e.into()),
                };
                if let Err(e) = sent {
                    tracing::debug!(error = %e, "heartbeat stopped");
                    return;
                }
            }
        });
        Self { stop, task }
    }

    async fn stop(self) {
        drop(self.stop);
        let _ = self.task.await;
    }
}

/// Destinations for inbound frames.
struct Inbound {
    responses: mpsc::Sender<Frame>,
    heartbeats: mpsc::Sender<Frame>,
    data: mpsc::Sender<Frame>,
}

/// Read frames and route them to the response, heartbeat or data channel.
async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: R,
    convention: LengthConvention,
    inbound: Inbound,
) -> Result<()> {
    let mut frame_buffer = FrameBuffer::with_max_payload(convention, MAX_PAYLOAD_SIZE);
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        for frame in frame_buffer.push(&buf[..n])? {
            if frame.is_response() && frame.command() == Some(Command::Heartbeat) {
                // Never taken as the answer to a pending request.
                let _ = inbound.heartbeats.try_send(frame);
            } else if frame.is_response() {
                if inbound.responses.send(frame).await.is_err() {
                    return Ok(());
                }
            } else if let Err(mpsc::error::TrySendError::Full(frame)) = inbound.data.try_send(frame) {
                tracing::warn!(
                    command = frame.command_value(),
                    "data buffer full, dropping frame"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CommandForward;
    use std::collections::VecDeque;
    use crate::protocol::{build_result, ERRCODE_FAILED, ERRCODE_OK};
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

    /// Fake switch on the other end of a duplex pipe.
    struct Peer {
        stream: DuplexStream,
        buffer: FrameBuffer,
        pending: VecDeque<Frame>,
    }

    impl Peer {
        async fn next(&mut self) -> Frame {
            let mut buf = [0u8; 1024];
            loop {
                if let Some(frame) = self.pending.pop_front() {
                    return frame;
                }
                let n = self.stream.read(&mut buf).await.unwrap();
                assert!(n > 0, "client hung up");
                self.pending.extend(self.buffer.push(&buf[..n]).unwrap());
            }
        }

        async fn write(&mut self, frame: Frame) {
            let bytes = frame.encode(LengthConvention::PayloadOnly).unwrap();
            self.stream.write_all(&bytes).await.unwrap();
        }
    }

    fn pair() -> (SwitchClient, Peer) {
        let (client_side, switch_side) = duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(client_side);
        let client = SwitchClient::builder()
            .request_timeout(Duration::from_secs(2))
            .attach(reader, writer);
        let peer = Peer {
            stream: switch_side,
            buffer: FrameBuffer::new(LengthConvention::PayloadOnly),
            pending: VecDeque::new(),
        };
        (client, peer)
    }

    #[tokio::test]
    async fn test_register_records_id() {
        let (mut client, mut peer) = pair();

        let server = tokio::spawn(async move {
            let request = peer.next().await;
            assert_eq!(request.command(), Some(Command::Reg));
            assert_eq!(request.codec(), Codec::Json);
            let cmd: CommandRegister = serde_json::from_slice(request.payload()).unwrap();
            assert_eq!(cmd.role, "endpoint");
            peer.write(build_result(
                Command::Reg.as_u8(),
                Codec::Json,
                ERRCODE_OK,
                br#"{"id":9}"#,
            ))
            .await;
            peer
        });

        let id = client
            .register(CommandRegister {
                role: "endpoint".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(id, 9);
        assert_eq!(client.endpoint_id(), Some(9));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_result_is_error() {
        let (mut client, mut peer) = pair();

        tokio::spawn(async move {
            let _ = peer.next().await;
            peer.write(build_result(
                Command::Fwd.as_u8(),
                Codec::Json,
                ERRCODE_FAILED,
                b"endpoint not registered",
            ))
            .await;
            peer
        });

        let err = client
            .command(Command::Fwd, &CommandForward { targets: vec![2] })
            .await
            .unwrap_err();
        match err {
            SwitchError::CommandFailed { errcode, message } => {
                assert_eq!(errcode, 1);
                assert_eq!(message, "endpoint not registered");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_data_frames_kept_apart_from_results() {
        let (mut client, mut peer) = pair();

        tokio::spawn(async move {
            let _ = peer.next().await;
            // Forwarded data arrives before the RESULT.
            peer.write(Frame::request(
                Command::Publish,
                Codec::None,
                Bytes::from_static(b"from-2"),
            ))
            .await;
            peer.write(build_result(Command::Echo.as_u8(), Codec::None, ERRCODE_OK, b"pong"))
                .await;
            peer
        });

        let echoed = client.echo(Bytes::from_static(b"pong")).await.unwrap();
        assert_eq!(&echoed[..], b"pong");

        let data = client.recv().await.unwrap();
        assert_eq!(data.command(), Some(Command::Publish));
        assert_eq!(data.payload(), b"from-2");
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let (client, peer) = pair();
        let mut client = SwitchClient {
            request_timeout: Duration::from_millis(50),
            ..client
        };

        let err = client.echo(Bytes::new()).await.unwrap_err();
        assert!(matches!(err, SwitchError::Timeout("response")));
        drop(peer);
    }

    #[tokio::test]
    async fn test_closed_connection() {
        let (mut client, peer) = pair();
        drop(peer);

        let err = client.heartbeat().await.unwrap_err();
        assert!(matches!(
            err,
            SwitchError::ConnectionClosed | SwitchError::Io(_)
        ));
    }

    #[tokio::test]
    async fn test_result_for_other_command_is_error() {
        let (mut client, mut peer) = pair();

        tokio::spawn(async move {
            let _ = peer.next().await;
            peer.write(build_result(Command::Reg.as_u8(), Codec::None, ERRCODE_OK, b""))
                .await;
            peer
        });

        let err = client.echo(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(
            err,
            SwitchError::Protocol(ProtocolError::MalformedPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_keepalive_heartbeats_do_not_answer_requests() {
        let (client_side, switch_side) = duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(client_side);
        let mut client = SwitchClient::builder()
            .request_timeout(Duration::from_secs(2))
            .heartbeat_interval(Duration::from_millis(20))
            .attach(reader, writer);
        let mut peer = Peer {
            stream: switch_side,
            buffer: FrameBuffer::new(LengthConvention::PayloadOnly),
            pending: VecDeque::new(),
        };

        let server = tokio::spawn(async move {
            let mut heartbeats = 0;
            loop {
                let frame = peer.next().await;
                match frame.command() {
                    Some(Command::Heartbeat) => {
                        heartbeats += 1;
                        peer.write(crate::protocol::build_heartbeat_response()).await;
                    }
                    Some(Command::Echo) => {
                        // Let a few keepalive answers queue up first.
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        peer.write(build_result(
                            Command::Echo.as_u8(),
                            Codec::None,
                            ERRCODE_OK,
                            frame.payload(),
                        ))
                        .await;
                        return (peer, heartbeats);
                    }
                    other => panic!("unexpected command: {other:?}"),
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        let echoed = client.echo(Bytes::from_static(b"still here")).await.unwrap();
        assert_eq!(&echoed[..], b"still here");

        let (_peer, heartbeats) = server.await.unwrap();
        assert!(heartbeats >= 2, "only {heartbeats} heartbeats sent");
        assert!(client.try_recv().is_none());
        client.close().await.unwrap();
    }

    #[test]
    fn test_builder_configuration() {
        let builder = SwitchClient::builder()
            .length_includes_self(true)
            .codec(Codec::Protobuf)
            .request_timeout(Duration::from_secs(3))
            .heartbeat_interval(Duration::from_secs(5))
            .max_pending_frames(8);

        assert_eq!(builder.convention, LengthConvention::IncludesSelf);
        assert_eq!(builder.codec, Codec::Protobuf);
        assert_eq!(builder.request_timeout, Duration::from_secs(3));
        assert_eq!(builder.heartbeat_interval, Some(Duration::from_secs(5)));
        assert_eq!(builder.writer_config.max_pending_frames, 8);
        assert_eq!(
            SwitchClient::builder()
                .heartbeat_interval(Duration::ZERO)
                .heartbeat_interval,
            None
        );
    }
}
