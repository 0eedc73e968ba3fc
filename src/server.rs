//! TCP front end of the switch.
//!
//! One task per accepted connection reads bytes, cuts them into frames and
//! dispatches each frame in order. Writes go through the connection's writer
//! task. A connection ends when the peer hangs up, when the switch closes it
//! (kickout), on a framing error, or when it misses its registration or
//! heartbeat deadline.
//!
//! # Example
//!
//! ```ignore
//! use msgswitch::{SwitchConfig, SwitchContext, SwitchServer};
//!
//! let config = SwitchConfig::default().admin_code("secret");
//! let switch = SwitchContext::new(&config, None);
//! let server = SwitchServer::bind(&config, switch).await?;
//! server.run_until(async { tokio::signal::ctrl_c().await.ok(); }).await?;
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::SwitchConfig;
use crate::connection::{Connection, ConnectionId};
use crate::error::{Result, SwitchError};
use crate::handler::dispatch;
use crate::protocol::FrameBuffer;
use crate::switch::SwitchContext;
use crate::writer::{spawn_writer_task, WriterConfig};

/// Size of the per-connection read buffer.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Per-connection limits taken from the configuration at bind time.
#[derive(Debug, Clone)]
struct ConnectionLimits {
    writer: WriterConfig,
    max_payload_size: usize,
    register_timeout: Duration,
    heartbeat_timeout: Duration,
}

/// A bound, not yet running switch listener.
pub struct SwitchServer {
    listener: TcpListener,
    switch: Arc<SwitchContext>,
    limits: ConnectionLimits,
}

impl SwitchServer {
    /// Bind the listen address from `config`.
    pub async fn bind(config: &SwitchConfig, switch: Arc<SwitchContext>) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen).await?;
        tracing::info!(
            addr = %listener.local_addr()?,
            mode = %config.mode,
            length_includes_self = config.length_includes_self,
            "switch listening"
        );
        Ok(Self {
            listener,
            switch,
            limits: ConnectionLimits {
                writer: config.writer_config(),
                max_payload_size: config.max_payload_size,
                register_timeout: config.register_timeout_duration(),
                heartbeat_timeout: config.heartbeat_timeout_duration(),
            },
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn switch(&self) -> &Arc<SwitchContext> {
        &self.switch
    }

    /// Accept connections forever.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` completes, then tell every
    /// connection task to stop.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut next_id: ConnectionId = 0;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("switch shutting down");
                    let _ = stop_tx.send(true);
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    next_id += 1;
                    tokio::spawn(serve_connection(
                        Arc::clone(&self.switch),
                        stream,
                        peer,
                        next_id,
                        self.limits.clone(),
                        stop_rx.clone(),
                    ));
                }
            }
        }
    }
}

/// Own one connection from accept to close.
async fn serve_connection(
    switch: Arc<SwitchContext>,
    stream: TcpStream,
    peer: SocketAddr,
    id: ConnectionId,
    limits: ConnectionLimits,
    mut stop: watch::Receiver<bool>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(conn = id, error = %e, "set_nodelay failed");
    }
    let (mut reader, write_half) = stream.into_split();
    let (writer, _writer_task) = spawn_writer_task(write_half, limits.writer.clone());
    let connection = Connection::new(id, peer.to_string(), writer);

    switch.registry().connection_opened(id);
    tracing::info!(conn = id, %peer, "connection opened");

    match read_loop(&switch, &connection, &mut reader, &limits, &mut stop).await {
        Ok(reason) => tracing::info!(conn = id, reason, "connection closed"),
        Err(SwitchError::Timeout(what)) => {
            tracing::warn!(conn = id, %peer, "connection dropped: {} timeout", what)
        }
        Err(e) => tracing::error!(conn = id, %peer, error = %e, "connection failed"),
    }

    if let Some(endpoint) = switch.on_close(&connection) {
        tracing::info!(conn = id, endpoint = endpoint.id, role = %endpoint.role, "endpoint left");
    }
}

/// Read and dispatch frames until the connection should end.
///
/// Returns why it ended when that is a normal close.
async fn read_loop(
    switch: &SwitchContext,
    connection: &Arc<Connection>,
    reader: &mut OwnedReadHalf,
    limits: &ConnectionLimits,
    stop: &mut watch::Receiver<bool>,
) -> Result<&'static str> {
    let mut frame_buffer =
        FrameBuffer::with_max_payload(switch.convention(), limits.max_payload_size);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut closed = connection.close_signal();
    let mut registered = false;
    let mut deadline = Instant::now() + limits.register_timeout;

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    return Ok("peer closed");
                }

                frame_buffer.feed(&buf[..n]);
                // Frames before a corrupt header are still answered.
                while let Some(frame) = frame_buffer.next_frame()? {
                    if let Err(e) = dispatch(switch, connection, frame).await {
                        if connection.is_closed() {
                            return Ok("closed by switch");
                        }
                        return Err(e);
                    }
                }

                if !registered {
                    registered = switch.registry().resolve(connection.id()).is_some();
                }
                // Unregistered connections keep their original deadline.
                if registered {
                    deadline = Instant::now() + limits.heartbeat_timeout;
                }
            }
            _ = closed.changed() => return Ok("closed by switch"),
            _ = stop.changed() => return Ok("switch shutting down"),
            _ = tokio::time::sleep_until(deadline) => {
                if registered {
                    return Err(SwitchError::Timeout("heartbeat"));
                }
                switch.registry().connection_rejected();
                return Err(SwitchError::Timeout("registration"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Codec, Command, Flags, Frame, Header, LengthConvention, ResultMessage};
    use bytes::Bytes;
    use tokio::io::AsyncWriteExt;

    async fn start(config: SwitchConfig) -> (SocketAddr, Arc<SwitchContext>) {
        let config = config.listen("127.0.0.1:0");
        let switch = SwitchContext::new(&config, None);
        let server = SwitchServer::bind(&config, Arc::clone(&switch)).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        (addr, switch)
    }

    async fn read_frame(stream: &mut TcpStream, convention: LengthConvention) -> Option<Frame> {
        let mut buffer = FrameBuffer::new(convention);
        let mut buf = [0u8; 1024];
        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return None,
                Ok(n) => n,
            };
            if let Some(frame) = buffer.push(&buf[..n]).unwrap().into_iter().next() {
                return Some(frame);
            }
        }
    }

    #[tokio::test]
    async fn test_echo_over_tcp() {
        let (addr, _switch) = start(SwitchConfig::default()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let frame = Frame::request(Command::Echo, Codec::None, Bytes::from_static(b"hi"));
        let bytes = frame.encode(LengthConvention::PayloadOnly).unwrap();
        stream.write_all(&bytes).await.unwrap();

        let reply = read_frame(&mut stream, LengthConvention::PayloadOnly).await.unwrap();
        let result = ResultMessage::parse(reply.payload()).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.data, b"hi");
    }

    #[tokio::test]
    async fn test_self_inclusive_length() {
        let (addr, _switch) = start(SwitchConfig::default().length_includes_self(true)).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let frame = Frame::request(Command::Echo, Codec::None, Bytes::from_static(b"abc"));
        let bytes = frame.encode(LengthConvention::IncludesSelf).unwrap();
        stream.write_all(&bytes).await.unwrap();

        let reply = read_frame(&mut stream, LengthConvention::IncludesSelf).await.unwrap();
        assert_eq!(ResultMessage::parse(reply.payload()).unwrap().data, b"abc");
    }

    #[tokio::test]
    async fn test_register_timeout_closes_connection() {
        let config = SwitchConfig::default().register_timeout(Duration::from_secs(1));
        let (addr, switch) = start(config).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let closed = tokio::time::timeout(
            Duration::from_secs(5),
            read_frame(&mut stream, LengthConvention::PayloadOnly),
        )
        .await
        .unwrap();
        assert!(closed.is_none());

        let counters = switch.registry().counters().clone();
        assert_eq!(counters.rejected_connections, 1);
        assert_eq!(counters.pending_connections, 0);
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_connection() {
        let config = SwitchConfig::default().max_payload_size(8);
        let (addr, _switch) = start(config).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let frame = Frame::request(Command::Echo, Codec::None, Bytes::from(vec![0u8; 32]));
        stream
            .write_all(&frame.encode(LengthConvention::PayloadOnly).unwrap())
            .await
            .unwrap();

        assert!(read_frame(&mut stream, LengthConvention::PayloadOnly).await.is_none());
    }

    #[tokio::test]
    async fn test_frames_before_corrupt_header_answered() {
        let (addr, _switch) = start(SwitchConfig::default()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let frame = Frame::request(Command::Echo, Codec::None, Bytes::from_static(b"first"));
        let mut bytes = frame.encode(LengthConvention::PayloadOnly).unwrap().to_vec();
        // Reserved flag bit set.
        let corrupt = Header::new(Command::Echo.as_u8(), Flags::from_bits(0b0000_0001), 0);
        bytes.extend_from_slice(&corrupt.encode(LengthConvention::PayloadOnly).unwrap());
        stream.write_all(&bytes).await.unwrap();

        let reply = read_frame(&mut stream, LengthConvention::PayloadOnly).await.unwrap();
        assert_eq!(reply.command(), Some(Command::Echo));
        assert_eq!(ResultMessage::parse(reply.payload()).unwrap().data, b"first");
        assert!(read_frame(&mut stream, LengthConvention::PayloadOnly).await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let config = SwitchConfig::default().listen("127.0.0.1:0");
        let switch = SwitchContext::new(&config, None);
        let server = SwitchServer::bind(&config, switch).await.unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let task = tokio::spawn(server.run_until(async {
            let _ = rx.await;
        }));
        tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }
}
