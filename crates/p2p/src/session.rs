//! One peer session per TCP connection.
//!
//! `New -> Handshaking -> Ready -> Closed`. In `Ready` two loops run: the
//! reader blocks on framed reads under an idle deadline and hands frames to
//! the processor; the writer drains the per-session FIFO queue and the
//! process-wide gossip stream, sending a keepalive `Ping` when it has been
//! quiet too long. The first error wins and tears both loops down; the
//! caller's cancellation token is observed between frames.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use umbra_bus::EventBus;
use umbra_wire::{
    Frame, Magic, Payload, Topic, VersionMessage, PROTOCOL_VERSION, SERVICE_NODE,
};

use crate::processor::MessageProcessor;
use crate::{P2pError, Result};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connection established, handshake not started
    New,
    /// Version/verack exchange in flight
    Handshaking,
    /// Both loops running
    Ready,
    /// Session over; the socket is gone
    Closed,
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Network magic; a mismatch closes the session immediately
    pub magic: Magic,
    /// Reader idle deadline
    pub idle_timeout: Duration,
    /// Writer inactivity before a keepalive ping
    pub keep_alive: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let idle_timeout = Duration::from_secs(30);
        Self {
            magic: Magic::DevNet,
            idle_timeout,
            keep_alive: idle_timeout / 2,
        }
    }
}

/// Capacity of the per-session response queue.
const WRITE_QUEUE: usize = 256;

/// Whether we dialed or accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We dialed the peer
    Outbound,
    /// The peer dialed us
    Inbound,
}

/// A peer session.
pub struct Session {
    processor: Arc<MessageProcessor>,
    event_bus: Arc<EventBus>,
    pub(crate) config: SessionConfig,
}

impl Session {
    /// A session factory over the shared processor and bus.
    pub fn new(
        processor: Arc<MessageProcessor>,
        event_bus: Arc<EventBus>,
        config: SessionConfig,
    ) -> Self {
        Self {
            processor,
            event_bus,
            config,
        }
    }

    /// Drive a connection to completion.
    ///
    /// Returns when the session closes; the error describes why. A clean
    /// cancellation reports [`P2pError::Cancelled`].
    pub async fn run(
        &self,
        stream: TcpStream,
        direction: Direction,
        cancel: CancellationToken,
    ) -> Result<()> {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".into());
        debug!(peer = %peer, ?direction, "session handshaking");

        let (mut read_half, mut write_half) = stream.into_split();

        // Handshake under the idle deadline.
        let handshake = self.handshake(&mut read_half, &mut write_half, direction);
        match tokio::time::timeout(self.config.idle_timeout, handshake).await {
            Err(_) => return Err(P2pError::Handshake("handshake timed out".into())),
            Ok(Err(e)) => return Err(e),
            Ok(Ok(())) => {}
        }

        info!(peer = %peer, ?direction, "session ready");

        let (queue_tx, queue_rx) = mpsc::channel::<Frame>(WRITE_QUEUE);
        let (err_tx, mut err_rx) = mpsc::channel::<P2pError>(1);

        // Pools converge: ask the peer for its mempool right away.
        if let Ok(frame) = Payload::MemPool.to_frame() {
            let _ = queue_tx.send(frame).await;
        }

        let loop_cancel = cancel.child_token();
        let reader =
            self.spawn_reader(read_half, queue_tx.clone(), err_tx.clone(), loop_cancel.clone());
        let writer = self.spawn_writer(write_half, queue_rx, err_tx, loop_cancel.clone());

        // First error wins; cancellation counts as an orderly close.
        let error = tokio::select! {
            _ = cancel.cancelled() => P2pError::Cancelled,
            error = err_rx.recv() => error.unwrap_or(P2pError::Cancelled),
        };

        loop_cancel.cancel();
        let _ = reader.await;
        let _ = writer.await;

        info!(peer = %peer, error = %error, "session closed");
        Err(error)
    }

    async fn handshake<R, W>(
        &self,
        read: &mut R,
        write: &mut W,
        direction: Direction,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let version = Payload::Version(VersionMessage {
            version: PROTOCOL_VERSION,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
            services: SERVICE_NODE,
        });

        match direction {
            Direction::Outbound => {
                self.send(write, &version).await?;
                self.expect_version(read).await?;
                self.send(write, &Payload::VerAck).await?;
                self.expect(read, Topic::VerAck).await?;
            }
            Direction::Inbound => {
                self.expect_version(read).await?;
                self.send(write, &version).await?;
                self.expect(read, Topic::VerAck).await?;
                self.send(write, &Payload::VerAck).await?;
            }
        }
        Ok(())
    }

    async fn send<W: AsyncWrite + Unpin>(&self, write: &mut W, payload: &Payload) -> Result<()> {
        let frame = payload.to_frame()?;
        frame.write_to(write, self.config.magic).await?;
        Ok(())
    }

    async fn expect_version<R: AsyncRead + Unpin>(&self, read: &mut R) -> Result<()> {
        let frame = self.expect(read, Topic::Version).await?;
        match Payload::decode(Topic::Version, &frame.payload)? {
            Payload::Version(version) => {
                if version.version != PROTOCOL_VERSION {
                    return Err(P2pError::Handshake(format!(
                        "protocol version {} unsupported",
                        version.version
                    )));
                }
                Ok(())
            }
            _ => Err(P2pError::Handshake("malformed version".into())),
        }
    }

    async fn expect<R: AsyncRead + Unpin>(&self, read: &mut R, topic: Topic) -> Result<Frame> {
        // A magic mismatch surfaces here as a wire error and closes the
        // session before it ever reaches Ready.
        let frame = Frame::read_from(read, self.config.magic).await?;
        if frame.topic != topic {
            return Err(P2pError::Handshake(format!(
                "expected {} frame, got {}",
                topic, frame.topic
            )));
        }
        Ok(frame)
    }

    fn spawn_reader<R>(
        &self,
        mut read: R,
        queue_tx: mpsc::Sender<Frame>,
        err_tx: mpsc::Sender<P2pError>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let processor = Arc::clone(&self.processor);
        let magic = self.config.magic;
        let idle = self.config.idle_timeout;

        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = cancel.cancelled() => return,
                    frame = tokio::time::timeout(idle, Frame::read_from(&mut read, magic)) => frame,
                };

                let frame = match frame {
                    Err(_) => {
                        let _ = err_tx.try_send(P2pError::IdleTimeout);
                        return;
                    }
                    // The corrupt frame was consumed whole; the stream is
                    // still aligned, so drop it and keep reading.
                    Ok(Err(umbra_wire::WireError::ChecksumMismatch)) => {
                        warn!("frame with bad checksum dropped");
                        continue;
                    }
                    Ok(Err(e)) => {
                        let _ = err_tx.try_send(e.into());
                        return;
                    }
                    Ok(Ok(frame)) => frame,
                };

                trace!(topic = %frame.topic, bytes = frame.payload.len(), "frame received");

                // Frames within one session are processed in receive order.
                let responses = processor.handle(frame).await;
                for response in responses {
                    if queue_tx.send(response).await.is_err() {
                        return;
                    }
                }
            }
        })
    }

    fn spawn_writer<W>(
        &self,
        mut write: W,
        mut queue_rx: mpsc::Receiver<Frame>,
        err_tx: mpsc::Sender<P2pError>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut gossip_rx = self.event_bus.subscribe(Topic::Gossip);
        let magic = self.config.magic;
        let keep_alive = self.config.keep_alive;

        tokio::spawn(async move {
            enum Out {
                Frame(Frame),
                KeepAlive,
                Done,
            }

            loop {
                let out = tokio::select! {
                    _ = cancel.cancelled() => Out::Done,
                    frame = queue_rx.recv() => frame.map(Out::Frame).unwrap_or(Out::Done),
                    payload = gossip_rx.recv() => match payload {
                        Ok(Payload::Gossip(frame)) => Out::Frame(frame),
                        Ok(_) => continue,
                        Err(e) => {
                            // A lagged gossip stream drops frames for this
                            // peer; the dedup layer absorbs re-requests.
                            warn!(error = %e, "gossip stream lagged");
                            continue;
                        }
                    },
                    _ = tokio::time::sleep(keep_alive) => Out::KeepAlive,
                };

                let frame = match out {
                    Out::Done => return,
                    Out::Frame(frame) => frame,
                    Out::KeepAlive => match Payload::Ping.to_frame() {
                        Ok(frame) => frame,
                        Err(_) => continue,
                    },
                };

                if let Err(e) = frame.write_to(&mut write, magic).await {
                    let _ = err_tx.try_send(e.into());
                    return;
                }
            }
        })
    }
}
