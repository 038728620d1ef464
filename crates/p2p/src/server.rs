//! The listener and outbound connector.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::session::{Direction, Session, SessionConfig};
use crate::{P2pError, Result};

/// Accepts inbound peers and dials outbound ones, one [`Session`] each.
pub struct PeerServer {
    session: Arc<Session>,
}

impl PeerServer {
    /// A server spawning sessions from the given factory.
    pub fn new(session: Session) -> Self {
        Self {
            session: Arc::new(session),
        }
    }

    /// Bind the listener and run the accept loop until cancelled.
    ///
    /// Binding is init-time: a failure here is fatal to the caller, while
    /// per-session errors only ever kill their session.
    pub async fn listen(&self, addr: SocketAddr, cancel: CancellationToken) -> Result<JoinHandle<()>> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %addr, "listening for peers");

        let session = Arc::clone(&self.session);
        let handle = tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = cancel.cancelled() => return,
                    accepted = listener.accept() => accepted,
                };

                match accepted {
                    Ok((stream, peer)) => {
                        let session = Arc::clone(&session);
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            if let Err(e) = session.run(stream, Direction::Inbound, cancel).await {
                                match e {
                                    P2pError::Cancelled => {}
                                    e => warn!(peer = %peer, error = %e, "inbound session ended"),
                                }
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                }
            }
        });
        Ok(handle)
    }

    /// Dial a peer and run its session in the background.
    pub fn connect(&self, addr: SocketAddr, cancel: CancellationToken) -> JoinHandle<()> {
        let session = Arc::clone(&self.session);
        tokio::spawn(async move {
            let stream = match TcpStream::connect(addr).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(peer = %addr, error = %e, "dial failed");
                    return;
                }
            };
            if let Err(e) = session.run(stream, Direction::Outbound, cancel).await {
                match e {
                    P2pError::Cancelled => {}
                    e => warn!(peer = %addr, error = %e, "outbound session ended"),
                }
            }
        })
    }

    /// The session configuration in use.
    pub fn config(&self) -> &SessionConfig {
        &self.session.config
    }
}
