//! TCP server for the minimon daemon.
//!
//! The server:
//! - Owns the listening socket (address reuse on, deliberately tiny backlog)
//! - Spawns one worker task per accepted connection
//! - Shuts down cooperatively via CancellationToken
//!
//! Workers share no state with each other or with the accept loop; each one
//! owns its connection and exits after a single request/response cycle.
//! There is no admission control and no per-request timeout.

mod connection;

pub use connection::{ConnectionError, ConnectionHandler};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::{TcpListener, TcpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use minimon_protocol::DEFAULT_PORT;

/// Listen backlog. Deliberately tiny: one request per connection and no
/// design goal of absorbing bursts.
const BACKLOG: u32 = 3;

/// TCP server accepting one-shot metric requests.
pub struct MetricsServer {
    listener: TcpListener,
    cancel_token: CancellationToken,
    connection_counter: AtomicU64,
}

impl MetricsServer {
    /// Creates the listening socket on all interfaces.
    ///
    /// Address reuse is enabled so a restart immediately after a crash can
    /// bind without waiting out TIME_WAIT. Every setup failure here is fatal
    /// to the daemon; there are no retries.
    pub fn bind(port: u16, cancel_token: CancellationToken) -> Result<Self, ServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        let socket = TcpSocket::new_v4().map_err(ServerError::Socket)?;
        socket.set_reuseaddr(true).map_err(ServerError::Socket)?;
        socket
            .bind(addr)
            .map_err(|source| ServerError::Bind { addr, source })?;
        let listener = socket.listen(BACKLOG).map_err(ServerError::Listen)?;

        Ok(Self {
            listener,
            cancel_token,
            connection_counter: AtomicU64::new(0),
        })
    }

    /// Creates the listening socket on the fixed service port.
    pub fn bind_default(cancel_token: CancellationToken) -> Result<Self, ServerError> {
        Self::bind(DEFAULT_PORT, cancel_token)
    }

    /// Returns the bound address. Tests bind port 0 and read it back here.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::Socket)
    }

    /// Accepts connections until a termination is requested.
    ///
    /// The termination token is observed between accept calls; a signal
    /// arriving while accept is pending resolves the cancelled branch and is
    /// never mistaken for a socket error. At most one accept completes after
    /// the signal. The listener is released when this returns; in-flight
    /// workers are not awaited.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr()?, "Listening");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Termination requested, leaving accept loop");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let worker = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            debug!(worker, peer = %peer, "Connection accepted");
                            tokio::spawn(ConnectionHandler::new(stream, worker).run());
                        }
                        Err(e) => {
                            error!(error = %e, "accept() failed");
                            return Err(ServerError::Accept(e));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Errors from socket setup and the accept loop, all fatal to the daemon.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("socket() failed: {0}")]
    Socket(#[source] std::io::Error),

    #[error("bind({addr}) failed: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("listen() failed: {0}")]
    Listen(#[source] std::io::Error),

    #[error("accept() failed: {0}")]
    Accept(#[source] std::io::Error),
}
