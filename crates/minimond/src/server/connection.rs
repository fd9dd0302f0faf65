//! Per-connection worker for one request/response cycle.
//!
//! The worker reads one bounded request, shuts down its read half, computes
//! the response, sends it in one write, shuts down the write half, and
//! closes. The connection is closed exactly once on every path; failures are
//! fatal to the worker only and never reach the accept loop.

use std::os::fd::AsRawFd;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{error, info};

use minimon_protocol::{format_cpu_response, format_memory_response, Command, INVALID_REQUEST};

use crate::metrics::{self, MetricsError};

/// Receive buffer size. There is no framing: the whole request must fit in
/// one read. Both recognized commands are four bytes.
const RECV_BUFFER_SIZE: usize = 80;

/// Handles exactly one accepted connection, then exits.
pub struct ConnectionHandler {
    stream: TcpStream,
    worker: u64,
}

impl ConnectionHandler {
    pub fn new(stream: TcpStream, worker: u64) -> Self {
        Self { stream, worker }
    }

    /// Runs the request/response cycle, logging the outcome.
    ///
    /// The stream is dropped on every path, so the connection is closed
    /// whether the cycle succeeded or not.
    pub async fn run(mut self) {
        match self.serve().await {
            Ok(command) => info!(worker = self.worker, ?command, "Request handled"),
            Err(e) => error!(worker = self.worker, error = %e, "Request failed"),
        }
    }

    async fn serve(&mut self) -> Result<Command, ConnectionError> {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        let size = self
            .stream
            .read(&mut buffer)
            .await
            .map_err(ConnectionError::Read)?;

        // The peer has said all it is going to say; close our read half so
        // it can observe that before the (possibly long) computation.
        shutdown_read(&self.stream);

        // A zero-length read is an orderly "no command", answered like any
        // other unrecognized request.
        let command = Command::parse(&buffer[..size]);

        let response = match command {
            Command::CpuUsage => format_cpu_response(metrics::cpu_usage().await?),
            Command::MemoryUsage => format_memory_response(metrics::used_memory_kb()?),
            Command::Unrecognized => INVALID_REQUEST.to_string(),
        };

        self.stream
            .write_all(response.as_bytes())
            .await
            .map_err(ConnectionError::Write)?;
        self.stream
            .shutdown()
            .await
            .map_err(ConnectionError::Write)?;

        Ok(command)
    }
}

/// Closes the read direction of the socket.
///
/// Tokio only exposes write-half shutdown, so this goes through the raw fd.
/// The result is ignored; the peer may already have closed its end.
fn shutdown_read(stream: &TcpStream) {
    // SAFETY: the fd is owned by `stream` and stays valid for the call;
    // shutdown() only changes socket state.
    unsafe {
        libc::shutdown(stream.as_raw_fd(), libc::SHUT_RD);
    }
}

/// Errors that end a worker early.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("recv failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("send failed: {0}")]
    Write(#[source] std::io::Error),

    #[error(transparent)]
    Metrics(#[from] MetricsError),
}
