//! Integration tests for the TCP metrics server.
//!
//! These tests exercise the server as a complete system: accept loop,
//! per-connection workers, response shapes, concurrent clients, and graceful
//! shutdown with port release.

use std::net::SocketAddr;
use std::time::Duration;

use minimond::server::MetricsServer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for a single request/response cycle. CPU requests block for
/// the full one-second sampling interval, so this must comfortably exceed it.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Grace period for the accept loop to observe cancellation.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(1);

// ============================================================================
// Test Helpers
// ============================================================================

/// Test server context that owns the accept-loop task and its token.
struct TestServer {
    addr: SocketAddr,
    cancel_token: CancellationToken,
    handle: JoinHandle<Result<(), minimond::server::ServerError>>,
}

impl TestServer {
    /// Binds an ephemeral port and spawns the accept loop.
    fn spawn() -> Self {
        let cancel_token = CancellationToken::new();
        let server = MetricsServer::bind(0, cancel_token.clone()).expect("bind server");
        let addr = server.local_addr().expect("local addr");

        let handle = tokio::spawn(server.run());

        TestServer {
            addr,
            cancel_token,
            handle,
        }
    }

    /// One full client cycle: connect, send, close the write half, read the
    /// response to EOF.
    async fn request(&self, request: &[u8]) -> String {
        request_at(self.addr, request).await
    }

    /// Cancels the server and waits for the accept loop to finish.
    async fn shutdown(self) {
        self.cancel_token.cancel();
        timeout(SHUTDOWN_GRACE_PERIOD, self.handle)
            .await
            .expect("accept loop exits promptly")
            .expect("accept loop task completes")
            .expect("accept loop exits cleanly");
    }
}

async fn request_at(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("connect to server");
    stream.write_all(request).await.expect("send request");
    stream.shutdown().await.expect("shutdown write half");

    let mut response = Vec::new();
    timeout(RESPONSE_TIMEOUT, stream.read_to_end(&mut response))
        .await
        .expect("response within timeout")
        .expect("read response");

    String::from_utf8(response).expect("utf8 response")
}

fn parse_mem_kb(response: &str) -> u64 {
    response
        .strip_prefix("Current memory usage is ")
        .and_then(|rest| rest.strip_suffix(" kB\n"))
        .unwrap_or_else(|| panic!("unexpected memory response: {response:?}"))
        .parse()
        .expect("numeric kB value")
}

fn parse_cpu_percent(response: &str) -> u64 {
    response
        .strip_prefix("Current CPU usage is ")
        .and_then(|rest| rest.strip_suffix(" %\n"))
        .unwrap_or_else(|| panic!("unexpected CPU response: {response:?}"))
        .parse()
        .expect("numeric percent value")
}

// ============================================================================
// Request/Response Tests
// ============================================================================

#[tokio::test]
async fn test_memory_request() {
    let server = TestServer::spawn();

    let response = server.request(b"mem\n").await;
    let kb = parse_mem_kb(&response);
    assert!(kb > 0, "expected nonzero used memory, got {kb}");

    server.shutdown().await;
}

#[tokio::test]
async fn test_cpu_request() {
    let server = TestServer::spawn();

    let response = server.request(b"cpu\n").await;
    let percent = parse_cpu_percent(&response);
    assert!(percent <= 100, "CPU percent out of range: {percent}");

    server.shutdown().await;
}

#[tokio::test]
async fn test_unrecognized_request() {
    let server = TestServer::spawn();

    assert_eq!(server.request(b"bogus\n").await, "Invalid request\n");
    assert_eq!(server.request(b"cpu").await, "Invalid request\n");

    server.shutdown().await;
}

#[tokio::test]
async fn test_empty_request() {
    let server = TestServer::spawn();

    // Connect and close the write half without sending anything: the worker
    // sees an orderly zero-length read.
    assert_eq!(server.request(b"").await, "Invalid request\n");

    server.shutdown().await;
}

#[tokio::test]
async fn test_request_with_trailing_bytes() {
    let server = TestServer::spawn();

    // Prefix match: bytes after the command literal are ignored.
    let response = server.request(b"mem\nwhatever else").await;
    parse_mem_kb(&response);

    server.shutdown().await;
}

#[tokio::test]
async fn test_repeated_memory_requests() {
    let server = TestServer::spawn();

    // Two back-to-back samples are both well-formed; each request gets its
    // own fresh read of the accounting source.
    let first = parse_mem_kb(&server.request(b"mem\n").await);
    let second = parse_mem_kb(&server.request(b"mem\n").await);
    assert!(first > 0);
    assert!(second > 0);

    server.shutdown().await;
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[tokio::test]
async fn test_concurrent_memory_requests() {
    let server = TestServer::spawn();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let addr = server.addr;
        handles.push(tokio::spawn(async move {
            request_at(addr, b"mem\n").await
        }));
    }

    for handle in handles {
        let response = handle.await.expect("client task completes");
        assert!(parse_mem_kb(&response) > 0);
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_slow_request_does_not_block_fast_ones() {
    let server = TestServer::spawn();

    let addr = server.addr;
    let cpu = tokio::spawn(async move { request_at(addr, b"cpu\n").await });

    // While the CPU worker sits in its sampling interval, memory requests
    // must still be served.
    let response = server.request(b"mem\n").await;
    assert!(parse_mem_kb(&response) > 0);

    let cpu_response = cpu.await.expect("cpu client completes");
    assert!(parse_cpu_percent(&cpu_response) <= 100);

    server.shutdown().await;
}

#[tokio::test]
async fn test_many_sequential_requests() {
    let server = TestServer::spawn();

    for _ in 0..20 {
        let response = server.request(b"mem\n").await;
        assert!(parse_mem_kb(&response) > 0);
    }

    server.shutdown().await;
}

// ============================================================================
// Shutdown Tests
// ============================================================================

#[tokio::test]
async fn test_idle_shutdown_is_prompt() {
    let server = TestServer::spawn();

    // No connections in flight: cancelling must end the accept loop within
    // the grace period (shutdown() asserts this internally).
    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_releases_port() {
    let server = TestServer::spawn();
    let port = server.addr.port();
    server.shutdown().await;

    // The port must be immediately rebindable once run() has returned.
    let token = CancellationToken::new();
    let rebound = MetricsServer::bind(port, token).expect("rebind released port");
    drop(rebound);
}

#[tokio::test]
async fn test_no_accepts_after_shutdown() {
    let server = TestServer::spawn();
    let addr = server.addr;

    let response = server.request(b"mem\n").await;
    assert!(parse_mem_kb(&response) > 0);

    server.shutdown().await;

    // The listener is gone; a fresh connect must be refused.
    let refused = TcpStream::connect(addr).await;
    assert!(refused.is_err(), "listener should be released after shutdown");
}
