//! minimon - one-shot client for the minimon daemon.
//!
//! Connects to a server, sends a single metric request, and prints the
//! response line. Every failure is terminal: the client reports it and
//! exits without retrying.
//!
//! # Usage
//!
//! ```bash
//! minimon localhost -c   # CPU utilization
//! minimon 10.0.0.7 -m    # used memory
//! ```

use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};

use minimon_protocol::{Command, DEFAULT_PORT};

/// minimon client - query a host-metrics daemon
#[derive(Parser, Debug)]
#[command(name = "minimon", version, about)]
#[command(group(ArgGroup::new("metric").required(true).args(["cpu", "mem"])))]
struct Args {
    /// Server hostname or IP address
    server: String,

    /// Request current CPU usage
    #[arg(short = 'c', long)]
    cpu: bool,

    /// Request current memory usage
    #[arg(short = 'm', long)]
    mem: bool,
}

impl Args {
    fn command(&self) -> Command {
        if self.cpu {
            Command::CpuUsage
        } else {
            Command::MemoryUsage
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let request = args
        .command()
        .wire_bytes()
        .context("requested command has no wire encoding")?;

    let addr = lookup_host((args.server.as_str(), DEFAULT_PORT))
        .await
        .with_context(|| format!("Failed to resolve {}", args.server))?
        .next()
        .with_context(|| format!("No addresses found for {}", args.server))?;

    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("Failed to connect to {addr}"))?;

    stream.write_all(request).await.context("send failed")?;
    // Closing our write half tells the server the request is complete.
    stream.shutdown().await.context("shutdown failed")?;

    let mut response = Vec::new();
    stream
        .read_to_end(&mut response)
        .await
        .context("recv failed")?;

    io::stdout()
        .write_all(&response)
        .context("Failed to write response")?;

    Ok(())
}
