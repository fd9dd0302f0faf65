//! minimond - host-metrics daemon.
//!
//! Listens on TCP port 5001 and answers one-shot `cpu` / `mem` requests with
//! a single text line. With no arguments the process daemonizes and serves
//! until it receives SIGTERM or SIGINT.
//!
//! # Usage
//!
//! ```bash
//! # Start (daemonized)
//! minimond
//!
//! # Start in the foreground, logging to the terminal
//! minimond start --foreground
//!
//! # Stop the running daemon
//! minimond stop
//!
//! # Check daemon status
//! minimond status
//!
//! # Enable debug logging
//! RUST_LOG=minimond=debug minimond start --foreground
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use minimon_protocol::DEFAULT_PORT;
use minimond::server::{MetricsServer, ServerError};

// Exit codes by failure category. The numbers are not a contract; nothing
// outside this process may depend on more than "nonzero means failure".
const EXIT_PROCESS: i32 = 1;
const EXIT_NETWORK: i32 = 2;
const EXIT_SIGNAL: i32 = 3;
const EXIT_FILE: i32 = 5;

/// minimon daemon - host CPU and memory usage over TCP
#[derive(Parser, Debug)]
#[command(name = "minimond", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon (the default when no subcommand is given)
    Start {
        /// Stay in the foreground instead of daemonizing
        #[arg(long)]
        foreground: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

/// Failures during daemon startup, each with its own exit code.
#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("Process setup failed: {0}")]
    Process(#[source] daemonize::Error),

    #[error("Signal setup failed: {0}")]
    Signal(#[source] std::io::Error),

    #[error("Network setup failed: {0}")]
    Network(#[from] ServerError),

    #[error("File setup failed ({path}): {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StartupError {
    fn exit_code(&self) -> i32 {
        match self {
            StartupError::Process(_) => EXIT_PROCESS,
            StartupError::Signal(_) => EXIT_SIGNAL,
            StartupError::Network(_) => EXIT_NETWORK,
            StartupError::File { .. } => EXIT_FILE,
        }
    }
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("minimon")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("minimond.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("minimond.log")
}

fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<(), StartupError> {
    let path = pid_file_path();
    let file_error = |source| StartupError::File {
        path: path.clone(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(file_error)?;
    }
    let mut file = File::create(&path).map_err(file_error)?;
    write!(file, "{}", process::id()).map_err(file_error)?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        // Stale PID file left by an unclean exit
        remove_pid_file();
    }
    None
}

fn stop_daemon(pid: u32) -> Result<()> {
    let result = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
    if result != 0 {
        bail!("Failed to send SIGTERM to process {pid}");
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start { foreground: false });

    match command {
        Command::Start { foreground } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'minimond stop' to stop it first.");
                process::exit(EXIT_PROCESS);
            }

            if !foreground {
                if let Err(e) = daemonize() {
                    eprintln!("minimond: {e:#}");
                    process::exit(e.exit_code());
                }
            }

            // After daemonizing: the PID has changed across the forks.
            if let Err(e) = write_pid() {
                eprintln!("minimond: {e:#}");
                process::exit(e.exit_code());
            }

            let result = run_daemon();
            remove_pid_file();

            if let Err(e) = result {
                eprintln!("minimond: {e:#}");
                process::exit(e.exit_code());
            }
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping daemon (PID {pid})...");
                if let Err(e) = stop_daemon(pid) {
                    eprintln!("{e:#}");
                    process::exit(EXIT_PROCESS);
                }

                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }

                eprintln!("Daemon did not stop within 5 seconds.");
                process::exit(EXIT_PROCESS);
            } else {
                println!("Daemon is not running.");
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {pid})");
                println!("Port: {DEFAULT_PORT}");
            } else {
                println!("Daemon is not running.");
                process::exit(EXIT_PROCESS);
            }
        }
    }
}

/// Detaches the process from its controlling terminal.
///
/// Double fork plus a new session, working directory moved to / so the
/// daemon never pins the mount it was started from, and standard streams
/// redirected to the log file in append mode.
fn daemonize() -> Result<(), StartupError> {
    use daemonize::Daemonize;

    let log_path = log_file_path();
    let file_error = |source| StartupError::File {
        path: log_path.clone(),
        source,
    };

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).map_err(file_error)?;
    }

    let stdout = open_log(&log_path).map_err(file_error)?;
    let stderr = open_log(&log_path).map_err(file_error)?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .map_err(StartupError::Process)?;

    Ok(())
}

fn open_log(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Runs the daemon: logging, signal wiring, then the accept loop.
#[tokio::main]
async fn run_daemon() -> Result<(), StartupError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(
            "minimond=info"
                .parse()
                .unwrap_or_else(|_| tracing::Level::INFO.into()),
        ))
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        port = DEFAULT_PORT,
        "Daemon starting"
    );

    let cancel_token = CancellationToken::new();

    // Handlers are installed before the socket exists so a termination
    // signal can never be lost.
    let signals = ShutdownSignals::install().map_err(StartupError::Signal)?;
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        signals.wait().await;
        shutdown_token.cancel();
    });

    let server = MetricsServer::bind_default(cancel_token)?;
    server.run().await?;

    info!("Daemon stopped");
    Ok(())
}

/// The two termination signals the daemon honors.
struct ShutdownSignals {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    async fn wait(mut self) {
        tokio::select! {
            _ = self.sigterm.recv() => info!("Received SIGTERM"),
            _ = self.sigint.recv() => info!("Received SIGINT"),
        }
    }
}
