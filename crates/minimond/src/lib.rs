//! minimond - host-metrics daemon.
//!
//! This crate provides the daemon's moving parts:
//! - `metrics` - point-in-time CPU and memory samples from /proc
//! - `server` - TCP accept loop and the per-connection workers
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │  MetricsServer   │  owns the listener, observes the
//! │  (accept loop)   │  cancellation token between accepts
//! └────────┬─────────┘
//!          │ accept()
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │ConnectionHandler │────▶│     metrics      │
//! │  (one per conn)  │     │  (/proc reader)  │
//! └──────────────────┘     └──────────────────┘
//! ```
//!
//! Each worker owns its connection and shares no state with the accept loop
//! or with other workers; the only cross-cutting state in the daemon is the
//! termination token.

pub mod metrics;
pub mod server;
