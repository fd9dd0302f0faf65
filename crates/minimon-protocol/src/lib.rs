//! Wire protocol shared by the minimon daemon and client.
//!
//! The protocol is plain text over TCP, one request per connection:
//! the client sends one of two fixed byte literals and the server answers
//! with a single text line, then both sides close.

pub mod command;
pub mod response;

pub use command::{Command, CMD_CPU, CMD_MEM};
pub use response::{format_cpu_response, format_memory_response, INVALID_REQUEST};

/// TCP port the daemon listens on.
pub const DEFAULT_PORT: u16 = 5001;
