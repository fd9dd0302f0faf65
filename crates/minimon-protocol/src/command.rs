//! Request commands and their wire encoding.

/// Wire literal requesting a CPU utilization sample.
pub const CMD_CPU: &[u8] = b"cpu\n";

/// Wire literal requesting a used-memory sample.
pub const CMD_MEM: &[u8] = b"mem\n";

/// A request read from a client connection.
///
/// Derived by exact byte-prefix match against the two wire literals; the
/// trailing newline is part of the match. Anything else, including an empty
/// read, is `Unrecognized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    CpuUsage,
    MemoryUsage,
    Unrecognized,
}

impl Command {
    /// Parses the bytes received from a connection.
    pub fn parse(buf: &[u8]) -> Self {
        if buf.starts_with(CMD_CPU) {
            Command::CpuUsage
        } else if buf.starts_with(CMD_MEM) {
            Command::MemoryUsage
        } else {
            Command::Unrecognized
        }
    }

    /// Returns the wire encoding for a recognized command.
    ///
    /// `Unrecognized` has no encoding; only the daemon ever constructs it.
    pub fn wire_bytes(&self) -> Option<&'static [u8]> {
        match self {
            Command::CpuUsage => Some(CMD_CPU),
            Command::MemoryUsage => Some(CMD_MEM),
            Command::Unrecognized => None,
        }
    }
}
