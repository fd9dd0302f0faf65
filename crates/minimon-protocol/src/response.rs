//! Formatting of the one-line server responses.

/// Response sent for anything the daemon does not recognize.
pub const INVALID_REQUEST: &str = "Invalid request\n";

/// Formats a CPU utilization fraction as the wire response.
///
/// The percentage is rounded half-up to the nearest integer.
pub fn format_cpu_response(usage: f64) -> String {
    format!("Current CPU usage is {} %\n", (usage * 100.0 + 0.5) as u64)
}

/// Formats a used-memory sample in kB as the wire response.
pub fn format_memory_response(kb: u64) -> String {
    format!("Current memory usage is {kb} kB\n")
}
