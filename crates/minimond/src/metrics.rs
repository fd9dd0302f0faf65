//! Point-in-time host metrics derived from the kernel's /proc accounting.
//!
//! Two samples are served:
//! - used memory in kB, accumulated from `/proc/meminfo`
//! - aggregate CPU utilization, from two `/proc/stat` snapshots taken
//!   [`SAMPLE_INTERVAL`] apart
//!
//! Samples are computed fresh for every request and never cached. The
//! parsing is factored into pure functions over `&str` so the arithmetic is
//! testable without a live /proc.

use std::fs;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Path to the kernel's memory accounting file.
pub const MEMINFO_PATH: &str = "/proc/meminfo";

/// Path to the kernel's CPU tick accounting file.
pub const STAT_PATH: &str = "/proc/stat";

/// Wait between the two CPU tick snapshots.
///
/// Long enough that tick-granularity rounding does not dominate the delta.
/// A tunable constant, not a wire contract.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

// Meminfo labels participating in the used-memory sum.
const MEM_LABEL_TOTAL: &str = "MemTotal:";
const MEM_LABEL_FREE: &str = "MemFree:";
const MEM_LABEL_BUFFERS: &str = "Buffers:";
const MEM_LABEL_CACHED: &str = "Cached:";

/// Errors from reading or interpreting an accounting source.
///
/// An unreadable or unrecognized source is fatal for the request being
/// served. A label missing from a readable meminfo is not an error; it is
/// simply left out of the sum.
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Failed to read {path}: {source}")]
    Unreadable {
        path: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Unrecognized format in {path}: {reason}")]
    Unparsable { path: &'static str, reason: String },
}

/// Cumulative CPU ticks split into working and idle time.
///
/// Both counters are monotonically non-decreasing for a real CPU; two
/// snapshots bracket one measurement interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimeSnapshot {
    /// user + nice + system + irq + softirq + steal ticks.
    pub working: u64,

    /// idle + iowait ticks.
    pub idle: u64,
}

impl CpuTimeSnapshot {
    /// Parses the aggregate `cpu` line at the top of /proc/stat.
    ///
    /// The first eight numeric fields are user, nice, system, idle, iowait,
    /// irq, softirq and steal; fewer than eight is an unrecognized format.
    fn parse(content: &str) -> Result<Self, MetricsError> {
        let line = content
            .lines()
            .next()
            .ok_or_else(|| MetricsError::Unparsable {
                path: STAT_PATH,
                reason: "empty file".to_string(),
            })?;

        let mut fields = line.split_whitespace();
        if fields.next() != Some("cpu") {
            return Err(MetricsError::Unparsable {
                path: STAT_PATH,
                reason: format!("first line is not the aggregate cpu line: {line:?}"),
            });
        }

        let mut ticks = [0u64; 8];
        for (count, slot) in ticks.iter_mut().enumerate() {
            let field = fields.next().ok_or_else(|| MetricsError::Unparsable {
                path: STAT_PATH,
                reason: format!("cpu line has only {count} numeric fields"),
            })?;
            *slot = field.parse().map_err(|_| MetricsError::Unparsable {
                path: STAT_PATH,
                reason: format!("non-numeric tick field {field:?}"),
            })?;
        }

        let [user, nice, system, idle, iowait, irq, softirq, steal] = ticks;
        Ok(Self {
            working: user + nice + system + irq + softirq + steal,
            idle: idle + iowait,
        })
    }

    /// Utilization over the interval from `earlier` to `self`.
    ///
    /// A zero total delta (interval shorter than one tick) reads as 0.0.
    fn utilization_since(&self, earlier: &CpuTimeSnapshot) -> f64 {
        let delta_working = self.working.saturating_sub(earlier.working);
        let delta_total =
            (self.working + self.idle).saturating_sub(earlier.working + earlier.idle);

        if delta_total == 0 {
            return 0.0;
        }
        delta_working as f64 / delta_total as f64
    }
}

/// Returns the number of kB of memory currently in use.
///
/// The sum is `MemTotal - MemFree - Buffers - Cached`. Labels may appear in
/// any order, unknown labels are ignored, and a missing label contributes
/// nothing. Only a meminfo that cannot be read at all is an error.
pub fn used_memory_kb() -> Result<u64, MetricsError> {
    let content = fs::read_to_string(MEMINFO_PATH).map_err(|source| MetricsError::Unreadable {
        path: MEMINFO_PATH,
        source,
    })?;
    Ok(used_memory_kb_from(&content))
}

/// Measures aggregate CPU utilization over one sampling interval.
///
/// Blocks the calling worker for the full [`SAMPLE_INTERVAL`]. The value is
/// reported for all cores together, so one busy core of four reads as 0.25.
pub async fn cpu_usage() -> Result<f64, MetricsError> {
    let first = read_cpu_snapshot()?;
    tokio::time::sleep(SAMPLE_INTERVAL).await;
    let second = read_cpu_snapshot()?;

    let usage = second.utilization_since(&first);
    debug!(usage, "CPU sample taken");
    Ok(usage)
}

fn read_cpu_snapshot() -> Result<CpuTimeSnapshot, MetricsError> {
    let content = fs::read_to_string(STAT_PATH).map_err(|source| MetricsError::Unreadable {
        path: STAT_PATH,
        source,
    })?;
    CpuTimeSnapshot::parse(&content)
}

/// Accumulates the used-memory sum from meminfo text.
///
/// Lines that do not scan as "label value ..." are skipped. The sum is
/// clamped at zero; the sample is defined non-negative.
fn used_memory_kb_from(content: &str) -> u64 {
    let mut result: i64 = 0;

    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let (Some(label), Some(value)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Ok(value) = value.parse::<i64>() else {
            continue;
        };

        match label {
            MEM_LABEL_TOTAL => result += value,
            MEM_LABEL_FREE | MEM_LABEL_BUFFERS | MEM_LABEL_CACHED => result -= value,
            _ => {}
        }
    }

    result.max(0) as u64
}
