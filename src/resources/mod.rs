//! Process resource snapshots
//!
//! Captures point-in-time memory and CPU counters for the current process and
//! computes the consumption between two snapshots.
//!
//! Counters come from the OS, not from an allocator hook:
//! - CPU: `getrusage(RUSAGE_SELF)` user and system time (Unix)
//! - Memory: `/proc/self/statm` (Linux)
//!
//! Snapshots never fail. A counter group that cannot be read is reported as
//! zero and the snapshot proceeds.

use std::io;
use tracing::debug;

/// Memory counters in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Data + stack segment size
    pub heap_used: u64,
    /// Total virtual size
    pub heap_total: u64,
    /// Shared (file-backed) resident pages
    pub external: u64,
    /// Resident set size
    pub rss: u64,
}

/// Cumulative CPU time consumed by the process, in microseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuUsage {
    pub user_micros: u64,
    pub system_micros: u64,
}

/// A point-in-time resource reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceMeasurement {
    /// Wall clock, milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    pub memory: MemoryUsage,
    pub cpu: CpuUsage,
}

/// Consumption between two measurements
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceDelta {
    /// Heap growth, clamped at zero
    pub memory_bytes: u64,
    /// User + system CPU time. Not clamped; the counters are monotonic.
    pub cpu_seconds: f64,
}

impl ResourceDelta {
    pub fn cpu_time_ms(&self) -> f64 {
        self.cpu_seconds * 1000.0
    }
}

/// Read the current resource counters
pub fn snapshot() -> ResourceMeasurement {
    let memory = read_memory().unwrap_or_else(|e| {
        debug!(error = %e, "Memory counters unavailable");
        MemoryUsage::default()
    });

    let cpu = read_cpu().unwrap_or_else(|e| {
        debug!(error = %e, "CPU counters unavailable");
        CpuUsage::default()
    });

    ResourceMeasurement {
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
        memory,
        cpu,
    }
}

/// Compute the consumption between `start` and `end`
///
/// Memory can appear to shrink between readings (pages returned to the OS),
/// so the heap delta is clamped at zero. CPU delta is the literal sum of the
/// user and system microsecond differences.
pub fn delta(start: &ResourceMeasurement, end: &ResourceMeasurement) -> ResourceDelta {
    let user = end.cpu.user_micros as i128 - start.cpu.user_micros as i128;
    let system = end.cpu.system_micros as i128 - start.cpu.system_micros as i128;

    ResourceDelta {
        memory_bytes: end.memory.heap_used.saturating_sub(start.memory.heap_used),
        cpu_seconds: (user + system) as f64 / 1_000_000.0,
    }
}

#[cfg(unix)]
fn read_cpu() -> io::Result<CpuUsage> {
    // SAFETY: rusage is plain old data and getrusage only writes into it.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(CpuUsage {
        user_micros: timeval_micros(&usage.ru_utime),
        system_micros: timeval_micros(&usage.ru_stime),
    })
}

#[cfg(unix)]
fn timeval_micros(tv: &libc::timeval) -> u64 {
    let micros = tv.tv_sec as i64 * 1_000_000 + tv.tv_usec as i64;
    micros.max(0) as u64
}

#[cfg(not(unix))]
fn read_cpu() -> io::Result<CpuUsage> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "CPU counters are not supported on this platform",
    ))
}

#[cfg(target_os = "linux")]
fn read_memory() -> io::Result<MemoryUsage> {
    let statm = std::fs::read_to_string("/proc/self/statm")?;
    parse_statm(&statm, page_size())
}

#[cfg(not(target_os = "linux"))]
fn read_memory() -> io::Result<MemoryUsage> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "memory counters are not supported on this platform",
    ))
}

#[cfg(target_os = "linux")]
fn page_size() -> u64 {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        4096
    }
}

/// Parse `/proc/self/statm`: size resident shared text lib data dt (pages)
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_statm(statm: &str, page_size: u64) -> io::Result<MemoryUsage> {
    let fields = statm
        .split_whitespace()
        .map(|f| f.parse::<u64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    if fields.len() < 6 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("statm has {} fields, expected at least 6", fields.len()),
        ));
    }

    Ok(MemoryUsage {
        heap_used: fields[5] * page_size,
        heap_total: fields[0] * page_size,
        external: fields[2] * page_size,
        rss: fields[1] * page_size,
    })
}
