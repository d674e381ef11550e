//! Timing and transfer accounting for the replay tiers.
//!
//! Provides RAII-style profiling scopes and per-shot transfer counters.
use std::fmt;
use std::time::Instant;

use serde::Serialize;
use tracing::trace;

/// A profiling scope that measures elapsed time using RAII.
///
/// Elapsed time is logged at `trace` level when dropped.
pub struct ProfilerScope {
    start: Instant,
    name: &'static str,
}

impl ProfilerScope {
    /// Creates a new profiling scope.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Gets elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for ProfilerScope {
    fn drop(&mut self) {
        trace!(scope = self.name, elapsed_ms = self.elapsed_ms(), "Profiler scope closed");
    }
}

/// Transfers performed during the current shot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransferStats {
    /// Device blocks flushed to the host buffer
    pub device_to_host: usize,
    /// Host blocks uploaded to the device ring
    pub host_to_device: usize,
    /// Segment files written
    pub segment_writes: usize,
    /// Segment files read
    pub segment_reads: usize,
    /// Encoded bytes written to disk
    pub bytes_written: u64,
    /// Encoded bytes read from disk
    pub bytes_read: u64,
    /// Time spent encoding and writing segments
    pub encode_ms: f64,
    /// Time spent reading and decoding segments
    pub decode_ms: f64,
}

impl TransferStats {
    /// Raw frame bytes divided by bytes on disk, if anything was written
    #[must_use]
    pub fn compression_ratio(&self, raw_bytes: u64) -> Option<f64> {
        (self.bytes_written > 0).then(|| raw_bytes as f64 / self.bytes_written as f64)
    }
}

impl fmt::Display for TransferStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "device->host {} | host->device {} | segments written {} ({} B, {:.1} ms) | segments read {} ({} B, {:.1} ms)",
            self.device_to_host,
            self.host_to_device,
            self.segment_writes,
            self.bytes_written,
            self.encode_ms,
            self.segment_reads,
            self.bytes_read,
            self.decode_ms
        )
    }
}
