//! Per-adapter counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Ingestion metrics, shared between an adapter and its capture thread
#[derive(Debug, Default)]
pub struct IngestionMetrics {
    /// Samples handed over by the device
    pub samples_received: AtomicU64,

    /// Samples the stream producer refused
    pub samples_rejected: AtomicU64,

    /// Samples evicted from the stream buffer on overflow
    pub buffer_drops: AtomicU64,

    /// Disconnect signals seen
    pub disconnects: AtomicU64,
}

impl IngestionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.samples_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.samples_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_buffer_drops(&self, count: u64) {
        self.buffer_drops.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            samples_received: self.samples_received.load(Ordering::Relaxed),
            samples_rejected: self.samples_rejected.load(Ordering::Relaxed),
            buffer_drops: self.buffer_drops.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub samples_received: u64,
    pub samples_rejected: u64,
    pub buffer_drops: u64,
    pub disconnects: u64,
}

impl std::ops::Add for MetricsSnapshot {
    type Output = MetricsSnapshot;

    fn add(self, rhs: Self) -> Self::Output {
        MetricsSnapshot {
            samples_received: self.samples_received + rhs.samples_received,
            samples_rejected: self.samples_rejected + rhs.samples_rejected,
            buffer_drops: self.buffer_drops + rhs.buffer_drops,
            disconnects: self.disconnects + rhs.disconnects,
        }
    }
}
