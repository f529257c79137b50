//! Sink and forwarder counters

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters of one sink worker
#[derive(Debug, Default)]
pub struct SinkMetrics {
    queue_len: AtomicUsize,
    written: AtomicU64,
    failed: AtomicU64,
    /// Pairs refused because the sink queue was full
    dropped: AtomicU64,
    last_trigger_index: AtomicU64,
}

impl SinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn record_written(&self, trigger_index: u64) {
        self.written.fetch_add(1, Ordering::Relaxed);
        self.last_trigger_index
            .store(trigger_index, Ordering::Relaxed);
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_len: self.queue_len(),
            written: self.written(),
            failed: self.failed(),
            dropped: self.dropped(),
            last_trigger_index: self.last_trigger_index.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of sink metrics (for reporting)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub queue_len: usize,
    pub written: u64,
    pub failed: u64,
    pub dropped: u64,
    pub last_trigger_index: u64,
}

/// Counters of the aligner-side forwarder
#[derive(Debug, Default)]
pub struct ForwarderMetrics {
    forwarded: AtomicU64,
    /// Pairs that did not fit within the accept budget
    dropped: AtomicU64,
    /// Accepts that had to wait for queue space
    retried: AtomicU64,
}

impl ForwarderMetrics {
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    pub(crate) fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }
}
