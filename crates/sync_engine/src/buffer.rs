//! Per-stream sample buffer with timestamp-based ordering.
//!
//! Uses index-based separation:
//! - HeapRb stores lightweight metadata (device timestamps + slab key)
//! - Slab stores the actual samples
//!
//! Frames are megabytes each, so reordering only ever moves metadata.

use std::cmp::Ordering;
use std::fmt;

use contracts::{BufferStats, DatasetGap, EventBatch, StreamKind};
use ringbuf::{traits::*, HeapRb};
use slab::Slab;

use crate::IndexedFrame;

/// Anything a stream buffer can hold
pub trait Timestamped {
    /// Device ticks used for ordering
    fn device_ts(&self) -> u64;

    /// Device ticks of the last entry covered by the sample
    fn last_ts(&self) -> u64 {
        self.device_ts()
    }

    /// Heap footprint for byte-bounded buffers
    fn byte_size(&self) -> usize {
        0
    }
}

impl Timestamped for EventBatch {
    fn device_ts(&self) -> u64 {
        self.first_ts().unwrap_or(0)
    }

    fn last_ts(&self) -> u64 {
        self.last_ts().unwrap_or(0)
    }

    fn byte_size(&self) -> usize {
        EventBatch::byte_size(self)
    }
}

impl Timestamped for IndexedFrame {
    fn device_ts(&self) -> u64 {
        self.frame.capture_ts
    }

    fn byte_size(&self) -> usize {
        self.frame.byte_size()
    }
}

/// Lightweight metadata stored in ring buffer
#[derive(Debug, Clone, Copy)]
struct SampleMeta {
    first_ts: u64,
    last_ts: u64,
    bytes: usize,
    slab_key: usize,
}

/// Result of a push
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PushOutcome {
    /// Samples dropped to make room, oldest first
    pub dropped: Vec<DatasetGap>,
    /// The pushed sample arrived earlier than its predecessor
    pub out_of_order: bool,
}

/// Bounded, time-ordered buffer for one stream
///
/// When full (by count, or by bytes if configured) the sample with the oldest
/// timestamp is dropped and a `DatasetGap` recorded. `push` never blocks.
pub struct StreamBuffer<T> {
    stream: StreamKind,
    /// Ring buffer of metadata
    index: HeapRb<SampleMeta>,
    /// Actual sample storage
    storage: Slab<T>,
    capacity: usize,
    max_bytes: Option<usize>,
    bytes: usize,
    /// Reordering allowed before a sample counts as final (device ticks)
    ooo_tolerance: u64,
    closed: bool,
    dropped_count: u64,
    out_of_order_count: u64,
    last_pushed: Option<u64>,
    newest_ts: Option<u64>,
    gaps: Vec<DatasetGap>,
}

impl<T> fmt::Debug for StreamBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamBuffer")
            .field("stream", &self.stream)
            .field("len", &self.index.occupied_len())
            .field("capacity", &self.capacity)
            .field("bytes", &self.bytes)
            .field("dropped", &self.dropped_count)
            .field("closed", &self.closed)
            .finish()
    }
}

impl<T: Timestamped> StreamBuffer<T> {
    pub fn new(stream: StreamKind, capacity: usize, ooo_tolerance: u64) -> Self {
        let capacity = capacity.max(1);
        Self {
            stream,
            index: HeapRb::new(capacity),
            storage: Slab::with_capacity(capacity),
            capacity,
            max_bytes: None,
            bytes: 0,
            ooo_tolerance,
            closed: false,
            dropped_count: 0,
            out_of_order_count: 0,
            last_pushed: None,
            newest_ts: None,
            gaps: Vec::new(),
        }
    }

    /// Additionally bound the buffer by total sample bytes
    pub fn with_max_bytes(mut self, max_bytes: Option<usize>) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Push a sample, dropping the oldest ones if the buffer is full
    pub fn push(&mut self, sample: T) -> PushOutcome {
        let first_ts = sample.device_ts();
        let last_ts = sample.last_ts().max(first_ts);
        let bytes = sample.byte_size();
        let mut outcome = PushOutcome::default();

        if let Some(last) = self.last_pushed {
            if first_ts < last {
                self.out_of_order_count += 1;
                outcome.out_of_order = true;
            }
        }
        self.last_pushed = Some(first_ts);
        self.newest_ts = Some(self.newest_ts.map_or(last_ts, |n| n.max(last_ts)));

        while !self.index.is_empty() && self.would_overflow(bytes) {
            if let Some(gap) = self.drop_oldest() {
                outcome.dropped.push(gap);
            }
        }

        let slab_key = self.storage.insert(sample);
        let meta = SampleMeta {
            first_ts,
            last_ts,
            bytes,
            slab_key,
        };
        self.bytes += bytes;
        let _ = self.index.try_push(meta);

        self.gaps.extend(outcome.dropped.iter().copied());
        outcome
    }

    fn would_overflow(&self, incoming_bytes: usize) -> bool {
        if self.index.is_full() {
            return true;
        }
        match self.max_bytes {
            Some(max) => self.bytes + incoming_bytes > max,
            None => false,
        }
    }

    fn drop_oldest(&mut self) -> Option<DatasetGap> {
        let meta = self.remove_at(self.oldest_position()?)?;
        let _ = self.storage.remove(meta.slab_key);
        self.dropped_count += 1;
        Some(DatasetGap {
            stream: self.stream,
            first_ts: meta.first_ts,
            last_ts: meta.last_ts,
        })
    }

    /// Position (in ring order) of the sample with the smallest timestamp
    fn oldest_position(&self) -> Option<usize> {
        self.index
            .iter()
            .enumerate()
            .min_by(|(ia, a), (ib, b)| match a.first_ts.cmp(&b.first_ts) {
                Ordering::Equal => ia.cmp(ib),
                other => other,
            })
            .map(|(i, _)| i)
    }

    /// Remove the metadata entry at `pos`, keeping ring order of the rest
    fn remove_at(&mut self, pos: usize) -> Option<SampleMeta> {
        if pos == 0 {
            let meta = self.index.try_pop()?;
            self.bytes -= meta.bytes;
            return Some(meta);
        }

        // Rebuild index (only moves small metadata, not payloads)
        let mut metas: Vec<SampleMeta> = self.index.pop_iter().collect();
        let removed = metas.remove(pos);
        for m in metas {
            let _ = self.index.try_push(m);
        }
        self.bytes -= removed.bytes;
        Some(removed)
    }

    /// Whether a sample starting at `ts` can no longer be preceded by a later
    /// arrival
    fn is_final(&self, ts: u64) -> bool {
        if self.closed {
            return true;
        }
        match self.newest_ts {
            Some(newest) => ts.saturating_add(self.ooo_tolerance) <= newest,
            None => false,
        }
    }

    /// Remove and return the oldest sample if it starts before `cutoff` and
    /// is final
    pub fn pop_oldest_ready(&mut self, cutoff: u64) -> Option<T> {
        let ts = self.oldest_ts()?;
        if !self.is_final(ts) {
            return None;
        }
        self.pop_oldest_before(cutoff)
    }

    /// Remove and return the oldest sample if it starts before `cutoff`,
    /// final or not. Used for forced emission.
    pub fn pop_oldest_before(&mut self, cutoff: u64) -> Option<T> {
        let pos = self.oldest_position()?;
        let meta = self.index.iter().nth(pos).copied()?;
        if meta.first_ts >= cutoff {
            return None;
        }
        let meta = self.remove_at(pos)?;
        Some(self.storage.remove(meta.slab_key))
    }

    fn oldest_ts(&self) -> Option<u64> {
        self.index.iter().map(|m| m.first_ts).min()
    }

    /// Peek at the oldest sample without removing it
    pub fn peek_oldest(&self) -> Option<&T> {
        let pos = self.oldest_position()?;
        let meta = self.index.iter().nth(pos)?;
        self.storage.get(meta.slab_key)
    }

    /// Device tick below which the stream is final
    ///
    /// `None` until something has been pushed; `u64::MAX` once closed.
    pub fn watermark(&self) -> Option<u64> {
        if self.closed {
            return Some(u64::MAX);
        }
        self.newest_ts
            .map(|newest| newest.saturating_sub(self.ooo_tolerance))
    }

    /// No more samples will be pushed; everything held becomes final
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Drain gaps recorded since the last call
    pub fn take_gaps(&mut self) -> Vec<DatasetGap> {
        std::mem::take(&mut self.gaps)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.occupied_len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn fill_ratio(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }

    #[inline]
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count
    }

    #[inline]
    pub fn out_of_order_count(&self) -> u64 {
        self.out_of_order_count
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            depth: self.len(),
            capacity: self.capacity,
            bytes: self.bytes,
            dropped: self.dropped_count,
            out_of_order: self.out_of_order_count,
            oldest_ts: self.oldest_ts(),
            newest_ts: self.newest_ts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Sample {
        ts: u64,
        bytes: usize,
    }

    impl Timestamped for Sample {
        fn device_ts(&self) -> u64 {
            self.ts
        }

        fn byte_size(&self) -> usize {
            self.bytes
        }
    }

    fn sample(ts: u64) -> Sample {
        Sample { ts, bytes: 10 }
    }

    #[test]
    fn test_pop_returns_oldest_first() {
        let mut buffer = StreamBuffer::new(StreamKind::Frame, 10, 0);
        buffer.push(sample(3));
        buffer.push(sample(1));
        buffer.push(sample(2));

        assert_eq!(buffer.pop_oldest_ready(u64::MAX).unwrap().ts, 1);
        assert_eq!(buffer.pop_oldest_ready(u64::MAX).unwrap().ts, 2);
        assert_eq!(buffer.pop_oldest_ready(u64::MAX).unwrap().ts, 3);
        assert!(buffer.pop_oldest_ready(u64::MAX).is_none());
    }

    #[test]
    fn test_burst_over_capacity_drops_oldest() {
        const K: usize = 8;
        let mut buffer = StreamBuffer::new(StreamKind::Event, K, 0);
        let mut drops = 0;
        for ts in 0..(K as u64 + 5) {
            drops += buffer.push(sample(ts * 100)).dropped.len();
        }

        assert_eq!(drops, 5);
        assert_eq!(buffer.dropped_count(), 5);
        assert_eq!(buffer.len(), K);

        let gaps = buffer.take_gaps();
        assert_eq!(gaps.len(), 5);
        assert_eq!(gaps[0].first_ts, 0);
        assert_eq!(gaps[4].first_ts, 400);

        buffer.close();
        let kept: Vec<u64> = std::iter::from_fn(|| buffer.pop_oldest_ready(u64::MAX))
            .map(|s| s.ts)
            .collect();
        assert_eq!(kept, (5..13).map(|i| i * 100).collect::<Vec<_>>());
    }

    #[test]
    fn test_overflow_drops_oldest_by_timestamp_not_arrival() {
        let mut buffer = StreamBuffer::new(StreamKind::Event, 3, 0);
        buffer.push(sample(20));
        buffer.push(sample(10));
        buffer.push(sample(30));
        let outcome = buffer.push(sample(40));

        assert_eq!(outcome.dropped.len(), 1);
        assert_eq!(outcome.dropped[0].first_ts, 10);
        assert_eq!(buffer.peek_oldest().unwrap().ts, 20);
    }

    #[test]
    fn test_byte_bound() {
        let mut buffer = StreamBuffer::new(StreamKind::Frame, 100, 0).with_max_bytes(Some(25));
        buffer.push(sample(1));
        buffer.push(sample(2));
        let outcome = buffer.push(sample(3));

        assert_eq!(outcome.dropped.len(), 1);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.stats().bytes, 20);
    }

    #[test]
    fn test_ready_waits_for_out_of_order_tolerance() {
        let mut buffer = StreamBuffer::new(StreamKind::Event, 10, 50);
        buffer.push(sample(100));
        buffer.push(sample(120));

        // newest is 120: 100 + 50 > 120, not final yet
        assert!(buffer.pop_oldest_ready(u64::MAX).is_none());
        assert_eq!(buffer.watermark(), Some(70));

        buffer.push(sample(150));
        assert_eq!(buffer.pop_oldest_ready(u64::MAX).unwrap().ts, 100);
        assert!(buffer.pop_oldest_ready(u64::MAX).is_none());

        buffer.close();
        assert_eq!(buffer.watermark(), Some(u64::MAX));
        assert_eq!(buffer.pop_oldest_ready(u64::MAX).unwrap().ts, 120);
    }

    #[test]
    fn test_cutoff_is_exclusive() {
        let mut buffer = StreamBuffer::new(StreamKind::Event, 10, 0);
        buffer.push(sample(100));
        buffer.close();

        assert!(buffer.pop_oldest_ready(100).is_none());
        assert!(buffer.pop_oldest_ready(101).is_some());
    }

    #[test]
    fn test_forced_pop_ignores_finality() {
        let mut buffer = StreamBuffer::new(StreamKind::Event, 10, 1_000);
        buffer.push(sample(100));
        buffer.push(sample(200));

        assert!(buffer.pop_oldest_ready(150).is_none());
        assert_eq!(buffer.pop_oldest_before(150).unwrap().ts, 100);
        assert!(buffer.pop_oldest_before(150).is_none());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_out_of_order_detection() {
        let mut buffer = StreamBuffer::new(StreamKind::Frame, 10, 0);
        buffer.push(sample(1));
        buffer.push(sample(3));
        let outcome = buffer.push(sample(2));

        assert!(outcome.out_of_order);
        assert_eq!(buffer.out_of_order_count(), 1);
    }
}
