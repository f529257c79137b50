//! Trigger edge detection and numbering.
//!
//! Each stream owns one detector on its producer thread. Frames map 1:1 to
//! trigger pulses; event streams carry markers located by a pluggable
//! [`MarkerStrategy`]. Edges are numbered from 0 and a skipped pulse is always
//! reported as an explicit `Missed` edge.

use std::fmt;
use std::sync::Arc;

use contracts::{
    CdEvent, EventBatch, FrameSample, MarkerConfig, RawSample, StreamConfig, StreamId,
    StreamKind, TriggerEdge,
};
use tracing::{debug, trace};

/// EWMA weight of a new period observation
const PERIOD_ALPHA: f64 = 0.1;

/// Observed periods further than this from nominal do not feed the estimate
const PERIOD_ACCEPT_RATIO: f64 = 0.25;

/// Locates trigger markers inside an event batch
pub trait MarkerStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Device timestamps of the markers in the batch, in arrival order
    fn markers(&self, batch: &EventBatch) -> Vec<u64>;

    /// Whether a pixel event is itself a marker and must not reach a slice
    fn is_inline_marker(&self, _event: &CdEvent) -> bool {
        false
    }
}

/// Side-channel trigger input of the event sensor
#[derive(Debug, Clone, Copy)]
pub struct ExtTriggerMarker {
    pub channel: u8,
    pub rising_only: bool,
}

impl MarkerStrategy for ExtTriggerMarker {
    fn name(&self) -> &'static str {
        "ext_trigger"
    }

    fn markers(&self, batch: &EventBatch) -> Vec<u64> {
        batch
            .triggers
            .iter()
            .filter(|t| t.channel == self.channel && (t.rising || !self.rising_only))
            .map(|t| t.t)
            .collect()
    }
}

/// Synthetic events injected at a pixel address no real event can have
#[derive(Debug, Clone, Copy)]
pub struct ReservedPixelMarker {
    pub x: u16,
    pub y: u16,
}

impl MarkerStrategy for ReservedPixelMarker {
    fn name(&self) -> &'static str {
        "reserved_pixel"
    }

    fn markers(&self, batch: &EventBatch) -> Vec<u64> {
        batch
            .events
            .iter()
            .filter(|e| self.is_inline_marker(e))
            .map(|e| e.t)
            .collect()
    }

    fn is_inline_marker(&self, event: &CdEvent) -> bool {
        event.x == self.x && event.y == self.y
    }
}

/// Build the strategy named by the configuration
pub fn marker_strategy(config: &MarkerConfig) -> Arc<dyn MarkerStrategy> {
    match *config {
        MarkerConfig::ExtTrigger {
            channel,
            rising_only,
        } => Arc::new(ExtTriggerMarker {
            channel,
            rising_only,
        }),
        MarkerConfig::ReservedPixel { x, y } => Arc::new(ReservedPixelMarker { x, y }),
    }
}

/// Detector counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorStats {
    pub observed: u64,
    pub missed: u64,
    /// Duplicate, bouncing or late markers that were discarded
    pub rejected: u64,
}

#[derive(Debug, Clone, Copy)]
struct EdgePoint {
    index: u64,
    ts: u64,
}

/// Per-stream trigger edge detector
pub struct TriggerEdgeDetector {
    stream_id: StreamId,
    stream: StreamKind,
    marker: Option<Arc<dyn MarkerStrategy>>,
    nominal_period: f64,
    /// Smoothed period in device ticks, the last known slope
    period: f64,
    /// Lateness tolerated past the expected edge time (device ticks)
    jitter_ticks: u64,
    last_observed: Option<EdgePoint>,
    last_assigned: Option<EdgePoint>,
    stats: DetectorStats,
}

impl fmt::Debug for TriggerEdgeDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerEdgeDetector")
            .field("stream", &self.stream)
            .field("period", &self.period)
            .field("last_index", &self.last_index())
            .field("stats", &self.stats)
            .finish()
    }
}

impl TriggerEdgeDetector {
    /// Detector for a frame stream: one edge per frame
    pub fn for_frames(stream: &StreamConfig, trigger_hz: f64, jitter_tolerance_ms: f64) -> Self {
        Self::new(stream, StreamKind::Frame, None, trigger_hz, jitter_tolerance_ms)
    }

    /// Detector for an event stream using the given marker strategy
    pub fn for_events(
        stream: &StreamConfig,
        marker: Arc<dyn MarkerStrategy>,
        trigger_hz: f64,
        jitter_tolerance_ms: f64,
    ) -> Self {
        Self::new(
            stream,
            StreamKind::Event,
            Some(marker),
            trigger_hz,
            jitter_tolerance_ms,
        )
    }

    fn new(
        stream: &StreamConfig,
        kind: StreamKind,
        marker: Option<Arc<dyn MarkerStrategy>>,
        trigger_hz: f64,
        jitter_tolerance_ms: f64,
    ) -> Self {
        let nominal_period = stream.tick_hz / trigger_hz;
        Self {
            stream_id: stream.id.clone(),
            stream: kind,
            marker,
            nominal_period,
            period: nominal_period,
            jitter_ticks: stream.ms_to_ticks(jitter_tolerance_ms),
            last_observed: None,
            last_assigned: None,
            stats: DetectorStats::default(),
        }
    }

    /// Extract the trigger edges carried by one sample
    pub fn ingest(&mut self, sample: &RawSample) -> Vec<TriggerEdge> {
        match sample {
            RawSample::Events(batch) => self.ingest_events(batch),
            RawSample::Frame(frame) => self.ingest_frame(frame),
        }
    }

    pub fn ingest_frame(&mut self, frame: &FrameSample) -> Vec<TriggerEdge> {
        let mut edges = Vec::new();
        self.on_marker(frame.capture_ts, &mut edges);
        edges
    }

    pub fn ingest_events(&mut self, batch: &EventBatch) -> Vec<TriggerEdge> {
        let mut edges = Vec::new();
        let markers = match &self.marker {
            Some(marker) => marker.markers(batch),
            None => Vec::new(),
        };
        for ts in markers {
            self.on_marker(ts, &mut edges);
        }
        if let Some(now) = batch.last_ts() {
            edges.extend(self.check_timeout(now));
        }
        edges
    }

    /// Declare the next edge missed when `device_now` is past its deadline
    ///
    /// Never blocks; a long silence yields one missed edge per elapsed period.
    pub fn check_timeout(&mut self, device_now: u64) -> Vec<TriggerEdge> {
        let mut edges = Vec::new();
        while let Some(last) = self.last_assigned {
            let expected = last.ts + self.period.round() as u64;
            if device_now <= expected + self.jitter_ticks {
                break;
            }
            let point = EdgePoint {
                index: last.index + 1,
                ts: expected,
            };
            edges.push(self.emit_missed(point));
        }
        edges
    }

    fn on_marker(&mut self, ts: u64, out: &mut Vec<TriggerEdge>) {
        let index = match self.last_observed {
            None => match self.last_assigned {
                Some(assigned) => assigned.index + 1,
                None => 0,
            },
            Some(prev) => {
                if ts <= prev.ts {
                    self.reject(ts, "marker not after previous edge");
                    return;
                }
                let steps = ((ts - prev.ts) as f64 / self.period).round() as u64;
                if steps == 0 {
                    self.reject(ts, "marker within half a period of previous edge");
                    return;
                }
                if steps == 1 {
                    self.observe_period((ts - prev.ts) as f64);
                }
                prev.index + steps
            }
        };

        if let Some(assigned) = self.last_assigned {
            if index <= assigned.index {
                self.reject(ts, "marker for an index already declared missed");
                return;
            }
            // Fill the gap with explicit missed edges
            let anchor = self.last_observed.unwrap_or(assigned);
            for missing in (assigned.index + 1)..index {
                let offset = (missing - anchor.index) as f64 * self.period;
                let point = EdgePoint {
                    index: missing,
                    ts: anchor.ts + offset.round() as u64,
                };
                out.push(self.emit_missed(point));
            }
        }

        let point = EdgePoint { index, ts };
        self.last_observed = Some(point);
        self.last_assigned = Some(point);
        self.stats.observed += 1;
        metrics::counter!(
            "evsync_trigger_edges_total",
            "stream" => self.stream.as_str(),
            "kind" => "observed"
        )
        .increment(1);
        trace!(stream = %self.stream_id, index, ts, "trigger edge");
        out.push(TriggerEdge::observed(
            self.stream_id.clone(),
            self.stream,
            index,
            ts,
        ));
    }

    fn emit_missed(&mut self, point: EdgePoint) -> TriggerEdge {
        self.last_assigned = Some(point);
        self.stats.missed += 1;
        metrics::counter!(
            "evsync_trigger_edges_total",
            "stream" => self.stream.as_str(),
            "kind" => "missed"
        )
        .increment(1);
        debug!(
            stream = %self.stream_id,
            index = point.index,
            estimated_ts = point.ts,
            "trigger edge missed, extrapolated"
        );
        TriggerEdge::missed(self.stream_id.clone(), self.stream, point.index, point.ts)
    }

    fn observe_period(&mut self, dt: f64) {
        if (dt - self.nominal_period).abs() <= self.nominal_period * PERIOD_ACCEPT_RATIO {
            self.period += PERIOD_ALPHA * (dt - self.period);
        }
    }

    fn reject(&mut self, ts: u64, reason: &'static str) {
        self.stats.rejected += 1;
        debug!(stream = %self.stream_id, ts, reason, "trigger marker rejected");
    }

    /// Index of the latest edge, observed or missed
    pub fn last_index(&self) -> Option<u64> {
        self.last_assigned.map(|p| p.index)
    }

    /// Current period estimate in device ticks
    pub fn period_ticks(&self) -> f64 {
        self.period
    }

    pub fn marker(&self) -> Option<&Arc<dyn MarkerStrategy>> {
        self.marker.as_ref()
    }

    pub fn stats(&self) -> DetectorStats {
        self.stats
    }
}
