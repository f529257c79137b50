//! AlignedPair - Aligner output
//!
//! A frame together with the events captured between its trigger edge and
//! the next one.

use serde::{Deserialize, Serialize};

use crate::{CdEvent, FrameSample, IncidentCounters, StreamKind};

/// Aligner state machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignerState {
    /// Fewer than two matched edges on a stream, nothing is emitted
    #[default]
    Warmup,
    /// Both clocks calibrated, pairs flowing
    Steady,
    /// A stream is inside a run of missed edges, pairs use extrapolation
    Degraded,
    /// One device is gone, emitting single-stream records
    HalfOpen,
    /// Stop requested
    Shutdown,
}

impl AlignerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlignerState::Warmup => "warmup",
            AlignerState::Steady => "steady",
            AlignerState::Degraded => "degraded",
            AlignerState::HalfOpen => "half_open",
            AlignerState::Shutdown => "shutdown",
        }
    }
}

/// How much the window boundaries can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Both boundaries are observed edges
    Nominal,
    /// At least one boundary was extrapolated from the clock model
    Extrapolated,
}

/// Which streams contributed to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairMode {
    Paired,
    /// Event stream lost; frame with an empty slice
    FrameOnly,
    /// Frame stream lost; slice without a frame
    EventOnly,
}

/// Event with its reference time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignedEvent {
    pub event: CdEvent,
    /// Reference seconds
    pub t_ref: f64,
}

/// Linear clock mapping at the time a pair was produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClockSnapshot {
    /// Reference seconds per device second
    pub slope: f64,
    /// Reference seconds at the model origin
    pub intercept: f64,
    /// Device tick the intercept is anchored at
    pub origin_ts: u64,
    pub sample_count: u64,
    /// Reference time of the last accepted update
    pub last_update: Option<f64>,
}

impl ClockSnapshot {
    /// Rate error against the trigger grid, parts per million
    pub fn drift_ppm(&self) -> f64 {
        (self.slope - 1.0) * 1e6
    }
}

/// Per-pair diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairMeta {
    /// Window start, reference seconds (inclusive)
    pub window_start: f64,
    /// Window end, reference seconds (exclusive)
    pub window_end: f64,
    /// Window start in event device ticks
    pub window_start_device: u64,
    /// Window end in event device ticks
    pub window_end_device: u64,
    /// Frame capture time projected to reference seconds
    pub frame_reference_ts: Option<f64>,
    /// Frame reference time minus window start (microseconds)
    pub alignment_error_us: Option<f64>,
    pub confidence: Confidence,
    /// `false` when the latency budget forced emission or events were dropped
    pub complete: bool,
    pub mode: PairMode,
    pub state: AlignerState,
    pub event_clock: ClockSnapshot,
    pub frame_clock: ClockSnapshot,
    /// Incidents counted so far (cumulative)
    pub incidents: IncidentCounters,
}

impl PairMeta {
    pub fn window_duration(&self) -> f64 {
        self.window_end - self.window_start
    }

    pub fn is_nominal(&self) -> bool {
        self.confidence == Confidence::Nominal && self.complete
    }
}

/// Aligned frame / event-slice pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedPair {
    /// Trigger pulse this record belongs to
    pub trigger_index: u64,

    /// `None` only for `PairMode::EventOnly`
    pub frame: Option<FrameSample>,

    /// Events in `[window_start, window_end)`, ordered by time
    pub events: Vec<AlignedEvent>,

    pub meta: PairMeta,
}

impl AlignedPair {
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn has_stream(&self, kind: StreamKind) -> bool {
        match (kind, self.meta.mode) {
            (StreamKind::Frame, PairMode::EventOnly) => false,
            (StreamKind::Event, PairMode::FrameOnly) => false,
            _ => true,
        }
    }
}

/// Buffer status snapshot (for diagnostics)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferStats {
    pub depth: usize,
    pub capacity: usize,
    pub bytes: usize,
    pub dropped: u64,
    pub out_of_order: u64,
    pub oldest_ts: Option<u64>,
    pub newest_ts: Option<u64>,
}

impl BufferStats {
    pub fn fill_ratio(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.depth as f64 / self.capacity as f64
    }
}
