//! Sync engine configuration contracts that can be shared across crates.
//!
//! Read once at startup. Range checks are declared with `validator` and run by
//! `config_loader`.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::StreamId;

/// Sync engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SyncEngineConfig {
    /// Trigger pulse rate (Hz)
    #[validate(range(min = 0.1, max = 10000.0))]
    pub trigger_hz: f64,

    /// Event camera stream
    #[validate(nested)]
    pub event_stream: EventStreamConfig,

    /// RGBD camera stream
    #[validate(nested)]
    pub frame_stream: StreamConfig,

    /// How far past its expected time an edge may arrive before it is
    /// declared missed (milliseconds)
    #[validate(range(min = 0.0))]
    pub jitter_tolerance_ms: f64,

    /// Maximum reordering between samples of one stream (milliseconds)
    #[validate(range(min = 0.0))]
    pub out_of_order_ms: f64,

    /// Longest a window may wait for its inputs before forced emission
    /// (milliseconds of aligner time)
    #[validate(range(min = 1.0))]
    pub max_latency_ms: f64,

    #[validate(nested)]
    pub buffer: BufferConfig,

    #[validate(nested)]
    pub clock: ClockModelConfig,

    /// Edges retained per stream for late matching
    #[validate(range(min = 2))]
    pub edge_history: usize,

    /// Reaction to a device disconnect
    pub disconnect_policy: DisconnectPolicy,

    #[validate(nested)]
    pub monitor: MonitorConfig,

    /// Longest `OutputSink::accept` may hold the aligner thread (milliseconds)
    pub accept_budget_ms: u64,

    /// Aligner wake-up interval when no producer rings (milliseconds)
    #[validate(range(min = 1))]
    pub poll_interval_ms: u64,
}

impl Default for SyncEngineConfig {
    fn default() -> Self {
        Self {
            trigger_hz: 30.0,
            event_stream: EventStreamConfig::default(),
            frame_stream: StreamConfig {
                id: StreamId::from("rgbd"),
                tick_hz: DEFAULT_TICK_HZ,
            },
            jitter_tolerance_ms: 10.0,
            out_of_order_ms: 5.0,
            max_latency_ms: 500.0,
            buffer: BufferConfig::default(),
            clock: ClockModelConfig::default(),
            edge_history: 64,
            disconnect_policy: DisconnectPolicy::default(),
            monitor: MonitorConfig::default(),
            accept_budget_ms: 5,
            poll_interval_ms: 10,
        }
    }
}

impl SyncEngineConfig {
    /// Trigger period in reference seconds
    pub fn period_s(&self) -> f64 {
        1.0 / self.trigger_hz
    }

    /// Reference time of a trigger index on the grid
    pub fn grid_time(&self, trigger_index: u64) -> f64 {
        trigger_index as f64 / self.trigger_hz
    }

    pub fn stream_ids(&self) -> (StreamId, StreamId) {
        (self.event_stream.id.clone(), self.frame_stream.id.clone())
    }
}

/// Default device clock resolution: microseconds
pub const DEFAULT_TICK_HZ: f64 = 1_000_000.0;

/// One capture stream
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StreamConfig {
    pub id: StreamId,

    /// Device clock ticks per second
    #[validate(range(min = 1.0))]
    pub tick_hz: f64,
}

impl StreamConfig {
    /// Convert a millisecond span into device ticks
    pub fn ms_to_ticks(&self, ms: f64) -> u64 {
        (ms * self.tick_hz / 1000.0).round().max(0.0) as u64
    }
}

/// Event stream: stream identity plus trigger marker encoding
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EventStreamConfig {
    #[serde(flatten)]
    #[validate(nested)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub marker: MarkerConfig,
}

impl Default for EventStreamConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig {
                id: StreamId::from("events"),
                tick_hz: DEFAULT_TICK_HZ,
            },
            marker: MarkerConfig::default(),
        }
    }
}

impl std::ops::Deref for EventStreamConfig {
    type Target = StreamConfig;

    fn deref(&self) -> &StreamConfig {
        &self.stream
    }
}

/// How trigger pulses are encoded in the event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum MarkerConfig {
    /// Side-channel external trigger events on one input channel
    ExtTrigger {
        #[serde(default)]
        channel: u8,
        #[serde(default = "default_rising_only")]
        rising_only: bool,
    },
    /// Synthetic in-band events at a reserved pixel address
    ReservedPixel { x: u16, y: u16 },
}

fn default_rising_only() -> bool {
    true
}

impl Default for MarkerConfig {
    fn default() -> Self {
        MarkerConfig::ExtTrigger {
            channel: 0,
            rising_only: true,
        }
    }
}

/// Stream buffer bounds
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum event batches held
    #[validate(range(min = 2))]
    pub event_capacity: usize,
    /// Maximum frames held
    #[validate(range(min = 2))]
    pub frame_capacity: usize,
    /// Optional byte bound for the event buffer
    pub event_max_bytes: Option<usize>,
    /// Optional byte bound for the frame buffer
    pub frame_max_bytes: Option<usize>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
            frame_capacity: 64,
            event_max_bytes: None,
            frame_max_bytes: None,
        }
    }
}

/// Clock model tuning
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ClockModelConfig {
    /// Matched edges kept for the regression
    #[validate(range(min = 2))]
    pub history: usize,
    /// Residual above which an update is rejected (microseconds)
    #[validate(range(min = 1.0))]
    pub drift_anomaly_threshold_us: f64,
    /// Consecutive rejections after which the model is reseeded
    #[validate(range(min = 1))]
    pub reseed_after: u32,
}

impl Default for ClockModelConfig {
    fn default() -> Self {
        Self {
            history: 32,
            drift_anomaly_threshold_us: 5000.0,
            reseed_after: 5,
        }
    }
}

/// Periodic health report
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MonitorConfig {
    /// Report interval (seconds of aligner time), 0 disables
    #[validate(range(min = 0.0))]
    pub interval_s: f64,
    /// Frame-to-window misalignment that triggers a warning (microseconds)
    #[validate(range(min = 0.0))]
    pub alignment_warning_us: f64,
    /// Buffer fill ratio that triggers a warning
    #[validate(range(min = 0.0, max = 1.0))]
    pub buffer_warning_ratio: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_s: 5.0,
            alignment_warning_us: 2000.0,
            buffer_warning_ratio: 0.9,
        }
    }
}

/// What the aligner does when a device disconnects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectPolicy {
    /// Keep emitting single-stream records from the surviving device
    #[default]
    HalfOpen,
    /// Flush closed windows and stop
    Halt,
}
