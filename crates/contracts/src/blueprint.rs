//! RigBlueprint - config loader output
//!
//! Describes the whole capture rig: both devices, synchronization tuning and
//! output routing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{
    BufferConfig, ClockModelConfig, DisconnectPolicy, EventStreamConfig, MarkerConfig,
    MonitorConfig, StreamConfig, StreamKind, SyncEngineConfig, DEFAULT_TICK_HZ,
};

/// Config version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete rig blueprint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigBlueprint {
    #[serde(default)]
    pub version: ConfigVersion,

    pub rig: RigConfig,

    pub devices: DevicesConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

/// Rig identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigConfig {
    pub name: String,

    /// Free-form description, printed by `info`/`validate`
    #[serde(default)]
    pub description: Option<String>,
}

/// The two capture devices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicesConfig {
    pub event_camera: DeviceConfig,
    pub rgbd_camera: DeviceConfig,
}

impl DevicesConfig {
    pub fn get(&self, kind: StreamKind) -> &DeviceConfig {
        match kind {
            StreamKind::Event => &self.event_camera,
            StreamKind::Frame => &self.rgbd_camera,
        }
    }
}

/// One capture device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique stream identifier
    pub id: String,

    /// Where samples come from
    #[serde(default)]
    pub source: SourceType,

    /// Device clock ticks per second
    #[serde(default = "default_tick_hz")]
    pub tick_hz: f64,

    /// Trigger marker encoding (event camera only)
    #[serde(default)]
    pub marker: Option<MarkerConfig>,

    /// Source-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_tick_hz() -> f64 {
    DEFAULT_TICK_HZ
}

/// Device source kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Deterministic simulated device
    #[default]
    Mock,
    /// Samples played back from a capture recording
    Replay,
}

/// Synchronization tuning; every field falls back to the engine default
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub trigger_hz: Option<f64>,

    #[serde(default)]
    pub jitter_tolerance_ms: Option<f64>,

    #[serde(default)]
    pub out_of_order_ms: Option<f64>,

    #[serde(default)]
    pub max_latency_ms: Option<f64>,

    #[serde(default)]
    pub edge_history: Option<usize>,

    #[serde(default)]
    pub disconnect_policy: Option<DisconnectPolicy>,

    #[serde(default)]
    pub accept_budget_ms: Option<u64>,

    #[serde(default)]
    pub poll_interval_ms: Option<u64>,

    #[serde(default)]
    pub buffer: Option<BufferConfig>,

    #[serde(default)]
    pub clock: Option<ClockModelConfig>,

    #[serde(default)]
    pub monitor: Option<MonitorConfig>,
}

/// Sink output config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub name: String,

    pub sink_type: SinkType,

    /// Queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Type-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_queue_capacity() -> usize {
    100
}

/// Sink type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// Log summaries
    Log,
    /// Per-pair files on disk
    File,
}

impl RigBlueprint {
    /// Build the runtime engine configuration, filling gaps with defaults
    pub fn to_sync_engine_config(&self) -> SyncEngineConfig {
        let defaults = SyncEngineConfig::default();
        let sync = &self.sync;
        let event = &self.devices.event_camera;
        let frame = &self.devices.rgbd_camera;

        SyncEngineConfig {
            trigger_hz: sync.trigger_hz.unwrap_or(defaults.trigger_hz),
            event_stream: EventStreamConfig {
                stream: StreamConfig {
                    id: event.id.as_str().into(),
                    tick_hz: event.tick_hz,
                },
                marker: event.marker.unwrap_or_default(),
            },
            frame_stream: StreamConfig {
                id: frame.id.as_str().into(),
                tick_hz: frame.tick_hz,
            },
            jitter_tolerance_ms: sync
                .jitter_tolerance_ms
                .unwrap_or(defaults.jitter_tolerance_ms),
            out_of_order_ms: sync.out_of_order_ms.unwrap_or(defaults.out_of_order_ms),
            max_latency_ms: sync.max_latency_ms.unwrap_or(defaults.max_latency_ms),
            buffer: sync.buffer.clone().unwrap_or(defaults.buffer),
            clock: sync.clock.clone().unwrap_or(defaults.clock),
            edge_history: sync.edge_history.unwrap_or(defaults.edge_history),
            disconnect_policy: sync.disconnect_policy.unwrap_or(defaults.disconnect_policy),
            monitor: sync.monitor.clone().unwrap_or(defaults.monitor),
            accept_budget_ms: sync.accept_budget_ms.unwrap_or(defaults.accept_budget_ms),
            poll_interval_ms: sync.poll_interval_ms.unwrap_or(defaults.poll_interval_ms),
        }
    }
}
