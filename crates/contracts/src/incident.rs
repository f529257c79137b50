//! Sync incidents
//!
//! Recoverable conditions are counted and surfaced as metrics rather than
//! returned as errors. Only `DeviceDisconnected` (under the halt policy) and
//! `ShutdownRequested` end the aligner loop.

use serde::{Deserialize, Serialize};

use crate::StreamKind;

/// Samples dropped by a full stream buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetGap {
    pub stream: StreamKind,
    /// Device ticks of the first entry in the dropped sample
    pub first_ts: u64,
    /// Device ticks of the last entry in the dropped sample
    pub last_ts: u64,
}

impl DatasetGap {
    /// Whether the dropped range intersects `[start, end)`
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        self.first_ts < end && self.last_ts >= start
    }
}

/// One occurrence of the error taxonomy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncIncident {
    /// Expected edge absent past its timeout; extrapolated instead
    MissedEdge { stream: StreamKind, trigger_index: u64 },

    /// Stream buffer was full and dropped its oldest sample
    BufferOverflowDrop { gap: DatasetGap },

    /// Clock update rejected for an excessive residual
    ClockAnomaly {
        stream: StreamKind,
        trigger_index: u64,
        residual_us: f64,
    },

    /// No frame will ever exist for this trigger index
    FrameDropped { trigger_index: u64 },

    /// Device went away; its stream is closed for good
    DeviceDisconnected { stream: StreamKind, reason: String },

    /// Explicit stop
    ShutdownRequested,
}

impl SyncIncident {
    pub fn kind(&self) -> IncidentKind {
        match self {
            SyncIncident::MissedEdge { .. } => IncidentKind::MissedEdge,
            SyncIncident::BufferOverflowDrop { .. } => IncidentKind::BufferOverflowDrop,
            SyncIncident::ClockAnomaly { .. } => IncidentKind::ClockAnomaly,
            SyncIncident::FrameDropped { .. } => IncidentKind::FrameDropped,
            SyncIncident::DeviceDisconnected { .. } => IncidentKind::DeviceDisconnected,
            SyncIncident::ShutdownRequested => IncidentKind::ShutdownRequested,
        }
    }
}

/// Incident discriminant, used as metric label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    MissedEdge,
    BufferOverflowDrop,
    ClockAnomaly,
    FrameDropped,
    DeviceDisconnected,
    ShutdownRequested,
}

impl IncidentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentKind::MissedEdge => "missed_edge",
            IncidentKind::BufferOverflowDrop => "buffer_overflow_drop",
            IncidentKind::ClockAnomaly => "clock_anomaly",
            IncidentKind::FrameDropped => "frame_dropped",
            IncidentKind::DeviceDisconnected => "device_disconnected",
            IncidentKind::ShutdownRequested => "shutdown_requested",
        }
    }
}

/// Running count per incident kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentCounters {
    pub missed_edges: u64,
    pub buffer_overflow_drops: u64,
    pub clock_anomalies: u64,
    pub frames_dropped: u64,
    pub device_disconnects: u64,
    pub shutdown_requests: u64,
}

impl IncidentCounters {
    pub fn record(&mut self, kind: IncidentKind) {
        let slot = match kind {
            IncidentKind::MissedEdge => &mut self.missed_edges,
            IncidentKind::BufferOverflowDrop => &mut self.buffer_overflow_drops,
            IncidentKind::ClockAnomaly => &mut self.clock_anomalies,
            IncidentKind::FrameDropped => &mut self.frames_dropped,
            IncidentKind::DeviceDisconnected => &mut self.device_disconnects,
            IncidentKind::ShutdownRequested => &mut self.shutdown_requests,
        };
        *slot += 1;
    }

    pub fn get(&self, kind: IncidentKind) -> u64 {
        match kind {
            IncidentKind::MissedEdge => self.missed_edges,
            IncidentKind::BufferOverflowDrop => self.buffer_overflow_drops,
            IncidentKind::ClockAnomaly => self.clock_anomalies,
            IncidentKind::FrameDropped => self.frames_dropped,
            IncidentKind::DeviceDisconnected => self.device_disconnects,
            IncidentKind::ShutdownRequested => self.shutdown_requests,
        }
    }

    /// Sum of the recoverable kinds
    pub fn recoverable_total(&self) -> u64 {
        self.missed_edges + self.buffer_overflow_drops + self.clock_anomalies + self.frames_dropped
    }
}
