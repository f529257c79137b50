//! TriggerEdge - detector output
//!
//! One pulse of the shared hardware trigger as seen by one stream.

use serde::{Deserialize, Serialize};

use crate::{StreamId, StreamKind};

/// How an edge came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Marker (or frame) actually seen on the stream
    Observed,
    /// Expected pulse that never showed up; timestamp is extrapolated
    Missed,
}

/// Trigger edge
///
/// `trigger_index` strictly increases per stream. A skipped pulse is
/// represented by an explicit `Missed` edge, indices are never renumbered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEdge {
    pub stream_id: StreamId,

    pub stream: StreamKind,

    /// Monotonic pulse number, first edge of a stream is 0
    pub trigger_index: u64,

    /// Device ticks (estimated for `Missed` edges)
    pub device_ts: u64,

    /// Reference seconds, filled once the stream's clock model resolves it
    pub reference_ts: Option<f64>,

    pub kind: EdgeKind,
}

impl TriggerEdge {
    pub fn observed(stream_id: StreamId, stream: StreamKind, index: u64, device_ts: u64) -> Self {
        Self {
            stream_id,
            stream,
            trigger_index: index,
            device_ts,
            reference_ts: None,
            kind: EdgeKind::Observed,
        }
    }

    pub fn missed(stream_id: StreamId, stream: StreamKind, index: u64, estimated_ts: u64) -> Self {
        Self {
            kind: EdgeKind::Missed,
            ..Self::observed(stream_id, stream, index, estimated_ts)
        }
    }

    pub fn is_observed(&self) -> bool {
        self.kind == EdgeKind::Observed
    }
}
