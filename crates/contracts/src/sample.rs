//! RawSample - device output
//!
//! One capture unit as handed over by a device callback: either a batch of
//! pixel events or one RGBD frame. Samples are immutable once produced and
//! move into their stream buffer by value.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Which of the two synchronized streams a sample belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Asynchronous event camera
    Event,
    /// Hardware-triggered RGBD camera
    Frame,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Event => "event",
            StreamKind::Frame => "frame",
        }
    }

    /// The other stream of the pair
    pub fn peer(&self) -> StreamKind {
        match self {
            StreamKind::Event => StreamKind::Frame,
            StreamKind::Frame => StreamKind::Event,
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Brightness change direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Off,
    On,
}

impl Polarity {
    pub fn as_u8(self) -> u8 {
        match self {
            Polarity::Off => 0,
            Polarity::On => 1,
        }
    }
}

/// Contrast-detection event from one pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdEvent {
    /// Device ticks
    pub t: u64,
    pub x: u16,
    pub y: u16,
    pub polarity: Polarity,
}

/// External trigger input sampled by the event sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtTriggerEvent {
    /// Device ticks
    pub t: u64,
    /// Trigger input channel (0 = main)
    pub channel: u8,
    /// Rising edge (`true`) or falling edge
    pub rising: bool,
}

/// Ordered run of events read from the event camera in one callback
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    /// Per-stream batch counter
    pub seq: u64,

    /// Pixel events, ordered by `t`
    pub events: Vec<CdEvent>,

    /// Trigger signals delivered alongside the pixel events
    #[serde(default)]
    pub triggers: Vec<ExtTriggerEvent>,
}

impl EventBatch {
    /// Timestamp of the earliest entry (pixel or trigger)
    pub fn first_ts(&self) -> Option<u64> {
        let pixel = self.events.first().map(|e| e.t);
        let trigger = self.triggers.iter().map(|t| t.t).min();
        match (pixel, trigger) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Timestamp of the latest entry (pixel or trigger)
    pub fn last_ts(&self) -> Option<u64> {
        let pixel = self.events.last().map(|e| e.t);
        let trigger = self.triggers.iter().map(|t| t.t).max();
        match (pixel, trigger) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.triggers.is_empty()
    }

    /// Approximate heap footprint, used for byte-bounded buffers
    pub fn byte_size(&self) -> usize {
        self.events.len() * std::mem::size_of::<CdEvent>()
            + self.triggers.len() * std::mem::size_of::<ExtTriggerEvent>()
    }
}

/// Image buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    /// Raw pixel data (zero-copy)
    pub data: Bytes,
}

impl ImageData {
    pub fn empty(format: ImageFormat) -> Self {
        Self {
            width: 0,
            height: 0,
            format,
            data: Bytes::new(),
        }
    }
}

/// Pixel layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    Bgr8,
    Rgb8,
    /// Little-endian u16 depth in millimetres
    Depth16,
}

impl ImageFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            ImageFormat::Bgr8 | ImageFormat::Rgb8 => 3,
            ImageFormat::Depth16 => 2,
        }
    }
}

/// One hardware-triggered RGBD capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSample {
    /// Per-stream frame counter reported by the device
    pub seq: u64,

    /// Device ticks at capture
    pub capture_ts: u64,

    /// Exposure duration reported by the device (microseconds)
    pub exposure_us: u32,

    pub color: ImageData,

    pub depth: ImageData,
}

impl FrameSample {
    pub fn byte_size(&self) -> usize {
        self.color.data.len() + self.depth.data.len()
    }
}

/// One capture unit from either device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawSample {
    Events(EventBatch),
    Frame(FrameSample),
}

impl RawSample {
    pub fn kind(&self) -> StreamKind {
        match self {
            RawSample::Events(_) => StreamKind::Event,
            RawSample::Frame(_) => StreamKind::Frame,
        }
    }

    /// Device timestamp ordering this sample within its stream
    pub fn device_ts(&self) -> Option<u64> {
        match self {
            RawSample::Events(batch) => batch.first_ts(),
            RawSample::Frame(frame) => Some(frame.capture_ts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cd(t: u64) -> CdEvent {
        CdEvent {
            t,
            x: 1,
            y: 2,
            polarity: Polarity::On,
        }
    }

    #[test]
    fn test_batch_bounds_include_triggers() {
        let batch = EventBatch {
            seq: 0,
            events: vec![cd(110), cd(150)],
            triggers: vec![ExtTriggerEvent {
                t: 100,
                channel: 0,
                rising: true,
            }],
        };
        assert_eq!(batch.first_ts(), Some(100));
        assert_eq!(batch.last_ts(), Some(150));
        assert!(!batch.is_empty());
    }

    #[test]
    fn test_empty_batch_has_no_bounds() {
        let batch = EventBatch::default();
        assert_eq!(batch.first_ts(), None);
        assert!(batch.is_empty());
        assert_eq!(RawSample::Events(batch).device_ts(), None);
    }

    #[test]
    fn test_stream_kind_peer() {
        assert_eq!(StreamKind::Event.peer(), StreamKind::Frame);
        assert_eq!(StreamKind::Frame.to_string(), "frame");
    }
}
