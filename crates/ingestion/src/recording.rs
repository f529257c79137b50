//! Capture recordings
//!
//! A recording is every device signal of one capture session in arrival
//! order, stamped with its arrival time. Stored as one bincode blob.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use contracts::{DeviceSignal, MarkerConfig, RawSample, StreamKind, SyncEngineConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{IngestionError, Result};

/// Current on-disk format version
pub const RECORDING_VERSION: u32 = 1;

/// Identity of one recorded stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedStream {
    pub id: String,
    pub tick_hz: f64,
}

impl RecordedStream {
    pub fn new(id: &str, tick_hz: f64) -> Self {
        Self {
            id: id.to_string(),
            tick_hz,
        }
    }
}

/// Marker encoding the event stream was captured with
///
/// Externally tagged so the binary format can decode it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordedMarker {
    ExtTrigger { channel: u8, rising_only: bool },
    ReservedPixel { x: u16, y: u16 },
}

impl From<MarkerConfig> for RecordedMarker {
    fn from(marker: MarkerConfig) -> Self {
        match marker {
            MarkerConfig::ExtTrigger {
                channel,
                rising_only,
            } => RecordedMarker::ExtTrigger {
                channel,
                rising_only,
            },
            MarkerConfig::ReservedPixel { x, y } => RecordedMarker::ReservedPixel { x, y },
        }
    }
}

impl From<RecordedMarker> for MarkerConfig {
    fn from(marker: RecordedMarker) -> Self {
        match marker {
            RecordedMarker::ExtTrigger {
                channel,
                rising_only,
            } => MarkerConfig::ExtTrigger {
                channel,
                rising_only,
            },
            RecordedMarker::ReservedPixel { x, y } => MarkerConfig::ReservedPixel { x, y },
        }
    }
}

/// Serializable twin of `DeviceSignal`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordedSignal {
    Sample(RawSample),
    Disconnected { reason: String },
}

impl From<RecordedSignal> for DeviceSignal {
    fn from(signal: RecordedSignal) -> Self {
        match signal {
            RecordedSignal::Sample(sample) => DeviceSignal::Sample(sample),
            RecordedSignal::Disconnected { reason } => DeviceSignal::Disconnected { reason },
        }
    }
}

/// One signal as it reached the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEntry {
    /// Microseconds since the session started
    pub arrival_us: u64,
    pub stream: StreamKind,
    pub signal: RecordedSignal,
}

/// Arrival-ordered capture of both streams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecording {
    pub version: u32,
    pub trigger_hz: f64,
    pub event_stream: RecordedStream,
    pub frame_stream: RecordedStream,
    pub marker: RecordedMarker,
    pub entries: Vec<RecordedEntry>,
}

impl CaptureRecording {
    pub fn new(
        trigger_hz: f64,
        event_stream: RecordedStream,
        frame_stream: RecordedStream,
        marker: MarkerConfig,
        entries: Vec<RecordedEntry>,
    ) -> Self {
        Self {
            version: RECORDING_VERSION,
            trigger_hz,
            event_stream,
            frame_stream,
            marker: marker.into(),
            entries,
        }
    }

    /// Write the recording to `path`, replacing any existing file
    pub fn save(&self, path: &Path) -> Result<()> {
        let io_err = |source| IngestionError::RecordingIo {
            path: path.to_path_buf(),
            source,
        };

        let file = File::create(path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self).map_err(|e| IngestionError::Decode {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        writer.flush().map_err(io_err)?;

        info!(
            path = %path.display(),
            entries = self.entries.len(),
            "recording saved"
        );
        Ok(())
    }

    /// Read a recording written by [`save`](Self::save)
    ///
    /// # Errors
    /// I/O failure, undecodable bytes, or a version other than
    /// [`RECORDING_VERSION`].
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| IngestionError::RecordingIo {
            path: path.to_path_buf(),
            source,
        })?;
        let recording: CaptureRecording = bincode::deserialize_from(BufReader::new(file))
            .map_err(|e| IngestionError::Decode {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        if recording.version != RECORDING_VERSION {
            return Err(IngestionError::UnsupportedVersion {
                path: path.to_path_buf(),
                found: recording.version,
                expected: RECORDING_VERSION,
            });
        }

        debug!(
            path = %path.display(),
            entries = recording.entries.len(),
            "recording loaded"
        );
        Ok(recording)
    }

    pub fn stream(&self, kind: StreamKind) -> &RecordedStream {
        match kind {
            StreamKind::Event => &self.event_stream,
            StreamKind::Frame => &self.frame_stream,
        }
    }

    /// Entries of one stream, in arrival order
    pub fn entries_for(&self, kind: StreamKind) -> impl Iterator<Item = &RecordedEntry> {
        self.entries.iter().filter(move |e| e.stream == kind)
    }

    pub fn sample_count(&self, kind: StreamKind) -> usize {
        self.entries_for(kind)
            .filter(|e| matches!(e.signal, RecordedSignal::Sample(_)))
            .count()
    }

    /// Arrival time of the last entry
    pub fn duration(&self) -> Duration {
        Duration::from_micros(self.entries.last().map(|e| e.arrival_us).unwrap_or(0))
    }

    /// Engine configuration whose streams match the recording
    ///
    /// Stream identity, clock rates, trigger rate and marker come from the
    /// recording; every other knob from `base`.
    pub fn engine_config(&self, base: SyncEngineConfig) -> SyncEngineConfig {
        let mut config = base;
        config.trigger_hz = self.trigger_hz;
        config.event_stream.stream.id = self.event_stream.id.as_str().into();
        config.event_stream.stream.tick_hz = self.event_stream.tick_hz;
        config.event_stream.marker = self.marker.into();
        config.frame_stream.id = self.frame_stream.id.as_str().into();
        config.frame_stream.tick_hz = self.frame_stream.tick_hz;
        config
    }
}
