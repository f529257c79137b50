//! Simulated capture rig
//!
//! Generates both streams from one trigger timeline: trigger `i` fires at
//! reference time `i / trigger_hz`, each device stamps it in its own drifting
//! clock. Generation is window by window with a per-window seeded RNG, so any
//! window can be produced independently and the output never depends on how
//! far the rig was played before.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use contracts::{
    CdEvent, DeviceCallback, DeviceConfig, DeviceSource, EventBatch, ExtTriggerEvent,
    FrameSample, ImageData, ImageFormat, MarkerConfig, Polarity, RawSample, RigBlueprint,
    StreamKind, DEFAULT_TICK_HZ,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, trace, warn};

use crate::error::{IngestionError, Result};
use crate::recording::{CaptureRecording, RecordedEntry, RecordedSignal, RecordedStream};

/// Timing profile of one simulated device
#[derive(Debug, Clone, PartialEq)]
pub struct MockStreamProfile {
    pub id: String,
    pub tick_hz: f64,
    /// Device clock reading at reference time zero (microseconds)
    pub clock_offset_us: f64,
    /// Device clock rate error (parts per million)
    pub drift_ppm: f64,
    /// Delay between capture and delivery (microseconds)
    pub latency_us: u64,
    /// Trigger indices whose marker (events) or frame is never delivered.
    /// Index 0 is ignored: a stream's numbering starts at its first edge.
    pub missing: BTreeSet<u64>,
    /// Reference time at which the device goes away
    pub disconnect_after_s: Option<f64>,
}

impl MockStreamProfile {
    fn new(id: &str, clock_offset_us: f64, drift_ppm: f64, latency_us: u64) -> Self {
        Self {
            id: id.to_string(),
            tick_hz: DEFAULT_TICK_HZ,
            clock_offset_us,
            drift_ppm,
            latency_us,
            missing: BTreeSet::new(),
            disconnect_after_s: None,
        }
    }

    /// Device timestamp of a reference instant
    pub fn device_ts(&self, reference_s: f64) -> u64 {
        let local = (reference_s + self.clock_offset_us * 1e-6) * (1.0 + self.drift_ppm * 1e-6);
        (local * self.tick_hz).round().max(0.0) as u64
    }

    fn is_missing(&self, index: u64) -> bool {
        index != 0 && self.missing.contains(&index)
    }
}

/// Mock rig configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MockRigConfig {
    pub trigger_hz: f64,
    pub seed: u64,
    pub marker: MarkerConfig,
    /// Pixel events generated inside each trigger window
    pub events_per_window: usize,
    /// Reference span covered by one event batch (microseconds)
    pub batch_us: u64,
    pub sensor_width: u16,
    pub sensor_height: u16,
    pub frame_width: u32,
    pub frame_height: u32,
    pub exposure_us: u32,
    pub event: MockStreamProfile,
    pub frame: MockStreamProfile,
}

impl Default for MockRigConfig {
    fn default() -> Self {
        Self {
            trigger_hz: 30.0,
            seed: 7,
            marker: MarkerConfig::default(),
            events_per_window: 200,
            batch_us: 5_000,
            sensor_width: 640,
            sensor_height: 480,
            frame_width: 64,
            frame_height: 48,
            exposure_us: 8_000,
            event: MockStreamProfile::new("events", 250_000.0, 20.0, 1_000),
            frame: MockStreamProfile::new("rgbd", 1_700_000.0, -35.0, 12_000),
        }
    }
}

impl MockRigConfig {
    /// Mock rig matching a blueprint's devices
    ///
    /// Timing knobs come from each device's `params`; anything absent keeps
    /// its default.
    pub fn from_blueprint(blueprint: &RigBlueprint) -> Result<Self> {
        let defaults = Self::default();
        let engine = blueprint.to_sync_engine_config();
        let event = &blueprint.devices.event_camera;
        let frame = &blueprint.devices.rgbd_camera;

        Ok(Self {
            trigger_hz: engine.trigger_hz,
            seed: param(event, "seed", defaults.seed)?,
            marker: engine.event_stream.marker,
            events_per_window: param(event, "events_per_window", defaults.events_per_window)?,
            batch_us: param(event, "batch_us", defaults.batch_us)?.max(1),
            sensor_width: param(event, "width", defaults.sensor_width)?.max(1),
            sensor_height: param(event, "height", defaults.sensor_height)?.max(1),
            frame_width: param(frame, "width", defaults.frame_width)?,
            frame_height: param(frame, "height", defaults.frame_height)?,
            exposure_us: param(frame, "exposure_us", defaults.exposure_us)?,
            event: profile(event, &defaults.event)?,
            frame: profile(frame, &defaults.frame)?,
        })
    }

}

fn profile(device: &DeviceConfig, defaults: &MockStreamProfile) -> Result<MockStreamProfile> {
    let missing = match device.params.get("missing") {
        Some(list) => parse_index_list(&device.id, list)?,
        None => BTreeSet::new(),
    };
    let disconnect_after_s = match device.params.get("disconnect_after_s") {
        Some(raw) => Some(raw.trim().parse::<f64>().map_err(|e| {
            IngestionError::invalid_param(&device.id, "disconnect_after_s", e.to_string())
        })?),
        None => None,
    };

    Ok(MockStreamProfile {
        id: device.id.clone(),
        tick_hz: device.tick_hz,
        clock_offset_us: param(device, "clock_offset_us", defaults.clock_offset_us)?,
        drift_ppm: param(device, "drift_ppm", defaults.drift_ppm)?,
        latency_us: param(device, "latency_us", defaults.latency_us)?,
        missing,
        disconnect_after_s,
    })
}

fn param<T>(device: &DeviceConfig, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match device.params.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| IngestionError::invalid_param(&device.id, key, e.to_string())),
        None => Ok(default),
    }
}

fn parse_index_list(stream_id: &str, list: &str) -> Result<BTreeSet<u64>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map_err(|e| IngestionError::invalid_param(stream_id, "missing", e.to_string()))
        })
        .collect()
}

/// What one trigger window contributes to one stream
#[derive(Debug)]
enum WindowEntries {
    Samples(Vec<RecordedEntry>),
    /// The device went away inside this window
    Disconnected(RecordedEntry),
    /// Past the disconnect
    Ended,
}

/// Deterministic generator of both streams
#[derive(Debug, Clone)]
pub struct MockRig {
    config: MockRigConfig,
}

impl MockRig {
    pub fn new(config: MockRigConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MockRigConfig {
        &self.config
    }

    pub fn profile(&self, kind: StreamKind) -> &MockStreamProfile {
        match kind {
            StreamKind::Event => &self.config.event,
            StreamKind::Frame => &self.config.frame,
        }
    }

    /// Reference time of trigger `index` (seconds)
    pub fn trigger_time(&self, index: u64) -> f64 {
        index as f64 / self.config.trigger_hz
    }

    /// Capture `duration` of both streams, ordered by arrival
    pub fn recording(&self, duration: Duration) -> CaptureRecording {
        let windows = (duration.as_secs_f64() * self.config.trigger_hz).floor() as u64;
        let mut entries = Vec::new();

        for kind in [StreamKind::Event, StreamKind::Frame] {
            for index in 0..windows {
                match self.window(kind, index) {
                    WindowEntries::Samples(samples) => entries.extend(samples),
                    WindowEntries::Disconnected(entry) => {
                        entries.push(entry);
                        break;
                    }
                    WindowEntries::Ended => break,
                }
            }
        }
        // stable: within one arrival instant events precede frames
        entries.sort_by_key(|e| (e.arrival_us, e.stream));

        info!(
            windows,
            entries = entries.len(),
            seed = self.config.seed,
            "mock recording generated"
        );

        CaptureRecording::new(
            self.config.trigger_hz,
            RecordedStream::new(&self.config.event.id, self.config.event.tick_hz),
            RecordedStream::new(&self.config.frame.id, self.config.frame.tick_hz),
            self.config.marker,
            entries,
        )
    }

    fn window(&self, kind: StreamKind, index: u64) -> WindowEntries {
        let profile = self.profile(kind);
        let start = self.trigger_time(index);

        if let Some(cutoff) = profile.disconnect_after_s {
            if start >= cutoff {
                // only the first window past the cutoff reports it
                if self.trigger_time(index.saturating_sub(1)) < cutoff || index == 0 {
                    return WindowEntries::Disconnected(RecordedEntry {
                        arrival_us: (cutoff * 1e6).round() as u64,
                        stream: kind,
                        signal: RecordedSignal::Disconnected {
                            reason: "simulated device disconnect".to_string(),
                        },
                    });
                }
                return WindowEntries::Ended;
            }
        }

        match kind {
            StreamKind::Event => WindowEntries::Samples(self.event_window(index)),
            StreamKind::Frame => {
                WindowEntries::Samples(self.frame_window(index).into_iter().collect())
            }
        }
    }

    fn rng(&self, kind: StreamKind, index: u64) -> StdRng {
        let stream = match kind {
            StreamKind::Event => 0x5EED_0001,
            StreamKind::Frame => 0x5EED_0002,
        };
        StdRng::seed_from_u64(
            self.config
                .seed
                .wrapping_mul(0x9E37_79B9_7F4A_7C15)
                .wrapping_add(index.wrapping_mul(0xBF58_476D_1CE4_E5B9))
                ^ stream,
        )
    }

    fn event_window(&self, index: u64) -> Vec<RecordedEntry> {
        let cfg = &self.config;
        let profile = &cfg.event;
        let mut rng = self.rng(StreamKind::Event, index);

        let start_s = self.trigger_time(index);
        let end_s = self.trigger_time(index + 1);
        let dev_start = profile.device_ts(start_s);
        let dev_end = profile.device_ts(end_s);

        let reserved = match cfg.marker {
            MarkerConfig::ReservedPixel { x, y } => Some((x, y)),
            MarkerConfig::ExtTrigger { .. } => None,
        };

        let mut events: Vec<CdEvent> = (0..cfg.events_per_window)
            .filter(|_| dev_end > dev_start + 1)
            .map(|_| {
                let mut x = rng.random_range(0..cfg.sensor_width);
                let y = rng.random_range(0..cfg.sensor_height);
                if reserved == Some((x, y)) {
                    x = (x + 1) % cfg.sensor_width;
                }
                CdEvent {
                    t: rng.random_range(dev_start + 1..dev_end),
                    x,
                    y,
                    polarity: if rng.random::<bool>() {
                        Polarity::On
                    } else {
                        Polarity::Off
                    },
                }
            })
            .collect();
        events.sort_by_key(|e| e.t);

        let marker = !profile.is_missing(index);
        let period_us = 1e6 / cfg.trigger_hz;
        let batches = ((period_us / cfg.batch_us as f64).ceil() as u64).max(1);
        let span = (dev_end - dev_start) as f64 / batches as f64;

        let mut remaining = events.into_iter().peekable();
        let mut out = Vec::with_capacity(batches as usize);
        for k in 0..batches {
            let batch_end = if k + 1 == batches {
                dev_end
            } else {
                dev_start + (span * (k + 1) as f64).round() as u64
            };

            let mut batch = EventBatch {
                seq: index * batches + k,
                events: Vec::new(),
                triggers: Vec::new(),
            };
            if k == 0 && marker {
                match cfg.marker {
                    MarkerConfig::ExtTrigger { channel, .. } => {
                        batch.triggers.push(ExtTriggerEvent {
                            t: dev_start,
                            channel,
                            rising: true,
                        });
                    }
                    MarkerConfig::ReservedPixel { x, y } => batch.events.push(CdEvent {
                        t: dev_start,
                        x,
                        y,
                        polarity: Polarity::On,
                    }),
                }
            }
            while let Some(event) = remaining.next_if(|e| e.t < batch_end) {
                batch.events.push(event);
            }

            let captured_s = start_s + (end_s - start_s) * (k + 1) as f64 / batches as f64;
            out.push(RecordedEntry {
                arrival_us: (captured_s * 1e6).round() as u64 + profile.latency_us,
                stream: StreamKind::Event,
                signal: RecordedSignal::Sample(RawSample::Events(batch)),
            });
        }

        if !marker {
            trace!(index, "marker withheld");
        }
        out
    }

    fn frame_window(&self, index: u64) -> Option<RecordedEntry> {
        let cfg = &self.config;
        let profile = &cfg.frame;
        if profile.is_missing(index) {
            trace!(index, "frame withheld");
            return None;
        }

        let mut rng = self.rng(StreamKind::Frame, index);
        let start_s = self.trigger_time(index);
        let (w, h) = (cfg.frame_width as usize, cfg.frame_height as usize);
        let shade = (index % 256) as u8;

        let mut color = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                color.extend_from_slice(&[(x % 256) as u8, (y % 256) as u8, shade]);
            }
        }
        let base_mm: u16 = rng.random_range(400..4_000);
        let mut depth = Vec::with_capacity(w * h * 2);
        for y in 0..h {
            for x in 0..w {
                let mm = base_mm.saturating_add(((x + y) % 512) as u16);
                depth.extend_from_slice(&mm.to_le_bytes());
            }
        }

        Some(RecordedEntry {
            arrival_us: (start_s * 1e6).round() as u64 + profile.latency_us,
            stream: StreamKind::Frame,
            signal: RecordedSignal::Sample(RawSample::Frame(FrameSample {
                seq: index,
                capture_ts: profile.device_ts(start_s),
                exposure_us: cfg.exposure_us,
                color: ImageData {
                    width: cfg.frame_width,
                    height: cfg.frame_height,
                    format: ImageFormat::Bgr8,
                    data: Bytes::from(color),
                },
                depth: ImageData {
                    width: cfg.frame_width,
                    height: cfg.frame_height,
                    format: ImageFormat::Depth16,
                    data: Bytes::from(depth),
                },
            })),
        })
    }
}

/// One stream of a [`MockRig`] played in real time
pub struct MockDevice {
    rig: Arc<MockRig>,
    kind: StreamKind,
    listening: Arc<AtomicBool>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MockDevice {
    pub fn new(rig: Arc<MockRig>, kind: StreamKind) -> Self {
        Self {
            rig,
            kind,
            listening: Arc::new(AtomicBool::new(false)),
            thread_handle: Mutex::new(None),
        }
    }
}

impl DeviceSource for MockDevice {
    fn stream_id(&self) -> &str {
        &self.rig.profile(self.kind).id
    }

    fn kind(&self) -> StreamKind {
        self.kind
    }

    fn tick_hz(&self) -> f64 {
        self.rig.profile(self.kind).tick_hz
    }

    fn listen(&self, callback: DeviceCallback) {
        // Idempotent: if already listening, don't start again
        if self.listening.swap(true, Ordering::SeqCst) {
            return;
        }

        let rig = Arc::clone(&self.rig);
        let kind = self.kind;
        let listening = Arc::clone(&self.listening);
        let stream_id = self.stream_id().to_string();

        let spawned = thread::Builder::new()
            .name(format!("mock-{}", kind))
            .spawn(move || {
                let started = Instant::now();
                debug!(stream_id = %stream_id, kind = %kind, "mock device started");

                'windows: for index in 0.. {
                    let entries = match rig.window(kind, index) {
                        WindowEntries::Samples(entries) => entries,
                        WindowEntries::Disconnected(entry) => vec![entry],
                        WindowEntries::Ended => break,
                    };
                    for entry in entries {
                        let due = Duration::from_micros(entry.arrival_us);
                        let elapsed = started.elapsed();
                        if due > elapsed {
                            thread::sleep(due - elapsed);
                        }
                        if !listening.load(Ordering::Relaxed) {
                            break 'windows;
                        }
                        let last = matches!(entry.signal, RecordedSignal::Disconnected { .. });
                        callback(entry.signal.into());
                        if last {
                            break 'windows;
                        }
                    }
                }

                listening.store(false, Ordering::SeqCst);
                debug!(stream_id = %stream_id, "mock device stopped");
            });

        match spawned {
            Ok(handle) => {
                *self
                    .thread_handle
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(handle);
            }
            Err(err) => {
                self.listening.store(false, Ordering::SeqCst);
                warn!(error = %err, "failed to spawn mock device thread");
            }
        }
    }

    fn stop(&self) {
        self.listening.store(false, Ordering::SeqCst);
        let handle = self
            .thread_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::DeviceSignal;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU64;

    fn frames(recording: &CaptureRecording) -> Vec<&FrameSample> {
        recording
            .entries
            .iter()
            .filter_map(|e| match &e.signal {
                RecordedSignal::Sample(RawSample::Frame(frame)) => Some(frame),
                _ => None,
            })
            .collect()
    }

    fn markers(recording: &CaptureRecording) -> Vec<u64> {
        recording
            .entries
            .iter()
            .filter_map(|e| match &e.signal {
                RecordedSignal::Sample(RawSample::Events(batch)) => Some(batch),
                _ => None,
            })
            .flat_map(|b| b.triggers.iter().map(|t| t.t))
            .collect()
    }

    #[test]
    fn test_recording_is_deterministic() {
        let rig = MockRig::new(MockRigConfig::default());
        let a = rig.recording(Duration::from_secs(1));
        let b = rig.recording(Duration::from_secs(1));
        assert_eq!(a.entries, b.entries);
        assert_eq!(frames(&a).len(), 30);
        assert_eq!(markers(&a).len(), 30);
    }

    #[test]
    fn test_entries_sorted_by_arrival() {
        let rig = MockRig::new(MockRigConfig::default());
        let recording = rig.recording(Duration::from_millis(500));
        assert!(recording
            .entries
            .windows(2)
            .all(|w| w[0].arrival_us <= w[1].arrival_us));
    }

    #[test]
    fn test_missing_markers_and_frames() {
        let mut config = MockRigConfig::default();
        config.event.missing = [0, 10].into_iter().collect();
        config.frame.missing = [5].into_iter().collect();
        let recording = MockRig::new(config.clone()).recording(Duration::from_secs(1));

        // index 0 cannot be withheld
        assert_eq!(markers(&recording).len(), 29);
        assert_eq!(markers(&recording)[0], config.event.device_ts(0.0));
        let seqs: Vec<u64> = frames(&recording).iter().map(|f| f.seq).collect();
        assert!(!seqs.contains(&5));
        assert_eq!(seqs.len(), 29);
    }

    #[test]
    fn test_drift_stretches_device_time() {
        let profile = MockStreamProfile {
            clock_offset_us: 0.0,
            drift_ppm: 100.0,
            ..MockStreamProfile::new("events", 0.0, 0.0, 0)
        };
        assert_eq!(profile.device_ts(1.0), 1_000_100);
    }

    #[test]
    fn test_disconnect_ends_stream() {
        let mut config = MockRigConfig::default();
        config.frame.disconnect_after_s = Some(0.5);
        let recording = MockRig::new(config).recording(Duration::from_secs(1));

        let last_frame = frames(&recording).last().map(|f| f.seq);
        assert_eq!(last_frame, Some(14));
        let disconnects: Vec<&RecordedEntry> = recording
            .entries
            .iter()
            .filter(|e| matches!(e.signal, RecordedSignal::Disconnected { .. }))
            .collect();
        assert_eq!(disconnects.len(), 1);
        assert_eq!(disconnects[0].stream, StreamKind::Frame);
        assert_eq!(disconnects[0].arrival_us, 500_000);
    }

    #[test]
    fn test_reserved_pixel_markers_inline() {
        let config = MockRigConfig {
            marker: MarkerConfig::ReservedPixel { x: 0, y: 0 },
            ..Default::default()
        };
        let recording = MockRig::new(config).recording(Duration::from_millis(200));
        let inline = recording
            .entries
            .iter()
            .filter_map(|e| match &e.signal {
                RecordedSignal::Sample(RawSample::Events(batch)) => Some(batch),
                _ => None,
            })
            .flat_map(|b| b.events.iter())
            .filter(|e| e.x == 0 && e.y == 0)
            .count();
        assert_eq!(inline, 6);
        assert!(markers(&recording).is_empty());
    }

    #[test]
    fn test_config_from_blueprint_params() {
        let mut blueprint: RigBlueprint = serde_json::from_str(
            r#"{
                "rig": { "name": "bench" },
                "devices": {
                    "event_camera": { "id": "prophesee" },
                    "rgbd_camera": { "id": "orbbec" }
                }
            }"#,
        )
        .unwrap();
        let params: HashMap<String, String> = [
            ("missing".to_string(), "3, 7".to_string()),
            ("drift_ppm".to_string(), "12.5".to_string()),
        ]
        .into_iter()
        .collect();
        blueprint.devices.rgbd_camera.params = params;

        let config = MockRigConfig::from_blueprint(&blueprint).unwrap();
        assert_eq!(config.event.id, "prophesee");
        assert_eq!(config.frame.drift_ppm, 12.5);
        assert_eq!(config.frame.missing, [3, 7].into_iter().collect());

        blueprint
            .devices
            .event_camera
            .params
            .insert("batch_us".to_string(), "fast".to_string());
        let err = MockRigConfig::from_blueprint(&blueprint).unwrap_err();
        assert!(matches!(err, IngestionError::InvalidParam { ref key, .. } if key == "batch_us"));
    }

    #[test]
    fn test_mock_device_plays_in_real_time() {
        let config = MockRigConfig {
            trigger_hz: 200.0,
            events_per_window: 10,
            ..Default::default()
        };
        let device = MockDevice::new(Arc::new(MockRig::new(config)), StreamKind::Frame);
        let count = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&count);

        device.listen(Arc::new(move |signal| {
            if let DeviceSignal::Sample(RawSample::Frame(_)) = signal {
                seen.fetch_add(1, Ordering::Relaxed);
            }
        }));
        assert!(device.is_listening());
        thread::sleep(Duration::from_millis(100));
        device.stop();

        assert!(!device.is_listening());
        assert!(count.load(Ordering::Relaxed) > 0);
    }
}
