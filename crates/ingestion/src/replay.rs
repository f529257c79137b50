//! Recording playback
//!
//! Two ways to consume a [`CaptureRecording`]: [`ReplayDevice`] plays one
//! stream on its own thread in (scaled) real time, and
//! [`replay_deterministic`] drives the whole engine on the calling thread with
//! the recorded arrival times as aligner time.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use contracts::{
    AlignedPair, DeviceCallback, DeviceSource, OutputSink, StreamKind, SyncEngineConfig,
};
use sync_engine::{Aligner, AlignerReport};
use tracing::{debug, info, instrument, warn};

use crate::adapter::DeviceAdapter;
use crate::error::Result;
use crate::recording::{CaptureRecording, RecordedSignal};

/// One stream of a recording played back as a device
pub struct ReplayDevice {
    recording: Arc<CaptureRecording>,
    kind: StreamKind,
    stream_id: String,
    speed: f64,
    listening: Arc<AtomicBool>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReplayDevice {
    /// Play `kind`'s entries; `speed` 2.0 plays twice as fast
    pub fn new(recording: Arc<CaptureRecording>, kind: StreamKind, speed: f64) -> Self {
        let stream_id = recording.stream(kind).id.clone();
        Self {
            recording,
            kind,
            stream_id,
            speed: speed.max(0.01),
            listening: Arc::new(AtomicBool::new(false)),
            thread_handle: Mutex::new(None),
        }
    }

    /// Present the stream under another id
    pub fn with_stream_id(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = stream_id.into();
        self
    }
}

impl DeviceSource for ReplayDevice {
    fn stream_id(&self) -> &str {
        &self.stream_id
    }

    fn kind(&self) -> StreamKind {
        self.kind
    }

    fn tick_hz(&self) -> f64 {
        self.recording.stream(self.kind).tick_hz
    }

    fn listen(&self, callback: DeviceCallback) {
        if self.listening.swap(true, Ordering::SeqCst) {
            return;
        }

        let recording = Arc::clone(&self.recording);
        let kind = self.kind;
        let speed = self.speed;
        let listening = Arc::clone(&self.listening);
        let stream_id = self.stream_id.clone();

        let spawned = thread::Builder::new()
            .name(format!("replay-{}", kind))
            .spawn(move || {
                debug!(stream_id = %stream_id, speed, "replay thread started");
                let started = Instant::now();

                for entry in recording.entries_for(kind) {
                    let due = Duration::from_secs_f64(entry.arrival_us as f64 * 1e-6 / speed);
                    let elapsed = started.elapsed();
                    if due > elapsed {
                        thread::sleep(due - elapsed);
                    }
                    if !listening.load(Ordering::Relaxed) {
                        debug!(stream_id = %stream_id, "replay stopped");
                        return;
                    }
                    callback(entry.signal.clone().into());
                }

                info!(stream_id = %stream_id, "replay completed");
                listening.store(false, Ordering::SeqCst);
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
                warn!(error = %err, "failed to spawn replay thread");
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

/// Align a recording on the calling thread
///
/// Each entry goes through its stream's adapter, then the aligner steps with
/// the entry's arrival time as its clock. No wall-clock time is read, so the
/// same recording and configuration always yield the same pairs.
///
/// # Errors
/// A disconnect under the halt policy, or a stream mismatch between the
/// recording and the adapters.
#[instrument(
    name = "replay_deterministic",
    skip(recording, config, sink),
    fields(entries = recording.entries.len())
)]
pub fn replay_deterministic<S: OutputSink>(
    recording: Arc<CaptureRecording>,
    config: SyncEngineConfig,
    mut sink: S,
) -> Result<AlignerReport> {
    let config = recording.engine_config(config);
    let (events, frames, inputs) = sync_engine::connect(&config);
    let mut aligner = Aligner::new(config, inputs);

    let event_adapter = DeviceAdapter::new(
        Box::new(ReplayDevice::new(Arc::clone(&recording), StreamKind::Event, 1.0)),
        events,
    )?;
    let frame_adapter = DeviceAdapter::new(
        Box::new(ReplayDevice::new(Arc::clone(&recording), StreamKind::Frame, 1.0)),
        frames,
    )?;

    for entry in &recording.entries {
        let adapter = match entry.stream {
            StreamKind::Event => &event_adapter,
            StreamKind::Frame => &frame_adapter,
        };
        adapter.deliver(entry.signal.clone().into());

        for pair in aligner.step(Duration::from_micros(entry.arrival_us)) {
            sink.accept(pair);
        }
        if aligner.is_halted() {
            warn!(arrival_us = entry.arrival_us, "replay halted by device disconnect");
            break;
        }
    }

    event_adapter.stop();
    frame_adapter.stop();
    for pair in aligner.finish(recording.duration()) {
        sink.accept(pair);
    }

    if let Some(err) = aligner.halt_error() {
        return Err(err.into());
    }
    let report = aligner.report();
    info!(
        pairs = report.stats.pairs_emitted,
        incomplete = report.stats.incomplete_pairs,
        "replay finished"
    );
    Ok(report)
}

/// Order-sensitive hash of a pair stream's bincode encoding (64-bit FNV-1a)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairDigest {
    state: u64,
    pairs: u64,
    bytes: u64,
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

impl Default for PairDigest {
    fn default() -> Self {
        Self {
            state: FNV_OFFSET,
            pairs: 0,
            bytes: 0,
        }
    }
}

impl PairDigest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one pair into the digest
    pub fn update(&mut self, pair: &AlignedPair) {
        // writing into the hasher itself cannot fail
        if let Err(err) = bincode::serialize_into(&mut *self, pair) {
            warn!(trigger_index = pair.trigger_index, error = %err, "pair not digestible");
            return;
        }
        self.pairs += 1;
    }

    pub fn value(&self) -> u64 {
        self.state
    }

    pub fn pairs(&self) -> u64 {
        self.pairs
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl std::fmt::Display for PairDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.state)
    }
}

impl Write for PairDigest {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for byte in buf {
            self.state ^= u64::from(*byte);
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
        self.bytes += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl OutputSink for PairDigest {
    fn accept(&mut self, pair: AlignedPair) {
        self.update(&pair);
    }
}

/// Whether a recorded stream ends in a disconnect
pub fn ends_disconnected(recording: &CaptureRecording, kind: StreamKind) -> bool {
    matches!(
        recording.entries_for(kind).last().map(|e| &e.signal),
        Some(RecordedSignal::Disconnected { .. })
    )
}
