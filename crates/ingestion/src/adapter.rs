//! Device adapter
//!
//! Bridges a `DeviceSource` callback to the stream producer of its engine
//! side. The callback runs on the device's capture thread and never blocks on
//! the aligner: detection and the buffer push happen inline under the
//! producer's own lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use contracts::{DeviceCallback, DeviceSignal, DeviceSource, StreamKind};
use metrics::counter;
use sync_engine::{StreamProducer, StreamStatus};
use tracing::{debug, trace, warn};

use crate::error::{IngestionError, Result};
use crate::metrics::IngestionMetrics;

/// One registered device and the producer it feeds
pub struct DeviceAdapter {
    stream_id: String,
    kind: StreamKind,
    source: Box<dyn DeviceSource>,
    producer: Arc<Mutex<StreamProducer>>,
    metrics: Arc<IngestionMetrics>,
    listening: Arc<AtomicBool>,
}

impl std::fmt::Debug for DeviceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceAdapter")
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .field("listening", &self.is_listening())
            .finish()
    }
}

impl DeviceAdapter {
    /// Pair a device with the producer of the same stream
    ///
    /// # Errors
    /// `IngestionError::StreamMismatch` when the device's id or kind differs
    /// from the producer's.
    pub fn new(source: Box<dyn DeviceSource>, producer: StreamProducer) -> Result<Self> {
        if source.kind() != producer.kind() || source.stream_id() != producer.stream_id().as_str()
        {
            return Err(IngestionError::StreamMismatch {
                stream_id: source.stream_id().to_string(),
                device: source.kind(),
                producer_id: producer.stream_id().to_string(),
                producer: producer.kind(),
            });
        }

        Ok(Self {
            stream_id: source.stream_id().to_string(),
            kind: source.kind(),
            source,
            producer: Arc::new(Mutex::new(producer)),
            metrics: Arc::new(IngestionMetrics::new()),
            listening: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn metrics(&self) -> Arc<IngestionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Register the callback and start capture; repeated calls are ignored
    pub fn start(&self) {
        if self.listening.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(stream_id = %self.stream_id, kind = %self.kind, "starting device adapter");

        let producer = Arc::clone(&self.producer);
        let metrics = Arc::clone(&self.metrics);
        let listening = Arc::clone(&self.listening);
        let callback: DeviceCallback = Arc::new(move |signal| {
            if !listening.load(Ordering::Relaxed) {
                return;
            }
            deliver(&producer, &metrics, signal);
        });

        self.source.listen(callback);
    }

    /// Stop capture and mark the stream finished
    ///
    /// A stream that already disconnected keeps its disconnect status.
    pub fn stop(&self) {
        if self.listening.swap(false, Ordering::SeqCst) {
            debug!(stream_id = %self.stream_id, "stopping device adapter");
        }
        self.source.stop();
        lock(&self.producer).close(StreamStatus::Finished);
    }

    /// Hand one signal to the producer on the caller's thread
    pub fn deliver(&self, signal: DeviceSignal) {
        deliver(&self.producer, &self.metrics, signal);
    }

    /// Whether the adapter accepts callbacks
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Relaxed)
    }

    /// Whether the device itself is still producing
    pub fn is_source_active(&self) -> bool {
        self.source.is_listening()
    }
}

fn lock(producer: &Mutex<StreamProducer>) -> std::sync::MutexGuard<'_, StreamProducer> {
    producer.lock().unwrap_or_else(PoisonError::into_inner)
}

fn deliver(producer: &Mutex<StreamProducer>, metrics: &IngestionMetrics, signal: DeviceSignal) {
    match signal {
        DeviceSignal::Sample(sample) => {
            metrics.record_received();
            let mut producer = lock(producer);
            observability::record_sample_received(producer.stream_id(), sample.kind());
            match producer.offer(sample) {
                Ok(outcome) => {
                    if !outcome.dropped.is_empty() {
                        metrics.record_buffer_drops(outcome.dropped.len() as u64);
                    }
                    trace!(stream_id = %producer.stream_id(), "sample accepted");
                }
                Err(err) => {
                    metrics.record_rejected();
                    let stream_id = producer.stream_id().to_string();
                    counter!("evsync_samples_rejected_total", "stream_id" => stream_id).increment(1);
                    warn!(stream_id = %producer.stream_id(), error = %err, "sample rejected");
                }
            }
        }
        DeviceSignal::Disconnected { reason } => {
            metrics.record_disconnect();
            let producer = lock(producer);
            let stream_id = producer.stream_id().to_string();
            counter!("evsync_device_disconnects_total", "stream_id" => stream_id).increment(1);
            warn!(stream_id = %producer.stream_id(), reason = %reason, "device disconnected");
            producer.close(StreamStatus::Disconnected { reason });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use contracts::{
        FrameSample, ImageData, ImageFormat, RawSample, SyncEngineConfig, DEFAULT_TICK_HZ,
    };
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    /// Frame device emitting one frame per nominal period
    struct TestFrameSource {
        stream_id: String,
        frames: u64,
        disconnect: bool,
        listening: Arc<AtomicBool>,
        thread: Mutex<Option<JoinHandle<()>>>,
    }

    impl TestFrameSource {
        fn new(stream_id: &str, frames: u64, disconnect: bool) -> Self {
            Self {
                stream_id: stream_id.to_string(),
                frames,
                disconnect,
                listening: Arc::new(AtomicBool::new(false)),
                thread: Mutex::new(None),
            }
        }
    }

    impl DeviceSource for TestFrameSource {
        fn stream_id(&self) -> &str {
            &self.stream_id
        }

        fn kind(&self) -> StreamKind {
            StreamKind::Frame
        }

        fn tick_hz(&self) -> f64 {
            DEFAULT_TICK_HZ
        }

        fn listen(&self, callback: DeviceCallback) {
            if self.listening.swap(true, Ordering::SeqCst) {
                return;
            }
            let frames = self.frames;
            let disconnect = self.disconnect;
            let listening = Arc::clone(&self.listening);
            let handle = thread::spawn(move || {
                for seq in 0..frames {
                    if !listening.load(Ordering::Relaxed) {
                        return;
                    }
                    callback(DeviceSignal::Sample(RawSample::Frame(FrameSample {
                        seq,
                        capture_ts: 1_000 + seq * 33_333,
                        exposure_us: 5_000,
                        color: ImageData {
                            width: 1,
                            height: 1,
                            format: ImageFormat::Bgr8,
                            data: Bytes::from_static(&[1, 2, 3]),
                        },
                        depth: ImageData::empty(ImageFormat::Depth16),
                    })));
                }
                if disconnect {
                    callback(DeviceSignal::Disconnected {
                        reason: "usb reset".to_string(),
                    });
                }
                listening.store(false, Ordering::SeqCst);
            });
            *self.thread.lock().unwrap() = Some(handle);
        }

        fn stop(&self) {
            self.listening.store(false, Ordering::SeqCst);
            if let Some(handle) = self.thread.lock().unwrap().take() {
                let _ = handle.join();
            }
        }

        fn is_listening(&self) -> bool {
            self.listening.load(Ordering::Relaxed)
        }
    }

    fn wait_idle(adapter: &DeviceAdapter) {
        for _ in 0..200 {
            if !adapter.is_source_active() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_adapter_feeds_producer() {
        let config = SyncEngineConfig::default();
        let (_events, frames, inputs) = sync_engine::connect(&config);
        let source = TestFrameSource::new(&config.frame_stream.id, 5, false);

        let adapter = DeviceAdapter::new(Box::new(source), frames).unwrap();
        adapter.start();
        assert!(adapter.is_listening());
        wait_idle(&adapter);
        adapter.stop();

        let snapshot = adapter.metrics().snapshot();
        assert_eq!(snapshot.samples_received, 5);
        assert_eq!(snapshot.samples_rejected, 0);
        assert_eq!(inputs.frames.stats().depth, 5);
        assert_eq!(inputs.frames.status(), StreamStatus::Finished);
    }

    #[test]
    fn test_disconnect_survives_stop() {
        let config = SyncEngineConfig::default();
        let (_events, frames, inputs) = sync_engine::connect(&config);
        let source = TestFrameSource::new(&config.frame_stream.id, 2, true);

        let adapter = DeviceAdapter::new(Box::new(source), frames).unwrap();
        adapter.start();
        wait_idle(&adapter);
        adapter.stop();

        assert_eq!(adapter.metrics().snapshot().disconnects, 1);
        assert_eq!(
            inputs.frames.status(),
            StreamStatus::Disconnected {
                reason: "usb reset".to_string()
            }
        );
    }

    #[test]
    fn test_mismatched_stream_rejected() {
        let config = SyncEngineConfig::default();
        let (events, _frames, _inputs) = sync_engine::connect(&config);
        let source = TestFrameSource::new(&config.event_stream.id, 1, false);

        let err = DeviceAdapter::new(Box::new(source), events).unwrap_err();
        assert!(matches!(err, IngestionError::StreamMismatch { .. }));
    }
}
