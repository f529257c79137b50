//! Producer/consumer hand-off for one stream.
//!
//! A producer thread runs the stream's detector and pushes samples and edges
//! into a [`StreamHandle`]; the aligner thread drains it. The only shared
//! state is the per-stream mutex and a capacity-1 doorbell channel that the
//! producer rings with `try_send`, so producers never block on the aligner.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use contracts::{
    BufferStats, ContractError, EventBatch, FrameSample, RawSample, StreamId, StreamKind,
    SyncEngineConfig, TriggerEdge,
};
use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use crate::buffer::{PushOutcome, StreamBuffer, Timestamped};
use crate::detector::{marker_strategy, MarkerStrategy, TriggerEdgeDetector};

/// Frame tagged with the trigger index its edge was assigned
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedFrame {
    pub trigger_index: u64,
    pub frame: FrameSample,
}

/// Liveness of a stream as seen by the aligner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    Live,
    /// Producer ended normally (end of recording, stop)
    Finished,
    /// Device reported a disconnect
    Disconnected { reason: String },
}

impl StreamStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, StreamStatus::Live)
    }
}

/// Everything behind one stream's mutex
#[derive(Debug)]
pub struct StreamInbox<T> {
    pub buffer: StreamBuffer<T>,
    /// Edges not yet consumed by the aligner
    pub edges: VecDeque<TriggerEdge>,
    pub status: StreamStatus,
}

/// Shared handle to one stream
#[derive(Debug)]
pub struct StreamHandle<T> {
    id: StreamId,
    kind: StreamKind,
    inbox: Mutex<StreamInbox<T>>,
    doorbell: Sender<()>,
}

impl<T: Timestamped> StreamHandle<T> {
    pub fn new(id: StreamId, kind: StreamKind, buffer: StreamBuffer<T>, doorbell: Sender<()>) -> Self {
        Self {
            id,
            kind,
            inbox: Mutex::new(StreamInbox {
                buffer,
                edges: VecDeque::new(),
                status: StreamStatus::Live,
            }),
            doorbell,
        }
    }

    pub fn id(&self) -> &StreamId {
        &self.id
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Lock the inbox; a poisoned lock is recovered rather than propagated
    pub fn with_inbox<R>(&self, f: impl FnOnce(&mut StreamInbox<T>) -> R) -> R {
        let mut inbox = self.inbox.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut inbox)
    }

    /// Hand edges and an optional sample to the aligner
    pub fn publish(&self, edges: Vec<TriggerEdge>, sample: Option<T>) -> PushOutcome {
        let outcome = self.with_inbox(|inbox| {
            inbox.edges.extend(edges);
            match sample {
                Some(sample) if inbox.status.is_live() => inbox.buffer.push(sample),
                _ => PushOutcome::default(),
            }
        });
        self.ring();
        outcome
    }

    /// Mark the stream as ended; everything buffered becomes final
    pub fn close(&self, status: StreamStatus) {
        self.with_inbox(|inbox| {
            if inbox.status.is_live() {
                inbox.status = status;
            }
            inbox.buffer.close();
        });
        self.ring();
    }

    pub fn status(&self) -> StreamStatus {
        self.with_inbox(|inbox| inbox.status.clone())
    }

    pub fn stats(&self) -> BufferStats {
        self.with_inbox(|inbox| inbox.buffer.stats())
    }

    fn ring(&self) {
        // Full means the aligner has a wake-up pending already
        let _ = self.doorbell.try_send(());
    }
}

/// Consumer end handed to the aligner
#[derive(Debug)]
pub struct AlignerInputs {
    pub events: Arc<StreamHandle<EventBatch>>,
    pub frames: Arc<StreamHandle<IndexedFrame>>,
    pub doorbell: Receiver<()>,
}

enum ProducerTarget {
    Events(Arc<StreamHandle<EventBatch>>),
    Frames(Arc<StreamHandle<IndexedFrame>>),
}

/// Producer end of one stream: detector plus handle
///
/// Owned by the device's capture thread.
pub struct StreamProducer {
    detector: TriggerEdgeDetector,
    target: ProducerTarget,
    samples: u64,
    dropped: u64,
}

impl std::fmt::Debug for StreamProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamProducer")
            .field("stream", &self.kind())
            .field("detector", &self.detector)
            .field("samples", &self.samples)
            .finish()
    }
}

impl StreamProducer {
    pub fn kind(&self) -> StreamKind {
        match self.target {
            ProducerTarget::Events(_) => StreamKind::Event,
            ProducerTarget::Frames(_) => StreamKind::Frame,
        }
    }

    pub fn stream_id(&self) -> &StreamId {
        match &self.target {
            ProducerTarget::Events(handle) => handle.id(),
            ProducerTarget::Frames(handle) => handle.id(),
        }
    }

    /// Run detection on one sample and publish the result
    ///
    /// # Errors
    /// `ContractError::PayloadParse` when the sample belongs to the other
    /// stream kind.
    pub fn offer(&mut self, sample: RawSample) -> Result<PushOutcome, ContractError> {
        let kind = sample.kind();
        match (&self.target, sample) {
            (ProducerTarget::Events(handle), RawSample::Events(mut batch)) => {
                if !batch.events.is_sorted_by_key(|e| e.t) {
                    batch.events.sort_by_key(|e| e.t);
                }
                let edges = self.detector.ingest_events(&batch);
                self.samples += 1;
                let sample = (!batch.is_empty()).then_some(batch);
                let outcome = handle.publish(edges, sample);
                self.note_drops(&outcome);
                Ok(outcome)
            }
            (ProducerTarget::Frames(handle), RawSample::Frame(frame)) => {
                let edges = self.detector.ingest_frame(&frame);
                self.samples += 1;
                let index = edges
                    .iter()
                    .rev()
                    .find(|e| e.is_observed() && e.device_ts == frame.capture_ts)
                    .map(|e| e.trigger_index);
                let sample = match index {
                    Some(trigger_index) => Some(IndexedFrame {
                        trigger_index,
                        frame,
                    }),
                    None => {
                        self.dropped += 1;
                        debug!(
                            stream = %handle.id(),
                            capture_ts = frame.capture_ts,
                            "frame without a trigger edge discarded"
                        );
                        None
                    }
                };
                let outcome = handle.publish(edges, sample);
                self.note_drops(&outcome);
                Ok(outcome)
            }
            _ => Err(ContractError::PayloadParse {
                stream_id: self.stream_id().to_string(),
                message: format!("{} sample offered to a {} stream", kind, self.kind()),
            }),
        }
    }

    pub fn close(&self, status: StreamStatus) {
        match &self.target {
            ProducerTarget::Events(handle) => handle.close(status),
            ProducerTarget::Frames(handle) => handle.close(status),
        }
    }

    pub fn detector(&self) -> &TriggerEdgeDetector {
        &self.detector
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    fn note_drops(&mut self, outcome: &PushOutcome) {
        if outcome.dropped.is_empty() {
            return;
        }
        self.dropped += outcome.dropped.len() as u64;
        let stream = self.kind();
        metrics::counter!("evsync_buffer_drops_total", "stream" => stream.as_str())
            .increment(outcome.dropped.len() as u64);
        warn!(
            stream = %self.stream_id(),
            dropped = outcome.dropped.len(),
            first_ts = outcome.dropped[0].first_ts,
            "stream buffer full, oldest samples dropped"
        );
    }
}

/// Wire both streams for one engine instance
///
/// Returns the event producer, the frame producer and the aligner's inputs.
pub fn connect(config: &SyncEngineConfig) -> (StreamProducer, StreamProducer, AlignerInputs) {
    let (tx, rx) = crossbeam_channel::bounded(1);

    let event_cfg = &config.event_stream;
    let event_buffer = StreamBuffer::new(
        StreamKind::Event,
        config.buffer.event_capacity,
        event_cfg.ms_to_ticks(config.out_of_order_ms),
    )
    .with_max_bytes(config.buffer.event_max_bytes);
    let events = Arc::new(StreamHandle::new(
        event_cfg.id.clone(),
        StreamKind::Event,
        event_buffer,
        tx.clone(),
    ));

    let frame_cfg = &config.frame_stream;
    let frame_buffer = StreamBuffer::new(
        StreamKind::Frame,
        config.buffer.frame_capacity,
        frame_cfg.ms_to_ticks(config.out_of_order_ms),
    )
    .with_max_bytes(config.buffer.frame_max_bytes);
    let frames = Arc::new(StreamHandle::new(
        frame_cfg.id.clone(),
        StreamKind::Frame,
        frame_buffer,
        tx,
    ));

    let marker: Arc<dyn MarkerStrategy> = marker_strategy(&event_cfg.marker);
    let event_producer = StreamProducer {
        detector: TriggerEdgeDetector::for_events(
            event_cfg,
            marker,
            config.trigger_hz,
            config.jitter_tolerance_ms,
        ),
        target: ProducerTarget::Events(Arc::clone(&events)),
        samples: 0,
        dropped: 0,
    };
    let frame_producer = StreamProducer {
        detector: TriggerEdgeDetector::for_frames(
            frame_cfg,
            config.trigger_hz,
            config.jitter_tolerance_ms,
        ),
        target: ProducerTarget::Frames(Arc::clone(&frames)),
        samples: 0,
        dropped: 0,
    };

    (
        event_producer,
        frame_producer,
        AlignerInputs {
            events,
            frames,
            doorbell: rx,
        },
    )
}
