//! # Sync Engine
//!
//! Event camera / RGBD frame synchronization core.
//!
//! Responsibilities:
//! - Trigger edge detection and numbering per stream
//! - Per-stream clock models against the trigger grid
//! - Bounded per-stream buffers shared between producer and aligner threads
//! - The Aligner, emitting `AlignedPair`s with bounded latency
//!
//! ## Usage
//!
//! ```ignore
//! use sync_engine::{connect, Aligner, AlignerRuntime, ShutdownSignal, SyncEngineConfig};
//!
//! let config = SyncEngineConfig::default();
//! let (mut events, mut frames, inputs) = connect(&config);
//! let poll = std::time::Duration::from_millis(config.poll_interval_ms);
//! let aligner = Aligner::new(config, inputs);
//! let runtime = AlignerRuntime::spawn(aligner, |pair| println!("{}", pair.trigger_index), poll, ShutdownSignal::new())?;
//!
//! // Device threads
//! events.offer(event_batch)?;
//! frames.offer(frame)?;
//! ```

mod buffer;
mod clock;
mod detector;
mod engine;
mod monitor;
mod runtime;
mod stream;

pub use buffer::{PushOutcome, StreamBuffer, Timestamped};
pub use clock::{ClockError, ClockModel, ClockUpdate};
pub use detector::{
    marker_strategy, DetectorStats, ExtTriggerMarker, MarkerStrategy, ReservedPixelMarker,
    TriggerEdgeDetector,
};
pub use engine::{Aligner, AlignerReport, AlignerStats};
pub use monitor::HealthMonitor;
pub use runtime::{AlignerRuntime, ShutdownSignal};
pub use stream::{
    connect, AlignerInputs, IndexedFrame, StreamHandle, StreamInbox, StreamProducer, StreamStatus,
};

// Re-export contracts types
pub use contracts::{
    AlignedPair, AlignerState, BufferStats, ClockModelConfig, DisconnectPolicy, PairMeta,
    SyncEngineConfig, SyncIncident,
};
