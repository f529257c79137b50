//! # Ingestion
//!
//! Device side of the rig.
//!
//! Responsibilities:
//! - Wrap each `DeviceSource` in an adapter feeding its stream producer
//! - Simulated devices (`MockRig`, `MockDevice`) driven from one trigger timeline
//! - Capture recordings, real-time replay and deterministic single-thread replay
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::{open_devices, IngestionPipeline};
//!
//! let config = blueprint.to_sync_engine_config();
//! let (events, frames, inputs) = sync_engine::connect(&config);
//! let devices = open_devices(&blueprint)?;
//!
//! let mut pipeline = IngestionPipeline::new();
//! pipeline.register_device(devices.event.unwrap(), events)?;
//! pipeline.register_device(devices.frame.unwrap(), frames)?;
//! pipeline.start_all();
//! ```
//!
//! ## Deterministic Replay
//!
//! ```ignore
//! use ingestion::{replay_deterministic, CaptureRecording, PairDigest};
//!
//! let recording = Arc::new(CaptureRecording::load(path)?);
//! let mut digest = PairDigest::new();
//! replay_deterministic(recording, config, |pair| digest.update(&pair))?;
//! println!("{digest}");
//! ```

mod adapter;
mod devices;
mod error;
mod metrics;
mod mock;
mod pipeline;
mod recording;
mod replay;

pub use adapter::DeviceAdapter;
pub use devices::{open_devices, RigDevices};
pub use error::{IngestionError, Result};
pub use metrics::{IngestionMetrics, MetricsSnapshot};
pub use mock::{MockDevice, MockRig, MockRigConfig, MockStreamProfile};
pub use pipeline::IngestionPipeline;
pub use recording::{
    CaptureRecording, RecordedEntry, RecordedMarker, RecordedSignal, RecordedStream,
    RECORDING_VERSION,
};
pub use replay::{ends_disconnected, replay_deterministic, PairDigest, ReplayDevice};
