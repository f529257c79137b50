//! DeviceSource trait - capture device abstraction
//!
//! Decouples the ingestion adapters from concrete drivers. Mock, replay and
//! real camera SDK wrappers all look the same to the pipeline.

use std::sync::Arc;

use crate::{RawSample, StreamKind};

/// What a device hands to its callback
#[derive(Debug, Clone)]
pub enum DeviceSignal {
    Sample(RawSample),
    /// Device is gone; no more samples will follow
    Disconnected { reason: String },
}

/// Device callback type
///
/// Invoked on the device's own capture thread. Must not block.
pub type DeviceCallback = Arc<dyn Fn(DeviceSignal) + Send + Sync>;

/// Capture device
///
/// # Example
///
/// ```ignore
/// let device: Box<dyn DeviceSource> = open_device();
/// device.listen(Arc::new(|signal| {
///     if let DeviceSignal::Sample(sample) = signal {
///         println!("{:?}", sample.device_ts());
///     }
/// }));
/// // ... capture ...
/// device.stop();
/// ```
pub trait DeviceSource: Send + Sync {
    fn stream_id(&self) -> &str;

    fn kind(&self) -> StreamKind;

    /// Tick rate of the device clock (ticks per second)
    fn tick_hz(&self) -> f64;

    /// Start capture and register the callback
    ///
    /// Repeated calls while listening are ignored.
    fn listen(&self, callback: DeviceCallback);

    /// Stop capture, close the device handle and join the capture thread
    fn stop(&self);

    fn is_listening(&self) -> bool;
}

