//! # Dispatcher
//!
//! Pair distribution.
//!
//! Responsibilities:
//! - Take pairs off the aligner thread within a bounded time (`PairForwarder`)
//! - Fan out every pair to all configured sinks
//! - Isolate slow sinks behind their own queues so they never stall alignment

pub mod dispatcher;
pub mod error;
pub mod forwarder;
pub mod handle;
pub mod metrics;
pub mod sinks;

#[cfg(test)]
mod test_support;

pub use contracts::{AlignedPair, DataSink};
pub use dispatcher::{create_dispatcher, Dispatcher, DispatcherBuilder, DispatcherConfig};
pub use error::DispatcherError;
pub use forwarder::{forwarder, PairForwarder};
pub use handle::SinkHandle;
pub use metrics::{ForwarderMetrics, MetricsSnapshot, SinkMetrics};
pub use sinks::{FileSink, FileSinkConfig, LogSink, PackedEvent};
