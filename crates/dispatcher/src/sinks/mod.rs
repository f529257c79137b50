//! Sink implementations
//!
//! Contains LogSink and FileSink.

mod file;
mod log;

pub use self::file::{FileSink, FileSinkConfig, PackedEvent};
pub use self::log::LogSink;
