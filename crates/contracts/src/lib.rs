//! # Contracts
//!
//! Frozen interface contracts shared by every crate in the workspace: sample
//! and pair data structures, engine configuration, device and sink traits.
//! Business crates depend on this crate only; reverse dependencies are
//! prohibited.
//!
//! ## Time Model
//! - Device timestamps are integer ticks in each sensor's own clock domain
//!   (`tick_hz`, 1 MHz by default)
//! - Reference time is seconds on the trigger grid: trigger index `i` sits at
//!   `i / trigger_hz`
//! - `trigger_index` is the only key shared across streams

mod blueprint;
mod device_source;
mod edge;
mod error;
mod incident;
mod pair;
mod sample;
mod sink;
mod stream_id;
mod sync_engine_config;

pub use blueprint::*;
pub use device_source::{DeviceCallback, DeviceSignal, DeviceSource};
pub use edge::*;
pub use error::*;
pub use incident::*;
pub use pair::*;
pub use sample::*;
pub use sink::*;
pub use stream_id::StreamId;
pub use sync_engine_config::*;
