//! Ingestion Pipeline main entry

use std::collections::HashMap;

use contracts::DeviceSource;
use sync_engine::StreamProducer;
use tracing::{debug, info, instrument};

use crate::adapter::DeviceAdapter;
use crate::error::{IngestionError, Result};
use crate::metrics::MetricsSnapshot;

/// Ingestion Pipeline
///
/// Owns the device adapters of one engine instance. Stopping the pipeline
/// (explicitly or on drop) stops every device and closes its stream.
#[derive(Debug, Default)]
pub struct IngestionPipeline {
    adapters: HashMap<String, DeviceAdapter>,
}

impl IngestionPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device together with the producer of its stream
    ///
    /// # Errors
    /// - `DuplicateDevice` when the stream id is already registered
    /// - `StreamMismatch` when device and producer feed different streams
    #[instrument(
        name = "ingestion_register_device",
        skip(self, source, producer),
        fields(stream_id = %source.stream_id(), kind = %source.kind())
    )]
    pub fn register_device(
        &mut self,
        source: Box<dyn DeviceSource>,
        producer: StreamProducer,
    ) -> Result<()> {
        let stream_id = source.stream_id().to_string();
        if self.adapters.contains_key(&stream_id) {
            return Err(IngestionError::DuplicateDevice { stream_id });
        }

        let adapter = DeviceAdapter::new(source, producer)?;
        debug!(stream_id = %stream_id, "registered device");
        self.adapters.insert(stream_id, adapter);
        Ok(())
    }

    /// Start all registered devices
    #[instrument(name = "ingestion_start_all", skip(self))]
    pub fn start_all(&self) {
        info!(count = self.adapters.len(), "starting all device adapters");
        for adapter in self.adapters.values() {
            adapter.start();
        }
    }

    /// Stop all devices and close their streams
    #[instrument(name = "ingestion_stop_all", skip(self))]
    pub fn stop_all(&self) {
        info!(count = self.adapters.len(), "stopping all device adapters");
        for adapter in self.adapters.values() {
            adapter.stop();
        }
    }

    pub fn device_count(&self) -> usize {
        self.adapters.len()
    }

    /// Check if specified device is listening
    pub fn is_device_listening(&self, stream_id: &str) -> bool {
        self.adapters
            .get(stream_id)
            .map(|a| a.is_listening())
            .unwrap_or(false)
    }

    /// Whether every device has stopped producing on its own
    ///
    /// True once recordings ran out or devices disconnected.
    pub fn all_sources_idle(&self) -> bool {
        self.adapters.values().all(|a| !a.is_source_active())
    }

    /// Counters summed over all devices
    pub fn metrics(&self) -> MetricsSnapshot {
        self.adapters
            .values()
            .map(|a| a.metrics().snapshot())
            .fold(MetricsSnapshot::default(), |acc, s| acc + s)
    }

    pub fn device_metrics(&self, stream_id: &str) -> Option<MetricsSnapshot> {
        self.adapters.get(stream_id).map(|a| a.metrics().snapshot())
    }
}

impl Drop for IngestionPipeline {
    fn drop(&mut self) {
        self.stop_all();
    }
}
