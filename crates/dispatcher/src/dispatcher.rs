//! Dispatcher - fans aligned pairs out to the configured sinks

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use contracts::{AlignedPair, SinkConfig, SinkType};

use crate::error::DispatcherError;
use crate::handle::SinkHandle;
use crate::metrics::{MetricsSnapshot, SinkMetrics};
use crate::sinks::{FileSink, FileSinkConfig, LogSink};

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub sinks: Vec<SinkConfig>,
}

/// Builder for creating a Dispatcher
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    input_rx: mpsc::Receiver<Arc<AlignedPair>>,
}

impl DispatcherBuilder {
    pub fn new(config: DispatcherConfig, input_rx: mpsc::Receiver<Arc<AlignedPair>>) -> Self {
        Self { config, input_rx }
    }

    /// Create every sink and spawn its worker
    ///
    /// # Errors
    /// The first sink that cannot be created; workers spawned before it are
    /// shut down again.
    #[instrument(name = "dispatcher_builder_build", skip(self))]
    pub async fn build(self) -> Result<Dispatcher, DispatcherError> {
        let mut handles = Vec::with_capacity(self.config.sinks.len());
        for sink_config in &self.config.sinks {
            match create_sink_handle(sink_config) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    Dispatcher::shutdown_handles(handles).await;
                    return Err(e);
                }
            }
        }

        Ok(Dispatcher {
            handles,
            input_rx: self.input_rx,
        })
    }
}

#[instrument(
    name = "dispatcher_create_sink_handle",
    skip(config),
    fields(sink = %config.name, sink_type = ?config.sink_type)
)]
fn create_sink_handle(config: &SinkConfig) -> Result<SinkHandle, DispatcherError> {
    match config.sink_type {
        SinkType::Log => {
            let sink = LogSink::from_params(&config.name, &config.params)
                .map_err(|e| DispatcherError::invalid_params(&config.name, e))?;
            Ok(SinkHandle::spawn(sink, config.queue_capacity))
        }
        SinkType::File => {
            let sink = FileSink::from_params(&config.name, &config.params).map_err(|source| {
                DispatcherError::OutputDir {
                    sink: config.name.clone(),
                    path: FileSinkConfig::from_params(&config.params).base_path,
                    source,
                }
            })?;
            Ok(SinkHandle::spawn(sink, config.queue_capacity))
        }
    }
}

/// Consumes pairs from the forwarder queue and hands each to every sink
pub struct Dispatcher {
    handles: Vec<SinkHandle>,
    input_rx: mpsc::Receiver<Arc<AlignedPair>>,
}

impl Dispatcher {
    /// Dispatcher over already running sink handles
    pub fn with_handles(
        handles: Vec<SinkHandle>,
        input_rx: mpsc::Receiver<Arc<AlignedPair>>,
    ) -> Self {
        Self { handles, input_rx }
    }

    pub fn sink_names(&self) -> Vec<String> {
        self.handles.iter().map(|h| h.name().to_string()).collect()
    }

    /// Per-sink metrics
    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.metrics().snapshot()))
            .collect()
    }

    /// Run until the input queue closes, then drain and close every sink
    ///
    /// Returns the final per-sink metrics.
    #[instrument(name = "dispatcher_run", skip(self))]
    pub async fn run(mut self) -> Vec<(String, MetricsSnapshot)> {
        info!(sinks = self.handles.len(), "dispatcher started");

        let mut pair_count: u64 = 0;
        while let Some(pair) = self.input_rx.recv().await {
            pair_count += 1;
            for handle in &self.handles {
                handle.try_send(Arc::clone(&pair));
            }

            if pair_count.is_multiple_of(100) {
                debug!(pairs = pair_count, "dispatcher progress");
            }
        }

        info!(pairs = pair_count, "dispatcher input closed, shutting down");

        let metrics: Vec<(String, Arc<SinkMetrics>)> = self
            .handles
            .iter()
            .map(|h| (h.name().to_string(), Arc::clone(h.metrics())))
            .collect();
        Self::shutdown_handles(self.handles).await;

        info!("dispatcher shutdown complete");
        metrics
            .into_iter()
            .map(|(name, m)| (name, m.snapshot()))
            .collect()
    }

    /// Run on a background task
    pub fn spawn(self) -> JoinHandle<Vec<(String, MetricsSnapshot)>> {
        tokio::spawn(self.run())
    }

    async fn shutdown_handles(handles: Vec<SinkHandle>) {
        for handle in handles {
            handle.shutdown().await;
        }
    }
}

/// Build a dispatcher from sink configs
#[instrument(name = "dispatcher_create", skip(sink_configs, input_rx))]
pub async fn create_dispatcher(
    sink_configs: Vec<SinkConfig>,
    input_rx: mpsc::Receiver<Arc<AlignedPair>>,
) -> Result<Dispatcher, DispatcherError> {
    let config = DispatcherConfig {
        sinks: sink_configs,
    };
    DispatcherBuilder::new(config, input_rx).build().await
}
