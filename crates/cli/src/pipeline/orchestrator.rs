//! Pipeline orchestrator - wires devices, aligner thread and dispatcher.
//!
//! ```text
//! device threads -> StreamProducer -> Aligner thread -> PairForwarder
//!                                                        -> Dispatcher -> sinks
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::{RigBlueprint, StreamKind};
use ingestion::IngestionPipeline;
use observability::SyncMetricsAggregator;
use sync_engine::{Aligner, AlignerRuntime, ShutdownSignal};
use tracing::{info, warn};

use super::{PipelineStats, SummarySink};
use crate::error::CliError;

const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);
const DISPATCHER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub blueprint: RigBlueprint,

    /// Stop after this long (None = until signal or devices end)
    pub duration: Option<Duration>,

    /// Aligner to dispatcher queue length
    pub dispatch_queue: usize,
}

/// Why the run loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Signal,
    Duration,
    AlignerStopped,
    DevicesIdle,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run until `shutdown` resolves, the duration elapses or the devices end
    ///
    /// Sinks are always drained before returning. A disconnect under the
    /// halt policy is reported as an error after draining.
    pub async fn run<F>(self, shutdown: F) -> Result<PipelineStats>
    where
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        let blueprint = &self.config.blueprint;
        let engine = blueprint.to_sync_engine_config();

        let devices = ingestion::open_devices(blueprint).context("failed to open devices")?;
        let event_device = devices.event.ok_or(CliError::MissingDevice {
            kind: StreamKind::Event,
        })?;
        let frame_device = devices.frame.ok_or(CliError::MissingDevice {
            kind: StreamKind::Frame,
        })?;

        let (events, frames, inputs) = sync_engine::connect(&engine);
        let mut ingestion = IngestionPipeline::new();
        ingestion.register_device(event_device, events)?;
        ingestion.register_device(frame_device, frames)?;

        if blueprint.sinks.is_empty() {
            warn!("no sinks configured, pairs are only counted");
        }
        let (forwarder, pair_rx) = dispatcher::forwarder(
            self.config.dispatch_queue,
            Duration::from_millis(engine.accept_budget_ms),
            tokio::runtime::Handle::current(),
        );
        let forward_metrics = forwarder.metrics();
        let dispatcher = dispatcher::create_dispatcher(blueprint.sinks.clone(), pair_rx)
            .await
            .context("failed to create dispatcher")?;
        let dispatcher_handle = dispatcher.spawn();

        let aggregator = Arc::new(Mutex::new(SyncMetricsAggregator::new()));
        let poll_interval = Duration::from_millis(engine.poll_interval_ms);
        info!(
            trigger_hz = engine.trigger_hz,
            event_stream = %engine.event_stream.id,
            frame_stream = %engine.frame_stream.id,
            policy = ?engine.disconnect_policy,
            "sync engine configured"
        );
        let aligner = Aligner::new(engine, inputs);
        let runtime = AlignerRuntime::spawn(
            aligner,
            SummarySink::new(forwarder, Arc::clone(&aggregator)),
            poll_interval,
            ShutdownSignal::new(),
        )
        .context("failed to start aligner thread")?;

        ingestion.start_all();
        info!(
            devices = ingestion.device_count(),
            sinks = blueprint.sinks.len(),
            duration_s = self.config.duration.map(|d| d.as_secs_f64()),
            "pipeline running"
        );

        let reason = self.wait_for_stop(&ingestion, &runtime, shutdown).await;
        info!(reason = ?reason, "stopping pipeline");

        ingestion.stop_all();
        runtime.stop();
        let aligner_result = tokio::task::spawn_blocking(move || runtime.join())
            .await
            .context("aligner join task failed")?;

        // the forwarder went down with the aligner thread, so the dispatcher
        // input is closed and sinks drain
        let sinks = match tokio::time::timeout(DISPATCHER_DRAIN_TIMEOUT, dispatcher_handle).await {
            Ok(Ok(metrics)) => metrics,
            Ok(Err(e)) => {
                warn!(error = %e, "dispatcher task failed");
                Vec::new()
            }
            Err(_) => {
                warn!(
                    timeout_s = DISPATCHER_DRAIN_TIMEOUT.as_secs(),
                    "dispatcher did not drain in time"
                );
                Vec::new()
            }
        };

        let report = aligner_result.map_err(|e| CliError::pipeline(e.to_string()))?;
        let sync_metrics = aggregator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let stats = PipelineStats {
            duration: started.elapsed(),
            ingestion: ingestion.metrics(),
            forwarded: forward_metrics.forwarded(),
            forward_drops: forward_metrics.dropped(),
            report: Some(report),
            sinks,
            sync_metrics,
        };
        info!(
            duration_s = stats.duration.as_secs_f64(),
            pairs = stats.sync_metrics.total_pairs,
            pair_rate = format!("{:.2}", stats.pair_rate()),
            "pipeline shutdown complete"
        );
        Ok(stats)
    }

    async fn wait_for_stop<F>(
        &self,
        ingestion: &IngestionPipeline,
        runtime: &AlignerRuntime,
        shutdown: F,
    ) -> StopReason
    where
        F: Future<Output = ()>,
    {
        let deadline = self
            .config
            .duration
            .map(|d| tokio::time::Instant::now() + d);
        let mut ticker = tokio::time::interval(STOP_CHECK_INTERVAL);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => return StopReason::Signal,
                _ = ticker.tick() => {
                    if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
                        return StopReason::Duration;
                    }
                    if runtime.is_finished() {
                        return StopReason::AlignerStopped;
                    }
                    if ingestion.all_sources_idle() {
                        return StopReason::DevicesIdle;
                    }
                }
            }
        }
    }
}
