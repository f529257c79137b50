//! `replay` command implementation.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use anyhow::{Context, Result};
use contracts::{AlignedPair, SyncEngineConfig};
use ingestion::{replay_deterministic, CaptureRecording, PairDigest};
use observability::SyncMetricsAggregator;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cli::ReplayArgs;
use crate::error::{load_blueprint, CliError};
use crate::pipeline::{PipelineStats, SummarySink};

const REPLAY_QUEUE: usize = 256;

/// Execute the `replay` command
pub async fn run_replay(args: &ReplayArgs) -> Result<()> {
    let (stats, digest) = replay_recording(&args.recording, args.config.as_deref()).await?;

    stats.print_summary();
    if args.digest {
        println!("digest: {} ({} pairs, {} bytes)", digest, digest.pairs(), digest.bytes());
    }
    Ok(())
}

/// Align a recording into the configured sinks
///
/// Pairs are handed to the dispatcher with a blocking send, so none is lost
/// before fan-out. The digest covers every emitted pair.
pub async fn replay_recording(
    recording_path: &Path,
    config_path: Option<&Path>,
) -> Result<(PipelineStats, PairDigest)> {
    if !recording_path.exists() {
        return Err(CliError::recording_not_found(recording_path).into());
    }
    let started = Instant::now();
    let recording = Arc::new(
        CaptureRecording::load(recording_path)
            .with_context(|| format!("failed to load {}", recording_path.display()))?,
    );
    info!(
        path = %recording_path.display(),
        entries = recording.entries.len(),
        duration_s = recording.duration().as_secs_f64(),
        "recording loaded"
    );

    let (engine, sinks) = match config_path {
        Some(path) => {
            let blueprint = load_blueprint(path)?;
            (blueprint.to_sync_engine_config(), blueprint.sinks)
        }
        None => (SyncEngineConfig::default(), Vec::new()),
    };

    let (pair_tx, pair_rx) = mpsc::channel(REPLAY_QUEUE);
    let dispatcher = dispatcher::create_dispatcher(sinks, pair_rx)
        .await
        .context("failed to create dispatcher")?;
    let dispatcher_handle = dispatcher.spawn();

    let aggregator = Arc::new(Mutex::new(SyncMetricsAggregator::new()));
    let sink_aggregator = Arc::clone(&aggregator);
    let replayed = tokio::task::spawn_blocking(move || {
        let mut digest = PairDigest::new();
        let forward = |pair: AlignedPair| {
            digest.update(&pair);
            if pair_tx.blocking_send(Arc::new(pair)).is_err() {
                warn!("dispatcher closed during replay");
            }
        };
        let report =
            replay_deterministic(recording, engine, SummarySink::new(forward, sink_aggregator));
        report.map(|report| (report, digest))
    })
    .await
    .context("replay task failed")?;

    let sink_metrics = dispatcher_handle
        .await
        .context("dispatcher task failed")?;
    let (report, digest) = replayed.context("replay failed")?;

    let sync_metrics = aggregator
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    let stats = PipelineStats {
        duration: started.elapsed(),
        forwarded: sync_metrics.total_pairs,
        report: Some(report),
        sinks: sink_metrics,
        sync_metrics,
        ..Default::default()
    };
    Ok((stats, digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingestion::{MockRig, MockRigConfig};
    use std::time::Duration;

    fn write_recording(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("capture.evrec");
        MockRig::new(MockRigConfig::default())
            .recording(Duration::from_millis(500))
            .save(&path)
            .unwrap();
        path
    }

    #[tokio::test]
    async fn test_replay_digest_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_recording(dir.path());

        let (first_stats, first) = replay_recording(&path, None).await.unwrap();
        let (_, second) = replay_recording(&path, None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.pairs(), first_stats.sync_metrics.total_pairs);
        assert!(first.pairs() > 10);
    }

    #[tokio::test]
    async fn test_replay_into_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_recording(dir.path());
        let out = dir.path().join("out");
        let config = dir.path().join("rig.toml");
        std::fs::write(
            &config,
            format!(
                r#"
[rig]
name = "bench"

[devices.event_camera]
id = "events"

[devices.rgbd_camera]
id = "rgbd"

[[sinks]]
name = "disk"
sink_type = "file"
params = {{ base_path = "{}" }}
"#,
                out.display()
            ),
        )
        .unwrap();

        let (stats, digest) = replay_recording(&path, Some(&config)).await.unwrap();

        assert_eq!(stats.sinks[0].1.written, digest.pairs());
        assert!(out.join("session.json").exists());
        assert!(out.join("meta/000003.json").exists());
    }

    #[tokio::test]
    async fn test_missing_recording() {
        let err = replay_recording(Path::new("/nonexistent.evrec"), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::RecordingNotFound { .. })
        ));
    }
}
