//! `run` command implementation.

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::{load_blueprint, parse_duration};
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "loading configuration");
    let blueprint = load_blueprint(&args.config)?;
    let duration = args.duration.map(parse_duration).transpose()?;

    info!(
        rig = %blueprint.rig.name,
        event_camera = %blueprint.devices.event_camera.id,
        rgbd_camera = %blueprint.devices.rgbd_camera.id,
        sinks = blueprint.sinks.len(),
        "configuration loaded"
    );

    let pipeline = Pipeline::new(PipelineConfig {
        blueprint,
        duration,
        dispatch_queue: args.dispatch_queue,
    });

    let stats = pipeline
        .run(shutdown_signal())
        .await
        .context("pipeline execution failed")?;

    if stats.forward_drops > 0 {
        warn!(
            dropped = stats.forward_drops,
            "pairs were dropped between aligner and dispatcher"
        );
    }
    stats.print_summary();
    info!("evsync finished");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    warn!("received shutdown signal, stopping pipeline");
}
