//! `record` command implementation.

use anyhow::{Context, Result};
use contracts::StreamKind;
use ingestion::{MockRig, MockRigConfig};
use tracing::info;

use crate::cli::RecordArgs;
use crate::error::{load_blueprint, parse_duration};

/// Execute the `record` command
pub fn run_record(args: &RecordArgs) -> Result<()> {
    let duration = parse_duration(args.duration)?;
    let config = match &args.config {
        Some(path) => MockRigConfig::from_blueprint(&load_blueprint(path)?)
            .context("invalid mock device parameters")?,
        None => MockRigConfig::default(),
    };
    info!(
        trigger_hz = config.trigger_hz,
        seed = config.seed,
        duration_s = duration.as_secs_f64(),
        "generating capture"
    );

    let recording = MockRig::new(config).recording(duration);
    recording
        .save(&args.out)
        .with_context(|| format!("failed to write {}", args.out.display()))?;

    println!(
        "Wrote {} ({} event batches, {} frames, {:.2}s)",
        args.out.display(),
        recording.sample_count(StreamKind::Event),
        recording.sample_count(StreamKind::Frame),
        recording.duration().as_secs_f64()
    );
    Ok(())
}
