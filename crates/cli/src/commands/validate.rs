//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{DisconnectPolicy, RigBlueprint, SourceType};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    rig: String,
    event_camera: String,
    rgbd_camera: String,
    trigger_hz: f64,
    sink_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("file not found: {}", args.config.display())),
            warnings: Vec::new(),
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => ValidationResult {
            valid: true,
            config_path,
            error: None,
            warnings: collect_warnings(&blueprint),
            summary: Some(ConfigSummary {
                rig: blueprint.rig.name.clone(),
                event_camera: describe_device(&blueprint, true),
                rgbd_camera: describe_device(&blueprint, false),
                trigger_hz: blueprint.to_sync_engine_config().trigger_hz,
                sink_count: blueprint.sinks.len(),
            }),
        },
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: Vec::new(),
            summary: None,
        },
    }
}

fn describe_device(blueprint: &RigBlueprint, event: bool) -> String {
    let device = if event {
        &blueprint.devices.event_camera
    } else {
        &blueprint.devices.rgbd_camera
    };
    let source = match device.source {
        SourceType::Mock => "mock",
        SourceType::Replay => "replay",
    };
    format!("{} ({}, {} Hz clock)", device.id, source, device.tick_hz)
}

/// Non-fatal issues
fn collect_warnings(blueprint: &RigBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();
    let engine = blueprint.to_sync_engine_config();

    if blueprint.sinks.is_empty() {
        warnings.push("no sinks configured, pairs will only be counted".to_string());
    }
    if engine.jitter_tolerance_ms >= engine.period_s() * 1000.0 {
        warnings.push(format!(
            "jitter_tolerance_ms ({}) is not shorter than the trigger period ({:.3} ms), \
             a late edge can be mistaken for the next one",
            engine.jitter_tolerance_ms,
            engine.period_s() * 1000.0
        ));
    }
    if engine.disconnect_policy == DisconnectPolicy::Halt {
        warnings.push("disconnect_policy = halt: one lost device stops the run".to_string());
    }
    if blueprint.devices.event_camera.source != blueprint.devices.rgbd_camera.source {
        warnings.push("devices use different sources, their timelines are unrelated".to_string());
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Rig: {}", summary.rig);
            println!("  Event camera: {}", summary.event_camera);
            println!("  RGBD camera: {}", summary.rgbd_camera);
            println!("  Trigger: {} Hz", summary.trigger_hz);
            println!("  Sinks: {}", summary.sink_count);
        }

        if !result.warnings.is_empty() {
            println!("\n⚠ Warnings:");
            for warning in &result.warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
