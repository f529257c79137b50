//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{MarkerConfig, RigBlueprint, SourceType, SyncEngineConfig};
use ingestion::RECORDING_VERSION;
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;
use crate::error::load_blueprint;

/// Build and component info for JSON output
#[derive(Serialize)]
struct BuildInfo {
    name: &'static str,
    version: &'static str,
    recording_version: u32,
    components: Components,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<ConfigInfo>,
}

#[derive(Serialize)]
struct Components {
    sources: &'static [&'static str],
    markers: &'static [&'static str],
    sinks: &'static [&'static str],
    disconnect_policies: &'static [&'static str],
}

const COMPONENTS: Components = Components {
    sources: &["mock", "replay"],
    markers: &["ext_trigger", "reserved_pixel"],
    sinks: &["log", "file"],
    disconnect_policies: &["half_open", "halt"],
};

#[derive(Serialize)]
struct ConfigInfo {
    rig: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    devices: Vec<DeviceInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sinks: Vec<SinkInfo>,
    engine: SyncEngineConfig,
}

#[derive(Serialize)]
struct DeviceInfo {
    role: &'static str,
    id: String,
    source: SourceType,
    tick_hz: f64,
    #[serde(skip_serializing_if = "std::collections::HashMap::is_empty")]
    params: std::collections::HashMap<String, String>,
}

#[derive(Serialize)]
struct SinkInfo {
    name: String,
    sink_type: String,
    queue_capacity: usize,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => {
            info!(config = %path.display(), "loading configuration info");
            Some(config_info(&load_blueprint(path)?))
        }
        None => None,
    };

    let build = BuildInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        recording_version: RECORDING_VERSION,
        components: COMPONENTS,
        config,
    };

    if args.json {
        let json = serde_json::to_string_pretty(&build).context("failed to serialize info")?;
        println!("{}", json);
    } else {
        print_info(&build);
    }
    Ok(())
}

fn config_info(blueprint: &RigBlueprint) -> ConfigInfo {
    let device = |role, config: &contracts::DeviceConfig| DeviceInfo {
        role,
        id: config.id.clone(),
        source: config.source,
        tick_hz: config.tick_hz,
        params: config.params.clone(),
    };

    ConfigInfo {
        rig: blueprint.rig.name.clone(),
        description: blueprint.rig.description.clone(),
        devices: vec![
            device("event_camera", &blueprint.devices.event_camera),
            device("rgbd_camera", &blueprint.devices.rgbd_camera),
        ],
        sinks: blueprint
            .sinks
            .iter()
            .map(|s| SinkInfo {
                name: s.name.clone(),
                sink_type: format!("{:?}", s.sink_type).to_lowercase(),
                queue_capacity: s.queue_capacity,
            })
            .collect(),
        engine: blueprint.to_sync_engine_config(),
    }
}

fn describe_marker(marker: &MarkerConfig) -> String {
    match marker {
        MarkerConfig::ExtTrigger {
            channel,
            rising_only,
        } => format!(
            "external trigger, channel {}{}",
            channel,
            if *rising_only { ", rising edges" } else { "" }
        ),
        MarkerConfig::ReservedPixel { x, y } => format!("reserved pixel ({}, {})", x, y),
    }
}

fn print_tree(items: &[String]) {
    for (i, item) in items.iter().enumerate() {
        let prefix = if i == items.len() - 1 { "└─" } else { "├─" };
        println!("   {} {}", prefix, item);
    }
}

fn print_info(build: &BuildInfo) {
    println!("\n{} {}", build.name, build.version);
    println!("   └─ Recording format: v{}", build.recording_version);

    println!("\n🧩 Components");
    print_tree(&[
        format!("Sources: {}", build.components.sources.join(", ")),
        format!("Markers: {}", build.components.markers.join(", ")),
        format!("Sinks: {}", build.components.sinks.join(", ")),
        format!(
            "Disconnect policies: {}",
            build.components.disconnect_policies.join(", ")
        ),
    ]);

    let Some(config) = &build.config else {
        println!();
        return;
    };

    println!("\n📋 Rig: {}", config.rig);
    if let Some(description) = &config.description {
        println!("   └─ {}", description);
    }

    println!("\n📷 Devices");
    print_tree(
        &config
            .devices
            .iter()
            .map(|d| format!("{}: {} ({:?}, {} Hz clock)", d.role, d.id, d.source, d.tick_hz))
            .collect::<Vec<_>>(),
    );

    let engine = &config.engine;
    println!("\n⚙️  Sync Settings");
    print_tree(&[
        format!("Trigger: {} Hz", engine.trigger_hz),
        format!("Marker: {}", describe_marker(&engine.event_stream.marker)),
        format!("Jitter tolerance: {} ms", engine.jitter_tolerance_ms),
        format!("Out-of-order slack: {} ms", engine.out_of_order_ms),
        format!("Max latency: {} ms", engine.max_latency_ms),
        format!(
            "Buffers: {} event batches, {} frames",
            engine.buffer.event_capacity, engine.buffer.frame_capacity
        ),
        format!("Disconnect policy: {:?}", engine.disconnect_policy),
    ]);

    if !config.sinks.is_empty() {
        println!("\n📤 Sinks ({})", config.sinks.len());
        print_tree(
            &config
                .sinks
                .iter()
                .map(|s| format!("{} ({}, queue {})", s.name, s.sink_type, s.queue_capacity))
                .collect::<Vec<_>>(),
        );
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_info_resolves_engine() {
        let blueprint: RigBlueprint = serde_json::from_str(
            r#"{
                "rig": { "name": "bench", "description": "desk rig" },
                "devices": {
                    "event_camera": { "id": "prophesee" },
                    "rgbd_camera": { "id": "orbbec", "params": { "width": "320" } }
                },
                "sync": { "trigger_hz": 60.0 },
                "sinks": [ { "name": "console", "sink_type": "log" } ]
            }"#,
        )
        .unwrap();

        let info = config_info(&blueprint);
        assert_eq!(info.devices[1].id, "orbbec");
        assert_eq!(info.devices[1].params["width"], "320");
        assert_eq!(info.engine.trigger_hz, 60.0);
        assert_eq!(info.engine.event_stream.id, "prophesee");
        assert_eq!(info.sinks[0].sink_type, "log");
    }

    #[test]
    fn test_describe_marker() {
        assert_eq!(
            describe_marker(&MarkerConfig::default()),
            "external trigger, channel 0, rising edges"
        );
        assert_eq!(
            describe_marker(&MarkerConfig::ReservedPixel { x: 3, y: 4 }),
            "reserved pixel (3, 4)"
        );
    }

    #[test]
    fn test_run_info_without_config() {
        let args = InfoArgs {
            config: None,
            json: true,
        };
        assert!(run_info(&args).is_ok());
    }
}
