//! Config validation
//!
//! Rules:
//! - device ids non-empty and distinct
//! - positive clock and trigger rates
//! - non-negative tolerances, latency budget of at least one trigger period
//! - buffer capacities >= 2, clock history >= 2
//! - replay devices name a recording `path`
//! - a marker only on the event camera
//! - sink names non-empty and unique, queue capacity > 0
//!
//! Range rules declared on the engine config types run first through
//! `validator`.

use std::collections::HashSet;

use contracts::{ContractError, DeviceConfig, RigBlueprint, SourceType, SyncEngineConfig};
use validator::Validate;

/// Validate a blueprint; returns the first error found
pub fn validate(blueprint: &RigBlueprint) -> Result<(), ContractError> {
    validate_rig(blueprint)?;
    validate_devices(blueprint)?;
    let engine = blueprint.to_sync_engine_config();
    validate_engine_ranges(&engine)?;
    validate_sync(&engine)?;
    validate_sinks(blueprint)?;
    Ok(())
}

fn validate_rig(blueprint: &RigBlueprint) -> Result<(), ContractError> {
    if blueprint.rig.name.trim().is_empty() {
        return Err(ContractError::config_validation(
            "rig.name",
            "rig name cannot be empty",
        ));
    }
    Ok(())
}

fn validate_devices(blueprint: &RigBlueprint) -> Result<(), ContractError> {
    let devices = &blueprint.devices;
    validate_device("devices.event_camera", &devices.event_camera)?;
    validate_device("devices.rgbd_camera", &devices.rgbd_camera)?;

    if devices.event_camera.id == devices.rgbd_camera.id {
        return Err(ContractError::config_validation(
            "devices.rgbd_camera.id",
            format!("duplicate device id '{}'", devices.rgbd_camera.id),
        ));
    }
    if devices.rgbd_camera.marker.is_some() {
        return Err(ContractError::config_validation(
            "devices.rgbd_camera.marker",
            "trigger markers only apply to the event camera",
        ));
    }
    Ok(())
}

fn validate_device(field: &str, device: &DeviceConfig) -> Result<(), ContractError> {
    if device.id.trim().is_empty() {
        return Err(ContractError::config_validation(
            format!("{field}.id"),
            "device id cannot be empty",
        ));
    }
    if device.tick_hz.is_nan() || device.tick_hz <= 0.0 {
        return Err(ContractError::config_validation(
            format!("{field}.tick_hz"),
            format!("tick_hz must be > 0, got {}", device.tick_hz),
        ));
    }
    if device.source == SourceType::Replay
        && device
            .params
            .get("path")
            .is_none_or(|path| path.trim().is_empty())
    {
        return Err(ContractError::config_validation(
            format!("{field}.params.path"),
            "replay devices need a recording path",
        ));
    }
    Ok(())
}

fn validate_engine_ranges(engine: &SyncEngineConfig) -> Result<(), ContractError> {
    engine
        .validate()
        .map_err(|errors| ContractError::config_validation("sync", errors.to_string()))
}

fn validate_sync(engine: &SyncEngineConfig) -> Result<(), ContractError> {
    if engine.trigger_hz.is_nan() || engine.trigger_hz <= 0.0 {
        return Err(ContractError::config_validation(
            "sync.trigger_hz",
            format!("trigger_hz must be > 0, got {}", engine.trigger_hz),
        ));
    }

    for (field, value) in [
        ("sync.jitter_tolerance_ms", engine.jitter_tolerance_ms),
        ("sync.out_of_order_ms", engine.out_of_order_ms),
    ] {
        if value.is_nan() || value < 0.0 {
            return Err(ContractError::config_validation(
                field,
                format!("tolerance must be >= 0, got {value}"),
            ));
        }
    }

    let period_ms = engine.period_s() * 1000.0;
    if engine.max_latency_ms < period_ms {
        return Err(ContractError::config_validation(
            "sync.max_latency_ms",
            format!(
                "max_latency_ms ({}) must cover one trigger period ({:.3} ms)",
                engine.max_latency_ms, period_ms
            ),
        ));
    }

    for (field, capacity) in [
        ("sync.buffer.event_capacity", engine.buffer.event_capacity),
        ("sync.buffer.frame_capacity", engine.buffer.frame_capacity),
    ] {
        if capacity < 2 {
            return Err(ContractError::config_validation(
                field,
                format!("capacity must be >= 2, got {capacity}"),
            ));
        }
    }

    if engine.clock.history < 2 {
        return Err(ContractError::config_validation(
            "sync.clock.history",
            format!("history must be >= 2, got {}", engine.clock.history),
        ));
    }
    if engine.edge_history < 2 {
        return Err(ContractError::config_validation(
            "sync.edge_history",
            format!("edge_history must be >= 2, got {}", engine.edge_history),
        ));
    }
    Ok(())
}

fn validate_sinks(blueprint: &RigBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, sink) in blueprint.sinks.iter().enumerate() {
        if sink.name.is_empty() {
            return Err(ContractError::config_validation(
                format!("sinks[{}].name", idx),
                "sink name cannot be empty",
            ));
        }
        if !seen.insert(sink.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("sinks[{}].name", idx),
                format!("duplicate sink name '{}'", sink.name),
            ));
        }
        if sink.queue_capacity == 0 {
            return Err(ContractError::config_validation(
                format!("sinks[{}].queue_capacity", idx),
                "queue_capacity must be > 0",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        BufferConfig, ClockModelConfig, ConfigVersion, DevicesConfig, MarkerConfig, RigConfig,
        SinkConfig, SinkType, SyncConfig, DEFAULT_TICK_HZ,
    };
    use std::collections::HashMap;

    fn device(id: &str) -> DeviceConfig {
        DeviceConfig {
            id: id.into(),
            source: SourceType::Mock,
            tick_hz: DEFAULT_TICK_HZ,
            marker: None,
            params: HashMap::new(),
        }
    }

    fn minimal_blueprint() -> RigBlueprint {
        RigBlueprint {
            version: ConfigVersion::V1,
            rig: RigConfig {
                name: "bench".into(),
                description: None,
            },
            devices: DevicesConfig {
                event_camera: device("events"),
                rgbd_camera: device("rgbd"),
            },
            sync: SyncConfig::default(),
            sinks: vec![SinkConfig {
                name: "log".into(),
                sink_type: SinkType::Log,
                queue_capacity: 100,
                params: Default::default(),
            }],
        }
    }

    fn error_text(bp: &RigBlueprint) -> String {
        validate(bp).unwrap_err().to_string()
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&minimal_blueprint()).is_ok());
    }

    #[test]
    fn test_duplicate_device_id() {
        let mut bp = minimal_blueprint();
        bp.devices.rgbd_camera.id = "events".into();
        assert!(error_text(&bp).contains("duplicate device id"));
    }

    #[test]
    fn test_invalid_tick_rate() {
        let mut bp = minimal_blueprint();
        bp.devices.rgbd_camera.tick_hz = -5.0;
        let err = error_text(&bp);
        assert!(err.contains("tick_hz must be > 0"), "got: {err}");
    }

    #[test]
    fn test_invalid_trigger_rate() {
        let mut bp = minimal_blueprint();
        bp.sync.trigger_hz = Some(0.0);
        let err = error_text(&bp);
        assert!(err.contains("trigger_hz"), "got: {err}");
    }

    #[test]
    fn test_negative_tolerance() {
        let mut bp = minimal_blueprint();
        bp.sync.jitter_tolerance_ms = Some(-1.0);
        let err = error_text(&bp);
        assert!(err.contains("jitter_tolerance_ms"), "got: {err}");
    }

    #[test]
    fn test_latency_budget_shorter_than_period() {
        let mut bp = minimal_blueprint();
        bp.sync.trigger_hz = Some(10.0);
        bp.sync.max_latency_ms = Some(50.0);
        let err = error_text(&bp);
        assert!(err.contains("trigger period"), "got: {err}");
    }

    #[test]
    fn test_small_capacity_and_history() {
        let mut bp = minimal_blueprint();
        bp.sync.buffer = Some(BufferConfig {
            event_capacity: 1,
            ..Default::default()
        });
        assert!(error_text(&bp).contains("event_capacity"));

        let mut bp = minimal_blueprint();
        bp.sync.clock = Some(ClockModelConfig {
            history: 1,
            ..Default::default()
        });
        assert!(error_text(&bp).contains("history"));
    }

    #[test]
    fn test_replay_needs_path() {
        let mut bp = minimal_blueprint();
        bp.devices.event_camera.source = SourceType::Replay;
        let err = error_text(&bp);
        assert!(err.contains("recording path"), "got: {err}");

        bp.devices
            .event_camera
            .params
            .insert("path".into(), "capture.evrec".into());
        assert!(validate(&bp).is_ok());
    }

    #[test]
    fn test_marker_on_frame_camera_rejected() {
        let mut bp = minimal_blueprint();
        bp.devices.rgbd_camera.marker = Some(MarkerConfig::default());
        assert!(error_text(&bp).contains("event camera"));
    }

    #[test]
    fn test_duplicate_sink_name() {
        let mut bp = minimal_blueprint();
        bp.sinks.push(bp.sinks[0].clone());
        assert!(error_text(&bp).contains("duplicate sink name"));
    }

    #[test]
    fn test_empty_sink_name() {
        let mut bp = minimal_blueprint();
        bp.sinks[0].name = String::new();
        assert!(error_text(&bp).contains("cannot be empty"));
    }
}
