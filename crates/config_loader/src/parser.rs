//! Config parsing
//!
//! TOML (primary) and JSON.

use contracts::{ContractError, RigBlueprint};

/// Config file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Infer the format from a file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn parse_toml(content: &str) -> Result<RigBlueprint, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

pub fn parse_json(content: &str) -> Result<RigBlueprint, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

pub fn parse(content: &str, format: ConfigFormat) -> Result<RigBlueprint, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{MarkerConfig, SinkType, SourceType};

    #[test]
    fn test_parse_toml_minimal() {
        let content = r#"
[rig]
name = "bench"

[devices.event_camera]
id = "prophesee"

[devices.rgbd_camera]
id = "orbbec"
"#;
        let bp = parse_toml(content).unwrap();
        assert_eq!(bp.rig.name, "bench");
        assert_eq!(bp.devices.event_camera.source, SourceType::Mock);
        assert_eq!(bp.devices.rgbd_camera.tick_hz, 1_000_000.0);
        assert!(bp.sinks.is_empty());
        assert!(bp.sync.trigger_hz.is_none());
    }

    #[test]
    fn test_parse_toml_full() {
        let content = r#"
[rig]
name = "bench"
description = "lab rig"

[devices.event_camera]
id = "prophesee"
source = "replay"
marker = { strategy = "reserved_pixel", x = 0, y = 0 }
params = { path = "capture.evrec", speed = "2" }

[devices.rgbd_camera]
id = "orbbec"
source = "replay"
tick_hz = 90000.0
params = { path = "capture.evrec" }

[sync]
trigger_hz = 60.0
jitter_tolerance_ms = 50.0
disconnect_policy = "halt"

[sync.buffer]
event_capacity = 256
frame_capacity = 16

[[sinks]]
name = "disk"
sink_type = "file"
queue_capacity = 32
params = { base_path = "./out" }
"#;
        let bp = parse_toml(content).unwrap();
        assert_eq!(
            bp.devices.event_camera.marker,
            Some(MarkerConfig::ReservedPixel { x: 0, y: 0 })
        );
        assert_eq!(bp.devices.rgbd_camera.tick_hz, 90_000.0);
        assert_eq!(bp.sync.trigger_hz, Some(60.0));
        assert_eq!(bp.sync.buffer.as_ref().unwrap().frame_capacity, 16);
        assert_eq!(bp.sinks[0].sink_type, SinkType::File);
        assert_eq!(bp.sinks[0].params["base_path"], "./out");
    }

    #[test]
    fn test_parse_json_minimal() {
        let content = r#"{
            "rig": { "name": "bench" },
            "devices": {
                "event_camera": { "id": "events" },
                "rgbd_camera": { "id": "rgbd" }
            },
            "sinks": [{ "name": "log", "sink_type": "log" }]
        }"#;
        let bp = parse_json(content).unwrap();
        assert_eq!(bp.sinks[0].queue_capacity, 100);
    }

    #[test]
    fn test_parse_toml_syntax_error() {
        let err = parse_toml("invalid toml [[[").unwrap_err();
        assert!(matches!(err, ContractError::ConfigParse { .. }));
    }

    #[test]
    fn test_unknown_marker_strategy_rejected() {
        let content = r#"
[rig]
name = "bench"

[devices.event_camera]
id = "events"
marker = { strategy = "blinking_led" }

[devices.rgbd_camera]
id = "rgbd"
"#;
        assert!(parse_toml(content).is_err());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_extension("toml"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("TOML"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("json"), Some(ConfigFormat::Json));
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
