//! # Config Loader
//!
//! Rig configuration loading.
//!
//! Responsibilities:
//! - Parse TOML/JSON configuration files
//! - Validate the blueprint before anything is started
//! - Produce a `RigBlueprint`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let blueprint = ConfigLoader::load_from_path(Path::new("rig.toml")).unwrap();
//! println!("Rig: {}", blueprint.rig.name);
//! ```

mod parser;
mod validator;

pub use contracts::RigBlueprint;
pub use parser::ConfigFormat;

use contracts::ContractError;
use std::path::Path;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file, format taken from the extension
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<RigBlueprint, ContractError> {
        let format = Self::detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load configuration from a string
    ///
    /// # Errors
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<RigBlueprint, ContractError> {
        let blueprint = parser::parse(content, format)?;
        validator::validate(&blueprint)?;
        Ok(blueprint)
    }

    /// Validate a blueprint built in code
    pub fn validate(blueprint: &RigBlueprint) -> Result<(), ContractError> {
        validator::validate(blueprint)
    }

    pub fn to_toml(blueprint: &RigBlueprint) -> Result<String, ContractError> {
        toml::to_string_pretty(blueprint)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    pub fn to_json(blueprint: &RigBlueprint) -> Result<String, ContractError> {
        serde_json::to_string_pretty(blueprint)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }

    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::MarkerConfig;

    const MINIMAL_TOML: &str = r#"
[rig]
name = "bench"

[devices.event_camera]
id = "prophesee"
marker = { strategy = "ext_trigger", channel = 1 }
params = { seed = "11", events_per_window = "50" }

[devices.rgbd_camera]
id = "orbbec"
params = { missing = "4,9" }

[sync]
trigger_hz = 30.0

[[sinks]]
name = "log_sink"
sink_type = "log"
"#;

    #[test]
    fn test_load_from_str_toml() {
        let bp = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        assert_eq!(bp.rig.name, "bench");
        assert_eq!(
            bp.devices.event_camera.marker,
            Some(MarkerConfig::ExtTrigger {
                channel: 1,
                rising_only: true
            })
        );
    }

    #[test]
    fn test_round_trip_toml() {
        let bp = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        let serialized = ConfigLoader::to_toml(&bp).unwrap();
        let bp2 = ConfigLoader::load_from_str(&serialized, ConfigFormat::Toml).unwrap();
        assert_eq!(bp.rig.name, bp2.rig.name);
        assert_eq!(bp.devices.rgbd_camera.params, bp2.devices.rgbd_camera.params);
        assert_eq!(bp.devices.event_camera.marker, bp2.devices.event_camera.marker);
    }

    #[test]
    fn test_round_trip_json() {
        let bp = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&bp).unwrap();
        let bp2 = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(bp.sinks.len(), bp2.sinks.len());
    }

    #[test]
    fn test_load_from_path_detects_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rig.toml");
        std::fs::write(&path, MINIMAL_TOML).unwrap();
        assert!(ConfigLoader::load_from_path(&path).is_ok());

        let yaml = dir.path().join("rig.yaml");
        std::fs::write(&yaml, "rig: {}").unwrap();
        let err = ConfigLoader::load_from_path(&yaml).unwrap_err();
        assert!(err.to_string().contains("unsupported config format"));
    }

    #[test]
    fn test_validation_runs_after_parse() {
        let content = MINIMAL_TOML.replace("id = \"orbbec\"", "id = \"prophesee\"");
        let err = ConfigLoader::load_from_str(&content, ConfigFormat::Toml).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
