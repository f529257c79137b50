//! Error types for CLI operations.

use std::path::PathBuf;

use contracts::StreamKind;
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("configuration file not found: {}", path.display())]
    ConfigNotFound { path: PathBuf },

    #[error("recording not found: {}", path.display())]
    RecordingNotFound { path: PathBuf },

    #[error("configuration does not provide a {kind} device")]
    MissingDevice { kind: StreamKind },

    #[error("duration must be a positive number of seconds, got {value}")]
    InvalidDuration { value: f64 },

    #[error("pipeline execution failed: {message}")]
    PipelineExecution { message: String },
}

impl CliError {
    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn recording_not_found(path: impl Into<PathBuf>) -> Self {
        Self::RecordingNotFound { path: path.into() }
    }

    pub fn pipeline(message: impl Into<String>) -> Self {
        Self::PipelineExecution {
            message: message.into(),
        }
    }
}

/// Load a config file, distinguishing a missing file from a bad one
pub fn load_blueprint(path: &std::path::Path) -> anyhow::Result<contracts::RigBlueprint> {
    use anyhow::Context;

    if !path.exists() {
        return Err(CliError::config_not_found(path).into());
    }
    config_loader::ConfigLoader::load_from_path(path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

/// Seconds from the command line as a `Duration`
pub fn parse_duration(seconds: f64) -> Result<std::time::Duration, CliError> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(CliError::InvalidDuration { value: seconds });
    }
    Ok(std::time::Duration::from_secs_f64(seconds))
}
