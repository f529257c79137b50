//! Layered error definitions
//!
//! Categorized by source: config / device / sync / sink

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Device Errors =====
    /// A capture device went away; fatal for its stream
    #[error("device '{stream_id}' disconnected: {reason}")]
    DeviceDisconnected { stream_id: String, reason: String },

    /// Device produced a sample that cannot be interpreted
    #[error("payload parse error for stream '{stream_id}': {message}")]
    PayloadParse { stream_id: String, message: String },

    // ===== Sync Errors =====
    /// Aligner thread terminated abnormally
    #[error("aligner error: {message}")]
    Aligner { message: String },

    // ===== Sink Errors =====
    /// Sink write error
    #[error("sink '{sink_name}' write error: {message}")]
    SinkWrite { sink_name: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create device disconnected error
    pub fn device_disconnected(stream_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeviceDisconnected {
            stream_id: stream_id.into(),
            reason: reason.into(),
        }
    }

    /// Create sink write error
    pub fn sink_write(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = ContractError::device_disconnected("prophesee", "usb reset");
        assert_eq!(
            err.to_string(),
            "device 'prophesee' disconnected: usb reset"
        );

        let err = ContractError::config_validation("sync.trigger_hz", "must be > 0");
        assert!(err.to_string().contains("sync.trigger_hz"));
    }
}
