//! Dispatcher error types

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatcherError {
    /// A sink's `params` could not be interpreted
    #[error("sink '{sink}' has invalid params: {message}")]
    InvalidParams { sink: String, message: String },

    /// The file sink could not prepare its output directory
    #[error("sink '{sink}' cannot write to {}: {source}", path.display())]
    OutputDir {
        sink: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DispatcherError {
    pub fn invalid_params(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParams {
            sink: sink.into(),
            message: message.into(),
        }
    }

    /// Name of the sink that failed to start
    pub fn sink(&self) -> &str {
        match self {
            Self::InvalidParams { sink, .. } | Self::OutputDir { sink, .. } => sink,
        }
    }
}
