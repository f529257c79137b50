//! Ingestion error types

use std::path::PathBuf;

use contracts::{ContractError, StreamKind};
use thiserror::Error;

/// Ingestion error
#[derive(Debug, Error)]
pub enum IngestionError {
    /// A device with this stream id is already registered
    #[error("device {stream_id} is already registered")]
    DuplicateDevice { stream_id: String },

    /// Device and producer disagree on which stream they feed
    #[error("device {stream_id} ({device}) cannot feed the {producer} stream {producer_id}")]
    StreamMismatch {
        stream_id: String,
        device: StreamKind,
        producer_id: String,
        producer: StreamKind,
    },

    /// Recording file could not be read or written
    #[error("recording {path}: {source}")]
    RecordingIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Recording bytes are not a valid capture recording
    #[error("failed to decode recording {path}: {message}")]
    Decode { path: PathBuf, message: String },

    /// Recording was written by an incompatible version
    #[error("recording {path} has version {found}, expected {expected}")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    /// Device parameter missing or malformed
    #[error("device {stream_id}: invalid parameter '{key}': {message}")]
    InvalidParam {
        stream_id: String,
        key: String,
        message: String,
    },

    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl IngestionError {
    pub fn invalid_param(
        stream_id: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidParam {
            stream_id: stream_id.into(),
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Ingestion Result alias
pub type Result<T> = std::result::Result<T, IngestionError>;
