//! Error taxonomy shared across the probe.
//!
//! Decode failures and session interruptions are recovered locally by the
//! capture loop; configuration failures stop the process at start-up.

use crate::types::MessageKind;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {0} does not exist")]
    NotFound(PathBuf),
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("missing required key `{0}`")]
    MissingKey(String),
    #[error("key `{key}` has invalid value: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("schema file {0} does not exist")]
    SchemaNotFound(PathBuf),
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to decode {kind} payload: {source}")]
    Decode {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("decoded {found} where {expected} was expected")]
    KindMismatch {
        expected: MessageKind,
        found: MessageKind,
    },
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("interface `{0}` not found")]
    InterfaceNotFound(String),
    #[error("capture session closed by peer")]
    SessionClosed,
    #[error("capture I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed capture record: {0}")]
    Malformed(String),
}

impl CaptureError {
    /// Configuration-level failures that must not be retried by the restart policy
    pub fn is_fatal(&self) -> bool {
        matches!(self, CaptureError::InterfaceNotFound(_))
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport not connected")]
    NotConnected,
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("failed to serialize frame: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum AttackError {
    #[error("no awareness message arrived to derive a position from")]
    PositionUnavailable,
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("burst task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind request boundary on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed HTTP request: {0}")]
    BadRequest(String),
}
