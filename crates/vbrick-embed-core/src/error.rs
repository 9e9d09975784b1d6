//! Error types for the embed core

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for embed operations
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Embed error types
///
/// Cloneable so a single `initialize()` outcome can be handed to every caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbedError {
    // Construction errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Content id must not be empty")]
    EmptyContentId,

    #[error("Failed to mount embed frame: {0}")]
    Mount(String),

    // Handshake errors
    #[error("Timed out after {after_ms}ms waiting for '{event}'")]
    Timeout { event: String, after_ms: u64 },

    #[error("Embed reported error '{code}'")]
    Remote { code: String, message: Option<String> },

    #[error("Unsupported token type: {0}")]
    UnsupportedTokenType(String),

    // Lifecycle errors
    #[error("Embed has been destroyed")]
    Destroyed,

    // Message errors
    #[error("Malformed '{event}' payload: {reason}")]
    MalformedPayload { event: String, reason: String },

    #[error("Unknown event '{0}' for this embed")]
    UnknownEvent(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl EmbedError {
    /// Returns true if this error came from the embedded player rather than this side
    pub fn is_remote(&self) -> bool {
        matches!(self, EmbedError::Remote { .. })
    }

    /// The synthetic error code published to the iframe for this failure
    pub fn synthetic_code(&self) -> ErrorCode {
        match self {
            EmbedError::Timeout { .. } => ErrorCode::Timeout,
            EmbedError::UnsupportedTokenType(_) => ErrorCode::UnsupportedToken,
            EmbedError::Remote { .. } => ErrorCode::RemoteError,
            EmbedError::Mount(_) | EmbedError::ContainerNotFound(_) => ErrorCode::LoadFailed,
            _ => ErrorCode::Unknown,
        }
    }

    /// Returns the error code for diagnostics
    pub fn error_code(&self) -> &'static str {
        match self {
            EmbedError::InvalidConfig(_) => "INVALID_CONFIG",
            EmbedError::ContainerNotFound(_) => "CONTAINER_NOT_FOUND",
            EmbedError::EmptyContentId => "EMPTY_CONTENT_ID",
            EmbedError::Mount(_) => "MOUNT",
            EmbedError::Timeout { .. } => "TIMEOUT",
            EmbedError::Remote { .. } => "REMOTE",
            EmbedError::UnsupportedTokenType(_) => "UNSUPPORTED_TOKEN",
            EmbedError::Destroyed => "DESTROYED",
            EmbedError::MalformedPayload { .. } => "MALFORMED_PAYLOAD",
            EmbedError::UnknownEvent(_) => "UNKNOWN_EVENT",
            EmbedError::Serialization(_) => "SERIALIZATION",
        }
    }
}

impl From<serde_json::Error> for EmbedError {
    fn from(err: serde_json::Error) -> Self {
        EmbedError::Serialization(err.to_string())
    }
}

/// Diagnostic code carried by a synthetic `error` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The frame could not be created or never reported `load`
    LoadFailed,
    /// A handshake step exceeded the configured timeout
    Timeout,
    /// The configured token has a type this SDK cannot send
    UnsupportedToken,
    /// The embedded player rejected the handshake
    RemoteError,
    /// A token refresh was not confirmed
    TokenRefreshFailed,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::LoadFailed => "LoadFailed",
            ErrorCode::Timeout => "Timeout",
            ErrorCode::UnsupportedToken => "UnsupportedToken",
            ErrorCode::RemoteError => "RemoteError",
            ErrorCode::TokenRefreshFailed => "TokenRefreshFailed",
            ErrorCode::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
