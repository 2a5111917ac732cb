// Error handling module
// Defines the client error taxonomy surfaced to callers

use serde_json::Value;
use thiserror::Error;

use crate::chat::ChatError;
use crate::upload::UploadError;

/// Errors returned by the roster client
#[derive(Error, Debug)]
pub enum ClientError {
    /// Refresh failed; the stored session was cleared and the user must sign in again
    #[error("Session ended: {0}")]
    SessionEnded(String),

    /// Non-success response from the service, body surfaced verbatim
    #[error("API error: {status} - {body}")]
    Api { status: u16, body: Value },

    /// Network failure before any status was received
    #[error("Transport error: {0}")]
    Transport(String),

    /// Success status but the body could not be decoded
    #[error("Invalid response: {0}")]
    Decode(String),

    /// Input rejected before any network call
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),

    #[error("Credential store error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ClientError {
    /// Whether the caller should route to the sign-in entry point
    pub fn is_session_ended(&self) -> bool {
        matches!(self, ClientError::SessionEnded(_))
    }

    /// HTTP status for service errors
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short message suitable for an inline, dismissible notice
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Api { body, .. } => body
                .get("error")
                .or_else(|| body.get("message"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| "Request failed".to_string()),
            ClientError::SessionEnded(_) => "Session expired, please sign in again".to_string(),
            ClientError::Validation(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

impl From<crate::transport::TransportError> for ClientError {
    fn from(e: crate::transport::TransportError) -> Self {
        ClientError::Transport(e.to_string())
    }
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
