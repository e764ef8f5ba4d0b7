/// Error type surfaced by the streaming client.
///
/// `MalformedEvent` is produced by per-line decoding and is always recovered
/// locally; the orchestrator logs it and moves on to the next line.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("HTTP error: status={status}, body={body}")]
    Http { status: u16, body: String },
    #[error("No model identifier configured and the backend declares no fallback model")]
    MissingModelIdentifier,
    #[error("Malformed event: {0}")]
    MalformedEvent(String),
    #[error("Backend reported an error: {0}")]
    Remote(String),
}

impl ClientError {
    /// HTTP status carried by the error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a caller could reasonably retry the same request.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Http { status, .. } => {
                matches!(*status, 408 | 429) || (500..=599).contains(status)
            }
            ClientError::InvalidResponse(_) => true,
            ClientError::Config(_)
            | ClientError::InvalidEndpoint(_)
            | ClientError::MissingModelIdentifier
            | ClientError::MalformedEvent(_)
            | ClientError::Remote(_) => false,
        }
    }
}

impl From<crate::config::ConfigError> for ClientError {
    fn from(err: crate::config::ConfigError) -> Self {
        ClientError::Config(err.to_string())
    }
}
