use thiserror::Error;

/// Failures surfaced by the generation pipeline.
///
/// Soft data-quality problems (bad JSON in a cell, an image that cannot be
/// fetched) never become a `PipelineError`; they are absorbed where they are
/// detected.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing input, rejected before any network call.
    #[error("{0}")]
    Validation(String),

    /// A mutation was attempted while a generation request is outstanding.
    #[error("A request is already in progress")]
    Busy,

    #[error("{endpoint} failed ({status}): {message}")]
    Transport {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("{endpoint} request failed: {source}")]
    Network {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// The response could not yield the minimally required field.
    #[error("Invalid response from {0}")]
    InvalidResponse(String),
}

impl PipelineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn invalid_response(endpoint: impl Into<String>) -> Self {
        Self::InvalidResponse(endpoint.into())
    }

    /// Whether retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Transport { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_message_uses_body() {
        let err = PipelineError::Transport {
            endpoint: "generate-video".to_string(),
            status: 502,
            message: "upstream timed out".to_string(),
        };
        assert_eq!(err.to_string(), "generate-video failed (502): upstream timed out");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_client_errors_are_not_retried() {
        let err = PipelineError::Transport {
            endpoint: "generate-script".to_string(),
            status: 400,
            message: "bad prompt".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(!PipelineError::validation("nope").is_retryable());
        assert!(!PipelineError::invalid_response("generate-description").is_retryable());
    }

    #[test]
    fn test_invalid_response_message() {
        let err = PipelineError::invalid_response("generate-description");
        assert_eq!(err.to_string(), "Invalid response from generate-description");
    }
}
