//! Error types for upstream health API calls

use thiserror::Error;

/// Errors returned by a [`HealthApi`](super::HealthApi) implementation
#[derive(Error, Debug)]
pub enum SourceError {
    /// The API answered with an error
    #[error("{operation} failed: {message}")]
    Api {
        operation: &'static str,
        message: String,
    },

    /// The request never got an answer (connection, timeout, credentials)
    #[error("Transport error during {operation}: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },

    /// The answer could not be mapped onto our types
    #[error("Invalid response from {operation}: {message}")]
    InvalidResponse {
        operation: &'static str,
        message: String,
    },
}

/// Result type for upstream calls
pub type SourceResult<T> = Result<T, SourceError>;

impl SourceError {
    /// Create an API error for an operation
    pub fn api(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Api {
            operation,
            message: message.into(),
        }
    }

    /// Create a transport error for an operation
    pub fn transport(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Transport {
            operation,
            message: message.into(),
        }
    }

    /// Create an invalid-response error for an operation
    pub fn invalid_response(operation: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            operation,
            message: message.into(),
        }
    }

    /// Name of the upstream operation that failed
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Api { operation, .. }
            | Self::Transport { operation, .. }
            | Self::InvalidResponse { operation, .. } => operation,
        }
    }

    /// Transport failures are worth re-issuing; API rejections are not
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_names_operation() {
        let err = SourceError::api("DescribeEventsForOrganization", "throttled");
        assert!(err.to_string().contains("DescribeEventsForOrganization"));
        assert!(err.to_string().contains("throttled"));
        assert_eq!(err.operation(), "DescribeEventsForOrganization");
    }

    #[test]
    fn test_is_transient() {
        assert!(SourceError::transport("op", "timeout").is_transient());
        assert!(!SourceError::api("op", "denied").is_transient());
        assert!(!SourceError::invalid_response("op", "bad json").is_transient());
    }
}
