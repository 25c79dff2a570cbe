//! Error types for the Ferry client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when using the Ferry client
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Server URL is not usable
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    /// RPC connection could not be established
    #[error("RPC transport failed: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// RPC call ended with an error status
    #[error("RPC failed: {0}")]
    Rpc(#[from] tonic::Status),
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Check if the server rejected a submitted log line as unstorable
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::Rpc(status) if status.code() == tonic::Code::InvalidArgument)
    }

    /// Check if this error is a client error (4xx status)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 400 && *status < 500)
    }

    /// Check if this error is a server error (5xx status or internal RPC status)
    pub fn is_server_error(&self) -> bool {
        match self {
            Self::ApiError { status, .. } => *status >= 500,
            Self::Rpc(status) => status.code() == tonic::Code::Internal,
            _ => false,
        }
    }
}
