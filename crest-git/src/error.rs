//! Error types for the Git provider client

use thiserror::Error;

/// Result type alias for Git provider operations
pub type Result<T> = std::result::Result<T, GitError>;

/// Errors that can occur when talking to a Git host
#[derive(Debug, Error)]
pub enum GitError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("Git API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// Failed to parse a response body
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// A URL did not have the expected shape
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The fake provider was asked about an object it does not know
    #[error("Unknown pull request: {0}")]
    UnknownPullRequest(String),
}

impl GitError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Create an invalid-URL error
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }
}
