//! Client error types.

use std::path::PathBuf;

use eod_engine::RemoteOperationError;
use thiserror::Error;

/// Client error type.
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP request failed before a response arrived.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The platform answered with a non-success status.
    #[error("API error ({status}) for {url}: {message}")]
    Api {
        status: u16,
        url: String,
        message: String,
    },

    /// Credentials missing or rejected by the token endpoint.
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A success response without the fields the client needs.
    #[error("Unexpected response: {0}")]
    Malformed(String),

    #[error("Local file error at '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Error {
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Error::Auth(_)) || matches!(self, Error::Api { status: 401, .. })
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for RemoteOperationError {
    fn from(err: Error) -> Self {
        match err {
            Error::Api {
                status,
                url,
                message,
            } => RemoteOperationError::Status {
                status,
                url,
                message,
            },
            Error::Http(e) => match e.status() {
                Some(status) => RemoteOperationError::Status {
                    status: status.as_u16(),
                    url: e.url().map(|u| u.to_string()).unwrap_or_default(),
                    message: e.to_string(),
                },
                None => RemoteOperationError::Transport(e.to_string()),
            },
            Error::Auth(message) => RemoteOperationError::Auth(message),
            Error::Io { .. } => RemoteOperationError::Transport(err.to_string()),
            Error::InvalidUrl(_) | Error::Json(_) | Error::Config(_) | Error::Malformed(_) => {
                RemoteOperationError::Malformed(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_keeps_status() {
        let err: RemoteOperationError = Error::Api {
            status: 404,
            url: "https://api.example.org/jobs/v2/1/history".to_string(),
            message: "not found".to_string(),
        }
        .into();
        assert!(err.is_transient());
    }

    #[test]
    fn test_auth_maps_to_auth() {
        let err: RemoteOperationError = Error::Auth("bad secret".to_string()).into();
        assert!(matches!(err, RemoteOperationError::Auth(_)));
        assert!(!err.is_transient());
    }
}
