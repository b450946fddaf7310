use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP error calling {endpoint}: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("rate limited by {endpoint}")]
    RateLimited { endpoint: String },

    #[error("{endpoint} is temporarily unavailable")]
    ServiceUnavailable { endpoint: String },

    #[error("unexpected HTTP status {status} from {endpoint}")]
    UnexpectedStatus { status: u16, endpoint: String },

    #[error("{endpoint} failed after {attempts} attempts: {last}")]
    Exhausted {
        endpoint: String,
        attempts: u32,
        last: String,
    },

    #[error("source session expired: {message}")]
    AuthExpired { message: String },

    #[error("source API returned {code}: {message}")]
    Api { code: String, message: String },

    #[error("malformed response from {context}: {reason}")]
    MalformedResponse { context: String, reason: String },

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error("request signing failed: {0}")]
    Signing(String),

    #[error("could not build request for {endpoint}: {reason}")]
    InvalidRequest { endpoint: String, reason: String },
}

impl SourceError {
    /// Transport-level conditions worth another attempt.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SourceError::Http { .. }
                | SourceError::RateLimited { .. }
                | SourceError::ServiceUnavailable { .. }
        )
    }

    /// `true` when no usable credentials could be obtained at all.
    #[must_use]
    pub fn is_auth_unavailable(&self) -> bool {
        matches!(self, SourceError::Credentials(_))
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no valid credentials available: {0}")]
    Unavailable(String),

    #[error("credential cache I/O failed for {path}: {source}")]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("credential cache {path} is not valid JSON: {source}")]
    CacheParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("login collaborator did not answer within {0:?}")]
    LoginTimeout(Duration),

    #[error("login collaborator is not running")]
    LoginClosed,

    #[error("login failed: {0}")]
    LoginFailed(String),
}
