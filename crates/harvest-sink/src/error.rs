use std::path::PathBuf;

use thiserror::Error;

/// Local failures of the sink side. A rejected push is not an error here:
/// it is reported as a dead-lettered [`crate::PushOutcome`].
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("buffer I/O failed for {path}: {source}")]
    BufferIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("buffer CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("buffer worker stopped unexpectedly: {0}")]
    Worker(String),

    #[error("dead-letter log I/O failed for {path}: {source}")]
    DeadLetterIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("dead-letter log {path} line {line} is not valid JSON: {source}")]
    DeadLetterParse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("push endpoint not configured")]
    NotConfigured,

    #[error("invalid sink header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("HTTP client error: {0}")]
    Client(#[source] reqwest::Error),

    #[error("order store error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("order store migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("record payload cannot be encoded: {0}")]
    Payload(#[source] serde_json::Error),
}

/// Why one push attempt failed.
#[derive(Debug, Error)]
pub(crate) enum PushAttemptError {
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("HTTP {status}: {preview}")]
    Status { status: u16, preview: String },

    #[error("response is not JSON: {preview}")]
    NotJson { preview: String },

    #[error("API failed: code={code}, message={message}")]
    Rejected { code: String, message: String },
}

impl PushAttemptError {
    pub(crate) fn is_retriable(&self) -> bool {
        match self {
            PushAttemptError::Transport(_) => true,
            PushAttemptError::Status { status, .. } => *status == 429 || *status >= 500,
            PushAttemptError::NotJson { .. } | PushAttemptError::Rejected { .. } => false,
        }
    }
}
