use harvest_sink::SinkError;
use harvest_source::{CredentialError, SourceError};
use thiserror::Error;

/// Failures that end a run. Per-item and per-batch failures never show up
/// here: they degrade the record or dead-letter the batch instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no valid credentials: {0}")]
    AuthUnavailable(#[source] CredentialError),

    #[error("source setup failed: {0}")]
    Source(#[from] SourceError),

    #[error("sink failure: {0}")]
    Sink(#[from] SinkError),
}
