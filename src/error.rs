//! Error taxonomy for the ingestion pipeline.
//!
//! [`PageError`] covers failures scoped to one page; the coordinator turns
//! them into a skip. [`PipelineError`] is what aborts a run and reaches the
//! caller. A natural-key conflict is neither: it is a normal
//! `inserted = false` outcome.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Page source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("Repository unavailable: {0}")]
    RepositoryUnavailable(#[from] sqlx::Error),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Error, Debug)]
pub enum PageError {
    #[error("render failed: {0}")]
    Render(String),
    #[error("artifact write failed: {0}")]
    Artifact(#[from] std::io::Error),
    #[error("page exceeded its time budget of {0:?}")]
    Timeout(std::time::Duration),
}
