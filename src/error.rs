//! Failure taxonomy
//!
//! Every variant is fatal: a run either completes in full or aborts, and the
//! sink artifact of an aborted run is invalid. Recovery is always "fix the
//! root cause, re-run the whole batch".

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The source stream violated an invariant the engine cannot repair:
    /// a timestamp went backwards, or a document is malformed
    #[error("source integrity: {0}")]
    SourceIntegrity(String),

    /// The output sink rejected a table creation, row write, or commit
    #[error("sink failure: {0}")]
    Sink(#[from] rusqlite::Error),

    /// Required input was missing before either pass began
    #[error("configuration: {0}")]
    Configuration(String),
}
