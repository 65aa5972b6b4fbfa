//! Run-level error taxonomy.
//!
//! Only these errors escape a pipeline run. Per-item enrichment failures are
//! recorded in storage as error markers and never surface here.

use thiserror::Error;

use crate::config::ConfigError;
use crate::credentials::AuthError;
use crate::enrichment::FetchError;
use crate::reports::ReportError;
use crate::store::StoreError;

/// Which reconciliation phase a batch belonged to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WritePhase {
    Upsert,
    MarkSold,
}

impl core::fmt::Display for WritePhase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            WritePhase::Upsert => f.write_str("upsert"),
            WritePhase::MarkSold => f.write_str("mark-sold"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("catalog fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("http client setup failed: {0}")]
    HttpClient(String),

    /// A reconciliation batch failed; earlier batches stay committed.
    #[error(
        "{phase} batch {batch_index} failed after {committed_batches} committed batch(es): {source}"
    )]
    BatchWrite {
        phase: WritePhase,
        batch_index: usize,
        committed_batches: usize,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}
