//! Bulk-report workflow: create, poll to a terminal state, download.

mod fetcher;
mod transport;

pub use fetcher::{ReportFetcher, decompress};
pub use transport::{
    ProcessingStatus, ReportDocument, ReportStatus, ReportTransport, SpApiReportTransport,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    /// The report reached `CANCELLED` or `FATAL`. Not retried.
    #[error("report {report_id} failed with status {status}")]
    Failed {
        report_id: String,
        status: ProcessingStatus,
    },

    #[error("report api returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("report transport error: {0}")]
    Transport(String),

    #[error("unexpected report api response: {0}")]
    Decode(String),

    #[error("report {report_id} is done but has no document id")]
    MissingDocument { report_id: String },

    #[error("failed to decompress report document: {0}")]
    Decompress(String),
}

impl From<reqwest::Error> for ReportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ReportError::Decode(err.to_string())
        } else {
            ReportError::Transport(err.to_string())
        }
    }
}
