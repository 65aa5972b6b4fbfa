use std::io::Read;
use std::time::Duration;

use flate2::read::MultiGzDecoder;
use tracing::{info, warn};

use super::ReportError;
use super::transport::{ProcessingStatus, ReportStatus, ReportTransport};

/// Drives one report through create, poll and download.
///
/// A failed report is never recreated here; callers decide whether to start
/// over with a fresh `create`.
pub struct ReportFetcher<T> {
    transport: T,
    report_type: String,
    marketplace_ids: Vec<String>,
    poll_interval: Duration,
}

impl<T: ReportTransport> ReportFetcher<T> {
    pub fn new(
        transport: T,
        report_type: impl Into<String>,
        marketplace_ids: Vec<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            transport,
            report_type: report_type.into(),
            marketplace_ids,
            poll_interval,
        }
    }

    pub async fn create(&self) -> Result<String, ReportError> {
        let report_id = self
            .transport
            .create_report(&self.report_type, &self.marketplace_ids)
            .await?;
        info!(report_id = %report_id, report_type = %self.report_type, "report requested");
        Ok(report_id)
    }

    pub async fn poll(&self, report_id: &str) -> Result<ReportStatus, ReportError> {
        self.transport.get_report(report_id).await
    }

    /// Poll until the report is terminal; returns the document id on `DONE`.
    pub async fn wait_until_done(&self, report_id: &str) -> Result<String, ReportError> {
        loop {
            let status = self.poll(report_id).await?;
            info!(report_id, status = %status.processing_status, "report status");

            if status.processing_status.is_terminal() {
                return match status.processing_status {
                    ProcessingStatus::Done => {
                        status
                            .report_document_id
                            .ok_or_else(|| ReportError::MissingDocument {
                                report_id: report_id.to_string(),
                            })
                    }
                    failed => Err(ReportError::Failed {
                        report_id: report_id.to_string(),
                        status: failed,
                    }),
                };
            }
            if let ProcessingStatus::Other(raw) = &status.processing_status {
                warn!(report_id, status = %raw, "unrecognised report status, still waiting");
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Fetch a finished document, gunzipping it when flagged as `GZIP`.
    pub async fn download(&self, document_id: &str) -> Result<Vec<u8>, ReportError> {
        let document = self.transport.get_document(document_id).await?;
        let raw = self.transport.download(&document.url).await?;
        decompress(raw, document.compression_algorithm.as_deref())
    }

    /// Full workflow: create, wait, download.
    pub async fn fetch_snapshot(&self) -> Result<Vec<u8>, ReportError> {
        let report_id = self.create().await?;
        let document_id = self.wait_until_done(&report_id).await?;
        let bytes = self.download(&document_id).await?;
        info!(report_id = %report_id, bytes = bytes.len(), "report downloaded");
        Ok(bytes)
    }
}

pub fn decompress(raw: Vec<u8>, compression: Option<&str>) -> Result<Vec<u8>, ReportError> {
    match compression {
        Some(algo) if algo.eq_ignore_ascii_case("GZIP") => {
            let mut out = Vec::with_capacity(raw.len() * 4);
            MultiGzDecoder::new(raw.as_slice())
                .read_to_end(&mut out)
                .map_err(|e| ReportError::Decompress(e.to_string()))?;
            Ok(out)
        }
        _ => Ok(raw),
    }
}
