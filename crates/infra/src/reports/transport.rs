use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::ReportError;
use crate::sp_api::SpApiClient;

const REPORTS_PATH: &str = "/reports/2021-06-30/reports";
const DOCUMENTS_PATH: &str = "/reports/2021-06-30/documents";

/// Processing state reported by the bulk-report API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingStatus {
    InQueue,
    InProgress,
    Done,
    Cancelled,
    Fatal,
    /// Anything the API adds later. Treated as still running.
    Other(String),
}

impl ProcessingStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "IN_QUEUE" => ProcessingStatus::InQueue,
            "IN_PROGRESS" => ProcessingStatus::InProgress,
            "DONE" => ProcessingStatus::Done,
            "CANCELLED" => ProcessingStatus::Cancelled,
            "FATAL" => ProcessingStatus::Fatal,
            other => ProcessingStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ProcessingStatus::InQueue => "IN_QUEUE",
            ProcessingStatus::InProgress => "IN_PROGRESS",
            ProcessingStatus::Done => "DONE",
            ProcessingStatus::Cancelled => "CANCELLED",
            ProcessingStatus::Fatal => "FATAL",
            ProcessingStatus::Other(s) => s,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessingStatus::Done | ProcessingStatus::Cancelled | ProcessingStatus::Fatal
        )
    }
}

impl core::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportStatus {
    pub processing_status: ProcessingStatus,
    pub report_document_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDocument {
    pub url: String,
    #[serde(default)]
    pub compression_algorithm: Option<String>,
}

/// Raw operations of the bulk-report API.
#[async_trait::async_trait]
pub trait ReportTransport: Send + Sync {
    async fn create_report(
        &self,
        report_type: &str,
        marketplace_ids: &[String],
    ) -> Result<String, ReportError>;

    async fn get_report(&self, report_id: &str) -> Result<ReportStatus, ReportError>;

    async fn get_document(&self, document_id: &str) -> Result<ReportDocument, ReportError>;

    /// Fetch the document body from its pre-signed URL.
    async fn download(&self, url: &str) -> Result<Vec<u8>, ReportError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateReportResponse {
    report_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetReportResponse {
    processing_status: String,
    #[serde(default)]
    report_document_id: Option<String>,
}

/// Bulk-report API over HTTP.
#[derive(Debug, Clone)]
pub struct SpApiReportTransport {
    api: SpApiClient,
    // Pre-signed URLs reject the selling-partner auth header.
    download_client: reqwest::Client,
}

impl SpApiReportTransport {
    pub fn new(api: SpApiClient) -> Self {
        Self {
            api,
            download_client: reqwest::Client::new(),
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ReportError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReportError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ReportError::Decode(format!("{e}: {body}")))
    }
}

#[async_trait::async_trait]
impl ReportTransport for SpApiReportTransport {
    async fn create_report(
        &self,
        report_type: &str,
        marketplace_ids: &[String],
    ) -> Result<String, ReportError> {
        let response = self
            .api
            .post(REPORTS_PATH)
            .json(&json!({
                "reportType": report_type,
                "marketplaceIds": marketplace_ids,
            }))
            .send()
            .await?;
        let created: CreateReportResponse = Self::read_json(response).await?;
        Ok(created.report_id)
    }

    async fn get_report(&self, report_id: &str) -> Result<ReportStatus, ReportError> {
        let response = self
            .api
            .get(&format!("{REPORTS_PATH}/{report_id}"))
            .send()
            .await?;
        let report: GetReportResponse = Self::read_json(response).await?;
        Ok(ReportStatus {
            processing_status: ProcessingStatus::parse(&report.processing_status),
            report_document_id: report.report_document_id,
        })
    }

    async fn get_document(&self, document_id: &str) -> Result<ReportDocument, ReportError> {
        let response = self
            .api
            .get(&format!("{DOCUMENTS_PATH}/{document_id}"))
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ReportError> {
        let response = self.download_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReportError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response.bytes().await?;
        debug!(bytes = bytes.len(), "report document downloaded");
        Ok(bytes.to_vec())
    }
}
