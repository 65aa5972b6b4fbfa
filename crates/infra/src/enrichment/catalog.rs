//! Catalog item lookups with throttling-aware retry.

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::retry::RetryPolicy;
use crate::sp_api::SpApiClient;

const CATALOG_ITEMS_PATH: &str = "/catalog/2020-12-01/items";
pub const DEFAULT_INCLUDED_DATA: &str = "images,summaries,attributes";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("throttled (429)")]
    Throttled,

    /// 400/404: the identifier is unknown or malformed. Never retried.
    #[error("not found ({status})")]
    NotFound { status: u16 },

    #[error("http {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid catalog response: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Throttled | FetchError::Http { .. } | FetchError::Transport(_)
        )
    }
}

/// Per-item catalog lookup.
#[async_trait::async_trait]
pub trait CatalogClient: Send + Sync {
    /// Raw item payload, already unwrapped from any `payload` envelope.
    async fn get_item(&self, asin: &str) -> Result<Value, FetchError>;
}

#[derive(Debug, Clone)]
pub struct SpApiCatalogClient {
    api: SpApiClient,
    marketplace_id: String,
    included_data: String,
}

impl SpApiCatalogClient {
    pub fn new(api: SpApiClient, marketplace_id: impl Into<String>) -> Self {
        Self {
            api,
            marketplace_id: marketplace_id.into(),
            included_data: DEFAULT_INCLUDED_DATA.to_string(),
        }
    }

    /// Narrow the requested data sets (e.g. `images` for diagnostics).
    pub fn with_included_data(mut self, included_data: impl Into<String>) -> Self {
        self.included_data = included_data.into();
        self
    }
}

#[async_trait::async_trait]
impl CatalogClient for SpApiCatalogClient {
    async fn get_item(&self, asin: &str) -> Result<Value, FetchError> {
        let response = self
            .api
            .get(&format!("{CATALOG_ITEMS_PATH}/{asin}"))
            .query(&[
                ("marketplaceIds", self.marketplace_id.as_str()),
                ("includedData", self.included_data.as_str()),
            ])
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        match status {
            429 => return Err(FetchError::Throttled),
            400 | 404 => return Err(FetchError::NotFound { status }),
            s if !(200..300).contains(&s) => {
                let body = response.text().await.unwrap_or_default();
                return Err(FetchError::Http { status, body });
            }
            _ => {}
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let mut data: Value =
            serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))?;

        let payload = data.get_mut("payload").map(Value::take);
        Ok(payload.unwrap_or(data))
    }
}

/// Result of a fetch after retries are spent.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Found(Value),
    NotFound { status: u16 },
    Failed { attempts: u32, last_error: FetchError },
}

/// Fetch one item, retrying throttling and transient failures with
/// exponential backoff. No wait follows the final attempt.
pub async fn fetch_with_retry<C>(client: &C, asin: &str, policy: &RetryPolicy) -> FetchOutcome
where
    C: CatalogClient + ?Sized,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match client.get_item(asin).await {
            Ok(payload) => return FetchOutcome::Found(payload),
            Err(FetchError::NotFound { status }) => {
                warn!(asin, status, "catalog item invalid or not found");
                return FetchOutcome::NotFound { status };
            }
            Err(err) if err.is_retryable() && policy.should_retry(attempt) => {
                let delay = policy.delay_after_attempt(attempt);
                warn!(
                    asin,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "catalog fetch failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                warn!(asin, attempt, error = %err, "catalog fetch failed");
                return FetchOutcome::Failed {
                    attempts: attempt,
                    last_error: err,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ITEM_PATH: &str = "/catalog/2020-12-01/items/0441013597";

    fn client(server: &MockServer) -> SpApiCatalogClient {
        let api = SpApiClient::new(&server.uri(), "Atza|token", Duration::from_secs(5)).unwrap();
        SpApiCatalogClient::new(api, "ATVPDKIKX0DER")
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::exponential(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn sends_marketplace_and_unwraps_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ITEM_PATH))
            .and(query_param("marketplaceIds", "ATVPDKIKX0DER"))
            .and(query_param("includedData", "images,summaries,attributes"))
            .and(header("x-amz-access-token", "Atza|token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "payload": { "asin": "0441013597" }
            })))
            .mount(&server)
            .await;

        let item = client(&server).get_item("0441013597").await.unwrap();
        assert_eq!(item, serde_json::json!({ "asin": "0441013597" }));
    }

    #[tokio::test]
    async fn unwrapped_body_is_returned_as_is() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ITEM_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "asin": "X" })),
            )
            .mount(&server)
            .await;

        let item = client(&server).get_item("0441013597").await.unwrap();
        assert_eq!(item["asin"], "X");
    }

    #[tokio::test]
    async fn throttling_then_success_returns_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ITEM_PATH))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(ITEM_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "asin": "ok" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let outcome = fetch_with_retry(&client(&server), "0441013597", &fast_retry()).await;
        assert_eq!(outcome, FetchOutcome::Found(serde_json::json!({ "asin": "ok" })));
    }

    #[tokio::test]
    async fn three_throttles_fail_after_exactly_three_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ITEM_PATH))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let outcome = fetch_with_retry(&client(&server), "0441013597", &fast_retry()).await;
        assert_eq!(
            outcome,
            FetchOutcome::Failed {
                attempts: 3,
                last_error: FetchError::Throttled
            }
        );
    }

    #[tokio::test]
    async fn not_found_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ITEM_PATH))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = fetch_with_retry(&client(&server), "0441013597", &fast_retry()).await;
        assert_eq!(outcome, FetchOutcome::NotFound { status: 404 });
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ITEM_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(ITEM_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let outcome = fetch_with_retry(&client(&server), "0441013597", &fast_retry()).await;
        assert!(matches!(outcome, FetchOutcome::Found(_)));
    }

    #[tokio::test]
    async fn malformed_body_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ITEM_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = fetch_with_retry(&client(&server), "0441013597", &fast_retry()).await;
        assert!(matches!(
            outcome,
            FetchOutcome::Failed {
                attempts: 1,
                last_error: FetchError::Decode(_)
            }
        ));
    }
}
