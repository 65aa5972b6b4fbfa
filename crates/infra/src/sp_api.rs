//! Authenticated HTTP access to the selling-partner API.

use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder};
use thiserror::Error;

/// Header carrying the bearer token on every selling-partner request.
pub const ACCESS_TOKEN_HEADER: &str = "x-amz-access-token";

#[derive(Debug, Error)]
pub enum ClientBuildError {
    /// The token contains bytes that cannot go into an HTTP header.
    #[error("access token is not a valid header value")]
    InvalidToken,

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Thin wrapper around a `reqwest::Client` bound to one endpoint and one
/// access token.
///
/// The token is fixed for the lifetime of the client; an expired token is
/// not refreshed mid-run.
#[derive(Debug, Clone)]
pub struct SpApiClient {
    client: Client,
    endpoint: String,
}

impl SpApiClient {
    pub fn new(
        endpoint: &str,
        access_token: &str,
        timeout: Duration,
    ) -> Result<Self, ClientBuildError> {
        let mut token =
            HeaderValue::from_str(access_token).map_err(|_| ClientBuildError::InvalidToken)?;
        token.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(ACCESS_TOKEN_HEADER, token);

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path))
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path))
    }
}
