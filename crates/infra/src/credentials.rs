//! Access-token acquisition via the refresh-token grant.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::LwaCredentials;

/// Bearer token plus the instant it stops being accepted.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl core::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credentials: {}", .0.join(", "))]
    MissingCredentials(Vec<&'static str>),

    #[error("token exchange failed: {0}")]
    Exchange(String),

    #[error("token endpoint rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("no access token returned: {0}")]
    NoToken(String),
}

/// Supplies bearer tokens on demand.
#[async_trait::async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_token(&self) -> Result<AccessToken, AuthError>;
}

/// Fixed token, for tests and pre-authenticated runs.
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    token: AccessToken,
}

impl StaticCredentialProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: AccessToken {
                token: token.into(),
                expires_at: DateTime::<Utc>::MAX_UTC,
            },
        }
    }
}

#[async_trait::async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn get_token(&self) -> Result<AccessToken, AuthError> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Token lifetime assumed when the endpoint omits `expires_in`.
const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

/// Refresh-token grant against the login-with-amazon token endpoint.
pub struct LwaCredentialProvider {
    client: Client,
    token_url: String,
    credentials: LwaCredentials,
}

impl LwaCredentialProvider {
    pub fn new(
        token_url: impl Into<String>,
        credentials: LwaCredentials,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Exchange(e.to_string()))?;
        Ok(Self {
            client,
            token_url: token_url.into(),
            credentials,
        })
    }

    fn require(&self) -> Result<(&str, &str, &str), AuthError> {
        let LwaCredentials {
            client_id,
            client_secret,
            refresh_token,
        } = &self.credentials;

        let mut missing = Vec::new();
        if client_id.is_none() {
            missing.push("CLIENT_ID");
        }
        if client_secret.is_none() {
            missing.push("CLIENT_SECRET");
        }
        if refresh_token.is_none() {
            missing.push("REFRESH_TOKEN");
        }

        match (client_id, client_secret, refresh_token) {
            (Some(id), Some(secret), Some(refresh)) => Ok((id, secret, refresh)),
            _ => Err(AuthError::MissingCredentials(missing)),
        }
    }
}

#[async_trait::async_trait]
impl CredentialProvider for LwaCredentialProvider {
    async fn get_token(&self) -> Result<AccessToken, AuthError> {
        let (client_id, client_secret, refresh_token) = self.require()?;

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Exchange(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "token endpoint returned an error");
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Exchange(e.to_string()))?;
        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|_| AuthError::NoToken(body.clone()))?;

        let token = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::NoToken(body.clone()))?;
        let ttl = parsed.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        let expires_at = Utc::now() + chrono::Duration::seconds(ttl);

        debug!(%expires_at, "access token obtained");
        Ok(AccessToken { token, expires_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn creds() -> LwaCredentials {
        LwaCredentials {
            client_id: Some("amzn1.client".to_string()),
            client_secret: Some("secret".to_string()),
            refresh_token: Some("Atzr|refresh".to_string()),
        }
    }

    fn provider(server: &MockServer, credentials: LwaCredentials) -> LwaCredentialProvider {
        LwaCredentialProvider::new(
            format!("{}/auth/o2/token", server.uri()),
            credentials,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn exchanges_refresh_token_for_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/o2/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("client_id=amzn1.client"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "Atza|token",
                "token_type": "bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let before = Utc::now();
        let token = provider(&server, creds()).get_token().await.unwrap();
        assert_eq!(token.token, "Atza|token");
        assert!(token.expires_at > before + chrono::Duration::seconds(3500));
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_any_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let partial = LwaCredentials {
            client_secret: None,
            refresh_token: None,
            ..creds()
        };
        let err = provider(&server, partial).get_token().await.unwrap_err();
        match err {
            AuthError::MissingCredentials(keys) => {
                assert_eq!(keys, vec!["CLIENT_SECRET", "REFRESH_TOKEN"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn http_error_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let err = provider(&server, creds()).get_token().await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn response_without_token_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "error": "nope" })),
            )
            .mount(&server)
            .await;

        let err = provider(&server, creds()).get_token().await.unwrap_err();
        assert!(matches!(err, AuthError::NoToken(_)));
    }

    #[test]
    fn debug_hides_token() {
        let token = AccessToken {
            token: "Atza|secret".to_string(),
            expires_at: Utc::now(),
        };
        assert!(!format!("{token:?}").contains("secret"));
    }
}
