//! Runtime configuration loaded from the process environment.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryPolicy;

pub const DEFAULT_MARKETPLACE_ID: &str = "ATVPDKIKX0DER";
pub const DEFAULT_SP_API_ENDPOINT: &str = "https://sellingpartnerapi-na.amazon.com";
pub const DEFAULT_TOKEN_URL: &str = "https://api.amazon.com/auth/o2/token";
pub const DEFAULT_REPORT_TYPE: &str = "GET_MERCHANT_LISTINGS_ALL_DATA";
pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/catalogsync";
/// Longest accepted `ENRICH_CACHE_DAYS`.
pub const MAX_CACHE_DAYS: i64 = 36_500;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Refresh-token grant credentials. Presence is checked by the credential
/// provider, not at load time.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct LwaCredentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
}

impl core::fmt::Debug for LwaCredentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LwaCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Tuning for the catalog enrichment pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentConfig {
    /// Staleness threshold in days.
    pub cache_days: i64,
    pub concurrency: usize,
    /// Pause after each successfully enriched item.
    pub request_delay: Duration,
    pub retry: RetryPolicy,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            cache_days: 100,
            concurrency: 5,
            request_delay: Duration::from_millis(150),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub credentials: LwaCredentials,
    pub token_url: String,
    pub database_url: String,
    /// Base URL of the selling-partner API (scheme + host).
    pub sp_api_endpoint: String,
    pub marketplace_id: String,
    pub report_type: String,
    pub report_poll_interval: Duration,
    pub http_timeout: Duration,
    pub write_batch_size: usize,
    pub enrichment: EnrichmentConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            credentials: LwaCredentials::default(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            sp_api_endpoint: DEFAULT_SP_API_ENDPOINT.to_string(),
            marketplace_id: DEFAULT_MARKETPLACE_ID.to_string(),
            report_type: DEFAULT_REPORT_TYPE.to_string(),
            report_poll_interval: Duration::from_secs(30),
            http_timeout: Duration::from_secs(30),
            write_batch_size: 1000,
            enrichment: EnrichmentConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or blank keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();

        cfg.credentials = LwaCredentials {
            client_id: get("CLIENT_ID"),
            client_secret: get("CLIENT_SECRET"),
            refresh_token: get("REFRESH_TOKEN"),
        };
        if let Some(v) = get("LWA_TOKEN_URL") {
            cfg.token_url = v;
        }
        if let Some(v) = get("DATABASE_URL") {
            cfg.database_url = v;
        }
        if let Some(v) = get("SP_API_ENDPOINT") {
            cfg.sp_api_endpoint = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("MARKETPLACE_ID") {
            cfg.marketplace_id = v;
        }
        if let Some(v) = get("REPORT_TYPE") {
            cfg.report_type = v;
        }
        if let Some(secs) = parse_opt::<u64>("REPORT_POLL_SECS", get("REPORT_POLL_SECS"))? {
            cfg.report_poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_opt::<u64>("HTTP_TIMEOUT_SECS", get("HTTP_TIMEOUT_SECS"))? {
            cfg.http_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = parse_positive("WRITE_BATCH_SIZE", get("WRITE_BATCH_SIZE"))? {
            cfg.write_batch_size = n;
        }
        if let Some(days) = parse_opt::<i64>("ENRICH_CACHE_DAYS", get("ENRICH_CACHE_DAYS"))? {
            if !(0..=MAX_CACHE_DAYS).contains(&days) {
                return Err(ConfigError::Invalid {
                    key: "ENRICH_CACHE_DAYS",
                    value: days.to_string(),
                    reason: format!("must be between 0 and {MAX_CACHE_DAYS}"),
                });
            }
            cfg.enrichment.cache_days = days;
        }
        if let Some(n) = parse_positive("ENRICH_CONCURRENCY", get("ENRICH_CONCURRENCY"))? {
            cfg.enrichment.concurrency = n;
        }
        if let Some(ms) = parse_opt::<u64>("ENRICH_REQUEST_DELAY_MS", get("ENRICH_REQUEST_DELAY_MS"))? {
            cfg.enrichment.request_delay = Duration::from_millis(ms);
        }
        if let Some(n) = parse_positive("ENRICH_MAX_RETRIES", get("ENRICH_MAX_RETRIES"))? {
            cfg.enrichment.retry.max_attempts =
                u32::try_from(n).map_err(|e| ConfigError::Invalid {
                    key: "ENRICH_MAX_RETRIES",
                    value: n.to_string(),
                    reason: e.to_string(),
                })?;
        }

        Ok(cfg)
    }
}

fn parse_opt<T>(key: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    raw.map(|value| {
        value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        })
    })
    .transpose()
}

fn parse_positive(key: &'static str, raw: Option<String>) -> Result<Option<usize>, ConfigError> {
    match parse_opt::<usize>(key, raw)? {
        Some(0) => Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let cfg = SyncConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, SyncConfig::default());
        assert_eq!(cfg.enrichment.cache_days, 100);
        assert_eq!(cfg.enrichment.concurrency, 5);
        assert_eq!(cfg.enrichment.request_delay, Duration::from_millis(150));
        assert_eq!(cfg.enrichment.retry.max_attempts, 3);
        assert_eq!(cfg.write_batch_size, 1000);
        assert_eq!(cfg.report_poll_interval, Duration::from_secs(30));
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = SyncConfig::from_lookup(lookup(&[
            ("CLIENT_ID", "id"),
            ("MARKETPLACE_ID", "A1F83G8C2ARO7P"),
            ("SP_API_ENDPOINT", "http://localhost:9000/"),
            ("ENRICH_CONCURRENCY", "8"),
            ("ENRICH_CACHE_DAYS", "30"),
            ("WRITE_BATCH_SIZE", "250"),
        ]))
        .unwrap();

        assert_eq!(cfg.credentials.client_id.as_deref(), Some("id"));
        assert!(cfg.credentials.refresh_token.is_none());
        assert_eq!(cfg.marketplace_id, "A1F83G8C2ARO7P");
        assert_eq!(cfg.sp_api_endpoint, "http://localhost:9000");
        assert_eq!(cfg.enrichment.concurrency, 8);
        assert_eq!(cfg.enrichment.cache_days, 30);
        assert_eq!(cfg.write_batch_size, 250);
    }

    #[test]
    fn blank_values_keep_defaults() {
        let cfg = SyncConfig::from_lookup(lookup(&[("CLIENT_SECRET", "  "), ("MARKETPLACE_ID", "")])).unwrap();
        assert!(cfg.credentials.client_secret.is_none());
        assert_eq!(cfg.marketplace_id, DEFAULT_MARKETPLACE_ID);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = SyncConfig::from_lookup(lookup(&[("ENRICH_CONCURRENCY", "five")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "ENRICH_CONCURRENCY", .. }));

        let err = SyncConfig::from_lookup(lookup(&[("WRITE_BATCH_SIZE", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "WRITE_BATCH_SIZE", .. }));
    }

    #[test]
    fn cache_days_out_of_range_are_rejected() {
        for raw in ["-1", "1000000000"] {
            let err = SyncConfig::from_lookup(lookup(&[("ENRICH_CACHE_DAYS", raw)])).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { key: "ENRICH_CACHE_DAYS", .. }));
        }
        let cfg = SyncConfig::from_lookup(lookup(&[("ENRICH_CACHE_DAYS", "0")])).unwrap();
        assert_eq!(cfg.enrichment.cache_days, 0);
    }

    #[test]
    fn max_retries_must_fit_u32() {
        let err = SyncConfig::from_lookup(lookup(&[("ENRICH_MAX_RETRIES", "4294967296")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "ENRICH_MAX_RETRIES", .. }));

        let cfg = SyncConfig::from_lookup(lookup(&[("ENRICH_MAX_RETRIES", "5")])).unwrap();
        assert_eq!(cfg.enrichment.retry.max_attempts, 5);
    }

    #[test]
    fn debug_output_hides_secrets() {
        let creds = LwaCredentials {
            client_id: Some("id".to_string()),
            client_secret: Some("hunter2".to_string()),
            refresh_token: Some("Atzr|secret".to_string()),
        };
        let out = format!("{creds:?}");
        assert!(!out.contains("hunter2"));
        assert!(!out.contains("Atzr"));
    }
}
