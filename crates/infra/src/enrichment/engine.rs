//! Bounded-concurrency enrichment runs over the selected listings.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};

use catalogsync_core::ListingId;
use catalogsync_listings::{EnrichmentWrite, ListingRecord, SelectionQuery};

use super::catalog::{CatalogClient, FetchOutcome, fetch_with_retry};
use super::extract::{CatalogNormalizer, lookup_key};
use crate::config::EnrichmentConfig;
use crate::store::{ListingStore, StoreError};

pub const MISSING_IDENTIFIER: &str = "Missing identifier";
pub const NOT_FOUND: &str = "Invalid or not found";

/// What happened to one listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Enriched { sku: String, asin: String },
    MissingIdentifier { sku: String },
    NotFound { sku: String, asin: String, status: u16 },
    FetchFailed { sku: String, asin: String, attempts: u32, error: String },
    WriteFailed { sku: String, asin: String, error: String },
    /// The item task panicked.
    Crashed { sku: String, reason: String },
}

impl ItemOutcome {
    pub fn sku(&self) -> &str {
        match self {
            ItemOutcome::Enriched { sku, .. }
            | ItemOutcome::MissingIdentifier { sku }
            | ItemOutcome::NotFound { sku, .. }
            | ItemOutcome::FetchFailed { sku, .. }
            | ItemOutcome::WriteFailed { sku, .. }
            | ItemOutcome::Crashed { sku, .. } => sku,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Enriched { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentSummary {
    pub total: usize,
    pub enriched: usize,
    pub missing_identifier: usize,
    pub not_found: usize,
    pub fetch_failed: usize,
    pub write_failed: usize,
    pub crashed: usize,
}

impl EnrichmentSummary {
    pub fn record(&mut self, outcome: &ItemOutcome) {
        self.total += 1;
        match outcome {
            ItemOutcome::Enriched { .. } => self.enriched += 1,
            ItemOutcome::MissingIdentifier { .. } => self.missing_identifier += 1,
            ItemOutcome::NotFound { .. } => self.not_found += 1,
            ItemOutcome::FetchFailed { .. } => self.fetch_failed += 1,
            ItemOutcome::WriteFailed { .. } => self.write_failed += 1,
            ItemOutcome::Crashed { .. } => self.crashed += 1,
        }
    }

    pub fn failed(&self) -> usize {
        self.total - self.enriched
    }
}

/// Bounded-concurrency catalog enrichment over a store.
///
/// Each listing is processed in its own task; a panic in one item is
/// reported as [`ItemOutcome::Crashed`] and the pool keeps going.
pub struct EnrichmentEngine<S, C> {
    store: Arc<S>,
    catalog: Arc<C>,
    normalizer: Arc<CatalogNormalizer>,
    config: EnrichmentConfig,
}

impl<S, C> EnrichmentEngine<S, C>
where
    S: ListingStore + 'static,
    C: CatalogClient + 'static,
{
    pub fn new(
        store: Arc<S>,
        catalog: Arc<C>,
        marketplace_id: impl Into<String>,
        config: EnrichmentConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            normalizer: Arc::new(CatalogNormalizer::new(marketplace_id)),
            config,
        }
    }

    /// Work list for a run at `now`.
    pub async fn select(&self, now: DateTime<Utc>) -> Result<Vec<ListingRecord>, StoreError> {
        let query = SelectionQuery::with_threshold_days(now, self.config.cache_days);
        self.store.find_enrichment_candidates(&query).await
    }

    pub async fn run(&self, now: DateTime<Utc>) -> Result<EnrichmentSummary, StoreError> {
        let work = self.select(now).await?;
        info!(candidates = work.len(), cache_days = self.config.cache_days, "enrichment selected");
        Ok(self.process_all(work).await)
    }

    /// Outcomes in completion order.
    pub fn outcomes(&self, work: Vec<ListingRecord>) -> impl Stream<Item = ItemOutcome> + '_ {
        stream::iter(work)
            .map(move |listing| {
                let task = ItemTask {
                    store: Arc::clone(&self.store),
                    catalog: Arc::clone(&self.catalog),
                    normalizer: Arc::clone(&self.normalizer),
                    config: self.config.clone(),
                };
                let sku = listing.sku.clone();
                async move {
                    match tokio::spawn(task.process(listing)).await {
                        Ok(outcome) => outcome,
                        Err(join_err) => {
                            error!(sku = %sku, error = %join_err, "enrichment task crashed");
                            ItemOutcome::Crashed {
                                sku,
                                reason: join_err.to_string(),
                            }
                        }
                    }
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
    }

    pub async fn process_all(&self, work: Vec<ListingRecord>) -> EnrichmentSummary {
        let total = work.len();
        self.outcomes(work)
            .enumerate()
            .fold(EnrichmentSummary::default(), |mut summary, (i, outcome)| async move {
                log_progress(i + 1, total, &outcome);
                summary.record(&outcome);
                summary
            })
            .await
    }
}

fn log_progress(done: usize, total: usize, outcome: &ItemOutcome) {
    let progress = format!("{done}/{total}");
    match outcome {
        ItemOutcome::Enriched { sku, asin } => {
            info!(%progress, sku = %sku, asin = %asin, "enriched");
        }
        ItemOutcome::MissingIdentifier { sku } => {
            warn!(%progress, sku = %sku, "skipped: no catalog identifier");
        }
        ItemOutcome::NotFound { sku, asin, status } => {
            warn!(%progress, sku = %sku, asin = %asin, status, "catalog item invalid or not found");
        }
        ItemOutcome::FetchFailed { sku, asin, attempts, error } => {
            warn!(%progress, sku = %sku, asin = %asin, attempts, error = %error, "catalog fetch failed");
        }
        ItemOutcome::WriteFailed { sku, asin, error } => {
            error!(%progress, sku = %sku, asin = %asin, error = %error, "enrichment write failed");
        }
        ItemOutcome::Crashed { sku, reason } => {
            error!(%progress, sku = %sku, reason = %reason, "enrichment crashed");
        }
    }
}

/// Owned per-item state moved into a spawned task.
struct ItemTask<S, C> {
    store: Arc<S>,
    catalog: Arc<C>,
    normalizer: Arc<CatalogNormalizer>,
    config: EnrichmentConfig,
}

impl<S, C> ItemTask<S, C>
where
    S: ListingStore + 'static,
    C: CatalogClient + 'static,
{
    async fn process(self, listing: ListingRecord) -> ItemOutcome {
        let sku = listing.sku.clone();

        let Some(asin) = lookup_key(&listing) else {
            self.mark_failed(listing.id, &sku, MISSING_IDENTIFIER).await;
            return ItemOutcome::MissingIdentifier { sku };
        };

        let payload = match fetch_with_retry(&*self.catalog, &asin, &self.config.retry).await {
            FetchOutcome::Found(payload) => payload,
            FetchOutcome::NotFound { status } => {
                self.mark_failed(listing.id, &sku, NOT_FOUND).await;
                return ItemOutcome::NotFound { sku, asin, status };
            }
            FetchOutcome::Failed {
                attempts,
                last_error,
            } => {
                let reason = format!("Fetch failed after {attempts} attempts: {last_error}");
                self.mark_failed(listing.id, &sku, &reason).await;
                return ItemOutcome::FetchFailed {
                    sku,
                    asin,
                    attempts,
                    error: last_error.to_string(),
                };
            }
        };

        let metadata = self.normalizer.normalize(&payload, &listing, &asin);
        let write = EnrichmentWrite::succeeded(metadata, Utc::now());
        if let Err(e) = self.store.write_enrichment(listing.id, write).await {
            let reason = format!("update failed: {e}");
            self.mark_failed(listing.id, &sku, &reason).await;
            return ItemOutcome::WriteFailed {
                sku,
                asin,
                error: e.to_string(),
            };
        }

        if !self.config.request_delay.is_zero() {
            tokio::time::sleep(self.config.request_delay).await;
        }
        ItemOutcome::Enriched { sku, asin }
    }

    /// Record an error marker; a failure here is logged and otherwise ignored.
    async fn mark_failed(&self, id: ListingId, sku: &str, reason: &str) {
        let write = EnrichmentWrite::failed(reason, Utc::now());
        if let Err(e) = self.store.write_enrichment(id, write).await {
            error!(sku, reason, error = %e, "could not record enrichment failure");
        }
    }
}
