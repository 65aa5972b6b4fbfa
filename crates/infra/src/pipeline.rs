//! End-to-end passes: inventory sync, catalog enrichment, single-item inspect.
//!
//! Each pass obtains one access token up front and uses it for the whole
//! pass.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::config::SyncConfig;
use crate::credentials::CredentialProvider;
use crate::enrichment::{
    CatalogClient, CatalogNormalizer, EnrichmentEngine, EnrichmentSummary, SpApiCatalogClient,
    string_leaves,
};
use crate::error::SyncError;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::reports::{ReportFetcher, SpApiReportTransport};
use crate::snapshot::{SnapshotStats, normalize_snapshot};
use crate::sp_api::SpApiClient;
use crate::store::ListingStore;

/// What one inventory pass saw and wrote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventorySyncReport {
    pub snapshot: SnapshotStats,
    pub reconcile: ReconcileReport,
}

/// Raw catalog payload for one item plus what the normalizer makes of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InspectReport {
    pub payload: Value,
    pub leaves: Vec<(String, String)>,
    pub main_image: String,
}

async fn api_client<P>(config: &SyncConfig, credentials: &P) -> Result<SpApiClient, SyncError>
where
    P: CredentialProvider + ?Sized,
{
    let token = credentials.get_token().await?;
    SpApiClient::new(&config.sp_api_endpoint, &token.token, config.http_timeout)
        .map_err(|e| SyncError::HttpClient(e.to_string()))
}

/// Fetch the listings report and reconcile it into `store`.
pub async fn run_inventory_sync<P, S>(
    config: &SyncConfig,
    credentials: &P,
    store: S,
) -> Result<InventorySyncReport, SyncError>
where
    P: CredentialProvider + ?Sized,
    S: ListingStore,
{
    let api = api_client(config, credentials).await?;
    let fetcher = ReportFetcher::new(
        SpApiReportTransport::new(api),
        config.report_type.clone(),
        vec![config.marketplace_id.clone()],
        config.report_poll_interval,
    );

    let raw = fetcher.fetch_snapshot().await?;
    let snapshot = normalize_snapshot(&raw);
    let reconcile = Reconciler::new(store, config.write_batch_size)
        .reconcile(&snapshot.rows)
        .await?;

    info!(
        rows = snapshot.stats.kept,
        upserted = reconcile.upserts.upserted,
        modified = reconcile.upserts.modified,
        sold = reconcile.sold.modified,
        "inventory sync complete"
    );

    Ok(InventorySyncReport {
        snapshot: snapshot.stats,
        reconcile,
    })
}

/// Enrich every listing the selector picks.
pub async fn run_enrichment<P, S>(
    config: &SyncConfig,
    credentials: &P,
    store: Arc<S>,
) -> Result<EnrichmentSummary, SyncError>
where
    P: CredentialProvider + ?Sized,
    S: ListingStore + 'static,
{
    let api = api_client(config, credentials).await?;
    let catalog = Arc::new(SpApiCatalogClient::new(api, config.marketplace_id.clone()));
    let engine = EnrichmentEngine::new(
        store,
        catalog,
        config.marketplace_id.clone(),
        config.enrichment.clone(),
    );

    let summary = engine.run(Utc::now()).await?;
    info!(
        total = summary.total,
        enriched = summary.enriched,
        failed = summary.failed(),
        "enrichment complete"
    );
    Ok(summary)
}

/// Single images-only fetch for one ASIN, without retry.
pub async fn inspect_item<P>(
    config: &SyncConfig,
    credentials: &P,
    asin: &str,
) -> Result<InspectReport, SyncError>
where
    P: CredentialProvider + ?Sized,
{
    let api = api_client(config, credentials).await?;
    let catalog =
        SpApiCatalogClient::new(api, config.marketplace_id.clone()).with_included_data("images");

    let payload = catalog.get_item(asin).await?;
    let main_image = CatalogNormalizer::new(config.marketplace_id.clone()).main_image(&payload);
    let leaves = string_leaves(&payload);

    Ok(InspectReport {
        payload,
        leaves,
        main_image,
    })
}
