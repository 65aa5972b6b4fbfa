//! Infrastructure layer: marketplace clients, snapshot reconciliation,
//! catalog enrichment and listing storage.

pub mod config;
pub mod credentials;
pub mod enrichment;
pub mod error;
pub mod pipeline;
pub mod reconcile;
pub mod reports;
pub mod retry;
pub mod snapshot;
pub mod sp_api;
pub mod store;

pub use config::{ConfigError, EnrichmentConfig, LwaCredentials, SyncConfig};
pub use credentials::{
    AccessToken, AuthError, CredentialProvider, LwaCredentialProvider, StaticCredentialProvider,
};
pub use enrichment::{EnrichmentEngine, EnrichmentSummary, ItemOutcome};
pub use error::{SyncError, WritePhase};
pub use pipeline::{InspectReport, InventorySyncReport, inspect_item, run_enrichment, run_inventory_sync};
pub use reconcile::{ReconcilePlan, ReconcileReport, Reconciler};
pub use reports::ReportError;
pub use retry::RetryPolicy;
pub use snapshot::{NormalizedSnapshot, SnapshotStats, normalize_snapshot};
pub use store::{BatchOutcome, InMemoryListingStore, ListingStore, PostgresListingStore, StoreError};
