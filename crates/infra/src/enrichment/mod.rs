//! Per-listing catalog enrichment.

pub mod catalog;
pub mod engine;
pub mod extract;

pub use catalog::{
    CatalogClient, FetchError, FetchOutcome, SpApiCatalogClient, fetch_with_retry,
};
pub use engine::{EnrichmentEngine, EnrichmentSummary, ItemOutcome};
pub use extract::{CatalogNormalizer, lookup_key, string_leaves};
