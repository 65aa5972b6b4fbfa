//! Listing persistence.
//!
//! Two write paths exist and never overlap: reconciliation sends
//! [`ListingWrite`]s that touch core fields only, enrichment sends
//! [`EnrichmentWrite`]s that touch the enrichment sub-document only.

mod in_memory;
mod postgres;

pub use in_memory::InMemoryListingStore;
pub use postgres::PostgresListingStore;

use std::collections::HashSet;
use std::ops::AddAssign;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use catalogsync_core::ListingId;
use catalogsync_listings::{EnrichmentWrite, ListingRecord, ListingWrite, SelectionQuery};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("write rejected: {0}")]
    Rejected(String),

    #[error("stored listing could not be decoded: {0}")]
    Decode(String),

    #[error("listing not found: {0}")]
    NotFound(ListingId),
}

/// Counts reported by one batch write.
///
/// `matched` counts writes that found an existing listing, `upserted` those
/// that created one, `modified` those that changed stored values.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub matched: u64,
    pub upserted: u64,
    pub modified: u64,
}

impl AddAssign for BatchOutcome {
    fn add_assign(&mut self, rhs: Self) {
        self.matched += rhs.matched;
        self.upserted += rhs.upserted;
        self.modified += rhs.modified;
    }
}

#[async_trait::async_trait]
pub trait ListingStore: Send + Sync {
    /// Every SKU currently stored, whatever its status.
    async fn stored_skus(&self) -> Result<HashSet<String>, StoreError>;

    /// Apply one batch of reconciliation writes atomically.
    async fn apply_batch(&self, writes: &[ListingWrite]) -> Result<BatchOutcome, StoreError>;

    async fn find_enrichment_candidates(
        &self,
        query: &SelectionQuery,
    ) -> Result<Vec<ListingRecord>, StoreError>;

    /// Field-scoped write of the enrichment sub-document.
    async fn write_enrichment(&self, id: ListingId, write: EnrichmentWrite) -> Result<(), StoreError>;

    async fn get_by_sku(&self, sku: &str) -> Result<Option<ListingRecord>, StoreError>;
}

#[async_trait::async_trait]
impl<S> ListingStore for Arc<S>
where
    S: ListingStore + ?Sized,
{
    async fn stored_skus(&self) -> Result<HashSet<String>, StoreError> {
        (**self).stored_skus().await
    }

    async fn apply_batch(&self, writes: &[ListingWrite]) -> Result<BatchOutcome, StoreError> {
        (**self).apply_batch(writes).await
    }

    async fn find_enrichment_candidates(
        &self,
        query: &SelectionQuery,
    ) -> Result<Vec<ListingRecord>, StoreError> {
        (**self).find_enrichment_candidates(query).await
    }

    async fn write_enrichment(&self, id: ListingId, write: EnrichmentWrite) -> Result<(), StoreError> {
        (**self).write_enrichment(id, write).await
    }

    async fn get_by_sku(&self, sku: &str) -> Result<Option<ListingRecord>, StoreError> {
        (**self).get_by_sku(sku).await
    }
}
