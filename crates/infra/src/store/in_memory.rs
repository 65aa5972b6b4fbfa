use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use catalogsync_core::ListingId;
use catalogsync_listings::{EnrichmentWrite, ListingRecord, ListingWrite, SelectionQuery};

use super::{BatchOutcome, ListingStore, StoreError};

#[derive(Debug, Default)]
struct Inner {
    by_id: HashMap<ListingId, ListingRecord>,
    by_sku: HashMap<String, ListingId>,
}

/// In-memory listing store.
///
/// Intended for tests/dev. A batch is validated in full before any of it is
/// applied, so a rejected batch leaves no partial writes.
#[derive(Debug, Default)]
pub struct InMemoryListingStore {
    inner: RwLock<Inner>,
}

fn poisoned() -> StoreError {
    StoreError::Backend("in-memory store lock poisoned".to_string())
}

impl InMemoryListingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a listing as-is (tests and fixtures).
    pub fn insert(&self, record: ListingRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        if let Some(old) = inner.by_sku.insert(record.sku.clone(), record.id) {
            inner.by_id.remove(&old);
        }
        inner.by_id.insert(record.id, record);
        Ok(())
    }

    /// All listings, ordered by SKU.
    pub fn all(&self) -> Result<Vec<ListingRecord>, StoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        let mut out: Vec<_> = inner.by_id.values().cloned().collect();
        out.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(out)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.by_id.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

#[async_trait::async_trait]
impl ListingStore for InMemoryListingStore {
    async fn stored_skus(&self) -> Result<HashSet<String>, StoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.by_sku.keys().cloned().collect())
    }

    async fn apply_batch(&self, writes: &[ListingWrite]) -> Result<BatchOutcome, StoreError> {
        for write in writes {
            if let ListingWrite::Upsert(fields) = write {
                fields
                    .validate()
                    .map_err(|e| StoreError::Rejected(e.to_string()))?;
            }
        }

        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let inner = &mut *inner;
        let mut outcome = BatchOutcome::default();

        for write in writes {
            match write {
                ListingWrite::Upsert(fields) => match inner.by_sku.get(&fields.sku) {
                    Some(id) => {
                        let record = inner
                            .by_id
                            .get_mut(id)
                            .ok_or_else(|| StoreError::NotFound(*id))?;
                        outcome.matched += 1;
                        if record.apply_upsert(fields) {
                            outcome.modified += 1;
                        }
                    }
                    None => {
                        let record = ListingRecord::create(ListingId::new(), fields.clone());
                        inner.by_sku.insert(record.sku.clone(), record.id);
                        inner.by_id.insert(record.id, record);
                        outcome.upserted += 1;
                    }
                },
                ListingWrite::MarkSold { sku, sold_at } => {
                    let Some(id) = inner.by_sku.get(sku) else {
                        continue;
                    };
                    let Some(record) = inner.by_id.get_mut(id) else {
                        continue;
                    };
                    if record.mark_sold(*sold_at) {
                        outcome.matched += 1;
                        outcome.modified += 1;
                    }
                }
            }
        }

        Ok(outcome)
    }

    async fn find_enrichment_candidates(
        &self,
        query: &SelectionQuery,
    ) -> Result<Vec<ListingRecord>, StoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        let mut out: Vec<_> = inner
            .by_id
            .values()
            .filter(|l| query.matches(l))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(out)
    }

    async fn write_enrichment(&self, id: ListingId, write: EnrichmentWrite) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let record = inner.by_id.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.enrichment = Some(write.apply(record.enrichment.take()));
        Ok(())
    }

    async fn get_by_sku(&self, sku: &str) -> Result<Option<ListingRecord>, StoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner
            .by_sku
            .get(sku)
            .and_then(|id| inner.by_id.get(id))
            .cloned())
    }
}
