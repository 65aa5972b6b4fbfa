//! Snapshot-to-store reconciliation.
//!
//! Every snapshot row becomes an upsert (status forced to `active`); every
//! stored SKU missing from the snapshot is marked sold. Writes go out in
//! fixed-size batches; a failed batch aborts the run and leaves earlier
//! batches committed.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use catalogsync_listings::{CoreListingFields, ListingWrite};

use crate::error::{SyncError, WritePhase};
use crate::store::{BatchOutcome, ListingStore};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Writes derived from one snapshot against one stored SKU set.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilePlan {
    pub upserts: Vec<ListingWrite>,
    pub mark_sold: Vec<ListingWrite>,
}

impl ReconcilePlan {
    pub fn stale_skus(&self) -> impl Iterator<Item = &str> {
        self.mark_sold.iter().map(ListingWrite::sku)
    }
}

/// Diff snapshot rows against the stored SKUs.
///
/// Stale SKUs are emitted in sorted order so batches are deterministic.
pub fn plan(
    rows: &[CoreListingFields],
    stored_skus: &HashSet<String>,
    now: DateTime<Utc>,
) -> ReconcilePlan {
    let active: HashSet<&str> = rows.iter().map(|r| r.sku.as_str()).collect();

    let upserts = rows.iter().cloned().map(ListingWrite::Upsert).collect();

    let mut stale: Vec<&String> = stored_skus
        .iter()
        .filter(|sku| !active.contains(sku.as_str()))
        .collect();
    stale.sort();

    let mark_sold = stale
        .into_iter()
        .map(|sku| ListingWrite::MarkSold {
            sku: sku.clone(),
            sold_at: now,
        })
        .collect();

    ReconcilePlan { upserts, mark_sold }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub snapshot_rows: usize,
    pub stale_skus: usize,
    pub upserts: BatchOutcome,
    pub sold: BatchOutcome,
    pub batches: usize,
}

pub struct Reconciler<S> {
    store: S,
    batch_size: usize,
}

impl<S: ListingStore> Reconciler<S> {
    pub fn new(store: S, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn reconcile(&self, rows: &[CoreListingFields]) -> Result<ReconcileReport, SyncError> {
        self.reconcile_at(rows, Utc::now()).await
    }

    /// Reconcile with an explicit "sold" timestamp.
    pub async fn reconcile_at(
        &self,
        rows: &[CoreListingFields],
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport, SyncError> {
        let stored = self.store.stored_skus().await?;
        let plan = plan(rows, &stored, now);

        info!(
            snapshot_rows = rows.len(),
            stored = stored.len(),
            stale = plan.mark_sold.len(),
            "reconciliation planned"
        );

        let mut report = ReconcileReport {
            snapshot_rows: rows.len(),
            stale_skus: plan.mark_sold.len(),
            ..ReconcileReport::default()
        };

        report.upserts = self
            .write_phase(WritePhase::Upsert, &plan.upserts, &mut report.batches)
            .await?;
        info!(
            matched = report.upserts.matched,
            upserted = report.upserts.upserted,
            modified = report.upserts.modified,
            "active listings upserted"
        );

        report.sold = self
            .write_phase(WritePhase::MarkSold, &plan.mark_sold, &mut report.batches)
            .await?;
        info!(modified = report.sold.modified, "stale listings marked sold");

        Ok(report)
    }

    async fn write_phase(
        &self,
        phase: WritePhase,
        writes: &[ListingWrite],
        committed: &mut usize,
    ) -> Result<BatchOutcome, SyncError> {
        let mut total = BatchOutcome::default();

        for (batch_index, batch) in writes.chunks(self.batch_size).enumerate() {
            match self.store.apply_batch(batch).await {
                Ok(outcome) => {
                    total += outcome;
                    *committed += 1;
                }
                Err(source) => {
                    error!(
                        %phase,
                        batch_index,
                        committed_batches = *committed,
                        error = %source,
                        "batch write failed"
                    );
                    return Err(SyncError::BatchWrite {
                        phase,
                        batch_index,
                        committed_batches: *committed,
                        source,
                    });
                }
            }
        }

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryListingStore, StoreError};
    use catalogsync_core::ListingId;
    use catalogsync_listings::{
        CatalogMetadata, EnrichmentWrite, ListingRecord, ListingStatus, SelectionQuery,
    };
    use chrono::TimeZone;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn row(sku: &str, price: f64) -> CoreListingFields {
        CoreListingFields {
            sku: sku.to_string(),
            title: format!("Title {sku}"),
            asin: Some(format!("ASIN{sku}")),
            price,
            quantity: 1,
            open_date: None,
            fulfillment_channel: "DEFAULT".to_string(),
            product_id: None,
            product_id_type: None,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    async fn seeded(skus: &[&str]) -> Arc<InMemoryListingStore> {
        let store = Arc::new(InMemoryListingStore::new());
        let writes: Vec<_> = skus.iter().map(|s| ListingWrite::Upsert(row(s, 1.0))).collect();
        store.apply_batch(&writes).await.unwrap();
        store
    }

    #[tokio::test]
    async fn snapshot_ab_against_stored_ac() {
        let store = seeded(&["A", "C"]).await;
        let reconciler = Reconciler::new(store.clone(), DEFAULT_BATCH_SIZE);

        let report = reconciler
            .reconcile_at(&[row("A", 2.0), row("B", 3.0)], now())
            .await
            .unwrap();

        assert_eq!(report.snapshot_rows, 2);
        assert_eq!(report.stale_skus, 1);
        assert_eq!(report.upserts.upserted, 1);
        assert_eq!(report.upserts.modified, 1);
        assert_eq!(report.sold.modified, 1);

        let a = store.get_by_sku("A").await.unwrap().unwrap();
        let b = store.get_by_sku("B").await.unwrap().unwrap();
        let c = store.get_by_sku("C").await.unwrap().unwrap();
        assert_eq!(a.status, ListingStatus::Active);
        assert_eq!(a.price, 2.0);
        assert_eq!(b.status, ListingStatus::Active);
        assert_eq!(c.status, ListingStatus::Sold);
        assert_eq!(c.sold_date, Some(now()));
        assert_eq!(c.title, "Title C");
    }

    #[tokio::test]
    async fn second_run_on_same_snapshot_changes_nothing() {
        let store = seeded(&["A", "C"]).await;
        let reconciler = Reconciler::new(store.clone(), 1);
        let rows = [row("A", 2.0), row("B", 3.0)];

        reconciler.reconcile_at(&rows, now()).await.unwrap();
        let first = store.all().unwrap();

        let later = now() + chrono::Duration::days(1);
        let report = reconciler.reconcile_at(&rows, later).await.unwrap();

        assert_eq!(report.upserts.modified, 0);
        assert_eq!(report.upserts.upserted, 0);
        assert_eq!(report.sold.modified, 0);
        assert_eq!(store.all().unwrap(), first);
    }

    #[tokio::test]
    async fn reappearing_sku_is_reactivated() {
        let store = seeded(&["A"]).await;
        let reconciler = Reconciler::new(store.clone(), DEFAULT_BATCH_SIZE);

        reconciler.reconcile_at(&[], now()).await.unwrap();
        assert_eq!(
            store.get_by_sku("A").await.unwrap().unwrap().status,
            ListingStatus::Sold
        );

        reconciler.reconcile_at(&[row("A", 1.0)], now()).await.unwrap();
        let a = store.get_by_sku("A").await.unwrap().unwrap();
        assert_eq!(a.status, ListingStatus::Active);
        assert!(a.sold_date.is_none());
    }

    #[tokio::test]
    async fn reconciliation_keeps_enrichment() {
        let store = seeded(&["A"]).await;
        let a = store.get_by_sku("A").await.unwrap().unwrap();
        let meta = CatalogMetadata {
            image_url: "https://img/a.jpg".to_string(),
            ..CatalogMetadata::default()
        };
        store
            .write_enrichment(a.id, EnrichmentWrite::succeeded(meta, now()))
            .await
            .unwrap();
        let before = store.get_by_sku("A").await.unwrap().unwrap().enrichment;

        Reconciler::new(store.clone(), DEFAULT_BATCH_SIZE)
            .reconcile_at(&[row("A", 9.0)], now())
            .await
            .unwrap();

        let after = store.get_by_sku("A").await.unwrap().unwrap();
        assert_eq!(after.price, 9.0);
        assert_eq!(after.enrichment, before);
    }

    /// Fails every `apply_batch` call from the `fail_from`-th one (0-based).
    struct FailingStore {
        inner: InMemoryListingStore,
        calls: AtomicUsize,
        fail_from: usize,
    }

    #[async_trait::async_trait]
    impl ListingStore for FailingStore {
        async fn stored_skus(&self) -> Result<HashSet<String>, StoreError> {
            self.inner.stored_skus().await
        }

        async fn apply_batch(&self, writes: &[ListingWrite]) -> Result<BatchOutcome, StoreError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.fail_from {
                return Err(StoreError::Backend("connection reset".to_string()));
            }
            self.inner.apply_batch(writes).await
        }

        async fn find_enrichment_candidates(
            &self,
            query: &SelectionQuery,
        ) -> Result<Vec<ListingRecord>, StoreError> {
            self.inner.find_enrichment_candidates(query).await
        }

        async fn write_enrichment(
            &self,
            id: ListingId,
            write: EnrichmentWrite,
        ) -> Result<(), StoreError> {
            self.inner.write_enrichment(id, write).await
        }

        async fn get_by_sku(&self, sku: &str) -> Result<Option<ListingRecord>, StoreError> {
            self.inner.get_by_sku(sku).await
        }
    }

    #[tokio::test]
    async fn failed_batch_aborts_and_keeps_committed_batches() {
        let store = FailingStore {
            inner: InMemoryListingStore::new(),
            calls: AtomicUsize::new(0),
            fail_from: 1,
        };
        let reconciler = Reconciler::new(store, 2);
        let rows: Vec<_> = ["A", "B", "C", "D", "E"].iter().map(|s| row(s, 1.0)).collect();

        let err = reconciler.reconcile_at(&rows, now()).await.unwrap_err();
        match err {
            SyncError::BatchWrite {
                phase,
                batch_index,
                committed_batches,
                ..
            } => {
                assert_eq!(phase, WritePhase::Upsert);
                assert_eq!(batch_index, 1);
                assert_eq!(committed_batches, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert_eq!(reconciler.store().inner.len().unwrap(), 2);
        assert!(reconciler.store().inner.get_by_sku("A").await.unwrap().is_some());
        assert!(reconciler.store().inner.get_by_sku("C").await.unwrap().is_none());
    }

    #[test]
    fn plan_batches_stale_skus_in_order() {
        let stored: HashSet<String> = ["Z", "A", "M", "K"].iter().map(|s| s.to_string()).collect();
        let plan = plan(&[row("K", 1.0)], &stored, now());

        assert_eq!(plan.upserts.len(), 1);
        assert_eq!(plan.stale_skus().collect::<Vec<_>>(), vec!["A", "M", "Z"]);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 64,
                ..ProptestConfig::default()
            })]

            #[test]
            fn stale_set_is_stored_minus_snapshot(
                snapshot in prop::collection::hash_set("[A-H]", 0..8),
                stored in prop::collection::hash_set("[A-H]", 0..8),
            ) {
                let rows: Vec<_> = snapshot.iter().map(|s| row(s, 1.0)).collect();
                let plan = plan(&rows, &stored, now());

                let stale: HashSet<String> = plan.stale_skus().map(str::to_string).collect();
                let expected: HashSet<String> = stored.difference(&snapshot).cloned().collect();
                prop_assert_eq!(stale, expected);
                prop_assert_eq!(plan.upserts.len(), snapshot.len());
            }
        }
    }
}
