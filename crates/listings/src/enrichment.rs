//! Enrichment sub-document and the re-enrichment selection rule.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::listing::ListingRecord;

/// Catalog identifiers resolved for a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifiers {
    pub asin: String,
    pub isbn_10: String,
    pub isbn_13: String,
}

/// Normalized catalog metadata for one listing.
///
/// Every string field defaults to empty when the catalog payload lacks it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogMetadata {
    pub title_clean: String,
    pub author_or_brand: String,
    pub category_clean: String,
    pub image_url: String,
    pub publication_date: String,
    pub language: String,
    pub page_count: Option<i64>,
    pub identifiers: Identifiers,
    pub summary: String,
}

/// Enrichment state embedded in a listing.
///
/// `enriched == true` implies `enriched_error.is_none()`, and
/// `enriched == false` implies an error reason. `enriched_at` is the time of
/// the last attempt, successful or not. `metadata` survives failed attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub metadata: Option<CatalogMetadata>,
    pub enriched: bool,
    pub enriched_error: Option<String>,
    pub enriched_at: DateTime<Utc>,
}

impl EnrichmentRecord {
    pub fn image_url(&self) -> Option<&str> {
        self.metadata.as_ref().map(|m| m.image_url.as_str())
    }
}

/// Enrichment write command (enrichment fields only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrichmentWrite {
    Succeeded {
        metadata: CatalogMetadata,
        at: DateTime<Utc>,
    },
    /// Error marker: flags the listing for retry on a later run.
    Failed { reason: String, at: DateTime<Utc> },
}

impl EnrichmentWrite {
    pub fn succeeded(metadata: CatalogMetadata, at: DateTime<Utc>) -> Self {
        Self::Succeeded { metadata, at }
    }

    pub fn failed(reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::Failed {
            reason: reason.into(),
            at,
        }
    }

    /// Fold this write into the current enrichment state.
    pub fn apply(self, current: Option<EnrichmentRecord>) -> EnrichmentRecord {
        match self {
            EnrichmentWrite::Succeeded { metadata, at } => EnrichmentRecord {
                metadata: Some(metadata),
                enriched: true,
                enriched_error: None,
                enriched_at: at,
            },
            EnrichmentWrite::Failed { reason, at } => EnrichmentRecord {
                metadata: current.and_then(|c| c.metadata),
                enriched: false,
                enriched_error: Some(reason),
                enriched_at: at,
            },
        }
    }
}

/// Selection criteria for the re-enrichment work list.
///
/// A listing qualifies if it was never attempted, if its last attempt is
/// older than `stale_before`, or if it has no (or an empty) main image.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SelectionQuery {
    pub stale_before: DateTime<Utc>,
}

impl SelectionQuery {
    /// Negative thresholds count as zero; one reaching past the earliest
    /// representable instant selects only never-attempted or imageless items.
    pub fn new(now: DateTime<Utc>, threshold: Duration) -> Self {
        let threshold = threshold.max(Duration::zero());
        Self {
            stale_before: now
                .checked_sub_signed(threshold)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }

    pub fn with_threshold_days(now: DateTime<Utc>, days: i64) -> Self {
        Self::new(now, Duration::try_days(days).unwrap_or(Duration::MAX))
    }

    pub fn matches(&self, listing: &ListingRecord) -> bool {
        let Some(enrichment) = &listing.enrichment else {
            return true;
        };
        if enrichment.enriched_at < self.stale_before {
            return true;
        }
        match enrichment.image_url() {
            None => true,
            Some(url) => url.is_empty(),
        }
    }
}

/// Whether `listing` is due for (re-)enrichment at `now`.
pub fn needs_enrichment(listing: &ListingRecord, now: DateTime<Utc>, threshold: Duration) -> bool {
    SelectionQuery::new(now, threshold).matches(listing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::CoreListingFields;
    use catalogsync_core::ListingId;
    use chrono::TimeZone;

    fn listing() -> ListingRecord {
        ListingRecord::create(
            ListingId::new(),
            CoreListingFields {
                sku: "SKU-1".to_string(),
                title: "A Book".to_string(),
                asin: Some("0000000001".to_string()),
                price: 10.0,
                quantity: 1,
                open_date: None,
                fulfillment_channel: "DEFAULT".to_string(),
                product_id: None,
                product_id_type: None,
            },
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn with_image(url: &str, at: DateTime<Utc>) -> ListingRecord {
        let mut l = listing();
        let meta = CatalogMetadata {
            image_url: url.to_string(),
            ..CatalogMetadata::default()
        };
        l.enrichment = Some(EnrichmentWrite::succeeded(meta, at).apply(None));
        l
    }

    #[test]
    fn never_enriched_is_selected() {
        assert!(needs_enrichment(&listing(), now(), Duration::days(100)));
    }

    #[test]
    fn stale_attempt_is_selected() {
        let l = with_image("https://img/x.jpg", now() - Duration::days(150));
        assert!(needs_enrichment(&l, now(), Duration::days(100)));
    }

    #[test]
    fn fresh_enrichment_with_image_is_skipped() {
        let l = with_image("https://img/x.jpg", now() - Duration::days(1));
        assert!(!needs_enrichment(&l, now(), Duration::days(100)));
    }

    #[test]
    fn empty_image_is_selected_even_when_fresh() {
        let l = with_image("", now() - Duration::days(1));
        assert!(needs_enrichment(&l, now(), Duration::days(100)));
    }

    #[test]
    fn fresh_failure_without_metadata_is_selected() {
        let mut l = listing();
        l.enrichment = Some(EnrichmentWrite::failed("Missing identifier", now()).apply(None));
        assert!(SelectionQuery::with_threshold_days(now(), 100).matches(&l));
    }

    #[test]
    fn huge_threshold_does_not_overflow() {
        let query = SelectionQuery::with_threshold_days(now(), 1_000_000_000);
        assert_eq!(query.stale_before, DateTime::<Utc>::MIN_UTC);
        let l = with_image("https://img/x.jpg", now() - Duration::days(10_000));
        assert!(!query.matches(&l));
    }

    #[test]
    fn negative_threshold_is_clamped_to_now() {
        let query = SelectionQuery::with_threshold_days(now(), -5);
        assert_eq!(query.stale_before, now());
        let l = with_image("https://img/x.jpg", now());
        assert!(!query.matches(&l));
    }

    #[test]
    fn failure_keeps_previous_metadata_and_sets_reason() {
        let ok = EnrichmentWrite::succeeded(
            CatalogMetadata {
                title_clean: "Kept".to_string(),
                ..CatalogMetadata::default()
            },
            now() - Duration::days(3),
        )
        .apply(None);

        let failed = EnrichmentWrite::failed("Invalid or not found", now()).apply(Some(ok));
        assert!(!failed.enriched);
        assert_eq!(failed.enriched_error.as_deref(), Some("Invalid or not found"));
        assert_eq!(failed.enriched_at, now());
        assert_eq!(failed.metadata.unwrap().title_clean, "Kept");
    }

    #[test]
    fn success_clears_previous_error() {
        let failed = EnrichmentWrite::failed("boom", now() - Duration::days(2)).apply(None);
        let ok = EnrichmentWrite::succeeded(CatalogMetadata::default(), now()).apply(Some(failed));
        assert!(ok.enriched);
        assert!(ok.enriched_error.is_none());
    }
}
