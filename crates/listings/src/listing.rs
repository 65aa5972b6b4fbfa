use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use catalogsync_core::{DomainError, DomainResult, ListingId};

use crate::enrichment::EnrichmentRecord;

/// Marketplace status of a listing as last reconciled.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Active,
    Sold,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Active => "active",
            ListingStatus::Sold => "sold",
        }
    }
}

impl core::fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ListingStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ListingStatus::Active),
            "sold" => Ok(ListingStatus::Sold),
            other => Err(DomainError::validation(format!("unknown listing status: {other}"))),
        }
    }
}

/// Stored listing document: one per seller SKU.
///
/// Core fields are owned by reconciliation; `enrichment` is owned by the
/// enrichment engine. Neither writer touches the other's fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub id: ListingId,
    pub sku: String,
    pub title: String,
    pub asin: Option<String>,
    pub price: f64,
    pub quantity: i64,
    pub status: ListingStatus,
    pub open_date: Option<DateTime<Utc>>,
    pub sold_date: Option<DateTime<Utc>>,
    pub fulfillment_channel: String,
    pub product_id: Option<String>,
    pub product_id_type: Option<String>,
    pub enrichment: Option<EnrichmentRecord>,
}

/// Core listing fields as carried by one snapshot row.
///
/// This is the full payload of an upsert; anything not listed here is out of
/// reach of reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreListingFields {
    pub sku: String,
    pub title: String,
    pub asin: Option<String>,
    pub price: f64,
    pub quantity: i64,
    pub open_date: Option<DateTime<Utc>>,
    pub fulfillment_channel: String,
    pub product_id: Option<String>,
    pub product_id_type: Option<String>,
}

impl CoreListingFields {
    pub fn validate(&self) -> DomainResult<()> {
        if self.sku.trim().is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(DomainError::validation(format!(
                "price must be a non-negative number (sku={})",
                self.sku
            )));
        }
        if self.quantity < 0 {
            return Err(DomainError::validation(format!(
                "quantity cannot be negative (sku={})",
                self.sku
            )));
        }
        Ok(())
    }
}

/// Reconciliation write command (core fields only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ListingWrite {
    /// Create the SKU if absent, otherwise overwrite its core fields.
    /// Status is always forced to `active`.
    Upsert(CoreListingFields),
    /// Set status to `sold` and stamp `sold_date`. Matches only listings that
    /// are not already sold.
    MarkSold { sku: String, sold_at: DateTime<Utc> },
}

impl ListingWrite {
    pub fn sku(&self) -> &str {
        match self {
            ListingWrite::Upsert(fields) => &fields.sku,
            ListingWrite::MarkSold { sku, .. } => sku,
        }
    }
}

impl ListingRecord {
    /// Create a new active listing from a snapshot row.
    pub fn create(id: ListingId, fields: CoreListingFields) -> Self {
        Self {
            id,
            sku: fields.sku,
            title: fields.title,
            asin: fields.asin,
            price: fields.price,
            quantity: fields.quantity,
            status: ListingStatus::Active,
            open_date: fields.open_date,
            sold_date: None,
            fulfillment_channel: fields.fulfillment_channel,
            product_id: fields.product_id,
            product_id_type: fields.product_id_type,
            enrichment: None,
        }
    }

    /// Apply an upsert to an existing listing.
    ///
    /// Returns `true` if any core field changed. The SKU is immutable and the
    /// enrichment sub-document is never touched.
    pub fn apply_upsert(&mut self, fields: &CoreListingFields) -> bool {
        let before = (
            self.title.clone(),
            self.asin.clone(),
            self.price,
            self.quantity,
            self.status,
            self.open_date,
            self.sold_date,
            self.fulfillment_channel.clone(),
            self.product_id.clone(),
            self.product_id_type.clone(),
        );

        self.title = fields.title.clone();
        self.asin = fields.asin.clone();
        self.price = fields.price;
        self.quantity = fields.quantity;
        self.status = ListingStatus::Active;
        self.open_date = fields.open_date;
        // A reappearing SKU is live again; its old sale no longer applies.
        self.sold_date = None;
        self.fulfillment_channel = fields.fulfillment_channel.clone();
        self.product_id = fields.product_id.clone();
        self.product_id_type = fields.product_id_type.clone();

        let after = (
            self.title.clone(),
            self.asin.clone(),
            self.price,
            self.quantity,
            self.status,
            self.open_date,
            self.sold_date,
            self.fulfillment_channel.clone(),
            self.product_id.clone(),
            self.product_id_type.clone(),
        );
        before != after
    }

    /// Mark the listing sold. No-op (returns `false`) if already sold.
    pub fn mark_sold(&mut self, sold_at: DateTime<Utc>) -> bool {
        if self.status == ListingStatus::Sold {
            return false;
        }
        self.status = ListingStatus::Sold;
        self.sold_date = Some(sold_at);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::{CatalogMetadata, EnrichmentWrite};
    use chrono::TimeZone;

    fn fields(sku: &str, price: f64, quantity: i64) -> CoreListingFields {
        CoreListingFields {
            sku: sku.to_string(),
            title: format!("Title {sku}"),
            asin: Some("B000TEST01".to_string()),
            price,
            quantity,
            open_date: None,
            fulfillment_channel: "DEFAULT".to_string(),
            product_id: None,
            product_id_type: None,
        }
    }

    #[test]
    fn create_starts_active_without_enrichment() {
        let id = ListingId::new();
        let rec = ListingRecord::create(id, fields("A", 5.0, 1));
        assert_eq!(rec.id, id);
        assert_eq!(rec.status, ListingStatus::Active);
        assert!(rec.sold_date.is_none());
        assert!(rec.enrichment.is_none());
    }

    #[test]
    fn validate_rejects_bad_rows() {
        assert!(fields("A", 1.0, 1).validate().is_ok());
        assert!(fields("  ", 1.0, 1).validate().is_err());
        assert!(fields("A", -1.0, 1).validate().is_err());
        assert!(fields("A", f64::NAN, 1).validate().is_err());
        assert!(fields("A", 1.0, -2).validate().is_err());
    }

    #[test]
    fn upsert_reports_modification_only_on_change() {
        let mut rec = ListingRecord::create(ListingId::new(), fields("A", 5.0, 1));
        assert!(!rec.apply_upsert(&fields("A", 5.0, 1)));
        assert!(rec.apply_upsert(&fields("A", 6.0, 1)));
        assert_eq!(rec.price, 6.0);
    }

    #[test]
    fn upsert_reactivates_sold_listing() {
        let mut rec = ListingRecord::create(ListingId::new(), fields("A", 5.0, 1));
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(rec.mark_sold(at));
        assert_eq!(rec.sold_date, Some(at));

        assert!(rec.apply_upsert(&fields("A", 5.0, 1)));
        assert_eq!(rec.status, ListingStatus::Active);
        assert!(rec.sold_date.is_none());
    }

    #[test]
    fn mark_sold_is_idempotent() {
        let mut rec = ListingRecord::create(ListingId::new(), fields("A", 5.0, 1));
        let first = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        assert!(rec.mark_sold(first));
        assert!(!rec.mark_sold(second));
        assert_eq!(rec.sold_date, Some(first));
    }

    #[test]
    fn upsert_leaves_enrichment_untouched() {
        let mut rec = ListingRecord::create(ListingId::new(), fields("A", 5.0, 1));
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let meta = CatalogMetadata {
            image_url: "https://img/main.jpg".to_string(),
            ..CatalogMetadata::default()
        };
        rec.enrichment = Some(EnrichmentWrite::succeeded(meta, at).apply(rec.enrichment.take()));
        let before = rec.enrichment.clone();

        rec.apply_upsert(&fields("A", 9.0, 3));
        assert_eq!(rec.enrichment, before);
    }

    #[test]
    fn status_parses_and_displays() {
        assert_eq!("sold".parse::<ListingStatus>().unwrap(), ListingStatus::Sold);
        assert_eq!(ListingStatus::Active.to_string(), "active");
        assert!("gone".parse::<ListingStatus>().is_err());
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
            fn second_identical_upsert_changes_nothing(
                price in 0.0f64..10_000.0,
                quantity in 0i64..500,
                start_sold in any::<bool>(),
            ) {
                let mut rec = ListingRecord::create(ListingId::new(), fields("P", 1.0, 1));
                if start_sold {
                    rec.mark_sold(Utc::now());
                }
                let row = fields("P", price, quantity);
                rec.apply_upsert(&row);
                let snapshot = rec.clone();

                prop_assert!(!rec.apply_upsert(&row));
                prop_assert_eq!(rec, snapshot);
            }
        }
    }
}
