//! Postgres-backed listing store.
//!
//! One row per SKU in `listings`. Core columns are written only by
//! [`ListingWrite`] batches, the `enrich*` columns only by
//! [`EnrichmentWrite`]s, so the two writers never clobber each other.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (check violation) | `23514` | `Rejected` |
//! | Database (not-null violation) | `23502` | `Rejected` |
//! | Database (other) | any | `Backend` |
//! | ColumnDecode / Decode | N/A | `Decode` |
//! | Other | N/A | `Backend` |

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};

use catalogsync_core::ListingId;
use catalogsync_listings::{
    CatalogMetadata, CoreListingFields, EnrichmentRecord, EnrichmentWrite, ListingRecord,
    ListingStatus, ListingWrite, SelectionQuery,
};

use super::{BatchOutcome, ListingStore, StoreError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS listings (
        id                  UUID PRIMARY KEY,
        sku                 TEXT NOT NULL UNIQUE,
        title               TEXT NOT NULL DEFAULT '',
        asin                TEXT,
        price               DOUBLE PRECISION NOT NULL CHECK (price >= 0),
        quantity            BIGINT NOT NULL CHECK (quantity >= 0),
        status              TEXT NOT NULL CHECK (status IN ('active', 'sold')),
        open_date           TIMESTAMPTZ,
        sold_date           TIMESTAMPTZ,
        fulfillment_channel TEXT NOT NULL,
        product_id          TEXT,
        product_id_type     TEXT,
        enrichment_metadata JSONB,
        enriched            BOOLEAN,
        enriched_error      TEXT,
        enriched_at         TIMESTAMPTZ,
        created_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at          TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS listings_status_idx ON listings (status)",
    "CREATE INDEX IF NOT EXISTS listings_enriched_at_idx ON listings (enriched_at)",
];

const LISTING_COLUMNS: &str = r#"
    id, sku, title, asin, price, quantity, status, open_date, sold_date,
    fulfillment_channel, product_id, product_id_type,
    enrichment_metadata, enriched, enriched_error, enriched_at
"#;

// Only rewrites the row when a core column actually differs; `RETURNING`
// yields nothing for an unchanged match.
const UPSERT_SQL: &str = r#"
    INSERT INTO listings (
        id, sku, title, asin, price, quantity, status, open_date, sold_date,
        fulfillment_channel, product_id, product_id_type
    )
    VALUES ($1, $2, $3, $4, $5, $6, 'active', $7, NULL, $8, $9, $10)
    ON CONFLICT (sku) DO UPDATE SET
        title = EXCLUDED.title,
        asin = EXCLUDED.asin,
        price = EXCLUDED.price,
        quantity = EXCLUDED.quantity,
        status = 'active',
        open_date = EXCLUDED.open_date,
        sold_date = NULL,
        fulfillment_channel = EXCLUDED.fulfillment_channel,
        product_id = EXCLUDED.product_id,
        product_id_type = EXCLUDED.product_id_type,
        updated_at = now()
    WHERE (
        listings.title, listings.asin, listings.price, listings.quantity,
        listings.status, listings.open_date, listings.sold_date,
        listings.fulfillment_channel, listings.product_id, listings.product_id_type
    ) IS DISTINCT FROM (
        EXCLUDED.title, EXCLUDED.asin, EXCLUDED.price, EXCLUDED.quantity,
        EXCLUDED.status, EXCLUDED.open_date, EXCLUDED.sold_date,
        EXCLUDED.fulfillment_channel, EXCLUDED.product_id, EXCLUDED.product_id_type
    )
    RETURNING (xmax = 0) AS inserted
"#;

const MARK_SOLD_SQL: &str = r#"
    UPDATE listings
    SET status = 'sold', sold_date = $2, updated_at = now()
    WHERE sku = $1 AND status <> 'sold'
"#;

#[derive(Debug, Clone)]
pub struct PostgresListingStore {
    pool: Arc<PgPool>,
}

impl PostgresListingStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the `listings` table and its indexes if missing.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    async fn upsert(
        tx: &mut Transaction<'_, Postgres>,
        fields: &CoreListingFields,
        outcome: &mut BatchOutcome,
    ) -> Result<(), StoreError> {
        let row = sqlx::query(UPSERT_SQL)
            .bind(*ListingId::new().as_uuid())
            .bind(&fields.sku)
            .bind(&fields.title)
            .bind(&fields.asin)
            .bind(fields.price)
            .bind(fields.quantity)
            .bind(fields.open_date)
            .bind(&fields.fulfillment_channel)
            .bind(&fields.product_id)
            .bind(&fields.product_id_type)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("upsert", e))?;

        match row {
            None => outcome.matched += 1,
            Some(row) => {
                let inserted: bool = row
                    .try_get("inserted")
                    .map_err(|e| map_sqlx_error("upsert", e))?;
                if inserted {
                    outcome.upserted += 1;
                } else {
                    outcome.matched += 1;
                    outcome.modified += 1;
                }
            }
        }
        Ok(())
    }

    async fn mark_sold(
        tx: &mut Transaction<'_, Postgres>,
        sku: &str,
        sold_at: DateTime<Utc>,
        outcome: &mut BatchOutcome,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(MARK_SOLD_SQL)
            .bind(sku)
            .bind(sold_at)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("mark_sold", e))?;

        let affected = result.rows_affected();
        outcome.matched += affected;
        outcome.modified += affected;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ListingStore for PostgresListingStore {
    #[instrument(skip(self), err)]
    async fn stored_skus(&self) -> Result<HashSet<String>, StoreError> {
        let rows = sqlx::query("SELECT sku FROM listings")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("stored_skus", e))?;

        rows.iter()
            .map(|r| r.try_get::<String, _>("sku"))
            .collect::<Result<HashSet<_>, _>>()
            .map_err(|e| map_sqlx_error("stored_skus", e))
    }

    #[instrument(skip(self, writes), fields(writes = writes.len()), err)]
    async fn apply_batch(&self, writes: &[ListingWrite]) -> Result<BatchOutcome, StoreError> {
        for write in writes {
            if let ListingWrite::Upsert(fields) = write {
                fields
                    .validate()
                    .map_err(|e| StoreError::Rejected(e.to_string()))?;
            }
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        let mut outcome = BatchOutcome::default();

        for write in writes {
            match write {
                ListingWrite::Upsert(fields) => Self::upsert(&mut tx, fields, &mut outcome).await?,
                ListingWrite::MarkSold { sku, sold_at } => {
                    Self::mark_sold(&mut tx, sku, *sold_at, &mut outcome).await?
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;

        debug!(?outcome, "batch committed");
        Ok(outcome)
    }

    #[instrument(skip(self), fields(stale_before = %query.stale_before), err)]
    async fn find_enrichment_candidates(
        &self,
        query: &SelectionQuery,
    ) -> Result<Vec<ListingRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT {LISTING_COLUMNS}
            FROM listings
            WHERE enriched_at IS NULL
               OR enriched_at < $1
               OR COALESCE(enrichment_metadata->>'image_url', '') = ''
            ORDER BY sku
            "#
        );
        let rows = sqlx::query_as::<_, ListingRow>(&sql)
            .bind(query.stale_before)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_enrichment_candidates", e))?;

        rows.into_iter().map(ListingRecord::try_from).collect()
    }

    #[instrument(skip(self, write), fields(listing_id = %id), err)]
    async fn write_enrichment(&self, id: ListingId, write: EnrichmentWrite) -> Result<(), StoreError> {
        let result = match write {
            EnrichmentWrite::Succeeded { metadata, at } => sqlx::query(
                r#"
                UPDATE listings
                SET enrichment_metadata = $2, enriched = TRUE, enriched_error = NULL,
                    enriched_at = $3, updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(id.as_uuid())
            .bind(Json(metadata))
            .bind(at)
            .execute(&*self.pool)
            .await,
            // Previously stored metadata is left as it is.
            EnrichmentWrite::Failed { reason, at } => sqlx::query(
                r#"
                UPDATE listings
                SET enriched = FALSE, enriched_error = $2, enriched_at = $3, updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(id.as_uuid())
            .bind(reason)
            .bind(at)
            .execute(&*self.pool)
            .await,
        }
        .map_err(|e| map_sqlx_error("write_enrichment", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get_by_sku(&self, sku: &str) -> Result<Option<ListingRecord>, StoreError> {
        let sql = format!("SELECT {LISTING_COLUMNS} FROM listings WHERE sku = $1");
        let row = sqlx::query_as::<_, ListingRow>(&sql)
            .bind(sku)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_by_sku", e))?;

        row.map(ListingRecord::try_from).transpose()
    }
}

// SQLx row types

#[derive(Debug)]
struct ListingRow {
    id: uuid::Uuid,
    sku: String,
    title: String,
    asin: Option<String>,
    price: f64,
    quantity: i64,
    status: String,
    open_date: Option<DateTime<Utc>>,
    sold_date: Option<DateTime<Utc>>,
    fulfillment_channel: String,
    product_id: Option<String>,
    product_id_type: Option<String>,
    enrichment_metadata: Option<Json<CatalogMetadata>>,
    enriched: Option<bool>,
    enriched_error: Option<String>,
    enriched_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ListingRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(ListingRow {
            id: row.try_get("id")?,
            sku: row.try_get("sku")?,
            title: row.try_get("title")?,
            asin: row.try_get("asin")?,
            price: row.try_get("price")?,
            quantity: row.try_get("quantity")?,
            status: row.try_get("status")?,
            open_date: row.try_get("open_date")?,
            sold_date: row.try_get("sold_date")?,
            fulfillment_channel: row.try_get("fulfillment_channel")?,
            product_id: row.try_get("product_id")?,
            product_id_type: row.try_get("product_id_type")?,
            enrichment_metadata: row.try_get("enrichment_metadata")?,
            enriched: row.try_get("enriched")?,
            enriched_error: row.try_get("enriched_error")?,
            enriched_at: row.try_get("enriched_at")?,
        })
    }
}

impl TryFrom<ListingRow> for ListingRecord {
    type Error = StoreError;

    fn try_from(row: ListingRow) -> Result<Self, Self::Error> {
        let status: ListingStatus = row
            .status
            .parse()
            .map_err(|e: catalogsync_core::DomainError| StoreError::Decode(e.to_string()))?;

        // Never attempted until `enriched_at` is stamped.
        let enrichment = row.enriched_at.map(|enriched_at| EnrichmentRecord {
            metadata: row.enrichment_metadata.map(|Json(m)| m),
            enriched: row.enriched.unwrap_or(false),
            enriched_error: row.enriched_error,
            enriched_at,
        });

        Ok(ListingRecord {
            id: ListingId::from_uuid(row.id),
            sku: row.sku,
            title: row.title,
            asin: row.asin,
            price: row.price,
            quantity: row.quantity,
            status,
            open_date: row.open_date,
            sold_date: row.sold_date,
            fulfillment_channel: row.fulfillment_channel,
            product_id: row.product_id,
            product_id_type: row.product_id_type,
            enrichment,
        })
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23514") | Some("23502") => StoreError::Rejected(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Decode(format!("{operation}: {err}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
