//! Tab-delimited listing snapshot parsing and eligibility filtering.
//!
//! The report is decoded leniently: malformed UTF-8 sequences are dropped,
//! rows wider than the header are skipped, and a missing column simply
//! disables the filter that depends on it.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use catalogsync_listings::CoreListingFields;

const COL_STATUS: &[&str] = &["item-status", "status"];
const COL_CHANNEL: &[&str] = &["fulfillment-channel"];
const COL_QUANTITY: &[&str] = &["quantity"];
const COL_ASIN: &[&str] = &["asin1"];
const COL_PRICE: &[&str] = &["price"];
const COL_SUPPRESSED: &[&str] = &["listing-is-suppressed"];
const COL_SKU: &[&str] = &["seller-sku"];
const COL_TITLE: &[&str] = &["item-name"];
const COL_OPEN_DATE: &[&str] = &["open-date"];
const COL_PRODUCT_ID: &[&str] = &["product-id"];
const COL_PRODUCT_ID_TYPE: &[&str] = &["product-id-type"];

/// Merchant-fulfilled channel code.
pub const MERCHANT_CHANNEL: &str = "DEFAULT";

/// Per-filter drop counts for one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotStats {
    pub total_rows: usize,
    pub malformed: usize,
    pub inactive: usize,
    pub not_merchant_fulfilled: usize,
    pub out_of_stock: usize,
    pub missing_asin: usize,
    pub unpriced: usize,
    pub suppressed: usize,
    pub missing_sku: usize,
    pub duplicate_sku: usize,
    pub empty: usize,
    pub invalid: usize,
    pub kept: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedSnapshot {
    /// Eligible rows in report order, unique by SKU.
    pub rows: Vec<CoreListingFields>,
    pub stats: SnapshotStats,
}

struct Columns {
    status: Option<usize>,
    channel: Option<usize>,
    quantity: Option<usize>,
    asin: Option<usize>,
    price: Option<usize>,
    suppressed: Option<usize>,
    sku: Option<usize>,
    title: Option<usize>,
    open_date: Option<usize>,
    product_id: Option<usize>,
    product_id_type: Option<usize>,
}

impl Columns {
    fn resolve(headers: &csv::StringRecord) -> Self {
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, h) in headers.iter().enumerate() {
            index.entry(h.trim()).or_insert(i);
        }
        let find = |names: &[&str]| names.iter().find_map(|n| index.get(n).copied());

        Self {
            status: find(COL_STATUS),
            channel: find(COL_CHANNEL),
            quantity: find(COL_QUANTITY),
            asin: find(COL_ASIN),
            price: find(COL_PRICE),
            suppressed: find(COL_SUPPRESSED),
            sku: find(COL_SKU),
            title: find(COL_TITLE),
            open_date: find(COL_OPEN_DATE),
            product_id: find(COL_PRODUCT_ID),
            product_id_type: find(COL_PRODUCT_ID_TYPE),
        }
    }
}

/// A parsed row: trimmed cells, blank cells as `None`.
struct Row(Vec<Option<String>>);

impl Row {
    fn from_record(record: &csv::StringRecord) -> Self {
        Row(record
            .iter()
            .map(|cell| {
                let cell = cell.trim();
                (!cell.is_empty()).then(|| cell.to_string())
            })
            .collect())
    }

    fn get(&self, col: Option<usize>) -> Option<&str> {
        col.and_then(|i| self.0.get(i)).and_then(|c| c.as_deref())
    }

    fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }
}

fn number(cell: Option<&str>) -> Option<f64> {
    cell.and_then(|c| c.parse::<f64>().ok()).filter(|v| v.is_finite())
}

/// Decode raw report bytes, dropping malformed sequences and the BOM.
pub fn decode_report(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.trim_start_matches('\u{feff}')
        .chars()
        .filter(|c| *c != char::REPLACEMENT_CHARACTER)
        .collect()
}

/// Parse and filter a raw snapshot.
pub fn normalize_snapshot(raw: &[u8]) -> NormalizedSnapshot {
    let text = decode_report(raw);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .quoting(false)
        .delimiter(b'\t')
        .from_reader(text.as_bytes());

    let headers = match reader.headers() {
        Ok(h) => h.clone(),
        Err(e) => {
            warn!(error = %e, "snapshot has no readable header");
            return NormalizedSnapshot::default();
        }
    };
    let width = headers.len();
    let cols = Columns::resolve(&headers);

    let mut stats = SnapshotStats::default();
    let mut seen = HashSet::new();
    let mut rows = Vec::new();

    for record in reader.records() {
        stats.total_rows += 1;
        let record = match record {
            Ok(r) if r.len() <= width => r,
            Ok(r) => {
                debug!(line = r.position().map(|p| p.line()), "row wider than header, skipped");
                stats.malformed += 1;
                continue;
            }
            Err(e) => {
                debug!(error = %e, "unreadable row skipped");
                stats.malformed += 1;
                continue;
            }
        };
        let row = Row::from_record(&record);

        if cols.status.is_some()
            && !row
                .get(cols.status)
                .is_some_and(|s| s.eq_ignore_ascii_case("active"))
        {
            stats.inactive += 1;
            continue;
        }
        if cols.channel.is_some() && row.get(cols.channel) != Some(MERCHANT_CHANNEL) {
            stats.not_merchant_fulfilled += 1;
            continue;
        }
        if cols.quantity.is_some()
            && !row
                .get(cols.quantity)
                .and_then(parse_quantity)
                .is_some_and(|q| q > 0)
        {
            stats.out_of_stock += 1;
            continue;
        }
        if cols.asin.is_some() && row.get(cols.asin).is_none() {
            stats.missing_asin += 1;
            continue;
        }
        if cols.price.is_some() && !number(row.get(cols.price)).is_some_and(|p| p > 0.0) {
            stats.unpriced += 1;
            continue;
        }
        if row
            .get(cols.suppressed)
            .is_some_and(|s| s.eq_ignore_ascii_case("true"))
        {
            stats.suppressed += 1;
            continue;
        }
        if cols.sku.is_some() {
            let Some(sku) = row.get(cols.sku) else {
                stats.missing_sku += 1;
                continue;
            };
            if !seen.insert(sku.to_string()) {
                stats.duplicate_sku += 1;
                continue;
            }
        }
        if row.is_empty() {
            stats.empty += 1;
            continue;
        }

        let fields = to_fields(&row, &cols);
        if let Err(e) = fields.validate() {
            warn!(sku = %fields.sku, error = %e, "snapshot row rejected");
            stats.invalid += 1;
            continue;
        }
        rows.push(fields);
    }

    stats.kept = rows.len();
    info!(
        rows = stats.kept,
        total = stats.total_rows,
        malformed = stats.malformed,
        duplicates = stats.duplicate_sku,
        "snapshot normalized"
    );

    NormalizedSnapshot { rows, stats }
}

fn to_fields(row: &Row, cols: &Columns) -> CoreListingFields {
    let owned = |col| row.get(col).map(str::to_string);

    CoreListingFields {
        sku: owned(cols.sku).unwrap_or_default(),
        title: owned(cols.title).unwrap_or_default(),
        asin: owned(cols.asin),
        price: number(row.get(cols.price)).unwrap_or(0.0),
        quantity: row.get(cols.quantity).and_then(parse_quantity).unwrap_or(0),
        open_date: row.get(cols.open_date).and_then(parse_open_date),
        fulfillment_channel: owned(cols.channel).unwrap_or_else(|| MERCHANT_CHANNEL.to_string()),
        product_id: owned(cols.product_id),
        product_id_type: owned(cols.product_id_type),
    }
}

/// Whole-unit quantity; `"3.0"` is accepted, fractions are truncated.
fn parse_quantity(cell: &str) -> Option<i64> {
    cell.parse::<i64>()
        .ok()
        .or_else(|| number(Some(cell)).map(|q| q.trunc() as i64))
}

/// UTC offsets (hours) of the zone abbreviations the report emits.
const ZONE_OFFSETS: &[(&str, i32)] = &[
    ("UTC", 0),
    ("GMT", 0),
    ("PST", -8),
    ("PDT", -7),
    ("MST", -7),
    ("MDT", -6),
    ("CST", -6),
    ("CDT", -5),
    ("EST", -5),
    ("EDT", -4),
    ("BST", 1),
    ("CET", 1),
    ("CEST", 2),
    ("JST", 9),
];

/// Parse `2023-05-12 10:23:45 PDT` style dates, or RFC 3339.
pub fn parse_open_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    let (stamp, zone) = match raw.rsplit_once(' ') {
        Some((stamp, zone)) if zone.chars().all(|c| c.is_ascii_alphabetic()) => (stamp, Some(zone)),
        _ => (raw, None),
    };
    let naive = NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(stamp, "%d/%m/%Y %H:%M:%S"))
        .ok()?;

    let hours = match zone {
        None => 0,
        Some(z) => ZONE_OFFSETS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(z))
            .map(|(_, h)| *h)?,
    };
    let offset = FixedOffset::east_opt(hours * 3600)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}
