//! Field extraction from heterogeneous catalog payloads.
//!
//! Each field is resolved by an ordered list of pure strategies; the first
//! one that yields a value wins and every field has a default.

use serde_json::{Map, Value};

use catalogsync_listings::{CatalogMetadata, Identifiers, ListingRecord};

/// One way of pulling a value out of a payload.
pub type Strategy<T> = fn(&Value) -> Option<T>;

/// Run strategies in order, returning the first hit.
pub fn first_match<T>(payload: &Value, strategies: &[Strategy<T>]) -> Option<T> {
    strategies.iter().find_map(|strategy| strategy(payload))
}

/// Non-empty text from a scalar, the first element of a list, or the
/// `value`/`name` of an object.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => items.first().and_then(scalar_text),
        Value::Object(obj) => ["value", "name", "Name"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(scalar_text)),
        _ => None,
    }
}

/// Legacy `Attributes` object.
fn legacy_attributes(payload: &Value) -> Option<&Map<String, Value>> {
    payload.get("Attributes").and_then(Value::as_object)
}

fn legacy_text(payload: &Value, key: &str) -> Option<String> {
    legacy_attributes(payload)?.get(key).and_then(scalar_text)
}

fn list<'a>(payload: &'a Value, keys: &[&str]) -> Option<&'a Vec<Value>> {
    keys.iter()
        .find_map(|k| payload.get(*k).and_then(Value::as_array).filter(|a| !a.is_empty()))
}

fn first_string_field(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| {
        item.get(*k)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

// Title

fn legacy_item_name(payload: &Value) -> Option<String> {
    legacy_text(payload, "ItemName")
}

fn summaries_item_name(payload: &Value) -> Option<String> {
    list(payload, &["summaries"])?
        .iter()
        .find_map(|s| first_string_field(s, &["itemName"]))
}

fn attributes_item_name(payload: &Value) -> Option<String> {
    payload
        .get("attributes")?
        .get("item_name")?
        .as_array()?
        .iter()
        .find_map(|entry| first_string_field(entry, &["value"]))
}

pub const TITLE: &[Strategy<String>] = &[legacy_item_name, summaries_item_name, attributes_item_name];

// Category, contributors

fn legacy_product_type(payload: &Value) -> Option<String> {
    legacy_text(payload, "ProductType")
}

pub const CATEGORY: &[Strategy<String>] = &[legacy_product_type];

fn legacy_contributors(payload: &Value) -> Option<String> {
    let names: Vec<String> = legacy_attributes(payload)?
        .get("Contributor")?
        .as_array()?
        .iter()
        .filter_map(|c| first_string_field(c, &["value", "name"]))
        .collect();
    (!names.is_empty()).then(|| names.join(", "))
}

pub const AUTHOR_OR_BRAND: &[Strategy<String>] = &[legacy_contributors];

// Identifiers

fn payload_asin(payload: &Value) -> Option<String> {
    payload.get("asin").and_then(scalar_text)
}

fn legacy_isbn(payload: &Value) -> Option<String> {
    legacy_text(payload, "ISBN")
}

fn legacy_isbn_10(payload: &Value) -> Option<String> {
    legacy_text(payload, "ISBN_10")
}

fn legacy_isbn13(payload: &Value) -> Option<String> {
    legacy_text(payload, "ISBN13")
}

fn legacy_isbn_13(payload: &Value) -> Option<String> {
    legacy_text(payload, "ISBN_13")
}

pub const ASIN: &[Strategy<String>] = &[payload_asin];
pub const ISBN_10: &[Strategy<String>] = &[legacy_isbn, legacy_isbn_10];
pub const ISBN_13: &[Strategy<String>] = &[legacy_isbn13, legacy_isbn_13];

// Publication details

fn legacy_release_date(payload: &Value) -> Option<String> {
    legacy_text(payload, "ReleaseDate")
}

fn legacy_publication_date(payload: &Value) -> Option<String> {
    legacy_text(payload, "PublicationDate")
}

fn legacy_language(payload: &Value) -> Option<String> {
    legacy_text(payload, "Language")
}

fn page_number(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Array(items) => items.first().and_then(page_number),
        _ => None,
    }
}

fn legacy_number_of_pages(payload: &Value) -> Option<i64> {
    legacy_attributes(payload)?.get("NumberOfPages").and_then(page_number)
}

fn legacy_pages(payload: &Value) -> Option<i64> {
    legacy_attributes(payload)?.get("Pages").and_then(page_number)
}

fn summary_text(payload: &Value) -> Option<String> {
    list(payload, &["summaries", "Summaries"])?
        .iter()
        .find_map(|s| first_string_field(s, &["text", "summary", "content"]))
}

pub const PUBLICATION_DATE: &[Strategy<String>] = &[legacy_release_date, legacy_publication_date];
pub const LANGUAGE: &[Strategy<String>] = &[legacy_language];
pub const PAGE_COUNT: &[Strategy<i64>] = &[legacy_number_of_pages, legacy_pages];
pub const SUMMARY: &[Strategy<String>] = &[summary_text];

// Images

fn image_groups(payload: &Value) -> Option<&Vec<Value>> {
    list(payload, &["Images", "images"])
}

fn image_link(image: &Value) -> Option<String> {
    first_string_field(image, &["link", "url"])
}

/// `MAIN` variant within the group for `marketplace_id`.
pub fn marketplace_main_image(payload: &Value, marketplace_id: &str) -> Option<String> {
    image_groups(payload)?
        .iter()
        .filter(|g| g.get("marketplaceId").and_then(Value::as_str) == Some(marketplace_id))
        .filter_map(|g| g.get("images").and_then(Value::as_array))
        .flatten()
        .filter(|img| {
            img.get("variant")
                .and_then(Value::as_str)
                .is_some_and(|v| v.eq_ignore_ascii_case("MAIN"))
        })
        .find_map(image_link)
}

/// First image of the first group, whatever its marketplace or variant.
pub fn first_image(payload: &Value) -> Option<String> {
    image_groups(payload)?
        .first()?
        .get("images")?
        .as_array()?
        .first()
        .and_then(image_link)
}

/// Maps catalog payloads onto [`CatalogMetadata`].
#[derive(Debug, Clone)]
pub struct CatalogNormalizer {
    marketplace_id: String,
}

impl CatalogNormalizer {
    pub fn new(marketplace_id: impl Into<String>) -> Self {
        Self {
            marketplace_id: marketplace_id.into(),
        }
    }

    pub fn main_image(&self, payload: &Value) -> String {
        marketplace_main_image(payload, &self.marketplace_id)
            .or_else(|| first_image(payload))
            .unwrap_or_default()
    }

    /// Normalize `payload` fetched for `asin`. Falls back to the listing's own
    /// title and identifier where the payload has none.
    pub fn normalize(&self, payload: &Value, listing: &ListingRecord, asin: &str) -> CatalogMetadata {
        let text = |strategies: &[Strategy<String>]| first_match(payload, strategies).unwrap_or_default();

        CatalogMetadata {
            title_clean: first_match(payload, TITLE).unwrap_or_else(|| listing.title.trim().to_string()),
            author_or_brand: text(AUTHOR_OR_BRAND),
            category_clean: text(CATEGORY),
            image_url: self.main_image(payload),
            publication_date: text(PUBLICATION_DATE),
            language: text(LANGUAGE),
            page_count: first_match(payload, PAGE_COUNT),
            identifiers: Identifiers {
                asin: first_match(payload, ASIN).unwrap_or_else(|| asin.to_string()),
                isbn_10: text(ISBN_10),
                isbn_13: text(ISBN_13),
            },
            summary: text(SUMMARY),
        }
    }
}

/// One way of finding the catalog key for a stored listing.
pub type KeyStrategy = fn(&ListingRecord) -> Option<String>;

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn listing_asin(listing: &ListingRecord) -> Option<String> {
    non_empty(listing.asin.as_deref())
}

/// Product id typed `1` is an ASIN.
fn product_id_asin(listing: &ListingRecord) -> Option<String> {
    match listing.product_id_type.as_deref().map(str::trim) {
        Some("1") => non_empty(listing.product_id.as_deref()),
        _ => None,
    }
}

fn enriched_asin(listing: &ListingRecord) -> Option<String> {
    let metadata = listing.enrichment.as_ref()?.metadata.as_ref()?;
    non_empty(Some(metadata.identifiers.asin.as_str()))
}

pub const LOOKUP_KEY: &[KeyStrategy] = &[listing_asin, product_id_asin, enriched_asin];

/// Catalog key for `listing`, or `None` when it has no usable identifier.
pub fn lookup_key(listing: &ListingRecord) -> Option<String> {
    LOOKUP_KEY.iter().find_map(|strategy| strategy(listing))
}

/// Every string leaf of `value` with its dotted path (`a.b[0].c`).
pub fn string_leaves(value: &Value) -> Vec<(String, String)> {
    fn walk(value: &Value, prefix: &str, out: &mut Vec<(String, String)>) {
        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    let path = if prefix.is_empty() {
                        k.clone()
                    } else {
                        format!("{prefix}.{k}")
                    };
                    walk(v, &path, out);
                }
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    walk(item, &format!("{prefix}[{i}]"), out);
                }
            }
            Value::String(s) => out.push((prefix.to_string(), s.clone())),
            _ => {}
        }
    }

    let mut out = Vec::new();
    walk(value, "", &mut out);
    out
}
