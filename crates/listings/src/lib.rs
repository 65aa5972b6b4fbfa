//! Listings domain module.
//!
//! Business rules for listing records and their enrichment sub-document,
//! implemented purely as deterministic domain logic (no IO, no HTTP, no
//! storage). Storage adapters call into these types so that every backend
//! applies the same field-ownership rules.

pub mod enrichment;
pub mod listing;

pub use enrichment::{
    CatalogMetadata, EnrichmentRecord, EnrichmentWrite, Identifiers, SelectionQuery,
    needs_enrichment,
};
pub use listing::{CoreListingFields, ListingRecord, ListingStatus, ListingWrite};
