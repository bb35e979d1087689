#![warn(clippy::unwrap_used)]

//! Optional L1 in-process cache in front of the Catalog's read-through
//! eligibility queries (§4.1), kept from the teacher's two-tier cache
//! design with the Redis L2 tier dropped (see `DESIGN.md`).

pub mod catalog_cache;
pub mod local;

pub use catalog_cache::CatalogCache;
pub use local::LocalCache;
