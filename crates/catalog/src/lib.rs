//! Catalog (C1) — read-through cache of campaigns, creatives, and devices
//! with eligibility indices. In-memory `DashMap` store, development mode;
//! swap to a durable vendor store for production (see `StoreConfig`).

mod store;

pub use store::Catalog;
