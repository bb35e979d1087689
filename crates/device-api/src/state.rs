//! Shared application state for the Device Sync API, following the
//! `AppState` pattern in `crates/api-server/src/rest.rs`.
//!
//! The core's domain crates (`Catalog`, `PerformanceStore`,
//! `DeliveryTracker<'a>`, `Scheduler<'a>`) are lifetime-generic over the
//! stores they borrow. A long-lived, `Clone + Send + Sync` Axum state needs
//! `'static` references; rather than rewire those already-tested crates'
//! APIs, `dooh-express`'s `serve` bootstrap leaks one `Box` per store once
//! at startup (`Box::leak`) and builds this `AppState` from the resulting
//! `&'static` references, which are `Copy` and trivially satisfy Axum's
//! `FromRef`/`Clone` bound.

use crate::partner::PartnerRegistry;
use crate::rate_limit::DeviceRateLimiter;
use dooh_cache::CatalogCache;
use dooh_catalog::Catalog;
use dooh_core::collaborators::{AudienceAnalyzer, BillingSink};
use dooh_core::config::DeviceApiConfig;
use dooh_core::types::BillingEvent;
use dooh_delivery::{DeliveryTracker, FallbackRegistry};
use dooh_performance::PerformanceStore;
use dooh_scheduler::Scheduler;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct AppState {
    pub catalog: &'static Catalog,
    pub cache: &'static CatalogCache<'static>,
    pub performance: &'static PerformanceStore,
    pub tracker: &'static DeliveryTracker<'static>,
    pub scheduler: &'static Scheduler<'static>,
    pub fallback: &'static FallbackRegistry,
    pub partners: &'static PartnerRegistry,
    pub rate_limiter: Arc<DeviceRateLimiter>,
    pub config: DeviceApiConfig,
    pub node_id: String,
    pub start_time: Instant,
    pub audience_analyzer: Arc<dyn AudienceAnalyzer>,
    pub billing_sink: Arc<dyn BillingSink>,
    pub billing_tx: mpsc::Sender<BillingEvent>,
}
