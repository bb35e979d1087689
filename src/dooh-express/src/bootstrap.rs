//! Process-startup wiring: constructs the `'static`-leaked domain stores and
//! assembles `dooh_device_api::AppState` from them.
//!
//! The domain crates (`Catalog`, `PerformanceStore`, `DeliveryTracker<'a>`,
//! `Scheduler<'a>`, `CatalogCache<'a>`) are lifetime-generic by design — they
//! borrow their collaborators rather than owning `Arc`s, which keeps their
//! APIs allocation-free and trivially testable with stack-local fixtures
//! (see their own `#[cfg(test)]` modules). A long-lived Axum `AppState` needs
//! `'static` data, so this module leaks one `Box` per store exactly once, at
//! process startup — the leak is bounded (one allocation per store, for the
//! life of the process) and never repeated.

use dooh_cache::CatalogCache;
use dooh_catalog::Catalog;
use dooh_core::collaborators::{NullAudienceAnalyzer, NullBillingSink};
use dooh_core::config::AppConfig;
use dooh_core::types::BillingEvent;
use dooh_delivery::{DeliveryTracker, FallbackRegistry};
use dooh_device_api::rate_limit::{DeviceRateLimitConfig, DeviceRateLimiter};
use dooh_device_api::worker::BILLING_QUEUE_CAPACITY;
use dooh_device_api::{AppState, PartnerRegistry};
use dooh_performance::PerformanceStore;
use dooh_pricing::PricingEngine;
use dooh_scheduler::{Scheduler, SchedulerConfig as SchedulerRuntimeConfig};
use dooh_selection::SelectionConfig;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

fn scheduler_runtime_config(config: &AppConfig) -> SchedulerRuntimeConfig {
    SchedulerRuntimeConfig {
        horizon_minutes: config.scheduler.horizon_minutes,
        slot_granularity_minutes: config.scheduler.slot_minutes,
        grace_minutes: config.scheduler.grace_minutes,
    }
}

fn selection_runtime_config(config: &AppConfig) -> SelectionConfig {
    SelectionConfig {
        ucb1_k: config.selection.ucb1_k,
        end_of_flight_boost: config.selection.end_of_flight_boost,
    }
}

/// Everything `serve`, `seed`, `replay`, `inspect-device`, and
/// `recompute-priors` need: the leaked `'static` stores plus the `AppState`
/// built on top of them. Every CLI subcommand goes through this so they all
/// share one construction path, even the ones that never start the HTTP
/// server.
pub struct Bootstrap {
    pub catalog: &'static Catalog,
    pub performance: &'static PerformanceStore,
    pub tracker: &'static DeliveryTracker<'static>,
    pub scheduler: &'static Scheduler<'static>,
    pub fallback: &'static FallbackRegistry,
    pub partners: &'static PartnerRegistry,
    pub state: AppState,
    /// Consumer half of the billing queue. `serve` hands this to
    /// `dooh_device_api::worker::run_billing_worker`; one-shot subcommands
    /// that never start that worker simply drop it — `submit_billing_event`
    /// already treats a closed channel as a logged, non-fatal drop.
    pub billing_rx: mpsc::Receiver<BillingEvent>,
}

pub fn bootstrap(config: &AppConfig) -> Bootstrap {
    let catalog: &'static Catalog = Box::leak(Box::new(Catalog::new()));
    let performance: &'static PerformanceStore = Box::leak(Box::new(PerformanceStore::new()));
    let pricing: &'static PricingEngine = Box::leak(Box::new(PricingEngine::new(
        config.pricing.rate_floor,
        config.pricing.historical_blend_threshold,
    )));
    let cache: &'static CatalogCache<'static> = Box::leak(Box::new(CatalogCache::new(catalog, 60, 10_000)));
    let tracker: &'static DeliveryTracker<'static> = Box::leak(Box::new(DeliveryTracker::new(catalog, performance)));
    let fallback: &'static FallbackRegistry = Box::leak(Box::new(FallbackRegistry::new()));
    let partners: &'static PartnerRegistry = Box::leak(Box::new(PartnerRegistry::new()));

    let scheduler: &'static Scheduler<'static> = Box::leak(Box::new(
        Scheduler::with_cache(catalog, performance, tracker, pricing, cache, scheduler_runtime_config(config))
            .with_selection_config(selection_runtime_config(config)),
    ));

    let (billing_tx, billing_rx) = mpsc::channel(BILLING_QUEUE_CAPACITY);

    let state = AppState {
        catalog,
        cache,
        performance,
        tracker,
        scheduler,
        fallback,
        partners,
        rate_limiter: Arc::new(DeviceRateLimiter::new(DeviceRateLimitConfig {
            requests_per_second: config.device_api.pull_queue_rps,
            requests_per_minute: config.device_api.pull_queue_rps.saturating_mul(30).max(1),
        })),
        config: config.device_api.clone(),
        node_id: config.node_id.clone(),
        start_time: Instant::now(),
        audience_analyzer: Arc::new(NullAudienceAnalyzer),
        billing_sink: Arc::new(NullBillingSink),
        billing_tx,
    };

    Bootstrap {
        catalog,
        performance,
        tracker,
        scheduler,
        fallback,
        partners,
        state,
        billing_rx,
    }
}
