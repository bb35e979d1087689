//! Delivery Tracker (C6) — owns the `Delivery` state machine, applies
//! playback reports, and emits billing events (§4.6).

mod billing;
mod fallback;
mod tracker;

pub use billing::{cost_for, BillingEvent, DeliveryCounters};
pub use fallback::{FallbackContent, FallbackRegistry};
pub use tracker::DeliveryTracker;
