#![warn(clippy::unwrap_used)]

//! Device Sync API (§4.7) — the HTTP surface devices poll/push against:
//! `Register`, `Heartbeat`, `PullQueue`, `ReportPlayback`. Wiring follows
//! `crates/api-server`'s `AppState` + route-merge + separate-metrics-listener
//! convention.

pub mod error;
pub mod handlers;
pub mod health;
pub mod partner;
pub mod rate_limit;
pub mod router;
pub mod state;
pub mod wire;
pub mod worker;

pub use partner::PartnerRegistry;
pub use rate_limit::{DeviceRateLimitConfig, DeviceRateLimiter};
pub use router::build_router;
pub use state::AppState;
