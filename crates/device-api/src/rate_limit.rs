//! Per-device `PullQueue` backpressure (§5 "Backpressure"): sliding-window
//! rate limit, default 1 req/s, adapted from the teacher's
//! `crates/platform/src/rate_limit.rs::RateLimiter` dual-window structure.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dooh_core::types::DeviceId;

#[derive(Debug, Clone, Copy)]
pub struct DeviceRateLimitConfig {
    pub requests_per_second: u32,
    pub requests_per_minute: u32,
}

impl Default for DeviceRateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 1,
            requests_per_minute: 30,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    window_start: DateTime<Utc>,
    minute_count: u32,
    minute_window_start: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub retry_after_ms: u64,
}

/// In-memory per-device sliding-window limiter. One instance is shared by
/// the whole `PullQueue` handler.
pub struct DeviceRateLimiter {
    entries: DashMap<DeviceId, WindowEntry>,
    config: DeviceRateLimitConfig,
}

impl DeviceRateLimiter {
    pub fn new(config: DeviceRateLimitConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    pub fn check(&self, device_id: DeviceId) -> RateLimitResult {
        let now = Utc::now();
        let mut entry = self.entries.entry(device_id).or_insert_with(|| WindowEntry {
            count: 0,
            window_start: now,
            minute_count: 0,
            minute_window_start: now,
        });

        if now.signed_duration_since(entry.window_start) >= Duration::seconds(1) {
            entry.count = 0;
            entry.window_start = now;
        }
        if now.signed_duration_since(entry.minute_window_start) >= Duration::minutes(1) {
            entry.minute_count = 0;
            entry.minute_window_start = now;
        }

        let second_ok = entry.count < self.config.requests_per_second;
        let minute_ok = entry.minute_count < self.config.requests_per_minute;

        if second_ok && minute_ok {
            entry.count += 1;
            entry.minute_count += 1;
            RateLimitResult {
                allowed: true,
                retry_after_ms: 0,
            }
        } else {
            let reset_at = if !second_ok {
                entry.window_start + Duration::seconds(1)
            } else {
                entry.minute_window_start + Duration::minutes(1)
            };
            let retry_after_ms = (reset_at - now).num_milliseconds().max(0) as u64;
            RateLimitResult {
                allowed: false,
                retry_after_ms,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn allows_up_to_the_per_second_limit_then_denies() {
        let limiter = DeviceRateLimiter::new(DeviceRateLimitConfig {
            requests_per_second: 1,
            requests_per_minute: 100,
        });
        let device_id = Uuid::new_v4();
        assert!(limiter.check(device_id).allowed);
        let second = limiter.check(device_id);
        assert!(!second.allowed);
        assert!(second.retry_after_ms > 0);
    }

    #[test]
    fn separate_devices_have_independent_budgets() {
        let limiter = DeviceRateLimiter::new(DeviceRateLimitConfig::default());
        assert!(limiter.check(Uuid::new_v4()).allowed);
        assert!(limiter.check(Uuid::new_v4()).allowed);
    }
}
