//! Performance Store (C3) — per-context impressions/engagements/completions
//! counters that feed the Selection Engine's bandit priors (§4.3).
//!
//! Counters are monotone and idempotent on `deliveryID`: reapplying the same
//! delivery's counters twice is a no-op. A failure to persist surfaces as
//! `CoreError::TransientStorage`, which the Delivery Tracker records but
//! does not let block a state transition (fail-open on telemetry).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dooh_core::error::CoreResult;
use dooh_core::types::{CampaignId, DeliveryId, PerformanceContextKey, PerformanceCounters};
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// Upper bound on the idempotency ledger kept per context key. Old entries
/// are evicted FIFO once the bound is hit — a delivery that somehow
/// resubmits after this many newer deliveries in the same context is rare
/// enough that double-counting its reapplication is an acceptable cost.
const MAX_TRACKED_DELIVERIES_PER_KEY: usize = 4096;

struct ContextEntry {
    counters: PerformanceCounters,
    applied_seen: HashSet<DeliveryId>,
    applied_order: VecDeque<DeliveryId>,
    last_updated: DateTime<Utc>,
}

impl ContextEntry {
    fn new() -> Self {
        Self {
            counters: PerformanceCounters::default(),
            applied_seen: HashSet::new(),
            applied_order: VecDeque::new(),
            last_updated: Utc::now(),
        }
    }

    /// Returns `true` the first time `delivery_id` is seen for this context.
    fn record_delivery(&mut self, delivery_id: DeliveryId) -> bool {
        if self.applied_seen.contains(&delivery_id) {
            return false;
        }
        self.applied_seen.insert(delivery_id);
        self.applied_order.push_back(delivery_id);
        if self.applied_order.len() > MAX_TRACKED_DELIVERIES_PER_KEY {
            if let Some(evicted) = self.applied_order.pop_front() {
                self.applied_seen.remove(&evicted);
            }
        }
        true
    }
}

pub struct PerformanceStore {
    buckets: DashMap<PerformanceContextKey, ContextEntry>,
}

impl Default for PerformanceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceStore {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// `Incr(key, deltas)` (§4.3). `delivery_id` is the idempotency key:
    /// calling this twice with the same `(key, delivery_id)` applies the
    /// delta only once.
    pub fn incr(
        &self,
        key: PerformanceContextKey,
        delivery_id: DeliveryId,
        delta: PerformanceCounters,
    ) -> CoreResult<()> {
        let mut entry = self.buckets.entry(key).or_insert_with(ContextEntry::new);
        if entry.record_delivery(delivery_id) {
            entry.counters.add(delta);
            entry.last_updated = Utc::now();
        } else {
            debug!(?delivery_id, "duplicate performance increment ignored");
        }
        Ok(())
    }

    /// `Get(key) -> counters` (§4.3).
    pub fn get(&self, key: PerformanceContextKey) -> PerformanceCounters {
        self.buckets
            .get(&key)
            .map(|entry| entry.counters)
            .unwrap_or_default()
    }

    /// `Snapshot(campaignID) -> map[contextKey]counters` (§4.3) — used by
    /// the Selection Engine to fetch bandit priors.
    pub fn snapshot(
        &self,
        campaign_id: CampaignId,
    ) -> Vec<(PerformanceContextKey, PerformanceCounters)> {
        self.buckets
            .iter()
            .filter(|entry| entry.key().campaign_id == campaign_id)
            .map(|entry| (*entry.key(), entry.value().counters))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dooh_core::types::DeviceClass;
    use uuid::Uuid;

    fn key(campaign_id: CampaignId) -> PerformanceContextKey {
        PerformanceContextKey {
            campaign_id,
            device_class: DeviceClass::DigitalSignage,
            hour_of_day: 12,
            day_of_week: 3,
        }
    }

    #[test]
    fn incr_is_idempotent_on_delivery_id() {
        let store = PerformanceStore::new();
        let campaign_id = Uuid::new_v4();
        let delivery_id = Uuid::new_v4();
        let k = key(campaign_id);
        let delta = PerformanceCounters {
            impressions: 4,
            engagements: 1,
            completions: 1,
        };

        store.incr(k, delivery_id, delta).unwrap();
        store.incr(k, delivery_id, delta).unwrap();

        let counters = store.get(k);
        assert_eq!(counters.impressions, 4);
        assert_eq!(counters.engagements, 1);
    }

    #[test]
    fn snapshot_only_includes_matching_campaign() {
        let store = PerformanceStore::new();
        let campaign_a = Uuid::new_v4();
        let campaign_b = Uuid::new_v4();

        store
            .incr(
                key(campaign_a),
                Uuid::new_v4(),
                PerformanceCounters { impressions: 1, ..Default::default() },
            )
            .unwrap();
        store
            .incr(
                key(campaign_b),
                Uuid::new_v4(),
                PerformanceCounters { impressions: 1, ..Default::default() },
            )
            .unwrap();

        let snapshot = store.snapshot(campaign_a);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0.campaign_id, campaign_a);
    }
}
