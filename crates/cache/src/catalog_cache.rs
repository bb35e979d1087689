//! Read-through L1 cache in front of the Catalog's eligibility query
//! (§4.1 `ListEligibleCampaigns`). Adapted from the teacher's two-tier
//! `RedisCache` (`L1 LocalCache -> L2 Redis`) with the L2 network tier
//! dropped — this core has no multi-node deployment requirement, so the L1
//! layer is the only tier (see `DESIGN.md` "Dropped from the teacher").

use crate::local::LocalCache;
use chrono::{DateTime, Datelike, Timelike, Utc};
use dooh_catalog::Catalog;
use dooh_core::types::{Campaign, Device, DeviceId};
use tracing::debug;

/// Eligibility results are bucketed to the minute — fine enough that a
/// cache hit still reflects "this slot", coarse enough that a device
/// polling every few seconds doesn't force a full catalog scan each time.
fn slot_bucket(slot: DateTime<Utc>) -> i64 {
    slot.timestamp() / 60
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct EligibilityKey {
    device_id: DeviceId,
    bucket: i64,
}

/// Wraps a `Catalog` reference with a short-TTL L1 cache over
/// `list_eligible_campaigns`, the Catalog's hottest read path (called once
/// per unfilled slot, per device, on every Scheduler build cycle).
pub struct CatalogCache<'a> {
    catalog: &'a Catalog,
    eligible: LocalCache<EligibilityKey, Vec<Campaign>>,
}

impl<'a> CatalogCache<'a> {
    /// `ttl_secs` should stay below the slot granularity `G` — a stale hit
    /// costs at most one misscheduled slot, per the Catalog's failure
    /// contract (§4.1), same tolerance the Scheduler already budgets for.
    pub fn new(catalog: &'a Catalog, ttl_secs: u64, max_entries: usize) -> Self {
        Self {
            catalog,
            eligible: LocalCache::new(ttl_secs, max_entries),
        }
    }

    pub fn list_eligible_campaigns(&self, device: &Device, slot: DateTime<Utc>) -> Vec<Campaign> {
        let key = EligibilityKey {
            device_id: device.id,
            bucket: slot_bucket(slot),
        };

        if let Some(cached) = self.eligible.get(&key) {
            metrics::counter!("catalog_cache.l1.hit").increment(1);
            return (*cached).clone();
        }
        metrics::counter!("catalog_cache.l1.miss").increment(1);

        let campaigns = self.catalog.list_eligible_campaigns(device, slot);
        self.eligible.put(key, campaigns.clone());
        debug!(
            device_id = %device.id,
            hour = slot.hour(),
            dow = slot.weekday().num_days_from_sunday(),
            count = campaigns.len(),
            "catalog eligibility computed and cached"
        );
        campaigns
    }

    /// Invalidates every cached bucket for a device — called after a
    /// mutating Catalog operation (campaign pause, creative rejection)
    /// that could change this device's eligible set before the TTL lapses.
    pub fn invalidate_device(&self, device_id: DeviceId, slot: DateTime<Utc>) {
        self.eligible.invalidate(&EligibilityKey {
            device_id,
            bucket: slot_bucket(slot),
        });
    }

    pub fn l1_size(&self) -> usize {
        self.eligible.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dooh_core::types::*;
    use uuid::Uuid;

    fn sample_device() -> Device {
        Device {
            id: Uuid::new_v4(),
            partner_id: Uuid::new_v4(),
            fingerprint: "dev-1".into(),
            class: DeviceClass::DigitalSignage,
            location: GeoLocation {
                lat: 40.0,
                lng: -73.0,
                venue_name: None,
                location_type: LocationType::Urban,
            },
            status: DeviceStatus::Active,
            health: DeviceHealth::Healthy,
            last_seen: Utc::now(),
            registered_at: Utc::now(),
        }
    }

    #[test]
    fn repeated_queries_within_bucket_hit_cache() {
        let catalog = Catalog::new();
        let device = sample_device();
        catalog.upsert_device(device.clone());
        let cache = CatalogCache::new(&catalog, 60, 1000);

        let now = Utc::now();
        let first = cache.list_eligible_campaigns(&device, now);
        let second = cache.list_eligible_campaigns(&device, now);
        assert_eq!(first.len(), second.len());
        assert_eq!(cache.l1_size(), 1);
    }

    #[test]
    fn invalidate_forces_recompute() {
        let catalog = Catalog::new();
        let device = sample_device();
        catalog.upsert_device(device.clone());
        let cache = CatalogCache::new(&catalog, 60, 1000);

        let now = Utc::now();
        cache.list_eligible_campaigns(&device, now);
        cache.invalidate_device(device.id, now);
        assert_eq!(cache.l1_size(), 0);
    }
}
