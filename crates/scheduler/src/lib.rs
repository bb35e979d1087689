//! Scheduler (C5) — builds and maintains per-device forward timelines,
//! reserves slots, and resolves conflicts by priority (§4.5).

use chrono::{DateTime, Duration, Timelike, Utc};
use dooh_cache::CatalogCache;
use dooh_catalog::Catalog;
use dooh_core::collaborators::ScheduleOptimizer;
use dooh_core::error::{CoreError, CoreResult};
use dooh_core::types::{
    Campaign, CampaignId, Creative, CreativeId, Delivery, DeliveryId, DeliveryState, Device, DeviceId,
};
use dooh_delivery::DeliveryTracker;
use dooh_performance::PerformanceStore;
use dooh_pricing::{rate_for_model, PricingEngine, PricingInputs};
use dooh_selection::{SelectionConfig, SelectionEngine};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub horizon_minutes: i64,
    pub slot_granularity_minutes: i64,
    /// Grace window added to `scheduledTime + G` before a SCHEDULED
    /// delivery is expired (§4.6), in minutes; defaults to one slot.
    pub grace_minutes: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            horizon_minutes: 60,
            slot_granularity_minutes: 5,
            grace_minutes: 5,
        }
    }
}

pub struct Scheduler<'a> {
    catalog: &'a Catalog,
    performance: &'a PerformanceStore,
    tracker: &'a DeliveryTracker<'a>,
    pricing: &'a PricingEngine,
    cache: Option<&'a CatalogCache<'a>>,
    config: SchedulerConfig,
    selection_config: SelectionConfig,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        catalog: &'a Catalog,
        performance: &'a PerformanceStore,
        tracker: &'a DeliveryTracker<'a>,
        pricing: &'a PricingEngine,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            catalog,
            performance,
            tracker,
            pricing,
            cache: None,
            config,
            selection_config: SelectionConfig::default(),
        }
    }

    /// Same as `new`, but routes the build cycle's eligibility lookups
    /// through a shared `CatalogCache` instead of hitting the Catalog
    /// directly on every unfilled slot (§4.1/§4.5).
    pub fn with_cache(
        catalog: &'a Catalog,
        performance: &'a PerformanceStore,
        tracker: &'a DeliveryTracker<'a>,
        pricing: &'a PricingEngine,
        cache: &'a CatalogCache<'a>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            catalog,
            performance,
            tracker,
            pricing,
            cache: Some(cache),
            config,
            selection_config: SelectionConfig::default(),
        }
    }

    /// Overrides the Selection Engine tunables (UCB1 constant, end-of-flight
    /// boost) this scheduler's build cycle hands to every `SelectionEngine`
    /// it constructs; defaults match `SelectionConfig::default()`.
    pub fn with_selection_config(mut self, selection_config: SelectionConfig) -> Self {
        self.selection_config = selection_config;
        self
    }

    fn eligible_campaigns(&self, device: &Device, slot: DateTime<Utc>) -> Vec<Campaign> {
        match self.cache {
            Some(cache) => cache.list_eligible_campaigns(device, slot),
            None => self.catalog.list_eligible_campaigns(device, slot),
        }
    }

    /// Per-device build cycle (§4.5 "Build cycle"): enumerates unfilled
    /// slots in `[now, now+H]`, fills each via the Selection Engine, and
    /// materializes `SCHEDULED` deliveries.
    pub fn build_device_timeline(&self, device: &Device, now: DateTime<Utc>) -> Vec<DeliveryId> {
        let granularity_duration = Duration::minutes(self.config.slot_granularity_minutes);
        let grace = Duration::minutes(self.config.grace_minutes.max(1));
        let expired = self.tracker.expire_stale(device.id, now, granularity_duration, grace);
        if !expired.is_empty() {
            debug!(device_id = %device.id, count = expired.len(), "expired stale scheduled deliveries");
        }

        if !device.schedulable() {
            debug!(device_id = %device.id, "device not schedulable, skipping build cycle");
            return Vec::new();
        }

        let horizon = Duration::minutes(self.config.horizon_minutes);
        let granularity = Duration::minutes(self.config.slot_granularity_minutes);
        let slots = self.candidate_slots(device, now, horizon, granularity);

        let selection = SelectionEngine::with_config(self.catalog, self.performance, self.selection_config);
        let mut created = Vec::new();

        for slot in slots {
            if self.tracker.overlapping(device.id, slot, slot).iter().any(|d| d.state != DeliveryState::Cancelled) {
                continue; // already filled
            }

            let mut eligible = self.eligible_campaigns(device, slot);

            // Budget guard (§4.5): a rejected pick (budget/daily-cap/conflict)
            // is retried once against the next-best campaign with the failed
            // one excluded; a second failure leaves the slot unfilled for
            // the Device Sync API's fallback content (S3).
            for attempt in 0..2 {
                let Some(pick) = selection.select(device, slot, &eligible) else {
                    debug!(device_id = %device.id, %slot, "no selection available, leaving slot for fallback");
                    break;
                };

                match self.schedule_ad(pick.campaign_id, pick.creative_id, device, slot, None, pick.duration_secs) {
                    Ok(id) => {
                        created.push(id);
                        break;
                    }
                    Err(err) => {
                        warn!(device_id = %device.id, %slot, attempt, error = %err, "failed to schedule slot");
                        eligible.retain(|c| c.id != pick.campaign_id);
                    }
                }
            }
        }

        created
    }

    /// Enumerates the slots this build cycle should attempt to fill.
    /// Target density comes from the device class's `target_slots_per_hour`
    /// (§4.5), adjusted ±20% in peak/off-peak hours using the Pricing
    /// Engine's time-of-day curve as the peak signal.
    fn candidate_slots(
        &self,
        device: &Device,
        now: DateTime<Utc>,
        horizon: Duration,
        granularity: Duration,
    ) -> Vec<DateTime<Utc>> {
        let slots_per_hour_at_granularity = (60 / self.config.slot_granularity_minutes).max(1);
        let mut slots = Vec::new();
        let mut cursor = next_slot_boundary(now, granularity);

        while cursor <= now + horizon {
            let time_multiplier = dooh_pricing::time_multipliers[cursor.hour() as usize];
            let peak_adjustment = if time_multiplier >= 1.2 {
                1.2
            } else if time_multiplier <= 0.8 {
                0.8
            } else {
                1.0
            };
            let target = (device.class.target_slots_per_hour() as f64 * peak_adjustment).round() as i64;
            let fill_stride = (slots_per_hour_at_granularity as f64 / target.max(1) as f64)
                .round()
                .max(1.0) as i64;

            let slot_index_in_hour = cursor.minute() / self.config.slot_granularity_minutes as u32;
            if (slot_index_in_hour as i64) % fill_stride == 0 {
                slots.push(cursor);
            }
            cursor += granularity;
        }

        slots
    }

    /// `scheduleAd(campaign, device, time, priority)` (§4.5 "Conflict /
    /// overlap policy" + "Budget guard").
    pub fn schedule_ad(
        &self,
        campaign_id: CampaignId,
        creative_id: CreativeId,
        device: &Device,
        time: DateTime<Utc>,
        priority_override: Option<i32>,
        duration_secs: u32,
    ) -> CoreResult<DeliveryId> {
        let granularity_secs = self.config.slot_granularity_minutes * 60;
        if duration_secs as i64 > granularity_secs {
            return Err(CoreError::NoFittingSlot(format!(
                "creative duration {duration_secs}s exceeds slot granularity {granularity_secs}s"
            )));
        }

        let campaign = self
            .catalog
            .get_campaign(campaign_id)
            .ok_or_else(|| CoreError::NotFound(format!("campaign {campaign_id}")))?;
        let creative = self
            .catalog
            .get_creative(creative_id)
            .ok_or_else(|| CoreError::NotFound(format!("creative {creative_id}")))?;

        let priority = dooh_core::types::clamp_priority(priority_override.unwrap_or(campaign.default_priority));
        let half = Duration::seconds(duration_secs as i64);
        let start = time - half;
        let end = time + half;

        let overlapping = self.tracker.overlapping(device.id, start, end);
        let to_cancel: Vec<DeliveryId> = if overlapping.is_empty() {
            Vec::new()
        } else if overlapping.iter().all(|d| d.priority < priority) {
            overlapping.iter().map(|d| d.id).collect()
        } else {
            return Err(CoreError::SlotOccupied(format!(
                "device {} slot at {time} is occupied by a delivery of equal or higher priority",
                device.id
            )));
        };

        let projected_cost = self.estimate_cost(&campaign, &creative, device, time)?;
        if !self.within_budget(&campaign, projected_cost) {
            return Err(CoreError::PolicyRejected(format!(
                "projected cost {projected_cost:.4} would exceed campaign {campaign_id} budget"
            )));
        }

        for delivery_id in &to_cancel {
            self.tracker
                .cancel(*delivery_id, "preempted-by-higher-priority")?;
        }

        let delivery = Delivery {
            id: Uuid::new_v4(),
            campaign_id,
            creative_id,
            device_id: device.id,
            scheduled_time: time,
            duration_secs,
            priority,
            state: DeliveryState::Scheduled,
            actual_play_time: None,
            impressions: 0,
            engagements: 0,
            completions: 0,
            cost: projected_cost,
            metadata: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        self.tracker.create_scheduled(delivery)
    }

    fn estimate_cost(
        &self,
        campaign: &Campaign,
        creative: &Creative,
        device: &Device,
        slot: DateTime<Utc>,
    ) -> CoreResult<f64> {
        let inputs = PricingInputs {
            pricing_model: campaign.pricing_model,
            creative_type: creative.media_type,
            objective: Some(campaign.objective),
            device_class: device.class,
            location_type: device.location.location_type,
            slot_time: slot,
            historical_average: self.historical_average_cpm(campaign),
            demand_level: Some(self.demand_level(device.id, slot)),
        };
        let curve = self.pricing.price(inputs)?;
        // Price against the unit the campaign is actually billed under
        // (§8 invariant 3), not always CPM.
        Ok(rate_for_model(campaign.pricing_model, &curve.adjusted_rate))
    }

    /// Observed effective CPM for this campaign, once it has crossed
    /// `HISTORICAL_BLEND_THRESHOLD` impressions (§4.2 step 1): `None` before
    /// then, so `PricingEngine::price` stays on the pure base-rate table.
    fn historical_average_cpm(&self, campaign: &Campaign) -> Option<f64> {
        let total_impressions: u64 = self
            .performance
            .snapshot(campaign.id)
            .iter()
            .map(|(_, counters)| counters.impressions)
            .sum();

        if total_impressions < self.pricing.historical_blend_threshold() {
            return None;
        }

        Some(campaign.spend_to_date / total_impressions as f64 * 1000.0)
    }

    fn within_budget(&self, campaign: &Campaign, projected_cost: f64) -> bool {
        let under_total = campaign.spend_to_date + projected_cost <= campaign.total_budget;
        let under_daily = campaign
            .daily_cap
            .map(|cap| campaign.spend_today + projected_cost <= cap)
            .unwrap_or(true);
        under_total && under_daily
    }

    /// Fraction of slots reserved in the next hour on this device — the
    /// demand signal the Pricing Engine reads (§4.2 step 4).
    fn demand_level(&self, device_id: DeviceId, now: DateTime<Utc>) -> f64 {
        let granularity = Duration::minutes(self.config.slot_granularity_minutes);
        let total_slots = (Duration::hours(1).num_minutes() / granularity.num_minutes()).max(1);
        let reserved = self
            .tracker
            .overlapping(device_id, now, now + Duration::hours(1))
            .len() as i64;
        (reserved as f64 / total_slots as f64).clamp(0.0, 1.0)
    }

    /// Optimization mode (§4.5): defers to an external `ScheduleOptimizer`
    /// when available; falls back to `build_device_timeline` on failure.
    pub fn build_with_optimizer(
        &self,
        device: &Device,
        now: DateTime<Utc>,
        optimizer: &dyn ScheduleOptimizer,
        slot_count: usize,
    ) -> Vec<DeliveryId> {
        match optimizer.optimize(device.id, slot_count) {
            Ok(assignments) => {
                info!(device_id = %device.id, count = assignments.len(), "applying external schedule optimization");
                let granularity = Duration::minutes(self.config.slot_granularity_minutes);
                assignments
                    .into_iter()
                    .filter_map(|assignment| {
                        let slot_time = now + granularity * assignment.slot_index as i32;
                        let creative = self.catalog.get_creative(assignment.creative_id)?;
                        self.schedule_ad(
                            assignment.campaign_id,
                            assignment.creative_id,
                            device,
                            slot_time,
                            None,
                            creative.display_duration_secs(),
                        )
                        .ok()
                    })
                    .collect()
            }
            Err(err) => {
                warn!(device_id = %device.id, error = %err, "schedule optimizer failed, falling back to deterministic selection");
                self.build_device_timeline(device, now)
            }
        }
    }
}

fn next_slot_boundary(now: DateTime<Utc>, granularity: Duration) -> DateTime<Utc> {
    let minutes = granularity.num_minutes().max(1);
    let remainder = now.minute() as i64 % minutes;
    if remainder == 0 && now.second() == 0 {
        now
    } else {
        now + Duration::minutes(minutes - remainder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dooh_core::types::DEFAULT_PRIORITY;

    #[test]
    fn next_slot_boundary_rounds_up_to_granularity() {
        let now = Utc::now().date_naive().and_hms_opt(10, 3, 0).unwrap().and_utc();
        let boundary = next_slot_boundary(now, Duration::minutes(5));
        assert_eq!(boundary.minute(), 5);
    }

    #[test]
    fn oversized_creative_rejected_with_no_fitting_slot() {
        let catalog = Catalog::new();
        let performance = PerformanceStore::new();
        let tracker = DeliveryTracker::new(&catalog, &performance);
        let pricing = PricingEngine::default();
        let scheduler = Scheduler::new(&catalog, &performance, &tracker, &pricing, SchedulerConfig::default());

        let device = sample_device();
        catalog.upsert_device(device.clone());
        let campaign_id = Uuid::new_v4();
        catalog.upsert_campaign(sample_campaign(campaign_id));

        let result = scheduler.schedule_ad(
            campaign_id,
            Uuid::new_v4(),
            &device,
            Utc::now(),
            None,
            600, // 10 minutes, exceeds the default 5-minute granularity
        );
        assert!(matches!(result, Err(CoreError::NoFittingSlot(_))));
    }

    #[test]
    fn offline_device_produces_no_new_deliveries() {
        // S5 "Device offline": health=OFFLINE must stop the build cycle even
        // though status is still ACTIVE.
        let catalog = Catalog::new();
        let performance = PerformanceStore::new();
        let tracker = DeliveryTracker::new(&catalog, &performance);
        let pricing = PricingEngine::default();
        let scheduler = Scheduler::new(&catalog, &performance, &tracker, &pricing, SchedulerConfig::default());

        let mut device = sample_device();
        device.health = dooh_core::types::DeviceHealth::Offline;
        catalog.upsert_device(device.clone());

        let created = scheduler.build_device_timeline(&device, Utc::now());
        assert!(created.is_empty());
    }

    #[test]
    fn stale_scheduled_delivery_expires_on_build_cycle() {
        // §4.6 "SCHEDULED -> EXPIRED if not promoted within
        // slotTime + G + graceWindow".
        let catalog = Catalog::new();
        let performance = PerformanceStore::new();
        let tracker = DeliveryTracker::new(&catalog, &performance);
        let pricing = PricingEngine::default();
        let config = SchedulerConfig::default();
        let scheduler = Scheduler::new(&catalog, &performance, &tracker, &pricing, config);

        let device = sample_device();
        catalog.upsert_device(device.clone());

        let now = Utc::now();
        let stale_time = now - Duration::minutes(2 * config.slot_granularity_minutes + config.grace_minutes + 1);
        let delivery_id = Uuid::new_v4();
        tracker
            .create_scheduled(Delivery {
                id: delivery_id,
                campaign_id: Uuid::new_v4(),
                creative_id: Uuid::new_v4(),
                device_id: device.id,
                scheduled_time: stale_time,
                duration_secs: 30,
                priority: DEFAULT_PRIORITY,
                state: DeliveryState::Scheduled,
                actual_play_time: None,
                impressions: 0,
                engagements: 0,
                completions: 0,
                cost: 0.0,
                metadata: Vec::new(),
                created_at: stale_time,
                updated_at: stale_time,
            })
            .unwrap();

        scheduler.build_device_timeline(&device, now);

        assert_eq!(tracker.get(delivery_id).unwrap().state, DeliveryState::Expired);
    }

    #[test]
    fn daily_cap_rejects_when_projected_cost_would_exceed_it() {
        // S3 "Daily cap hit": a campaign that has nearly exhausted its
        // daily cap is rejected by the budget guard even though its total
        // budget has plenty of headroom.
        let catalog = Catalog::new();
        let performance = PerformanceStore::new();
        let tracker = DeliveryTracker::new(&catalog, &performance);
        let pricing = PricingEngine::default();
        let scheduler = Scheduler::new(&catalog, &performance, &tracker, &pricing, SchedulerConfig::default());

        let device = sample_device();
        catalog.upsert_device(device.clone());
        let campaign_id = Uuid::new_v4();
        let mut campaign = sample_campaign(campaign_id);
        campaign.daily_cap = Some(0.0001);
        campaign.spend_today = 0.0;
        catalog.upsert_campaign(campaign);
        let creative_id = Uuid::new_v4();
        catalog.upsert_creative(sample_creative(creative_id, campaign_id));

        let result = scheduler.schedule_ad(campaign_id, creative_id, &device, Utc::now() + Duration::minutes(10), None, 30);
        assert!(matches!(result, Err(CoreError::PolicyRejected(_))), "expected PolicyRejected, got {result:?}");
    }

    #[test]
    fn cpa_campaign_is_priced_against_cpa_rate_not_cpm() {
        // §8 invariant 3: the pre-commit budget guard must estimate cost
        // against the campaign's own pricing model, not always CPM.
        let catalog = Catalog::new();
        let performance = PerformanceStore::new();
        let tracker = DeliveryTracker::new(&catalog, &performance);
        let pricing = PricingEngine::default();
        let scheduler = Scheduler::new(&catalog, &performance, &tracker, &pricing, SchedulerConfig::default());

        let device = sample_device();
        catalog.upsert_device(device.clone());
        let campaign_id = Uuid::new_v4();
        let mut campaign = sample_campaign(campaign_id);
        campaign.pricing_model = dooh_core::types::PricingModel::Cpa;
        catalog.upsert_campaign(campaign);
        let creative_id = Uuid::new_v4();
        catalog.upsert_creative(sample_creative(creative_id, campaign_id));

        let delivery_id = scheduler
            .schedule_ad(campaign_id, creative_id, &device, Utc::now() + Duration::minutes(10), None, 30)
            .unwrap();

        // CPA base rate ($2) is two orders of magnitude above a per-impression
        // CPM figure (~$0.005); a CPM-shaped estimate would be far smaller.
        let delivery = tracker.get(delivery_id).unwrap();
        assert!(delivery.cost > 0.1, "expected CPA-shaped cost, got {}", delivery.cost);
    }

    fn sample_device() -> Device {
        use dooh_core::types::{DeviceClass, DeviceHealth, DeviceStatus, GeoLocation, LocationType};
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

    struct FakeOptimizer {
        assignment: dooh_core::collaborators::OptimizedAssignment,
    }

    impl ScheduleOptimizer for FakeOptimizer {
        fn optimize(
            &self,
            _device_id: DeviceId,
            _slot_count: usize,
        ) -> Result<Vec<dooh_core::collaborators::OptimizedAssignment>, anyhow::Error> {
            Ok(vec![dooh_core::collaborators::OptimizedAssignment {
                slot_index: self.assignment.slot_index,
                campaign_id: self.assignment.campaign_id,
                creative_id: self.assignment.creative_id,
            }])
        }
    }

    #[test]
    fn build_with_optimizer_applies_external_assignment() {
        let catalog = Catalog::new();
        let performance = PerformanceStore::new();
        let tracker = DeliveryTracker::new(&catalog, &performance);
        let pricing = PricingEngine::default();
        let scheduler = Scheduler::new(&catalog, &performance, &tracker, &pricing, SchedulerConfig::default());

        let device = sample_device();
        catalog.upsert_device(device.clone());
        let campaign_id = Uuid::new_v4();
        catalog.upsert_campaign(sample_campaign(campaign_id));
        let creative_id = Uuid::new_v4();
        catalog.upsert_creative(sample_creative(creative_id, campaign_id));

        let optimizer = FakeOptimizer {
            assignment: dooh_core::collaborators::OptimizedAssignment {
                slot_index: 0,
                campaign_id,
                creative_id,
            },
        };

        let created = scheduler.build_with_optimizer(&device, Utc::now(), &optimizer, 1);
        assert_eq!(created.len(), 1);
    }

    #[test]
    fn build_with_optimizer_falls_back_when_optimizer_errors() {
        use dooh_core::collaborators::NullScheduleOptimizer;

        let catalog = Catalog::new();
        let performance = PerformanceStore::new();
        let tracker = DeliveryTracker::new(&catalog, &performance);
        let pricing = PricingEngine::default();
        let scheduler = Scheduler::new(&catalog, &performance, &tracker, &pricing, SchedulerConfig::default());

        let campaign_id = Uuid::new_v4();
        catalog.upsert_campaign(sample_campaign(campaign_id));
        let creative_id = Uuid::new_v4();
        catalog.upsert_creative(sample_creative(creative_id, campaign_id));

        let device_a = sample_device();
        catalog.upsert_device(device_a.clone());
        let via_optimizer = scheduler.build_with_optimizer(&device_a, Utc::now(), &NullScheduleOptimizer, 1);

        let device_b = sample_device();
        catalog.upsert_device(device_b.clone());
        let via_deterministic = scheduler.build_device_timeline(&device_b, Utc::now());

        assert!(!via_deterministic.is_empty());
        assert_eq!(via_optimizer.len(), via_deterministic.len());
    }

    fn sample_creative(id: CreativeId, campaign_id: CampaignId) -> dooh_core::types::Creative {
        use dooh_core::types::{CreativeStatus, CreativeType, VerificationMethod};
        let now = Utc::now();
        dooh_core::types::Creative {
            id,
            campaign_id,
            media_type: CreativeType::Video,
            url: "https://cdn.example.com/ad.mp4".into(),
            format: "mp4".into(),
            natural_duration_secs: Some(15),
            width: Some(1920),
            height: Some(1080),
            status: CreativeStatus::Approved,
            verification_method: Some(VerificationMethod::Basic),
            rejection_reasons: vec![],
            impressions: 0,
            engagements: 0,
            attention_score_mean: 0.0,
            delivery_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_campaign(id: CampaignId) -> Campaign {
        use dooh_core::types::{CampaignStatus, Objective, PricingModel, TargetingSchedule};
        let now = Utc::now();
        Campaign {
            id,
            name: "C1".into(),
            advertiser_id: Uuid::new_v4(),
            status: CampaignStatus::Active,
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(7),
            total_budget: 100.0,
            daily_cap: None,
            spend_to_date: 0.0,
            spend_today: 0.0,
            spend_day: now.date_naive(),
            pricing_model: PricingModel::Cpm,
            objective: Objective::Awareness,
            default_priority: DEFAULT_PRIORITY,
            location_targets: vec![],
            schedule: TargetingSchedule::default(),
            demographic_filters: vec![],
            creative_ids: vec![],
            active_ab_test: None,
            created_at: now,
            updated_at: now,
        }
    }
}
