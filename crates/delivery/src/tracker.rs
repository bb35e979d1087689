use crate::billing::{cost_for, BillingEvent, DeliveryCounters};
use chrono::{DateTime, Datelike, Timelike, Utc};
use dashmap::DashMap;
use dooh_catalog::Catalog;
use dooh_core::error::{CoreError, CoreResult};
use dooh_core::types::{
    Delivery, DeliveryId, DeliveryMetadata, DeliveryState, DeviceId, ErrorKind,
    PerformanceContextKey, PlaybackReport,
};
use dooh_performance::PerformanceStore;
use tracing::{info, warn};

/// Owns every `Delivery` row after the Scheduler creates it (§4.6).
pub struct DeliveryTracker<'a> {
    deliveries: DashMap<DeliveryId, Delivery>,
    by_device: DashMap<DeviceId, Vec<DeliveryId>>,
    catalog: &'a Catalog,
    performance: &'a PerformanceStore,
}

impl<'a> DeliveryTracker<'a> {
    pub fn new(catalog: &'a Catalog, performance: &'a PerformanceStore) -> Self {
        Self {
            deliveries: DashMap::new(),
            by_device: DashMap::new(),
            catalog,
            performance,
        }
    }

    /// Inserts a newly materialized `SCHEDULED` delivery. Callers (the
    /// Scheduler) are responsible for conflict resolution before calling
    /// this — the Delivery row is inserted last, after all checks pass, so
    /// a cancelled rebuild never leaves a half-written row (§5 Cancellation).
    pub fn create_scheduled(&self, delivery: Delivery) -> CoreResult<DeliveryId> {
        if delivery.state != DeliveryState::Scheduled {
            return Err(CoreError::InvalidParameter(
                "new deliveries must start in SCHEDULED".into(),
            ));
        }
        let id = delivery.id;
        let device_id = delivery.device_id;
        self.deliveries.insert(id, delivery);
        self.by_device.entry(device_id).or_default().push(id);
        Ok(id)
    }

    pub fn get(&self, delivery_id: DeliveryId) -> Option<Delivery> {
        self.deliveries.get(&delivery_id).map(|r| r.value().clone())
    }

    pub fn list_for_device(&self, device_id: DeviceId) -> Vec<Delivery> {
        self.by_device
            .get(&device_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.deliveries.get(id).map(|r| r.value().clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Deliveries in `SCHEDULED` or `DELIVERING` intersecting `[start, end]`
    /// on `device_id`, used by the Scheduler's conflict/overlap policy (§4.5).
    pub fn overlapping(&self, device_id: DeviceId, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Delivery> {
        self.list_for_device(device_id)
            .into_iter()
            .filter(|d| matches!(d.state, DeliveryState::Scheduled | DeliveryState::Delivering))
            .filter(|d| d.overlaps(start, end))
            .collect()
    }

    /// Cancels a delivery with a recorded reason (preemption, campaign
    /// pause/stop). Any non-terminal state may be cancelled.
    pub fn cancel(&self, delivery_id: DeliveryId, reason: &str) -> CoreResult<()> {
        let mut entry = self
            .deliveries
            .get_mut(&delivery_id)
            .ok_or_else(|| CoreError::NotFound(format!("delivery {delivery_id}")))?;

        if entry.state.is_terminal() {
            return Ok(());
        }
        if !entry.state.can_transition_to(DeliveryState::Cancelled) {
            return Err(CoreError::Fatal(format!(
                "cannot cancel delivery {delivery_id} from state {:?}",
                entry.state
            )));
        }

        entry.state = DeliveryState::Cancelled;
        entry.metadata.push(DeliveryMetadata::Reason(reason.to_string()));
        entry.updated_at = Utc::now();
        info!(%delivery_id, reason, "delivery cancelled");
        Ok(())
    }

    /// `SCHEDULED → DELIVERING` on device pull (§4.6). Promotes the
    /// earliest eligible `SCHEDULED` entry for `device_id` whose
    /// `scheduledTime <= now + lookahead`.
    pub fn promote_next(
        &self,
        device_id: DeviceId,
        now: DateTime<Utc>,
        lookahead: chrono::Duration,
    ) -> Option<Delivery> {
        let candidate_id = self
            .list_for_device(device_id)
            .into_iter()
            .filter(|d| d.state == DeliveryState::Scheduled)
            .filter(|d| d.scheduled_time <= now + lookahead)
            .min_by_key(|d| d.scheduled_time)
            .map(|d| d.id)?;

        let mut entry = self.deliveries.get_mut(&candidate_id)?;
        entry.state = DeliveryState::Delivering;
        entry.actual_play_time = Some(now);
        entry.updated_at = now;
        Some(entry.value().clone())
    }

    /// `SCHEDULED → EXPIRED` for entries not promoted within
    /// `scheduledTime + G + grace` (§4.6). `grace` defaults to one slot
    /// (`slot_granularity`) per the spec but callers may widen it via
    /// `SchedulerConfig::grace_minutes`.
    pub fn expire_stale(
        &self,
        device_id: DeviceId,
        now: DateTime<Utc>,
        slot_granularity: chrono::Duration,
        grace: chrono::Duration,
    ) -> Vec<DeliveryId> {
        let mut expired = Vec::new();
        for delivery_id in self
            .list_for_device(device_id)
            .into_iter()
            .filter(|d| d.state == DeliveryState::Scheduled)
            .filter(|d| now > d.scheduled_time + slot_granularity + grace)
            .map(|d| d.id)
        {
            if let Some(mut entry) = self.deliveries.get_mut(&delivery_id) {
                entry.state = DeliveryState::Expired;
                entry.updated_at = now;
                expired.push(delivery_id);
            }
        }
        expired
    }

    /// Applies a playback report, driving the state machine (§4.6).
    /// Idempotent: a duplicate report against an already-`DELIVERED` or
    /// otherwise terminal delivery is a no-op returning the stored row.
    pub fn report_playback(
        &self,
        delivery_id: DeliveryId,
        report: PlaybackReport,
    ) -> CoreResult<(Delivery, Option<BillingEvent>)> {
        let mut entry = self
            .deliveries
            .get_mut(&delivery_id)
            .ok_or_else(|| CoreError::NotFound(format!("delivery {delivery_id}")))?;

        if entry.state.is_terminal() {
            return Ok((entry.value().clone(), None));
        }

        if entry.state != DeliveryState::Delivering {
            return Err(CoreError::InvalidParameter(format!(
                "playback report received while delivery {delivery_id} is in state {:?}",
                entry.state
            )));
        }

        let duration = entry.duration_secs;
        let is_delivered = report.is_delivered(duration);
        let is_failed = report.is_failed();

        if is_delivered {
            let estimated_count = report
                .viewer_metrics
                .as_ref()
                .map(|snapshot| snapshot.estimated_count as u64)
                .unwrap_or(1);
            let engagement_count = if report.is_engaged() { estimated_count } else { 0 };

            entry.state = DeliveryState::Delivered;
            entry.impressions += estimated_count;
            entry.engagements += engagement_count;
            entry.completions += 1;
            entry.metadata.push(DeliveryMetadata::Playback(report.clone()));
            entry.updated_at = Utc::now();

            let counters = DeliveryCounters {
                impressions: estimated_count,
                engagements: engagement_count,
                completions: 1,
            };
            let delivery_snapshot = entry.value().clone();
            drop(entry);

            let billing_event = self.on_delivered(&delivery_snapshot, counters, &report);
            Ok((delivery_snapshot, billing_event))
        } else if is_failed {
            entry.state = DeliveryState::Failed;
            entry
                .metadata
                .push(DeliveryMetadata::Error(ErrorKind::PlaybackReportMissing));
            entry.updated_at = Utc::now();
            warn!(%delivery_id, "delivery failed: interrupted playback");
            Ok((entry.value().clone(), None))
        } else {
            // Neither threshold met: leave DELIVERING, record the partial
            // report for audit but do not transition.
            entry.metadata.push(DeliveryMetadata::Playback(report));
            entry.updated_at = Utc::now();
            Ok((entry.value().clone(), None))
        }
    }

    /// Audience metrics fan-out on `DELIVERED` (§4.6): campaign aggregate
    /// counters, creative running performance + attention score, bandit
    /// priors, and the billing event.
    fn on_delivered(
        &self,
        delivery: &Delivery,
        counters: DeliveryCounters,
        report: &PlaybackReport,
    ) -> Option<BillingEvent> {
        let campaign = self.catalog.get_campaign(delivery.campaign_id)?;
        let cost = cost_for(campaign.pricing_model, counters);

        let mut updated_campaign = campaign.clone();
        updated_campaign.spend_to_date += cost;
        let today = delivery.scheduled_time.date_naive();
        if updated_campaign.spend_day != today {
            updated_campaign.spend_day = today;
            updated_campaign.spend_today = 0.0;
        }
        updated_campaign.spend_today += cost;
        self.catalog.upsert_campaign(updated_campaign);

        if let Some(mut creative) = self.catalog.get_creative(delivery.creative_id) {
            creative.impressions += counters.impressions;
            creative.engagements += counters.engagements;
            if let Some(snapshot) = &report.viewer_metrics {
                if let Some(attention) = snapshot.attention_score {
                    let n = creative.delivery_count as f64;
                    creative.attention_score_mean =
                        (creative.attention_score_mean * n + attention) / (n + 1.0);
                }
            }
            creative.delivery_count += 1;
            self.catalog.upsert_creative(creative);
        }

        let context = PerformanceContextKey {
            campaign_id: delivery.campaign_id,
            device_class: campaign_device_class(delivery, self.catalog),
            hour_of_day: delivery.scheduled_time.hour() as u8,
            day_of_week: delivery.scheduled_time.weekday().num_days_from_sunday() as u8,
        };
        let delta = dooh_core::types::PerformanceCounters {
            impressions: counters.impressions,
            engagements: counters.engagements,
            completions: counters.completions,
        };
        // Telemetry-only: retried per §7 TransientStorage policy, then
        // swallowed on exhaustion rather than blocking the state transition.
        if let Err(err) = dooh_core::retry_transient(|| self.performance.incr(context, delivery.id, delta)) {
            warn!(delivery_id = %delivery.id, error = %err, "performance counter increment failed after retries");
            metrics::counter!("delivery.performance_incr_failed").increment(1);
        }

        Some(BillingEvent {
            delivery_id: delivery.id,
            campaign_id: delivery.campaign_id,
            advertiser_id: campaign.advertiser_id,
            impressions: counters.impressions,
            engagements: counters.engagements,
            completions: counters.completions,
            pricing_model: campaign.pricing_model,
            cost,
            timestamp: Utc::now(),
        })
    }
}

fn campaign_device_class(delivery: &Delivery, catalog: &Catalog) -> dooh_core::types::DeviceClass {
    catalog
        .get_device(delivery.device_id)
        .map(|d| d.class)
        .unwrap_or(dooh_core::types::DeviceClass::DigitalSignage)
}
