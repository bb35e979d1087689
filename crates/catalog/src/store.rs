use chrono::{DateTime, Datelike, Timelike, Utc};
use dashmap::DashMap;
use dooh_core::collaborators::{ContentModerator, ModerationVerdict};
use dooh_core::types::{
    Campaign, CampaignId, CampaignStatus, Creative, CreativeId, CreativeStatus, CreativeType,
    Device, DeviceId, DeviceStatus, VerificationMethod,
};
use dooh_core::{AuditAction, AuditLogEntry, CoreError, CoreResult};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Thread-safe in-memory catalog of campaigns, creatives, and devices.
///
/// Production: replace with a durable vendor store (PostgreSQL or similar).
/// This provides the same API surface for development and testing.
pub struct Catalog {
    campaigns: DashMap<CampaignId, Campaign>,
    creatives: DashMap<CreativeId, Creative>,
    devices: DashMap<DeviceId, Device>,
    /// Secondary index: `end_date` of every `status == Active` campaign,
    /// kept in sync on every `upsert_campaign`. Ordered on `end_date` so
    /// `list_eligible_campaigns` can range-query past a given slot and skip
    /// already-ended campaigns in sub-linear time, rather than scanning the
    /// full active set (§4.1 "(active-status, start-end)" index).
    active_by_end: RwLock<BTreeMap<(DateTime<Utc>, CampaignId), ()>>,
    /// `end_date` last indexed for each active campaign, so `upsert_campaign`
    /// can remove the stale `active_by_end` entry on an update.
    active_campaign_ids: DashMap<CampaignId, DateTime<Utc>>,
    audit_log: DashMap<Uuid, AuditLogEntry>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        info!("Catalog initialized (in-memory, development mode)");
        Self {
            campaigns: DashMap::new(),
            creatives: DashMap::new(),
            devices: DashMap::new(),
            active_by_end: RwLock::new(BTreeMap::new()),
            active_campaign_ids: DashMap::new(),
            audit_log: DashMap::new(),
        }
    }

    // ─── Campaigns ──────────────────────────────────────────────────────

    pub fn upsert_campaign(&self, campaign: Campaign) {
        let id = campaign.id;
        if let Some(prev_end) = self.active_campaign_ids.get(&id).map(|r| *r.value()) {
            self.active_by_end.write().unwrap().remove(&(prev_end, id));
        }
        if campaign.status == CampaignStatus::Active {
            self.active_campaign_ids.insert(id, campaign.end_date);
            self.active_by_end.write().unwrap().insert((campaign.end_date, id), ());
        } else {
            self.active_campaign_ids.remove(&id);
        }
        self.campaigns.insert(id, campaign);
        self.log_audit("system", AuditAction::Update, "campaign", &id.to_string(), serde_json::json!({}));
    }

    pub fn get_campaign(&self, id: CampaignId) -> Option<Campaign> {
        self.campaigns.get(&id).map(|r| r.value().clone())
    }

    pub fn list_campaigns(&self) -> Vec<Campaign> {
        self.campaigns.iter().map(|r| r.value().clone()).collect()
    }

    /// `ListEligibleCampaigns(device, slot) -> []CampaignHandle` (§4.1).
    ///
    /// A campaign is eligible iff: status=ACTIVE, `now` within its window,
    /// spend-to-date under budget, daily cap not exceeded, location and
    /// schedule targeting hold for `(device, slot)`, and it owns at least
    /// one APPROVED creative. Never blocks, never errors — returns empty on
    /// any internal inconsistency (a stale Catalog costs at most one
    /// misscheduled slot, rejected later by the Selection Engine).
    pub fn list_eligible_campaigns(&self, device: &Device, slot: DateTime<Utc>) -> Vec<Campaign> {
        let today = slot.date_naive();
        let hour = slot.hour() as u8;
        let day_of_week = slot.weekday().num_days_from_sunday() as u8;

        // Range past `slot` on the (active-status, end_date) index (§4.1):
        // active campaigns that already ended are pruned without touching
        // the full active set. `start_date` is still checked below via
        // `is_within_window`, but only against the surviving candidates.
        let candidate_ids: Vec<CampaignId> = self
            .active_by_end
            .read()
            .unwrap()
            .range((slot, Uuid::nil())..)
            .map(|(&(_, id), _)| id)
            .collect();

        candidate_ids
            .into_iter()
            .filter_map(|id| self.campaigns.get(&id).map(|c| c.value().clone()))
            .filter(|c| c.status == CampaignStatus::Active)
            .filter(|c| c.is_within_window(slot))
            .filter(|c| c.under_budget())
            .filter(|c| c.under_daily_cap(today))
            .filter(|c| location_targets_match(c, device))
            .filter(|c| c.schedule.matches(hour, day_of_week))
            .filter(|c| self.has_approved_creative(c))
            .collect()
    }

    fn has_approved_creative(&self, campaign: &Campaign) -> bool {
        campaign.creative_ids.iter().any(|id| {
            self.creatives
                .get(id)
                .map(|c| c.status == CreativeStatus::Approved)
                .unwrap_or(false)
        })
    }

    // ─── Creatives ──────────────────────────────────────────────────────

    pub fn upsert_creative(&self, creative: Creative) {
        let id = creative.id;
        self.creatives.insert(id, creative);
        self.log_audit("system", AuditAction::Update, "creative", &id.to_string(), serde_json::json!({}));
    }

    pub fn get_creative(&self, id: CreativeId) -> Option<Creative> {
        self.creatives.get(&id).map(|r| r.value().clone())
    }

    pub fn list_creatives_for_campaign(&self, campaign_id: CampaignId) -> Vec<Creative> {
        self.creatives
            .iter()
            .filter(|r| r.value().campaign_id == campaign_id)
            .map(|r| r.value().clone())
            .collect()
    }

    /// `VerifyCreative(creative) -> {APPROVED | REJECTED, reasons}` (§4.1).
    ///
    /// Runs deterministic policy checks (valid type, accessible URL, format
    /// whitelist, dimension bounds). An available external moderation
    /// oracle's verdict overrides; on oracle error the deterministic
    /// checks run instead and `verificationMethod=BASIC` is persisted (S4).
    pub fn verify_creative(
        &self,
        creative_id: CreativeId,
        moderator: &dyn ContentModerator,
    ) -> CoreResult<ModerationVerdict> {
        let creative = self
            .creatives
            .get(&creative_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| CoreError::NotFound(format!("creative {creative_id}")))?;

        let verdict = match moderator.moderate(&creative) {
            Ok(v) => v,
            Err(_) => self.deterministic_verify(&creative),
        };

        self.apply_verdict(creative_id, &verdict);
        Ok(verdict)
    }

    fn deterministic_verify(&self, creative: &Creative) -> ModerationVerdict {
        let mut reasons = Vec::new();

        if !(creative.url.starts_with("https://") || creative.url.starts_with("http://")) {
            reasons.push("creative URL is not a reachable HTTP(S) URL".to_string());
        }

        let allowed_formats = allowed_formats_for(creative.media_type);
        if !allowed_formats.contains(&creative.format.to_lowercase().as_str()) {
            reasons.push(format!(
                "format '{}' is not in the whitelist for {:?}",
                creative.format, creative.media_type
            ));
        }

        if let (Some(w), Some(h)) = (creative.width, creative.height) {
            if w == 0 || h == 0 || w > 7680 || h > 4320 {
                reasons.push("creative dimensions out of bounds".to_string());
            }
        }

        let status = if reasons.is_empty() {
            CreativeStatus::Approved
        } else {
            CreativeStatus::Rejected
        };

        ModerationVerdict {
            status,
            reasons,
            method: VerificationMethod::Basic,
        }
    }

    fn apply_verdict(&self, creative_id: CreativeId, verdict: &ModerationVerdict) {
        if let Some(mut entry) = self.creatives.get_mut(&creative_id) {
            entry.status = verdict.status;
            entry.verification_method = Some(verdict.method);
            entry.rejection_reasons = verdict.reasons.clone();
            entry.updated_at = Utc::now();
        }
        self.log_audit(
            "system",
            AuditAction::Update,
            "creative",
            &creative_id.to_string(),
            serde_json::json!({ "status": format!("{:?}", verdict.status), "method": format!("{:?}", verdict.method) }),
        );
    }

    // ─── Devices ────────────────────────────────────────────────────────

    pub fn upsert_device(&self, device: Device) {
        let id = device.id;
        self.devices.insert(id, device);
        self.log_audit("system", AuditAction::Update, "device", &id.to_string(), serde_json::json!({}));
    }

    pub fn get_device(&self, id: DeviceId) -> Option<Device> {
        self.devices.get(&id).map(|r| r.value().clone())
    }

    pub fn list_devices(&self) -> Vec<Device> {
        self.devices.iter().map(|r| r.value().clone()).collect()
    }

    /// Counts devices per status. Only the five declared `DeviceStatus`
    /// variants exist — there is no soft-deleted state to accidentally
    /// include (Design Note (b)).
    pub fn devices_by_status(&self) -> HashMap<DeviceStatus, usize> {
        let mut counts = HashMap::new();
        for entry in self.devices.iter() {
            *counts.entry(entry.status).or_insert(0) += 1;
        }
        counts
    }

    // ─── Audit log ──────────────────────────────────────────────────────

    fn log_audit(
        &self,
        actor: &str,
        action: AuditAction,
        resource_type: &str,
        resource_id: &str,
        details: serde_json::Value,
    ) {
        let entry = AuditLogEntry {
            id: Uuid::new_v4(),
            actor: actor.to_string(),
            action,
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            details,
            timestamp: Utc::now(),
        };
        self.audit_log.insert(entry.id, entry);
    }

    pub fn list_audit_log(&self) -> Vec<AuditLogEntry> {
        let mut entries: Vec<AuditLogEntry> =
            self.audit_log.iter().map(|r| r.value().clone()).collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries
    }
}

fn location_targets_match(campaign: &Campaign, device: &Device) -> bool {
    if campaign.location_targets.is_empty() {
        return true;
    }
    campaign.location_targets.iter().any(|target| {
        let type_ok = target
            .location_type
            .map(|t| t == device.location.location_type)
            .unwrap_or(true);
        let venue_ok = target.venue_tags.is_empty()
            || device
                .location
                .venue_name
                .as_ref()
                .map(|v| target.venue_tags.iter().any(|tag| tag == v))
                .unwrap_or(false);
        type_ok && venue_ok
    })
}

fn allowed_formats_for(media_type: CreativeType) -> &'static [&'static str] {
    match media_type {
        CreativeType::Image => &["jpg", "jpeg", "png", "webp"],
        CreativeType::Video => &["mp4", "webm", "mov"],
        CreativeType::Html => &["html", "zip"],
        CreativeType::Interactive => &["html", "zip"],
        CreativeType::Ar => &["usdz", "glb"],
        CreativeType::Voice => &["mp3", "wav"],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dooh_core::collaborators::NullContentModerator;
    use dooh_core::types::*;

    fn sample_device() -> Device {
        Device {
            id: Uuid::new_v4(),
            partner_id: Uuid::new_v4(),
            fingerprint: "dev-1".into(),
            class: DeviceClass::DigitalSignage,
            location: GeoLocation {
                lat: 40.0,
                lng: -73.0,
                venue_name: Some("Times Square".into()),
                location_type: LocationType::Urban,
            },
            status: DeviceStatus::Active,
            health: DeviceHealth::Healthy,
            last_seen: Utc::now(),
            registered_at: Utc::now(),
        }
    }

    fn sample_campaign(creative_ids: Vec<CreativeId>) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: Uuid::new_v4(),
            name: "C1".into(),
            advertiser_id: Uuid::new_v4(),
            status: CampaignStatus::Active,
            start_date: now - chrono::Duration::days(1),
            end_date: now + chrono::Duration::days(7),
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
            creative_ids,
            active_ab_test: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_creative(campaign_id: CampaignId, status: CreativeStatus) -> Creative {
        let now = Utc::now();
        Creative {
            id: Uuid::new_v4(),
            campaign_id,
            media_type: CreativeType::Video,
            url: "https://cdn.example.com/ad.mp4".into(),
            format: "mp4".into(),
            natural_duration_secs: Some(30),
            width: Some(1920),
            height: Some(1080),
            status,
            verification_method: None,
            rejection_reasons: vec![],
            impressions: 0,
            engagements: 0,
            attention_score_mean: 0.0,
            delivery_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn eligible_campaigns_require_approved_creative() {
        let catalog = Catalog::new();
        let device = sample_device();
        catalog.upsert_device(device.clone());

        let creative = sample_creative(Uuid::new_v4(), CreativeStatus::Pending);
        let campaign = sample_campaign(vec![creative.id]);
        catalog.upsert_creative(creative);
        catalog.upsert_campaign(campaign.clone());

        assert!(catalog.list_eligible_campaigns(&device, Utc::now()).is_empty());

        let mut approved = catalog.get_creative(catalog.list_creatives_for_campaign(campaign.id)[0].id).unwrap();
        approved.status = CreativeStatus::Approved;
        catalog.upsert_creative(approved);

        let eligible = catalog.list_eligible_campaigns(&device, Utc::now());
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, campaign.id);
    }

    #[test]
    fn ended_campaign_is_pruned_by_the_end_date_index() {
        let catalog = Catalog::new();
        let device = sample_device();
        catalog.upsert_device(device.clone());

        let creative = sample_creative(Uuid::new_v4(), CreativeStatus::Approved);
        let mut campaign = sample_campaign(vec![creative.id]);
        let now = Utc::now();
        campaign.start_date = now - chrono::Duration::days(10);
        campaign.end_date = now - chrono::Duration::days(1);
        catalog.upsert_creative(creative);
        catalog.upsert_campaign(campaign);

        assert!(catalog.list_eligible_campaigns(&device, now).is_empty());
    }

    #[test]
    fn reactivating_a_campaign_after_status_change_updates_the_index() {
        let catalog = Catalog::new();
        let device = sample_device();
        catalog.upsert_device(device.clone());

        let creative = sample_creative(Uuid::new_v4(), CreativeStatus::Approved);
        let campaign = sample_campaign(vec![creative.id]);
        let id = campaign.id;
        catalog.upsert_creative(creative);
        catalog.upsert_campaign(campaign.clone());
        assert_eq!(catalog.list_eligible_campaigns(&device, Utc::now()).len(), 1);

        let mut paused = campaign.clone();
        paused.status = CampaignStatus::Paused;
        catalog.upsert_campaign(paused);
        assert!(catalog.list_eligible_campaigns(&device, Utc::now()).is_empty());

        let mut reactivated = campaign;
        reactivated.status = CampaignStatus::Active;
        catalog.upsert_campaign(reactivated);
        let eligible = catalog.list_eligible_campaigns(&device, Utc::now());
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, id);
    }

    #[test]
    fn verify_creative_falls_back_to_basic_on_oracle_error() {
        let catalog = Catalog::new();
        let creative = sample_creative(Uuid::new_v4(), CreativeStatus::Pending);
        let id = creative.id;
        catalog.upsert_creative(creative);

        let verdict = catalog
            .verify_creative(id, &NullContentModerator)
            .expect("verification should not error");

        assert_eq!(verdict.status, CreativeStatus::Approved);
        assert_eq!(verdict.method, VerificationMethod::Basic);

        let persisted = catalog.get_creative(id).unwrap();
        assert_eq!(persisted.verification_method, Some(VerificationMethod::Basic));
    }

    #[test]
    fn verify_creative_rejects_bad_format() {
        let catalog = Catalog::new();
        let mut creative = sample_creative(Uuid::new_v4(), CreativeStatus::Pending);
        creative.format = "avi".into();
        let id = creative.id;
        catalog.upsert_creative(creative);

        let verdict = catalog.verify_creative(id, &NullContentModerator).unwrap();
        assert_eq!(verdict.status, CreativeStatus::Rejected);
        assert!(!verdict.reasons.is_empty());
    }

    #[test]
    fn devices_by_status_counts_only_declared_states() {
        let catalog = Catalog::new();
        catalog.upsert_device(sample_device());
        let counts = catalog.devices_by_status();
        assert_eq!(counts.get(&DeviceStatus::Active), Some(&1));
        assert_eq!(counts.values().sum::<usize>(), 1);
    }
}
