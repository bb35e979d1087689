//! Domain model for the Ad Delivery Core: Campaign, Creative, Device,
//! Delivery, PerformanceBucket, PriceCurve and their supporting types.
//!
//! Cross-entity references are always opaque `Uuid`s resolved through the
//! Catalog — no entity embeds another entity or a loosely-typed metadata
//! blob; `DeliveryMetadata` is the one tagged-variant sum in this model and
//! it only carries data that genuinely has no other typed home.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type CampaignId = Uuid;
pub type CreativeId = Uuid;
pub type DeviceId = Uuid;
pub type DeliveryId = Uuid;
pub type AdvertiserId = Uuid;
pub type PartnerId = Uuid;

pub const DEFAULT_PRIORITY: i32 = 5;
pub const MIN_PRIORITY: i32 = 1;
pub const MAX_PRIORITY: i32 = 10;

pub fn clamp_priority(priority: i32) -> i32 {
    priority.clamp(MIN_PRIORITY, MAX_PRIORITY)
}

// ─── Campaign ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    PendingApproval,
    Active,
    Paused,
    Completed,
    Rejected,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingModel {
    Cpm,
    Cpe,
    Cpa,
    Hybrid,
}

impl PricingModel {
    /// Scoring-time pricing factor from the Selection Engine's scoring
    /// formula (§4.4): `CPM:1.0, CPE:1.1, CPA:1.2, HYBRID:1.05`.
    pub fn scoring_factor(self) -> f64 {
        match self {
            PricingModel::Cpm => 1.0,
            PricingModel::Cpe => 1.1,
            PricingModel::Cpa => 1.2,
            PricingModel::Hybrid => 1.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    Awareness,
    Consideration,
    Conversion,
    Engagement,
}

impl Objective {
    /// Pricing-time objective multiplier. Applied *only* in `dooh-pricing`
    /// (§4.2 step 1) — never in Selection Engine scoring; see Design Note
    /// (d) in `SPEC_FULL.md` / `DESIGN.md`.
    pub fn pricing_multiplier(self) -> f64 {
        match self {
            Objective::Awareness => 0.9,
            Objective::Consideration => 1.0,
            Objective::Conversion => 1.2,
            Objective::Engagement => 1.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationType {
    Urban,
    Suburban,
    Rural,
}

impl LocationType {
    pub fn price_multiplier(self) -> f64 {
        match self {
            LocationType::Urban => 1.3,
            LocationType::Suburban => 1.0,
            LocationType::Rural => 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationTarget {
    pub location_type: Option<LocationType>,
    pub venue_tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetingSchedule {
    /// Hours of day (0-23) this campaign may serve; empty = all hours.
    pub hours_of_day: Vec<u8>,
    /// Days of week (0=Sunday .. 6=Saturday) this campaign may serve; empty = all days.
    pub days_of_week: Vec<u8>,
}

impl TargetingSchedule {
    pub fn matches(&self, hour: u8, day_of_week: u8) -> bool {
        (self.hours_of_day.is_empty() || self.hours_of_day.contains(&hour))
            && (self.days_of_week.is_empty() || self.days_of_week.contains(&day_of_week))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbVariant {
    pub creative_id: CreativeId,
    pub traffic_allocation: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbTest {
    pub id: Uuid,
    pub variants: Vec<AbVariant>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl AbTest {
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.starts_at <= at && at <= self.ends_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub advertiser_id: AdvertiserId,
    pub status: CampaignStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub total_budget: f64,
    pub daily_cap: Option<f64>,
    pub spend_to_date: f64,
    pub spend_today: f64,
    pub spend_day: chrono::NaiveDate,
    pub pricing_model: PricingModel,
    pub objective: Objective,
    pub default_priority: i32,
    pub location_targets: Vec<LocationTarget>,
    pub schedule: TargetingSchedule,
    pub demographic_filters: Vec<String>,
    pub creative_ids: Vec<CreativeId>,
    pub active_ab_test: Option<AbTest>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.start_date <= now && now <= self.end_date
    }

    pub fn under_budget(&self) -> bool {
        self.spend_to_date < self.total_budget
    }

    pub fn under_daily_cap(&self, today: chrono::NaiveDate) -> bool {
        match self.daily_cap {
            None => true,
            Some(cap) => self.spend_today < cap || self.spend_day != today,
        }
    }

    /// True once remaining flight time drops below 20% of total flight
    /// length — drives the Selection Engine's end-of-flight score boost
    /// (§4.4 step 4).
    pub fn in_end_of_flight_window(&self, now: DateTime<Utc>) -> bool {
        let total = (self.end_date - self.start_date).num_seconds().max(1) as f64;
        let remaining = (self.end_date - now).num_seconds().max(0) as f64;
        remaining < total * 0.20
    }
}

// ─── Creative ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreativeType {
    Image,
    Video,
    Html,
    Interactive,
    Ar,
    Voice,
}

impl CreativeType {
    /// Default display duration in seconds when the creative's own natural
    /// duration is absent (§4.4 "Display duration").
    pub fn default_duration_secs(self) -> u32 {
        match self {
            CreativeType::Image => 20,
            CreativeType::Video => 30,
            CreativeType::Html => 25,
            CreativeType::Interactive => 45,
            CreativeType::Ar => 60,
            CreativeType::Voice => 45,
        }
    }

    /// Exploration-bonus scale used in creative scoring (§4.4): VIDEO 1.2,
    /// INTERACTIVE 1.3, AR 1.4, everything else unscaled.
    pub fn exploration_scale(self) -> f64 {
        match self {
            CreativeType::Video => 1.2,
            CreativeType::Interactive => 1.3,
            CreativeType::Ar => 1.4,
            _ => 1.0,
        }
    }
}

/// Creative approval state. Canonicalized to a single `status` field per
/// Design Note (a) — there is no parallel `is_approved: bool`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreativeStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    Basic,
    Oracle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Creative {
    pub id: CreativeId,
    pub campaign_id: CampaignId,
    pub media_type: CreativeType,
    pub url: String,
    pub format: String,
    pub natural_duration_secs: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub status: CreativeStatus,
    pub verification_method: Option<VerificationMethod>,
    pub rejection_reasons: Vec<String>,
    pub impressions: u64,
    pub engagements: u64,
    pub attention_score_mean: f64,
    pub delivery_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Creative {
    pub fn display_duration_secs(&self) -> u32 {
        self.natural_duration_secs
            .unwrap_or_else(|| self.media_type.default_duration_secs())
    }

    pub fn engagement_rate(&self) -> f64 {
        if self.impressions == 0 {
            0.0
        } else {
            self.engagements as f64 / self.impressions as f64
        }
    }
}

// ─── Device ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    AndroidTv,
    DigitalSignage,
    InteractiveKiosk,
    VehicleMounted,
    RetailDisplay,
}

impl DeviceClass {
    /// Target slots per hour at the device's granularity (§4.5).
    pub fn target_slots_per_hour(self) -> u32 {
        match self {
            DeviceClass::AndroidTv => 12,
            DeviceClass::DigitalSignage => 20,
            DeviceClass::InteractiveKiosk => 30,
            DeviceClass::VehicleMounted => 15,
            DeviceClass::RetailDisplay => 10,
        }
    }

    /// Device-class pricing multiplier (§4.2 step 3). Kiosk and signage
    /// values are given literally in the spec (1.5 / 1.2); TV is the
    /// explicit 1.0 baseline; vehicle-mounted and retail-display are
    /// extrapolated between signage and TV to keep the table monotone
    /// with interactivity, and are recorded here rather than left
    /// implicit.
    pub fn price_multiplier(self) -> f64 {
        match self {
            DeviceClass::InteractiveKiosk => 1.5,
            DeviceClass::DigitalSignage => 1.2,
            DeviceClass::AndroidTv => 1.0,
            DeviceClass::VehicleMounted => 1.15,
            DeviceClass::RetailDisplay => 1.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Pending,
    Active,
    Inactive,
    Suspended,
    Maintenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceHealth {
    Unknown,
    Healthy,
    Warning,
    Critical,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoLocation {
    pub lat: f64,
    pub lng: f64,
    pub venue_name: Option<String>,
    pub location_type: LocationType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub partner_id: PartnerId,
    pub fingerprint: String,
    pub class: DeviceClass,
    pub location: GeoLocation,
    pub status: DeviceStatus,
    pub health: DeviceHealth,
    pub last_seen: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl Device {
    /// Only ACTIVE devices receive scheduled deliveries; MAINTENANCE and
    /// SUSPENDED devices still accept heartbeats (§3 Device invariant). A
    /// device whose health has dropped to OFFLINE is also excluded even if
    /// its status is still ACTIVE — the Scheduler must stop producing new
    /// Deliveries for it until a fresh heartbeat restores health (§8 S5).
    pub fn schedulable(&self) -> bool {
        self.status == DeviceStatus::Active && self.health != DeviceHealth::Offline
    }
}

// ─── Delivery ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Scheduled,
    Delivering,
    Delivered,
    Cancelled,
    Expired,
    Failed,
}

impl DeliveryState {
    /// Validates a transition against the state machine in §4.6. No
    /// transition is ever allowed out of a terminal state.
    pub fn can_transition_to(self, next: DeliveryState) -> bool {
        use DeliveryState::*;
        matches!(
            (self, next),
            (Scheduled, Delivering)
                | (Scheduled, Cancelled)
                | (Scheduled, Expired)
                | (Delivering, Delivered)
                | (Delivering, Cancelled)
                | (Delivering, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeliveryState::Delivered
                | DeliveryState::Cancelled
                | DeliveryState::Expired
                | DeliveryState::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PlaybackReportMissing,
    OracleFailure,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudienceSnapshot {
    pub estimated_count: u32,
    pub demographics: Vec<(String, f64)>,
    pub attention_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackReport {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub completed: bool,
    pub interrupted: bool,
    pub viewer_metrics: Option<AudienceSnapshot>,
    pub device_metrics: Option<serde_json::Value>,
}

impl PlaybackReport {
    /// `viewableTimeMillis / (duration·1000)` (§4.6).
    pub fn completion_ratio(&self, duration_secs: u32) -> f64 {
        if duration_secs == 0 {
            return 0.0;
        }
        let viewable_ms = (self.end_time - self.start_time)
            .num_milliseconds()
            .max(0) as f64;
        viewable_ms / (duration_secs as f64 * 1000.0)
    }

    pub fn is_delivered(&self, duration_secs: u32) -> bool {
        self.completed || self.completion_ratio(duration_secs) >= 0.75
    }

    pub fn is_failed(&self) -> bool {
        !self.completed && self.interrupted
    }

    /// Whether this playback counts as an engagement (Design Note (e)):
    /// `viewerMetrics` carries no explicit engagement flag, so engagement is
    /// derived from a clean completion (`completed && !interrupted`) or, when
    /// an attention score was reported, from it crossing
    /// `ENGAGEMENT_ATTENTION_THRESHOLD`. Either signal is sufficient — a
    /// short interrupted playback with strong measured attention still
    /// counts, as does a full completion with no attention sensor attached.
    pub fn is_engaged(&self) -> bool {
        let completed_cleanly = self.completed && !self.interrupted;
        let attention_engaged = self
            .viewer_metrics
            .as_ref()
            .and_then(|snapshot| snapshot.attention_score)
            .map(|score| score >= ENGAGEMENT_ATTENTION_THRESHOLD)
            .unwrap_or(false);
        completed_cleanly || attention_engaged
    }
}

/// Minimum reported attention score that counts a playback as an engagement
/// even without a clean completion (§4.6, Design Note (e)).
pub const ENGAGEMENT_ATTENTION_THRESHOLD: f64 = 0.5;

/// Tagged-variant sum replacing the source's untyped `metadata: any` field
/// (Design Note, `SPEC_FULL.md` §3 / `spec.md` §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum DeliveryMetadata {
    Reason(String),
    Priority(i32),
    Playback(PlaybackReport),
    Audience(AudienceSnapshot),
    Error(ErrorKind),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: DeliveryId,
    pub campaign_id: CampaignId,
    pub creative_id: CreativeId,
    pub device_id: DeviceId,
    pub scheduled_time: DateTime<Utc>,
    pub duration_secs: u32,
    pub priority: i32,
    pub state: DeliveryState,
    pub actual_play_time: Option<DateTime<Utc>>,
    pub impressions: u64,
    pub engagements: u64,
    pub completions: u64,
    pub cost: f64,
    pub metadata: Vec<DeliveryMetadata>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    pub fn interval(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let half = chrono::Duration::seconds(self.duration_secs as i64);
        (self.scheduled_time - half, self.scheduled_time + half)
    }

    pub fn overlaps(&self, other_start: DateTime<Utc>, other_end: DateTime<Utc>) -> bool {
        let (start, end) = self.interval();
        start < other_end && other_start < end
    }
}

// ─── PerformanceBucket ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PerformanceContextKey {
    pub campaign_id: CampaignId,
    pub device_class: DeviceClass,
    pub hour_of_day: u8,
    pub day_of_week: u8,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PerformanceCounters {
    pub impressions: u64,
    pub engagements: u64,
    pub completions: u64,
}

impl PerformanceCounters {
    pub fn add(&mut self, other: PerformanceCounters) {
        self.impressions += other.impressions;
        self.engagements += other.engagements;
        self.completions += other.completions;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceBucket {
    pub key: PerformanceContextKey,
    pub counters: PerformanceCounters,
    pub last_updated: DateTime<Utc>,
}

// ─── PriceCurve ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateSet {
    pub cpm: f64,
    pub cpe: f64,
    pub cpa: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Forecast {
    pub hourly: [f64; 24],
    pub weekly: [f64; 4],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceCurve {
    pub base_rate: RateSet,
    pub adjusted_rate: RateSet,
    pub forecast: Forecast,
    pub demand_level: f64,
}

// ─── BillingEvent ───────────────────────────────────────────────────────

/// Emitted by the Delivery Tracker on every `DELIVERED` transition (§6
/// "BillingSink interface"). Carries every input either an in-process sink
/// or an out-of-process billing adapter needs to compute CPM/CPE/CPA/HYBRID
/// charges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingEvent {
    pub delivery_id: DeliveryId,
    pub campaign_id: CampaignId,
    pub advertiser_id: AdvertiserId,
    pub impressions: u64,
    pub engagements: u64,
    pub completions: u64,
    pub pricing_model: PricingModel,
    pub cost: f64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_state_transitions() {
        assert!(DeliveryState::Scheduled.can_transition_to(DeliveryState::Delivering));
        assert!(DeliveryState::Delivering.can_transition_to(DeliveryState::Delivered));
        assert!(!DeliveryState::Delivered.can_transition_to(DeliveryState::Cancelled));
        assert!(!DeliveryState::Cancelled.can_transition_to(DeliveryState::Delivered));
    }

    #[test]
    fn completion_ratio_matches_threshold() {
        let now = Utc::now();
        let report = PlaybackReport {
            start_time: now,
            end_time: now + chrono::Duration::milliseconds(22_500),
            completed: false,
            interrupted: false,
            viewer_metrics: None,
            device_metrics: None,
        };
        // 22.5s / 30s = 0.75 exactly -> delivered.
        assert!(report.is_delivered(30));
    }
}
