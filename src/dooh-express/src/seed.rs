//! Demo fixture data for the `seed` subcommand, in the style of the
//! teacher's `MeteringEngine::seed_demo_usage` / `IncidentManager::seed_demo_data`
//! — a handful of deterministic UUIDs so a freshly seeded node is
//! reproducible across runs rather than randomized.

use chrono::Utc;
use dooh_catalog::Catalog;
use dooh_core::collaborators::NullContentModerator;
use dooh_core::types::*;
use dooh_device_api::PartnerRegistry;
use uuid::Uuid;

const DEMO_PARTNER_TOKEN: &str = "demo-partner-token";

fn fixed_uuid(last_byte: u8) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes[15] = last_byte;
    Uuid::from_bytes(bytes)
}

/// Seeds one partner/device/campaign/creative matching the S1 scenario
/// (`spec.md` §8): a $100 CPM campaign with one approved 30s video
/// creative, eligible on a digital-signage device. Returns the seeded
/// partner token, device id, campaign id, and creative id for CLI
/// operators to use in follow-up calls.
pub struct SeedSummary {
    pub partner_token: String,
    pub partner_id: Uuid,
    pub device_id: Uuid,
    pub campaign_id: Uuid,
    pub creative_id: Uuid,
}

pub fn seed_demo_data(catalog: &Catalog, partners: &PartnerRegistry) -> SeedSummary {
    let now = Utc::now();
    let partner_id = fixed_uuid(1);
    let device_id = fixed_uuid(2);
    let campaign_id = fixed_uuid(3);
    let creative_id = fixed_uuid(4);
    let advertiser_id = fixed_uuid(5);

    partners.register(DEMO_PARTNER_TOKEN, partner_id);

    catalog.upsert_device(Device {
        id: device_id,
        partner_id,
        fingerprint: "demo-device-001".into(),
        class: DeviceClass::DigitalSignage,
        location: GeoLocation {
            lat: 40.7128,
            lng: -74.0060,
            venue_name: Some("Demo Plaza".into()),
            location_type: LocationType::Urban,
        },
        status: DeviceStatus::Active,
        health: DeviceHealth::Healthy,
        last_seen: now,
        registered_at: now,
    });

    catalog.upsert_campaign(Campaign {
        id: campaign_id,
        name: "Demo Campaign C1".into(),
        advertiser_id,
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
        creative_ids: vec![creative_id],
        active_ab_test: None,
        created_at: now,
        updated_at: now,
    });

    catalog.upsert_creative(Creative {
        id: creative_id,
        campaign_id,
        media_type: CreativeType::Video,
        url: "https://cdn.dooh.internal/demo/c1-creative.mp4".into(),
        format: "mp4".into(),
        natural_duration_secs: Some(30),
        width: Some(1920),
        height: Some(1080),
        status: CreativeStatus::Pending,
        verification_method: None,
        rejection_reasons: vec![],
        impressions: 0,
        engagements: 0,
        attention_score_mean: 0.0,
        delivery_count: 0,
        created_at: now,
        updated_at: now,
    });

    // No external oracle is configured for this demo node, so this exercises
    // the deterministic fallback path (S4) and leaves the creative APPROVED
    // with verificationMethod=BASIC.
    let _ = catalog.verify_creative(creative_id, &NullContentModerator);

    SeedSummary {
        partner_token: DEMO_PARTNER_TOKEN.to_string(),
        partner_id,
        device_id,
        campaign_id,
        creative_id,
    }
}
