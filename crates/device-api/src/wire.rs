//! JSON request/response shapes for the Device Sync Wire Protocol (§6).
//! Every payload carries `deviceId`/`timestamp`/`sequence` where the
//! endpoint table requires it; field names are `camelCase` on the wire.

use chrono::{DateTime, Utc};
use dooh_core::types::{
    CampaignId, CreativeId, CreativeType, DeliveryId, DeviceClass, DeviceHealth, DeviceId, GeoLocation, PricingModel,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub partner_token: String,
    pub device_fingerprint: String,
    pub class: DeviceClass,
    pub location: GeoLocation,
    #[serde(default)]
    pub specs: Option<Value>,
    /// Device-supplied envelope fields (§6). Accepted but not required —
    /// pre-sequence-aware devices still register fine.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sequence: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfiguration {
    pub pull_queue_rps: u32,
    pub offline_after_secs: i64,
    pub slot_minutes: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub device_id: DeviceId,
    pub configuration: DeviceConfiguration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub device_id: DeviceId,
    pub health: DeviceHealth,
    #[serde(default)]
    pub metrics: Value,
    #[serde(default)]
    pub errors: Option<Vec<String>>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sequence: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub ok: bool,
    pub config_updated: bool,
}

#[derive(Debug, Deserialize)]
pub struct QueueParams {
    #[serde(default = "default_lookahead_secs")]
    pub lookahead: i64,
}

fn default_lookahead_secs() -> i64 {
    300
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreativeWire {
    #[serde(rename = "type")]
    pub media_type: CreativeType,
    pub url: String,
    pub format: String,
    pub duration: u32,
    pub dimensions: Option<(u32, u32)>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignWire {
    pub id: CampaignId,
    pub pricing_model: PricingModel,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub delivery_id: DeliveryId,
    pub scheduled_time: DateTime<Utc>,
    pub creative_id: CreativeId,
    pub creative: CreativeWire,
    pub campaign: CampaignWire,
    pub priority: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[serde(untagged)]
pub enum QueueResponse {
    Entries(Vec<QueueEntry>),
    Fallback {
        fallback: bool,
        url: String,
        format: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackRequest {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub completed: bool,
    pub interrupted: bool,
    #[serde(default)]
    pub viewer_metrics: Option<dooh_core::types::AudienceSnapshot>,
    #[serde(default)]
    pub device_metrics: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sequence: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}
