//! Device-health sweep (S5 "Device offline"): runs on the scheduler's
//! background loop, not on the request path, so a slow device doesn't
//! block another device's heartbeat.

use chrono::{DateTime, Utc};
use dooh_catalog::Catalog;
use dooh_core::types::{DeviceHealth, DeviceStatus};
use tracing::info;

/// Marks every device whose `last_seen` is older than `offline_after_secs`
/// as `DeviceHealth::Offline`. Does not touch `status` — an offline device
/// is still `ACTIVE`/`SUSPENDED`/etc., but `Device::schedulable` also checks
/// health, so this sweep is what makes the Scheduler stop producing new
/// Deliveries for a device that has gone quiet between heartbeats (§8 S5).
pub fn mark_offline_devices(catalog: &Catalog, offline_after_secs: i64, now: DateTime<Utc>) -> Vec<dooh_core::types::DeviceId> {
    let threshold = chrono::Duration::seconds(offline_after_secs);
    let mut marked = Vec::new();

    for device in catalog.list_devices() {
        if device.health == DeviceHealth::Offline {
            continue;
        }
        if device.status == DeviceStatus::Inactive {
            continue;
        }
        if now.signed_duration_since(device.last_seen) > threshold {
            let mut updated = device.clone();
            updated.health = DeviceHealth::Offline;
            catalog.upsert_device(updated);
            marked.push(device.id);
        }
    }

    if !marked.is_empty() {
        info!(count = marked.len(), "devices marked offline");
        metrics::counter!("device_api.health.marked_offline").increment(marked.len() as u64);
    }
    marked
}
