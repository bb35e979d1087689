//! End-to-end scenarios over the Device Sync API, in the style of
//! `tests/integration/bid_flow_test.rs` — built on `tower::ServiceExt::oneshot`
//! against an in-process router rather than a spawned listener.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use dooh_core::config::AppConfig;
use dooh_express::bootstrap::bootstrap;
use dooh_express::seed::seed_demo_data;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// S1 — Basic happy path: a device with one eligible campaign pulls a
/// queue entry, reports playback, and the delivery reaches DELIVERED while
/// campaign spend and the performance bucket both update.
#[tokio::test]
async fn s1_basic_happy_path() {
    let config = AppConfig::default();
    let boot = bootstrap(&config);
    let seed = seed_demo_data(boot.catalog, boot.partners);

    let campaign_before = boot.catalog.get_campaign(seed.campaign_id).unwrap();
    assert_eq!(campaign_before.spend_to_date, 0.0);

    let delivery_id = boot
        .scheduler
        .schedule_ad(
            seed.campaign_id,
            seed.creative_id,
            &boot.catalog.get_device(seed.device_id).unwrap(),
            chrono::Utc::now() + chrono::Duration::minutes(5),
            None,
            30,
        )
        .expect("slot should be free");

    let app = dooh_device_api::build_router(boot.state.clone());

    let queue_req = Request::builder()
        .method("GET")
        .uri(format!("/devices/{}/queue?lookahead=3600", seed.device_id))
        .header("Authorization", format!("Bearer {}", seed.partner_token))
        .body(Body::empty())
        .unwrap();
    let queue_resp = app.clone().oneshot(queue_req).await.unwrap();
    assert_eq!(queue_resp.status(), StatusCode::OK);
    let queue_body = body_json(queue_resp).await;
    let entries = queue_body.as_array().expect("queue response should be an entry array");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["deliveryId"], delivery_id.to_string());

    let start = chrono::Utc::now();
    let playback_req = Request::builder()
        .method("POST")
        .uri(format!("/deliveries/{delivery_id}/playback"))
        .header("content-type", "application/json")
        .header("Authorization", format!("Bearer {}", seed.partner_token))
        .body(Body::from(
            json!({
                "startTime": start,
                "endTime": start + chrono::Duration::seconds(30),
                "completed": true,
                "interrupted": false,
                "viewerMetrics": {
                    "estimatedCount": 4,
                    "demographics": {},
                    "attentionScore": 0.9
                }
            })
            .to_string(),
        ))
        .unwrap();
    let playback_resp = app.oneshot(playback_req).await.unwrap();
    assert_eq!(playback_resp.status(), StatusCode::OK);
    let delivery_body = body_json(playback_resp).await;
    assert_eq!(delivery_body["state"], "Delivered");

    let campaign_after = boot.catalog.get_campaign(seed.campaign_id).unwrap();
    assert!((campaign_after.spend_to_date - 0.02).abs() < 1e-9, "expected $0.02 spend, got {}", campaign_after.spend_to_date);

    let now = start;
    let bucket_key = dooh_core::types::PerformanceContextKey {
        campaign_id: seed.campaign_id,
        device_class: dooh_core::types::DeviceClass::DigitalSignage,
        hour_of_day: chrono::Timelike::hour(&now) as u8,
        day_of_week: chrono::Datelike::weekday(&now).num_days_from_sunday() as u8,
    };
    let counters = boot.performance.get(bucket_key);
    assert_eq!(counters.impressions, 4);
}

/// S2 — Priority preemption: a higher-priority campaign bumps a lower one
/// out of an overlapping slot, and the displaced delivery is cancelled
/// with the preemption reason recorded.
#[tokio::test]
async fn s2_priority_preemption() {
    let config = AppConfig::default();
    let boot = bootstrap(&config);
    let seed = seed_demo_data(boot.catalog, boot.partners);
    let device = boot.catalog.get_device(seed.device_id).unwrap();

    let now = chrono::Utc::now();
    let low_priority_id = boot
        .scheduler
        .schedule_ad(seed.campaign_id, seed.creative_id, &device, now + chrono::Duration::seconds(60), Some(5), 30)
        .expect("low priority slot should be free");

    // Build a distinct campaign C2 sharing the same approved creative's
    // media contract but its own budget/id, per S2's "campaign C2 submits
    // scheduleAd" framing.
    let c2_id = {
        let mut bytes = [0u8; 16];
        bytes[15] = 9;
        uuid::Uuid::from_bytes(bytes)
    };
    let mut c2 = boot.catalog.get_campaign(seed.campaign_id).unwrap();
    c2.id = c2_id;
    c2.default_priority = 9;
    boot.catalog.upsert_campaign(c2);

    let high_priority_id = boot
        .scheduler
        .schedule_ad(c2_id, seed.creative_id, &device, now + chrono::Duration::seconds(70), None, 30)
        .expect("higher priority scheduleAd should preempt the overlapping delivery");

    let cancelled = boot.tracker.get(low_priority_id).expect("preempted delivery should still exist, cancelled");
    assert_eq!(cancelled.state, dooh_core::types::DeliveryState::Cancelled);

    let inserted = boot.tracker.get(high_priority_id).expect("C2 delivery should be scheduled");
    assert_eq!(inserted.state, dooh_core::types::DeliveryState::Scheduled);
}

/// S5 — Device offline: a device whose last heartbeat is stale is marked
/// OFFLINE by the health sweep, and `queue` falls back to generic content
/// rather than promoting a delivery for it.
#[tokio::test]
async fn s5_device_offline_falls_back_to_generic_content() {
    let config = AppConfig::default();
    let boot = bootstrap(&config);
    let seed = seed_demo_data(boot.catalog, boot.partners);

    let mut device = boot.catalog.get_device(seed.device_id).unwrap();
    device.last_seen = chrono::Utc::now() - chrono::Duration::minutes(5);
    boot.catalog.upsert_device(device);

    let marked = dooh_device_api::health::mark_offline_devices(boot.catalog, config.device_api.offline_after_secs, chrono::Utc::now());
    assert_eq!(marked, vec![seed.device_id]);

    let app = dooh_device_api::build_router(boot.state.clone());
    let queue_req = Request::builder()
        .method("GET")
        .uri(format!("/devices/{}/queue?lookahead=300", seed.device_id))
        .header("Authorization", format!("Bearer {}", seed.partner_token))
        .body(Body::empty())
        .unwrap();
    let queue_resp = app.oneshot(queue_req).await.unwrap();
    assert_eq!(queue_resp.status(), StatusCode::OK);
    let body = body_json(queue_resp).await;
    assert_eq!(body["fallback"], true);
}

/// Unauthenticated and cross-partner requests are rejected before any
/// mutation touches the catalog (§4.7 "All mutations are authenticated by
/// a partner-scoped token").
#[tokio::test]
async fn rejects_heartbeat_with_unrecognized_token() {
    let config = AppConfig::default();
    let boot = bootstrap(&config);
    let seed = seed_demo_data(boot.catalog, boot.partners);
    let app = dooh_device_api::build_router(boot.state.clone());

    let req = Request::builder()
        .method("POST")
        .uri("/devices/heartbeat")
        .header("Authorization", "Bearer not-a-real-token")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "deviceId": seed.device_id, "health": "Healthy" }).to_string(),
        ))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}
