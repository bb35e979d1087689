//! Device Sync Wire Protocol handlers (§6 endpoint table / §4.7 contracts).

use crate::error::ApiError;
use crate::state::AppState;
use crate::wire::{
    CampaignWire, CreativeWire, DeviceConfiguration, ErrorBody, HeartbeatRequest, HeartbeatResponse, PlaybackRequest,
    QueueEntry, QueueParams, QueueResponse, RegisterRequest, RegisterResponse,
};
use crate::worker::submit_billing_event;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use dooh_core::error::CoreError;
use dooh_core::types::{Delivery, DeliveryId, Device, DeviceId, DeviceStatus, PlaybackReport};
use tracing::{info, warn};
use uuid::Uuid;

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorBody {
            error: "unauthorized".to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// `POST /devices/register` (§6).
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return unauthorized("missing bearer token");
    };
    let Some(partner_id) = state.partners.resolve(token) else {
        return unauthorized("unrecognized partner token");
    };

    let now = Utc::now();
    let device = Device {
        id: Uuid::new_v4(),
        partner_id,
        fingerprint: req.device_fingerprint,
        class: req.class,
        location: req.location,
        status: DeviceStatus::Active,
        health: dooh_core::types::DeviceHealth::Unknown,
        last_seen: now,
        registered_at: now,
    };
    let device_id = device.id;
    state.catalog.upsert_device(device);
    metrics::counter!("device_api.register").increment(1);
    info!(%device_id, %partner_id, "device registered");

    Json(RegisterResponse {
        device_id,
        configuration: DeviceConfiguration {
            pull_queue_rps: state.config.pull_queue_rps,
            offline_after_secs: state.config.offline_after_secs,
            slot_minutes: 5,
        },
    })
    .into_response()
}

/// `POST /devices/heartbeat` (§6/§4.7): updates `lastSeen` and health status.
pub async fn heartbeat(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<HeartbeatRequest>) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return unauthorized("missing bearer token");
    };
    let Some(partner_id) = state.partners.resolve(token) else {
        return unauthorized("unrecognized partner token");
    };

    let Some(mut device) = state.catalog.get_device(req.device_id) else {
        return ApiError(CoreError::NotFound(format!("device {}", req.device_id))).into_response();
    };
    if device.partner_id != partner_id {
        return unauthorized("device does not belong to this partner");
    }

    device.last_seen = Utc::now();
    device.health = req.health;
    if let Some(errors) = &req.errors {
        if !errors.is_empty() {
            warn!(device_id = %req.device_id, ?errors, "device reported errors in heartbeat");
        }
    }
    state.catalog.upsert_device(device);
    metrics::counter!("device_api.heartbeat").increment(1);

    Json(HeartbeatResponse {
        ok: true,
        config_updated: false,
    })
    .into_response()
}

/// `GET /devices/{id}/queue?lookahead=N` (§6/§4.7): returns the next-N
/// promotable deliveries ordered by `scheduledTime`, or fallback content
/// when none are promotable (§8 boundary behavior).
pub async fn queue(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(device_id): Path<DeviceId>,
    Query(params): Query<QueueParams>,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return unauthorized("missing bearer token");
    };
    let Some(partner_id) = state.partners.resolve(token) else {
        return unauthorized("unrecognized partner token");
    };
    let Some(device) = state.catalog.get_device(device_id) else {
        return ApiError(CoreError::NotFound(format!("device {device_id}"))).into_response();
    };
    if device.partner_id != partner_id {
        return unauthorized("device does not belong to this partner");
    }

    let limit = state.rate_limiter.check(device_id);
    if !limit.allowed {
        return ApiError(CoreError::RateLimited {
            retry_after_ms: limit.retry_after_ms,
        })
        .into_response();
    }

    let now = Utc::now();
    let lookahead = chrono::Duration::seconds(params.lookahead.max(0));

    let mut promoted = Vec::new();
    while let Some(delivery) = state.tracker.promote_next(device_id, now, lookahead) {
        promoted.push(delivery);
    }

    if promoted.is_empty() {
        let fallback = state.fallback.resolve(device_id, partner_id, device.class);
        metrics::counter!("device_api.queue.fallback").increment(1);
        return Json(QueueResponse::Fallback {
            fallback: true,
            url: fallback.url,
            format: fallback.format,
        })
        .into_response();
    }

    let mut entries = Vec::with_capacity(promoted.len());
    for delivery in promoted {
        let Some(creative) = state.catalog.get_creative(delivery.creative_id) else {
            continue;
        };
        let Some(campaign) = state.catalog.get_campaign(delivery.campaign_id) else {
            continue;
        };
        entries.push(QueueEntry {
            delivery_id: delivery.id,
            scheduled_time: delivery.scheduled_time,
            creative_id: creative.id,
            creative: CreativeWire {
                media_type: creative.media_type,
                url: creative.url,
                format: creative.format,
                duration: creative.display_duration_secs(),
                dimensions: creative.width.zip(creative.height),
            },
            campaign: CampaignWire {
                id: campaign.id,
                pricing_model: campaign.pricing_model,
            },
            priority: delivery.priority,
        });
    }
    entries.sort_by_key(|e| e.scheduled_time);
    metrics::counter!("device_api.queue.entries").increment(entries.len() as u64);

    Json(QueueResponse::Entries(entries)).into_response()
}

/// `POST /deliveries/{id}/playback` (§6/§4.6): drives the state machine and
/// returns the final `Delivery` snapshot.
pub async fn playback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(delivery_id): Path<DeliveryId>,
    Json(req): Json<PlaybackRequest>,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return unauthorized("missing bearer token");
    };
    let Some(partner_id) = state.partners.resolve(token) else {
        return unauthorized("unrecognized partner token");
    };
    let Some(delivery) = state.tracker.get(delivery_id) else {
        return ApiError(CoreError::NotFound(format!("delivery {delivery_id}"))).into_response();
    };
    let Some(device) = state.catalog.get_device(delivery.device_id) else {
        return ApiError(CoreError::NotFound(format!("device {}", delivery.device_id))).into_response();
    };
    if device.partner_id != partner_id {
        return unauthorized("delivery's device does not belong to this partner");
    }

    let mut viewer_metrics = req.viewer_metrics;
    if viewer_metrics.is_none() {
        match state.audience_analyzer.estimate(delivery_id) {
            Ok(snapshot) => viewer_metrics = Some(snapshot),
            Err(err) => {
                // Telemetry-only failure: swallowed with a metric increment (§7).
                metrics::counter!("device_api.audience_analyzer.errors").increment(1);
                warn!(%delivery_id, error = %err, "audience analyzer unavailable");
            }
        }
    }

    let report = PlaybackReport {
        start_time: req.start_time,
        end_time: req.end_time,
        completed: req.completed,
        interrupted: req.interrupted,
        viewer_metrics,
        device_metrics: req.device_metrics,
    };

    let (delivery, billing_event) = match state.tracker.report_playback(delivery_id, report) {
        Ok(result) => result,
        Err(err) => return ApiError(err).into_response(),
    };
    if let Some(event) = billing_event {
        submit_billing_event(&state.billing_tx, event);
    }
    metrics::counter!("device_api.playback").increment(1);

    Json(delivery).into_response()
}

/// `GET /health` — liveness/readiness, matching `crates/api-server/src/rest.rs`.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "nodeId": state.node_id,
        "uptimeSecs": state.start_time.elapsed().as_secs(),
    }))
}

pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
