//! Named interfaces for the core's external collaborators (Design Notes,
//! `spec.md` §9: "dynamic dispatch" / "shared mutable state"). Each
//! long-lived dependency the source duck-typed is modeled here as an
//! explicit trait injected at process startup; a "null" implementation is
//! always available so the core runs with no external AI wired in.

use crate::types::{Creative, CreativeStatus, VerificationMethod};

/// Result of a creative-verification call, whether from the deterministic
/// policy checks or an external moderation oracle (§4.1).
#[derive(Debug, Clone)]
pub struct ModerationVerdict {
    pub status: CreativeStatus,
    pub reasons: Vec<String>,
    pub method: VerificationMethod,
}

/// External content-moderation oracle (§1: "out of scope... treated only as
/// a named contract"; §4.1: "If an external content-moderation oracle is
/// available, its verdict overrides; on oracle error the function falls
/// back to the deterministic checks").
pub trait ContentModerator: Send + Sync {
    fn moderate(&self, creative: &Creative) -> Result<ModerationVerdict, anyhow::Error>;
}

/// Always-available fallback: no external oracle, every call fails so the
/// caller takes the deterministic-checks path and records `BASIC` (S4).
pub struct NullContentModerator;

impl ContentModerator for NullContentModerator {
    fn moderate(&self, _creative: &Creative) -> Result<ModerationVerdict, anyhow::Error> {
        Err(anyhow::anyhow!("no content moderation oracle configured"))
    }
}

/// A schedule-time assignment for one device over a build window, as
/// returned by an external `ScheduleOptimizer` (§4.5 "Optimization mode").
#[derive(Debug, Clone)]
pub struct OptimizedAssignment {
    pub slot_index: usize,
    pub campaign_id: crate::types::CampaignId,
    pub creative_id: crate::types::CreativeId,
}

/// External schedule optimizer. On failure the Scheduler falls back to the
/// deterministic per-slot Selection Engine (§4.5).
pub trait ScheduleOptimizer: Send + Sync {
    fn optimize(
        &self,
        device_id: crate::types::DeviceId,
        slot_count: usize,
    ) -> Result<Vec<OptimizedAssignment>, anyhow::Error>;
}

pub struct NullScheduleOptimizer;

impl ScheduleOptimizer for NullScheduleOptimizer {
    fn optimize(
        &self,
        _device_id: crate::types::DeviceId,
        _slot_count: usize,
    ) -> Result<Vec<OptimizedAssignment>, anyhow::Error> {
        Err(anyhow::anyhow!("no schedule optimizer configured"))
    }
}

/// The computer-vision audience-estimation pipeline (§1's `TelemetryProducer`,
/// named `AudienceAnalyzer` in the Design Notes) — feeds emotion/attention
/// metrics into playback reports. Failures here are telemetry-only and are
/// swallowed with a metric increment by the caller (§7).
pub trait AudienceAnalyzer: Send + Sync {
    fn estimate(
        &self,
        delivery_id: crate::types::DeliveryId,
    ) -> Result<crate::types::AudienceSnapshot, anyhow::Error>;
}

pub struct NullAudienceAnalyzer;

impl AudienceAnalyzer for NullAudienceAnalyzer {
    fn estimate(
        &self,
        _delivery_id: crate::types::DeliveryId,
    ) -> Result<crate::types::AudienceSnapshot, anyhow::Error> {
        Err(anyhow::anyhow!("no audience analyzer configured"))
    }
}

/// Out-of-process billing adapter (§1: "payment-gateway integrations,
/// treated only as a `BillingSink` interface"; §6 "BillingSink interface").
/// The Delivery Tracker emits a `BillingEvent` on every `DELIVERED`
/// transition; this trait is how that event leaves the core. Billing math
/// may live in the core or the sink — the core only guarantees the event
/// carries every input either side needs (§6).
pub trait BillingSink: Send + Sync {
    fn emit(&self, event: &crate::types::BillingEvent) -> Result<(), anyhow::Error>;
}

/// Always-available fallback: logs the event at `info` level and succeeds,
/// so a core with no billing adapter wired in still has somewhere for
/// `BillingEvent`s to go instead of being silently dropped.
pub struct NullBillingSink;

impl BillingSink for NullBillingSink {
    fn emit(&self, event: &crate::types::BillingEvent) -> Result<(), anyhow::Error> {
        tracing::info!(
            delivery_id = %event.delivery_id,
            campaign_id = %event.campaign_id,
            cost = event.cost,
            "billing event (no external sink configured)"
        );
        Ok(())
    }
}
