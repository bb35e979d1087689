use dooh_core::types::PricingModel;

/// Billing math (§6): `CPM $5/1000 impr; CPE $0.5/engagement; CPA $2/completion`.
/// `HYBRID` blends all three dimensions evenly — the source leaves the
/// blend weighting to the sink, so the core picks an equal three-way split
/// and documents it here rather than leaving it implicit.
const CPM_RATE_PER_MILLE: f64 = 5.0;
const CPE_RATE: f64 = 0.5;
const CPA_RATE: f64 = 2.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryCounters {
    pub impressions: u64,
    pub engagements: u64,
    pub completions: u64,
}

pub fn cost_for(model: PricingModel, counters: DeliveryCounters) -> f64 {
    let cpm_cost = CPM_RATE_PER_MILLE * counters.impressions as f64 / 1000.0;
    let cpe_cost = CPE_RATE * counters.engagements as f64;
    let cpa_cost = CPA_RATE * counters.completions as f64;

    match model {
        PricingModel::Cpm => cpm_cost,
        PricingModel::Cpe => cpe_cost,
        PricingModel::Cpa => cpa_cost,
        PricingModel::Hybrid => (cpm_cost + cpe_cost + cpa_cost) / 3.0,
    }
}

/// The wire/event shape lives on `dooh_core::types::BillingEvent` so that
/// `dooh-core`'s `BillingSink` trait (the out-of-process collaborator
/// contract) can depend on it without a reverse dependency on this crate.
pub use dooh_core::types::BillingEvent;
