//! Pricing Engine (C2) — base and demand-adjusted CPM/CPE/CPA rates plus
//! forecast curves. Pure and deterministic given its inputs, the static
//! tables below, and a last-measured demand level (§4.2).

mod tables;

use chrono::{DateTime, Datelike, Timelike, Utc};
use dooh_core::error::{CoreError, CoreResult};
use dooh_core::types::{
    CreativeType, DeviceClass, LocationType, Objective, PricingModel, Forecast, PriceCurve, RateSet,
};
use tables::{creative_type_multiplier, BASE_RATES, DAY_MULTIPLIERS, TIME_MULTIPLIERS};

/// Floor applied to every adjusted rate so a degenerate demand/time
/// combination never prices a slot at zero (§4.2 Failure clause).
const RATE_FLOOR: f64 = 0.05;

/// Historical-blend threshold: a campaign must have recorded at least this
/// many impressions before its observed average is eligible to blend into
/// the base rate (§4.2 step 1). The caller is responsible for checking this
/// before populating `historical_average` — pricing itself stays pure.
pub const HISTORICAL_BLEND_THRESHOLD: u64 = 1000;

#[derive(Debug, Clone, Copy)]
pub struct PricingInputs {
    pub pricing_model: PricingModel,
    pub creative_type: CreativeType,
    pub objective: Option<Objective>,
    pub device_class: DeviceClass,
    pub location_type: LocationType,
    pub slot_time: DateTime<Utc>,
    /// Historical average rate observed for this campaign. Only meaningful
    /// once the campaign has crossed `HISTORICAL_BLEND_THRESHOLD`
    /// impressions; `None` otherwise.
    pub historical_average: Option<f64>,
    /// Fraction of slots reserved in the next hour, as reported by the
    /// Scheduler; `None` falls back to `d = 0.5`.
    pub demand_level: Option<f64>,
}

pub struct PricingEngine {
    rate_floor: f64,
    historical_blend_threshold: u64,
}

impl Default for PricingEngine {
    fn default() -> Self {
        Self::new(RATE_FLOOR, HISTORICAL_BLEND_THRESHOLD)
    }
}

impl PricingEngine {
    pub fn new(rate_floor: f64, historical_blend_threshold: u64) -> Self {
        Self {
            rate_floor,
            historical_blend_threshold,
        }
    }

    /// Impressions a campaign must have recorded before its observed average
    /// is eligible to blend into the base rate (§4.2 step 1); callers decide
    /// whether to populate `PricingInputs::historical_average` against this.
    pub fn historical_blend_threshold(&self) -> u64 {
        self.historical_blend_threshold
    }

    /// Computes a `PriceCurve` for the given inputs (§4.2).
    pub fn price(&self, inputs: PricingInputs) -> CoreResult<PriceCurve> {
        if let Some(avg) = inputs.historical_average {
            if avg < 0.0 {
                return Err(CoreError::InvalidParameter(
                    "historical_average must be non-negative".into(),
                ));
            }
        }
        if let Some(d) = inputs.demand_level {
            if !(0.0..=1.0).contains(&d) {
                return Err(CoreError::InvalidParameter(
                    "demand_level must be within [0, 1]".into(),
                ));
            }
        }

        let base_rate = self.base_rate(inputs.creative_type, inputs.objective, inputs.historical_average);
        let time_factor = TIME_MULTIPLIERS[inputs.slot_time.hour() as usize];
        let dow = inputs.slot_time.weekday().num_days_from_sunday() as usize;
        let day_factor = DAY_MULTIPLIERS[dow];
        let location_factor = inputs.location_type.price_multiplier();
        let device_factor = inputs.device_class.price_multiplier();

        let demand_level = inputs.demand_level.unwrap_or(0.5);
        let demand_factor = demand_adjustment(demand_level);

        let composite = time_factor * day_factor * location_factor * device_factor * demand_factor;
        let adjusted_rate = scale_rate_set(base_rate, composite, self.rate_floor);

        let forecast = self.forecast(base_rate, day_factor, location_factor, device_factor);

        Ok(PriceCurve {
            base_rate,
            adjusted_rate,
            forecast,
            demand_level,
        })
    }

    fn base_rate(
        &self,
        creative_type: CreativeType,
        objective: Option<Objective>,
        historical_average: Option<f64>,
    ) -> RateSet {
        let type_multiplier = creative_type_multiplier(creative_type);
        let objective_multiplier = objective.map(Objective::pricing_multiplier).unwrap_or(1.0);
        let mut rates = RateSet {
            cpm: BASE_RATES.cpm * type_multiplier * objective_multiplier,
            cpe: BASE_RATES.cpe * type_multiplier * objective_multiplier,
            cpa: BASE_RATES.cpa * type_multiplier * objective_multiplier,
        };

        if let Some(avg) = historical_average {
            rates.cpm = 0.5 * rates.cpm + 0.5 * avg;
            rates.cpe = 0.5 * rates.cpe + 0.5 * avg;
            rates.cpa = 0.5 * rates.cpa + 0.5 * avg;
        }

        rates
    }

    /// `forecast.hourly[24]` and `forecast.weekly[4]` — monotone in the
    /// supplied day/location/device multipliers (§4.2 Contracts).
    fn forecast(&self, base: RateSet, day_factor: f64, location_factor: f64, device_factor: f64) -> Forecast {
        let composite = location_factor * device_factor;
        let mut hourly = [0.0; 24];
        for (hour, slot) in hourly.iter_mut().enumerate() {
            *slot = base.cpm * TIME_MULTIPLIERS[hour] * composite;
        }

        let mut weekly = [0.0; 4];
        for (week, slot) in weekly.iter_mut().enumerate() {
            // Each forecast week dampens slightly further out; the day
            // factor anchors the curve so it stays monotone with it.
            let decay = 1.0 - (week as f64 * 0.03);
            *slot = base.cpm * day_factor * composite * decay;
        }

        Forecast { hourly, weekly }
    }
}

/// `0.7 + d^1.5 × 1.1`, range `[0.7, 1.8]` (§4.2 step 4).
fn demand_adjustment(d: f64) -> f64 {
    0.7 + d.powf(1.5) * 1.1
}

/// Picks the per-unit rate matching `model` out of an adjusted `RateSet`,
/// converting the CPM figure (dollars per 1000 impressions) down to a
/// per-impression unit so every model's result is "dollars per billing
/// unit" — CPM per impression, CPE per engagement, CPA per completion,
/// HYBRID the even three-way split `dooh-delivery::billing::cost_for` also
/// uses. Exposed so the Scheduler's pre-commit budget guard (§4.5) prices
/// its projected cost against the same pricing model the campaign bills
/// under, instead of always assuming CPM.
pub fn rate_for_model(model: PricingModel, rate: &RateSet) -> f64 {
    let cpm_per_impression = rate.cpm / 1000.0;
    match model {
        PricingModel::Cpm => cpm_per_impression,
        PricingModel::Cpe => rate.cpe,
        PricingModel::Cpa => rate.cpa,
        PricingModel::Hybrid => (cpm_per_impression + rate.cpe + rate.cpa) / 3.0,
    }
}

fn scale_rate_set(base: RateSet, factor: f64, floor: f64) -> RateSet {
    RateSet {
        cpm: (base.cpm * factor).max(floor),
        cpe: (base.cpe * factor).max(floor),
        cpa: (base.cpa * factor).max(floor),
    }
}

pub use tables::{DAY_MULTIPLIERS as day_multipliers, TIME_MULTIPLIERS as time_multipliers};
