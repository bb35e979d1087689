use dooh_core::types::{CreativeType, RateSet};

/// Flat baseline rate, scaled per creative type by
/// `creative_type_multiplier` before the objective multiplier is applied
/// (§4.2 step 1 "base rate per creative type").
pub const BASE_RATES: RateSet = RateSet {
    cpm: 5.0,
    cpe: 0.5,
    cpa: 2.0,
};

/// Per-creative-type base rate multiplier (§4.2 step 1): richer/heavier
/// formats cost more to serve. IMAGE is the 1.0 baseline; VIDEO/VOICE sit
/// above it for decode + playback cost, INTERACTIVE/AR highest for their
/// render and input-handling overhead.
pub fn creative_type_multiplier(creative_type: CreativeType) -> f64 {
    match creative_type {
        CreativeType::Image => 1.0,
        CreativeType::Html => 1.1,
        CreativeType::Voice => 1.2,
        CreativeType::Video => 1.4,
        CreativeType::Interactive => 1.6,
        CreativeType::Ar => 2.0,
    }
}

/// Peak-hour curve: morning (7-9), lunch (11-13), evening (17-20) peaks at
/// 1.2-1.5; late night (0-5) troughs at 0.7 (§4.2 step 2).
pub const TIME_MULTIPLIERS: [f64; 24] = [
    0.7, 0.7, 0.7, 0.7, 0.7, 0.7, // 0-5 late night trough
    0.9, 1.3, 1.4, 1.2, 1.0, 1.3, // 6-11 morning peak
    1.5, 1.2, 1.0, 1.0, 1.1, 1.3, // 12-17 lunch peak, afternoon, evening ramp
    1.5, 1.4, 1.2, 1.0, 0.9, 0.8, // 18-23 evening peak, wind-down
];

/// `dayMultipliers[dow]`, indexed Sunday=0..Saturday=6: weekday 1.1-1.4,
/// Saturday 1.0, Sunday 0.9 (§4.2 step 2).
pub const DAY_MULTIPLIERS: [f64; 7] = [
    0.9, // Sunday
    1.1, // Monday
    1.2, // Tuesday
    1.3, // Wednesday
    1.4, // Thursday
    1.3, // Friday
    1.0, // Saturday
];
