use serde::{Deserialize, Serialize};

/// Threshold and bonus parameters for the five-rule chain, expressed on the
/// policy's own scale (0-10 for the reference rule set).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiveRuleParams {
    /// Rule 1: every input strictly above this saturates at `top_score`.
    pub exceptional_floor: f64,
    /// Rule 2: minimum strictly above this earns the interpolated bonus.
    pub bonus_floor: f64,
    /// Rule 3: minimum strictly above this passes the average through.
    pub acceptable_floor: f64,
    /// Rule 4: any input inside `[warning_floor, acceptable_floor]` triggers
    /// the penalty; the result never drops below `warning_floor`.
    pub warning_floor: f64,
    pub warning_penalty: f64,
    /// Rule 2 bonus = `bonus_base + (avg - bonus_floor) * bonus_slope`.
    pub bonus_base: f64,
    pub bonus_slope: f64,
    pub top_score: f64,
}

impl Default for FiveRuleParams {
    fn default() -> Self {
        Self {
            exceptional_floor: 9.0,
            bonus_floor: 8.0,
            acceptable_floor: 7.5,
            warning_floor: 6.0,
            warning_penalty: 0.3,
            bonus_base: 0.15,
            bonus_slope: 0.35,
            top_score: 10.0,
        }
    }
}
