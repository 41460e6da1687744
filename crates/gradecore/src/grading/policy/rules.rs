use serde::{Deserialize, Serialize};

use super::params::FiveRuleParams;

/// Which rule of a chain produced a score, retained for audit trails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedRule {
    Exceptional,
    GoodWithBonus,
    Acceptable,
    Warning,
    Problematic,
    Fallback,
    WeightedMean,
}

impl MatchedRule {
    pub const fn label(self) -> &'static str {
        match self {
            MatchedRule::Exceptional => "exceptional",
            MatchedRule::GoodWithBonus => "good_with_bonus",
            MatchedRule::Acceptable => "acceptable",
            MatchedRule::Warning => "warning",
            MatchedRule::Problematic => "problematic",
            MatchedRule::Fallback => "fallback",
            MatchedRule::WeightedMean => "weighted_mean",
        }
    }
}

/// Apply the five-rule chain to inputs on the policy scale. Rules are checked
/// in strict priority order; the first match wins and later rules are never
/// consulted. Callers guarantee `inputs` is non-empty.
pub(crate) fn apply_five_rule(inputs: &[f64], params: &FiveRuleParams) -> (f64, MatchedRule) {
    let min = inputs.iter().copied().fold(f64::INFINITY, f64::min);
    let avg = inputs.iter().sum::<f64>() / inputs.len() as f64;

    if min > params.exceptional_floor {
        return (params.top_score, MatchedRule::Exceptional);
    }

    if min > params.bonus_floor {
        let bonus = params.bonus_base + (avg - params.bonus_floor) * params.bonus_slope;
        let score = (avg + bonus).min(params.top_score);
        return (score, MatchedRule::GoodWithBonus);
    }

    if min > params.acceptable_floor {
        return (avg, MatchedRule::Acceptable);
    }

    let any_in_warning_band = inputs
        .iter()
        .any(|value| *value >= params.warning_floor && *value <= params.acceptable_floor);
    if any_in_warning_band {
        let score = (avg - params.warning_penalty).max(params.warning_floor);
        return (score, MatchedRule::Warning);
    }

    if min < params.warning_floor {
        return (drop_highest_average(inputs), MatchedRule::Problematic);
    }

    // Rules 1-5 partition the domain; kept so a future parameter change cannot
    // turn a gap into a panic.
    (avg, MatchedRule::Fallback)
}

/// Rule 5: discard the single highest input and average the remainder. With
/// fewer than two inputs there is nothing to discard without over-penalizing,
/// so the plain average stands.
fn drop_highest_average(inputs: &[f64]) -> f64 {
    if inputs.len() < 2 {
        return inputs.iter().sum::<f64>() / inputs.len() as f64;
    }

    let highest = inputs
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(index, _)| index)
        .unwrap_or(0);

    let sum: f64 = inputs
        .iter()
        .enumerate()
        .filter(|(index, _)| *index != highest)
        .map(|(_, value)| value)
        .sum();
    sum / (inputs.len() - 1) as f64
}

/// Weighted arithmetic mean; degenerates to the plain mean when the weights
/// sum to zero. Callers guarantee `values` is non-empty and the slices match
/// in length.
pub(crate) fn weighted_mean(values: &[f64], weights: &[f64]) -> f64 {
    let weight_sum: f64 = weights.iter().sum();
    if weight_sum <= 0.0 {
        return values.iter().sum::<f64>() / values.len() as f64;
    }

    values
        .iter()
        .zip(weights.iter())
        .map(|(value, weight)| value * weight)
        .sum::<f64>()
        / weight_sum
}
