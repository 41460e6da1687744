use serde::{Deserialize, Serialize};

use super::domain::{
    effective_adjustment, Adjustment, ConstituentDef, ConstituentId, DataWarning, ItemDef,
    ItemScore, MissingScorePolicy,
};
use super::policy::{GradePolicy, PolicyEvaluator};

/// An item definition paired with whatever score exists for one student.
#[derive(Debug, Clone, Copy)]
pub struct ItemSlot<'a> {
    pub item: &'a ItemDef,
    pub score: Option<&'a ItemScore>,
    /// Item-scope policy, when one is bound; transforms the single item
    /// percent before it enters the points-weighted sum.
    pub policy: Option<&'a GradePolicy>,
}

/// Normalized 0-100 result for one constituent, before and after the manual
/// adjustment fold-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstituentGrade {
    pub constituent_id: ConstituentId,
    pub raw_percent: f64,
    pub adjusted_percent: f64,
    pub weight_pct: f64,
    pub is_extra: bool,
    pub warnings: Vec<DataWarning>,
}

/// Fold item scores into a constituent percentage.
///
/// The raw percent is the points-weighted average `sum(earned) / sum(max) * 100`,
/// not a mean of per-item percentages: items carry unequal point values and a
/// simple mean would let a 2-point quiz outweigh a 50-point exam. Ungraded
/// items fill in their default points (or drop out entirely, per the item's
/// missing-score policy), so a constituent with no grades yet reports the
/// aggregated default rather than null. The effective adjustment is added
/// after normalization and the total is clamped to [0, 100] unless the
/// constituent is extra.
pub fn normalize(
    constituent: &ConstituentDef,
    slots: &[ItemSlot<'_>],
    adjustments: &[Adjustment],
) -> ConstituentGrade {
    let mut warnings = Vec::new();
    let mut earned_sum = 0.0;
    let mut max_sum = 0.0;
    let evaluator = PolicyEvaluator;

    if slots.is_empty() {
        warnings.push(DataWarning::EmptyConstituent {
            constituent_id: constituent.id.clone(),
        });
    }

    for slot in slots {
        let effective_max = slot.item.effective_max(slot.score);
        if effective_max <= 0.0 {
            warnings.push(DataWarning::UnscorableItem {
                item_id: slot.item.id.clone(),
            });
            continue;
        }

        let earned = match slot.score {
            Some(score) => score.earned_points,
            None => match slot.item.missing_policy {
                MissingScorePolicy::FillDefault => slot.item.default_points,
                MissingScorePolicy::Exclude => continue,
            },
        };
        let mut earned = earned.clamp(0.0, effective_max);

        if let Some(policy) = slot.policy {
            let percent = earned / effective_max * 100.0;
            let verdict = evaluator.evaluate(policy, &slot.item.id.0, &[percent], &[1.0]);
            warnings.extend(verdict.warnings);
            let transformed = policy.scale.to_percent(verdict.score);
            earned = (transformed / 100.0 * effective_max).clamp(0.0, effective_max);
        }

        earned_sum += earned;
        max_sum += effective_max;
    }

    let raw_percent = if max_sum > 0.0 {
        earned_sum / max_sum * 100.0
    } else {
        0.0
    };

    let delta = effective_adjustment(adjustments)
        .map(|adjustment| adjustment.delta_points)
        .unwrap_or(0.0);

    let mut adjusted_percent = raw_percent + delta;
    if !constituent.is_extra {
        adjusted_percent = adjusted_percent.clamp(0.0, 100.0);
    }

    ConstituentGrade {
        constituent_id: constituent.id.clone(),
        raw_percent,
        adjusted_percent,
        weight_pct: constituent.weight_pct,
        is_extra: constituent.is_extra,
        warnings,
    }
}
