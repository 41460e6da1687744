use serde::{Deserialize, Serialize};

use super::domain::{effective_adjustment, Adjustment, DataWarning, ModuleId};
use super::policy::MatchedRule;

/// One module's evaluated score on the internal 0-10 scale, plus everything
/// the aggregator and breakdown views need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleGrade {
    pub module_id: ModuleId,
    /// Score on the 0-10 internal scale; percent conversions happen only at
    /// the normalizer and view seams.
    pub score: f64,
    pub weight_pct: f64,
    pub is_extra: bool,
    pub matched: MatchedRule,
    pub warnings: Vec<DataWarning>,
}

impl ModuleGrade {
    /// Points this module adds to the final grade. Non-extra modules convert
    /// the 0-10 score into a fraction of their weight; extra modules pour
    /// their score in directly, unclamped.
    pub fn contribution_points(&self) -> f64 {
        if self.is_extra {
            self.score
        } else {
            self.score / 10.0 * self.weight_pct
        }
    }
}

/// Final grade with its components kept separate. Collapsing these into one
/// number would lose the audit trail downstream display depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalGrade {
    pub weighted_points: f64,
    pub extra_points: f64,
    pub adjustment_points: f64,
    pub final_points: f64,
    pub warnings: Vec<DataWarning>,
}

/// Combine module grades and the effective final adjustment into one grade.
pub fn aggregate(modules: &[ModuleGrade], final_adjustments: &[Adjustment]) -> FinalGrade {
    let mut weighted_points = 0.0;
    let mut extra_points = 0.0;
    let mut warnings = Vec::new();

    for module in modules {
        if module.is_extra {
            extra_points += module.contribution_points();
        } else {
            weighted_points += module.contribution_points();
        }
        warnings.extend(module.warnings.iter().cloned());
    }

    let adjustment_points = effective_adjustment(final_adjustments)
        .map(|adjustment| adjustment.delta_points)
        .unwrap_or(0.0);

    FinalGrade {
        weighted_points,
        extra_points,
        adjustment_points,
        final_points: weighted_points + extra_points + adjustment_points,
        warnings,
    }
}
