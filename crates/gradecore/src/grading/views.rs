use serde::Serialize;

use super::aggregator::{FinalGrade, ModuleGrade};
use super::domain::{ConstituentId, DataWarning, ModuleId};
use super::normalizer::ConstituentGrade;
use super::orchestrator::{ComputeFailure, UnitState};

/// Round half-up to `dp` decimal places. Applied at the point of external
/// exposure only; internal computation keeps full precision. Half-up means
/// ties round toward positive infinity: 8.125 -> 8.13, -8.125 -> -8.12.
pub fn round_half_up(value: f64, dp: u32) -> f64 {
    let factor = 10f64.powi(dp as i32);
    (value * factor + 0.5).floor() / factor
}

/// Externally exposed final grade. A unit that is not fresh renders as
/// pending with no numeric fields rather than a stale or misleading number.
#[derive(Debug, Clone, Serialize)]
pub struct FinalGradeView {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weighted_points: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_points: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjustment_points: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_points: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<DataWarning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ComputeFailure>,
}

impl FinalGradeView {
    pub fn fresh(grade: &FinalGrade) -> Self {
        Self {
            status: "fresh",
            weighted_points: Some(round_half_up(grade.weighted_points, 2)),
            extra_points: Some(round_half_up(grade.extra_points, 2)),
            adjustment_points: Some(round_half_up(grade.adjustment_points, 2)),
            final_points: Some(round_half_up(grade.final_points, 2)),
            warnings: grade.warnings.clone(),
            error: None,
        }
    }

    /// Pending render for stale or recomputing units.
    pub fn pending(state: &UnitState) -> Self {
        let error = match state {
            UnitState::Stale { error } => error.clone(),
            _ => None,
        };
        Self {
            status: "pending",
            weighted_points: None,
            extra_points: None,
            adjustment_points: None,
            final_points: None,
            warnings: Vec::new(),
            error,
        }
    }
}

/// One module's row in the final-grade breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleBreakdownEntry {
    pub module_id: ModuleId,
    pub score: f64,
    pub contribution_points: f64,
    pub is_extra: bool,
    pub matched_rule: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<DataWarning>,
}

impl ModuleBreakdownEntry {
    pub fn from_grade(grade: &ModuleGrade) -> Self {
        Self {
            module_id: grade.module_id.clone(),
            score: round_half_up(grade.score, 2),
            contribution_points: round_half_up(grade.contribution_points(), 2),
            is_extra: grade.is_extra,
            matched_rule: grade.matched.label(),
            warnings: grade.warnings.clone(),
        }
    }
}

/// One constituent's row in a module breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct ConstituentBreakdownEntry {
    pub constituent_id: ConstituentId,
    pub percent: f64,
    pub raw_percent: f64,
    pub is_extra: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<DataWarning>,
}

impl ConstituentBreakdownEntry {
    pub fn from_grade(grade: &ConstituentGrade) -> Self {
        Self {
            constituent_id: grade.constituent_id.clone(),
            percent: round_half_up(grade.adjusted_percent, 2),
            raw_percent: round_half_up(grade.raw_percent, 2),
            is_extra: grade.is_extra,
            warnings: grade.warnings.clone(),
        }
    }
}
