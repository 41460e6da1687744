use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for a class offering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassId(pub String);

/// Identifier wrapper for an enrolled student.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StudentId(pub String);

/// Identifier wrapper for a top-level grading module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub String);

/// Identifier wrapper for a constituent within a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConstituentId(pub String);

/// Identifier wrapper for a gradable item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub String);

/// Identifier wrapper for an adjustment audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdjustmentId(pub String);

/// Top-level weighted grading category. Non-extra module weights must sum to 100
/// per class; extra modules contribute additively outside the base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDef {
    pub id: ModuleId,
    pub slug: String,
    pub weight_pct: f64,
    pub is_extra: bool,
}

/// Weighted sub-category within a module, aggregating items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstituentDef {
    pub id: ConstituentId,
    pub module_id: ModuleId,
    pub slug: String,
    pub weight_pct: f64,
    pub is_extra: bool,
}

/// How an ungraded item participates in its constituent's totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingScorePolicy {
    /// Count `default_points` as the earned value (zero-fill semantics).
    FillDefault,
    /// Leave the item out of both the earned and max sums entirely.
    Exclude,
}

/// A single gradable unit with a point value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDef {
    pub id: ItemId,
    pub constituent_id: ConstituentId,
    pub slug: String,
    pub max_points: f64,
    pub default_points: f64,
    pub missing_policy: MissingScorePolicy,
}

impl ItemDef {
    /// Declared maximum unless a score carries an override.
    pub fn effective_max(&self, score: Option<&ItemScore>) -> f64 {
        score
            .and_then(|score| score.max_points_override)
            .unwrap_or(self.max_points)
    }
}

/// Raw earned points recorded for one student on one item. Mutated only by
/// regrades; the engine never invents scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemScore {
    pub item_id: ItemId,
    pub earned_points: f64,
    pub max_points_override: Option<f64>,
    pub graded_at: DateTime<Utc>,
}

/// Level at which a manual adjustment applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentScope {
    Constituent,
    Module,
    Final,
}

impl AdjustmentScope {
    pub const fn label(self) -> &'static str {
        match self {
            AdjustmentScope::Constituent => "constituent",
            AdjustmentScope::Module => "module",
            AdjustmentScope::Final => "final",
        }
    }
}

/// Manually entered additive delta with audit metadata. Entries are history:
/// voided records stay queryable, and the effective delta for a scope is the
/// latest non-voided entry, never a sum over the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub id: AdjustmentId,
    pub scope: AdjustmentScope,
    pub scope_id: String,
    pub student_id: StudentId,
    pub delta_points: f64,
    pub note: String,
    pub actor: String,
    pub recorded_at: DateTime<Utc>,
    pub voided: bool,
}

/// Latest non-voided entry of an append-ordered adjustment history.
pub fn effective_adjustment(history: &[Adjustment]) -> Option<&Adjustment> {
    history.iter().rev().find(|entry| !entry.voided)
}

/// Structure of a class as authored externally: read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassStructure {
    pub class_id: ClassId,
    pub modules: Vec<ModuleDef>,
    pub constituents: Vec<ConstituentDef>,
    pub items: Vec<ItemDef>,
}

/// Non-fatal data-integrity findings attached to computed results so consumers
/// can surface them without the engine degrading into a hard failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataWarning {
    /// Item whose effective max is zero or negative; it contributes nothing.
    UnscorableItem { item_id: ItemId },
    /// Constituent with no items behind it.
    EmptyConstituent { constituent_id: ConstituentId },
    /// Policy evaluator invoked with no inputs; the documented default applies.
    EmptyPolicyInputs { scope_id: String },
}
