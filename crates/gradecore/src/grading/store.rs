use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::aggregator::{FinalGrade, ModuleGrade};
use super::domain::{
    Adjustment, AdjustmentId, AdjustmentScope, ClassId, ClassStructure, ItemScore, ModuleId,
    StudentId,
};
use super::policy::{BindingScope, PolicyBinding};

/// Error enumeration for score-store failures. `Unavailable` is the retryable
/// case; the orchestrator backs off and retries before parking a unit stale.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("score store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Narrow contract to the external score store. The engine owns no raw grade
/// data; everything it computes is a pure function of what these reads return.
pub trait ScoreStore: Send + Sync {
    fn structure(&self, class_id: &ClassId) -> Result<ClassStructure, StoreError>;
    fn students(&self, class_id: &ClassId) -> Result<Vec<StudentId>, StoreError>;
    fn scores(&self, student_id: &StudentId, module_id: &ModuleId)
        -> Result<Vec<ItemScore>, StoreError>;
    /// Full append-ordered adjustment history for a (scope, student) pair;
    /// the engine selects the effective entry itself.
    fn adjustments(
        &self,
        scope: AdjustmentScope,
        scope_id: &str,
        student_id: &StudentId,
    ) -> Result<Vec<Adjustment>, StoreError>;
    fn policy_binding(
        &self,
        scope: BindingScope,
        scope_id: &str,
    ) -> Result<Option<PolicyBinding>, StoreError>;

    fn upsert_score(&self, student_id: &StudentId, score: ItemScore) -> Result<(), StoreError>;
    fn append_adjustment(&self, adjustment: Adjustment) -> Result<(), StoreError>;
    fn void_adjustment(&self, adjustment_id: &AdjustmentId) -> Result<Adjustment, StoreError>;
    fn set_binding(&self, binding: PolicyBinding) -> Result<(), StoreError>;
}

/// Derived module grade as re-entered into the store's derived-view layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedModuleGrade {
    pub student_id: StudentId,
    pub grade: ModuleGrade,
    pub computed_at: DateTime<Utc>,
}

/// Derived final grade as re-entered into the store's derived-view layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedFinalGrade {
    pub student_id: StudentId,
    pub class_id: ClassId,
    pub grade: FinalGrade,
    pub computed_at: DateTime<Utc>,
}

/// Outbound hook receiving settled grades for the read/reporting side. Kept
/// separate from `ScoreStore` so tests can assert what the engine published
/// without faking the whole store.
pub trait DerivedGradeSink: Send + Sync {
    fn record_module_grade(&self, derived: DerivedModuleGrade) -> Result<(), StoreError>;
    fn record_final_grade(&self, derived: DerivedFinalGrade) -> Result<(), StoreError>;
}
