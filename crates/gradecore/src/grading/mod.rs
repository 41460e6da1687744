//! Grade aggregation pipeline: raw item scores are normalized into
//! constituent percentages, evaluated into module scores by bound rule-set
//! policies, and aggregated into an auditable final grade, with every write
//! funneled through the recomputation orchestrator.

pub mod aggregator;
pub mod domain;
pub mod normalizer;
pub mod orchestrator;
pub mod policy;
pub mod router;
pub mod service;
pub mod store;
pub mod structure;
pub mod views;

#[cfg(test)]
mod tests;

pub use aggregator::{aggregate, FinalGrade, ModuleGrade};
pub use domain::{
    effective_adjustment, Adjustment, AdjustmentId, AdjustmentScope, ClassId, ClassStructure,
    ConstituentDef, ConstituentId, DataWarning, ItemDef, ItemId, ItemScore, MissingScorePolicy,
    ModuleDef, ModuleId, StudentId,
};
pub use normalizer::{normalize, ConstituentGrade, ItemSlot};
pub use orchestrator::{
    affected_units, ComputeError, ComputeFailure, GradeEvent, RecomputeOrchestrator, RetryPolicy,
    UnitKey, UnitScope, UnitState,
};
pub use policy::{
    BindingScope, FiveRuleParams, GradePolicy, MatchedRule, PolicyBinding, PolicyEvaluator,
    PolicyRegistry, PolicyScale, PolicyVerdict, RuleSet,
};
pub use router::grade_router;
pub use service::{AdjustmentDraft, GradeService, GradeServiceError};
pub use store::{
    DerivedFinalGrade, DerivedGradeSink, DerivedModuleGrade, ScoreStore, StoreError,
};
pub use structure::{StructuralError, ValidatedStructure};
pub use views::{
    round_half_up, ConstituentBreakdownEntry, FinalGradeView, ModuleBreakdownEntry,
};
