use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use super::aggregator::{aggregate, FinalGrade, ModuleGrade};
use super::domain::{
    Adjustment, AdjustmentId, AdjustmentScope, ClassId, ConstituentId, ItemId, ItemScore, ModuleId,
    StudentId,
};
use super::normalizer::{normalize, ConstituentGrade, ItemSlot};
use super::orchestrator::{
    affected_units, ComputeError, GradeEvent, RecomputeOrchestrator, RetryPolicy, UnitKey,
    UnitScope, UnitState,
};
use super::policy::{BindingScope, GradePolicy, PolicyEvaluator, PolicyRegistry};
use super::store::{
    DerivedFinalGrade, DerivedGradeSink, DerivedModuleGrade, ScoreStore, StoreError,
};
use super::structure::{StructuralError, ValidatedStructure};

/// Error raised by the grade service facade.
#[derive(Debug, thiserror::Error)]
pub enum GradeServiceError {
    #[error(transparent)]
    Structural(#[from] StructuralError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Compute(#[from] ComputeError),
    #[error("unknown item {0:?}")]
    UnknownItem(ItemId),
    #[error("unknown {scope} scope target {scope_id}")]
    UnknownScope { scope: &'static str, scope_id: String },
}

/// Fields of a new manual adjustment; the service assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct AdjustmentDraft {
    pub scope: AdjustmentScope,
    pub scope_id: String,
    pub student_id: StudentId,
    pub delta_points: f64,
    pub note: String,
    pub actor: String,
}

static ADJUSTMENT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_adjustment_id() -> AdjustmentId {
    let id = ADJUSTMENT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    AdjustmentId(format!("adj-{id:06}"))
}

/// Facade composing the validated class structure, policy registry, score
/// store, derived-grade sink, and recomputation orchestrator.
///
/// Every write path stores the record, maps it onto affected units, and
/// settles the queue; every read path recomputes through the pure pipeline,
/// which is bit-identical to the derived grades the sink received.
#[derive(Debug)]
pub struct GradeService<S, D> {
    structure: ValidatedStructure,
    registry: Arc<PolicyRegistry>,
    evaluator: PolicyEvaluator,
    store: Arc<S>,
    sink: Arc<D>,
    orchestrator: RecomputeOrchestrator,
}

impl<S, D> GradeService<S, D>
where
    S: ScoreStore + 'static,
    D: DerivedGradeSink + 'static,
{
    /// Load and validate the class structure, refusing service construction
    /// against an invalid one.
    pub fn load(
        class_id: &ClassId,
        registry: Arc<PolicyRegistry>,
        store: Arc<S>,
        sink: Arc<D>,
        retry: RetryPolicy,
    ) -> Result<Self, GradeServiceError> {
        let structure = store.structure(class_id)?;
        let structure = ValidatedStructure::new(structure)?;

        Ok(Self {
            structure,
            registry,
            evaluator: PolicyEvaluator,
            store,
            sink,
            orchestrator: RecomputeOrchestrator::new(retry),
        })
    }

    pub fn class_id(&self) -> &ClassId {
        self.structure.class_id()
    }

    pub fn structure(&self) -> &ValidatedStructure {
        &self.structure
    }

    /// Record a raw item score (new grade or regrade) and settle affected units.
    pub fn record_score(
        &self,
        student_id: &StudentId,
        item_id: &ItemId,
        earned_points: f64,
        max_points_override: Option<f64>,
    ) -> Result<(), GradeServiceError> {
        if !self.structure.contains_item(item_id) {
            return Err(GradeServiceError::UnknownItem(item_id.clone()));
        }

        let score = ItemScore {
            item_id: item_id.clone(),
            earned_points,
            max_points_override,
            graded_at: Utc::now(),
        };
        self.store.upsert_score(student_id, score)?;

        self.dispatch(GradeEvent::ScoreWritten {
            student_id: student_id.clone(),
            item_id: item_id.clone(),
        })?;
        Ok(())
    }

    /// Append a manual adjustment to the audit history and settle.
    pub fn record_adjustment(
        &self,
        draft: AdjustmentDraft,
    ) -> Result<Adjustment, GradeServiceError> {
        self.check_adjustment_scope(draft.scope, &draft.scope_id)?;

        let adjustment = Adjustment {
            id: next_adjustment_id(),
            scope: draft.scope,
            scope_id: draft.scope_id,
            student_id: draft.student_id,
            delta_points: draft.delta_points,
            note: draft.note,
            actor: draft.actor,
            recorded_at: Utc::now(),
            voided: false,
        };
        self.store.append_adjustment(adjustment.clone())?;

        self.dispatch(GradeEvent::AdjustmentWritten {
            student_id: adjustment.student_id.clone(),
            scope: adjustment.scope,
            scope_id: adjustment.scope_id.clone(),
        })?;
        Ok(adjustment)
    }

    /// Soft-void an adjustment; the record stays in history.
    pub fn void_adjustment(
        &self,
        adjustment_id: &AdjustmentId,
    ) -> Result<Adjustment, GradeServiceError> {
        let voided = self.store.void_adjustment(adjustment_id)?;

        self.dispatch(GradeEvent::AdjustmentWritten {
            student_id: voided.student_id.clone(),
            scope: voided.scope,
            scope_id: voided.scope_id.clone(),
        })?;
        Ok(voided)
    }

    /// Bind a registered policy version to an entity. A binding naming an
    /// unregistered policy is a structural error and is rejected here.
    pub fn bind_policy(
        &self,
        scope: BindingScope,
        scope_id: &str,
        policy_name: &str,
        policy_version: u32,
    ) -> Result<(), GradeServiceError> {
        self.check_binding_scope(scope, scope_id)?;
        let binding = super::policy::PolicyBinding {
            scope,
            scope_id: scope_id.to_string(),
            policy_name: policy_name.to_string(),
            policy_version,
        };
        self.registry.resolve_binding(&binding)?;
        self.store.set_binding(binding)?;

        self.dispatch(GradeEvent::BindingChanged {
            scope,
            scope_id: scope_id.to_string(),
        })?;
        Ok(())
    }

    /// Explicit recompute request for one unit; returns the settled state.
    pub fn recompute(&self, unit: UnitKey) -> UnitState {
        self.orchestrator.mark_stale(unit.clone());
        self.settle();
        self.orchestrator.state(&unit)
    }

    pub fn unit_state(&self, unit: &UnitKey) -> UnitState {
        self.orchestrator.state(unit)
    }

    /// Drain the recomputation queue, writing settled grades to the sink.
    pub fn settle(&self) -> Vec<(UnitKey, UnitState)> {
        self.orchestrator.drain(|unit| self.compute_unit(unit))
    }

    /// Normalized constituent grades for one student in one module.
    pub fn constituent_breakdown(
        &self,
        student_id: &StudentId,
        module_id: &ModuleId,
    ) -> Result<Vec<ConstituentGrade>, ComputeError> {
        if self.structure.module(module_id).is_none() {
            return Err(ComputeError::UnknownModule(module_id.clone()));
        }

        let scores = self.store.scores(student_id, module_id)?;
        let mut grades = Vec::new();

        for constituent in self.structure.constituents_of(module_id) {
            let items = self.structure.items_of(&constituent.id);

            let mut item_policies: Vec<Option<Arc<GradePolicy>>> = Vec::with_capacity(items.len());
            for item in &items {
                item_policies.push(self.bound_policy(BindingScope::Item, &item.id.0)?);
            }

            let slots: Vec<ItemSlot<'_>> = items
                .iter()
                .copied()
                .zip(item_policies.iter())
                .map(|(item, policy)| ItemSlot {
                    item,
                    score: scores.iter().find(|score| score.item_id == item.id),
                    policy: policy.as_deref(),
                })
                .collect();

            let adjustments = self.store.adjustments(
                AdjustmentScope::Constituent,
                &constituent.id.0,
                student_id,
            )?;

            let constituent_binding =
                self.bound_policy(BindingScope::Constituent, &constituent.id.0)?;
            let mut grade = normalize(constituent, &slots, &adjustments);

            // A constituent-scope policy replaces the points-weighted average
            // with its rule set over the per-item percentages, before the
            // adjustment fold-in re-applies.
            if let Some(policy) = constituent_binding {
                grade = self.apply_constituent_policy(
                    constituent,
                    &slots,
                    &adjustments,
                    &policy,
                    grade,
                );
            }

            grades.push(grade);
        }

        Ok(grades)
    }

    /// Evaluate one module for one student on the internal 0-10 scale.
    pub fn module_grade(
        &self,
        student_id: &StudentId,
        module_id: &ModuleId,
    ) -> Result<ModuleGrade, ComputeError> {
        let module = self
            .structure
            .module(module_id)
            .ok_or_else(|| ComputeError::UnknownModule(module_id.clone()))?;

        let constituents = self.constituent_breakdown(student_id, module_id)?;
        let mut warnings = Vec::new();

        let mut inputs = Vec::new();
        let mut weights = Vec::new();
        let mut extra_percent = 0.0;
        for constituent in &constituents {
            warnings.extend(constituent.warnings.iter().cloned());
            if constituent.is_extra {
                extra_percent += constituent.adjusted_percent;
            } else {
                inputs.push(constituent.adjusted_percent);
                weights.push(constituent.weight_pct);
            }
        }

        let binding = self.bound_policy(BindingScope::Module, &module_id.0)?;
        let (base_percent, matched) = match binding {
            Some(policy) => {
                let verdict = self
                    .evaluator
                    .evaluate(&policy, &module_id.0, &inputs, &weights);
                warnings.extend(verdict.warnings);
                (policy.scale.to_percent(verdict.score), verdict.matched)
            }
            None => {
                let verdict = self
                    .evaluator
                    .weighted_mean_percent(&module_id.0, &inputs, &weights);
                warnings.extend(verdict.warnings);
                (verdict.score, verdict.matched)
            }
        };

        let module_adjustments =
            self.store
                .adjustments(AdjustmentScope::Module, &module_id.0, student_id)?;
        let delta = super::domain::effective_adjustment(&module_adjustments)
            .map(|adjustment| adjustment.delta_points)
            .unwrap_or(0.0);

        let mut percent = base_percent + extra_percent + delta;
        if !module.is_extra {
            percent = percent.clamp(0.0, 100.0);
        }

        Ok(ModuleGrade {
            module_id: module_id.clone(),
            score: percent / 10.0,
            weight_pct: module.weight_pct,
            is_extra: module.is_extra,
            matched,
            warnings,
        })
    }

    /// All module grades for one student, in structure order.
    pub fn module_breakdown(
        &self,
        student_id: &StudentId,
    ) -> Result<Vec<ModuleGrade>, ComputeError> {
        self.structure
            .modules()
            .iter()
            .map(|module| self.module_grade(student_id, &module.id))
            .collect()
    }

    /// Final grade for one student: weighted module contributions, extra
    /// contributions, and the effective final adjustment, kept separate.
    pub fn final_grade(&self, student_id: &StudentId) -> Result<FinalGrade, ComputeError> {
        let modules = self.module_breakdown(student_id)?;
        let final_adjustments = self.store.adjustments(
            AdjustmentScope::Final,
            &self.structure.class_id().0,
            student_id,
        )?;
        Ok(aggregate(&modules, &final_adjustments))
    }

    fn compute_unit(&self, unit: &UnitKey) -> Result<(), ComputeError> {
        match &unit.scope {
            UnitScope::Module { module_id } => {
                let grade = self.module_grade(&unit.student_id, module_id)?;
                self.sink.record_module_grade(DerivedModuleGrade {
                    student_id: unit.student_id.clone(),
                    grade,
                    computed_at: Utc::now(),
                })?;
            }
            UnitScope::Final { class_id } => {
                let grade = self.final_grade(&unit.student_id)?;
                self.sink.record_final_grade(DerivedFinalGrade {
                    student_id: unit.student_id.clone(),
                    class_id: class_id.clone(),
                    grade,
                    computed_at: Utc::now(),
                })?;
            }
        }
        Ok(())
    }

    fn dispatch(&self, event: GradeEvent) -> Result<(), GradeServiceError> {
        debug!(?event, "grade write observed");

        let students = match event {
            GradeEvent::BindingChanged { .. } => self.store.students(self.structure.class_id())?,
            _ => Vec::new(),
        };
        let units = affected_units(&self.structure, &students, &event);
        self.orchestrator.mark_all_stale(units);
        self.settle();
        Ok(())
    }

    fn bound_policy(
        &self,
        scope: BindingScope,
        scope_id: &str,
    ) -> Result<Option<Arc<GradePolicy>>, ComputeError> {
        let Some(binding) = self.store.policy_binding(scope, scope_id)? else {
            return Ok(None);
        };
        let policy = self.registry.resolve_binding(&binding)?;
        Ok(Some(policy))
    }

    fn apply_constituent_policy(
        &self,
        constituent: &super::domain::ConstituentDef,
        slots: &[ItemSlot<'_>],
        adjustments: &[Adjustment],
        policy: &GradePolicy,
        mut grade: ConstituentGrade,
    ) -> ConstituentGrade {
        let mut percents = Vec::new();
        let mut weights = Vec::new();
        for slot in slots {
            let effective_max = slot.item.effective_max(slot.score);
            if effective_max <= 0.0 {
                continue;
            }
            let earned = match slot.score {
                Some(score) => score.earned_points.clamp(0.0, effective_max),
                None => match slot.item.missing_policy {
                    super::domain::MissingScorePolicy::FillDefault => {
                        slot.item.default_points.clamp(0.0, effective_max)
                    }
                    super::domain::MissingScorePolicy::Exclude => continue,
                },
            };
            percents.push(earned / effective_max * 100.0);
            weights.push(effective_max);
        }

        let verdict = self
            .evaluator
            .evaluate(policy, &constituent.id.0, &percents, &weights);
        grade.warnings.extend(verdict.warnings);
        grade.raw_percent = policy.scale.to_percent(verdict.score);

        let delta = super::domain::effective_adjustment(adjustments)
            .map(|adjustment| adjustment.delta_points)
            .unwrap_or(0.0);
        grade.adjusted_percent = grade.raw_percent + delta;
        if !constituent.is_extra {
            grade.adjusted_percent = grade.adjusted_percent.clamp(0.0, 100.0);
        }
        grade
    }

    fn check_adjustment_scope(
        &self,
        scope: AdjustmentScope,
        scope_id: &str,
    ) -> Result<(), GradeServiceError> {
        let known = match scope {
            AdjustmentScope::Constituent => self
                .structure
                .module_of_constituent(&ConstituentId(scope_id.to_string()))
                .is_some(),
            AdjustmentScope::Module => {
                self.structure.module(&ModuleId(scope_id.to_string())).is_some()
            }
            AdjustmentScope::Final => scope_id == self.structure.class_id().0,
        };

        if known {
            Ok(())
        } else {
            Err(GradeServiceError::UnknownScope {
                scope: scope.label(),
                scope_id: scope_id.to_string(),
            })
        }
    }

    fn check_binding_scope(
        &self,
        scope: BindingScope,
        scope_id: &str,
    ) -> Result<(), GradeServiceError> {
        let known = match scope {
            BindingScope::Item => self.structure.contains_item(&ItemId(scope_id.to_string())),
            BindingScope::Constituent => self
                .structure
                .module_of_constituent(&ConstituentId(scope_id.to_string()))
                .is_some(),
            BindingScope::Module => {
                self.structure.module(&ModuleId(scope_id.to_string())).is_some()
            }
        };

        if known {
            Ok(())
        } else {
            Err(GradeServiceError::UnknownScope {
                scope: scope.label(),
                scope_id: scope_id.to_string(),
            })
        }
    }
}
