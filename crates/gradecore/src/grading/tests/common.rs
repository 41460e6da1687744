use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::grading::domain::{
    Adjustment, AdjustmentId, AdjustmentScope, ClassId, ClassStructure, ConstituentDef,
    ConstituentId, ItemDef, ItemId, ItemScore, MissingScorePolicy, ModuleDef, ModuleId, StudentId,
};
use crate::grading::policy::{
    BindingScope, GradePolicy, PolicyBinding, PolicyRegistry, PolicyScale, RuleSet,
};
use crate::grading::service::GradeService;
use crate::grading::store::{
    DerivedFinalGrade, DerivedGradeSink, DerivedModuleGrade, ScoreStore, StoreError,
};
use crate::grading::RetryPolicy;

pub(super) fn class_id() -> ClassId {
    ClassId("cs-101".to_string())
}

pub(super) fn student() -> StudentId {
    StudentId("stu-1".to_string())
}

pub(super) fn module_def(id: &str, weight_pct: f64, is_extra: bool) -> ModuleDef {
    ModuleDef {
        id: ModuleId(id.to_string()),
        slug: id.to_string(),
        weight_pct,
        is_extra,
    }
}

pub(super) fn constituent_def(
    id: &str,
    module: &str,
    weight_pct: f64,
    is_extra: bool,
) -> ConstituentDef {
    ConstituentDef {
        id: ConstituentId(id.to_string()),
        module_id: ModuleId(module.to_string()),
        slug: id.to_string(),
        weight_pct,
        is_extra,
    }
}

pub(super) fn item_def(id: &str, constituent: &str, max_points: f64) -> ItemDef {
    ItemDef {
        id: ItemId(id.to_string()),
        constituent_id: ConstituentId(constituent.to_string()),
        slug: id.to_string(),
        max_points,
        default_points: 0.0,
        missing_policy: MissingScorePolicy::FillDefault,
    }
}

/// Theory (60) and lab (40) modules plus an extra-credit module outside the
/// 100% base.
pub(super) fn structure() -> ClassStructure {
    ClassStructure {
        class_id: class_id(),
        modules: vec![
            module_def("theory", 60.0, false),
            module_def("lab", 40.0, false),
            module_def("bonus", 0.0, true),
        ],
        constituents: vec![
            constituent_def("homework", "theory", 50.0, false),
            constituent_def("exams", "theory", 50.0, false),
            constituent_def("projects", "lab", 100.0, false),
            constituent_def("challenge", "bonus", 100.0, false),
        ],
        items: vec![
            item_def("hw-1", "homework", 10.0),
            item_def("hw-2", "homework", 20.0),
            item_def("midterm", "exams", 50.0),
            item_def("final-exam", "exams", 50.0),
            item_def("proj-1", "projects", 30.0),
            item_def("chal-1", "challenge", 10.0),
        ],
    }
}

pub(super) fn registry() -> Arc<PolicyRegistry> {
    let mut registry = PolicyRegistry::with_reference_policies();
    registry.register(GradePolicy {
        name: "mean".to_string(),
        version: 1,
        scale: PolicyScale::Percent,
        rules: RuleSet::WeightedMean,
    });
    Arc::new(registry)
}

pub(super) fn score(item: &str, earned: f64) -> ItemScore {
    ItemScore {
        item_id: ItemId(item.to_string()),
        earned_points: earned,
        max_points_override: None,
        graded_at: chrono::Utc::now(),
    }
}

type ScoreKey = (StudentId, ItemId);
type BindingKey = (BindingScope, String);

/// In-memory score store backing the unit tests and the demo service.
#[derive(Debug, Default)]
pub(crate) struct MemoryScoreStore {
    structures: Mutex<HashMap<ClassId, ClassStructure>>,
    enrollment: Mutex<HashMap<ClassId, Vec<StudentId>>>,
    scores: Mutex<HashMap<ScoreKey, ItemScore>>,
    adjustments: Mutex<Vec<Adjustment>>,
    bindings: Mutex<HashMap<BindingKey, PolicyBinding>>,
}

impl MemoryScoreStore {
    pub(crate) fn with_structure(structure: ClassStructure) -> Self {
        let store = Self::default();
        store
            .structures
            .lock()
            .expect("store mutex poisoned")
            .insert(structure.class_id.clone(), structure);
        store
    }

    pub(crate) fn enroll(&self, class_id: &ClassId, student_id: StudentId) {
        self.enrollment
            .lock()
            .expect("store mutex poisoned")
            .entry(class_id.clone())
            .or_default()
            .push(student_id);
    }
}

impl ScoreStore for MemoryScoreStore {
    fn structure(&self, class_id: &ClassId) -> Result<ClassStructure, StoreError> {
        self.structures
            .lock()
            .expect("store mutex poisoned")
            .get(class_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn students(&self, class_id: &ClassId) -> Result<Vec<StudentId>, StoreError> {
        Ok(self
            .enrollment
            .lock()
            .expect("store mutex poisoned")
            .get(class_id)
            .cloned()
            .unwrap_or_default())
    }

    fn scores(
        &self,
        student_id: &StudentId,
        module_id: &ModuleId,
    ) -> Result<Vec<ItemScore>, StoreError> {
        let structures = self.structures.lock().expect("store mutex poisoned");
        let Some(structure) = structures.values().find(|structure| {
            structure
                .modules
                .iter()
                .any(|module| &module.id == module_id)
        }) else {
            return Ok(Vec::new());
        };

        let module_items: Vec<ItemId> = structure
            .items
            .iter()
            .filter(|item| {
                structure
                    .constituents
                    .iter()
                    .any(|constituent| {
                        constituent.id == item.constituent_id
                            && &constituent.module_id == module_id
                    })
            })
            .map(|item| item.id.clone())
            .collect();

        let scores = self.scores.lock().expect("store mutex poisoned");
        Ok(module_items
            .iter()
            .filter_map(|item_id| scores.get(&(student_id.clone(), item_id.clone())).cloned())
            .collect())
    }

    fn adjustments(
        &self,
        scope: AdjustmentScope,
        scope_id: &str,
        student_id: &StudentId,
    ) -> Result<Vec<Adjustment>, StoreError> {
        Ok(self
            .adjustments
            .lock()
            .expect("store mutex poisoned")
            .iter()
            .filter(|adjustment| {
                adjustment.scope == scope
                    && adjustment.scope_id == scope_id
                    && &adjustment.student_id == student_id
            })
            .cloned()
            .collect())
    }

    fn policy_binding(
        &self,
        scope: BindingScope,
        scope_id: &str,
    ) -> Result<Option<PolicyBinding>, StoreError> {
        Ok(self
            .bindings
            .lock()
            .expect("store mutex poisoned")
            .get(&(scope, scope_id.to_string()))
            .cloned())
    }

    fn upsert_score(&self, student_id: &StudentId, score: ItemScore) -> Result<(), StoreError> {
        self.scores
            .lock()
            .expect("store mutex poisoned")
            .insert((student_id.clone(), score.item_id.clone()), score);
        Ok(())
    }

    fn append_adjustment(&self, adjustment: Adjustment) -> Result<(), StoreError> {
        self.adjustments
            .lock()
            .expect("store mutex poisoned")
            .push(adjustment);
        Ok(())
    }

    fn void_adjustment(&self, adjustment_id: &AdjustmentId) -> Result<Adjustment, StoreError> {
        let mut adjustments = self.adjustments.lock().expect("store mutex poisoned");
        let entry = adjustments
            .iter_mut()
            .find(|adjustment| &adjustment.id == adjustment_id)
            .ok_or(StoreError::NotFound)?;
        entry.voided = true;
        Ok(entry.clone())
    }

    fn set_binding(&self, binding: PolicyBinding) -> Result<(), StoreError> {
        self.bindings
            .lock()
            .expect("store mutex poisoned")
            .insert((binding.scope, binding.scope_id.clone()), binding);
        Ok(())
    }
}

/// Sink capturing derived grades so tests can assert what the engine published.
#[derive(Debug, Default)]
pub(crate) struct MemorySink {
    module_grades: Mutex<Vec<DerivedModuleGrade>>,
    final_grades: Mutex<Vec<DerivedFinalGrade>>,
}

impl MemorySink {
    pub(crate) fn module_grades(&self) -> Vec<DerivedModuleGrade> {
        self.module_grades.lock().expect("sink mutex poisoned").clone()
    }

    pub(crate) fn final_grades(&self) -> Vec<DerivedFinalGrade> {
        self.final_grades.lock().expect("sink mutex poisoned").clone()
    }
}

impl DerivedGradeSink for MemorySink {
    fn record_module_grade(&self, derived: DerivedModuleGrade) -> Result<(), StoreError> {
        self.module_grades
            .lock()
            .expect("sink mutex poisoned")
            .push(derived);
        Ok(())
    }

    fn record_final_grade(&self, derived: DerivedFinalGrade) -> Result<(), StoreError> {
        self.final_grades
            .lock()
            .expect("sink mutex poisoned")
            .push(derived);
        Ok(())
    }
}

/// Store decorator whose reads fail a configured number of times before
/// delegating, for retry-path tests.
pub(crate) struct FlakyStore {
    inner: MemoryScoreStore,
    failures_remaining: AtomicU32,
}

impl FlakyStore {
    pub(crate) fn new(inner: MemoryScoreStore, failures: u32) -> Self {
        Self {
            inner,
            failures_remaining: AtomicU32::new(failures),
        }
    }

    fn check(&self) -> Result<(), StoreError> {
        let remaining = self.failures_remaining.load(Ordering::Acquire);
        if remaining > 0 {
            self.failures_remaining.fetch_sub(1, Ordering::AcqRel);
            return Err(StoreError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }
}

impl ScoreStore for FlakyStore {
    fn structure(&self, class_id: &ClassId) -> Result<ClassStructure, StoreError> {
        self.inner.structure(class_id)
    }

    fn students(&self, class_id: &ClassId) -> Result<Vec<StudentId>, StoreError> {
        self.inner.students(class_id)
    }

    fn scores(
        &self,
        student_id: &StudentId,
        module_id: &ModuleId,
    ) -> Result<Vec<ItemScore>, StoreError> {
        self.check()?;
        self.inner.scores(student_id, module_id)
    }

    fn adjustments(
        &self,
        scope: AdjustmentScope,
        scope_id: &str,
        student_id: &StudentId,
    ) -> Result<Vec<Adjustment>, StoreError> {
        self.inner.adjustments(scope, scope_id, student_id)
    }

    fn policy_binding(
        &self,
        scope: BindingScope,
        scope_id: &str,
    ) -> Result<Option<PolicyBinding>, StoreError> {
        self.inner.policy_binding(scope, scope_id)
    }

    fn upsert_score(&self, student_id: &StudentId, score: ItemScore) -> Result<(), StoreError> {
        self.inner.upsert_score(student_id, score)
    }

    fn append_adjustment(&self, adjustment: Adjustment) -> Result<(), StoreError> {
        self.inner.append_adjustment(adjustment)
    }

    fn void_adjustment(&self, adjustment_id: &AdjustmentId) -> Result<Adjustment, StoreError> {
        self.inner.void_adjustment(adjustment_id)
    }

    fn set_binding(&self, binding: PolicyBinding) -> Result<(), StoreError> {
        self.inner.set_binding(binding)
    }
}

pub(super) fn build_service() -> (
    Arc<GradeService<MemoryScoreStore, MemorySink>>,
    Arc<MemoryScoreStore>,
    Arc<MemorySink>,
) {
    let store = Arc::new(MemoryScoreStore::with_structure(structure()));
    store.enroll(&class_id(), student());
    let sink = Arc::new(MemorySink::default());
    let service = GradeService::load(
        &class_id(),
        registry(),
        store.clone(),
        sink.clone(),
        RetryPolicy::immediate(3),
    )
    .expect("demo structure validates");
    (Arc::new(service), store, sink)
}

/// Seed the baseline scenario: homework 26/30, exams 85/100, project 27/30.
pub(super) fn seed_scores(service: &GradeService<MemoryScoreStore, MemorySink>) {
    let student = student();
    for (item, earned) in [
        ("hw-1", 9.0),
        ("hw-2", 17.0),
        ("midterm", 45.0),
        ("final-exam", 40.0),
        ("proj-1", 27.0),
    ] {
        service
            .record_score(&student, &ItemId(item.to_string()), earned, None)
            .expect("score records");
    }
}
