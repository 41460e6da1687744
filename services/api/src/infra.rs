use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use gradecore::grading::{
    Adjustment, AdjustmentId, AdjustmentScope, BindingScope, ClassId, ClassStructure,
    ConstituentDef, ConstituentId, DerivedFinalGrade, DerivedGradeSink, DerivedModuleGrade,
    ItemDef, ItemId, ItemScore, MissingScorePolicy, ModuleDef, ModuleId, PolicyBinding,
    PolicyRegistry, ScoreStore, StoreError, StudentId,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// In-memory score store backing the service and CLI demo. Production
/// deployments implement `ScoreStore` against the institutional database; the
/// engine does not care which is behind the trait.
#[derive(Default)]
pub(crate) struct InMemoryGradeStore {
    structures: Mutex<HashMap<ClassId, ClassStructure>>,
    enrollment: Mutex<HashMap<ClassId, Vec<StudentId>>>,
    scores: Mutex<HashMap<(StudentId, ItemId), ItemScore>>,
    adjustments: Mutex<Vec<Adjustment>>,
    bindings: Mutex<HashMap<(BindingScope, String), PolicyBinding>>,
}

impl InMemoryGradeStore {
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

impl ScoreStore for InMemoryGradeStore {
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

        let scores = self.scores.lock().expect("store mutex poisoned");
        Ok(structure
            .items
            .iter()
            .filter(|item| {
                structure.constituents.iter().any(|constituent| {
                    constituent.id == item.constituent_id && &constituent.module_id == module_id
                })
            })
            .filter_map(|item| scores.get(&(student_id.clone(), item.id.clone())).cloned())
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

/// Derived-view sink retaining the latest settled grades for inspection.
#[derive(Default)]
pub(crate) struct InMemoryGradeSink {
    module_grades: Mutex<Vec<DerivedModuleGrade>>,
    final_grades: Mutex<Vec<DerivedFinalGrade>>,
}

impl InMemoryGradeSink {
    pub(crate) fn final_grades(&self) -> Vec<DerivedFinalGrade> {
        self.final_grades
            .lock()
            .expect("sink mutex poisoned")
            .clone()
    }
}

impl DerivedGradeSink for InMemoryGradeSink {
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

pub(crate) fn demo_class_id() -> ClassId {
    ClassId("cs-101".to_string())
}

/// Registry shipped with the service: the reference five-rule policy.
pub(crate) fn default_registry() -> Arc<PolicyRegistry> {
    Arc::new(PolicyRegistry::with_reference_policies())
}

/// Demo class: theory (60%) and lab (40%) plus an extra-credit module.
pub(crate) fn demo_structure() -> ClassStructure {
    let module = |id: &str, weight_pct: f64, is_extra: bool| ModuleDef {
        id: ModuleId(id.to_string()),
        slug: id.to_string(),
        weight_pct,
        is_extra,
    };
    let constituent = |id: &str, module: &str, weight_pct: f64| ConstituentDef {
        id: ConstituentId(id.to_string()),
        module_id: ModuleId(module.to_string()),
        slug: id.to_string(),
        weight_pct,
        is_extra: false,
    };
    let item = |id: &str, constituent: &str, max_points: f64| ItemDef {
        id: ItemId(id.to_string()),
        constituent_id: ConstituentId(constituent.to_string()),
        slug: id.to_string(),
        max_points,
        default_points: 0.0,
        missing_policy: MissingScorePolicy::FillDefault,
    };

    ClassStructure {
        class_id: demo_class_id(),
        modules: vec![
            module("theory", 60.0, false),
            module("lab", 40.0, false),
            module("extra-credit", 0.0, true),
        ],
        constituents: vec![
            constituent("homework", "theory", 50.0),
            constituent("exams", "theory", 50.0),
            constituent("projects", "lab", 100.0),
            constituent("challenges", "extra-credit", 100.0),
        ],
        items: vec![
            item("hw-1", "homework", 10.0),
            item("hw-2", "homework", 20.0),
            item("midterm", "exams", 50.0),
            item("final-exam", "exams", 50.0),
            item("project-1", "projects", 30.0),
            item("challenge-1", "challenges", 10.0),
        ],
    }
}
