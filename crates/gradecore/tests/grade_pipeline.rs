//! Integration scenarios for the grade aggregation pipeline, exercised
//! through the public service facade so normalization, policy evaluation,
//! aggregation, and recomputation are validated end to end without reaching
//! into private modules.

mod common {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use gradecore::grading::{
        Adjustment, AdjustmentId, AdjustmentScope, BindingScope, ClassId, ClassStructure,
        ConstituentDef, ConstituentId, DerivedFinalGrade, DerivedGradeSink, DerivedModuleGrade,
        GradeService, ItemDef, ItemId, ItemScore, MissingScorePolicy, ModuleDef, ModuleId,
        PolicyBinding, PolicyRegistry, RetryPolicy, ScoreStore, StoreError, StudentId,
    };

    pub fn class_id() -> ClassId {
        ClassId("phys-210".to_string())
    }

    pub fn student() -> StudentId {
        StudentId("stu-42".to_string())
    }

    /// Two weighted modules and one extra-credit module, two constituents in
    /// the first module.
    pub fn structure() -> ClassStructure {
        ClassStructure {
            class_id: class_id(),
            modules: vec![
                ModuleDef {
                    id: ModuleId("mechanics".to_string()),
                    slug: "mechanics".to_string(),
                    weight_pct: 50.0,
                    is_extra: false,
                },
                ModuleDef {
                    id: ModuleId("waves".to_string()),
                    slug: "waves".to_string(),
                    weight_pct: 50.0,
                    is_extra: false,
                },
                ModuleDef {
                    id: ModuleId("olympiad".to_string()),
                    slug: "olympiad".to_string(),
                    weight_pct: 0.0,
                    is_extra: true,
                },
            ],
            constituents: vec![
                ConstituentDef {
                    id: ConstituentId("mech-problems".to_string()),
                    module_id: ModuleId("mechanics".to_string()),
                    slug: "mech-problems".to_string(),
                    weight_pct: 60.0,
                    is_extra: false,
                },
                ConstituentDef {
                    id: ConstituentId("mech-exam".to_string()),
                    module_id: ModuleId("mechanics".to_string()),
                    slug: "mech-exam".to_string(),
                    weight_pct: 40.0,
                    is_extra: false,
                },
                ConstituentDef {
                    id: ConstituentId("wave-exam".to_string()),
                    module_id: ModuleId("waves".to_string()),
                    slug: "wave-exam".to_string(),
                    weight_pct: 100.0,
                    is_extra: false,
                },
                ConstituentDef {
                    id: ConstituentId("olympiad-round".to_string()),
                    module_id: ModuleId("olympiad".to_string()),
                    slug: "olympiad-round".to_string(),
                    weight_pct: 100.0,
                    is_extra: false,
                },
            ],
            items: vec![
                item("ps-1", "mech-problems", 20.0),
                item("ps-2", "mech-problems", 30.0),
                item("mech-final", "mech-exam", 100.0),
                item("wave-final", "wave-exam", 100.0),
                item("olympiad-1", "olympiad-round", 100.0),
            ],
        }
    }

    fn item(id: &str, constituent: &str, max_points: f64) -> ItemDef {
        ItemDef {
            id: ItemId(id.to_string()),
            constituent_id: ConstituentId(constituent.to_string()),
            slug: id.to_string(),
            max_points,
            default_points: 0.0,
            missing_policy: MissingScorePolicy::FillDefault,
        }
    }

    #[derive(Default)]
    pub struct MemoryStore {
        structures: Mutex<HashMap<ClassId, ClassStructure>>,
        enrollment: Mutex<HashMap<ClassId, Vec<StudentId>>>,
        scores: Mutex<HashMap<(StudentId, ItemId), ItemScore>>,
        adjustments: Mutex<Vec<Adjustment>>,
        bindings: Mutex<HashMap<(BindingScope, String), PolicyBinding>>,
    }

    impl MemoryStore {
        pub fn seeded() -> Self {
            let store = Self::default();
            store
                .structures
                .lock()
                .unwrap()
                .insert(class_id(), structure());
            store
                .enrollment
                .lock()
                .unwrap()
                .insert(class_id(), vec![student()]);
            store
        }
    }

    impl ScoreStore for MemoryStore {
        fn structure(&self, class_id: &ClassId) -> Result<ClassStructure, StoreError> {
            self.structures
                .lock()
                .unwrap()
                .get(class_id)
                .cloned()
                .ok_or(StoreError::NotFound)
        }

        fn students(&self, class_id: &ClassId) -> Result<Vec<StudentId>, StoreError> {
            Ok(self
                .enrollment
                .lock()
                .unwrap()
                .get(class_id)
                .cloned()
                .unwrap_or_default())
        }

        fn scores(
            &self,
            student_id: &StudentId,
            module_id: &ModuleId,
        ) -> Result<Vec<ItemScore>, StoreError> {
            let structures = self.structures.lock().unwrap();
            let Some(structure) = structures.values().find(|structure| {
                structure.modules.iter().any(|module| &module.id == module_id)
            }) else {
                return Ok(Vec::new());
            };

            let scores = self.scores.lock().unwrap();
            Ok(structure
                .items
                .iter()
                .filter(|item| {
                    structure.constituents.iter().any(|constituent| {
                        constituent.id == item.constituent_id
                            && &constituent.module_id == module_id
                    })
                })
                .filter_map(|item| {
                    scores
                        .get(&(student_id.clone(), item.id.clone()))
                        .cloned()
                })
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
                .unwrap()
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
                .unwrap()
                .get(&(scope, scope_id.to_string()))
                .cloned())
        }

        fn upsert_score(
            &self,
            student_id: &StudentId,
            score: ItemScore,
        ) -> Result<(), StoreError> {
            self.scores
                .lock()
                .unwrap()
                .insert((student_id.clone(), score.item_id.clone()), score);
            Ok(())
        }

        fn append_adjustment(&self, adjustment: Adjustment) -> Result<(), StoreError> {
            self.adjustments.lock().unwrap().push(adjustment);
            Ok(())
        }

        fn void_adjustment(
            &self,
            adjustment_id: &AdjustmentId,
        ) -> Result<Adjustment, StoreError> {
            let mut adjustments = self.adjustments.lock().unwrap();
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
                .unwrap()
                .insert((binding.scope, binding.scope_id.clone()), binding);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct MemorySink {
        pub module_grades: Mutex<Vec<DerivedModuleGrade>>,
        pub final_grades: Mutex<Vec<DerivedFinalGrade>>,
    }

    impl DerivedGradeSink for MemorySink {
        fn record_module_grade(&self, derived: DerivedModuleGrade) -> Result<(), StoreError> {
            self.module_grades.lock().unwrap().push(derived);
            Ok(())
        }

        fn record_final_grade(&self, derived: DerivedFinalGrade) -> Result<(), StoreError> {
            self.final_grades.lock().unwrap().push(derived);
            Ok(())
        }
    }

    pub fn build_service() -> (
        Arc<GradeService<MemoryStore, MemorySink>>,
        Arc<MemoryStore>,
        Arc<MemorySink>,
    ) {
        let store = Arc::new(MemoryStore::seeded());
        let sink = Arc::new(MemorySink::default());
        let registry = Arc::new(PolicyRegistry::with_reference_policies());
        let service = GradeService::load(
            &class_id(),
            registry,
            store.clone(),
            sink.clone(),
            RetryPolicy::immediate(3),
        )
        .expect("structure validates");
        (Arc::new(service), store, sink)
    }
}

use common::{build_service, class_id, student};
use gradecore::grading::{
    AdjustmentDraft, AdjustmentScope, BindingScope, ItemId, MatchedRule, ModuleId, UnitKey,
};

fn seed_all_scores(service: &gradecore::grading::GradeService<common::MemoryStore, common::MemorySink>) {
    for (item, earned) in [
        ("ps-1", 18.0),
        ("ps-2", 26.0),
        ("mech-final", 88.0),
        ("wave-final", 70.0),
    ] {
        service
            .record_score(&student(), &ItemId(item.to_string()), earned, None)
            .expect("score records");
    }
}

#[test]
fn full_pipeline_settles_an_auditable_final_grade() {
    let (service, _, sink) = build_service();
    seed_all_scores(&service);

    let grade = service.final_grade(&student()).expect("grade computes");

    // mechanics: problems 44/50 = 88%, exam 88% -> weighted mean 88% -> 8.8.
    // waves: 70% -> 7.0. Final: 44 + 35 = 79, no extra, no adjustment.
    assert!((grade.weighted_points - 79.0).abs() < 1e-9);
    assert_eq!(grade.extra_points, 0.0);
    assert_eq!(grade.adjustment_points, 0.0);
    assert!((grade.final_points - 79.0).abs() < 1e-9);

    // Every settled unit was re-entered into the derived-view layer.
    let finals = sink.final_grades.lock().unwrap();
    let last = finals.last().expect("final grade published");
    assert!((last.grade.final_points - 79.0).abs() < 1e-9);
}

#[test]
fn five_rule_policy_extra_credit_and_adjustment_compose() {
    let (service, _, _) = build_service();
    seed_all_scores(&service);

    // Bind the reference rule set to mechanics: inputs 8.8 and 8.8 earn the
    // interpolated bonus.
    service
        .bind_policy(BindingScope::Module, "mechanics", "five-rule", 1)
        .expect("binding accepted");

    let mechanics = service
        .module_grade(&student(), &ModuleId("mechanics".to_string()))
        .expect("module computes");
    assert_eq!(mechanics.matched, MatchedRule::GoodWithBonus);
    // avg 8.8, bonus 0.15 + 0.8 * 0.35 = 0.43.
    assert!((mechanics.score - 9.23).abs() < 1e-9);

    // Olympiad extra credit lands outside the 100% base.
    service
        .record_score(&student(), &ItemId("olympiad-1".to_string()), 6.0, None)
        .expect("bonus score records");

    // And a +2 final adjustment on top.
    service
        .record_adjustment(AdjustmentDraft {
            scope: AdjustmentScope::Final,
            scope_id: class_id().0,
            student_id: student(),
            delta_points: 2.0,
            note: "colloquium credit".to_string(),
            actor: "prof-morin".to_string(),
        })
        .expect("adjustment records");

    let grade = service.final_grade(&student()).expect("grade computes");
    assert!((grade.weighted_points - (46.15 + 35.0)).abs() < 1e-9);
    assert!((grade.extra_points - 0.6).abs() < 1e-9);
    assert_eq!(grade.adjustment_points, 2.0);
    assert!((grade.final_points - 83.75).abs() < 1e-9);
}

#[test]
fn rapid_regrades_converge_to_one_fresh_state() {
    let (service, _, sink) = build_service();
    seed_all_scores(&service);

    for earned in [60.0, 65.0, 75.0] {
        service
            .record_score(&student(), &ItemId("wave-final".to_string()), earned, None)
            .expect("regrade records");
    }

    let unit = UnitKey::final_grade(student(), class_id());
    assert!(service.unit_state(&unit).is_fresh());

    let finals = sink.final_grades.lock().unwrap();
    let last = finals.last().expect("final grade published");
    // Only the last regrade's inputs: 44 + 37.5.
    assert!((last.grade.final_points - 81.5).abs() < 1e-9);
}

#[test]
fn recomputation_is_idempotent_over_unchanged_inputs() {
    let (service, _, _) = build_service();
    seed_all_scores(&service);

    let first = service.final_grade(&student()).expect("grade computes");
    let second = service.final_grade(&student()).expect("grade computes");

    assert_eq!(first.final_points.to_bits(), second.final_points.to_bits());
    assert_eq!(
        first.weighted_points.to_bits(),
        second.weighted_points.to_bits()
    );
    assert_eq!(
        first.adjustment_points.to_bits(),
        second.adjustment_points.to_bits()
    );
}
