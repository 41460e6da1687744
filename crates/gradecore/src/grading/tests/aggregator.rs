use crate::grading::aggregator::{aggregate, ModuleGrade};
use crate::grading::domain::{
    Adjustment, AdjustmentId, AdjustmentScope, DataWarning, ModuleId,
};
use crate::grading::policy::MatchedRule;

use super::common::*;

fn module_grade(id: &str, score: f64, weight_pct: f64, is_extra: bool) -> ModuleGrade {
    ModuleGrade {
        module_id: ModuleId(id.to_string()),
        score,
        weight_pct,
        is_extra,
        matched: MatchedRule::WeightedMean,
        warnings: Vec::new(),
    }
}

fn final_adjustment(delta: f64) -> Adjustment {
    Adjustment {
        id: AdjustmentId("adj-final".to_string()),
        scope: AdjustmentScope::Final,
        scope_id: class_id().0,
        student_id: student(),
        delta_points: delta,
        note: "participation credit".to_string(),
        actor: "instructor".to_string(),
        recorded_at: chrono::Utc::now(),
        voided: false,
    }
}

#[test]
fn combines_weighted_extra_and_adjustment_points() {
    let modules = vec![
        module_grade("theory", 9.2, 50.0, false),
        module_grade("lab", 7.0, 50.0, false),
        module_grade("bonus", 0.5, 0.0, true),
    ];

    let grade = aggregate(&modules, &[final_adjustment(2.0)]);

    assert!((grade.weighted_points - 81.0).abs() < 1e-9);
    assert_eq!(grade.extra_points, 0.5);
    assert_eq!(grade.adjustment_points, 2.0);
    assert!((grade.final_points - 83.5).abs() < 1e-9);
}

#[test]
fn components_stay_separate_for_audit() {
    let modules = vec![module_grade("theory", 8.0, 100.0, false)];
    let grade = aggregate(&modules, &[final_adjustment(-3.0)]);

    assert!((grade.weighted_points - 80.0).abs() < 1e-9);
    assert_eq!(grade.extra_points, 0.0);
    assert_eq!(grade.adjustment_points, -3.0);
    assert!((grade.final_points - 77.0).abs() < 1e-9);
}

#[test]
fn non_extra_contribution_scales_score_by_weight() {
    let grade = module_grade("theory", 9.2, 50.0, false);
    assert!((grade.contribution_points() - 46.0).abs() < 1e-9);
}

#[test]
fn extra_contribution_is_the_raw_score() {
    let grade = module_grade("bonus", 0.5, 0.0, true);
    assert_eq!(grade.contribution_points(), 0.5);
}

#[test]
fn only_the_latest_final_adjustment_is_effective() {
    let modules = vec![module_grade("theory", 8.0, 100.0, false)];
    let mut first = final_adjustment(2.0);
    first.id = AdjustmentId("adj-1".to_string());
    let mut second = final_adjustment(5.0);
    second.id = AdjustmentId("adj-2".to_string());

    let grade = aggregate(&modules, &[first, second]);

    assert_eq!(grade.adjustment_points, 5.0);
    assert!((grade.final_points - 85.0).abs() < 1e-9);
}

#[test]
fn voided_final_adjustments_fall_back_to_the_previous_entry() {
    let modules = vec![module_grade("theory", 8.0, 100.0, false)];
    let mut first = final_adjustment(2.0);
    first.id = AdjustmentId("adj-1".to_string());
    let mut second = final_adjustment(5.0);
    second.id = AdjustmentId("adj-2".to_string());
    second.voided = true;

    let grade = aggregate(&modules, &[first, second]);

    assert_eq!(grade.adjustment_points, 2.0);
}

#[test]
fn module_warnings_propagate_to_the_final_grade() {
    let mut module = module_grade("theory", 8.0, 100.0, false);
    module.warnings.push(DataWarning::EmptyConstituent {
        constituent_id: crate::grading::ConstituentId("homework".to_string()),
    });

    let grade = aggregate(&[module], &[]);

    assert_eq!(grade.warnings.len(), 1);
    assert_eq!(grade.adjustment_points, 0.0);
}

#[test]
fn aggregation_is_bit_identical_across_runs() {
    let modules = vec![
        module_grade("theory", 8.583_333_333_333_333, 60.0, false),
        module_grade("lab", 9.0, 40.0, false),
    ];

    let first = aggregate(&modules, &[]);
    let second = aggregate(&modules, &[]);

    assert_eq!(first.final_points.to_bits(), second.final_points.to_bits());
    assert_eq!(
        first.weighted_points.to_bits(),
        second.weighted_points.to_bits()
    );
}
