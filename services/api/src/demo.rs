use crate::infra::{
    default_registry, demo_class_id, demo_structure, InMemoryGradeSink, InMemoryGradeStore,
};
use clap::Args;
use std::sync::Arc;

use gradecore::error::AppError;
use gradecore::grading::{
    AdjustmentDraft, AdjustmentScope, BindingScope, ConstituentBreakdownEntry, FinalGradeView,
    GradeService, ItemId, ModuleBreakdownEntry, ModuleId, RetryPolicy, StudentId,
};

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Student identifier used for the seeded demo grades
    #[arg(long, default_value = "stu-1")]
    pub(crate) student: String,
    /// Skip binding the five-rule policy to the theory module
    #[arg(long)]
    pub(crate) skip_policy: bool,
    /// Include the per-constituent breakdown for every module
    #[arg(long)]
    pub(crate) list_constituents: bool,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        student,
        skip_policy,
        list_constituents,
    } = args;
    let student = StudentId(student);

    println!("Grade aggregation demo (class {})", demo_class_id().0);

    let store = Arc::new(InMemoryGradeStore::with_structure(demo_structure()));
    store.enroll(&demo_class_id(), student.clone());
    let sink = Arc::new(InMemoryGradeSink::default());
    let service = GradeService::load(
        &demo_class_id(),
        default_registry(),
        store,
        sink.clone(),
        RetryPolicy::default(),
    )?;

    println!("\nRecording raw item scores");
    for (item, earned, max) in [
        ("hw-1", 9.0, 10.0),
        ("hw-2", 17.0, 20.0),
        ("midterm", 45.0, 50.0),
        ("final-exam", 40.0, 50.0),
        ("project-1", 27.0, 30.0),
        ("challenge-1", 0.5, 10.0),
    ] {
        service
            .record_score(&student, &ItemId(item.to_string()), earned, None)
            .map_err(AppError::from)?;
        println!("- {item}: {earned}/{max}");
    }

    render_breakdown(&service, &student, list_constituents)?;

    if !skip_policy {
        println!("\nBinding the five-rule policy (v1) to the theory module");
        service
            .bind_policy(BindingScope::Module, "theory", "five-rule", 1)
            .map_err(AppError::from)?;
        render_breakdown(&service, &student, list_constituents)?;
    }

    println!("\nRecording a +2 final adjustment, then voiding it");
    let adjustment = service
        .record_adjustment(AdjustmentDraft {
            scope: AdjustmentScope::Final,
            scope_id: demo_class_id().0,
            student_id: student.clone(),
            delta_points: 2.0,
            note: "participation credit".to_string(),
            actor: "demo-instructor".to_string(),
        })
        .map_err(AppError::from)?;
    let with_adjustment = service
        .final_grade(&student)
        .map_err(grading_error)?;
    println!(
        "- adjustment {} applied: final {:.2}",
        adjustment.id.0, with_adjustment.final_points
    );

    service
        .void_adjustment(&adjustment.id)
        .map_err(AppError::from)?;
    let without_adjustment = service
        .final_grade(&student)
        .map_err(grading_error)?;
    println!(
        "- adjustment voided: final back to {:.2} (history retained)",
        without_adjustment.final_points
    );

    let published = sink.final_grades();
    println!(
        "\nDerived-view layer received {} final-grade writes",
        published.len()
    );
    if let Some(latest) = published.last() {
        match serde_json::to_string_pretty(&FinalGradeView::fresh(&latest.grade)) {
            Ok(json) => println!("Latest published grade:\n{json}"),
            Err(err) => println!("Latest published grade unavailable: {err}"),
        }
    }

    Ok(())
}

fn render_breakdown(
    service: &GradeService<InMemoryGradeStore, InMemoryGradeSink>,
    student: &StudentId,
    list_constituents: bool,
) -> Result<(), AppError> {
    let modules = service
        .module_breakdown(student)
        .map_err(grading_error)?;

    println!("\nModule breakdown");
    for module in &modules {
        let entry = ModuleBreakdownEntry::from_grade(module);
        println!(
            "- {}: score {:.2} | {} pts | rule {}{}",
            entry.module_id.0,
            entry.score,
            entry.contribution_points,
            entry.matched_rule,
            if entry.is_extra { " (extra)" } else { "" }
        );

        if list_constituents {
            let constituents = service
                .constituent_breakdown(student, &ModuleId(entry.module_id.0.clone()))
                .map_err(grading_error)?;
            for constituent in &constituents {
                let view = ConstituentBreakdownEntry::from_grade(constituent);
                println!(
                    "    - {}: {:.2}% (raw {:.2}%)",
                    view.constituent_id.0, view.percent, view.raw_percent
                );
            }
        }
    }

    let final_grade = service
        .final_grade(student)
        .map_err(grading_error)?;
    println!(
        "Final: {:.2} = {:.2} weighted + {:.2} extra + {:.2} adjustment",
        final_grade.final_points,
        final_grade.weighted_points,
        final_grade.extra_points,
        final_grade.adjustment_points
    );

    Ok(())
}

fn grading_error(err: gradecore::grading::ComputeError) -> AppError {
    AppError::Grading(err.into())
}
