use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::domain::{AdjustmentId, AdjustmentScope, ItemId, ModuleId, StudentId};
use super::orchestrator::{ComputeError, UnitKey};
use super::policy::BindingScope;
use super::service::{AdjustmentDraft, GradeService, GradeServiceError};
use super::store::{DerivedGradeSink, ScoreStore, StoreError};
use super::views::{ConstituentBreakdownEntry, FinalGradeView, ModuleBreakdownEntry};

/// Router builder exposing the engine's write and read interfaces.
pub fn grade_router<S, D>(service: Arc<GradeService<S, D>>) -> Router
where
    S: ScoreStore + 'static,
    D: DerivedGradeSink + 'static,
{
    Router::new()
        .route("/api/v1/grades/scores", post(record_score_handler::<S, D>))
        .route(
            "/api/v1/grades/adjustments",
            post(record_adjustment_handler::<S, D>),
        )
        .route(
            "/api/v1/grades/adjustments/:adjustment_id/void",
            post(void_adjustment_handler::<S, D>),
        )
        .route("/api/v1/grades/bindings", post(bind_policy_handler::<S, D>))
        .route("/api/v1/grades/recompute", post(recompute_handler::<S, D>))
        .route(
            "/api/v1/grades/students/:student_id/final",
            get(final_grade_handler::<S, D>),
        )
        .route(
            "/api/v1/grades/students/:student_id/modules",
            get(module_breakdown_handler::<S, D>),
        )
        .route(
            "/api/v1/grades/students/:student_id/modules/:module_id/constituents",
            get(constituent_breakdown_handler::<S, D>),
        )
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScoreRequest {
    student_id: String,
    item_id: String,
    earned_points: f64,
    #[serde(default)]
    max_points_override: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AdjustmentRequest {
    scope: AdjustmentScope,
    scope_id: String,
    student_id: String,
    delta_points: f64,
    note: String,
    actor: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BindingRequest {
    scope: BindingScope,
    scope_id: String,
    policy_name: String,
    policy_version: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RecomputeRequest {
    student_id: String,
    /// Recompute one module's unit when set, the final aggregate otherwise.
    #[serde(default)]
    module_id: Option<String>,
}

pub(crate) async fn record_score_handler<S, D>(
    State(service): State<Arc<GradeService<S, D>>>,
    axum::Json(request): axum::Json<ScoreRequest>,
) -> Response
where
    S: ScoreStore + 'static,
    D: DerivedGradeSink + 'static,
{
    let result = service.record_score(
        &StudentId(request.student_id),
        &ItemId(request.item_id),
        request.earned_points,
        request.max_points_override,
    );

    match result {
        Ok(()) => (StatusCode::ACCEPTED, axum::Json(json!({ "status": "accepted" })))
            .into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn record_adjustment_handler<S, D>(
    State(service): State<Arc<GradeService<S, D>>>,
    axum::Json(request): axum::Json<AdjustmentRequest>,
) -> Response
where
    S: ScoreStore + 'static,
    D: DerivedGradeSink + 'static,
{
    let draft = AdjustmentDraft {
        scope: request.scope,
        scope_id: request.scope_id,
        student_id: StudentId(request.student_id),
        delta_points: request.delta_points,
        note: request.note,
        actor: request.actor,
    };

    match service.record_adjustment(draft) {
        Ok(adjustment) => (StatusCode::ACCEPTED, axum::Json(adjustment)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn void_adjustment_handler<S, D>(
    State(service): State<Arc<GradeService<S, D>>>,
    Path(adjustment_id): Path<String>,
) -> Response
where
    S: ScoreStore + 'static,
    D: DerivedGradeSink + 'static,
{
    match service.void_adjustment(&AdjustmentId(adjustment_id)) {
        Ok(voided) => (StatusCode::OK, axum::Json(voided)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn bind_policy_handler<S, D>(
    State(service): State<Arc<GradeService<S, D>>>,
    axum::Json(request): axum::Json<BindingRequest>,
) -> Response
where
    S: ScoreStore + 'static,
    D: DerivedGradeSink + 'static,
{
    let result = service.bind_policy(
        request.scope,
        &request.scope_id,
        &request.policy_name,
        request.policy_version,
    );

    match result {
        Ok(()) => (StatusCode::ACCEPTED, axum::Json(json!({ "status": "accepted" })))
            .into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn recompute_handler<S, D>(
    State(service): State<Arc<GradeService<S, D>>>,
    axum::Json(request): axum::Json<RecomputeRequest>,
) -> Response
where
    S: ScoreStore + 'static,
    D: DerivedGradeSink + 'static,
{
    let student_id = StudentId(request.student_id);
    let unit = match request.module_id {
        Some(module_id) => UnitKey::module(student_id, ModuleId(module_id)),
        None => UnitKey::final_grade(student_id, service.class_id().clone()),
    };

    let state = service.recompute(unit);
    (StatusCode::OK, axum::Json(state)).into_response()
}

pub(crate) async fn final_grade_handler<S, D>(
    State(service): State<Arc<GradeService<S, D>>>,
    Path(student_id): Path<String>,
) -> Response
where
    S: ScoreStore + 'static,
    D: DerivedGradeSink + 'static,
{
    let student_id = StudentId(student_id);
    let unit = UnitKey::final_grade(student_id.clone(), service.class_id().clone());
    let state = service.unit_state(&unit);

    if !state.is_fresh() {
        return (StatusCode::OK, axum::Json(FinalGradeView::pending(&state))).into_response();
    }

    match service.final_grade(&student_id) {
        Ok(grade) => (StatusCode::OK, axum::Json(FinalGradeView::fresh(&grade))).into_response(),
        Err(error) => error_response(GradeServiceError::Compute(error)),
    }
}

pub(crate) async fn module_breakdown_handler<S, D>(
    State(service): State<Arc<GradeService<S, D>>>,
    Path(student_id): Path<String>,
) -> Response
where
    S: ScoreStore + 'static,
    D: DerivedGradeSink + 'static,
{
    match service.module_breakdown(&StudentId(student_id)) {
        Ok(grades) => {
            let entries: Vec<ModuleBreakdownEntry> =
                grades.iter().map(ModuleBreakdownEntry::from_grade).collect();
            (StatusCode::OK, axum::Json(entries)).into_response()
        }
        Err(error) => error_response(GradeServiceError::Compute(error)),
    }
}

pub(crate) async fn constituent_breakdown_handler<S, D>(
    State(service): State<Arc<GradeService<S, D>>>,
    Path((student_id, module_id)): Path<(String, String)>,
) -> Response
where
    S: ScoreStore + 'static,
    D: DerivedGradeSink + 'static,
{
    let result = service.constituent_breakdown(&StudentId(student_id), &ModuleId(module_id));

    match result {
        Ok(grades) => {
            let entries: Vec<ConstituentBreakdownEntry> = grades
                .iter()
                .map(ConstituentBreakdownEntry::from_grade)
                .collect();
            (StatusCode::OK, axum::Json(entries)).into_response()
        }
        Err(error) => error_response(GradeServiceError::Compute(error)),
    }
}

fn error_response(error: GradeServiceError) -> Response {
    let status = match &error {
        GradeServiceError::Structural(_) => StatusCode::UNPROCESSABLE_ENTITY,
        GradeServiceError::UnknownItem(_) | GradeServiceError::UnknownScope { .. } => {
            StatusCode::NOT_FOUND
        }
        GradeServiceError::Store(StoreError::NotFound) => StatusCode::NOT_FOUND,
        GradeServiceError::Store(StoreError::Conflict) => StatusCode::CONFLICT,
        GradeServiceError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        GradeServiceError::Compute(ComputeError::UnknownModule(_))
        | GradeServiceError::Compute(ComputeError::UnknownConstituent(_)) => StatusCode::NOT_FOUND,
        GradeServiceError::Compute(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let payload = json!({ "error": error.to_string() });
    (status, axum::Json(payload)).into_response()
}
