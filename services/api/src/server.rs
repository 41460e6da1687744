use crate::cli::ServeArgs;
use crate::infra::{
    default_registry, demo_class_id, demo_structure, AppState, InMemoryGradeSink,
    InMemoryGradeStore,
};
use crate::routes::with_grade_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use gradecore::config::AppConfig;
use gradecore::error::AppError;
use gradecore::grading::{GradeService, RetryPolicy, StudentId};
use gradecore::telemetry;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = Arc::new(InMemoryGradeStore::with_structure(demo_structure()));
    store.enroll(&demo_class_id(), StudentId("stu-1".to_string()));
    let sink = Arc::new(InMemoryGradeSink::default());
    let retry = RetryPolicy {
        max_attempts: config.recompute.retry_max_attempts,
        base_delay: config.recompute.retry_base_delay,
    };
    let grade_service = Arc::new(GradeService::load(
        &demo_class_id(),
        default_registry(),
        store,
        sink,
        retry,
    )?);

    let app = with_grade_routes(grade_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "grade aggregation service ready");

    axum::serve(listener, app).await?;
    Ok(())
}
