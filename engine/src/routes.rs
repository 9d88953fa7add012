use axum::{
    extract::{MatchedPath, Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Instant;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{auth::AuthContext, engine::TutorEngine, error::AppError, types::*};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<TutorEngine>,
    pub prometheus: Option<PrometheusHandle>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/risk/predict", post(predict_handler))
        .route("/api/model/metrics", get(model_metrics_handler))
        .route("/api/model/retrain", post(retrain_handler))
        .route("/api/students/:studentid/warning", post(warning_handler))
        .route("/api/students/:studentid/learning-path", get(learning_path_handler))
        .route("/api/students/:studentid/intervention", get(intervention_handler))
        .route("/api/students/:studentid/llm-evaluation", get(llm_evaluation_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(middleware::from_fn(track_requests))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn track_requests(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!("requests_total", "route" => route.clone(), "status" => status).increment(1);
    metrics::histogram!("request_duration_ms", "route" => route).record(start.elapsed().as_secs_f64() * 1000.0);
    response
}

async fn predict_handler(
    State(state): State<AppState>,
    _ctx: AuthContext,
    Json(features): Json<FeatureVector>,
) -> Result<Json<PredictResponse>, AppError> {
    let risk = state.engine.predict_risk(&features)?;
    Ok(Json(PredictResponse {
        risk,
        label: risk.as_str().to_string(),
    }))
}

async fn model_metrics_handler(
    State(state): State<AppState>,
    _ctx: AuthContext,
) -> Result<Json<ModelMetrics>, AppError> {
    Ok(Json(state.engine.model_metrics().await?))
}

async fn retrain_handler(
    State(state): State<AppState>,
    ctx: AuthContext,
) -> Result<Json<RetrainResponse>, AppError> {
    info!("Retrain requested");
    Ok(Json(state.engine.retrain(&ctx).await?))
}

async fn warning_handler(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(studentid): Path<String>,
) -> Result<(StatusCode, Json<WarningResponse>), AppError> {
    let response = state.engine.create_warning(&ctx, &studentid).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn learning_path_handler(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(studentid): Path<String>,
) -> Result<Json<LearningPathResponse>, AppError> {
    Ok(Json(state.engine.learning_path(&ctx, &studentid).await?))
}

async fn intervention_handler(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(studentid): Path<String>,
) -> Result<Json<InterventionResponse>, AppError> {
    Ok(Json(state.engine.predict_intervention(&ctx, &studentid).await?))
}

async fn llm_evaluation_handler(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(studentid): Path<String>,
) -> Result<Json<LlmEvaluationResponse>, AppError> {
    Ok(Json(state.engine.evaluate_llm(&ctx, &studentid).await?))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.engine.uptime_seconds(),
        "model_trees": state.engine.classifier().model().num_trees(),
    }))
}
