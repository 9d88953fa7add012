use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use tutor_engine::{
    auth::{AuthContext, USER_HEADER},
    classifier::{ClassifierConfig, RiskClassifier},
    engine::TutorEngine,
    error::GenerationError,
    forest::ForestConfig,
    model_store::MemoryModelStore,
    recommendation::{PromptStyle, RecommendationGenerator, TextGenerator},
    records::{InMemoryRecords, RecordSet},
    routes::{router, AppState},
};

const REPLY: &str = "## Error 1: Syntax\n### 1. Analysis\nA semicolon is missing.\n### 2. Suggestion\nCheck line endings.\n";

struct Scripted;

#[async_trait]
impl TextGenerator for Scripted {
    async fn generate(&self, _system: &str, _user: &str) -> Result<String, GenerationError> {
        Ok(REPLY.to_string())
    }
}

fn records() -> RecordSet {
    serde_json::from_value(json!({
        "students": [
            { "studentid": "SV01", "name": "Lan", "totalgpa": 1.7 },
            { "studentid": "SV02", "name": "Minh", "totalgpa": 3.6 }
        ],
        "progress": [
            { "studentid": "SV01", "courseid": 1, "progressrate": 15.0 }
        ],
        "bloom_assessments": [
            { "studentid": "SV01", "courseid": 1, "bloomlevel": "Hiểu", "score": 4.0 }
        ],
        "warnings": [
            { "warningid": 1, "studentid": "SV01", "message": "Lỗi cú pháp trong bài 2", "severity": "HIGH", "priority": "HIGH" }
        ],
        "courses": [
            { "courseid": 1, "coursename": "Nhập môn lập trình", "difficulty": "BASIC" },
            { "courseid": 2, "coursename": "Lập trình C", "difficulty": "BASIC" }
        ]
    }))
    .unwrap()
}

fn app() -> Router {
    let classifier = RiskClassifier::load_or_train(
        Arc::new(MemoryModelStore::new()),
        ClassifierConfig {
            forest: ForestConfig {
                num_trees: 10,
                ..ForestConfig::default()
            },
            ..ClassifierConfig::default()
        },
    )
    .unwrap();

    let engine = TutorEngine::new(
        Arc::new(InMemoryRecords::new(records())),
        Arc::new(classifier),
        RecommendationGenerator::new(Arc::new(Scripted), PromptStyle::Markdown),
    );

    router(AppState {
        engine: Arc::new(engine),
        prometheus: None,
    })
}

fn request(method: &str, uri: &str, caller: Option<AuthContext>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(ctx) = caller {
        builder = builder.header(USER_HEADER, ctx.encode());
    }
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn health_reports_version() {
    let (status, body) = send(app(), request("GET", "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["model_trees"], 10);
}

#[tokio::test]
async fn missing_user_header_is_unauthorized() {
    let (status, body) = send(app(), request("GET", "/api/students/SV01/learning-path", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], 401);
}

#[tokio::test]
async fn students_cannot_read_other_students() {
    let caller = Some(AuthContext::student("SV02"));
    let (status, _) = send(app(), request("GET", "/api/students/SV01/intervention", caller, None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn missing_progress_is_not_found() {
    let caller = Some(AuthContext::student("SV02"));
    let (status, body) = send(app(), request("POST", "/api/students/SV02/warning", caller, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("Progress record"));
}

#[tokio::test]
async fn predict_flags_struggling_profile() {
    let features = json!({
        "gpa": 1.6,
        "progress_rate": 12.0,
        "bloom_score": 3.0,
        "error_count": 9,
        "priority_code": 2.0,
        "severity_code": 2.0,
        "bloom_level_code": 0
    });
    let caller = Some(AuthContext::admin());
    let (status, body) = send(app(), request("POST", "/api/risk/predict", caller, Some(features))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["risk"], 1);
    assert_eq!(body["label"], "AT_RISK");
}

#[tokio::test]
async fn predict_rejects_out_of_range_gpa() {
    let features = json!({
        "gpa": 7.0,
        "progress_rate": 50.0,
        "bloom_score": 5.0,
        "error_count": 0,
        "priority_code": 0.0,
        "severity_code": 0.0,
        "bloom_level_code": 1
    });
    let caller = Some(AuthContext::admin());
    let (status, _) = send(app(), request("POST", "/api/risk/predict", caller, Some(features))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn intervention_returns_parsed_suggestions() {
    let caller = Some(AuthContext::student("SV01"));
    let (status, body) = send(app(), request("GET", "/api/students/SV01/intervention", caller, None)).await;
    assert_eq!(status, StatusCode::OK);

    let suggestions = body["suggestions"].as_array().unwrap();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0]["id"], "error_1_SV01");
    assert_eq!(suggestions[0]["type"], "info");
    assert_eq!(suggestions[0]["title"], "Improvement suggestion for Syntax");
    assert_eq!(body["interventionid"], 1);
}

#[tokio::test]
async fn model_metrics_are_fractions() {
    let caller = Some(AuthContext::admin());
    let (status, body) = send(app(), request("GET", "/api/model/metrics", caller, None)).await;
    assert_eq!(status, StatusCode::OK);
    for key in ["accuracy", "precision", "recall", "f1_score", "f1_cv"] {
        let value = body[key].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&value), "{} = {}", key, value);
    }
}

#[tokio::test]
async fn retrain_requires_admin() {
    let caller = Some(AuthContext::student("SV01"));
    let (status, _) = send(app(), request("POST", "/api/model/retrain", caller, None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn metrics_endpoint_without_recorder() {
    let (status, _) = send(app(), request("GET", "/metrics", None, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn warning_is_created_for_struggling_student() {
    let caller = Some(AuthContext::student("SV01"));
    let (status, body) = send(app(), request("POST", "/api/students/SV01/warning", caller, None)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["risk"], 1);
    assert!(body["content"].as_str().unwrap().contains("low GPA"));
    assert!(!body["recommendations"].as_array().unwrap().is_empty());
    assert!(body["warningid"].is_u64());
}
