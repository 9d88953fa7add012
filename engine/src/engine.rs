use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::{
    auth::AuthContext,
    classifier::RiskClassifier,
    error::{missing, AppError},
    features::{
        count_submissions, encode_bloomlevel, summarize_warnings, LEARNING_PATH_ERROR_CAP,
    },
    parser::parse_intervention_suggestions,
    recommendation::{RecommendationGenerator, ACTUAL_SCENARIO_NAME, EVALUATION_SCENARIOS},
    records::{Intervention, LearnerRecords, Progress, Warning},
    rules::{
        assess, classify_standing, course_tier, generate_learning_path, risk_warning,
        URGENT_WARNING_TYPE,
    },
    types::*,
};

pub struct TutorEngine {
    records: Arc<dyn LearnerRecords>,
    classifier: Arc<RiskClassifier>,
    recommender: RecommendationGenerator,
    start_time: Instant,
}

struct LearnerContext {
    state: StudentState,
    progress: Progress,
    warnings: Vec<Warning>,
}

impl TutorEngine {
    pub fn new(
        records: Arc<dyn LearnerRecords>,
        classifier: Arc<RiskClassifier>,
        recommender: RecommendationGenerator,
    ) -> Self {
        info!("Tutor engine ready (prompt style: {:?})", recommender.style());
        Self {
            records,
            classifier,
            recommender,
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn classifier(&self) -> &Arc<RiskClassifier> {
        &self.classifier
    }

    pub fn predict_risk(&self, features: &FeatureVector) -> Result<RiskLabel, AppError> {
        validate_features(features)?;
        Ok(self.classifier.predict(features))
    }

    pub async fn model_metrics(&self) -> Result<ModelMetrics, AppError> {
        let classifier = self.classifier.clone();
        tokio::task::spawn_blocking(move || classifier.metrics())
            .await
            .map_err(|e| AppError::Internal(format!("metrics task failed: {}", e)))?
    }

    pub async fn retrain(&self, ctx: &AuthContext) -> Result<RetrainResponse, AppError> {
        ctx.require_admin()?;
        let classifier = self.classifier.clone();
        let metrics = tokio::task::spawn_blocking(move || classifier.retrain())
            .await
            .map_err(|e| AppError::Internal(format!("retrain task failed: {}", e)))??;

        Ok(RetrainResponse {
            success: true,
            message: "Risk model retrained".to_string(),
            metrics,
        })
    }

    pub async fn create_warning(&self, ctx: &AuthContext, studentid: &str) -> Result<WarningResponse, AppError> {
        ctx.authorize_student(studentid)?;
        let learner = self.learner_context(studentid, None).await?;
        let risk = self.classifier.predict(&learner.state.feature_vector());
        let assessment = assess(&learner.state, risk);

        let already_flagged = learner
            .warnings
            .iter()
            .any(|w| !w.isresolved && w.warningtype == URGENT_WARNING_TYPE);

        let warningid = match risk_warning(&learner.state, risk) {
            Some(warning) if !already_flagged => {
                let id = self.records.add_warning(warning).await?;
                info!("Raised urgent warning {} for student {}", id, studentid);
                Some(id)
            }
            _ => None,
        };

        Ok(WarningResponse {
            studentid: studentid.to_string(),
            content: assessment.message,
            risk,
            recommendations: assessment.recommendations,
            warningid,
        })
    }

    pub async fn learning_path(&self, ctx: &AuthContext, studentid: &str) -> Result<LearningPathResponse, AppError> {
        ctx.authorize_student(studentid)?;
        let learner = self
            .learner_context(studentid, Some(LEARNING_PATH_ERROR_CAP))
            .await?;
        let state = &learner.state;
        let risk = self.classifier.predict(&state.feature_vector());

        let courses = self.records.courses().await?;
        let current_course = courses
            .iter()
            .find(|c| c.courseid == learner.progress.courseid && c.is_active())
            .cloned();

        let tier = course_tier(risk, state.gpa, state.bloom_level);
        let recommended_courses: Vec<_> = courses
            .into_iter()
            .filter(|c| c.difficulty == tier && c.is_active() && c.courseid != learner.progress.courseid)
            .take(2)
            .collect();

        debug!(
            "Learning path for {}: risk={}, tier={:?}, {} courses",
            studentid,
            risk,
            tier,
            recommended_courses.len()
        );

        Ok(LearningPathResponse {
            learning_path: generate_learning_path(state, risk),
            standing: classify_standing(state.gpa).as_str().to_string(),
            current_course,
            recommended_courses,
        })
    }

    pub async fn predict_intervention(
        &self,
        ctx: &AuthContext,
        studentid: &str,
    ) -> Result<InterventionResponse, AppError> {
        ctx.authorize_student(studentid)?;
        let started = Instant::now();
        let learner = self.learner_context(studentid, None).await?;

        let error_messages: Vec<String> = learner.warnings.iter().map(|w| w.message.clone()).collect();
        let common_error_types = self.common_error_types(learner.progress.courseid).await?;

        let text = self
            .recommender
            .generate_intervention_text(&learner.state, &error_messages, &common_error_types)
            .await;
        let suggestions = parse_intervention_suggestions(&text, studentid, &error_messages);

        let interventionid = self
            .records
            .add_intervention(Intervention::new(studentid, text))
            .await?;

        info!(
            "Intervention {} for {} with {} suggestions in {:?}",
            interventionid,
            studentid,
            suggestions.len(),
            started.elapsed()
        );

        Ok(InterventionResponse {
            studentid: studentid.to_string(),
            suggestions,
            interventionid,
        })
    }

    pub async fn evaluate_llm(&self, ctx: &AuthContext, studentid: &str) -> Result<LlmEvaluationResponse, AppError> {
        ctx.require_admin()?;
        let learner = self.learner_context(studentid, None).await?;

        let mut evaluation_results = self.recommender.evaluate_scenarios(&EVALUATION_SCENARIOS).await;

        let error_messages: Vec<String> = learner
            .warnings
            .iter()
            .filter(|w| is_error_message(&w.message))
            .map(|w| w.message.clone())
            .collect();
        let common_error_types = self.common_error_types(learner.progress.courseid).await?;
        let actual = self
            .recommender
            .generate_intervention_text(&learner.state, &error_messages, &common_error_types)
            .await;

        evaluation_results.push(ScenarioResult {
            scenario: ACTUAL_SCENARIO_NAME.to_string(),
            recommendation: actual,
        });

        Ok(LlmEvaluationResponse {
            studentid: studentid.to_string(),
            evaluation_results,
        })
    }

    async fn common_error_types(&self, courseid: i64) -> Result<Vec<String>, AppError> {
        Ok(self
            .records
            .common_errors(courseid)
            .await?
            .into_iter()
            .map(|e| e.error_type)
            .collect())
    }

    async fn learner_context(&self, studentid: &str, error_cap: Option<u32>) -> Result<LearnerContext, AppError> {
        let student = self
            .records
            .student(studentid)
            .await?
            .ok_or_else(|| missing("Student", studentid))?;
        let progress = self
            .records
            .progress(studentid)
            .await?
            .ok_or_else(|| missing("Progress record", studentid))?;
        let bloom = self
            .records
            .bloom_assessment(studentid)
            .await?
            .ok_or_else(|| missing("Bloom assessment", studentid))?;

        let warnings: Vec<Warning> = self
            .records
            .warnings(studentid)
            .await?
            .into_iter()
            .filter(|w| !w.isresolved)
            .collect();
        let summary = summarize_warnings(&warnings);
        let error_count = error_cap.map_or(summary.count, |cap| summary.count.min(cap));

        let assignments = self.records.assignments(progress.courseid).await?;
        let num_submissions = count_submissions(&student.name, &assignments);

        let state = StudentState {
            studentid: student.studentid,
            name: student.name,
            gpa: student.totalgpa,
            progress_rate: progress.progressrate,
            bloom_score: bloom.score,
            error_count,
            priority: summary.priority,
            severity: summary.severity,
            bloom_level: encode_bloomlevel(&bloom.bloomlevel),
            num_submissions,
        };

        Ok(LearnerContext {
            state,
            progress,
            warnings,
        })
    }
}

fn is_error_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("lỗi") || lower.contains("error")
}

fn validate_features(features: &FeatureVector) -> Result<(), AppError> {
    let values = features.to_array();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(AppError::InvalidInput("feature values must be finite".to_string()));
    }
    if !(0.0..=4.0).contains(&features.gpa) {
        return Err(AppError::InvalidInput(format!("gpa {} outside [0, 4]", features.gpa)));
    }
    if !(0.0..=100.0).contains(&features.progress_rate) {
        return Err(AppError::InvalidInput(format!(
            "progress_rate {} outside [0, 100]",
            features.progress_rate
        )));
    }
    if !(0.0..=2.0).contains(&features.priority_code) || !(0.0..=2.0).contains(&features.severity_code) {
        return Err(AppError::InvalidInput("priority and severity codes must be within [0, 2]".to_string()));
    }
    if features.bloom_level_code > crate::features::MAX_BLOOM_LEVEL {
        return Err(AppError::InvalidInput(format!(
            "bloom_level_code {} outside [0, 5]",
            features.bloom_level_code
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ClassifierConfig;
    use crate::error::GenerationError;
    use crate::forest::ForestConfig;
    use crate::model_store::MemoryModelStore;
    use crate::recommendation::{PromptStyle, TextGenerator, GENERATION_FAILURE_MESSAGE};
    use crate::records::{InMemoryRecords, RecordSet};
    use async_trait::async_trait;

    struct Canned(Option<&'static str>);

    #[async_trait]
    impl TextGenerator for Canned {
        async fn generate(&self, _system: &str, _user: &str) -> Result<String, GenerationError> {
            self.0.map(str::to_string).ok_or(GenerationError::EmptyResponse)
        }
    }

    fn records() -> RecordSet {
        serde_json::from_value(serde_json::json!({
            "students": [
                { "studentid": "S1", "name": "An", "totalgpa": 1.8 },
                { "studentid": "S2", "name": "Bình", "totalgpa": 3.8 },
                { "studentid": "S3", "name": "Chi", "totalgpa": 3.0 }
            ],
            "progress": [
                { "studentid": "S1", "courseid": 1, "progressrate": 20.0 },
                { "studentid": "S2", "courseid": 1, "progressrate": 90.0 }
            ],
            "bloom_assessments": [
                { "studentid": "S1", "courseid": 1, "bloomlevel": "Nhớ", "score": 3.0 },
                { "studentid": "S2", "courseid": 1, "bloomlevel": "Đánh giá", "score": 9.0 }
            ],
            "warnings": [
                { "warningid": 1, "studentid": "S1", "message": "Lỗi cú pháp: thiếu ;", "severity": "HIGH", "priority": "HIGH" },
                { "warningid": 2, "studentid": "S1", "message": "Nộp bài trễ", "severity": "MEDIUM", "priority": "LOW" },
                { "warningid": 3, "studentid": "S1", "message": "Lỗi logic", "severity": "HIGH", "priority": "HIGH", "isresolved": true }
            ],
            "assignments": [
                { "assignmentid": 1, "courseid": 1, "name": "Bài 1", "studentssubmitted": "An, Bình" }
            ],
            "common_errors": [
                { "errorid": 1, "courseid": 1, "type": "Syntax" }
            ],
            "courses": [
                { "courseid": 1, "coursename": "Nhập môn", "difficulty": "BASIC" },
                { "courseid": 2, "coursename": "C cơ bản", "difficulty": "BASIC" },
                { "courseid": 3, "coursename": "Cấu trúc dữ liệu", "difficulty": "INTERMEDIATE" },
                { "courseid": 4, "coursename": "Giải thuật nâng cao", "difficulty": "ADVANCED" },
                { "courseid": 5, "coursename": "Hệ điều hành", "difficulty": "ADVANCED", "status": "INACTIVE" },
                { "courseid": 6, "coursename": "Trình biên dịch", "difficulty": "ADVANCED" },
                { "courseid": 7, "coursename": "Đồ họa", "difficulty": "ADVANCED" }
            ]
        }))
        .unwrap()
    }

    fn engine_with(reply: Option<&'static str>) -> (TutorEngine, Arc<InMemoryRecords>) {
        let store = Arc::new(InMemoryRecords::new(records()));
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
            store.clone(),
            Arc::new(classifier),
            RecommendationGenerator::new(Arc::new(Canned(reply)), PromptStyle::Markdown),
        );
        (engine, store)
    }

    #[tokio::test]
    async fn test_learner_context_aggregates_open_warnings() {
        let (engine, _) = engine_with(None);
        let learner = engine.learner_context("S1", None).await.unwrap();
        assert_eq!(learner.state.error_count, 2);
        assert_eq!(learner.state.priority, 1.0);
        assert_eq!(learner.state.severity, 1.5);
        assert_eq!(learner.state.num_submissions, 1);
        assert_eq!(learner.state.bloom_level, 0);
    }

    #[tokio::test]
    async fn test_missing_records_are_not_found() {
        let (engine, _) = engine_with(None);
        let admin = AuthContext::admin();
        for id in ["S3", "S9"] {
            let err = engine.create_warning(&admin, id).await.unwrap_err();
            assert!(matches!(err, AppError::MissingPrerequisiteData(_)));
        }
    }

    #[tokio::test]
    async fn test_create_warning_for_at_risk_student() {
        let (engine, store) = engine_with(None);
        let ctx = AuthContext::student("S1");
        let response = engine.create_warning(&ctx, "S1").await.unwrap();
        assert_eq!(response.risk, RiskLabel::AtRisk);
        assert!(response.content.contains("low GPA"));
        assert!(response.warningid.is_some());

        // A second call does not duplicate the open urgent warning
        let again = engine.create_warning(&ctx, "S1").await.unwrap();
        assert!(again.warningid.is_none());
        let urgent = store
            .snapshot()
            .warnings
            .iter()
            .filter(|w| w.warningtype == URGENT_WARNING_TYPE)
            .count();
        assert_eq!(urgent, 1);
    }

    #[tokio::test]
    async fn test_students_cannot_read_others() {
        let (engine, _) = engine_with(None);
        let err = engine
            .learning_path(&AuthContext::student("S1"), "S2")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_learning_path_recommends_courses_by_tier() {
        let (engine, _) = engine_with(None);

        let at_risk = engine.learning_path(&AuthContext::admin(), "S1").await.unwrap();
        assert_eq!(at_risk.standing, "DANGER");
        let ids: Vec<i64> = at_risk.recommended_courses.iter().map(|c| c.courseid).collect();
        assert_eq!(ids, vec![2]);
        assert_eq!(at_risk.current_course.map(|c| c.courseid), Some(1));

        let strong = engine.learning_path(&AuthContext::admin(), "S2").await.unwrap();
        assert_eq!(strong.learning_path.risk, RiskLabel::Safe);
        assert_eq!(strong.standing, "ON_TARGET");
        let ids: Vec<i64> = strong.recommended_courses.iter().map(|c| c.courseid).collect();
        assert_eq!(ids, vec![4, 6]);
    }

    #[tokio::test]
    async fn test_intervention_is_persisted() {
        let (engine, store) = engine_with(Some("## Error 1: Syntax\n### 1. a\n### 2. b\n## Error 2: Late\n"));
        let response = engine
            .predict_intervention(&AuthContext::student("S1"), "S1")
            .await
            .unwrap();
        assert_eq!(response.suggestions.len(), 2);
        assert_eq!(response.suggestions[1].id, "error_2_S1");
        assert_eq!(response.interventionid, 1);
        assert!(store.snapshot().interventions[0].recommendation.starts_with("## Error 1: Syntax"));
    }

    #[tokio::test]
    async fn test_intervention_degrades_when_generator_fails() {
        let (engine, store) = engine_with(None);
        let response = engine
            .predict_intervention(&AuthContext::admin(), "S2")
            .await
            .unwrap();
        assert_eq!(response.suggestions.len(), 1);
        assert_eq!(response.suggestions[0].id, "general_S2");
        assert_eq!(store.snapshot().interventions[0].recommendation, GENERATION_FAILURE_MESSAGE);
    }

    #[tokio::test]
    async fn test_llm_evaluation_appends_actual_case() {
        let (engine, _) = engine_with(Some("text"));
        assert!(engine.evaluate_llm(&AuthContext::student("S1"), "S1").await.is_err());

        let response = engine.evaluate_llm(&AuthContext::admin(), "S1").await.unwrap();
        assert_eq!(response.evaluation_results.len(), 4);
        assert_eq!(response.evaluation_results[3].scenario, ACTUAL_SCENARIO_NAME);
    }

    #[test]
    fn test_feature_validation() {
        let mut features = FeatureVector {
            gpa: 3.0,
            progress_rate: 50.0,
            bloom_score: 5.0,
            error_count: 1,
            priority_code: 1.0,
            severity_code: 1.0,
            bloom_level_code: 2,
        };
        assert!(validate_features(&features).is_ok());
        features.gpa = 4.5;
        assert!(validate_features(&features).is_err());
        features.gpa = f64::NAN;
        assert!(validate_features(&features).is_err());
        features.gpa = 3.0;
        features.bloom_level_code = 6;
        assert!(validate_features(&features).is_err());
    }
}
