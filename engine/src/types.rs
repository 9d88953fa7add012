use serde::{Deserialize, Serialize};
use std::fmt;

use crate::records::Course;

pub const FEATURE_COUNT: usize = 7;

pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "gpa",
    "progress_rate",
    "bloom_score",
    "error_count",
    "priority_code",
    "severity_code",
    "bloom_level_code",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(into = "u8", try_from = "u8")]
pub enum RiskLabel {
    Safe,
    AtRisk,
}

impl RiskLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLabel::Safe => "SAFE",
            RiskLabel::AtRisk => "AT_RISK",
        }
    }

    pub fn is_at_risk(&self) -> bool {
        matches!(self, RiskLabel::AtRisk)
    }
}

impl From<RiskLabel> for u8 {
    fn from(label: RiskLabel) -> Self {
        match label {
            RiskLabel::Safe => 0,
            RiskLabel::AtRisk => 1,
        }
    }
}

impl TryFrom<u8> for RiskLabel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RiskLabel::Safe),
            1 => Ok(RiskLabel::AtRisk),
            other => Err(format!("risk label must be 0 or 1, got {}", other)),
        }
    }
}

impl fmt::Display for RiskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FeatureVector {
    pub gpa: f64,
    pub progress_rate: f64,
    pub bloom_score: f64,
    pub error_count: u32,
    pub priority_code: f64,
    pub severity_code: f64,
    pub bloom_level_code: u8,
}

impl FeatureVector {
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.gpa,
            self.progress_rate,
            self.bloom_score,
            self.error_count as f64,
            self.priority_code,
            self.severity_code,
            self.bloom_level_code as f64,
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StudentState {
    pub studentid: String,
    pub name: String,
    pub gpa: f64,
    pub progress_rate: f64,
    pub bloom_score: f64,
    pub error_count: u32,
    pub priority: f64,
    pub severity: f64,
    pub bloom_level: u8,
    #[serde(default)]
    pub num_submissions: u32,
}

impl StudentState {
    pub fn feature_vector(&self) -> FeatureVector {
        FeatureVector {
            gpa: self.gpa,
            progress_rate: self.progress_rate,
            bloom_score: self.bloom_score,
            error_count: self.error_count,
            priority_code: self.priority,
            severity_code: self.severity,
            bloom_level_code: self.bloom_level,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAssessment {
    pub label: RiskLabel,
    pub message: String,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearningPathRecord {
    pub studentid: String,
    pub name: String,
    pub gpa: f64,
    pub progress_rate: f64,
    pub bloom_score: f64,
    pub error_count: u32,
    pub priority: f64,
    pub severity: f64,
    pub bloom_level: String,
    pub risk: RiskLabel,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterventionSuggestion {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: SuggestionKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct ModelMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub f1_cv: f64,
}

impl ModelMetrics {
    pub fn rounded(self) -> Self {
        fn round2(value: f64) -> f64 {
            ((value * 100.0).round() / 100.0).clamp(0.0, 1.0)
        }

        Self {
            accuracy: round2(self.accuracy),
            precision: round2(self.precision),
            recall: round2(self.recall),
            f1_score: round2(self.f1_score),
            f1_cv: round2(self.f1_cv),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EvaluationScenario {
    pub name: &'static str,
    pub gpa: f64,
    pub progress_rate: f64,
    pub bloom_score: f64,
    pub num_submissions: u32,
    pub num_errors: u32,
    pub errors: &'static [&'static str],
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioResult {
    pub scenario: String,
    pub recommendation: String,
}

// API payloads

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub risk: RiskLabel,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarningResponse {
    pub studentid: String,
    pub content: String,
    pub risk: RiskLabel,
    pub recommendations: Vec<String>,
    pub warningid: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningPathResponse {
    pub learning_path: LearningPathRecord,
    pub standing: String,
    pub current_course: Option<Course>,
    pub recommended_courses: Vec<Course>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterventionResponse {
    pub studentid: String,
    pub suggestions: Vec<InterventionSuggestion>,
    pub interventionid: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmEvaluationResponse {
    pub studentid: String,
    pub evaluation_results: Vec<ScenarioResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainResponse {
    pub success: bool,
    pub message: String,
    pub metrics: ModelMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_label_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&RiskLabel::AtRisk).unwrap(), "1");
        assert_eq!(serde_json::from_str::<RiskLabel>("0").unwrap(), RiskLabel::Safe);
        assert!(serde_json::from_str::<RiskLabel>("2").is_err());
    }

    #[test]
    fn test_feature_vector_order_matches_names() {
        let vector = FeatureVector {
            gpa: 3.1,
            progress_rate: 55.0,
            bloom_score: 6.5,
            error_count: 4,
            priority_code: 1.5,
            severity_code: 0.5,
            bloom_level_code: 3,
        };
        let values = vector.to_array();
        assert_eq!(values.len(), FEATURE_NAMES.len());
        assert_eq!(values[0], 3.1);
        assert_eq!(values[3], 4.0);
        assert_eq!(values[6], 3.0);
    }

    #[test]
    fn test_metrics_rounding() {
        let metrics = ModelMetrics {
            accuracy: 0.9349,
            precision: 1.0,
            recall: 0.875,
            f1_score: 0.0,
            f1_cv: 0.666_666,
        }
        .rounded();
        assert_eq!(metrics.accuracy, 0.93);
        assert_eq!(metrics.recall, 0.88);
        assert_eq!(metrics.f1_cv, 0.67);
    }

    #[test]
    fn test_suggestion_kind_wire_name() {
        let suggestion = InterventionSuggestion {
            id: "general_S1".into(),
            title: "t".into(),
            content: "c".into(),
            kind: SuggestionKind::Info,
        };
        let value = serde_json::to_value(&suggestion).unwrap();
        assert_eq!(value["type"], "info");
    }
}
