use serde::{Deserialize, Serialize};

use crate::features::{bloom_level_name, next_bloom_level};
use crate::records::{CourseDifficulty, Warning};
use crate::types::{LearningPathRecord, RiskAssessment, RiskLabel, StudentState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleBranch {
    Positive,
    HighRisk,
    Moderate,
}

impl RuleBranch {
    pub fn select(state: &StudentState, risk: RiskLabel) -> Self {
        if state.gpa >= 3.5 && state.progress_rate >= 80.0 && state.error_count <= 5 && state.severity <= 1.0 {
            RuleBranch::Positive
        } else if risk.is_at_risk() || state.gpa < 2.0 {
            RuleBranch::HighRisk
        } else {
            RuleBranch::Moderate
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskReason {
    LowGpa,
    SlowProgress,
    ManyErrors,
    SevereWarnings,
    LowBloomScore,
    LowBloomLevel,
    HighPriorityWarnings,
}

impl RiskReason {
    pub fn collect(state: &StudentState) -> Vec<RiskReason> {
        let mut reasons = Vec::new();

        if state.gpa < 2.0 {
            reasons.push(RiskReason::LowGpa);
        }
        if state.progress_rate < 30.0 {
            reasons.push(RiskReason::SlowProgress);
        }
        if state.error_count > 5 {
            reasons.push(RiskReason::ManyErrors);
        }
        // Averaged across warnings, so a fractional threshold
        if state.severity >= 1.5 {
            reasons.push(RiskReason::SevereWarnings);
        }
        if state.bloom_score < 5.0 {
            reasons.push(RiskReason::LowBloomScore);
        }
        if state.bloom_level <= 1 {
            reasons.push(RiskReason::LowBloomLevel);
        }
        if state.priority >= 1.5 {
            reasons.push(RiskReason::HighPriorityWarnings);
        }

        reasons
    }

    fn describe(&self, state: &StudentState) -> String {
        match self {
            RiskReason::LowGpa => format!("low GPA ({})", state.gpa),
            RiskReason::SlowProgress => format!("slow progress ({}%)", state.progress_rate),
            RiskReason::ManyErrors => format!("many academic errors ({})", state.error_count),
            RiskReason::SevereWarnings => "high-severity warnings".to_string(),
            RiskReason::LowBloomScore => format!("low Bloom score ({})", state.bloom_score),
            RiskReason::LowBloomLevel => format!("low thinking level ({})", bloom_level_name(state.bloom_level)),
            RiskReason::HighPriorityWarnings => "high-priority warnings".to_string(),
        }
    }

    fn remediation(&self, state: &StudentState) -> String {
        match self {
            RiskReason::LowGpa => "Focus on raising your GPA through assignments and exams.".to_string(),
            RiskReason::SlowProgress => "Increase study time to improve your progress.".to_string(),
            RiskReason::ManyErrors => "Review your academic errors and attend remediation sessions.".to_string(),
            RiskReason::SevereWarnings => "Resolve your high-severity warnings first.".to_string(),
            RiskReason::LowBloomScore => "Practice Bloom exercises to raise your score.".to_string(),
            RiskReason::LowBloomLevel => format!(
                "Focus on developing {} level thinking skills.",
                next_bloom_level(state.bloom_level)
            ),
            RiskReason::HighPriorityWarnings => "Address your high-priority warnings promptly.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImprovementArea {
    Gpa,
    Pace,
    Errors,
    ThinkingLevel,
    BloomScore,
}

impl ImprovementArea {
    pub fn collect(state: &StudentState) -> Vec<ImprovementArea> {
        let mut areas = Vec::new();

        if state.gpa < 3.0 {
            areas.push(ImprovementArea::Gpa);
        }
        if state.progress_rate < 60.0 {
            areas.push(ImprovementArea::Pace);
        }
        if state.error_count >= 3 {
            areas.push(ImprovementArea::Errors);
        }
        if state.bloom_level <= 2 {
            areas.push(ImprovementArea::ThinkingLevel);
        }
        if state.bloom_score < 6.0 {
            areas.push(ImprovementArea::BloomScore);
        }

        areas
    }

    fn suggestion(&self, state: &StudentState) -> String {
        match self {
            ImprovementArea::Gpa => "raise GPA".to_string(),
            ImprovementArea::Pace => "increase study pace".to_string(),
            ImprovementArea::Errors => "reduce academic errors".to_string(),
            ImprovementArea::ThinkingLevel => format!(
                "develop higher-order thinking at level {}",
                next_bloom_level(state.bloom_level)
            ),
            ImprovementArea::BloomScore => "improve Bloom score".to_string(),
        }
    }

    fn recommendation(&self, state: &StudentState) -> Option<String> {
        match self {
            ImprovementArea::Gpa => {
                Some("Raise your GPA by completing assignments and exams well.".to_string())
            }
            ImprovementArea::Pace => Some("Increase your study pace to get back on schedule.".to_string()),
            ImprovementArea::Errors => {
                Some("Reduce academic errors by checking your work before submitting.".to_string())
            }
            ImprovementArea::ThinkingLevel => Some(format!(
                "Develop thinking skills at the {} level or higher.",
                next_bloom_level(state.bloom_level)
            )),
            ImprovementArea::BloomScore => None,
        }
    }
}

fn snapshot(state: &StudentState) -> String {
    format!(
        "GPA: {}, Progress: {}%, Errors: {}, Bloom level: {}",
        state.gpa,
        state.progress_rate,
        state.error_count,
        bloom_level_name(state.bloom_level)
    )
}

pub fn generate_warning_message(state: &StudentState, risk: RiskLabel) -> String {
    match RuleBranch::select(state, risk) {
        RuleBranch::Positive => format!(
            "Student {} is performing well ({}). Keep it up!",
            state.name,
            snapshot(state)
        ),
        RuleBranch::HighRisk => {
            let reasons: Vec<String> = RiskReason::collect(state)
                .iter()
                .map(|r| r.describe(state))
                .collect();
            let reasons = if reasons.is_empty() {
                "several factors that need improvement".to_string()
            } else {
                reasons.join(", ")
            };
            format!(
                "Student {} is at high academic risk due to {}. Please focus on improving.",
                state.name, reasons
            )
        }
        RuleBranch::Moderate => {
            let suggestions: Vec<String> = ImprovementArea::collect(state)
                .iter()
                .map(|a| a.suggestion(state))
                .collect();
            let suggestions = if suggestions.is_empty() {
                "keep improving overall".to_string()
            } else {
                suggestions.join(", ")
            };
            format!(
                "Student {} needs to {} to achieve better results ({}).",
                state.name,
                suggestions,
                snapshot(state)
            )
        }
    }
}

pub fn learning_path_recommendations(state: &StudentState, risk: RiskLabel) -> Vec<String> {
    let maintain = || {
        format!(
            "Maintain your strong performance and attempt harder {} material.",
            next_bloom_level(state.bloom_level)
        )
    };

    match RuleBranch::select(state, risk) {
        RuleBranch::Positive => vec![maintain()],
        RuleBranch::HighRisk => {
            let mut recommendations =
                vec!["Join supplemental classes to strengthen your fundamentals.".to_string()];
            recommendations.extend(RiskReason::collect(state).iter().map(|r| r.remediation(state)));
            recommendations
        }
        RuleBranch::Moderate => {
            let mut recommendations: Vec<String> = ImprovementArea::collect(state)
                .iter()
                .filter_map(|a| a.recommendation(state))
                .collect();
            if recommendations.is_empty() {
                recommendations.push(format!(
                    "Keep up the good performance and try {} level material.",
                    next_bloom_level(state.bloom_level)
                ));
            }
            recommendations
        }
    }
}

pub fn generate_learning_path(state: &StudentState, risk: RiskLabel) -> LearningPathRecord {
    LearningPathRecord {
        studentid: state.studentid.clone(),
        name: state.name.clone(),
        gpa: state.gpa,
        progress_rate: state.progress_rate,
        bloom_score: state.bloom_score,
        error_count: state.error_count,
        priority: state.priority,
        severity: state.severity,
        bloom_level: bloom_level_name(state.bloom_level).to_string(),
        risk,
        recommendations: learning_path_recommendations(state, risk),
    }
}

pub fn assess(state: &StudentState, risk: RiskLabel) -> RiskAssessment {
    RiskAssessment {
        label: risk,
        message: generate_warning_message(state, risk),
        recommendations: learning_path_recommendations(state, risk),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Standing {
    OnTarget,
    Good,
    NeedsImprovement,
    Danger,
}

impl Standing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Standing::OnTarget => "ON_TARGET",
            Standing::Good => "GOOD",
            Standing::NeedsImprovement => "NEEDS_IMPROVEMENT",
            Standing::Danger => "DANGER",
        }
    }
}

pub fn classify_standing(gpa: f64) -> Standing {
    if gpa >= 3.5 {
        Standing::OnTarget
    } else if gpa >= 3.0 {
        Standing::Good
    } else if gpa >= 2.0 {
        Standing::NeedsImprovement
    } else {
        Standing::Danger
    }
}

pub fn course_tier(risk: RiskLabel, gpa: f64, bloom_level: u8) -> CourseDifficulty {
    if risk.is_at_risk() || gpa < 2.0 {
        CourseDifficulty::Basic
    } else if bloom_level >= 4 {
        CourseDifficulty::Advanced
    } else {
        CourseDifficulty::Intermediate
    }
}

pub const URGENT_WARNING_TYPE: &str = "URGENT";

pub fn risk_warning(state: &StudentState, risk: RiskLabel) -> Option<Warning> {
    if !risk.is_at_risk() && state.gpa >= 2.0 {
        return None;
    }

    Some(Warning {
        warningid: 0,
        studentid: state.studentid.clone(),
        warningtype: URGENT_WARNING_TYPE.to_string(),
        message: format!(
            "Student {} is at high academic risk (GPA: {}, Progress: {}%, Submissions: {}, Errors: {})",
            state.name, state.gpa, state.progress_rate, state.num_submissions, state.error_count
        ),
        severity: "HIGH".to_string(),
        priority: "HIGH".to_string(),
        isresolved: false,
    })
}
