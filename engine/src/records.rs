use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Student {
    pub studentid: String,
    pub name: String,
    #[serde(default, rename = "class")]
    pub class_name: String,
    #[serde(default)]
    pub major: String,
    pub totalgpa: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Progress {
    pub studentid: String,
    pub courseid: i64,
    pub progressrate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BloomAssessment {
    pub studentid: String,
    pub courseid: i64,
    pub bloomlevel: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Warning {
    #[serde(default)]
    pub warningid: u64,
    pub studentid: String,
    #[serde(default)]
    pub warningtype: String,
    pub message: String,
    pub severity: String,
    pub priority: String,
    #[serde(default)]
    pub isresolved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    pub assignmentid: i64,
    pub courseid: i64,
    pub name: String,
    #[serde(default)]
    pub studentssubmitted: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommonError {
    pub errorid: i64,
    pub courseid: i64,
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum CourseDifficulty {
    Basic,
    Intermediate,
    Advanced,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Course {
    pub courseid: i64,
    pub coursename: String,
    pub difficulty: CourseDifficulty,
    #[serde(default = "default_course_status")]
    pub status: String,
}

fn default_course_status() -> String {
    "ACTIVE".to_string()
}

impl Course {
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case("ACTIVE")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Intervention {
    #[serde(default)]
    pub interventionid: u64,
    pub studentid: String,
    pub recommendation: String,
    pub createddate: NaiveDate,
    #[serde(default)]
    pub isapplied: bool,
}

impl Intervention {
    pub fn new(studentid: &str, recommendation: String) -> Self {
        Self {
            interventionid: 0,
            studentid: studentid.to_string(),
            recommendation,
            createddate: Utc::now().date_naive(),
            isapplied: false,
        }
    }
}

#[async_trait]
pub trait LearnerRecords: Send + Sync {
    async fn student(&self, studentid: &str) -> Result<Option<Student>, AppError>;
    async fn progress(&self, studentid: &str) -> Result<Option<Progress>, AppError>;
    async fn bloom_assessment(&self, studentid: &str) -> Result<Option<BloomAssessment>, AppError>;
    async fn warnings(&self, studentid: &str) -> Result<Vec<Warning>, AppError>;
    async fn assignments(&self, courseid: i64) -> Result<Vec<Assignment>, AppError>;
    async fn common_errors(&self, courseid: i64) -> Result<Vec<CommonError>, AppError>;
    async fn courses(&self) -> Result<Vec<Course>, AppError>;
    async fn add_warning(&self, warning: Warning) -> Result<u64, AppError>;
    async fn add_intervention(&self, intervention: Intervention) -> Result<u64, AppError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordSet {
    #[serde(default)]
    pub students: Vec<Student>,
    #[serde(default)]
    pub progress: Vec<Progress>,
    #[serde(default)]
    pub bloom_assessments: Vec<BloomAssessment>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    #[serde(default)]
    pub assignments: Vec<Assignment>,
    #[serde(default)]
    pub common_errors: Vec<CommonError>,
    #[serde(default)]
    pub courses: Vec<Course>,
    #[serde(default)]
    pub interventions: Vec<Intervention>,
}

#[derive(Default)]
pub struct InMemoryRecords {
    inner: RwLock<RecordSet>,
}

impl InMemoryRecords {
    pub fn new(records: RecordSet) -> Self {
        Self {
            inner: RwLock::new(records),
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let records: RecordSet = serde_json::from_str(&content)?;
        info!(
            "Loaded {} students and {} warnings from {}",
            records.students.len(),
            records.warnings.len(),
            path.display()
        );
        Ok(Self::new(records))
    }

    pub fn snapshot(&self) -> RecordSet {
        self.inner.read().clone()
    }
}

#[async_trait]
impl LearnerRecords for InMemoryRecords {
    async fn student(&self, studentid: &str) -> Result<Option<Student>, AppError> {
        let records = self.inner.read();
        Ok(records.students.iter().find(|s| s.studentid == studentid).cloned())
    }

    async fn progress(&self, studentid: &str) -> Result<Option<Progress>, AppError> {
        let records = self.inner.read();
        Ok(records.progress.iter().find(|p| p.studentid == studentid).cloned())
    }

    async fn bloom_assessment(&self, studentid: &str) -> Result<Option<BloomAssessment>, AppError> {
        let records = self.inner.read();
        Ok(records
            .bloom_assessments
            .iter()
            .find(|b| b.studentid == studentid)
            .cloned())
    }

    async fn warnings(&self, studentid: &str) -> Result<Vec<Warning>, AppError> {
        let records = self.inner.read();
        Ok(records
            .warnings
            .iter()
            .filter(|w| w.studentid == studentid)
            .cloned()
            .collect())
    }

    async fn assignments(&self, courseid: i64) -> Result<Vec<Assignment>, AppError> {
        let records = self.inner.read();
        Ok(records
            .assignments
            .iter()
            .filter(|a| a.courseid == courseid)
            .cloned()
            .collect())
    }

    async fn common_errors(&self, courseid: i64) -> Result<Vec<CommonError>, AppError> {
        let records = self.inner.read();
        Ok(records
            .common_errors
            .iter()
            .filter(|e| e.courseid == courseid)
            .cloned()
            .collect())
    }

    async fn courses(&self) -> Result<Vec<Course>, AppError> {
        Ok(self.inner.read().courses.clone())
    }

    async fn add_warning(&self, mut warning: Warning) -> Result<u64, AppError> {
        let mut records = self.inner.write();
        let next_id = records.warnings.iter().map(|w| w.warningid).max().unwrap_or(0) + 1;
        warning.warningid = next_id;
        records.warnings.push(warning);
        Ok(next_id)
    }

    async fn add_intervention(&self, mut intervention: Intervention) -> Result<u64, AppError> {
        let mut records = self.inner.write();
        let next_id = records
            .interventions
            .iter()
            .map(|i| i.interventionid)
            .max()
            .unwrap_or(0)
            + 1;
        intervention.interventionid = next_id;
        records.interventions.push(intervention);
        Ok(next_id)
    }
}
