use crate::records::{Assignment, Warning};

pub const BLOOM_LEVELS: [&str; 6] = [
    "Nhớ",
    "Hiểu",
    "Áp dụng",
    "Phân tích",
    "Đánh giá",
    "Sáng tạo",
];

pub const MAX_BLOOM_LEVEL: u8 = (BLOOM_LEVELS.len() - 1) as u8;

pub const LEARNING_PATH_ERROR_CAP: u32 = 10;

fn encode_level(value: &str) -> u8 {
    match value.trim().to_ascii_uppercase().as_str() {
        "LOW" => 0,
        "MEDIUM" => 1,
        "HIGH" => 2,
        _ => 1,
    }
}

pub fn encode_priority(priority: &str) -> u8 {
    encode_level(priority)
}

pub fn encode_severity(severity: &str) -> u8 {
    encode_level(severity)
}

pub fn encode_bloomlevel(bloomlevel: &str) -> u8 {
    let trimmed = bloomlevel.trim();
    BLOOM_LEVELS
        .iter()
        .position(|level| *level == trimmed)
        .map(|idx| idx as u8)
        .unwrap_or(0)
}

pub fn bloom_level_name(code: u8) -> &'static str {
    BLOOM_LEVELS[code.min(MAX_BLOOM_LEVEL) as usize]
}

pub fn next_bloom_level(code: u8) -> &'static str {
    bloom_level_name(code.saturating_add(1))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WarningSummary {
    pub count: u32,
    pub priority: f64,
    pub severity: f64,
}

// Averages the ordinal codes of a learner's open warnings. With no open
// warnings both averages are the LOW code.
pub fn summarize_warnings(warnings: &[Warning]) -> WarningSummary {
    let open: Vec<&Warning> = warnings.iter().filter(|w| !w.isresolved).collect();
    if open.is_empty() {
        let low = encode_priority("LOW") as f64;
        return WarningSummary {
            count: 0,
            priority: low,
            severity: low,
        };
    }

    let count = open.len() as f64;
    let priority = open.iter().map(|w| encode_priority(&w.priority) as f64).sum::<f64>() / count;
    let severity = open.iter().map(|w| encode_severity(&w.severity) as f64).sum::<f64>() / count;

    WarningSummary {
        count: open.len() as u32,
        priority,
        severity,
    }
}

pub fn count_submissions(student_name: &str, assignments: &[Assignment]) -> u32 {
    assignments
        .iter()
        .filter(|a| {
            a.studentssubmitted
                .as_deref()
                .map(|names| names.split(',').any(|n| n.trim() == student_name))
                .unwrap_or(false)
        })
        .count() as u32
}
