use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

use crate::features::{encode_bloomlevel, encode_priority, encode_severity, BLOOM_LEVELS};
use crate::types::{RiskLabel, FEATURE_COUNT};

pub const TRAINING_SEED: u64 = 42;
pub const TRAINING_ROWS: usize = 250;

pub const AMBIGUOUS_AT_RISK_PROBABILITY: f64 = 0.2;

const LEVELS: [&str; 3] = ["LOW", "MEDIUM", "HIGH"];

pub type Row = [f64; FEATURE_COUNT];

#[derive(Clone, Debug, Default)]
pub struct Dataset {
    pub rows: Vec<Row>,
    pub labels: Vec<RiskLabel>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn subset(&self, indices: &[usize]) -> Dataset {
        Dataset {
            rows: indices.iter().map(|&i| self.rows[i]).collect(),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }

    pub fn at_risk_count(&self) -> usize {
        self.labels.iter().filter(|l| l.is_at_risk()).count()
    }
}

// Hard labelling rule. `None` means the row falls in the ambiguous band and
// must be decided stochastically.
pub fn rule_label(gpa: f64, progress_rate: f64, error_count: u32, severity_code: u8) -> Option<RiskLabel> {
    if gpa < 2.0 || progress_rate < 30.0 || error_count > 5 || severity_code == 2 {
        Some(RiskLabel::AtRisk)
    } else if gpa >= 3.0 && progress_rate >= 70.0 && error_count <= 5 && severity_code <= 1 {
        Some(RiskLabel::Safe)
    } else {
        None
    }
}

pub fn synthesize(rows: usize, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);

    let gpa: Vec<f64> = (0..rows).map(|_| rng.gen_range(1.5..4.0)).collect();
    let progress: Vec<f64> = (0..rows).map(|_| rng.gen_range(10.0..100.0)).collect();
    let bloom_score: Vec<f64> = (0..rows).map(|_| rng.gen_range(2.0..10.0)).collect();
    let errors: Vec<u32> = (0..rows).map(|_| rng.gen_range(0..10)).collect();
    let priority: Vec<u8> = (0..rows).map(|_| encode_priority(pick(&LEVELS, &mut rng))).collect();
    let severity: Vec<u8> = (0..rows).map(|_| encode_severity(pick(&LEVELS, &mut rng))).collect();
    let bloom_level: Vec<u8> = (0..rows)
        .map(|_| encode_bloomlevel(pick(&BLOOM_LEVELS, &mut rng)))
        .collect();

    let mut dataset = Dataset {
        rows: Vec::with_capacity(rows),
        labels: Vec::with_capacity(rows),
    };

    for i in 0..rows {
        let label = rule_label(gpa[i], progress[i], errors[i], severity[i]).unwrap_or_else(|| {
            if rng.gen_bool(AMBIGUOUS_AT_RISK_PROBABILITY) {
                RiskLabel::AtRisk
            } else {
                RiskLabel::Safe
            }
        });

        dataset.rows.push([
            gpa[i],
            progress[i],
            bloom_score[i],
            errors[i] as f64,
            priority[i] as f64,
            severity[i] as f64,
            bloom_level[i] as f64,
        ]);
        dataset.labels.push(label);
    }

    dataset
}

fn pick<'a>(choices: &[&'a str], rng: &mut StdRng) -> &'a str {
    choices.choose(rng).copied().unwrap_or(choices[0])
}
