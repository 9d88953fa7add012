use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use tracing::debug;

use crate::dataset::Dataset;
use crate::error::ModelError;
use crate::forest::{ForestConfig, RiskForest};
use crate::types::{ModelMetrics, RiskLabel};

pub const CV_FOLDS: usize = 5;
pub const HOLDOUT_FRACTION: f64 = 0.2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionCounts {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl ConfusionCounts {
    pub fn from_predictions(actual: &[RiskLabel], predicted: &[RiskLabel]) -> Self {
        let mut counts = Self::default();
        for (a, p) in actual.iter().zip(predicted) {
            match (a.is_at_risk(), p.is_at_risk()) {
                (true, true) => counts.true_positive += 1,
                (false, true) => counts.false_positive += 1,
                (false, false) => counts.true_negative += 1,
                (true, false) => counts.false_negative += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.true_positive + self.false_positive + self.true_negative + self.false_negative
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positive + self.true_negative, self.total())
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_positive)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_negative)
    }

    pub fn f1(&self) -> f64 {
        ratio(
            2 * self.true_positive,
            2 * self.true_positive + self.false_positive + self.false_negative,
        )
    }
}

// Zero denominators score 0 rather than NaN
fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

// Splits sample indices into `k` folds preserving class proportions. Each
// class's indices are taken in order and cut into contiguous chunks, the
// first `len % k` chunks getting one extra sample. Returns test indices per
// fold.
pub fn stratified_folds(labels: &[RiskLabel], k: usize) -> Vec<Vec<usize>> {
    let k = k.max(1);
    let mut folds = vec![Vec::new(); k];

    for class in [RiskLabel::Safe, RiskLabel::AtRisk] {
        let members: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
        let base = members.len() / k;
        let extra = members.len() % k;

        let mut start = 0;
        for (fold_idx, fold) in folds.iter_mut().enumerate() {
            let size = base + usize::from(fold_idx < extra);
            fold.extend_from_slice(&members[start..start + size]);
            start += size;
        }
    }

    for fold in &mut folds {
        fold.sort_unstable();
    }
    folds
}

pub fn train_test_split(n: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));

    let test_len = ((n as f64) * test_fraction.clamp(0.0, 1.0)).ceil() as usize;
    let train = indices.split_off(test_len.min(n));
    (train, indices)
}

fn score(forest: &RiskForest, data: &Dataset) -> ConfusionCounts {
    let predicted: Vec<RiskLabel> = data.rows.iter().map(|r| forest.predict(r)).collect();
    ConfusionCounts::from_predictions(&data.labels, &predicted)
}

fn complement(n: usize, test: &[usize]) -> Vec<usize> {
    let mut in_test = vec![false; n];
    for &i in test {
        in_test[i] = true;
    }
    (0..n).filter(|&i| !in_test[i]).collect()
}

pub fn cross_val_f1(data: &Dataset, config: &ForestConfig, k: usize) -> Result<f64, ModelError> {
    let folds = stratified_folds(&data.labels, k);
    let mut scores = Vec::with_capacity(folds.len());

    for (fold_idx, test) in folds.iter().enumerate() {
        if test.is_empty() {
            continue;
        }
        let train = complement(data.len(), test);
        let forest = RiskForest::fit(&data.subset(&train), config.clone())?;
        let f1 = score(&forest, &data.subset(test)).f1();
        debug!("fold {} f1={:.3}", fold_idx, f1);
        scores.push(f1);
    }

    if scores.is_empty() {
        return Err(ModelError::Training("no fold had test samples".to_string()));
    }
    Ok(scores.iter().sum::<f64>() / scores.len() as f64)
}

pub fn evaluate(data: &Dataset, config: &ForestConfig) -> Result<ModelMetrics, ModelError> {
    let f1_cv = cross_val_f1(data, config, CV_FOLDS)?;

    let (train, test) = train_test_split(data.len(), HOLDOUT_FRACTION, config.seed);
    let forest = RiskForest::fit(&data.subset(&train), config.clone())?;
    let counts = score(&forest, &data.subset(&test));

    Ok(ModelMetrics {
        accuracy: counts.accuracy(),
        precision: counts.precision(),
        recall: counts.recall(),
        f1_score: counts.f1(),
        f1_cv,
    })
}
