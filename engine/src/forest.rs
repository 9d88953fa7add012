use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::dataset::{Dataset, Row};
use crate::error::ModelError;
use crate::types::{RiskLabel, FEATURE_COUNT};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ForestConfig {
    pub num_trees: usize,
    // `None` grows every tree until its leaves are pure.
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    // Candidate features per split; `None` means `floor(sqrt(FEATURE_COUNT))`.
    pub max_features: Option<usize>,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            num_trees: 100,
            max_depth: None,
            min_samples_split: 2,
            max_features: None,
            seed: 42,
        }
    }
}

impl ForestConfig {
    fn features_per_split(&self) -> usize {
        self.max_features
            .unwrap_or_else(|| (FEATURE_COUNT as f64).sqrt().floor() as usize)
            .clamp(1, FEATURE_COUNT)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Node {
    // Fraction of AT_RISK training samples that reached this leaf.
    Leaf { at_risk: f64 },
    Split {
        feature: usize,
        threshold: f64,
        left: u32,
        right: u32,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    pub fn predict_proba(&self, row: &Row) -> f64 {
        let mut idx = 0usize;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Leaf { at_risk }) => return *at_risk,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    idx = if row[*feature] <= *threshold {
                        *left as usize
                    } else {
                        *right as usize
                    };
                }
                // Unreachable for a tree built by TreeBuilder
                None => return 0.0,
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    // Children are always written after their parent, so requiring
    // `parent < child < len` rules out cycles and dangling indices.
    fn validate(&self) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Leaf { at_risk } => {
                    if !(0.0..=1.0).contains(at_risk) {
                        return Err(format!("node {}: leaf probability {} outside [0, 1]", idx, at_risk));
                    }
                }
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= FEATURE_COUNT {
                        return Err(format!("node {}: feature index {} out of range", idx, feature));
                    }
                    if !threshold.is_finite() {
                        return Err(format!("node {}: threshold is not finite", idx));
                    }
                    for child in [*left as usize, *right as usize] {
                        if child <= idx || child >= self.nodes.len() {
                            return Err(format!("node {}: child index {} is invalid", idx, child));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes.get(idx) {
                Some(Node::Split { left, right, .. }) => {
                    1 + walk(nodes, *left as usize).max(walk(nodes, *right as usize))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RiskForest {
    config: ForestConfig,
    trees: Vec<DecisionTree>,
}

impl RiskForest {
    pub fn fit(data: &Dataset, config: ForestConfig) -> Result<Self, ModelError> {
        if data.is_empty() {
            return Err(ModelError::Training("training set is empty".to_string()));
        }
        if data.rows.len() != data.labels.len() {
            return Err(ModelError::Training(format!(
                "{} rows but {} labels",
                data.rows.len(),
                data.labels.len()
            )));
        }
        if config.num_trees == 0 {
            return Err(ModelError::Training("forest needs at least one tree".to_string()));
        }
        if data.rows.iter().flatten().any(|v| !v.is_finite()) {
            return Err(ModelError::Training("training set contains non-finite values".to_string()));
        }

        let n = data.len();
        let trees = (0..config.num_trees)
            .map(|tree_idx| {
                let mut rng = StdRng::seed_from_u64(tree_seed(config.seed, tree_idx as u64));
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                TreeBuilder::new(data, &config, rng).build(bootstrap)
            })
            .collect();

        Ok(Self { config, trees })
    }

    pub fn predict_proba(&self, row: &Row) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let total: f64 = self.trees.iter().map(|t| t.predict_proba(row)).sum();
        total / self.trees.len() as f64
    }

    pub fn predict(&self, row: &Row) -> RiskLabel {
        if self.predict_proba(row) > 0.5 {
            RiskLabel::AtRisk
        } else {
            RiskLabel::Safe
        }
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.trees.is_empty() {
            return Err(ModelError::Corrupt("forest has no trees".to_string()));
        }
        for (idx, tree) in self.trees.iter().enumerate() {
            tree.validate()
                .map_err(|e| ModelError::Corrupt(format!("tree {}: {}", idx, e)))?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn from_nodes(config: ForestConfig, trees: Vec<Vec<Node>>) -> Self {
        Self {
            config,
            trees: trees.into_iter().map(|nodes| DecisionTree { nodes }).collect(),
        }
    }
}

pub fn tree_seed(seed: u64, tree_idx: u64) -> u64 {
    let mut z = seed
        .wrapping_add(tree_idx.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

struct TreeBuilder<'a> {
    data: &'a Dataset,
    config: &'a ForestConfig,
    rng: StdRng,
}

impl<'a> TreeBuilder<'a> {
    fn new(data: &'a Dataset, config: &'a ForestConfig, rng: StdRng) -> Self {
        Self { data, config, rng }
    }

    fn build(mut self, indices: Vec<usize>) -> DecisionTree {
        let mut nodes = Vec::new();
        self.build_node(&indices, 0, &mut nodes);
        DecisionTree { nodes }
    }

    fn build_node(&mut self, indices: &[usize], depth: usize, nodes: &mut Vec<Node>) -> u32 {
        let current = nodes.len() as u32;
        let positives = self.count_at_risk(indices);
        let leaf = Node::Leaf {
            at_risk: positives as f64 / indices.len().max(1) as f64,
        };

        let pure = positives == 0 || positives == indices.len();
        let depth_reached = self.config.max_depth.map_or(false, |max| depth >= max);
        if pure || depth_reached || indices.len() < self.config.min_samples_split.max(2) {
            nodes.push(leaf);
            return current;
        }

        let split = match self.find_best_split(indices) {
            Some(split) => split,
            None => {
                nodes.push(leaf);
                return current;
            }
        };

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| self.data.rows[i][split.feature] <= split.threshold);

        // Reserve the slot, then patch child indices once subtrees exist
        nodes.push(Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: 0,
            right: 0,
        });
        let left_idx = self.build_node(&left, depth + 1, nodes);
        let right_idx = self.build_node(&right, depth + 1, nodes);
        if let Some(Node::Split { left, right, .. }) = nodes.get_mut(current as usize) {
            *left = left_idx;
            *right = right_idx;
        }

        current
    }

    // Features are drawn without replacement until `k` of them can split the
    // node; constant features are skipped and do not count toward `k`.
    fn find_best_split(&mut self, indices: &[usize]) -> Option<SplitCandidate> {
        let k = self.config.features_per_split();
        let mut candidates: Vec<usize> = (0..FEATURE_COUNT).collect();
        let mut remaining = FEATURE_COUNT;
        let mut visited = 0;
        let mut best: Option<SplitCandidate> = None;

        while remaining > 0 && visited < k {
            let j = self.rng.gen_range(0..remaining);
            let feature = candidates[j];
            candidates.swap(j, remaining - 1);
            remaining -= 1;

            let candidate = match self.best_split_for_feature(indices, feature) {
                Some(candidate) => candidate,
                None => continue,
            };
            visited += 1;
            // Strict comparison keeps the earliest candidate on ties
            if best.map_or(true, |b| candidate.impurity < b.impurity) {
                best = Some(candidate);
            }
        }

        best
    }

    fn best_split_for_feature(&self, indices: &[usize], feature: usize) -> Option<SplitCandidate> {
        let mut values: Vec<(f64, bool)> = indices
            .iter()
            .map(|&i| (self.data.rows[i][feature], self.data.labels[i].is_at_risk()))
            .collect();
        values.sort_by(|a, b| a.0.total_cmp(&b.0));

        let n = values.len();
        let total_pos = values.iter().filter(|(_, pos)| *pos).count();
        let mut left_pos = 0usize;
        let mut best: Option<SplitCandidate> = None;

        for i in 0..n - 1 {
            if values[i].1 {
                left_pos += 1;
            }
            let (value, next) = (values[i].0, values[i + 1].0);
            if value == next {
                continue;
            }

            let left_n = i + 1;
            let right_n = n - left_n;
            let impurity = (left_n as f64 * gini(left_pos, left_n)
                + right_n as f64 * gini(total_pos - left_pos, right_n))
                / n as f64;

            if best.map_or(true, |b| impurity < b.impurity) {
                best = Some(SplitCandidate {
                    feature,
                    threshold: value + (next - value) / 2.0,
                    impurity,
                });
            }
        }

        best
    }

    fn count_at_risk(&self, indices: &[usize]) -> usize {
        indices
            .iter()
            .filter(|&&i| self.data.labels[i].is_at_risk())
            .count()
    }
}

fn gini(positives: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let p = positives as f64 / total as f64;
    1.0 - p * p - (1.0 - p) * (1.0 - p)
}
