use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{info, warn};

use crate::dataset::{synthesize, TRAINING_ROWS, TRAINING_SEED};
use crate::error::{AppError, ModelError};
use crate::evaluation::evaluate;
use crate::forest::{ForestConfig, RiskForest};
use crate::model_store::{ModelStore, PersistedModel};
use crate::types::{FeatureVector, ModelMetrics, RiskLabel};

#[derive(Clone, Debug)]
pub struct ClassifierConfig {
    pub forest: ForestConfig,
    pub training_rows: usize,
    pub training_seed: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            forest: ForestConfig::default(),
            training_rows: TRAINING_ROWS,
            training_seed: TRAINING_SEED,
        }
    }
}

// Owns the cached forest. Predictions clone the current `Arc` and never
// block on training; load-or-train, reload and retrain run one at a time.
pub struct RiskClassifier {
    store: Arc<dyn ModelStore>,
    config: ClassifierConfig,
    model: RwLock<Arc<RiskForest>>,
    metrics: RwLock<Option<ModelMetrics>>,
    lifecycle: Mutex<()>,
}

impl RiskClassifier {
    pub fn load_or_train(store: Arc<dyn ModelStore>, config: ClassifierConfig) -> Result<Self, AppError> {
        let forest = obtain_model(store.as_ref(), &config)?;
        Ok(Self {
            store,
            config,
            model: RwLock::new(forest),
            metrics: RwLock::new(None),
            lifecycle: Mutex::new(()),
        })
    }

    pub fn predict(&self, features: &FeatureVector) -> RiskLabel {
        let label = self.model().predict(&features.to_array());
        metrics::counter!("risk_predictions_total", "label" => label.as_str()).increment(1);
        label
    }

    pub fn predict_proba(&self, features: &FeatureVector) -> f64 {
        self.model().predict_proba(&features.to_array())
    }

    pub fn model(&self) -> Arc<RiskForest> {
        self.model.read().clone()
    }

    // Evaluated on the configuration the serving forest was trained with;
    // load-or-train discards blobs trained under any other one. Blocking.
    pub fn metrics(&self) -> Result<ModelMetrics, AppError> {
        if let Some(cached) = *self.metrics.read() {
            return Ok(cached);
        }
        let computed = self.compute_metrics()?;
        *self.metrics.write() = Some(computed);
        Ok(computed)
    }

    pub fn reload(&self) -> Result<(), AppError> {
        let _guard = self.lifecycle.lock();
        let forest = obtain_model(self.store.as_ref(), &self.config)?;
        *self.model.write() = forest;
        Ok(())
    }

    pub fn retrain(&self) -> Result<ModelMetrics, AppError> {
        let _guard = self.lifecycle.lock();
        let forest = train_and_persist(self.store.as_ref(), &self.config)?;
        *self.model.write() = forest;

        let metrics = self.compute_metrics()?;
        *self.metrics.write() = Some(metrics);
        info!("Retrained risk model: {:?}", metrics);
        Ok(metrics)
    }

    fn compute_metrics(&self) -> Result<ModelMetrics, AppError> {
        let data = synthesize(self.config.training_rows, self.config.training_seed);
        evaluate(&data, &self.config.forest)
            .map(ModelMetrics::rounded)
            .map_err(|e| AppError::Internal(format!("model evaluation failed: {}", e)))
    }
}

fn obtain_model(store: &dyn ModelStore, config: &ClassifierConfig) -> Result<Arc<RiskForest>, AppError> {
    match store.load() {
        Ok(Some(persisted)) if !trained_with(&persisted, config) => warn!(
            "Persisted risk model at {} was trained with {} trees on {} rows (seed {}), retraining",
            store.describe(),
            persisted.forest.config().num_trees,
            persisted.training_rows,
            persisted.training_seed
        ),
        Ok(Some(persisted)) => {
            info!(
                "Loaded risk model from {} ({} trees, trained {})",
                store.describe(),
                persisted.forest.num_trees(),
                persisted.trained_at
            );
            return Ok(Arc::new(persisted.forest));
        }
        Ok(None) => info!("No persisted risk model at {}, training", store.describe()),
        Err(e) => warn!("Persisted risk model at {} unusable ({}), retraining", store.describe(), e),
    }
    train_and_persist(store, config)
}

fn train_and_persist(store: &dyn ModelStore, config: &ClassifierConfig) -> Result<Arc<RiskForest>, AppError> {
    let forest = train(config).map_err(|e| AppError::ModelUnavailable(e.to_string()))?;

    let persisted = PersistedModel::new(forest, config.training_rows, config.training_seed);
    if let Err(e) = store.save(&persisted) {
        warn!("Failed to persist risk model to {}: {}", store.describe(), e);
    }
    Ok(Arc::new(persisted.forest))
}

fn trained_with(persisted: &PersistedModel, config: &ClassifierConfig) -> bool {
    persisted.forest.config() == &config.forest
        && persisted.training_rows == config.training_rows
        && persisted.training_seed == config.training_seed
}

fn train(config: &ClassifierConfig) -> Result<RiskForest, ModelError> {
    let data = synthesize(config.training_rows, config.training_seed);
    info!(
        "Training risk model on {} rows ({} at risk), {} trees",
        data.len(),
        data.at_risk_count(),
        config.forest.num_trees
    );
    RiskForest::fit(&data, config.forest.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_store::{FileModelStore, MemoryModelStore};

    fn fast_config() -> ClassifierConfig {
        ClassifierConfig {
            forest: ForestConfig {
                num_trees: 8,
                ..ForestConfig::default()
            },
            ..ClassifierConfig::default()
        }
    }

    fn profiles() -> Vec<FeatureVector> {
        vec![
            FeatureVector {
                gpa: 3.8,
                progress_rate: 90.0,
                bloom_score: 9.0,
                error_count: 0,
                priority_code: 0.0,
                severity_code: 0.0,
                bloom_level_code: 4,
            },
            FeatureVector {
                gpa: 1.8,
                progress_rate: 20.0,
                bloom_score: 3.0,
                error_count: 6,
                priority_code: 2.0,
                severity_code: 2.0,
                bloom_level_code: 0,
            },
            FeatureVector {
                gpa: 2.7,
                progress_rate: 55.0,
                bloom_score: 5.5,
                error_count: 3,
                priority_code: 1.0,
                severity_code: 1.0,
                bloom_level_code: 2,
            },
        ]
    }

    #[test]
    fn test_trains_and_persists_when_store_empty() {
        let store = Arc::new(MemoryModelStore::new());
        let classifier = RiskClassifier::load_or_train(store.clone(), fast_config()).unwrap();
        assert!(store.bytes().is_some());
        assert_eq!(classifier.model().num_trees(), 8);
    }

    #[test]
    fn test_reload_yields_identical_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("risk_model.bin");

        let first = RiskClassifier::load_or_train(Arc::new(FileModelStore::new(&path)), fast_config()).unwrap();
        let second = RiskClassifier::load_or_train(Arc::new(FileModelStore::new(&path)), fast_config()).unwrap();

        for profile in profiles() {
            assert_eq!(first.predict(&profile), second.predict(&profile));
            assert_eq!(first.predict_proba(&profile), second.predict_proba(&profile));
        }
        second.reload().unwrap();
        assert_eq!(first.model(), second.model());
    }

    #[test]
    fn test_corrupt_blob_triggers_retrain() {
        let store = Arc::new(MemoryModelStore::with_bytes(b"garbage".to_vec()));
        let classifier = RiskClassifier::load_or_train(store.clone(), fast_config()).unwrap();

        let repaired = store.load().unwrap().unwrap();
        assert_eq!(repaired.forest, *classifier.model());
    }

    #[test]
    fn test_failing_store_and_failing_training_is_unavailable() {
        let store = Arc::new(MemoryModelStore::read_only(Some(b"garbage".to_vec())));
        let config = ClassifierConfig {
            forest: ForestConfig {
                num_trees: 0,
                ..ForestConfig::default()
            },
            ..ClassifierConfig::default()
        };
        let result = RiskClassifier::load_or_train(store, config);
        assert!(matches!(result, Err(AppError::ModelUnavailable(_))));
    }

    #[test]
    fn test_blob_from_other_config_is_retrained() {
        let store = Arc::new(MemoryModelStore::new());
        RiskClassifier::load_or_train(store.clone(), fast_config()).unwrap();

        let config = ClassifierConfig {
            forest: ForestConfig {
                num_trees: 5,
                ..ForestConfig::default()
            },
            ..ClassifierConfig::default()
        };
        let classifier = RiskClassifier::load_or_train(store.clone(), config).unwrap();
        assert_eq!(classifier.model().num_trees(), 5);

        let persisted = store.load().unwrap().unwrap();
        assert_eq!(persisted.forest.num_trees(), 5);
        assert_eq!(persisted.training_rows, TRAINING_ROWS);
        assert_eq!(persisted.training_seed, TRAINING_SEED);
    }

    #[test]
    fn test_default_model_scores_strong_learner_safe() {
        let classifier = RiskClassifier::load_or_train(Arc::new(MemoryModelStore::new()), ClassifierConfig::default())
            .unwrap();
        for bloom_level_code in 0..=5 {
            let strong = FeatureVector {
                gpa: 3.8,
                progress_rate: 90.0,
                bloom_score: 9.0,
                error_count: 0,
                priority_code: 0.0,
                severity_code: 0.0,
                bloom_level_code,
            };
            assert_eq!(classifier.predict(&strong), RiskLabel::Safe, "bloom level {}", bloom_level_code);
        }
    }

    #[test]
    fn test_failed_save_is_not_fatal() {
        let store = Arc::new(MemoryModelStore::read_only(None));
        let classifier = RiskClassifier::load_or_train(store.clone(), fast_config()).unwrap();
        assert!(store.bytes().is_none());
        let _ = classifier.predict(&profiles()[0]);
    }

    #[test]
    fn test_predict_is_deterministic() {
        let classifier = RiskClassifier::load_or_train(Arc::new(MemoryModelStore::new()), fast_config()).unwrap();
        for profile in profiles() {
            let label = classifier.predict(&profile);
            for _ in 0..5 {
                assert_eq!(classifier.predict(&profile), label);
            }
        }
        assert_eq!(classifier.predict(&profiles()[1]), RiskLabel::AtRisk);
    }

    #[test]
    fn test_metrics_cached_and_in_range() {
        let classifier = RiskClassifier::load_or_train(Arc::new(MemoryModelStore::new()), fast_config()).unwrap();
        let metrics = classifier.metrics().unwrap();
        for value in [metrics.accuracy, metrics.precision, metrics.recall, metrics.f1_score, metrics.f1_cv] {
            assert!((0.0..=1.0).contains(&value));
            assert_eq!(value, (value * 100.0).round() / 100.0);
        }
        assert_eq!(classifier.metrics().unwrap(), metrics);

        let retrained = classifier.retrain().unwrap();
        assert_eq!(retrained, metrics);
    }
}
