use config::{builder::DefaultState, ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::env;

use crate::classifier::ClassifierConfig;
use crate::error::AppError;
use crate::forest::ForestConfig;
use crate::recommendation::{LlmConfig, PromptStyle};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub model_path: String,
    pub records_path: Option<String>,
    pub prompt_style: PromptStyle,
    pub classifier: ClassifierSettings,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierSettings {
    pub num_trees: usize,
    pub training_rows: usize,
    pub seed: u64,
}

impl ClassifierSettings {
    pub fn to_classifier_config(&self) -> ClassifierConfig {
        ClassifierConfig {
            forest: ForestConfig {
                num_trees: self.num_trees,
                seed: self.seed,
                ..ForestConfig::default()
            },
            training_rows: self.training_rows,
            training_seed: self.seed,
        }
    }
}

impl Config {
    // Defaults, then an optional `tutor.toml`, then `TUTOR_*` variables
    // (nested keys use `__`, e.g. `TUTOR_LLM__MODEL`).
    pub fn load() -> Result<Self, AppError> {
        let settings = Self::defaults()?
            .add_source(File::with_name("tutor").required(false))
            .add_source(
                Environment::with_prefix("TUTOR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = settings.try_deserialize()?;
        if config.llm.api_key.is_empty() {
            config.llm.api_key = env::var("OPENAI_API_KEY").unwrap_or_default();
        }
        Ok(config)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, AppError> {
        let llm = LlmConfig::default();
        let classifier = ClassifierConfig::default();

        Ok(config::Config::builder()
            .set_default("port", 3000)?
            .set_default("model_path", "data/risk_model.bin")?
            .set_default("prompt_style", "markdown")?
            .set_default("classifier.num_trees", classifier.forest.num_trees as i64)?
            .set_default("classifier.training_rows", classifier.training_rows as i64)?
            .set_default("classifier.seed", classifier.training_seed as i64)?
            .set_default("llm.api_key", "")?
            .set_default("llm.model", llm.model)?
            .set_default("llm.base_url", llm.base_url)?
            .set_default("llm.timeout_secs", llm.timeout_secs as i64)?
            .set_default("llm.temperature", llm.temperature as f64)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(toml: &str) -> Config {
        Config::defaults()
            .unwrap()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = from_toml("");
        assert_eq!(config.port, 3000);
        assert_eq!(config.model_path, "data/risk_model.bin");
        assert!(config.records_path.is_none());
        assert_eq!(config.prompt_style, PromptStyle::Markdown);
        assert_eq!(config.classifier.num_trees, 100);
        assert_eq!(config.classifier.training_rows, 250);
        assert_eq!(config.classifier.seed, 42);
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn test_overrides() {
        let config = from_toml(
            r#"
            port = 8080
            records_path = "fixtures/records.json"
            prompt_style = "narrative"

            [classifier]
            num_trees = 10

            [llm]
            model = "gpt-4o"
            timeout_secs = 5
            "#,
        );
        assert_eq!(config.port, 8080);
        assert_eq!(config.records_path.as_deref(), Some("fixtures/records.json"));
        assert_eq!(config.prompt_style, PromptStyle::Narrative);
        assert_eq!(config.llm.timeout_secs, 5);

        let classifier = config.classifier.to_classifier_config();
        assert_eq!(classifier.forest.num_trees, 10);
        assert_eq!(classifier.training_rows, 250);
    }
}
