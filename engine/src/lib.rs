pub mod auth;
pub mod classifier;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod features;
pub mod forest;
pub mod model_store;
pub mod parser;
pub mod recommendation;
pub mod records;
pub mod routes;
pub mod rules;
pub mod types;

pub use classifier::RiskClassifier;
pub use engine::TutorEngine;
pub use error::AppError;
pub use types::{FeatureVector, RiskLabel};
