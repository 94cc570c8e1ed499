//! Student performance forecasting: feature preparation, rule-based labels,
//! model training, batch and single-record prediction, and bundle persistence.

pub mod bundle;
pub mod classifier;
pub mod config;
pub mod dataset;
pub mod db;
pub mod error;
pub mod features;
pub mod metrics;
pub mod models;
pub mod persistence;
pub mod predictor;
pub mod report;
pub mod risk;
pub mod scaler;
pub mod trainer;

pub use bundle::TrainedModelBundle;
pub use classifier::{Algorithm, Classifier, FitParams, ModelFamily};
pub use config::EngineConfig;
pub use error::{ForecastError, Result};
pub use features::{prepare_features, Feature, FeatureMatrix};
pub use metrics::{CrossValidation, TrainingMetrics};
pub use models::{
    DetailedPrediction, PerformanceCategory, Prediction, PredictionResult, PredictionSource,
    StudentRecord, StudentTable,
};
pub use persistence::ModelStore;
pub use predictor::{predict_batch, predict_one};
pub use trainer::Trainer;
