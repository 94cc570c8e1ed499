use std::path::PathBuf;

use thiserror::Error;

use crate::classifier::{FitError, InferenceError};

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("model artifact not found: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("no trained model is available for prediction")]
    UntrainedModel,

    #[error("feature schema mismatch: expected {expected:?}, found {found:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("training table has no rows")]
    EmptyTrainingSet,

    #[error("training failed: {0}")]
    Fit(#[from] FitError),

    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),

    #[error("model artifact {} could not be decoded: {source}", .path.display())]
    CorruptArtifact {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },

    #[error("failed to encode model artifact: {0}")]
    Encode(#[source] bincode::Error),

    #[error("model artifact format version {found} is not supported (expected {supported})")]
    UnsupportedArtifactVersion { found: u32, supported: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, ForecastError>;
