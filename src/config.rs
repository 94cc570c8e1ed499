use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::classifier::FitParams;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub models_dir: PathBuf,
    pub log_level: String,
    pub seed: u64,
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub boosting_max_depth: usize,
    pub logistic_max_iter: usize,
    /// Inverse L2 strength for logistic regression.
    pub logistic_c: f64,
    pub svm_c: f64,
    pub cross_validation: CrossValidationConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CrossValidationConfig {
    pub enabled: bool,
    /// Cross-validate on the scaled matrix rather than the raw features.
    pub on_scaled: bool,
    pub max_folds: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let params = FitParams::default();
        Self {
            models_dir: PathBuf::from("models"),
            log_level: "info".to_string(),
            seed: params.seed,
            n_estimators: params.n_estimators,
            learning_rate: params.learning_rate,
            boosting_max_depth: params.boosting_max_depth,
            logistic_max_iter: params.logistic_max_iter,
            logistic_c: params.logistic_c,
            svm_c: params.svm_c,
            cross_validation: CrossValidationConfig::default(),
        }
    }
}

impl Default for CrossValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            on_scaled: true,
            max_folds: 5,
        }
    }
}

impl EngineConfig {
    /// Reads a TOML file, or returns the defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                Self::from_toml(&raw)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn fit_params(&self) -> FitParams {
        FitParams {
            seed: self.seed,
            n_estimators: self.n_estimators,
            learning_rate: self.learning_rate,
            boosting_max_depth: self.boosting_max_depth,
            logistic_max_iter: self.logistic_max_iter,
            logistic_c: self.logistic_c,
            svm_c: self.svm_c,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.fit_params(), FitParams::default());
    }

    #[test]
    fn partial_tables_override_selected_fields() {
        let config = EngineConfig::from_toml(
            r#"
            models_dir = "/var/lib/forecast"
            n_estimators = 25

            [cross_validation]
            on_scaled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.models_dir, PathBuf::from("/var/lib/forecast"));
        assert_eq!(config.n_estimators, 25);
        assert!(config.cross_validation.enabled);
        assert!(!config.cross_validation.on_scaled);
        assert_eq!(config.cross_validation.max_folds, 5);
    }

    #[test]
    fn regularisation_strengths_reach_fit_params() {
        let config = EngineConfig::from_toml("logistic_c = 0.25\nsvm_c = 4.0").unwrap();
        let params = config.fit_params();
        assert_eq!(params.logistic_c, 0.25);
        assert_eq!(params.svm_c, 4.0);
        assert_eq!(params.logistic_max_iter, FitParams::default().logistic_max_iter);
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = EngineConfig::from_toml("n_estimators = \"many\"").unwrap_err();
        assert!(matches!(err, crate::error::ForecastError::Config(_)));
    }
}
