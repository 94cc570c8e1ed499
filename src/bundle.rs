use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::{Algorithm, Classifier};
use crate::error::{ForecastError, Result};
use crate::features::canonical_feature_names;
use crate::scaler::StandardScaler;

/// Everything needed to reproduce predictions: the fitted classifier, the
/// scaler fitted on its training matrix, the ordered feature schema and the
/// importance of each feature. Saved and loaded as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModelBundle {
    classifier: Classifier,
    scaler: StandardScaler,
    feature_names: Vec<String>,
    feature_importance: BTreeMap<String, f64>,
    trained_at: DateTime<Utc>,
}

impl TrainedModelBundle {
    pub fn new(
        classifier: Classifier,
        scaler: StandardScaler,
        feature_names: Vec<String>,
        feature_importance: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            classifier,
            scaler,
            feature_names,
            feature_importance,
            trained_at: Utc::now(),
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn feature_importance(&self) -> &BTreeMap<String, f64> {
        &self.feature_importance
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    pub fn algorithm(&self) -> Algorithm {
        self.classifier.algorithm()
    }

    /// Importance pairs, most important first; ties keep schema order.
    pub fn ranked_importance(&self) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .feature_names
            .iter()
            .map(|name| {
                let weight = self.feature_importance.get(name).copied().unwrap_or(0.0);
                (name.clone(), weight)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }

    /// Checks that the schema matches the canonical feature order and that
    /// the scaler and classifier were fitted on that many columns.
    pub fn validate_schema(&self) -> Result<()> {
        let expected = canonical_feature_names();
        let widths_agree = self.scaler.n_features() == self.feature_names.len()
            && self.classifier.n_features() == self.feature_names.len();

        if self.feature_names == expected && widths_agree {
            Ok(())
        } else {
            Err(ForecastError::SchemaMismatch {
                expected,
                found: self.feature_names.clone(),
            })
        }
    }

    #[cfg(test)]
    pub(crate) fn with_feature_names(mut self, names: Vec<String>) -> Self {
        self.feature_names = names;
        self
    }
}
