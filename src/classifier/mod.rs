//! Interchangeable classification algorithms behind one tagged union.
//!
//! All models are trained on class indices `0..classes.len()`; [`Classifier`]
//! owns the mapping back to [`PerformanceCategory`]. Each algorithm belongs to
//! a [`ModelFamily`] which fixes, at training time, how feature importance is
//! extracted.

mod boosting;
mod forest;
mod logistic;
mod svm;
mod tree;

use std::collections::BTreeMap;
use std::fmt;

use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::PerformanceCategory;

pub use boosting::GradientBoosting;
pub use forest::RandomForest;
pub use logistic::LogisticRegression;
pub use svm::Svm;
pub use tree::DecisionTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    RandomForest,
    DecisionTree,
    LogisticRegression,
    Svm,
    GradientBoosting,
}

impl Algorithm {
    pub const ALL: [Algorithm; 5] = [
        Algorithm::RandomForest,
        Algorithm::DecisionTree,
        Algorithm::LogisticRegression,
        Algorithm::Svm,
        Algorithm::GradientBoosting,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::RandomForest => "random_forest",
            Algorithm::DecisionTree => "decision_tree",
            Algorithm::LogisticRegression => "logistic_regression",
            Algorithm::Svm => "svm",
            Algorithm::GradientBoosting => "gradient_boosting",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        Algorithm::ALL
            .iter()
            .copied()
            .find(|algorithm| algorithm.as_str().eq_ignore_ascii_case(name))
    }

    /// Resolves a requested name, selecting random forest for unknown names.
    pub fn resolve(name: &str) -> Self {
        Algorithm::parse(name).unwrap_or_else(|| {
            log::warn!("unknown algorithm {name:?}, falling back to random_forest");
            Algorithm::RandomForest
        })
    }

    pub fn family(self) -> ModelFamily {
        match self {
            Algorithm::RandomForest | Algorithm::DecisionTree | Algorithm::GradientBoosting => {
                ModelFamily::TreeEnsemble
            }
            Algorithm::LogisticRegression => ModelFamily::Linear,
            Algorithm::Svm => ModelFamily::Kernel,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    TreeEnsemble,
    Linear,
    Kernel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportanceStrategy {
    /// Impurity decrease accumulated by the trees.
    Native,
    /// Mean absolute coefficient across classes.
    MeanAbsCoefficient,
    /// `1 / n_features` for every feature.
    Uniform,
}

impl ModelFamily {
    pub fn importance_strategy(self) -> ImportanceStrategy {
        match self {
            ModelFamily::TreeEnsemble => ImportanceStrategy::Native,
            ModelFamily::Linear => ImportanceStrategy::MeanAbsCoefficient,
            ModelFamily::Kernel => ImportanceStrategy::Uniform,
        }
    }
}

/// Fixed hyperparameters for every algorithm.
#[derive(Debug, Clone, PartialEq)]
pub struct FitParams {
    pub seed: u64,
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub boosting_max_depth: usize,
    pub logistic_max_iter: usize,
    pub logistic_c: f64,
    pub svm_c: f64,
}

impl Default for FitParams {
    fn default() -> Self {
        Self {
            seed: 42,
            n_estimators: 100,
            learning_rate: 0.1,
            boosting_max_depth: 3,
            logistic_max_iter: 1000,
            logistic_c: 1.0,
            svm_c: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FitError {
    #[error("cannot fit a classifier on zero samples")]
    Empty,

    #[error("{samples} samples but {labels} labels")]
    LengthMismatch { samples: usize, labels: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferenceError {
    #[error("expected {expected} features, found {found}")]
    WidthMismatch { expected: usize, found: usize },

    #[error("input row contains non-finite values")]
    NonFiniteInput,

    #[error("classifier produced non-finite scores")]
    NonFiniteOutput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Model {
    DecisionTree(DecisionTree),
    RandomForest(RandomForest),
    GradientBoosting(GradientBoosting),
    LogisticRegression(LogisticRegression),
    Svm(Svm),
}

/// A fitted model together with the categories its class indices stand for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classifier {
    classes: Vec<PerformanceCategory>,
    n_features: usize,
    model: Model,
}

impl Classifier {
    /// Fits `algorithm` on `x` against `labels`. Classes are the distinct
    /// labels in category order.
    pub fn fit(
        algorithm: Algorithm,
        x: ArrayView2<'_, f64>,
        labels: &[PerformanceCategory],
        params: &FitParams,
    ) -> Result<Self, FitError> {
        if x.nrows() == 0 {
            return Err(FitError::Empty);
        }
        if x.nrows() != labels.len() {
            return Err(FitError::LengthMismatch {
                samples: x.nrows(),
                labels: labels.len(),
            });
        }

        let mut classes = labels.to_vec();
        classes.sort();
        classes.dedup();
        let y: Vec<usize> = labels
            .iter()
            .map(|label| classes.binary_search(label).unwrap_or_default())
            .collect();
        let n_classes = classes.len();

        let model = match algorithm {
            Algorithm::DecisionTree => {
                Model::DecisionTree(DecisionTree::fit(x, &y, n_classes, params.seed))
            }
            Algorithm::RandomForest => {
                Model::RandomForest(RandomForest::fit(x, &y, n_classes, params))
            }
            Algorithm::GradientBoosting => {
                Model::GradientBoosting(GradientBoosting::fit(x, &y, n_classes, params))
            }
            Algorithm::LogisticRegression => {
                Model::LogisticRegression(LogisticRegression::fit(x, &y, n_classes, params))
            }
            Algorithm::Svm => Model::Svm(Svm::fit(x, &y, n_classes, params)),
        };

        Ok(Self {
            classes,
            n_features: x.ncols(),
            model,
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        match self.model {
            Model::DecisionTree(_) => Algorithm::DecisionTree,
            Model::RandomForest(_) => Algorithm::RandomForest,
            Model::GradientBoosting(_) => Algorithm::GradientBoosting,
            Model::LogisticRegression(_) => Algorithm::LogisticRegression,
            Model::Svm(_) => Algorithm::Svm,
        }
    }

    pub fn family(&self) -> ModelFamily {
        self.algorithm().family()
    }

    pub fn classes(&self) -> &[PerformanceCategory] {
        &self.classes
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Class distribution aligned with [`Classifier::classes`].
    pub fn predict_proba(&self, row: ArrayView1<'_, f64>) -> Result<Vec<f64>, InferenceError> {
        self.check_row(row)?;
        let proba = match &self.model {
            Model::DecisionTree(model) => model.predict_proba(row),
            Model::RandomForest(model) => model.predict_proba(row),
            Model::GradientBoosting(model) => model.predict_proba(row),
            Model::LogisticRegression(model) => model.predict_proba(row),
            Model::Svm(model) => model.predict_proba(row),
        };
        ensure_finite(&proba)?;
        Ok(proba)
    }

    pub fn predict(&self, row: ArrayView1<'_, f64>) -> Result<PerformanceCategory, InferenceError> {
        let proba = self.predict_proba(row)?;
        Ok(self.classes[argmax(&proba)])
    }

    pub fn predict_rows(&self, x: ArrayView2<'_, f64>) -> Result<Vec<PerformanceCategory>, InferenceError> {
        x.rows().into_iter().map(|row| self.predict(row)).collect()
    }

    /// Per-feature importance using the strategy of this model's family.
    pub fn feature_importance(&self, names: &[String]) -> BTreeMap<String, f64> {
        let weights = match self.family().importance_strategy() {
            ImportanceStrategy::Native => self.native_importances(),
            ImportanceStrategy::MeanAbsCoefficient => match &self.model {
                Model::LogisticRegression(model) => Some(model.mean_abs_coefficients()),
                _ => None,
            },
            ImportanceStrategy::Uniform => None,
        }
        .unwrap_or_else(|| vec![1.0 / names.len().max(1) as f64; names.len()]);

        names.iter().cloned().zip(weights).collect()
    }

    fn native_importances(&self) -> Option<Vec<f64>> {
        match &self.model {
            Model::DecisionTree(model) => Some(model.feature_importances().to_vec()),
            Model::RandomForest(model) => Some(model.feature_importances().to_vec()),
            Model::GradientBoosting(model) => Some(model.feature_importances().to_vec()),
            Model::LogisticRegression(_) | Model::Svm(_) => None,
        }
    }

    fn check_row(&self, row: ArrayView1<'_, f64>) -> Result<(), InferenceError> {
        if row.len() != self.n_features {
            return Err(InferenceError::WidthMismatch {
                expected: self.n_features,
                found: row.len(),
            });
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(InferenceError::NonFiniteInput);
        }
        Ok(())
    }
}

fn ensure_finite(scores: &[f64]) -> Result<(), InferenceError> {
    if scores.is_empty() || scores.iter().any(|v| !v.is_finite()) {
        return Err(InferenceError::NonFiniteOutput);
    }
    Ok(())
}

/// Index of the largest score; ties resolve to the lowest index.
pub(crate) fn argmax(scores: &[f64]) -> usize {
    scores
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, best_score), (idx, &score)| {
            if score > best_score {
                (idx, score)
            } else {
                (best, best_score)
            }
        })
        .0
}

/// Numerically stable in-place softmax.
pub(crate) fn softmax(logits: &mut [f64]) {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut total = 0.0;
    for value in logits.iter_mut() {
        *value = (*value - max).exp();
        total += *value;
    }
    for value in logits.iter_mut() {
        *value /= total;
    }
}

pub(crate) fn normalized(mut weights: Vec<f64>) -> Vec<f64> {
    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        for weight in weights.iter_mut() {
            *weight /= total;
        }
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn separable() -> (Array2<f64>, Vec<PerformanceCategory>) {
        let x = array![
            [-2.0, 0.1],
            [-1.8, -0.2],
            [-1.5, 0.3],
            [-1.2, 0.0],
            [1.2, 0.2],
            [1.5, -0.1],
            [1.8, 0.1],
            [2.0, -0.3],
        ];
        let mut labels = vec![PerformanceCategory::Poor; 4];
        labels.extend(vec![PerformanceCategory::Good; 4]);
        (x, labels)
    }

    #[test]
    fn unknown_names_resolve_to_random_forest() {
        assert_eq!(Algorithm::resolve("svm"), Algorithm::Svm);
        assert_eq!(Algorithm::resolve("Gradient_Boosting"), Algorithm::GradientBoosting);
        assert_eq!(Algorithm::resolve("neural_net"), Algorithm::RandomForest);
    }

    #[test]
    fn families_pick_importance_strategies() {
        assert_eq!(
            Algorithm::DecisionTree.family().importance_strategy(),
            ImportanceStrategy::Native
        );
        assert_eq!(
            Algorithm::LogisticRegression.family().importance_strategy(),
            ImportanceStrategy::MeanAbsCoefficient
        );
        assert_eq!(
            Algorithm::Svm.family().importance_strategy(),
            ImportanceStrategy::Uniform
        );
    }

    #[test]
    fn every_algorithm_separates_a_clean_split() {
        let (x, labels) = separable();
        let params = FitParams {
            n_estimators: 20,
            ..FitParams::default()
        };

        for algorithm in Algorithm::ALL {
            let classifier = Classifier::fit(algorithm, x.view(), &labels, &params).unwrap();
            assert_eq!(
                classifier.classes(),
                &[PerformanceCategory::Good, PerformanceCategory::Poor]
            );
            let predicted = classifier.predict_rows(x.view()).unwrap();
            assert_eq!(predicted, labels, "{algorithm} misclassified the training set");
        }
    }

    #[test]
    fn importance_follows_family() {
        let (x, labels) = separable();
        let names = vec!["signal".to_string(), "noise".to_string()];
        let params = FitParams::default();

        let tree = Classifier::fit(Algorithm::DecisionTree, x.view(), &labels, &params).unwrap();
        let importance = tree.feature_importance(&names);
        assert_eq!(importance["signal"], 1.0);
        assert_eq!(importance["noise"], 0.0);

        let svm = Classifier::fit(Algorithm::Svm, x.view(), &labels, &params).unwrap();
        let importance = svm.feature_importance(&names);
        assert_eq!(importance["signal"], 0.5);
        assert_eq!(importance["noise"], 0.5);

        let linear =
            Classifier::fit(Algorithm::LogisticRegression, x.view(), &labels, &params).unwrap();
        let importance = linear.feature_importance(&names);
        assert!(importance["signal"] > importance["noise"]);
    }

    #[test]
    fn single_class_tables_train_constant_models() {
        let x = array![[0.0, 1.0], [1.0, 0.0], [0.5, 0.5]];
        let labels = vec![PerformanceCategory::Average; 3];

        for algorithm in Algorithm::ALL {
            let classifier =
                Classifier::fit(algorithm, x.view(), &labels, &FitParams::default()).unwrap();
            let predicted = classifier.predict(x.row(0)).unwrap();
            assert_eq!(predicted, PerformanceCategory::Average);
        }
    }

    #[test]
    fn every_algorithm_yields_a_distribution() {
        let (x, labels) = separable();
        for algorithm in Algorithm::ALL {
            let classifier =
                Classifier::fit(algorithm, x.view(), &labels, &FitParams::default()).unwrap();
            let proba = classifier.predict_proba(x.row(0)).unwrap();

            assert_eq!(proba.len(), 2, "{algorithm}");
            assert!((proba.iter().sum::<f64>() - 1.0).abs() < 1e-9, "{algorithm}");
            // row 0 is labelled poor, the second class
            assert!(proba[1] > proba[0], "{algorithm} favours the wrong class");
        }
    }

    #[test]
    fn rejects_bad_rows() {
        let (x, labels) = separable();
        let classifier =
            Classifier::fit(Algorithm::DecisionTree, x.view(), &labels, &FitParams::default())
                .unwrap();

        let wide = array![1.0, 2.0, 3.0];
        assert_eq!(
            classifier.predict(wide.view()),
            Err(InferenceError::WidthMismatch {
                expected: 2,
                found: 3
            })
        );
        let broken = array![f64::NAN, 0.0];
        assert_eq!(
            classifier.predict(broken.view()),
            Err(InferenceError::NonFiniteInput)
        );
    }

    #[test]
    fn fit_rejects_empty_and_mismatched_input() {
        let x = Array2::<f64>::zeros((0, 2));
        assert_eq!(
            Classifier::fit(Algorithm::DecisionTree, x.view(), &[], &FitParams::default()),
            Err(FitError::Empty)
        );

        let x = Array2::<f64>::zeros((2, 2));
        assert_eq!(
            Classifier::fit(
                Algorithm::DecisionTree,
                x.view(),
                &[PerformanceCategory::Good],
                &FitParams::default()
            ),
            Err(FitError::LengthMismatch {
                samples: 2,
                labels: 1
            })
        );
    }

    #[test]
    fn softmax_is_stable_for_large_logits() {
        let mut logits = vec![1000.0, 1000.0];
        softmax(&mut logits);
        assert_eq!(logits, vec![0.5, 0.5]);
    }
}
