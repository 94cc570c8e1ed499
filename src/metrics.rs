//! Evaluation metrics for trained classifiers.
//!
//! Precision, recall and F1 are support-weighted averages over the classes
//! present in the ground truth. Undefined ratios count as 0.

use std::collections::BTreeMap;
use std::fmt;

use ndarray::{ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::classifier::{Algorithm, Classifier, FitParams};
use crate::models::PerformanceCategory;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationScores {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CrossValidation {
    Completed { folds: usize, mean: f64, std: f64 },
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub cross_validation: CrossValidation,
}

impl TrainingMetrics {
    pub fn new(scores: ClassificationScores, cross_validation: CrossValidation) -> Self {
        Self {
            accuracy: scores.accuracy,
            precision: scores.precision,
            recall: scores.recall,
            f1_score: scores.f1_score,
            cross_validation,
        }
    }

    pub fn cv_mean(&self) -> Option<f64> {
        match self.cross_validation {
            CrossValidation::Completed { mean, .. } => Some(mean),
            CrossValidation::Unavailable { .. } => None,
        }
    }

    pub fn cv_std(&self) -> Option<f64> {
        match self.cross_validation {
            CrossValidation::Completed { std, .. } => Some(std),
            CrossValidation::Unavailable { .. } => None,
        }
    }
}

impl fmt::Display for TrainingMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "acc={:.4} prec={:.4} rec={:.4} f1={:.4}",
            self.accuracy, self.precision, self.recall, self.f1_score
        )?;
        match &self.cross_validation {
            CrossValidation::Completed { folds, mean, std } => {
                write!(f, " cv({folds})={mean:.4}±{std:.4}")
            }
            CrossValidation::Unavailable { reason } => write!(f, " cv=unavailable ({reason})"),
        }
    }
}

pub fn classification_scores(
    truth: &[PerformanceCategory],
    predicted: &[PerformanceCategory],
) -> ClassificationScores {
    let total = truth.len().min(predicted.len());
    if total == 0 {
        return ClassificationScores {
            accuracy: 0.0,
            precision: 0.0,
            recall: 0.0,
            f1_score: 0.0,
        };
    }

    // (true positives, predicted count, support) per class
    let mut counts: BTreeMap<PerformanceCategory, (usize, usize, usize)> = BTreeMap::new();
    let mut correct = 0usize;
    for (&actual, &guess) in truth.iter().zip(predicted) {
        counts.entry(actual).or_default().2 += 1;
        counts.entry(guess).or_default().1 += 1;
        if actual == guess {
            correct += 1;
            counts.entry(actual).or_default().0 += 1;
        }
    }

    let (mut precision, mut recall, mut f1_score) = (0.0, 0.0, 0.0);
    for &(tp, predicted_count, support) in counts.values() {
        if support == 0 {
            continue;
        }
        let weight = support as f64 / total as f64;
        let p = ratio(tp, predicted_count);
        let r = ratio(tp, support);
        let f = if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 };
        precision += weight * p;
        recall += weight * r;
        f1_score += weight * f;
    }

    ClassificationScores {
        accuracy: correct as f64 / total as f64,
        precision,
        recall,
        f1_score,
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Number of folds for stratified cross-validation, or `None` when some
/// class has fewer than three members.
pub fn fold_count(labels: &[PerformanceCategory], max_folds: usize) -> Option<usize> {
    let mut counts: BTreeMap<PerformanceCategory, usize> = BTreeMap::new();
    for label in labels {
        *counts.entry(*label).or_default() += 1;
    }
    let smallest = counts.values().copied().min()?;
    if smallest < 3 {
        return None;
    }
    Some(smallest.max(2).min(max_folds.max(2)))
}

/// Fold index for every sample: members of each class are dealt to the
/// folds in turn, in input order.
pub fn stratified_folds(labels: &[PerformanceCategory], folds: usize) -> Vec<usize> {
    let mut seen: BTreeMap<PerformanceCategory, usize> = BTreeMap::new();
    labels
        .iter()
        .map(|label| {
            let position = seen.entry(*label).or_default();
            let fold = *position % folds.max(1);
            *position += 1;
            fold
        })
        .collect()
}

/// Stratified k-fold accuracy of `algorithm` on `x`. Never fails: any
/// problem is reported as [`CrossValidation::Unavailable`].
pub fn cross_validate(
    algorithm: Algorithm,
    x: ArrayView2<'_, f64>,
    labels: &[PerformanceCategory],
    params: &FitParams,
    max_folds: usize,
) -> CrossValidation {
    let Some(folds) = fold_count(labels, max_folds) else {
        let smallest = smallest_class(labels);
        return CrossValidation::Unavailable {
            reason: format!("smallest class has {smallest} members, at least 3 are required"),
        };
    };

    let assignment = stratified_folds(labels, folds);
    let mut scores = Vec::with_capacity(folds);
    for fold in 0..folds {
        let (test, train): (Vec<usize>, Vec<usize>) =
            (0..labels.len()).partition(|&i| assignment[i] == fold);

        let train_labels: Vec<PerformanceCategory> = train.iter().map(|&i| labels[i]).collect();
        let test_labels: Vec<PerformanceCategory> = test.iter().map(|&i| labels[i]).collect();
        let train_x = x.select(Axis(0), &train);
        let test_x = x.select(Axis(0), &test);

        let classifier = match Classifier::fit(algorithm, train_x.view(), &train_labels, params) {
            Ok(classifier) => classifier,
            Err(err) => {
                return CrossValidation::Unavailable {
                    reason: format!("fold {fold} failed to fit: {err}"),
                }
            }
        };
        let predicted = match classifier.predict_rows(test_x.view()) {
            Ok(predicted) => predicted,
            Err(err) => {
                return CrossValidation::Unavailable {
                    reason: format!("fold {fold} failed to predict: {err}"),
                }
            }
        };
        scores.push(classification_scores(&test_labels, &predicted).accuracy);
    }

    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let std = (scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n).sqrt();
    CrossValidation::Completed { folds, mean, std }
}

fn smallest_class(labels: &[PerformanceCategory]) -> usize {
    let mut counts: BTreeMap<PerformanceCategory, usize> = BTreeMap::new();
    for label in labels {
        *counts.entry(*label).or_default() += 1;
    }
    counts.values().copied().min().unwrap_or(0)
}
