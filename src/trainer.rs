//! Model training: label preparation, scaling, fitting, evaluation and
//! importance extraction.

use ndarray::ArrayView2;

use crate::bundle::TrainedModelBundle;
use crate::classifier::{Algorithm, Classifier, FitParams};
use crate::config::{CrossValidationConfig, EngineConfig};
use crate::error::{ForecastError, Result};
use crate::features::prepare_features;
use crate::metrics::{classification_scores, cross_validate, CrossValidation, TrainingMetrics};
use crate::models::{PerformanceCategory, StudentTable};
use crate::risk::{rule_based_prediction, synthesize_labels};
use crate::scaler::StandardScaler;

/// Algorithms tried by [`Trainer::train_best`] when none are given.
pub const DEFAULT_CANDIDATES: [Algorithm; 3] = [
    Algorithm::RandomForest,
    Algorithm::GradientBoosting,
    Algorithm::DecisionTree,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelSource {
    GroundTruth,
    Synthetic,
}

/// Result of [`Trainer::train_best`].
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub algorithm: Algorithm,
    pub metrics: TrainingMetrics,
    pub feature_names: Vec<String>,
    /// In-sample accuracy of every candidate, in the order tried.
    pub evaluated: Vec<(Algorithm, f64)>,
}

/// Holds the most recently trained bundle. Nothing is persisted here.
#[derive(Debug, Clone)]
pub struct Trainer {
    params: FitParams,
    cross_validation: CrossValidationConfig,
    bundle: Option<TrainedModelBundle>,
}

impl Trainer {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_params(config.fit_params(), config.cross_validation.clone())
    }

    pub fn with_params(params: FitParams, cross_validation: CrossValidationConfig) -> Self {
        Self {
            params,
            cross_validation,
            bundle: None,
        }
    }

    /// Trains the named algorithm, replacing the held bundle. Unknown names
    /// train a random forest.
    pub fn train(
        &mut self,
        table: &StudentTable,
        algorithm: &str,
    ) -> Result<(TrainingMetrics, Vec<String>)> {
        self.train_algorithm(table, Algorithm::resolve(algorithm))
    }

    pub fn train_algorithm(
        &mut self,
        table: &StudentTable,
        algorithm: Algorithm,
    ) -> Result<(TrainingMetrics, Vec<String>)> {
        let (bundle, metrics) = fit_bundle(table, algorithm, &self.params, &self.cross_validation)?;
        let names = bundle.feature_names().to_vec();
        self.bundle = Some(bundle);
        Ok((metrics, names))
    }

    /// Trains every candidate and keeps the most accurate one in-sample.
    /// The first candidate wins ties.
    pub fn train_best(&mut self, table: &StudentTable, candidates: &[Algorithm]) -> Result<Selection> {
        let candidates = if candidates.is_empty() {
            &DEFAULT_CANDIDATES[..]
        } else {
            candidates
        };

        let mut best: Option<(TrainedModelBundle, TrainingMetrics)> = None;
        let mut evaluated = Vec::with_capacity(candidates.len());
        for &algorithm in candidates {
            let (bundle, metrics) = fit_bundle(table, algorithm, &self.params, &self.cross_validation)?;
            log::info!("candidate {algorithm}: {metrics}");
            evaluated.push((algorithm, metrics.accuracy));

            let better = best
                .as_ref()
                .map_or(true, |(_, current)| metrics.accuracy > current.accuracy);
            if better {
                best = Some((bundle, metrics));
            }
        }

        let (bundle, metrics) = best.ok_or(ForecastError::EmptyTrainingSet)?;
        let selection = Selection {
            algorithm: bundle.algorithm(),
            metrics,
            feature_names: bundle.feature_names().to_vec(),
            evaluated,
        };
        log::info!(
            "selected {} with accuracy {:.4}",
            selection.algorithm,
            selection.metrics.accuracy
        );
        self.bundle = Some(bundle);
        Ok(selection)
    }

    pub fn bundle(&self) -> Option<&TrainedModelBundle> {
        self.bundle.as_ref()
    }

    pub fn take_bundle(&mut self) -> Option<TrainedModelBundle> {
        self.bundle.take()
    }
}

/// Labels to train against: the ground-truth column when the table has one
/// (rule-derived labels fill its empty cells), otherwise synthetic labels.
pub fn training_labels(table: &StudentTable) -> (Vec<PerformanceCategory>, LabelSource) {
    if !table.has_label_column() {
        log::info!("no ground-truth label column, deriving labels from composite scores");
        return (synthesize_labels(table), LabelSource::Synthetic);
    }

    let mut filled = 0usize;
    let labels = table
        .records()
        .iter()
        .map(|record| {
            record.label.unwrap_or_else(|| {
                filled += 1;
                rule_based_prediction(record).category()
            })
        })
        .collect();
    if filled > 0 {
        log::warn!("{filled} rows had no usable label, filled from composite scores");
    }
    (labels, LabelSource::GroundTruth)
}

/// Fits a fresh bundle on `table` without touching any trainer state.
pub fn fit_bundle(
    table: &StudentTable,
    algorithm: Algorithm,
    params: &FitParams,
    cv_config: &CrossValidationConfig,
) -> Result<(TrainedModelBundle, TrainingMetrics)> {
    if table.is_empty() {
        return Err(ForecastError::EmptyTrainingSet);
    }
    log::info!("training {algorithm} on {} rows", table.len());

    let matrix = prepare_features(table);
    let (labels, _) = training_labels(table);
    let (scaler, scaled) = StandardScaler::fit_transform(matrix.values().view());

    let classifier = Classifier::fit(algorithm, scaled.view(), &labels, params)?;
    let predicted = classifier.predict_rows(scaled.view())?;
    let scores = classification_scores(&labels, &predicted);

    let cv_input: ArrayView2<'_, f64> = if cv_config.on_scaled {
        scaled.view()
    } else {
        matrix.values().view()
    };
    let cross_validation = if cv_config.enabled {
        cross_validate(algorithm, cv_input, &labels, params, cv_config.max_folds)
    } else {
        CrossValidation::Unavailable {
            reason: "disabled by configuration".to_string(),
        }
    };
    if let CrossValidation::Unavailable { reason } = &cross_validation {
        log::warn!("cross-validation unavailable: {reason}");
    }

    let importance = classifier.feature_importance(matrix.names());
    let metrics = TrainingMetrics::new(scores, cross_validation);
    log::info!("trained {algorithm}: {metrics}");

    let bundle = TrainedModelBundle::new(classifier, scaler, matrix.names().to_vec(), importance);
    Ok((bundle, metrics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::canonical_feature_names;
    use crate::models::StudentRecord;

    fn student(id: usize, score: f64) -> StudentRecord {
        StudentRecord {
            student_id: Some(format!("S{id:03}")),
            attendance: Some(score),
            assignment_score: Some(score),
            quiz_score: Some(score),
            time_spent: Some(score / 2.0),
            forum_posts: Some(score / 5.0),
            resources_viewed: Some(score / 2.0),
            label: None,
        }
    }

    fn cohort() -> StudentTable {
        let scores = [95.0, 92.0, 90.0, 78.0, 75.0, 72.0, 60.0, 58.0, 55.0, 40.0, 38.0, 36.0];
        StudentTable::new(scores.iter().enumerate().map(|(i, s)| student(i, *s)).collect())
    }

    fn quick_trainer() -> Trainer {
        let params = FitParams {
            n_estimators: 10,
            ..FitParams::default()
        };
        Trainer::with_params(params, CrossValidationConfig::default())
    }

    #[test]
    fn synthetic_labels_are_used_without_ground_truth() {
        let (labels, source) = training_labels(&cohort());
        assert_eq!(source, LabelSource::Synthetic);
        assert_eq!(labels[0], PerformanceCategory::Excellent);
        assert_eq!(labels[11], PerformanceCategory::Poor);
    }

    #[test]
    fn empty_label_cells_are_filled_from_rules() {
        let mut first = student(0, 95.0);
        first.label = Some(PerformanceCategory::Poor);
        let table = StudentTable::new(vec![first, student(1, 95.0)]);

        let (labels, source) = training_labels(&table);
        assert_eq!(source, LabelSource::GroundTruth);
        assert_eq!(labels, vec![PerformanceCategory::Poor, PerformanceCategory::Excellent]);
    }

    #[test]
    fn training_replaces_the_held_bundle() {
        let mut trainer = quick_trainer();
        assert!(trainer.bundle().is_none());

        let (metrics, names) = trainer.train(&cohort(), "decision_tree").unwrap();
        assert_eq!(names, canonical_feature_names());
        assert!((metrics.accuracy - 1.0).abs() < 1e-9);
        assert_eq!(trainer.bundle().map(|b| b.algorithm()), Some(Algorithm::DecisionTree));

        trainer.train(&cohort(), "logistic_regression").unwrap();
        assert_eq!(
            trainer.bundle().map(|b| b.algorithm()),
            Some(Algorithm::LogisticRegression)
        );
    }

    #[test]
    fn unknown_algorithm_trains_random_forest() {
        let mut trainer = quick_trainer();
        trainer.train(&cohort(), "quantum_annealer").unwrap();
        assert_eq!(trainer.bundle().map(|b| b.algorithm()), Some(Algorithm::RandomForest));
    }

    #[test]
    fn empty_table_cannot_be_trained() {
        let mut trainer = quick_trainer();
        let err = trainer.train(&StudentTable::default(), "svm").unwrap_err();
        assert!(matches!(err, ForecastError::EmptyTrainingSet));
    }

    #[test]
    fn cross_validation_runs_when_classes_are_large_enough() {
        let (metrics, _) = quick_trainer().train(&cohort(), "decision_tree").unwrap();
        // three members per class -> three folds
        match metrics.cross_validation {
            CrossValidation::Completed { folds, .. } => assert_eq!(folds, 3),
            other => panic!("expected cross-validation to run, got {other:?}"),
        }
        assert!(metrics.cv_mean().is_some());
    }

    #[test]
    fn disabled_cross_validation_is_unavailable() {
        let cv = CrossValidationConfig {
            enabled: false,
            ..CrossValidationConfig::default()
        };
        let mut trainer = Trainer::with_params(FitParams::default(), cv);
        let (metrics, _) = trainer.train(&cohort(), "decision_tree").unwrap();
        assert_eq!(metrics.cv_mean(), None);
        assert_eq!(metrics.cv_std(), None);
    }

    #[test]
    fn importance_covers_every_feature() {
        let mut trainer = quick_trainer();
        trainer.train(&cohort(), "svm").unwrap();
        let bundle = trainer.bundle().unwrap();

        let importance = bundle.feature_importance();
        assert_eq!(importance.len(), 6);
        assert!(importance.values().all(|w| (*w - 1.0 / 6.0).abs() < 1e-12));
    }

    #[test]
    fn best_candidate_is_kept() {
        let mut trainer = quick_trainer();
        let selection = trainer
            .train_best(&cohort(), &[Algorithm::LogisticRegression, Algorithm::DecisionTree])
            .unwrap();

        assert_eq!(selection.evaluated.len(), 2);
        let best = selection
            .evaluated
            .iter()
            .map(|(_, acc)| *acc)
            .fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(selection.metrics.accuracy, best);
        assert_eq!(trainer.bundle().map(|b| b.algorithm()), Some(selection.algorithm));
    }
}
