use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::bundle::TrainedModelBundle;
use crate::metrics::{CrossValidation, TrainingMetrics};
use crate::models::{PerformanceCategory, Prediction, PredictionResult, StudentTable};
use crate::predictor::predict_batch;

pub struct CategorySummary {
    pub label: &'static str,
    pub count: usize,
    pub share: f64,
}

/// Row counts per category, best first, with an `Error` row when any
/// prediction failed.
pub fn summarize_by_category(predictions: &[PredictionResult]) -> Vec<CategorySummary> {
    let total = predictions.len().max(1) as f64;
    let mut summaries: Vec<CategorySummary> = PerformanceCategory::ALL
        .iter()
        .map(|category| {
            let count = predictions
                .iter()
                .filter(|p| p.prediction.category() == Some(*category))
                .count();
            CategorySummary {
                label: category.title(),
                count,
                share: count as f64 / total,
            }
        })
        .collect();

    let errors = predictions
        .iter()
        .filter(|p| matches!(p.prediction, Prediction::Error(_)))
        .count();
    if errors > 0 {
        summaries.push(CategorySummary {
            label: "Error",
            count: errors,
            share: errors as f64 / total,
        });
    }
    summaries
}

pub fn build_report(
    generated_at: DateTime<Utc>,
    predictions: &[PredictionResult],
    metrics: Option<&TrainingMetrics>,
    importance: &[(String, f64)],
) -> String {
    let summaries = summarize_by_category(predictions);
    let mut output = String::new();

    let _ = writeln!(output, "# Student Performance Forecast");
    let _ = writeln!(
        output,
        "Generated {} for {} students",
        generated_at.format("%Y-%m-%d %H:%M UTC"),
        predictions.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Category Mix");

    if predictions.is_empty() {
        let _ = writeln!(output, "No predictions in this run.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} students ({:.1}%)",
                summary.label,
                summary.count,
                summary.share * 100.0
            );
        }
    }

    let mut at_risk: Vec<&PredictionResult> = predictions.iter().filter(|p| p.is_at_risk).collect();
    at_risk.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let _ = writeln!(output);
    let _ = writeln!(output, "## At-Risk Students");

    if at_risk.is_empty() {
        let _ = writeln!(output, "No students flagged at risk.");
    } else {
        for prediction in at_risk.iter() {
            let _ = writeln!(
                output,
                "- {} ({}) confidence {:.2} via {}",
                prediction.student_id,
                prediction.prediction,
                prediction.confidence,
                prediction.source.as_str()
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Feature Importance");

    if importance.is_empty() {
        let _ = writeln!(output, "No trained model, predictions came from rules.");
    } else {
        for (name, weight) in importance.iter() {
            let _ = writeln!(output, "- {}: {:.4}", name, weight);
        }
    }

    if let Some(metrics) = metrics {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Training Metrics");
        let _ = writeln!(output, "- accuracy {:.4}", metrics.accuracy);
        let _ = writeln!(output, "- precision {:.4}", metrics.precision);
        let _ = writeln!(output, "- recall {:.4}", metrics.recall);
        let _ = writeln!(output, "- f1 {:.4}", metrics.f1_score);
        match &metrics.cross_validation {
            CrossValidation::Completed { folds, mean, std } => {
                let _ = writeln!(
                    output,
                    "- cross-validation {:.4} (std {:.4}, {} folds)",
                    mean, std, folds
                );
            }
            CrossValidation::Unavailable { reason } => {
                let _ = writeln!(output, "- cross-validation unavailable: {}", reason);
            }
        }
    }

    output
}

/// Report for the cohort a bundle was just trained on, with its metrics.
pub fn training_report(
    generated_at: DateTime<Utc>,
    bundle: &TrainedModelBundle,
    table: &StudentTable,
    metrics: &TrainingMetrics,
) -> String {
    let predictions = predict_batch(Some(bundle), table);
    build_report(generated_at, &predictions, Some(metrics), &bundle.ranked_importance())
}
