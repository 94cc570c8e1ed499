//! Batch and single-record inference over a [`TrainedModelBundle`], with the
//! rule-based path as the explicit fallback arm.

use std::collections::BTreeMap;

use ndarray::{Array2, ArrayView1};

use crate::bundle::TrainedModelBundle;
use crate::classifier::{argmax, InferenceError};
use crate::error::{ForecastError, Result};
use crate::features::prepare_features;
use crate::models::{
    DetailedPrediction, PerformanceCategory, Prediction, PredictionResult, PredictionSource,
    StudentRecord, StudentTable,
};
use crate::risk::rule_based_prediction;

struct ModelOutcome {
    category: PerformanceCategory,
    confidence: f64,
    probabilities: Option<BTreeMap<PerformanceCategory, f64>>,
}

/// Predicts every row of `table`, returning exactly one result per row.
///
/// Without a bundle, or when the bundle cannot be applied to the table as a
/// whole, every row goes through the rule path. A row the classifier rejects
/// goes through the rule path on its own.
pub fn predict_batch(bundle: Option<&TrainedModelBundle>, table: &StudentTable) -> Vec<PredictionResult> {
    if table.is_empty() {
        return vec![PredictionResult::failed(String::new(), "no features available")];
    }

    let Some(bundle) = bundle else {
        log::info!("no trained model loaded, using rule-based predictions");
        return rule_batch(table);
    };

    let scaled = match scale_table(bundle, table) {
        Ok(scaled) => scaled,
        Err(err) => {
            log::warn!("model cannot be applied to this batch ({err}), using rule-based predictions");
            return rule_batch(table);
        }
    };

    let results: Vec<PredictionResult> = scaled
        .rows()
        .into_iter()
        .zip(table.records())
        .enumerate()
        .map(|(idx, (row, record))| {
            let student_id = table.student_id(idx);
            match classify(bundle, row) {
                Ok(outcome) => PredictionResult {
                    student_id,
                    prediction: Prediction::Category(outcome.category),
                    is_at_risk: outcome.category.is_at_risk(),
                    confidence: outcome.confidence,
                    source: PredictionSource::Model,
                },
                Err(err) => {
                    log::warn!("classifier failed for {student_id} ({err}), using rule-based prediction");
                    rule_result(student_id, record)
                }
            }
        })
        .collect();

    let at_risk = results.iter().filter(|r| r.is_at_risk).count();
    log::info!(
        "predicted {} students with {}, {at_risk} at risk",
        results.len(),
        bundle.algorithm()
    );
    results
}

/// Predicts one record with its class distribution and display label.
///
/// Fails without a bundle or when the bundle's schema does not match the
/// prepared features. A classifier error falls back to the rule path.
pub fn predict_one(
    bundle: Option<&TrainedModelBundle>,
    record: &StudentRecord,
) -> Result<DetailedPrediction> {
    let bundle = bundle.ok_or(ForecastError::UntrainedModel)?;
    let student_id = record
        .student_id
        .clone()
        .unwrap_or_else(|| "Student_0".to_string());

    let table = StudentTable::new(vec![record.clone()]);
    let scaled = scale_table(bundle, &table)?;

    let (outcome, source) = match classify(bundle, scaled.row(0)) {
        Ok(outcome) => (outcome, PredictionSource::Model),
        Err(err) => {
            log::warn!("classifier failed for {student_id} ({err}), using rule-based prediction");
            let verdict = rule_based_prediction(record);
            let outcome = ModelOutcome {
                category: verdict.category(),
                confidence: verdict.confidence(),
                probabilities: None,
            };
            (outcome, PredictionSource::Rules)
        }
    };

    Ok(DetailedPrediction {
        student_id,
        category: outcome.category,
        label: outcome.category.display_label().to_string(),
        is_at_risk: outcome.category.is_at_risk(),
        confidence: outcome.confidence,
        probabilities: outcome.probabilities,
        source,
    })
}

fn rule_batch(table: &StudentTable) -> Vec<PredictionResult> {
    table
        .records()
        .iter()
        .enumerate()
        .map(|(idx, record)| rule_result(table.student_id(idx), record))
        .collect()
}

fn rule_result(student_id: String, record: &StudentRecord) -> PredictionResult {
    let verdict = rule_based_prediction(record);
    let category = verdict.category();
    PredictionResult {
        student_id,
        prediction: Prediction::Category(category),
        is_at_risk: category.is_at_risk(),
        confidence: verdict.confidence(),
        source: PredictionSource::Rules,
    }
}

fn scale_table(bundle: &TrainedModelBundle, table: &StudentTable) -> Result<Array2<f64>> {
    let matrix = prepare_features(table);
    matrix.ensure_schema(bundle.feature_names())?;
    Ok(bundle.scaler().transform(matrix.values().view())?)
}

fn classify(
    bundle: &TrainedModelBundle,
    row: ArrayView1<'_, f64>,
) -> std::result::Result<ModelOutcome, InferenceError> {
    let classifier = bundle.classifier();
    let proba = classifier.predict_proba(row)?;
    let best = argmax(&proba);
    let probabilities = classifier
        .classes()
        .iter()
        .copied()
        .zip(proba.iter().copied())
        .collect();

    Ok(ModelOutcome {
        category: classifier.classes()[best],
        confidence: proba[best],
        probabilities: Some(probabilities),
    })
}
