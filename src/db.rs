use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{Prediction, PredictionResult};

/// A stored prediction from the most recent run that included the student.
#[derive(Debug, Clone)]
pub struct StoredPrediction {
    pub run_id: Uuid,
    pub student_id: String,
    pub category: String,
    pub confidence: f64,
    pub source: String,
    pub model_path: Option<String>,
    pub predicted_at: DateTime<Utc>,
}

impl StoredPrediction {
    /// One listing line naming the run and the model artifact that produced
    /// the prediction. Rows from a rule-only run show `rules`.
    pub fn summary_line(&self) -> String {
        format!(
            "{} {} confidence {:.2} via {} on {} (run {}, model {})",
            self.student_id,
            self.category,
            self.confidence,
            self.source,
            self.predicted_at.format("%Y-%m-%d"),
            self.run_id,
            self.model_path.as_deref().unwrap_or("rules")
        )
    }
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Stores a prediction run and its rows in one transaction. Rows whose
/// prediction failed are skipped. Returns the run id and the number of rows
/// written.
pub async fn record_predictions(
    pool: &PgPool,
    model_path: Option<&str>,
    algorithm: Option<&str>,
    predictions: &[PredictionResult],
) -> anyhow::Result<(Uuid, usize)> {
    let run_id = Uuid::new_v4();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO performance_forecast.prediction_runs
        (id, model_path, algorithm, student_count)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(run_id)
    .bind(model_path)
    .bind(algorithm)
    .bind(i32::try_from(predictions.len()).unwrap_or(i32::MAX))
    .execute(&mut *tx)
    .await?;

    let mut inserted = 0usize;
    for prediction in predictions {
        let Prediction::Category(category) = &prediction.prediction else {
            continue;
        };

        sqlx::query(
            r#"
            INSERT INTO performance_forecast.predictions
            (id, run_id, student_id, category, is_at_risk, confidence, source)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(run_id)
        .bind(&prediction.student_id)
        .bind(category.as_str())
        .bind(prediction.is_at_risk)
        .bind(prediction.confidence)
        .bind(prediction.source.as_str())
        .execute(&mut *tx)
        .await?;
        inserted += 1;
    }

    tx.commit().await?;
    Ok((run_id, inserted))
}

/// Students whose latest stored prediction is at risk, least confident last.
pub async fn fetch_at_risk(pool: &PgPool, limit: i64) -> anyhow::Result<Vec<StoredPrediction>> {
    let rows = sqlx::query(
        r#"
        SELECT DISTINCT ON (p.student_id)
            p.run_id, p.student_id, p.category, p.is_at_risk, p.confidence,
            p.source, r.model_path, p.predicted_at
        FROM performance_forecast.predictions p
        JOIN performance_forecast.prediction_runs r ON r.id = p.run_id
        ORDER BY p.student_id, p.predicted_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut latest: Vec<StoredPrediction> = rows
        .into_iter()
        .filter(|row| row.get::<bool, _>("is_at_risk"))
        .map(|row| StoredPrediction {
            run_id: row.get("run_id"),
            student_id: row.get("student_id"),
            category: row.get("category"),
            confidence: row.get("confidence"),
            source: row.get("source"),
            model_path: row.get("model_path"),
            predicted_at: row.get("predicted_at"),
        })
        .collect();

    latest.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    latest.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stored(model_path: Option<&str>) -> StoredPrediction {
        StoredPrediction {
            run_id: Uuid::nil(),
            student_id: "S14".to_string(),
            category: "at_risk".to_string(),
            confidence: 0.9,
            source: "model".to_string(),
            model_path: model_path.map(str::to_string),
            predicted_at: Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap(),
        }
    }

    #[test]
    fn summary_names_run_and_model() {
        let line = stored(Some("models/forest.bin")).summary_line();
        assert_eq!(
            line,
            "S14 at_risk confidence 0.90 via model on 2026-03-02 \
             (run 00000000-0000-0000-0000-000000000000, model models/forest.bin)"
        );
    }

    #[test]
    fn rule_only_runs_show_rules_as_the_model() {
        assert!(stored(None).summary_line().ends_with("model rules)"));
    }
}
