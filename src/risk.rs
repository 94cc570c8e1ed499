use crate::features::Feature;
use crate::models::{PerformanceCategory, StudentRecord, StudentTable};

/// Confidence reported for a rule-derived category.
pub const RULE_CONFIDENCE: f64 = 0.70;
/// Confidence reported when the composite score could not be computed.
pub const DEGRADED_CONFIDENCE: f64 = 0.35;

/// Lower bounds of each category, best first. Anything below the last bound is at risk.
const THRESHOLDS: [(f64, PerformanceCategory); 4] = [
    (85.0, PerformanceCategory::Excellent),
    (70.0, PerformanceCategory::Good),
    (50.0, PerformanceCategory::Average),
    (35.0, PerformanceCategory::Poor),
];

/// Weighted composite of the six features, given in [`Feature::ALL`] order.
///
/// The three engagement terms are scaled to a percentage of a reference
/// amount (60 hours, 20 posts, 50 resources) and capped at 100.
pub fn composite_score(values: &[f64; 6]) -> f64 {
    let [attendance, assignment, quiz, time_spent, forum_posts, resources_viewed] = *values;

    attendance * 0.2
        + assignment * 0.3
        + quiz * 0.3
        + capped_percentage(time_spent, 60.0) * 0.1
        + capped_percentage(forum_posts, 20.0) * 0.05
        + capped_percentage(resources_viewed, 50.0) * 0.05
}

fn capped_percentage(value: f64, reference: f64) -> f64 {
    (value / reference * 100.0).min(100.0)
}

/// Composite score of a raw record, substituting fixed defaults for absent values.
pub fn record_composite(record: &StudentRecord) -> f64 {
    let mut values = [0.0; 6];
    for (slot, feature) in values.iter_mut().zip(Feature::ALL) {
        *slot = record.get(feature).unwrap_or_else(|| feature.default_value());
    }
    composite_score(&values)
}

pub fn categorize(score: f64) -> PerformanceCategory {
    THRESHOLDS
        .iter()
        .find(|(bound, _)| score >= *bound)
        .map(|(_, category)| *category)
        .unwrap_or(PerformanceCategory::AtRisk)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RuleVerdict {
    Scored {
        category: PerformanceCategory,
        score: f64,
    },
    /// The composite was not a finite number.
    Degraded,
}

impl RuleVerdict {
    pub fn category(self) -> PerformanceCategory {
        match self {
            RuleVerdict::Scored { category, .. } => category,
            RuleVerdict::Degraded => PerformanceCategory::Average,
        }
    }

    pub fn confidence(self) -> f64 {
        match self {
            RuleVerdict::Scored { .. } => RULE_CONFIDENCE,
            RuleVerdict::Degraded => DEGRADED_CONFIDENCE,
        }
    }
}

/// Threshold classifier used without a model. Never fails.
pub fn rule_based_prediction(record: &StudentRecord) -> RuleVerdict {
    let score = record_composite(record);
    if !score.is_finite() {
        log::debug!(
            "composite score for {:?} is not finite, defaulting to average",
            record.student_id
        );
        return RuleVerdict::Degraded;
    }

    RuleVerdict::Scored {
        category: categorize(score),
        score,
    }
}

/// Synthetic training labels: one rule-derived category per row.
pub fn synthesize_labels(table: &StudentTable) -> Vec<PerformanceCategory> {
    table
        .records()
        .iter()
        .map(|record| rule_based_prediction(record).category())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn full_record(values: [f64; 6]) -> StudentRecord {
        let mut record = StudentRecord::default();
        for (feature, value) in Feature::ALL.into_iter().zip(values) {
            record.set(feature, Some(value));
        }
        record
    }

    #[test]
    fn thresholds_follow_expected_tiers() {
        assert_eq!(categorize(100.0), PerformanceCategory::Excellent);
        assert_eq!(categorize(85.0), PerformanceCategory::Excellent);
        assert_eq!(categorize(84.99), PerformanceCategory::Good);
        assert_eq!(categorize(70.0), PerformanceCategory::Good);
        assert_eq!(categorize(50.0), PerformanceCategory::Average);
        assert_eq!(categorize(35.0), PerformanceCategory::Poor);
        assert_eq!(categorize(34.99), PerformanceCategory::AtRisk);
        assert_eq!(categorize(-20.0), PerformanceCategory::AtRisk);
    }

    #[test]
    fn saturated_engagement_record_is_excellent() {
        let record = full_record([85.0, 85.0, 85.0, 60.0, 20.0, 50.0]);
        let score = record_composite(&record);

        assert!((score - 88.0).abs() < 1e-9);
        assert_eq!(
            rule_based_prediction(&record).category(),
            PerformanceCategory::Excellent
        );
    }

    #[test]
    fn all_default_record_scores_from_fixed_defaults() {
        let score = record_composite(&StudentRecord::default());
        let expected = 75.0 * 0.2 + 75.0 * 0.3 + 75.0 * 0.3 + 50.0 * 0.1 + 50.0 * 0.05 + 20.0 * 0.05;

        assert!((score - expected).abs() < 1e-9);
        assert_eq!(categorize(score), PerformanceCategory::Average);
    }

    #[test]
    fn engagement_terms_are_capped() {
        let capped = full_record([50.0, 50.0, 50.0, 600.0, 400.0, 900.0]);
        let reference = full_record([50.0, 50.0, 50.0, 60.0, 20.0, 50.0]);
        assert_eq!(record_composite(&capped), record_composite(&reference));
    }

    #[test]
    fn non_finite_input_degrades_to_average() {
        let mut record = StudentRecord::default();
        record.attendance = Some(f64::NAN);

        let verdict = rule_based_prediction(&record);
        assert_eq!(verdict, RuleVerdict::Degraded);
        assert_eq!(verdict.category(), PerformanceCategory::Average);
        assert_eq!(verdict.confidence(), DEGRADED_CONFIDENCE);
    }

    proptest! {
        #[test]
        fn category_never_improves_as_score_drops(a in -50.0f64..150.0, b in -50.0f64..150.0) {
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(categorize(high) <= categorize(low));
        }
    }
}
