use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::features::Feature;

/// Performance forecast category, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceCategory {
    Excellent,
    Good,
    Average,
    Poor,
    AtRisk,
}

impl PerformanceCategory {
    pub const ALL: [PerformanceCategory; 5] = [
        PerformanceCategory::Excellent,
        PerformanceCategory::Good,
        PerformanceCategory::Average,
        PerformanceCategory::Poor,
        PerformanceCategory::AtRisk,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PerformanceCategory::Excellent => "excellent",
            PerformanceCategory::Good => "good",
            PerformanceCategory::Average => "average",
            PerformanceCategory::Poor => "poor",
            PerformanceCategory::AtRisk => "at_risk",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            PerformanceCategory::Excellent => "Excellent",
            PerformanceCategory::Good => "Good",
            PerformanceCategory::Average => "Average",
            PerformanceCategory::Poor => "Poor",
            PerformanceCategory::AtRisk => "At Risk",
        }
    }

    /// Grade-annotated label shown to instructors, e.g. `Excellent (A)`.
    pub fn display_label(self) -> &'static str {
        match self {
            PerformanceCategory::Excellent => "Excellent (A)",
            PerformanceCategory::Good => "Good (B)",
            PerformanceCategory::Average => "Average (C)",
            PerformanceCategory::Poor => "Poor (D)",
            PerformanceCategory::AtRisk => "At Risk (F)",
        }
    }

    pub fn is_at_risk(self) -> bool {
        matches!(self, PerformanceCategory::Poor | PerformanceCategory::AtRisk)
    }

    /// Parses stored or displayed labels: `at_risk`, `At Risk`, `At Risk (F)`, `good`.
    pub fn parse(raw: &str) -> Option<Self> {
        let head = raw.split('(').next().unwrap_or_default();
        let normalized = head
            .trim()
            .to_ascii_lowercase()
            .replace([' ', '-'], "_");

        match normalized.as_str() {
            "excellent" => Some(PerformanceCategory::Excellent),
            "good" => Some(PerformanceCategory::Good),
            "average" => Some(PerformanceCategory::Average),
            "poor" => Some(PerformanceCategory::Poor),
            "at_risk" => Some(PerformanceCategory::AtRisk),
            _ => None,
        }
    }
}

impl fmt::Display for PerformanceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One student's raw metrics. `None` means the value was not supplied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub student_id: Option<String>,
    pub attendance: Option<f64>,
    pub assignment_score: Option<f64>,
    pub quiz_score: Option<f64>,
    pub time_spent: Option<f64>,
    pub forum_posts: Option<f64>,
    pub resources_viewed: Option<f64>,
    pub label: Option<PerformanceCategory>,
}

impl StudentRecord {
    pub fn get(&self, feature: Feature) -> Option<f64> {
        match feature {
            Feature::Attendance => self.attendance,
            Feature::AssignmentScore => self.assignment_score,
            Feature::QuizScore => self.quiz_score,
            Feature::TimeSpent => self.time_spent,
            Feature::ForumPosts => self.forum_posts,
            Feature::ResourcesViewed => self.resources_viewed,
        }
    }

    pub fn set(&mut self, feature: Feature, value: Option<f64>) {
        let slot = match feature {
            Feature::Attendance => &mut self.attendance,
            Feature::AssignmentScore => &mut self.assignment_score,
            Feature::QuizScore => &mut self.quiz_score,
            Feature::TimeSpent => &mut self.time_spent,
            Feature::ForumPosts => &mut self.forum_posts,
            Feature::ResourcesViewed => &mut self.resources_viewed,
        };
        *slot = value;
    }
}

/// A tabular batch of student records together with the set of columns the
/// source actually carried. Column presence drives imputation: an absent
/// column gets its fixed default, a present column gets its mean.
#[derive(Debug, Clone, Default)]
pub struct StudentTable {
    records: Vec<StudentRecord>,
    columns: BTreeSet<Feature>,
    has_id_column: bool,
    has_label_column: bool,
}

impl StudentTable {
    /// Builds a table whose columns are those with at least one supplied value.
    pub fn new(records: Vec<StudentRecord>) -> Self {
        let columns = Feature::ALL
            .iter()
            .copied()
            .filter(|feature| records.iter().any(|r| r.get(*feature).is_some()))
            .collect();
        let has_id_column = records.iter().any(|r| r.student_id.is_some());
        let has_label_column = records.iter().any(|r| r.label.is_some());

        Self {
            records,
            columns,
            has_id_column,
            has_label_column,
        }
    }

    /// Builds a table with an explicit column set, as read from a file header.
    pub fn with_columns(
        records: Vec<StudentRecord>,
        columns: impl IntoIterator<Item = Feature>,
        has_id_column: bool,
        has_label_column: bool,
    ) -> Self {
        Self {
            records,
            columns: columns.into_iter().collect(),
            has_id_column,
            has_label_column,
        }
    }

    pub fn records(&self) -> &[StudentRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_column(&self, feature: Feature) -> bool {
        self.columns.contains(&feature)
    }

    pub fn has_label_column(&self) -> bool {
        self.has_label_column
    }

    /// The row's identifier, or a positional `Student_<idx>` name.
    pub fn student_id(&self, idx: usize) -> String {
        self.records
            .get(idx)
            .and_then(|r| if self.has_id_column { r.student_id.clone() } else { None })
            .unwrap_or_else(|| format!("Student_{idx}"))
    }
}

/// Outcome for a single row of a batch prediction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Prediction {
    Category(PerformanceCategory),
    Error(String),
}

impl Prediction {
    pub fn category(&self) -> Option<PerformanceCategory> {
        match self {
            Prediction::Category(category) => Some(*category),
            Prediction::Error(_) => None,
        }
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prediction::Category(category) => f.write_str(category.title()),
            Prediction::Error(_) => f.write_str("Error"),
        }
    }
}

/// Which path produced a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionSource {
    Model,
    Rules,
    Failed,
}

impl PredictionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            PredictionSource::Model => "model",
            PredictionSource::Rules => "rules",
            PredictionSource::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub student_id: String,
    pub prediction: Prediction,
    pub is_at_risk: bool,
    pub confidence: f64,
    pub source: PredictionSource,
}

impl PredictionResult {
    pub fn failed(student_id: String, reason: impl Into<String>) -> Self {
        Self {
            student_id,
            prediction: Prediction::Error(reason.into()),
            is_at_risk: false,
            confidence: 0.0,
            source: PredictionSource::Failed,
        }
    }
}

/// Single-record prediction with the full class distribution when available.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailedPrediction {
    pub student_id: String,
    pub category: PerformanceCategory,
    pub label: String,
    pub is_at_risk: bool,
    pub confidence: f64,
    pub probabilities: Option<BTreeMap<PerformanceCategory, f64>>,
    pub source: PredictionSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stored_and_display_labels() {
        assert_eq!(PerformanceCategory::parse("at_risk"), Some(PerformanceCategory::AtRisk));
        assert_eq!(PerformanceCategory::parse("At Risk (F)"), Some(PerformanceCategory::AtRisk));
        assert_eq!(PerformanceCategory::parse(" Good "), Some(PerformanceCategory::Good));
        assert_eq!(PerformanceCategory::parse("Excellent (A)"), Some(PerformanceCategory::Excellent));
        assert_eq!(PerformanceCategory::parse("outstanding"), None);
        assert_eq!(PerformanceCategory::parse(""), None);
    }

    #[test]
    fn categories_are_ordered_best_to_worst() {
        let mut shuffled = vec![
            PerformanceCategory::Poor,
            PerformanceCategory::Excellent,
            PerformanceCategory::AtRisk,
            PerformanceCategory::Average,
            PerformanceCategory::Good,
        ];
        shuffled.sort();
        assert_eq!(shuffled, PerformanceCategory::ALL.to_vec());
    }

    #[test]
    fn only_poor_and_at_risk_are_flagged() {
        let flagged: Vec<_> = PerformanceCategory::ALL
            .iter()
            .filter(|c| c.is_at_risk())
            .copied()
            .collect();
        assert_eq!(flagged, vec![PerformanceCategory::Poor, PerformanceCategory::AtRisk]);
    }

    #[test]
    fn table_infers_columns_from_supplied_values() {
        let table = StudentTable::new(vec![
            StudentRecord {
                student_id: Some("S001".to_string()),
                attendance: Some(90.0),
                ..StudentRecord::default()
            },
            StudentRecord::default(),
        ]);

        assert!(table.has_column(Feature::Attendance));
        assert!(!table.has_column(Feature::QuizScore));
        assert!(!table.has_label_column());
        assert_eq!(table.student_id(0), "S001");
        assert_eq!(table.student_id(1), "Student_1");
    }
}
