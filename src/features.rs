//! Feature preparation: turns a [`StudentTable`] with an arbitrary column set
//! into a dense matrix with the six canonical features in a fixed order.

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};
use crate::models::StudentTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Attendance,
    AssignmentScore,
    QuizScore,
    TimeSpent,
    ForumPosts,
    ResourcesViewed,
}

impl Feature {
    /// Canonical column order. Every bundle schema must equal this list.
    pub const ALL: [Feature; 6] = [
        Feature::Attendance,
        Feature::AssignmentScore,
        Feature::QuizScore,
        Feature::TimeSpent,
        Feature::ForumPosts,
        Feature::ResourcesViewed,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Feature::Attendance => "attendance",
            Feature::AssignmentScore => "assignment_score",
            Feature::QuizScore => "quiz_score",
            Feature::TimeSpent => "time_spent",
            Feature::ForumPosts => "forum_posts",
            Feature::ResourcesViewed => "resources_viewed",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Feature::ALL
            .iter()
            .copied()
            .find(|feature| feature.name().eq_ignore_ascii_case(name))
    }

    /// Value used when the column is missing from the input entirely.
    pub fn default_value(self) -> f64 {
        match self {
            Feature::Attendance | Feature::AssignmentScore | Feature::QuizScore => 75.0,
            Feature::TimeSpent => 30.0,
            Feature::ForumPosts | Feature::ResourcesViewed => 10.0,
        }
    }
}

pub fn canonical_feature_names() -> Vec<String> {
    Feature::ALL.iter().map(|f| f.name().to_string()).collect()
}

/// Dense `rows x features` matrix plus the ordered names of its columns.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    names: Vec<String>,
    values: Array2<f64>,
}

impl FeatureMatrix {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn row(&self, idx: usize) -> ArrayView1<'_, f64> {
        self.values.row(idx)
    }

    /// Fails when the matrix columns differ, in name or order, from `expected`.
    pub fn ensure_schema(&self, expected: &[String]) -> Result<()> {
        if self.names.as_slice() == expected {
            return Ok(());
        }
        Err(ForecastError::SchemaMismatch {
            expected: expected.to_vec(),
            found: self.names.clone(),
        })
    }
}

/// Builds the canonical feature matrix for `table` without touching it.
///
/// Absent columns are filled uniformly with [`Feature::default_value`].
/// Missing or non-finite cells in a present column take that column's mean;
/// a present column with no usable cell at all falls back to the default.
pub fn prepare_features(table: &StudentTable) -> FeatureMatrix {
    let mut values = Array2::<f64>::zeros((table.len(), Feature::ALL.len()));

    for (col, feature) in Feature::ALL.iter().copied().enumerate() {
        if !table.has_column(feature) {
            values.column_mut(col).fill(feature.default_value());
            continue;
        }

        let fill = column_mean(table, feature).unwrap_or_else(|| feature.default_value());
        for (row, record) in table.records().iter().enumerate() {
            values[[row, col]] = record
                .get(feature)
                .filter(|v| v.is_finite())
                .unwrap_or(fill);
        }
    }

    FeatureMatrix {
        names: canonical_feature_names(),
        values,
    }
}

fn column_mean(table: &StudentTable, feature: Feature) -> Option<f64> {
    let (sum, count) = table
        .records()
        .iter()
        .filter_map(|r| r.get(feature))
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));

    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}
