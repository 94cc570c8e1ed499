use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::classifier::InferenceError;

/// Per-feature standardisation to zero mean and unit variance.
/// Columns with zero variance keep a scale of 1 so they map to 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(x: ArrayView2<'_, f64>) -> Self {
        let n_features = x.ncols();
        let mean = x
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(n_features));
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|std| if std > f64::EPSILON { std } else { 1.0 });

        Self { mean, scale }
    }

    /// Fits on `x` and returns it scaled.
    pub fn fit_transform(x: ArrayView2<'_, f64>) -> (Self, Array2<f64>) {
        let scaler = Self::fit(x);
        let scaled = (&x - &scaler.mean) / &scaler.scale;
        (scaler, scaled)
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> ArrayView1<'_, f64> {
        self.mean.view()
    }

    pub fn scale(&self) -> ArrayView1<'_, f64> {
        self.scale.view()
    }

    pub fn transform(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, InferenceError> {
        if x.ncols() != self.n_features() {
            return Err(InferenceError::WidthMismatch {
                expected: self.n_features(),
                found: x.ncols(),
            });
        }
        Ok((&x - &self.mean) / &self.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn standardises_each_column() {
        let x = array![[1.0, 10.0], [3.0, 10.0], [5.0, 10.0]];
        let scaler = StandardScaler::fit(x.view());
        let scaled = scaler.transform(x.view()).unwrap();

        assert_eq!(scaler.mean().to_vec(), vec![3.0, 10.0]);
        let column: Vec<f64> = scaled.column(0).to_vec();
        let std = (8.0f64 / 3.0).sqrt();
        assert!((column[0] + 2.0 / std).abs() < 1e-12);
        assert!(column[1].abs() < 1e-12);
        // constant column collapses to zero instead of dividing by zero
        assert!(scaled.column(1).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn rejects_width_mismatch() {
        let scaler = StandardScaler::fit(array![[1.0, 2.0]].view());
        let err = scaler.transform(array![[1.0, 2.0, 3.0]].view()).unwrap_err();
        assert_eq!(
            err,
            InferenceError::WidthMismatch {
                expected: 2,
                found: 3
            }
        );
    }
}
