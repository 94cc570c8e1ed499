use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::{softmax, FitParams};

const GRADIENT_TOLERANCE: f64 = 1e-5;

/// Multinomial logistic regression with an L2 penalty of strength
/// `1 / logistic_c`, fitted by full-batch gradient descent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    /// `classes x features`
    weights: Array2<f64>,
    intercept: Array1<f64>,
}

impl LogisticRegression {
    pub(crate) fn fit(x: ArrayView2<'_, f64>, y: &[usize], n_classes: usize, params: &FitParams) -> Self {
        let (n, d) = x.dim();
        let mut weights = Array2::<f64>::zeros((n_classes, d));
        let mut intercept = Array1::<f64>::zeros(n_classes);
        if n_classes < 2 || n == 0 {
            return Self { weights, intercept };
        }

        let mut targets = Array2::<f64>::zeros((n, n_classes));
        for (i, &label) in y.iter().enumerate() {
            targets[[i, label]] = 1.0;
        }

        let n_f = n as f64;
        let penalty = 1.0 / (params.logistic_c.max(f64::EPSILON) * n_f);
        // Step of 1/L where L bounds the curvature of the mean deviance.
        let max_norm = x
            .rows()
            .into_iter()
            .map(|row| row.dot(&row) + 1.0)
            .fold(0.0, f64::max);
        let step = 1.0 / (0.5 * max_norm + penalty);

        for _ in 0..params.logistic_max_iter {
            let mut proba = x.dot(&weights.t()) + &intercept;
            for mut row in proba.rows_mut() {
                if let Some(slice) = row.as_slice_mut() {
                    softmax(slice);
                }
            }

            let residual = proba - &targets;
            let grad_w = residual.t().dot(&x) / n_f + &weights * penalty;
            let grad_b = residual.sum_axis(Axis(0)) / n_f;

            let largest = grad_w
                .iter()
                .chain(grad_b.iter())
                .fold(0.0f64, |acc, g| acc.max(g.abs()));

            weights.scaled_add(-step, &grad_w);
            intercept.scaled_add(-step, &grad_b);

            if largest < GRADIENT_TOLERANCE {
                break;
            }
        }

        Self { weights, intercept }
    }

    pub fn predict_proba(&self, row: ArrayView1<'_, f64>) -> Vec<f64> {
        let mut logits = (self.weights.dot(&row) + &self.intercept).to_vec();
        softmax(&mut logits);
        logits
    }

    pub fn coefficients(&self) -> ArrayView2<'_, f64> {
        self.weights.view()
    }

    /// Mean absolute coefficient per feature across classes.
    pub fn mean_abs_coefficients(&self) -> Vec<f64> {
        self.weights
            .mapv(f64::abs)
            .mean_axis(Axis(0))
            .map(|mean| mean.to_vec())
            .unwrap_or_else(|| vec![0.0; self.weights.ncols()])
    }
}
