use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::tree::{grow, Criterion, GrowParams, Tree};
use super::{normalized, softmax, FitParams};

/// Squared-error criterion over pseudo-residuals. Leaves take a single
/// Newton step on the multinomial deviance.
struct Residuals<'a> {
    residuals: &'a [f64],
    n_classes: usize,
}

impl Criterion for Residuals<'_> {
    type Stats = (f64, f64);
    type Leaf = f64;

    fn empty(&self) -> (f64, f64) {
        (0.0, 0.0)
    }

    fn push(&self, stats: &mut (f64, f64), sample: usize) {
        let r = self.residuals[sample];
        stats.0 += r;
        stats.1 += r * r;
    }

    fn pop(&self, stats: &mut (f64, f64), sample: usize) {
        let r = self.residuals[sample];
        stats.0 -= r;
        stats.1 -= r * r;
    }

    fn impurity(&self, stats: &(f64, f64), n: usize) -> f64 {
        if n == 0 {
            return 0.0;
        }
        let n = n as f64;
        let mean = stats.0 / n;
        (stats.1 / n - mean * mean).max(0.0)
    }

    fn leaf(&self, samples: &[usize]) -> f64 {
        let k = self.n_classes as f64;
        let (numerator, denominator) = samples.iter().fold((0.0, 0.0), |(num, den), &s| {
            let r = self.residuals[s];
            (num + r, den + r.abs() * (1.0 - r.abs()))
        });
        if denominator < 1e-12 {
            0.0
        } else {
            (k - 1.0) / k * numerator / denominator
        }
    }
}

/// Multiclass gradient boosting: one regression tree per class per stage,
/// fitted to the softmax deviance gradient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    learning_rate: f64,
    init: Vec<f64>,
    stages: Vec<Vec<Tree<f64>>>,
    importances: Vec<f64>,
}

impl GradientBoosting {
    pub(crate) fn fit(x: ArrayView2<'_, f64>, y: &[usize], n_classes: usize, params: &FitParams) -> Self {
        let n = x.nrows();
        let n_features = x.ncols();

        let mut counts = vec![0.0; n_classes];
        for &label in y {
            counts[label] += 1.0;
        }
        let init: Vec<f64> = counts
            .iter()
            .map(|count| (count / n.max(1) as f64).max(1e-12).ln())
            .collect();

        let mut model = Self {
            learning_rate: params.learning_rate,
            init: init.clone(),
            stages: Vec::new(),
            importances: vec![0.0; n_features],
        };
        if n_classes < 2 {
            return model;
        }

        let mut raw = Array2::<f64>::zeros((n, n_classes));
        for mut row in raw.rows_mut() {
            row.assign(&ArrayView1::from(&init[..]));
        }

        let grow_params = GrowParams {
            max_depth: Some(params.boosting_max_depth),
            ..GrowParams::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let mut decrease = vec![0.0; n_features];
        let mut residuals = vec![0.0; n];

        for _ in 0..params.n_estimators {
            let mut proba = raw.clone();
            for mut row in proba.rows_mut() {
                if let Some(slice) = row.as_slice_mut() {
                    softmax(slice);
                }
            }

            let mut stage = Vec::with_capacity(n_classes);
            for class in 0..n_classes {
                for (i, residual) in residuals.iter_mut().enumerate() {
                    let target = if y[i] == class { 1.0 } else { 0.0 };
                    *residual = target - proba[[i, class]];
                }

                let criterion = Residuals {
                    residuals: &residuals,
                    n_classes,
                };
                let grown = grow(x, (0..n).collect(), &criterion, &grow_params, &mut rng);
                for (total, d) in decrease.iter_mut().zip(&grown.decrease) {
                    *total += d;
                }
                for i in 0..n {
                    raw[[i, class]] += params.learning_rate * grown.tree.leaf(x.row(i));
                }
                stage.push(grown.tree);
            }
            model.stages.push(stage);
        }

        model.importances = normalized(decrease);
        model
    }

    pub fn predict_proba(&self, row: ArrayView1<'_, f64>) -> Vec<f64> {
        let mut scores = self.init.clone();
        for stage in &self.stages {
            for (score, tree) in scores.iter_mut().zip(stage) {
                *score += self.learning_rate * tree.leaf(row);
            }
        }
        softmax(&mut scores);
        scores
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn n_stages(&self) -> usize {
        self.stages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn boosting_concentrates_probability_on_true_class() {
        let x = array![[0.0], [1.0], [2.0], [5.0], [6.0], [7.0], [10.0], [11.0], [12.0]];
        let y = vec![0, 0, 0, 1, 1, 1, 2, 2, 2];
        let params = FitParams {
            n_estimators: 30,
            ..FitParams::default()
        };
        let model = GradientBoosting::fit(x.view(), &y, 3, &params);

        assert_eq!(model.n_stages(), 30);
        let proba = model.predict_proba(array![6.0].view());
        assert!(proba[1] > 0.8, "unexpected distribution {proba:?}");
        assert!((proba.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn single_class_skips_boosting_stages() {
        let x = array![[0.0], [1.0]];
        let model = GradientBoosting::fit(x.view(), &[0, 0], 1, &FitParams::default());
        assert_eq!(model.n_stages(), 0);
        assert_eq!(model.predict_proba(array![3.0].view()), vec![1.0]);
    }
}
