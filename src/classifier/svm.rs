use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::{softmax, FitParams};

const TOLERANCE: f64 = 1e-3;
const ALPHA_EPSILON: f64 = 1e-8;
const MAX_QUIET_PASSES: usize = 5;
const MAX_SWEEPS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct BinaryMachine {
    support: Array2<f64>,
    /// `alpha_i * y_i` for each support vector.
    coef: Vec<f64>,
    bias: f64,
}

/// RBF-kernel support vector classifier, one machine per class (one-vs-rest).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Svm {
    gamma: f64,
    n_classes: usize,
    machines: Vec<BinaryMachine>,
}

impl Svm {
    pub(crate) fn fit(x: ArrayView2<'_, f64>, y: &[usize], n_classes: usize, params: &FitParams) -> Self {
        let gamma = scale_gamma(x);
        if n_classes < 2 {
            return Self {
                gamma,
                n_classes,
                machines: Vec::new(),
            };
        }

        let kernel = gram_matrix(x, gamma);
        let machines = (0..n_classes)
            .map(|class| {
                let signs: Vec<f64> = y
                    .iter()
                    .map(|&label| if label == class { 1.0 } else { -1.0 })
                    .collect();
                let mut rng = ChaCha8Rng::seed_from_u64(params.seed.wrapping_add(class as u64));
                let (alphas, bias) = smo(&kernel, &signs, params.svm_c, &mut rng);

                let support: Vec<usize> = (0..alphas.len())
                    .filter(|&i| alphas[i] > ALPHA_EPSILON)
                    .collect();
                BinaryMachine {
                    support: x.select(Axis(0), &support),
                    coef: support.iter().map(|&i| alphas[i] * signs[i]).collect(),
                    bias,
                }
            })
            .collect();

        Self {
            gamma,
            n_classes,
            machines,
        }
    }

    /// One signed margin per class; the largest wins.
    pub fn decision_function(&self, row: ArrayView1<'_, f64>) -> Vec<f64> {
        if self.machines.is_empty() {
            return vec![0.0; self.n_classes.max(1)];
        }
        self.machines
            .iter()
            .map(|machine| {
                machine
                    .support
                    .rows()
                    .into_iter()
                    .zip(&machine.coef)
                    .map(|(sv, coef)| coef * rbf(sv, row, self.gamma))
                    .sum::<f64>()
                    + machine.bias
            })
            .collect()
    }

    /// Softmax over the one-vs-rest margins.
    pub fn predict_proba(&self, row: ArrayView1<'_, f64>) -> Vec<f64> {
        let mut margins = self.decision_function(row);
        softmax(&mut margins);
        margins
    }

    pub fn n_support(&self) -> usize {
        self.machines.iter().map(|m| m.coef.len()).sum()
    }
}

/// `1 / (n_features * var(x))`, or 1 for constant input.
fn scale_gamma(x: ArrayView2<'_, f64>) -> f64 {
    let count = x.len() as f64;
    if count == 0.0 {
        return 1.0;
    }
    let mean = x.sum() / count;
    let variance = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
    if variance > f64::EPSILON {
        1.0 / (x.ncols() as f64 * variance)
    } else {
        1.0
    }
}

fn rbf(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>, gamma: f64) -> f64 {
    let distance: f64 = a.iter().zip(b.iter()).map(|(p, q)| (p - q).powi(2)).sum();
    (-gamma * distance).exp()
}

fn gram_matrix(x: ArrayView2<'_, f64>, gamma: f64) -> Array2<f64> {
    let n = x.nrows();
    let mut kernel = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in i..n {
            let value = rbf(x.row(i), x.row(j), gamma);
            kernel[[i, j]] = value;
            kernel[[j, i]] = value;
        }
    }
    kernel
}

/// Simplified sequential minimal optimisation for one binary problem.
fn smo(kernel: &Array2<f64>, y: &[f64], c: f64, rng: &mut ChaCha8Rng) -> (Vec<f64>, f64) {
    let n = y.len();
    let mut alphas = vec![0.0; n];
    let mut bias = 0.0;
    if n < 2 {
        return (alphas, bias);
    }

    let margin = |alphas: &[f64], bias: f64, i: usize| -> f64 {
        alphas
            .iter()
            .enumerate()
            .filter(|(_, a)| **a > 0.0)
            .map(|(m, a)| a * y[m] * kernel[[m, i]])
            .sum::<f64>()
            + bias
    };

    let mut quiet_passes = 0;
    let mut sweeps = 0;
    while quiet_passes < MAX_QUIET_PASSES && sweeps < MAX_SWEEPS {
        sweeps += 1;
        let mut changed = 0;

        for i in 0..n {
            let error_i = margin(&alphas, bias, i) - y[i];
            let violates = (y[i] * error_i < -TOLERANCE && alphas[i] < c)
                || (y[i] * error_i > TOLERANCE && alphas[i] > 0.0);
            if !violates {
                continue;
            }

            let mut j = rng.gen_range(0..n - 1);
            if j >= i {
                j += 1;
            }
            let error_j = margin(&alphas, bias, j) - y[j];
            let (alpha_i_old, alpha_j_old) = (alphas[i], alphas[j]);

            let (low, high) = if y[i] != y[j] {
                ((alpha_j_old - alpha_i_old).max(0.0), (c + alpha_j_old - alpha_i_old).min(c))
            } else {
                ((alpha_i_old + alpha_j_old - c).max(0.0), (alpha_i_old + alpha_j_old).min(c))
            };
            if (high - low).abs() < f64::EPSILON {
                continue;
            }

            let eta = 2.0 * kernel[[i, j]] - kernel[[i, i]] - kernel[[j, j]];
            if eta >= 0.0 {
                continue;
            }

            let alpha_j = (alpha_j_old - y[j] * (error_i - error_j) / eta).clamp(low, high);
            if (alpha_j - alpha_j_old).abs() < 1e-5 {
                continue;
            }
            let alpha_i = alpha_i_old + y[i] * y[j] * (alpha_j_old - alpha_j);
            alphas[i] = alpha_i;
            alphas[j] = alpha_j;

            let delta_i = y[i] * (alpha_i - alpha_i_old);
            let delta_j = y[j] * (alpha_j - alpha_j_old);
            let b1 = bias - error_i - delta_i * kernel[[i, i]] - delta_j * kernel[[i, j]];
            let b2 = bias - error_j - delta_i * kernel[[i, j]] - delta_j * kernel[[j, j]];
            bias = if alpha_i > 0.0 && alpha_i < c {
                b1
            } else if alpha_j > 0.0 && alpha_j < c {
                b2
            } else {
                (b1 + b2) / 2.0
            };
            changed += 1;
        }

        quiet_passes = if changed == 0 { quiet_passes + 1 } else { 0 };
    }

    (alphas, bias)
}
