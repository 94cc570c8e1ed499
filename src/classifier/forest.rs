use ndarray::{ArrayView1, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::tree::{DecisionTree, GrowParams};
use super::{normalized, FitParams};

/// Bagged ensemble of fully grown trees with per-split feature subsampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_classes: usize,
    importances: Vec<f64>,
}

impl RandomForest {
    pub(crate) fn fit(x: ArrayView2<'_, f64>, y: &[usize], n_classes: usize, params: &FitParams) -> Self {
        let n = x.nrows();
        let n_features = x.ncols();
        let grow_params = GrowParams {
            max_features: Some(((n_features as f64).sqrt() as usize).max(1)),
            ..GrowParams::default()
        };

        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let trees: Vec<DecisionTree> = (0..params.n_estimators.max(1))
            .map(|_| {
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                DecisionTree::fit_on(x, y, n_classes, bootstrap, &grow_params, &mut rng)
            })
            .collect();

        let mut totals = vec![0.0; n_features];
        for tree in &trees {
            for (total, weight) in totals.iter_mut().zip(tree.feature_importances()) {
                *total += weight;
            }
        }

        Self {
            trees,
            n_classes,
            importances: normalized(totals),
        }
    }

    /// Mean of the per-tree class distributions.
    pub fn predict_proba(&self, row: ArrayView1<'_, f64>) -> Vec<f64> {
        let mut proba = vec![0.0; self.n_classes];
        for tree in &self.trees {
            for (total, share) in proba.iter_mut().zip(tree.predict_proba(row)) {
                *total += share;
            }
        }
        let count = self.trees.len().max(1) as f64;
        proba.iter_mut().for_each(|p| *p /= count);
        proba
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn same_seed_grows_same_forest() {
        let x = array![[1.0, 0.0], [2.0, 1.0], [3.0, 0.0], [8.0, 1.0], [9.0, 0.0], [10.0, 1.0]];
        let y = vec![0, 0, 0, 1, 1, 1];
        let params = FitParams {
            n_estimators: 15,
            ..FitParams::default()
        };

        let first = RandomForest::fit(x.view(), &y, 2, &params);
        let second = RandomForest::fit(x.view(), &y, 2, &params);
        assert_eq!(first, second);
        assert_eq!(first.n_trees(), 15);
    }

    #[test]
    fn probabilities_sum_to_one() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0]];
        let y = vec![0, 1, 2, 0, 1, 2];
        let forest = RandomForest::fit(x.view(), &y, 3, &FitParams::default());

        let proba = forest.predict_proba(array![3.5].view());
        assert_eq!(proba.len(), 3);
        assert!((proba.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        let importance: f64 = forest.feature_importances().iter().sum();
        assert!((importance - 1.0).abs() < 1e-9);
    }
}
