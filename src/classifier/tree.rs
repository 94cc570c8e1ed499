use ndarray::{ArrayView1, ArrayView2};
use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::normalized;

/// Minimum impurity decrease for a split to be kept.
const MIN_DECREASE: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum Node<L> {
    Leaf(L),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Binary tree stored as an arena; children are built before their parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Tree<L> {
    nodes: Vec<Node<L>>,
    root: usize,
}

impl<L> Tree<L> {
    pub(crate) fn leaf(&self, row: ArrayView1<'_, f64>) -> &L {
        let mut idx = self.root;
        loop {
            match &self.nodes[idx] {
                Node::Leaf(value) => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct GrowParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Number of candidate features drawn per node; `None` considers all.
    pub max_features: Option<usize>,
}

impl Default for GrowParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
        }
    }
}

/// Split quality measure. `Stats` are sufficient statistics that can be
/// updated one sample at a time while sweeping a sorted feature.
pub(crate) trait Criterion {
    type Stats: Clone;
    type Leaf;

    fn empty(&self) -> Self::Stats;
    fn push(&self, stats: &mut Self::Stats, sample: usize);
    fn pop(&self, stats: &mut Self::Stats, sample: usize);
    fn impurity(&self, stats: &Self::Stats, n: usize) -> f64;
    fn leaf(&self, samples: &[usize]) -> Self::Leaf;

    fn stats(&self, samples: &[usize]) -> Self::Stats {
        let mut stats = self.empty();
        for &sample in samples {
            self.push(&mut stats, sample);
        }
        stats
    }
}

pub(crate) struct GrownTree<L> {
    pub tree: Tree<L>,
    /// Unnormalised impurity decrease per feature, weighted by node size.
    pub decrease: Vec<f64>,
}

struct Split {
    feature: usize,
    threshold: f64,
    decrease: f64,
}

struct Grower<'a, 'r, C: Criterion> {
    x: ArrayView2<'a, f64>,
    criterion: &'r C,
    params: &'r GrowParams,
    rng: &'r mut ChaCha8Rng,
    nodes: Vec<Node<C::Leaf>>,
    decrease: Vec<f64>,
}

pub(crate) fn grow<C: Criterion>(
    x: ArrayView2<'_, f64>,
    samples: Vec<usize>,
    criterion: &C,
    params: &GrowParams,
    rng: &mut ChaCha8Rng,
) -> GrownTree<C::Leaf> {
    let mut grower = Grower {
        x,
        criterion,
        params,
        rng,
        nodes: Vec::new(),
        decrease: vec![0.0; x.ncols()],
    };
    let root = grower.build(samples, 0);

    GrownTree {
        tree: Tree {
            nodes: grower.nodes,
            root,
        },
        decrease: grower.decrease,
    }
}

impl<C: Criterion> Grower<'_, '_, C> {
    fn build(&mut self, samples: Vec<usize>, depth: usize) -> usize {
        let n = samples.len();
        let stats = self.criterion.stats(&samples);
        let impurity = self.criterion.impurity(&stats, n);

        let depth_exhausted = self.params.max_depth.is_some_and(|max| depth >= max);
        if depth_exhausted || n < self.params.min_samples_split || impurity <= MIN_DECREASE {
            return self.push_leaf(&samples);
        }

        let Some(split) = self.best_split(&samples, &stats, impurity) else {
            return self.push_leaf(&samples);
        };

        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .partition(|&&s| self.x[[s, split.feature]] <= split.threshold);
        self.decrease[split.feature] += split.decrease;

        let left = self.build(left, depth + 1);
        let right = self.build(right, depth + 1);
        self.nodes.push(Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        });
        self.nodes.len() - 1
    }

    fn push_leaf(&mut self, samples: &[usize]) -> usize {
        self.nodes.push(Node::Leaf(self.criterion.leaf(samples)));
        self.nodes.len() - 1
    }

    fn candidate_features(&mut self) -> Vec<usize> {
        let n_features = self.x.ncols();
        match self.params.max_features {
            Some(k) if k < n_features => {
                let mut picked = index::sample(&mut *self.rng, n_features, k).into_vec();
                picked.sort_unstable();
                picked
            }
            _ => (0..n_features).collect(),
        }
    }

    fn best_split(&mut self, samples: &[usize], parent: &C::Stats, impurity: f64) -> Option<Split> {
        let n = samples.len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        let parent_weighted = n as f64 * impurity;
        let mut best: Option<Split> = None;

        for feature in self.candidate_features() {
            let mut order = samples.to_vec();
            order.sort_by(|a, b| self.x[[*a, feature]].total_cmp(&self.x[[*b, feature]]));

            let mut left = self.criterion.empty();
            let mut right = parent.clone();
            for k in 0..n - 1 {
                let sample = order[k];
                self.criterion.push(&mut left, sample);
                self.criterion.pop(&mut right, sample);

                let value = self.x[[sample, feature]];
                let next = self.x[[order[k + 1], feature]];
                if next <= value {
                    continue;
                }

                let n_left = k + 1;
                let n_right = n - n_left;
                if n_left < min_leaf || n_right < min_leaf {
                    continue;
                }

                let weighted = n_left as f64 * self.criterion.impurity(&left, n_left)
                    + n_right as f64 * self.criterion.impurity(&right, n_right);
                let decrease = parent_weighted - weighted;
                let improves = best
                    .as_ref()
                    .map_or(decrease > MIN_DECREASE, |b| decrease > b.decrease + MIN_DECREASE);
                if improves {
                    best = Some(Split {
                        feature,
                        threshold: value + (next - value) / 2.0,
                        decrease,
                    });
                }
            }
        }

        best
    }
}

/// Gini impurity over class indices; leaves hold the class distribution.
pub(crate) struct Gini<'a> {
    pub y: &'a [usize],
    pub n_classes: usize,
}

impl Criterion for Gini<'_> {
    type Stats = Vec<f64>;
    type Leaf = Vec<f64>;

    fn empty(&self) -> Vec<f64> {
        vec![0.0; self.n_classes]
    }

    fn push(&self, stats: &mut Vec<f64>, sample: usize) {
        stats[self.y[sample]] += 1.0;
    }

    fn pop(&self, stats: &mut Vec<f64>, sample: usize) {
        stats[self.y[sample]] -= 1.0;
    }

    fn impurity(&self, stats: &Vec<f64>, n: usize) -> f64 {
        if n == 0 {
            return 0.0;
        }
        let n = n as f64;
        1.0 - stats.iter().map(|count| (count / n).powi(2)).sum::<f64>()
    }

    fn leaf(&self, samples: &[usize]) -> Vec<f64> {
        let mut distribution = self.stats(samples);
        let n = samples.len().max(1) as f64;
        for share in distribution.iter_mut() {
            *share /= n;
        }
        distribution
    }
}

/// CART classification tree grown to purity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    tree: Tree<Vec<f64>>,
    importances: Vec<f64>,
}

impl DecisionTree {
    pub(crate) fn fit(x: ArrayView2<'_, f64>, y: &[usize], n_classes: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Self::fit_on(
            x,
            y,
            n_classes,
            (0..x.nrows()).collect(),
            &GrowParams::default(),
            &mut rng,
        )
    }

    pub(crate) fn fit_on(
        x: ArrayView2<'_, f64>,
        y: &[usize],
        n_classes: usize,
        samples: Vec<usize>,
        params: &GrowParams,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let criterion = Gini { y, n_classes };
        let grown = grow(x, samples, &criterion, params, rng);

        Self {
            tree: grown.tree,
            importances: normalized(grown.decrease),
        }
    }

    pub fn predict_proba(&self, row: ArrayView1<'_, f64>) -> Vec<f64> {
        self.tree.leaf(row).clone()
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }
}
