//! LightGBM-style leaf-wise boosting
//!
//! Trees grow best-first: the leaf with the largest gain is split next
//! until `num_leaves` is reached, no leaf has a positive gain, or the
//! depth limit stops it.

use super::xgboost::{find_best_split, leaf_weight, subsample, sums, GradNode, GradSplit, GradTree, SplitParams};
use crate::error::{CrowdBusError, Result};
use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

/// LightGBM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightGBMConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    /// `None` = unlimited
    pub max_depth: Option<usize>,
    pub num_leaves: usize,
    pub min_child_samples: usize,
    pub reg_lambda: f64,
    pub subsample: f64,
    pub random_state: u64,
}

impl Default for LightGBMConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: None,
            num_leaves: 31,
            min_child_samples: 20,
            reg_lambda: 0.0,
            subsample: 1.0,
            random_state: 42,
        }
    }
}

struct OpenLeaf {
    node: usize,
    rows: Vec<usize>,
    depth: usize,
    split: Option<GradSplit>,
}

fn build_leafwise(
    x: &Array2<f64>,
    grad: &[f64],
    hess: &[f64],
    rows: Vec<usize>,
    features: &[usize],
    config: &LightGBMConfig,
    params: &SplitParams,
) -> GradTree {
    let mut tree = GradTree::default();
    let (g, h) = sums(grad, hess, &rows);
    tree.nodes.push(GradNode::Leaf {
        weight: leaf_weight(g, h, config.reg_lambda),
    });

    let can_split = |depth: usize| config.max_depth.map_or(true, |d| depth < d);
    let evaluate = |rows: &[usize], depth: usize| {
        if can_split(depth) && rows.len() >= 2 * config.min_child_samples.max(1) {
            find_best_split(x, grad, hess, rows, features, params)
        } else {
            None
        }
    };

    let root_split = evaluate(&rows, 0);
    let mut open = vec![OpenLeaf { node: 0, rows, depth: 0, split: root_split }];
    let mut n_leaves = 1;

    while n_leaves < config.num_leaves.max(2) {
        // Largest gain first; the earliest opened leaf wins ties
        let mut chosen: Option<usize> = None;
        for (i, leaf) in open.iter().enumerate() {
            if let Some(s) = leaf.split {
                if chosen.map_or(true, |c| s.gain > open[c].split.map_or(f64::NEG_INFINITY, |b| b.gain)) {
                    chosen = Some(i);
                }
            }
        }
        let Some(chosen) = chosen else { break };

        let leaf = open.swap_remove(chosen);
        let Some(split) = leaf.split else { break };
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            leaf.rows.into_iter().partition(|&i| x[[i, split.feature]] <= split.threshold);

        let mut child = |rows: Vec<usize>, tree: &mut GradTree| {
            let (g, h) = sums(grad, hess, &rows);
            let idx = tree.nodes.len();
            tree.nodes.push(GradNode::Leaf {
                weight: leaf_weight(g, h, config.reg_lambda),
            });
            let split = evaluate(&rows, leaf.depth + 1);
            (idx, OpenLeaf { node: idx, rows, depth: leaf.depth + 1, split })
        };

        let (left, left_leaf) = child(left_rows, &mut tree);
        let (right, right_leaf) = child(right_rows, &mut tree);
        tree.nodes[leaf.node] = GradNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        open.push(left_leaf);
        open.push(right_leaf);
        n_leaves += 1;
    }

    tree
}

/// LightGBM Regressor (squared error loss)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightGBMRegressor {
    config: LightGBMConfig,
    trees: Vec<GradTree>,
    base_score: f64,
    n_features: usize,
}

impl LightGBMRegressor {
    pub fn new(config: LightGBMConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            base_score: 0.0,
            n_features: 0,
        }
    }

    pub fn config(&self) -> &LightGBMConfig {
        &self.config
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let n_samples = x.nrows();
        if n_samples != y.len() || n_samples == 0 {
            return Err(CrowdBusError::ShapeMismatch {
                expected: format!("non-empty y of length {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }

        self.n_features = x.ncols();
        self.base_score = y.mean().unwrap_or(0.0);
        self.trees.clear();

        let params = SplitParams {
            lambda: self.config.reg_lambda,
            gamma: 0.0,
            min_child_weight: 1e-3,
            min_child_samples: self.config.min_child_samples.max(1),
        };
        let features: Vec<usize> = (0..self.n_features).collect();
        let hess = vec![1.0; n_samples];
        let mut preds = Array1::from_elem(n_samples, self.base_score);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.random_state);

        for _ in 0..self.config.n_estimators {
            let grad: Vec<f64> = preds.iter().zip(y.iter()).map(|(p, t)| p - t).collect();
            let rows = subsample(&mut rng, n_samples, self.config.subsample);

            let tree = build_leafwise(x, &grad, &hess, rows, &features, &self.config, &params);
            for (i, row) in x.outer_iter().enumerate() {
                preds[i] += self.config.learning_rate * tree.predict_row(row);
            }
            self.trees.push(tree);
        }

        Ok(())
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(CrowdBusError::ModelNotFitted);
        }
        if x.ncols() != self.n_features {
            return Err(CrowdBusError::ShapeMismatch {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }
        let lr = self.config.learning_rate;
        Ok(x
            .outer_iter()
            .map(|row| self.base_score + lr * self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>())
            .collect())
    }
}
