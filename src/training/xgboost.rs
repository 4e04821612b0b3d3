//! XGBoost-style gradient boosting with second-order approximation
//!
//! - Leaf weights: w* = -G / (H + lambda)
//! - Split gain: 0.5 * [GL²/(HL+λ) + GR²/(HR+λ) - (GL+GR)²/(HL+HR+λ)] - γ
//! - Children must carry at least `min_child_weight` hessian mass
//!
//! The flat [`GradTree`] and its split finder are shared with the
//! leaf-wise booster in `lightgbm.rs`.

use crate::error::{CrowdBusError, Result};
use ndarray::{Array1, Array2, ArrayView1};
use rand::seq::index::sample;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Node of a flat gradient tree; children are indices into the node list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum GradNode {
    Leaf { weight: f64 },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct GradTree {
    pub(crate) nodes: Vec<GradNode>,
}

impl GradTree {
    pub(crate) fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                GradNode::Leaf { weight } => return *weight,
                GradNode::Split { feature, threshold, left, right } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub(crate) fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, GradNode::Leaf { .. })).count()
    }
}

/// Constraints shared by both boosters' split search
#[derive(Debug, Clone, Copy)]
pub(crate) struct SplitParams {
    pub lambda: f64,
    pub gamma: f64,
    pub min_child_weight: f64,
    pub min_child_samples: usize,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct GradSplit {
    pub feature: usize,
    pub threshold: f64,
    pub gain: f64,
}

pub(crate) fn leaf_weight(g_sum: f64, h_sum: f64, lambda: f64) -> f64 {
    -g_sum / (h_sum + lambda)
}

pub(crate) fn sums(grad: &[f64], hess: &[f64], rows: &[usize]) -> (f64, f64) {
    rows.iter().fold((0.0, 0.0), |(g, h), &i| (g + grad[i], h + hess[i]))
}

/// Exact greedy search over `features`. Highest gain wins; ties keep the
/// earlier feature.
pub(crate) fn find_best_split(
    x: &Array2<f64>,
    grad: &[f64],
    hess: &[f64],
    rows: &[usize],
    features: &[usize],
    params: &SplitParams,
) -> Option<GradSplit> {
    let (g_total, h_total) = sums(grad, hess, rows);
    let parent_score = g_total * g_total / (h_total + params.lambda);
    let n = rows.len();

    let per_feature: Vec<Option<GradSplit>> = features
        .par_iter()
        .map(|&feature| {
            let mut sorted: Vec<usize> = rows.to_vec();
            sorted.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));

            let mut g_left = 0.0;
            let mut h_left = 0.0;
            let mut best: Option<GradSplit> = None;

            for pos in 0..n.saturating_sub(1) {
                let idx = sorted[pos];
                g_left += grad[idx];
                h_left += hess[idx];

                let value = x[[idx, feature]];
                let next_value = x[[sorted[pos + 1], feature]];
                if value >= next_value {
                    continue;
                }

                let n_left = pos + 1;
                if n_left < params.min_child_samples || n - n_left < params.min_child_samples {
                    continue;
                }

                let g_right = g_total - g_left;
                let h_right = h_total - h_left;
                if h_left < params.min_child_weight || h_right < params.min_child_weight {
                    continue;
                }

                let gain = 0.5
                    * (g_left * g_left / (h_left + params.lambda)
                        + g_right * g_right / (h_right + params.lambda)
                        - parent_score)
                    - params.gamma;

                if gain > best.map_or(1e-12, |b| b.gain) {
                    best = Some(GradSplit {
                        feature,
                        threshold: (value + next_value) / 2.0,
                        gain,
                    });
                }
            }
            best
        })
        .collect();

    per_feature.into_iter().flatten().fold(None, |best, c| match best {
        Some(b) if b.gain >= c.gain => Some(b),
        _ => Some(c),
    })
}

pub(crate) fn subsample(rng: &mut Xoshiro256PlusPlus, n: usize, ratio: f64) -> Vec<usize> {
    if ratio >= 1.0 {
        return (0..n).collect();
    }
    let k = ((n as f64 * ratio).round() as usize).clamp(1, n);
    let mut picked = sample(rng, n, k).into_vec();
    picked.sort_unstable();
    picked
}

/// XGBoost configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XGBoostConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_child_weight: f64,
    /// L2 regularization on leaf weights
    pub reg_lambda: f64,
    /// Minimum loss reduction to make a split
    pub gamma: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub random_state: u64,
}

impl Default for XGBoostConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.3,
            max_depth: 6,
            min_child_weight: 1.0,
            reg_lambda: 1.0,
            gamma: 0.0,
            subsample: 1.0,
            colsample_bytree: 1.0,
            random_state: 42,
        }
    }
}

/// XGBoost Regressor (squared error loss)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XGBoostRegressor {
    config: XGBoostConfig,
    trees: Vec<GradTree>,
    base_score: f64,
    n_features: usize,
}

impl XGBoostRegressor {
    pub fn new(config: XGBoostConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            base_score: 0.0,
            n_features: 0,
        }
    }

    pub fn config(&self) -> &XGBoostConfig {
        &self.config
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let n_samples = x.nrows();
        let n_features = x.ncols();
        if n_samples != y.len() || n_samples == 0 {
            return Err(CrowdBusError::ShapeMismatch {
                expected: format!("non-empty y of length {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if !(self.config.subsample > 0.0 && self.config.subsample <= 1.0) {
            return Err(CrowdBusError::invalid_param("subsample", self.config.subsample, "must be in (0, 1]"));
        }

        self.n_features = n_features;
        self.base_score = y.mean().unwrap_or(0.0);
        self.trees.clear();

        let params = SplitParams {
            lambda: self.config.reg_lambda,
            gamma: self.config.gamma,
            min_child_weight: self.config.min_child_weight,
            min_child_samples: 1,
        };
        let mut preds = Array1::from_elem(n_samples, self.base_score);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.random_state);
        let hess = vec![1.0; n_samples];

        for _ in 0..self.config.n_estimators {
            // Squared error: grad = pred - y, hess = 1
            let grad: Vec<f64> = preds.iter().zip(y.iter()).map(|(p, t)| p - t).collect();

            let rows = subsample(&mut rng, n_samples, self.config.subsample);
            let features = subsample(&mut rng, n_features, self.config.colsample_bytree);

            let mut tree = GradTree::default();
            grow_depthwise(&mut tree, x, &grad, &hess, rows, &features, 0, &self.config, &params);

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

#[allow(clippy::too_many_arguments)]
fn grow_depthwise(
    tree: &mut GradTree,
    x: &Array2<f64>,
    grad: &[f64],
    hess: &[f64],
    rows: Vec<usize>,
    features: &[usize],
    depth: usize,
    config: &XGBoostConfig,
    params: &SplitParams,
) -> usize {
    let (g_sum, h_sum) = sums(grad, hess, &rows);
    let node_idx = tree.nodes.len();
    tree.nodes.push(GradNode::Leaf {
        weight: leaf_weight(g_sum, h_sum, config.reg_lambda),
    });

    if depth >= config.max_depth || rows.len() < 2 || h_sum < config.min_child_weight {
        return node_idx;
    }

    let Some(split) = find_best_split(x, grad, hess, &rows, features, params) else {
        return node_idx;
    };

    let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
        rows.into_iter().partition(|&i| x[[i, split.feature]] <= split.threshold);

    let left = grow_depthwise(tree, x, grad, hess, left_rows, features, depth + 1, config, params);
    let right = grow_depthwise(tree, x, grad, hess, right_rows, features, depth + 1, config, params);

    tree.nodes[node_idx] = GradNode::Split {
        feature: split.feature,
        threshold: split.threshold,
        left,
        right,
    };
    node_idx
}
