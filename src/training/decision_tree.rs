//! CART decision tree
//!
//! Splits minimise the weighted variance of the target. On 0/1 targets this
//! is Gini impurity up to a constant factor and a leaf mean is the positive
//! class frequency, so the same tree backs both the probability and the
//! regression estimators.

use crate::error::{CrowdBusError, Result};
use ndarray::{Array1, Array2, ArrayView1};
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Decision tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf {
        value: f64,
        n_samples: usize,
    },
    Split {
        feature_idx: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
        n_samples: usize,
    },
}

impl TreeNode {
    fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { value, .. } => return *value,
                TreeNode::Split { feature_idx, threshold, left, right, .. } => {
                    node = if row[*feature_idx] <= *threshold { left } else { right };
                }
            }
        }
    }

    fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    fn n_leaves(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Split { left, right, .. } => left.n_leaves() + right.n_leaves(),
        }
    }
}

/// How thresholds are chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Splitter {
    /// Exhaustive scan over sorted values
    Best,
    /// One uniform threshold per candidate feature (extremely randomized trees)
    Random,
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// Decision tree model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    root: Option<TreeNode>,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split (`None` = all)
    pub max_features: Option<usize>,
    pub splitter: Splitter,
    pub random_state: u64,
    n_features: usize,
    feature_importances: Option<Array1<f64>>,
}

impl Default for DecisionTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionTree {
    pub fn new() -> Self {
        Self {
            root: None,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            splitter: Splitter::Best,
            random_state: 0,
            n_features: 0,
            feature_importances: None,
        }
    }

    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_min_samples_split(mut self, min_samples: usize) -> Self {
        self.min_samples_split = min_samples.max(2);
        self
    }

    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples.max(1);
        self
    }

    pub fn with_max_features(mut self, max_features: Option<usize>) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn with_splitter(mut self, splitter: Splitter) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    /// Fit the tree to training data
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        let n_samples = x.nrows();
        let n_features = x.ncols();

        if n_samples != y.len() {
            return Err(CrowdBusError::ShapeMismatch {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if n_samples == 0 || n_features == 0 {
            return Err(CrowdBusError::Training("cannot fit a tree on an empty matrix".to_string()));
        }

        self.n_features = n_features;
        let mut rng = ChaCha8Rng::seed_from_u64(self.random_state);
        let mut importances = vec![0.0; n_features];

        let indices: Vec<usize> = (0..n_samples).collect();
        let root = self.build_tree(x, y, indices, 0, &mut rng, &mut importances);
        self.root = Some(root);

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for imp in &mut importances {
                *imp /= total;
            }
        }
        self.feature_importances = Some(Array1::from_vec(importances));

        Ok(self)
    }

    fn build_tree(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: Vec<usize>,
        depth: usize,
        rng: &mut ChaCha8Rng,
        importances: &mut [f64],
    ) -> TreeNode {
        let n_samples = indices.len();
        let (sum, sq_sum) = indices
            .iter()
            .fold((0.0, 0.0), |(s, q), &i| (s + y[i], q + y[i] * y[i]));
        let mean = sum / n_samples as f64;
        let parent_sse = sq_sum - sum * sum / n_samples as f64;

        let should_stop = n_samples < self.min_samples_split
            || n_samples < 2 * self.min_samples_leaf
            || self.max_depth.map_or(false, |d| depth >= d)
            || parent_sse <= 1e-12;

        if should_stop {
            return TreeNode::Leaf { value: mean, n_samples };
        }

        let candidates = self.candidate_features(rng);
        let split = match self.splitter {
            Splitter::Best => self.find_best_split(x, y, &indices, &candidates, parent_sse),
            Splitter::Random => self.find_random_split(x, y, &indices, &candidates, parent_sse, rng),
        };

        let Some(split) = split else {
            return TreeNode::Leaf { value: mean, n_samples };
        };

        let (left_indices, right_indices): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| x[[i, split.feature]] <= split.threshold);

        if left_indices.len() < self.min_samples_leaf || right_indices.len() < self.min_samples_leaf {
            return TreeNode::Leaf { value: mean, n_samples };
        }

        importances[split.feature] += split.gain;

        let left = Box::new(self.build_tree(x, y, left_indices, depth + 1, rng, importances));
        let right = Box::new(self.build_tree(x, y, right_indices, depth + 1, rng, importances));

        TreeNode::Split {
            feature_idx: split.feature,
            threshold: split.threshold,
            left,
            right,
            n_samples,
        }
    }

    fn candidate_features(&self, rng: &mut ChaCha8Rng) -> Vec<usize> {
        match self.max_features {
            Some(k) if k < self.n_features => {
                let mut picked = sample(rng, self.n_features, k.max(1)).into_vec();
                picked.sort_unstable();
                picked
            }
            _ => (0..self.n_features).collect(),
        }
    }

    fn find_best_split(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        candidates: &[usize],
        parent_sse: f64,
    ) -> Option<SplitCandidate> {
        let min_leaf = self.min_samples_leaf;
        let n = indices.len();

        // Each feature scans its sorted values independently
        let per_feature: Vec<Option<SplitCandidate>> = candidates
            .par_iter()
            .map(|&feature| {
                let mut pairs: Vec<(f64, f64)> = indices.iter().map(|&i| (x[[i, feature]], y[i])).collect();
                pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

                let total_sum: f64 = pairs.iter().map(|p| p.1).sum();
                let total_sq: f64 = pairs.iter().map(|p| p.1 * p.1).sum();

                let mut left_sum = 0.0;
                let mut left_sq = 0.0;
                let mut best: Option<SplitCandidate> = None;

                for k in 0..n - 1 {
                    left_sum += pairs[k].1;
                    left_sq += pairs[k].1 * pairs[k].1;

                    let n_left = k + 1;
                    let n_right = n - n_left;
                    if n_left < min_leaf || n_right < min_leaf || pairs[k].0 >= pairs[k + 1].0 {
                        continue;
                    }

                    let right_sum = total_sum - left_sum;
                    let right_sq = total_sq - left_sq;
                    let sse = (left_sq - left_sum * left_sum / n_left as f64)
                        + (right_sq - right_sum * right_sum / n_right as f64);
                    let gain = parent_sse - sse;

                    if gain > best.map_or(1e-12, |b| b.gain) {
                        best = Some(SplitCandidate {
                            feature,
                            threshold: (pairs[k].0 + pairs[k + 1].0) / 2.0,
                            gain,
                        });
                    }
                }
                best
            })
            .collect();

        pick_best(per_feature)
    }

    fn find_random_split(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        candidates: &[usize],
        parent_sse: f64,
        rng: &mut ChaCha8Rng,
    ) -> Option<SplitCandidate> {
        let mut per_feature = Vec::with_capacity(candidates.len());

        for &feature in candidates {
            let (lo, hi) = indices.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                let v = x[[i, feature]];
                (lo.min(v), hi.max(v))
            });
            if !(hi > lo) {
                per_feature.push(None);
                continue;
            }
            let threshold = rng.gen_range(lo..hi);

            let (mut nl, mut sl, mut ql) = (0usize, 0.0, 0.0);
            let (mut nr, mut sr, mut qr) = (0usize, 0.0, 0.0);
            for &i in indices {
                let yi = y[i];
                if x[[i, feature]] <= threshold {
                    nl += 1;
                    sl += yi;
                    ql += yi * yi;
                } else {
                    nr += 1;
                    sr += yi;
                    qr += yi * yi;
                }
            }
            if nl < self.min_samples_leaf || nr < self.min_samples_leaf {
                per_feature.push(None);
                continue;
            }

            let sse = (ql - sl * sl / nl as f64) + (qr - sr * sr / nr as f64);
            let gain = parent_sse - sse;
            per_feature.push((gain > 1e-12).then_some(SplitCandidate { feature, threshold, gain }));
        }

        pick_best(per_feature)
    }

    /// Make predictions
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let root = self.root.as_ref().ok_or(CrowdBusError::ModelNotFitted)?;
        if x.ncols() != self.n_features {
            return Err(CrowdBusError::ShapeMismatch {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }
        Ok(x.outer_iter().map(|row| root.predict_row(row)).collect())
    }

    /// Overwrite leaf values. `rows` are the row indices of `x` routed
    /// through the tree; `value_fn` receives the rows landing in each leaf.
    /// Leaves no row reaches keep their value.
    pub fn update_leaves<F>(&mut self, x: &Array2<f64>, rows: &[usize], value_fn: &F) -> Result<()>
    where
        F: Fn(&[usize]) -> f64,
    {
        let root = self.root.as_mut().ok_or(CrowdBusError::ModelNotFitted)?;
        update_node(root, x, rows.to_vec(), value_fn);
        Ok(())
    }

    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }

    pub fn get_depth(&self) -> usize {
        self.root.as_ref().map_or(0, |r| r.depth())
    }

    pub fn get_n_leaves(&self) -> usize {
        self.root.as_ref().map_or(0, |r| r.n_leaves())
    }

    pub fn is_fitted(&self) -> bool {
        self.root.is_some()
    }
}

fn update_node<F>(node: &mut TreeNode, x: &Array2<f64>, rows: Vec<usize>, value_fn: &F)
where
    F: Fn(&[usize]) -> f64,
{
    match node {
        TreeNode::Leaf { value, .. } => {
            if !rows.is_empty() {
                *value = value_fn(&rows);
            }
        }
        TreeNode::Split { feature_idx, threshold, left, right, .. } => {
            let (l, r): (Vec<usize>, Vec<usize>) =
                rows.into_iter().partition(|&i| x[[i, *feature_idx]] <= *threshold);
            update_node(left, x, l, value_fn);
            update_node(right, x, r, value_fn);
        }
    }
}

/// Highest gain wins; on equal gain the lower candidate position wins
fn pick_best(candidates: Vec<Option<SplitCandidate>>) -> Option<SplitCandidate> {
    candidates.into_iter().flatten().fold(None, |best, c| match best {
        Some(b) if b.gain >= c.gain => Some(b),
        _ => Some(c),
    })
}
