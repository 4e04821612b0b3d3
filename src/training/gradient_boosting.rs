//! Gradient boosted regression trees
//!
//! The regressor fits each tree to the current residuals under squared loss.
//! The classifier works in log-odds space with log loss: trees are fitted to
//! `y - p` and their leaves are then set to a single Newton step.

use ndarray::{Array1, Array2, Axis};
use rand::seq::index::sample;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use super::decision_tree::DecisionTree;
use crate::error::{CrowdBusError, Result};

/// Gradient Boosting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostingConfig {
    /// Number of boosting rounds (trees)
    pub n_estimators: usize,
    /// Shrinkage applied to every tree
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Row fraction drawn without replacement for each tree
    pub subsample: f64,
    pub random_state: u64,
}

impl Default for GradientBoostingConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_split: 2,
            min_samples_leaf: 1,
            subsample: 1.0,
            random_state: 42,
        }
    }
}

impl GradientBoostingConfig {
    fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(CrowdBusError::invalid_param("n_estimators", 0, "must be positive"));
        }
        if !(self.learning_rate > 0.0) {
            return Err(CrowdBusError::invalid_param("learning_rate", self.learning_rate, "must be positive"));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(CrowdBusError::invalid_param("subsample", self.subsample, "must be in (0, 1]"));
        }
        Ok(())
    }

    fn new_tree(&self, round: usize) -> DecisionTree {
        DecisionTree::new()
            .with_max_depth(Some(self.max_depth))
            .with_min_samples_split(self.min_samples_split)
            .with_min_samples_leaf(self.min_samples_leaf)
            .with_random_state(self.random_state.wrapping_add(round as u64))
    }

    fn subsample_indices(&self, n: usize, rng: &mut Xoshiro256PlusPlus) -> Vec<usize> {
        if self.subsample >= 1.0 {
            return (0..n).collect();
        }
        let k = ((n as f64 * self.subsample).round() as usize).clamp(1, n);
        let mut picked = sample(rng, n, k).into_vec();
        picked.sort_unstable();
        picked
    }
}

/// Gradient Boosting Regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostingRegressor {
    config: GradientBoostingConfig,
    trees: Vec<DecisionTree>,
    initial_prediction: f64,
}

impl GradientBoostingRegressor {
    pub fn new(config: GradientBoostingConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            initial_prediction: 0.0,
        }
    }

    pub fn config(&self) -> &GradientBoostingConfig {
        &self.config
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        self.config.validate()?;
        check_shapes(x, y)?;

        let n_samples = x.nrows();
        self.initial_prediction = y.mean().unwrap_or(0.0);
        self.trees.clear();

        let mut predictions = Array1::from_elem(n_samples, self.initial_prediction);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.random_state);

        for round in 0..self.config.n_estimators {
            let residuals = y - &predictions;
            let rows = self.config.subsample_indices(n_samples, &mut rng);

            let x_sub = x.select(Axis(0), &rows);
            let r_sub = residuals.select(Axis(0), &rows);

            let mut tree = self.config.new_tree(round);
            tree.fit(&x_sub, &r_sub)?;

            // Every row moves, including the ones left out of this round's sample
            let update = tree.predict(x)?;
            predictions.scaled_add(self.config.learning_rate, &update);
            self.trees.push(tree);
        }

        Ok(())
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(CrowdBusError::ModelNotFitted);
        }
        let mut predictions = Array1::from_elem(x.nrows(), self.initial_prediction);
        for tree in &self.trees {
            predictions.scaled_add(self.config.learning_rate, &tree.predict(x)?);
        }
        Ok(predictions)
    }
}

/// Binary Gradient Boosting Classifier (targets 0/1)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostingClassifier {
    config: GradientBoostingConfig,
    trees: Vec<DecisionTree>,
    initial_log_odds: f64,
}

impl GradientBoostingClassifier {
    pub fn new(config: GradientBoostingConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            initial_log_odds: 0.0,
        }
    }

    pub fn config(&self) -> &GradientBoostingConfig {
        &self.config
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        self.config.validate()?;
        check_shapes(x, y)?;

        let n_samples = x.nrows();
        let prior = y.mean().unwrap_or(0.5).clamp(1e-6, 1.0 - 1e-6);
        self.initial_log_odds = (prior / (1.0 - prior)).ln();
        self.trees.clear();

        let mut raw = Array1::from_elem(n_samples, self.initial_log_odds);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.random_state);

        for round in 0..self.config.n_estimators {
            let probs = raw.mapv(sigmoid);
            let residuals = y - &probs;
            let rows = self.config.subsample_indices(n_samples, &mut rng);

            let x_sub = x.select(Axis(0), &rows);
            let r_sub = residuals.select(Axis(0), &rows);
            let p_sub = probs.select(Axis(0), &rows);

            let mut tree = self.config.new_tree(round);
            tree.fit(&x_sub, &r_sub)?;

            let local: Vec<usize> = (0..rows.len()).collect();
            tree.update_leaves(&x_sub, &local, &|members: &[usize]| {
                let num: f64 = members.iter().map(|&i| r_sub[i]).sum();
                let den: f64 = members.iter().map(|&i| p_sub[i] * (1.0 - p_sub[i])).sum();
                if den.abs() < 1e-12 {
                    0.0
                } else {
                    num / den
                }
            })?;

            raw.scaled_add(self.config.learning_rate, &tree.predict(x)?);
            self.trees.push(tree);
        }

        Ok(())
    }

    fn decision_function(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(CrowdBusError::ModelNotFitted);
        }
        let mut raw = Array1::from_elem(x.nrows(), self.initial_log_odds);
        for tree in &self.trees {
            raw.scaled_add(self.config.learning_rate, &tree.predict(x)?);
        }
        Ok(raw)
    }

    /// Probability of the positive class
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(self.decision_function(x)?.mapv(sigmoid))
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(self.predict_proba(x)?.mapv(|p| if p >= 0.5 { 1.0 } else { 0.0 }))
    }
}

fn check_shapes(x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(CrowdBusError::ShapeMismatch {
            expected: format!("y length = {}", x.nrows()),
            actual: format!("y length = {}", y.len()),
        });
    }
    if x.nrows() == 0 {
        return Err(CrowdBusError::Training("no training rows".to_string()));
    }
    Ok(())
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}
