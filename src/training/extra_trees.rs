//! Extremely randomized trees
//!
//! Trees see the full sample (no bootstrap) and draw one random threshold
//! per candidate feature instead of scanning for the best one.

use super::decision_tree::Splitter;
use super::random_forest::{MaxFeatures, RandomForest};
use crate::error::Result;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraTrees {
    forest: RandomForest,
}

impl Default for ExtraTrees {
    fn default() -> Self {
        Self::new(100)
    }
}

impl ExtraTrees {
    pub fn new(n_estimators: usize) -> Self {
        Self {
            forest: RandomForest::new(n_estimators)
                .with_bootstrap(false)
                .with_splitter(Splitter::Random)
                .with_max_features(MaxFeatures::All),
        }
    }

    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.forest = self.forest.with_max_depth(depth);
        self
    }

    pub fn with_min_samples_split(mut self, min_samples: usize) -> Self {
        self.forest = self.forest.with_min_samples_split(min_samples);
        self
    }

    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.forest = self.forest.with_min_samples_leaf(min_samples);
        self
    }

    pub fn with_max_features(mut self, max_features: MaxFeatures) -> Self {
        self.forest = self.forest.with_max_features(max_features);
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.forest = self.forest.with_random_state(seed);
        self
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        self.forest.fit(x, y)?;
        Ok(self)
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.forest.predict(x)
    }

    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.forest.feature_importances()
    }
}
