//! Random Forest implementation

use super::decision_tree::{DecisionTree, Splitter};
use crate::error::{CrowdBusError, Result};
use ndarray::{Array1, Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Strategy for features considered per split
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MaxFeatures {
    Sqrt,
    Log2,
    Fraction(f64),
    All,
}

impl MaxFeatures {
    pub fn resolve(&self, n_features: usize) -> usize {
        let n = n_features as f64;
        let k = match self {
            MaxFeatures::Sqrt => n.sqrt().floor() as usize,
            MaxFeatures::Log2 => n.log2().floor() as usize,
            MaxFeatures::Fraction(f) => (n * f).floor() as usize,
            MaxFeatures::All => n_features,
        };
        k.clamp(1, n_features.max(1))
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "sqrt" => Some(MaxFeatures::Sqrt),
            "log2" => Some(MaxFeatures::Log2),
            "all" | "none" => Some(MaxFeatures::All),
            _ => None,
        }
    }
}

/// Bagged ensemble of CART trees. Output is the mean tree output, which is
/// the positive class probability when trained on 0/1 targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    pub splitter: Splitter,
    pub random_state: u64,
    n_features: usize,
    feature_importances: Option<Array1<f64>>,
}

impl Default for RandomForest {
    fn default() -> Self {
        Self::new(100)
    }
}

impl RandomForest {
    pub fn new(n_estimators: usize) -> Self {
        Self {
            trees: Vec::new(),
            n_estimators,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
            splitter: Splitter::Best,
            random_state: 42,
            n_features: 0,
            feature_importances: None,
        }
    }

    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_min_samples_split(mut self, min_samples: usize) -> Self {
        self.min_samples_split = min_samples;
        self
    }

    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples;
        self
    }

    pub fn with_max_features(mut self, max_features: MaxFeatures) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: bool) -> Self {
        self.bootstrap = bootstrap;
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

    /// Fit the forest to training data
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        let n_samples = x.nrows();
        let n_features = x.ncols();

        if n_samples != y.len() {
            return Err(CrowdBusError::ShapeMismatch {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if self.n_estimators == 0 {
            return Err(CrowdBusError::invalid_param("n_estimators", 0, "must be positive"));
        }

        self.n_features = n_features;
        let max_features = self.max_features.resolve(n_features);
        let base_seed = self.random_state;

        let trees: Vec<DecisionTree> = (0..self.n_estimators)
            .into_par_iter()
            .map(|tree_idx| {
                let seed = base_seed.wrapping_add(tree_idx as u64);
                let mut tree = DecisionTree::new()
                    .with_max_depth(self.max_depth)
                    .with_min_samples_split(self.min_samples_split)
                    .with_min_samples_leaf(self.min_samples_leaf)
                    .with_max_features(Some(max_features))
                    .with_splitter(self.splitter)
                    .with_random_state(seed);

                if self.bootstrap {
                    let mut rng = ChaCha8Rng::seed_from_u64(seed ^ 0x9E37_79B9_7F4A_7C15);
                    let sample_indices: Vec<usize> =
                        (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect();
                    let x_boot = x.select(Axis(0), &sample_indices);
                    let y_boot = y.select(Axis(0), &sample_indices);
                    tree.fit(&x_boot, &y_boot)?;
                } else {
                    tree.fit(x, y)?;
                }
                Ok(tree)
            })
            .collect::<Result<Vec<_>>>()?;

        self.trees = trees;
        self.compute_feature_importances();

        Ok(self)
    }

    fn compute_feature_importances(&mut self) {
        let mut total = vec![0.0; self.n_features];
        for tree in &self.trees {
            if let Some(imp) = tree.feature_importances() {
                for (acc, v) in total.iter_mut().zip(imp.iter()) {
                    *acc += v;
                }
            }
        }
        let sum: f64 = total.iter().sum();
        if sum > 0.0 {
            for v in &mut total {
                *v /= sum;
            }
        }
        self.feature_importances = Some(Array1::from_vec(total));
    }

    /// Mean of the tree outputs
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(CrowdBusError::ModelNotFitted);
        }

        let all_predictions: Vec<Array1<f64>> = self
            .trees
            .par_iter()
            .map(|tree| tree.predict(x))
            .collect::<Result<Vec<_>>>()?;

        let mut mean = Array1::<f64>::zeros(x.nrows());
        for p in &all_predictions {
            mean += p;
        }
        mean /= all_predictions.len() as f64;
        Ok(mean)
    }

    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_classification_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((60, 3), |(i, j)| match j {
            0 => i as f64,
            1 => ((i * 13) % 7) as f64,
            _ => ((i * 5) % 3) as f64,
        });
        let y = Array1::from_shape_fn(60, |i| if i >= 30 { 1.0 } else { 0.0 });
        (x, y)
    }

    #[test]
    fn test_forest_probabilities() {
        let (x, y) = make_classification_data();
        let mut forest = RandomForest::new(20).with_max_features(MaxFeatures::All);
        forest.fit(&x, &y).unwrap();

        let p = forest.predict(&x).unwrap();
        assert!(p.iter().all(|&v| (0.0..=1.0).contains(&v)));
        let accuracy = p
            .iter()
            .zip(y.iter())
            .filter(|(p, t)| ((**p >= 0.5) as u8 as f64 - **t).abs() < 0.5)
            .count() as f64
            / y.len() as f64;
        assert!(accuracy > 0.9, "accuracy {}", accuracy);
    }

    #[test]
    fn test_forest_deterministic_for_seed() {
        let (x, y) = make_classification_data();
        let run = || {
            let mut forest = RandomForest::new(10).with_random_state(3);
            forest.fit(&x, &y).unwrap();
            forest.predict(&x).unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_max_features_resolve() {
        assert_eq!(MaxFeatures::Sqrt.resolve(65), 8);
        assert_eq!(MaxFeatures::Log2.resolve(65), 6);
        assert_eq!(MaxFeatures::All.resolve(65), 65);
        assert_eq!(MaxFeatures::Log2.resolve(1), 1);
    }

    #[test]
    fn test_importances_normalized() {
        let (x, y) = make_classification_data();
        let mut forest = RandomForest::new(5);
        forest.fit(&x, &y).unwrap();
        let total: f64 = forest.feature_importances().unwrap().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}
