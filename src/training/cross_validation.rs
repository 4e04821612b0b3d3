//! Data splitting: hold-out split and k-fold cross-validation

use crate::error::{CrowdBusError, Result};
use ndarray::Array1;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cross-validation strategy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CVStrategy {
    /// Contiguous folds, optionally shuffled first
    KFold { n_splits: usize, shuffle: bool },
    /// Each fold keeps the class proportions of the 0/1 target
    StratifiedKFold { n_splits: usize, shuffle: bool },
}

impl CVStrategy {
    pub fn n_splits(&self) -> usize {
        match *self {
            CVStrategy::KFold { n_splits, .. } | CVStrategy::StratifiedKFold { n_splits, .. } => n_splits,
        }
    }
}

/// A single train/test split
#[derive(Debug, Clone)]
pub struct CVSplit {
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
    pub fold_idx: usize,
}

/// Cross-validation splitter
#[derive(Debug, Clone)]
pub struct CrossValidator {
    strategy: CVStrategy,
    random_state: u64,
}

impl CrossValidator {
    pub fn new(strategy: CVStrategy) -> Self {
        Self {
            strategy,
            random_state: crate::config::DEFAULT_SEED,
        }
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    pub fn strategy(&self) -> CVStrategy {
        self.strategy
    }

    /// Generate train/test splits for `n_samples` rows
    pub fn split(&self, n_samples: usize, y: Option<&Array1<f64>>) -> Result<Vec<CVSplit>> {
        let n_splits = self.strategy.n_splits();
        if n_splits < 2 {
            return Err(CrowdBusError::invalid_param("n_splits", n_splits, "must be at least 2"));
        }
        if n_samples < n_splits {
            return Err(CrowdBusError::Training(format!(
                "n_samples ({}) must be >= n_splits ({})",
                n_samples, n_splits
            )));
        }

        match self.strategy {
            CVStrategy::KFold { shuffle, .. } => Ok(self.k_fold_split(n_samples, n_splits, shuffle)),
            CVStrategy::StratifiedKFold { shuffle, .. } => {
                let y = y.ok_or_else(|| CrowdBusError::Training("StratifiedKFold requires a target array".to_string()))?;
                if y.len() != n_samples {
                    return Err(CrowdBusError::ShapeMismatch {
                        expected: format!("y length = {}", n_samples),
                        actual: format!("y length = {}", y.len()),
                    });
                }
                Ok(self.stratified_k_fold_split(y, n_splits, shuffle))
            }
        }
    }

    fn k_fold_split(&self, n_samples: usize, n_splits: usize, shuffle: bool) -> Vec<CVSplit> {
        let mut indices: Vec<usize> = (0..n_samples).collect();
        if shuffle {
            indices.shuffle(&mut ChaCha8Rng::seed_from_u64(self.random_state));
        }

        let base = n_samples / n_splits;
        let remainder = n_samples % n_splits;
        let mut folds = Vec::with_capacity(n_splits);
        let mut current = 0;
        for i in 0..n_splits {
            let size = if i < remainder { base + 1 } else { base };
            folds.push(indices[current..current + size].to_vec());
            current += size;
        }
        assemble(folds)
    }

    fn stratified_k_fold_split(&self, y: &Array1<f64>, n_splits: usize, shuffle: bool) -> Vec<CVSplit> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.random_state);
        let mut folds: Vec<Vec<usize>> = vec![Vec::new(); n_splits];

        // Deal each class round-robin; the offset keeps fold sizes balanced
        let mut offset = 0;
        for mut members in class_members(y).into_values() {
            if shuffle {
                members.shuffle(&mut rng);
            }
            for (i, idx) in members.iter().enumerate() {
                folds[(offset + i) % n_splits].push(*idx);
            }
            offset += members.len();
        }
        for fold in &mut folds {
            fold.sort_unstable();
        }
        assemble(folds)
    }
}

fn assemble(folds: Vec<Vec<usize>>) -> Vec<CVSplit> {
    (0..folds.len())
        .map(|fold_idx| CVSplit {
            test_indices: folds[fold_idx].clone(),
            train_indices: folds
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != fold_idx)
                .flat_map(|(_, f)| f.iter().copied())
                .collect(),
            fold_idx,
        })
        .collect()
}

/// Row indices per class, classes in ascending order
fn class_members(y: &Array1<f64>) -> BTreeMap<i64, Vec<usize>> {
    let mut classes: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (idx, &v) in y.iter().enumerate() {
        classes.entry(v.round() as i64).or_default().push(idx);
    }
    classes
}

/// Hold-out split into `(train, validation)` row indices.
///
/// With `stratify_by`, each class contributes `round(fraction * class_size)`
/// rows to validation. Otherwise `ceil(fraction * n)` shuffled rows go to
/// validation. Both sides are sorted.
pub fn train_validation_split(
    n_samples: usize,
    stratify_by: Option<&Array1<f64>>,
    validation_fraction: f64,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(validation_fraction > 0.0 && validation_fraction < 1.0) {
        return Err(CrowdBusError::invalid_param(
            "validation_split",
            validation_fraction,
            "must be in (0, 1)",
        ));
    }
    if n_samples < 2 {
        return Err(CrowdBusError::Training(format!(
            "need at least 2 rows to hold out a validation split, got {}",
            n_samples
        )));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(n_samples);
    let mut validation = Vec::new();

    match stratify_by {
        Some(labels) => {
            if labels.len() != n_samples {
                return Err(CrowdBusError::ShapeMismatch {
                    expected: format!("{} labels", n_samples),
                    actual: format!("{} labels", labels.len()),
                });
            }
            for mut members in class_members(labels).into_values() {
                members.shuffle(&mut rng);
                let take = (members.len() as f64 * validation_fraction).round() as usize;
                validation.extend_from_slice(&members[..take]);
                train.extend_from_slice(&members[take..]);
            }
            // Tiny classes can round everything into one side
            if validation.is_empty() {
                if let Some(moved) = train.pop() {
                    validation.push(moved);
                }
            } else if train.is_empty() {
                if let Some(moved) = validation.pop() {
                    train.push(moved);
                }
            }
        }
        None => {
            let mut indices: Vec<usize> = (0..n_samples).collect();
            indices.shuffle(&mut rng);
            let take = ((n_samples as f64 * validation_fraction).ceil() as usize).clamp(1, n_samples - 1);
            validation.extend_from_slice(&indices[..take]);
            train.extend_from_slice(&indices[take..]);
        }
    }

    train.sort_unstable();
    validation.sort_unstable();
    Ok((train, validation))
}

/// Cross-validation results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CVResults {
    /// Scores for each completed fold
    pub scores: Vec<f64>,
    pub mean_score: f64,
    pub std_score: f64,
    pub n_folds: usize,
}

impl CVResults {
    pub fn from_scores(scores: Vec<f64>) -> Self {
        let n_folds = scores.len();
        let mean_score = if n_folds == 0 {
            f64::NAN
        } else {
            scores.iter().sum::<f64>() / n_folds as f64
        };
        let variance = if n_folds == 0 {
            0.0
        } else {
            scores.iter().map(|s| (s - mean_score).powi(2)).sum::<f64>() / n_folds as f64
        };

        Self {
            scores,
            mean_score,
            std_score: variance.sqrt(),
            n_folds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_k_fold() {
        let cv = CrossValidator::new(CVStrategy::KFold { n_splits: 5, shuffle: false });
        let splits = cv.split(100, None).unwrap();
        assert_eq!(splits.len(), 5);

        for split in &splits {
            assert_eq!(split.test_indices.len(), 20);
            assert_eq!(split.train_indices.len(), 80);
        }

        let mut all_test: Vec<usize> = splits.iter().flat_map(|s| s.test_indices.clone()).collect();
        all_test.sort();
        assert_eq!(all_test, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_stratified_k_fold_keeps_ratio() {
        let y = Array1::from_shape_fn(50, |i| if i % 5 == 0 { 1.0 } else { 0.0 });
        let cv = CrossValidator::new(CVStrategy::StratifiedKFold { n_splits: 5, shuffle: true }).with_random_state(7);
        let splits = cv.split(50, Some(&y)).unwrap();

        for split in &splits {
            let positives = split.test_indices.iter().filter(|&&i| y[i] == 1.0).count();
            assert_eq!(positives, 2);
            assert_eq!(split.test_indices.len(), 10);
        }
    }

    #[test]
    fn test_too_few_samples() {
        let cv = CrossValidator::new(CVStrategy::KFold { n_splits: 5, shuffle: false });
        assert!(cv.split(3, None).is_err());
    }

    #[test]
    fn test_train_validation_split_shuffled() {
        let (train, val) = train_validation_split(100, None, 0.2, 42).unwrap();
        assert_eq!(val.len(), 20);
        assert_eq!(train.len(), 80);

        let again = train_validation_split(100, None, 0.2, 42).unwrap();
        assert_eq!((train.clone(), val.clone()), again);

        let mut all: Vec<usize> = train.into_iter().chain(val).collect();
        all.sort();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_train_validation_split_stratified() {
        let y = Array1::from_shape_fn(100, |i| if i < 30 { 1.0 } else { 0.0 });
        let (train, val) = train_validation_split(100, Some(&y), 0.2, 42).unwrap();
        assert_eq!(val.len(), 20);
        assert_eq!(val.iter().filter(|&&i| y[i] == 1.0).count(), 6);
        assert_eq!(train.len(), 80);
    }
}
