//! Exhaustive cross-validated grid search
//!
//! One task per (combination, fold) runs on a bounded rayon pool. Scores
//! fan back in to a mean per combination. Higher scores are better, so
//! regression objectives are passed in negated.

use super::search_space::TrialParams;
use crate::error::{CrowdBusError, Result};
use crate::training::cross_validation::{CVResults, CVStrategy, CrossValidator};
use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Grid search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSearchConfig {
    pub cv: CVStrategy,
    pub random_state: u64,
    /// Wall-clock budget for one family
    pub budget: Duration,
}

impl Default for GridSearchConfig {
    fn default() -> Self {
        Self {
            cv: CVStrategy::KFold { n_splits: 5, shuffle: false },
            random_state: crate::config::DEFAULT_SEED,
            budget: Duration::from_secs(600),
        }
    }
}

/// Cross-validated score of one combination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialResult {
    pub combo_idx: usize,
    pub params: TrialParams,
    pub cv: CVResults,
}

/// Completed combinations of one search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Study {
    pub trials: Vec<TrialResult>,
    pub total_combinations: usize,
    pub skipped_tasks: usize,
    pub failed_tasks: usize,
    pub elapsed_secs: f64,
    pub budget_exhausted: bool,
}

impl Study {
    /// Highest mean score; the earliest combination keeps ties
    pub fn best_trial(&self) -> Option<&TrialResult> {
        self.trials.iter().fold(None, |best: Option<&TrialResult>, t| match best {
            Some(b) if b.cv.mean_score >= t.cv.mean_score => Some(b),
            _ => Some(t),
        })
    }
}

enum TaskOutcome {
    Score(f64),
    Failed,
    Skipped,
}

pub struct GridSearch {
    config: GridSearchConfig,
    pool: Arc<ThreadPool>,
}

impl GridSearch {
    /// `n_workers == 0` sizes the pool to the machine
    pub fn new(config: GridSearchConfig, n_workers: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_workers)
            .thread_name(|i| format!("grid-worker-{}", i))
            .build()
            .map_err(|e| CrowdBusError::Config(format!("failed to build worker pool: {}", e)))?;
        Ok(Self {
            config,
            pool: Arc::new(pool),
        })
    }

    pub fn config(&self) -> &GridSearchConfig {
        &self.config
    }

    /// Score every combination with `evaluate(params, x_train, y_train, x_test, y_test)`.
    ///
    /// Failing tasks are logged and dropped. Tasks that have not started
    /// when the budget runs out are skipped, except those of the first
    /// combination. Fails when no combination completed a single fold.
    pub fn search<F>(
        &self,
        family: &str,
        combos: &[TrialParams],
        x: &Array2<f64>,
        y: &Array1<f64>,
        evaluate: F,
    ) -> Result<Study>
    where
        F: Fn(&TrialParams, &Array2<f64>, &Array1<f64>, &Array2<f64>, &Array1<f64>) -> Result<f64> + Sync,
    {
        if combos.is_empty() {
            return Err(CrowdBusError::EmptyGrid { family: family.to_string() });
        }

        let splits = CrossValidator::new(self.config.cv)
            .with_random_state(self.config.random_state)
            .split(x.nrows(), Some(y))?;

        let start = Instant::now();
        let deadline = start + self.config.budget;
        let tasks: Vec<(usize, usize)> = (0..combos.len())
            .flat_map(|c| (0..splits.len()).map(move |f| (c, f)))
            .collect();

        debug!(family, tasks = tasks.len(), "Dispatching grid tasks");

        let outcomes: Vec<(usize, TaskOutcome)> = self.pool.install(|| {
            tasks
                .par_iter()
                .map(|&(combo_idx, fold_idx)| {
                    if combo_idx > 0 && Instant::now() >= deadline {
                        return (combo_idx, TaskOutcome::Skipped);
                    }
                    let split = &splits[fold_idx];
                    let x_train = x.select(Axis(0), &split.train_indices);
                    let y_train = y.select(Axis(0), &split.train_indices);
                    let x_test = x.select(Axis(0), &split.test_indices);
                    let y_test = y.select(Axis(0), &split.test_indices);

                    match evaluate(&combos[combo_idx], &x_train, &y_train, &x_test, &y_test) {
                        Ok(score) if score.is_finite() => (combo_idx, TaskOutcome::Score(score)),
                        Ok(score) => {
                            warn!(family, combination = combo_idx, fold = fold_idx, score, "Non-finite fold score");
                            (combo_idx, TaskOutcome::Failed)
                        }
                        Err(e) => {
                            warn!(
                                family,
                                combination = combo_idx,
                                fold = fold_idx,
                                params = %combos[combo_idx],
                                error = %e,
                                "Grid fit failed"
                            );
                            (combo_idx, TaskOutcome::Failed)
                        }
                    }
                })
                .collect()
        });

        let mut fold_scores: Vec<Vec<f64>> = vec![Vec::new(); combos.len()];
        let mut skipped_tasks = 0;
        let mut failed_tasks = 0;
        for (combo_idx, outcome) in outcomes {
            match outcome {
                TaskOutcome::Score(s) => fold_scores[combo_idx].push(s),
                TaskOutcome::Failed => failed_tasks += 1,
                TaskOutcome::Skipped => skipped_tasks += 1,
            }
        }

        let budget_exhausted = skipped_tasks > 0;
        if budget_exhausted {
            warn!(
                family,
                skipped_tasks,
                budget_secs = self.config.budget.as_secs_f64(),
                "Search budget exhausted, remaining tasks skipped"
            );
        }

        let trials: Vec<TrialResult> = fold_scores
            .into_iter()
            .enumerate()
            .filter(|(_, scores)| !scores.is_empty())
            .map(|(combo_idx, scores)| TrialResult {
                combo_idx,
                params: combos[combo_idx].clone(),
                cv: CVResults::from_scores(scores),
            })
            .collect();

        if trials.is_empty() {
            return Err(CrowdBusError::Training(format!(
                "no combination of `{}` completed a fold ({} failed, {} skipped)",
                family, failed_tasks, skipped_tasks
            )));
        }

        Ok(Study {
            trials,
            total_combinations: combos.len(),
            skipped_tasks,
            failed_tasks,
            elapsed_secs: start.elapsed().as_secs_f64(),
            budget_exhausted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::ParamGrid;

    fn data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((20, 1), |(i, _)| i as f64);
        let y = Array1::from_shape_fn(20, |i| i as f64);
        (x, y)
    }

    fn search() -> GridSearch {
        GridSearch::new(GridSearchConfig::default(), 2).unwrap()
    }

    #[test]
    fn test_best_combination_wins() {
        let (x, y) = data();
        let combos = ParamGrid::new().axis("k", [1i64, 2, 3]).combinations();
        let study = search()
            .search("toy", &combos, &x, &y, |p, _, _, _, _| {
                let k = p.usize_or("k", 0)? as f64;
                Ok(-(k - 2.0).powi(2))
            })
            .unwrap();

        assert_eq!(study.trials.len(), 3);
        assert_eq!(study.best_trial().unwrap().combo_idx, 1);
        assert!(study.trials.iter().all(|t| t.cv.n_folds == 5));
    }

    #[test]
    fn test_ties_keep_first_combination() {
        let (x, y) = data();
        let combos = ParamGrid::new().axis("k", [1i64, 2, 3]).combinations();
        let study = search().search("toy", &combos, &x, &y, |_, _, _, _, _| Ok(1.0)).unwrap();
        assert_eq!(study.best_trial().unwrap().combo_idx, 0);
    }

    #[test]
    fn test_failed_combination_dropped() {
        let (x, y) = data();
        let combos = ParamGrid::new().axis("k", [1i64, 2]).combinations();
        let study = search()
            .search("toy", &combos, &x, &y, |p, _, _, _, _| {
                if p.usize_or("k", 0)? == 1 {
                    Err(CrowdBusError::Training("boom".to_string()))
                } else {
                    Ok(0.5)
                }
            })
            .unwrap();
        assert_eq!(study.trials.len(), 1);
        assert_eq!(study.failed_tasks, 5);
        assert_eq!(study.best_trial().unwrap().combo_idx, 1);
    }

    #[test]
    fn test_all_failed_is_error() {
        let (x, y) = data();
        let combos = ParamGrid::new().axis("k", [1i64]).combinations();
        let result = search().search("toy", &combos, &x, &y, |_, _, _, _, _| {
            Err(CrowdBusError::Training("boom".to_string()))
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_grid() {
        let (x, y) = data();
        let result = search().search("toy", &[], &x, &y, |_, _, _, _, _| Ok(0.0));
        assert!(matches!(result, Err(CrowdBusError::EmptyGrid { .. })));
    }

    #[test]
    fn test_zero_budget_still_runs_first_combination() {
        let (x, y) = data();
        let config = GridSearchConfig {
            budget: Duration::ZERO,
            ..Default::default()
        };
        let combos = ParamGrid::new().axis("k", [1i64, 2, 3]).combinations();
        let study = GridSearch::new(config, 1)
            .unwrap()
            .search("toy", &combos, &x, &y, |_, _, _, _, _| Ok(1.0))
            .unwrap();

        assert!(study.budget_exhausted);
        assert_eq!(study.trials.len(), 1);
        assert_eq!(study.trials[0].combo_idx, 0);
        assert_eq!(study.skipped_tasks, 10);
    }
}
