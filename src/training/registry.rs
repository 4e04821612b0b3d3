//! Model family catalogs and best-model selection
//!
//! A [`ModelFamily`] is a named pipeline builder plus its hyperparameter
//! grid. [`ModelRegistry::search`] grid-searches every family in catalog
//! order, refits each family's best combination on the training split,
//! scores it on the validation split and keeps the strictly best one.

use super::extra_trees::ExtraTrees;
use super::gradient_boosting::{GradientBoostingClassifier, GradientBoostingConfig, GradientBoostingRegressor};
use super::lightgbm::{LightGBMConfig, LightGBMRegressor};
use super::linear_models::LogisticRegression;
use super::metrics::{ClassificationMetrics, RegressionMetrics, ValidationMetrics};
use super::pipeline::{Estimator, Pipeline};
use super::random_forest::{MaxFeatures, RandomForest};
use super::svm::{Gamma, SVMClassifier, SVMConfig};
use super::xgboost::{XGBoostConfig, XGBoostRegressor};
use crate::error::{CrowdBusError, Result};
use crate::optimizer::{GridSearch, ParamGrid, ParameterValue, TrialParams};
use crate::schema::Task;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use tracing::{info, warn};

/// Builds an unfitted pipeline from one grid point and a seed
pub type PipelineBuilder = fn(&TrialParams, u64) -> Result<Pipeline>;

/// A named estimator family with its search grid
#[derive(Clone)]
pub struct ModelFamily {
    pub name: String,
    pub task: Task,
    pub grid: ParamGrid,
    builder: PipelineBuilder,
}

impl fmt::Debug for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelFamily")
            .field("name", &self.name)
            .field("task", &self.task)
            .field("combinations", &self.grid.len())
            .finish()
    }
}

impl ModelFamily {
    pub fn new(name: impl Into<String>, task: Task, grid: ParamGrid, builder: PipelineBuilder) -> Self {
        Self {
            name: name.into(),
            task,
            grid,
            builder,
        }
    }

    pub fn build(&self, params: &TrialParams, seed: u64) -> Result<Pipeline> {
        (self.builder)(params, seed)
    }
}

fn max_features(params: &TrialParams, default: MaxFeatures) -> Result<MaxFeatures> {
    match params.get("max_features") {
        None => Ok(default),
        Some(ParameterValue::None) => Ok(MaxFeatures::All),
        Some(ParameterValue::Float(f)) if *f > 0.0 && *f <= 1.0 => Ok(MaxFeatures::Fraction(*f)),
        Some(v) => v
            .as_string()
            .and_then(MaxFeatures::parse)
            .ok_or_else(|| CrowdBusError::invalid_param("max_features", v, "expected sqrt, log2, all or a fraction")),
    }
}

fn build_logistic(params: &TrialParams, _seed: u64) -> Result<Pipeline> {
    let model = LogisticRegression::new()
        .with_c(params.f64_or("C", 1.0)?)
        .with_max_iter(params.usize_or("max_iter", 100)?);
    Ok(Pipeline::new(Task::Arrival, Estimator::LogisticRegression(model)).with_scaler())
}

fn forest(params: &TrialParams, seed: u64, default_features: MaxFeatures) -> Result<RandomForest> {
    Ok(RandomForest::new(params.usize_or("n_estimators", 100)?)
        .with_max_depth(params.opt_usize_or("max_depth", None)?)
        .with_min_samples_split(params.usize_or("min_samples_split", 2)?)
        .with_min_samples_leaf(params.usize_or("min_samples_leaf", 1)?)
        .with_max_features(max_features(params, default_features)?)
        .with_random_state(seed))
}

fn build_forest_classifier(params: &TrialParams, seed: u64) -> Result<Pipeline> {
    Ok(Pipeline::new(Task::Arrival, Estimator::RandomForest(forest(params, seed, MaxFeatures::Sqrt)?)))
}

fn build_forest_regressor(params: &TrialParams, seed: u64) -> Result<Pipeline> {
    // Regression forests consider every feature unless told otherwise
    Ok(Pipeline::new(Task::Eta, Estimator::RandomForest(forest(params, seed, MaxFeatures::All)?)))
}

fn boosting_config(params: &TrialParams, seed: u64) -> Result<GradientBoostingConfig> {
    Ok(GradientBoostingConfig {
        n_estimators: params.usize_or("n_estimators", 100)?,
        learning_rate: params.f64_or("learning_rate", 0.1)?,
        max_depth: params.usize_or("max_depth", 3)?,
        min_samples_split: params.usize_or("min_samples_split", 2)?,
        min_samples_leaf: params.usize_or("min_samples_leaf", 1)?,
        subsample: params.f64_or("subsample", 1.0)?,
        random_state: seed,
    })
}

fn build_boosting_classifier(params: &TrialParams, seed: u64) -> Result<Pipeline> {
    let model = GradientBoostingClassifier::new(boosting_config(params, seed)?);
    Ok(Pipeline::new(Task::Arrival, Estimator::GradientBoostingClassifier(model)))
}

fn build_boosting_regressor(params: &TrialParams, seed: u64) -> Result<Pipeline> {
    let model = GradientBoostingRegressor::new(boosting_config(params, seed)?);
    Ok(Pipeline::new(Task::Eta, Estimator::GradientBoostingRegressor(model)))
}

fn build_svm(params: &TrialParams, seed: u64) -> Result<Pipeline> {
    let kernel = params.str_or("kernel", "rbf")?;
    if kernel != "rbf" {
        return Err(CrowdBusError::invalid_param("kernel", kernel, "only rbf is supported"));
    }
    let gamma = match params.get("gamma") {
        None => Gamma::Scale,
        Some(ParameterValue::String(s)) if s == "scale" => Gamma::Scale,
        Some(v) => Gamma::Value(
            v.as_float()
                .ok_or_else(|| CrowdBusError::invalid_param("gamma", v, "expected `scale` or a number"))?,
        ),
    };
    let model = SVMClassifier::new(SVMConfig {
        c: params.f64_or("C", 1.0)?,
        gamma,
        random_state: seed,
        ..Default::default()
    });
    Ok(Pipeline::new(Task::Arrival, Estimator::Svm(model)).with_scaler())
}

fn build_lightgbm(params: &TrialParams, seed: u64) -> Result<Pipeline> {
    let model = LightGBMRegressor::new(LightGBMConfig {
        n_estimators: params.usize_or("n_estimators", 100)?,
        learning_rate: params.f64_or("learning_rate", 0.1)?,
        max_depth: params.opt_usize_or("max_depth", None)?,
        num_leaves: params.usize_or("num_leaves", 31)?,
        min_child_samples: params.usize_or("min_child_samples", 20)?,
        random_state: seed,
        ..Default::default()
    });
    Ok(Pipeline::new(Task::Eta, Estimator::LightGBM(model)))
}

fn build_xgboost(params: &TrialParams, seed: u64) -> Result<Pipeline> {
    let model = XGBoostRegressor::new(XGBoostConfig {
        n_estimators: params.usize_or("n_estimators", 100)?,
        learning_rate: params.f64_or("learning_rate", 0.3)?,
        max_depth: params.usize_or("max_depth", 6)?,
        min_child_weight: params.f64_or("min_child_weight", 1.0)?,
        subsample: params.f64_or("subsample", 1.0)?,
        random_state: seed,
        ..Default::default()
    });
    Ok(Pipeline::new(Task::Eta, Estimator::XGBoost(model)))
}

fn build_extra_trees(params: &TrialParams, seed: u64) -> Result<Pipeline> {
    let model = ExtraTrees::new(params.usize_or("n_estimators", 100)?)
        .with_max_depth(params.opt_usize_or("max_depth", None)?)
        .with_min_samples_split(params.usize_or("min_samples_split", 2)?)
        .with_min_samples_leaf(params.usize_or("min_samples_leaf", 1)?)
        .with_random_state(seed);
    Ok(Pipeline::new(Task::Eta, Estimator::ExtraTrees(model)))
}

/// Arrival families in selection order
pub fn arrival_catalog() -> Vec<ModelFamily> {
    vec![
        ModelFamily::new(
            "logistic_regression",
            Task::Arrival,
            ParamGrid::new().axis("C", [0.1, 1.0, 10.0]).axis("max_iter", [200i64]),
            build_logistic,
        ),
        ModelFamily::new(
            "random_forest",
            Task::Arrival,
            ParamGrid::new()
                .axis("n_estimators", [100i64, 200])
                .axis("max_depth", [None, Some(10i64), Some(20)])
                .axis("min_samples_split", [2i64, 5]),
            build_forest_classifier,
        ),
        ModelFamily::new(
            "gradient_boosting",
            Task::Arrival,
            ParamGrid::new()
                .axis("n_estimators", [100i64, 200])
                .axis("learning_rate", [0.05, 0.1])
                .axis("max_depth", [3i64, 5]),
            build_boosting_classifier,
        ),
        ModelFamily::new(
            "svm",
            Task::Arrival,
            ParamGrid::new().axis("C", [0.5, 1.0, 5.0]).axis("kernel", ["rbf"]),
            build_svm,
        ),
    ]
}

/// ETA families in selection order
pub fn eta_catalog() -> Vec<ModelFamily> {
    vec![
        ModelFamily::new(
            "lightgbm",
            Task::Eta,
            ParamGrid::new()
                .axis("n_estimators", [100i64, 200, 300])
                .axis("learning_rate", [0.01, 0.05, 0.1])
                .axis("max_depth", [5i64, 7, 10])
                .axis("num_leaves", [31i64, 50, 70])
                .axis("min_child_samples", [20i64, 30, 50]),
            build_lightgbm,
        ),
        ModelFamily::new(
            "xgboost",
            Task::Eta,
            ParamGrid::new()
                .axis("n_estimators", [100i64, 200, 300])
                .axis("learning_rate", [0.01, 0.05, 0.1])
                .axis("max_depth", [4i64, 6, 8])
                .axis("min_child_weight", [1.0, 3.0, 5.0])
                .axis("subsample", [0.8, 0.9, 1.0]),
            build_xgboost,
        ),
        ModelFamily::new(
            "random_forest",
            Task::Eta,
            ParamGrid::new()
                .axis("n_estimators", [100i64, 200, 300])
                .axis("max_depth", [Some(10i64), Some(15), Some(20), None])
                .axis("min_samples_split", [2i64, 5, 10])
                .axis("min_samples_leaf", [1i64, 2, 4])
                .axis("max_features", ["sqrt", "log2"]),
            build_forest_regressor,
        ),
        ModelFamily::new(
            "gradient_boosting",
            Task::Eta,
            ParamGrid::new()
                .axis("n_estimators", [100i64, 200, 300])
                .axis("learning_rate", [0.05, 0.1, 0.15])
                .axis("max_depth", [3i64, 5, 7])
                .axis("min_samples_split", [2i64, 5, 10])
                .axis("subsample", [0.8, 0.9, 1.0]),
            build_boosting_regressor,
        ),
        ModelFamily::new(
            "extra_trees",
            Task::Eta,
            ParamGrid::new()
                .axis("n_estimators", [100i64, 200])
                .axis("max_depth", [10i64, 15, 20])
                .axis("min_samples_split", [2i64, 5])
                .axis("min_samples_leaf", [1i64, 2]),
            build_extra_trees,
        ),
    ]
}

/// Same families and order as the full catalogs, with small grids for
/// smoke runs and tests
pub fn quick_catalog(task: Task) -> Vec<ModelFamily> {
    match task {
        Task::Arrival => vec![
            ModelFamily::new(
                "logistic_regression",
                Task::Arrival,
                ParamGrid::new().axis("C", [1.0]).axis("max_iter", [200i64]),
                build_logistic,
            ),
            ModelFamily::new(
                "random_forest",
                Task::Arrival,
                ParamGrid::new().axis("n_estimators", [20i64]).axis("max_depth", [Some(6i64)]),
                build_forest_classifier,
            ),
            ModelFamily::new(
                "gradient_boosting",
                Task::Arrival,
                ParamGrid::new().axis("n_estimators", [30i64]).axis("max_depth", [3i64]),
                build_boosting_classifier,
            ),
            ModelFamily::new("svm", Task::Arrival, ParamGrid::new().axis("C", [1.0]), build_svm),
        ],
        Task::Eta => vec![
            ModelFamily::new(
                "lightgbm",
                Task::Eta,
                ParamGrid::new()
                    .axis("n_estimators", [30i64])
                    .axis("num_leaves", [15i64])
                    .axis("min_child_samples", [5i64]),
                build_lightgbm,
            ),
            ModelFamily::new(
                "xgboost",
                Task::Eta,
                ParamGrid::new().axis("n_estimators", [30i64]).axis("max_depth", [4i64]),
                build_xgboost,
            ),
            ModelFamily::new(
                "random_forest",
                Task::Eta,
                ParamGrid::new().axis("n_estimators", [20i64]).axis("max_depth", [Some(10i64)]),
                build_forest_regressor,
            ),
            ModelFamily::new(
                "gradient_boosting",
                Task::Eta,
                ParamGrid::new().axis("n_estimators", [30i64]),
                build_boosting_regressor,
            ),
            ModelFamily::new(
                "extra_trees",
                Task::Eta,
                ParamGrid::new().axis("n_estimators", [20i64]).axis("max_depth", [10i64]),
                build_extra_trees,
            ),
        ],
    }
}

pub fn catalog_for(task: Task, quick: bool) -> Vec<ModelFamily> {
    match (task, quick) {
        (_, true) => quick_catalog(task),
        (Task::Arrival, false) => arrival_catalog(),
        (Task::Eta, false) => eta_catalog(),
    }
}

/// Outcome of one family's search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyReport {
    pub name: String,
    pub best_params: TrialParams,
    /// Mean CV score of the best combination (accuracy, or negative MSE)
    pub cv_score: f64,
    pub validation_metrics: ValidationMetrics,
    pub elapsed_secs: f64,
    pub completed_combinations: usize,
    pub total_combinations: usize,
}

/// The selected pipeline and how every family fared
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub pipeline: Pipeline,
    pub family: String,
    pub metrics: ValidationMetrics,
    pub leaderboard: Vec<FamilyReport>,
}

/// Fold score: accuracy for classification, negative MSE for regression
pub fn cv_score(task: Task, y_true: &Array1<f64>, predictions: &Array1<f64>) -> f64 {
    let n = y_true.len().max(1) as f64;
    if task.is_classification() {
        y_true
            .iter()
            .zip(predictions.iter())
            .filter(|(t, p)| (*t - *p).abs() < 0.5)
            .count() as f64
            / n
    } else {
        -y_true.iter().zip(predictions.iter()).map(|(t, p)| (t - p).powi(2)).sum::<f64>() / n
    }
}

/// Held-out metrics of a fitted pipeline
pub fn evaluate(pipeline: &Pipeline, x: &Array2<f64>, y: &Array1<f64>) -> Result<ValidationMetrics> {
    let predictions = pipeline.predict(x)?;
    if pipeline.task().is_classification() {
        let probs = pipeline.predict_proba(x)?;
        Ok(ValidationMetrics::Classification(ClassificationMetrics::compute(
            y,
            &predictions,
            Some(&probs),
        )))
    } else {
        Ok(ValidationMetrics::Regression(RegressionMetrics::compute(y, &predictions)))
    }
}

/// Index of the winning report. Only a strict improvement replaces the
/// current best, so the earliest family keeps a tie.
pub fn select_best(reports: &[FamilyReport]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (idx, report) in reports.iter().enumerate() {
        match best {
            Some(b) if !report.validation_metrics.improves_on(&reports[b].validation_metrics) => {}
            _ => best = Some(idx),
        }
    }
    best
}

/// Fixed-width leaderboard, one line per family, winner marked with `*`
pub fn render_leaderboard(reports: &[FamilyReport], winner: Option<&str>) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "  {:<22} {:>10} {:>8} {:>9}  {}\n",
        "family", "cv_score", "combos", "time(s)", "validation"
    ));
    for r in reports {
        let marker = if Some(r.name.as_str()) == winner { '*' } else { ' ' };
        out.push_str(&format!(
            "{} {:<22} {:>10.4} {:>4}/{:<3} {:>9.2}  {}\n",
            marker,
            r.name,
            r.cv_score,
            r.completed_combinations,
            r.total_combinations,
            r.elapsed_secs,
            r.validation_metrics
        ));
    }
    out
}

/// Runs a catalog against one train/validation split
pub struct ModelRegistry {
    families: Vec<ModelFamily>,
    search: GridSearch,
    seed: u64,
}

impl ModelRegistry {
    pub fn new(families: Vec<ModelFamily>, search: GridSearch, seed: u64) -> Self {
        Self { families, search, seed }
    }

    pub fn families(&self) -> &[ModelFamily] {
        &self.families
    }

    /// Valid grid points of a family. A grid without a single buildable
    /// combination is fatal.
    fn combinations(&self, family: &ModelFamily) -> Result<Vec<TrialParams>> {
        let combos: Vec<TrialParams> = family
            .grid
            .combinations()
            .into_iter()
            .filter(|params| match family.build(params, self.seed) {
                Ok(_) => true,
                Err(e) => {
                    warn!(family = %family.name, params = %params, error = %e, "Dropping invalid combination");
                    false
                }
            })
            .collect();
        if combos.is_empty() {
            return Err(CrowdBusError::EmptyGrid { family: family.name.clone() });
        }
        Ok(combos)
    }

    fn run_family(
        &self,
        family: &ModelFamily,
        combos: &[TrialParams],
        x_train: &Array2<f64>,
        y_train: &Array1<f64>,
        x_val: &Array2<f64>,
        y_val: &Array1<f64>,
    ) -> Result<(FamilyReport, Pipeline)> {
        let start = Instant::now();
        let seed = self.seed;
        let study = self.search.search(&family.name, combos, x_train, y_train, |params, xt, yt, xv, yv| {
            let mut pipeline = family.build(params, seed)?;
            pipeline.fit(xt, yt)?;
            Ok(cv_score(family.task, yv, &pipeline.predict(xv)?))
        })?;

        let best = study
            .best_trial()
            .ok_or_else(|| CrowdBusError::Training(format!("`{}` produced no trial", family.name)))?;

        let mut pipeline = family.build(&best.params, seed)?;
        pipeline.fit(x_train, y_train)?;
        let validation_metrics = evaluate(&pipeline, x_val, y_val)?;

        let report = FamilyReport {
            name: family.name.clone(),
            best_params: best.params.clone(),
            cv_score: best.cv.mean_score,
            validation_metrics,
            elapsed_secs: start.elapsed().as_secs_f64(),
            completed_combinations: study.trials.len(),
            total_combinations: study.total_combinations,
        };
        Ok((report, pipeline))
    }

    /// Search every family and return the best fitted pipeline.
    ///
    /// A family that fails entirely is skipped with a warning; an empty grid
    /// aborts the whole search.
    pub fn search(
        &self,
        x_train: &Array2<f64>,
        y_train: &Array1<f64>,
        x_val: &Array2<f64>,
        y_val: &Array1<f64>,
    ) -> Result<SearchOutcome> {
        let mut reports: Vec<FamilyReport> = Vec::with_capacity(self.families.len());
        let mut pipelines: Vec<Pipeline> = Vec::with_capacity(self.families.len());

        for family in &self.families {
            let combos = self.combinations(family)?;
            info!(family = %family.name, combos = combos.len(), "Searching model family");

            match self.run_family(family, &combos, x_train, y_train, x_val, y_val) {
                Ok((report, pipeline)) => {
                    info!(
                        family = %report.name,
                        cv_score = report.cv_score,
                        params = %report.best_params,
                        validation = %report.validation_metrics,
                        elapsed_secs = report.elapsed_secs,
                        "Family finished"
                    );
                    reports.push(report);
                    pipelines.push(pipeline);
                }
                Err(e) => warn!(family = %family.name, error = %e, "Skipping failed model family"),
            }
        }

        let winner = select_best(&reports)
            .ok_or_else(|| CrowdBusError::Training("every model family failed".to_string()))?;
        let family = reports[winner].name.clone();
        let metrics = reports[winner].validation_metrics.clone();
        info!(family = %family, headline = metrics.headline(), "Selected best model");

        let pipeline = pipelines.swap_remove(winner);
        Ok(SearchOutcome {
            pipeline,
            family,
            metrics,
            leaderboard: reports,
        })
    }
}
