//! Fitted preprocessing + estimator pipelines

use super::extra_trees::ExtraTrees;
use super::gradient_boosting::{GradientBoostingClassifier, GradientBoostingRegressor};
use super::lightgbm::LightGBMRegressor;
use super::linear_models::LogisticRegression;
use super::random_forest::RandomForest;
use super::svm::SVMClassifier;
use super::xgboost::XGBoostRegressor;
use crate::error::{CrowdBusError, Result};
use crate::preprocessing::StandardScaler;
use crate::schema::Task;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Any estimator a model family can produce
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Estimator {
    LogisticRegression(LogisticRegression),
    RandomForest(RandomForest),
    ExtraTrees(ExtraTrees),
    GradientBoostingClassifier(GradientBoostingClassifier),
    GradientBoostingRegressor(GradientBoostingRegressor),
    XGBoost(XGBoostRegressor),
    LightGBM(LightGBMRegressor),
    Svm(SVMClassifier),
}

impl Estimator {
    pub fn kind(&self) -> &'static str {
        match self {
            Estimator::LogisticRegression(_) => "logistic_regression",
            Estimator::RandomForest(_) => "random_forest",
            Estimator::ExtraTrees(_) => "extra_trees",
            Estimator::GradientBoostingClassifier(_) => "gradient_boosting_classifier",
            Estimator::GradientBoostingRegressor(_) => "gradient_boosting_regressor",
            Estimator::XGBoost(_) => "xgboost",
            Estimator::LightGBM(_) => "lightgbm",
            Estimator::Svm(_) => "svm",
        }
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        match self {
            Estimator::LogisticRegression(m) => m.fit(x, y),
            Estimator::RandomForest(m) => m.fit(x, y).map(|_| ()),
            Estimator::ExtraTrees(m) => m.fit(x, y).map(|_| ()),
            Estimator::GradientBoostingClassifier(m) => m.fit(x, y),
            Estimator::GradientBoostingRegressor(m) => m.fit(x, y),
            Estimator::XGBoost(m) => m.fit(x, y),
            Estimator::LightGBM(m) => m.fit(x, y),
            Estimator::Svm(m) => m.fit(x, y),
        }
    }

    /// Raw model output: class-1 probability for classifiers, the
    /// prediction for regressors. Forests average their trees either way.
    fn output(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        match self {
            Estimator::LogisticRegression(m) => m.predict_proba(x),
            Estimator::RandomForest(m) => m.predict(x),
            Estimator::ExtraTrees(m) => m.predict(x),
            Estimator::GradientBoostingClassifier(m) => m.predict_proba(x),
            Estimator::GradientBoostingRegressor(m) => m.predict(x),
            Estimator::XGBoost(m) => m.predict(x),
            Estimator::LightGBM(m) => m.predict(x),
            Estimator::Svm(m) => m.predict_proba(x),
        }
    }

    /// Hard class labels for classifiers with their own decision rule
    fn labels(&self, x: &Array2<f64>) -> Option<Result<Array1<f64>>> {
        match self {
            Estimator::Svm(m) => Some(m.predict(x)),
            _ => None,
        }
    }
}

/// Optional scaler followed by an estimator, fitted and used as one unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    task: Task,
    scaler: Option<StandardScaler>,
    estimator: Estimator,
    n_features: Option<usize>,
}

impl Pipeline {
    pub fn new(task: Task, estimator: Estimator) -> Self {
        Self {
            task,
            scaler: None,
            estimator,
            n_features: None,
        }
    }

    /// Wrap an estimator that was fitted outside a pipeline on
    /// `n_features` columns
    pub fn from_fitted(task: Task, estimator: Estimator, n_features: usize) -> Self {
        Self {
            task,
            scaler: None,
            estimator,
            n_features: Some(n_features),
        }
    }

    pub fn with_scaler(mut self) -> Self {
        self.scaler = Some(StandardScaler::new());
        self
    }

    pub fn task(&self) -> Task {
        self.task
    }

    pub fn estimator(&self) -> &Estimator {
        &self.estimator
    }

    pub fn is_scaled(&self) -> bool {
        self.scaler.is_some()
    }

    /// Width of the training matrix
    pub fn n_features(&self) -> Option<usize> {
        self.n_features
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(CrowdBusError::ShapeMismatch {
                expected: format!("y length = {}", x.nrows()),
                actual: format!("y length = {}", y.len()),
            });
        }
        match self.scaler.as_mut() {
            Some(scaler) => {
                let scaled = scaler.fit_transform(x)?;
                self.estimator.fit(&scaled, y)?;
            }
            None => self.estimator.fit(x, y)?,
        }
        self.n_features = Some(x.ncols());
        Ok(())
    }

    fn check_width(&self, x: &Array2<f64>) -> Result<()> {
        let expected = self.n_features.ok_or(CrowdBusError::ModelNotFitted)?;
        if x.ncols() != expected {
            return Err(CrowdBusError::ShapeMismatch {
                expected: format!("{} features", expected),
                actual: format!("{} features", x.ncols()),
            });
        }
        Ok(())
    }

    fn with_input<T>(&self, x: &Array2<f64>, f: impl FnOnce(&Array2<f64>) -> Result<T>) -> Result<T> {
        self.check_width(x)?;
        match &self.scaler {
            Some(scaler) => f(&scaler.transform(x)?),
            None => f(x),
        }
    }

    /// Probability for classification, seconds for regression
    pub fn output(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.with_input(x, |x| self.estimator.output(x))
    }

    /// Class-1 probability. Only defined for classification pipelines.
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if !self.task.is_classification() {
            return Err(CrowdBusError::Inference(format!(
                "{} pipeline has no class probabilities",
                self.estimator.kind()
            )));
        }
        self.output(x)
    }

    /// 0/1 labels for classification, values for regression
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.with_input(x, |x| {
            if !self.task.is_classification() {
                return self.estimator.output(x);
            }
            match self.estimator.labels(x) {
                Some(labels) => labels,
                None => Ok(self.estimator.output(x)?.mapv(|p| if p >= 0.5 { 1.0 } else { 0.0 })),
            }
        })
    }
}
