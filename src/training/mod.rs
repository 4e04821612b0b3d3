//! Model training module
//!
//! Native estimators, the pipelines that wrap them, the per-task model
//! family catalogs and the [`Trainer`] that turns a dataset into a
//! persisted artifact pair:
//! - Logistic regression and RBF SVM (scaled)
//! - Decision trees, Random Forests, Extra Trees
//! - Gradient boosting, XGBoost-style and LightGBM-style boosting

mod engine;
pub mod cross_validation;
pub mod decision_tree;
pub mod extra_trees;
pub mod gradient_boosting;
pub mod lightgbm;
pub mod linear_models;
pub mod metrics;
pub mod pipeline;
pub mod random_forest;
pub mod registry;
pub mod svm;
pub mod xgboost;

pub use cross_validation::{train_validation_split, CVResults, CVSplit, CVStrategy, CrossValidator};
pub use decision_tree::{DecisionTree, Splitter, TreeNode};
pub use engine::{Trainer, TrainingReport};
pub use extra_trees::ExtraTrees;
pub use gradient_boosting::{GradientBoostingClassifier, GradientBoostingConfig, GradientBoostingRegressor};
pub use lightgbm::{LightGBMConfig, LightGBMRegressor};
pub use linear_models::LogisticRegression;
pub use metrics::{ClassScores, ClassificationMetrics, ConfusionCounts, RegressionMetrics, ValidationMetrics};
pub use pipeline::{Estimator, Pipeline};
pub use random_forest::{MaxFeatures, RandomForest};
pub use registry::{
    arrival_catalog, catalog_for, eta_catalog, quick_catalog, render_leaderboard, select_best, FamilyReport,
    ModelFamily, ModelRegistry, PipelineBuilder, SearchOutcome,
};
pub use svm::{Gamma, SVMClassifier, SVMConfig};
pub use xgboost::{XGBoostConfig, XGBoostRegressor};
