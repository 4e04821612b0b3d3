//! Hyperparameter search
//!
//! - [`ParamGrid`]: named axes of discrete values, expanded as a cartesian product
//! - [`GridSearch`]: cross-validated exhaustive search on a bounded worker pool

mod grid_search;
mod search_space;

pub use grid_search::{GridSearch, GridSearchConfig, Study, TrialResult};
pub use search_space::{ParamGrid, Parameter, ParameterValue, TrialParams};
