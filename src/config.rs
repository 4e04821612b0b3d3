//! Pipeline configuration and policy constants
//!
//! Two policy values are deliberately kept apart and overridable:
//!
//! - [`CONFIRM_THRESHOLD`] is the current arrival confirmation cut-off. Earlier
//!   deployments confirmed at [`LEGACY_CONFIRM_THRESHOLD`]; which one the product
//!   should settle on is still open.
//! - [`SANITIZE_FILL`] is the blanket value the vectorizer writes for missing,
//!   NaN or infinite features. It does not match the per-field schema defaults
//!   (0.5 for reliability scores, 20 for temperature, ...) and is not meant to.

use crate::error::{CrowdBusError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Probability at or above which an arrival is confirmed
pub const CONFIRM_THRESHOLD: f64 = 0.6;

/// Confirmation threshold used by earlier service versions
pub const LEGACY_CONFIRM_THRESHOLD: f64 = 0.8;

/// Value substituted for absent, null, NaN and infinite features
pub const SANITIZE_FILL: f64 = 0.0;

/// Upper bound for ETA output in seconds (5 days)
pub const ETA_MAX_SECONDS: f64 = 432_000.0;

/// Valid output range for probability-like predictions
pub const PROBABILITY_RANGE: (f64, f64) = (0.0, 1.0);

/// `confirm_prob` at or above this value is the positive class during training
pub const ARRIVAL_LABEL_THRESHOLD: f64 = 0.5;

/// Seed for the train/validation split and CV shuffling
pub const DEFAULT_SEED: u64 = 42;

/// Configuration for training and serving
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding the paired model artifacts
    pub artifact_dir: PathBuf,

    /// Random seed
    pub seed: u64,

    /// Fraction of valid rows held out for validation
    pub validation_split: f64,

    /// Number of cross-validation folds
    pub cv_folds: usize,

    /// Wall-clock budget for one family's grid search, in seconds
    pub family_budget_secs: u64,

    /// Grid search workers (0 = one per core)
    pub n_workers: usize,

    /// Arrival confirmation threshold
    pub confirm_threshold: f64,

    /// Vectorizer fill value
    pub sanitize_fill: f64,

    /// Label threshold applied to `confirm_prob`
    pub arrival_label_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from("models"),
            seed: DEFAULT_SEED,
            validation_split: 0.2,
            cv_folds: 5,
            family_budget_secs: 600,
            n_workers: 0,
            confirm_threshold: CONFIRM_THRESHOLD,
            sanitize_fill: SANITIZE_FILL,
            arrival_label_threshold: ARRIVAL_LABEL_THRESHOLD,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON config file; missing keys take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CrowdBusError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| CrowdBusError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CROWDBUS_*` environment overrides
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(dir) = std::env::var("CROWDBUS_ARTIFACT_DIR") {
            self.artifact_dir = PathBuf::from(dir);
        }
        if let Some(seed) = env_parse::<u64>("CROWDBUS_SEED")? {
            self.seed = seed;
        }
        if let Some(threshold) = env_parse::<f64>("CROWDBUS_CONFIRM_THRESHOLD")? {
            self.confirm_threshold = threshold;
        }
        if let Some(secs) = env_parse::<u64>("CROWDBUS_FAMILY_BUDGET_SECS")? {
            self.family_budget_secs = secs;
        }
        if let Some(workers) = env_parse::<usize>("CROWDBUS_WORKERS")? {
            self.n_workers = workers;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.validation_split > 0.0 && self.validation_split < 1.0) {
            return Err(CrowdBusError::invalid_param(
                "validation_split",
                self.validation_split,
                "must be in (0, 1)",
            ));
        }
        if self.cv_folds < 2 {
            return Err(CrowdBusError::invalid_param("cv_folds", self.cv_folds, "must be at least 2"));
        }
        for (name, value) in [
            ("confirm_threshold", self.confirm_threshold),
            ("arrival_label_threshold", self.arrival_label_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(CrowdBusError::invalid_param(name, value, "must be in [0, 1]"));
            }
        }
        if !self.sanitize_fill.is_finite() {
            return Err(CrowdBusError::invalid_param("sanitize_fill", self.sanitize_fill, "must be finite"));
        }
        Ok(())
    }

    pub fn family_budget(&self) -> Duration {
        Duration::from_secs(self.family_budget_secs)
    }

    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = dir.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_cv_folds(mut self, folds: usize) -> Self {
        self.cv_folds = folds;
        self
    }

    pub fn with_validation_split(mut self, split: f64) -> Self {
        self.validation_split = split;
        self
    }

    pub fn with_family_budget(mut self, budget: Duration) -> Self {
        self.family_budget_secs = budget.as_secs().max(1);
        self
    }

    pub fn with_n_workers(mut self, n: usize) -> Self {
        self.n_workers = n;
        self
    }

    pub fn with_confirm_threshold(mut self, threshold: f64) -> Self {
        self.confirm_threshold = threshold;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| CrowdBusError::Config(format!("{}={:?}: {}", key, raw, e))),
        Err(_) => Ok(None),
    }
}
