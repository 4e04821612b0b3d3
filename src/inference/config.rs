//! Inference configuration

use crate::config::{PipelineConfig, CONFIRM_THRESHOLD, SANITIZE_FILL};
use serde::{Deserialize, Serialize};

/// How raw request records are checked before vectorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Parse through the task schema; range and requiredness violations
    /// reject the request
    Strict,
    /// The boundary layer already validated; absent fields take their
    /// schema defaults and values are not range checked
    #[default]
    Trusted,
}

/// Configuration for serving predictions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub validation: ValidationMode,

    /// Probability at or above which an arrival is confirmed
    pub confirm_threshold: f64,

    /// Fill value for absent and non-finite features
    pub sanitize_fill: f64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            validation: ValidationMode::default(),
            confirm_threshold: CONFIRM_THRESHOLD,
            sanitize_fill: SANITIZE_FILL,
        }
    }
}

impl InferenceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serving settings shared with a pipeline config
    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        Self {
            validation: ValidationMode::default(),
            confirm_threshold: config.confirm_threshold,
            sanitize_fill: config.sanitize_fill,
        }
    }

    pub fn with_validation(mut self, mode: ValidationMode) -> Self {
        self.validation = mode;
        self
    }

    pub fn with_confirm_threshold(mut self, threshold: f64) -> Self {
        self.confirm_threshold = threshold;
        self
    }
}
