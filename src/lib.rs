//! CrowdBus ML - arrival confirmation and ETA prediction core
//!
//! Feature contract, model search and inference for a crowdsourced,
//! GPS-free bus tracker. Two tasks share one architecture:
//!
//! - arrival: probability that a bus has reached a stop, from crowd reports
//! - ETA: seconds until the bus reaches a target stop
//!
//! # Modules
//!
//! ## Feature contract
//! - [`schema`] - Typed, range-checked feature records per task
//! - [`vectorize`] - Fixed-order numeric vectors with NaN/inf sanitization
//!
//! ## Training
//! - [`preprocessing`] - Standard scaling
//! - [`calibration`] - Platt scaling for SVM probabilities
//! - [`training`] - Estimators, model family catalogs, the trainer
//! - [`optimizer`] - Cross-validated grid search on a bounded worker pool
//!
//! ## Serving
//! - [`persistence`] - Paired model and feature-order artifacts
//! - [`inference`] - Model handles and the inference service
//!
//! ## Services
//! - [`cli`] - Command-line interface

// Core error handling and configuration
pub mod error;
pub mod config;

// Feature contract
pub mod schema;
pub mod vectorize;

// Training
pub mod preprocessing;
pub mod calibration;
pub mod training;
pub mod optimizer;

// Serving
pub mod persistence;
pub mod inference;

// Services
pub mod cli;

pub use error::{CrowdBusError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{PipelineConfig, CONFIRM_THRESHOLD, ETA_MAX_SECONDS, SANITIZE_FILL};
    pub use crate::error::{CrowdBusError, Result};
    pub use crate::inference::{
        ArrivalPrediction, EtaPrediction, InferenceConfig, InferenceService, ModelHandle, Prediction, ValidationMode,
    };
    pub use crate::persistence::{ArtifactMetadata, ArtifactStore};
    pub use crate::schema::{validate_rows, ArrivalFeatures, EtaFeatures, FeatureSchema, RawRecord, RawValue, Task};
    pub use crate::training::{ModelFamily, Pipeline, Trainer, TrainingReport, ValidationMetrics};
    pub use crate::vectorize::{vectorize, FeatureOrder};
}
