//! Inference service module
//!
//! Serves the persisted arrival and ETA models:
//! - [`ModelHandle`]: lock-guarded `Arc` snapshot of a loaded model, swapped on reload
//! - [`InferenceService`]: validate or trust, vectorize, predict, clamp
//! - Confidence and uncertainty bands for ETA output
//!
//! Models are loaded once at startup. Picking up a retrained model takes an
//! explicit [`ModelHandle::reload`]; nothing watches the artifact files.

mod config;
mod engine;
mod handle;

pub use config::{InferenceConfig, ValidationMode};
pub use engine::{
    clamp_output, eta_confidence, eta_uncertainty, ArrivalPrediction, EtaPrediction, EtaUncertainty,
    InferenceService, InferenceStats, Prediction,
};
pub use handle::{LoadedModel, ModelHandle};
