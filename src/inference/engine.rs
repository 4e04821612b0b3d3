//! Inference service implementation
//!
//! One optional [`ModelHandle`] per task, injected at construction. A
//! prediction validates (or trusts) the record, vectorizes it in the
//! model's persisted feature order, runs the pipeline and clamps the result
//! to the task's output range.

use super::handle::ModelHandle;
use super::{InferenceConfig, ValidationMode};
use crate::config::{ETA_MAX_SECONDS, PROBABILITY_RANGE};
use crate::error::{CrowdBusError, Result};
use crate::persistence::ArtifactStore;
use crate::schema::{ArrivalFeatures, EtaFeatures, RawRecord, Task};
use crate::vectorize::{vectorize_array, FeatureLookup};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Arrival confirmation output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrivalPrediction {
    pub confirm_probability: f64,
    pub confirm: bool,
    pub threshold: f64,
}

/// ETA range implied by the confidence level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtaUncertainty {
    pub min_seconds: f64,
    pub max_seconds: f64,
    pub min_minutes: f64,
    pub max_minutes: f64,
}

/// ETA output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtaPrediction {
    pub eta_seconds: f64,
    pub eta_minutes: f64,
    pub confidence: f64,
    pub uncertainty: EtaUncertainty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prediction {
    Arrival(ArrivalPrediction),
    Eta(EtaPrediction),
}

impl Prediction {
    /// The clamped scalar: probability or seconds
    pub fn value(&self) -> f64 {
        match self {
            Prediction::Arrival(p) => p.confirm_probability,
            Prediction::Eta(p) => p.eta_seconds,
        }
    }
}

/// Counters since the service was built
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceStats {
    pub total_predictions: u64,
    pub error_count: u64,
}

/// Clamp to `[lo, hi]`; NaN becomes `lo`
pub fn clamp_output(value: f64, lo: f64, hi: f64) -> f64 {
    if value.is_nan() {
        lo
    } else {
        value.clamp(lo, hi)
    }
}

/// Confidence from checkpoint freshness in minutes
pub fn eta_confidence(minutes_since_last_checkpoint: Option<f64>) -> f64 {
    match minutes_since_last_checkpoint {
        Some(m) if m < 5.0 => 0.9,
        Some(m) if m < 10.0 => 0.7,
        Some(m) if m < 20.0 => 0.5,
        Some(m) if m < 30.0 => 0.3,
        _ => 0.1,
    }
}

/// Range around an ETA: 30% of long ETAs and 20% of short ones, narrowed
/// for confident predictions
pub fn eta_uncertainty(eta_seconds: f64, confidence: f64) -> EtaUncertainty {
    let base = if eta_seconds > 600.0 { 0.3 } else { 0.2 };
    let fraction = if confidence > 0.7 {
        base * 0.6
    } else if confidence > 0.5 {
        base * 0.8
    } else {
        base
    };
    let spread = eta_seconds * fraction;
    let min_seconds = (eta_seconds - spread).max(0.0);
    let max_seconds = (eta_seconds + spread).min(ETA_MAX_SECONDS);
    EtaUncertainty {
        min_seconds,
        max_seconds,
        min_minutes: min_seconds / 60.0,
        max_minutes: max_seconds / 60.0,
    }
}

pub struct InferenceService {
    config: InferenceConfig,
    arrival: Option<ModelHandle>,
    eta: Option<ModelHandle>,
    predictions: AtomicU64,
    errors: AtomicU64,
}

impl std::fmt::Debug for InferenceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceService")
            .field("config", &self.config)
            .field("arrival_loaded", &self.arrival.is_some())
            .field("eta_loaded", &self.eta.is_some())
            .finish()
    }
}

impl InferenceService {
    pub fn new(config: InferenceConfig) -> Self {
        Self {
            config,
            arrival: None,
            eta: None,
            predictions: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Attach the handle for the handle's own slot
    pub fn with_handle(mut self, handle: ModelHandle) -> Self {
        match handle.slot() {
            Task::Arrival => self.arrival = Some(handle),
            Task::Eta => self.eta = Some(handle),
        }
        self
    }

    /// Load every task in `tasks` from the store; any failure is fatal
    pub fn load(config: InferenceConfig, store: &ArtifactStore, tasks: &[Task]) -> Result<Self> {
        let mut service = Self::new(config);
        for &task in tasks {
            service = service.with_handle(ModelHandle::load(store, task)?);
        }
        Ok(service)
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    pub fn handle(&self, task: Task) -> Option<&ModelHandle> {
        match task {
            Task::Arrival => self.arrival.as_ref(),
            Task::Eta => self.eta.as_ref(),
        }
    }

    pub fn is_loaded(&self, task: Task) -> bool {
        self.handle(task).is_some()
    }

    pub fn stats(&self) -> InferenceStats {
        InferenceStats {
            total_predictions: self.predictions.load(Ordering::Relaxed),
            error_count: self.errors.load(Ordering::Relaxed),
        }
    }

    fn require(&self, task: Task) -> Result<&ModelHandle> {
        self.handle(task).ok_or_else(|| CrowdBusError::MissingArtifact {
            slot: task.to_string(),
            path: String::new(),
            reason: "no model loaded for this task".to_string(),
        })
    }

    fn track<T>(&self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.predictions.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.errors.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    /// Raw model output for a record in the model's feature order
    fn raw_output<R: FeatureLookup + ?Sized>(&self, task: Task, record: &R) -> Result<f64> {
        let model = self.require(task)?.snapshot();
        let row = vectorize_array(record, &model.feature_order, self.config.sanitize_fill).insert_axis(ndarray::Axis(0));
        let output = model.pipeline.output(&row)?;
        let value = output
            .get(0)
            .copied()
            .ok_or_else(|| CrowdBusError::Inference("model returned no output".to_string()))?;
        debug!(task = %task, family = %model.metadata.family, raw = value, "Model output");
        Ok(value)
    }

    fn arrival_from<R: FeatureLookup + ?Sized>(&self, record: &R) -> Result<ArrivalPrediction> {
        let (lo, hi) = PROBABILITY_RANGE;
        let probability = clamp_output(self.raw_output(Task::Arrival, record)?, lo, hi);
        Ok(ArrivalPrediction {
            confirm_probability: probability,
            confirm: probability >= self.config.confirm_threshold,
            threshold: self.config.confirm_threshold,
        })
    }

    fn eta_from<R: FeatureLookup + ?Sized>(&self, record: &R) -> Result<EtaPrediction> {
        let eta_seconds = clamp_output(self.raw_output(Task::Eta, record)?, 0.0, ETA_MAX_SECONDS);
        let confidence = eta_confidence(record.feature("minutes_since_last_checkpoint"));
        Ok(EtaPrediction {
            eta_seconds,
            eta_minutes: eta_seconds / 60.0,
            confidence,
            uncertainty: eta_uncertainty(eta_seconds, confidence),
        })
    }

    /// Typed arrival prediction
    pub fn predict_arrival(&self, features: &ArrivalFeatures) -> Result<ArrivalPrediction> {
        self.track(self.arrival_from(features))
    }

    /// Typed ETA prediction
    pub fn predict_eta(&self, features: &EtaFeatures) -> Result<EtaPrediction> {
        self.track(self.eta_from(features))
    }

    /// Predict from a raw request mapping. Trusted records skip range
    /// checks but still take the schema defaults for absent fields.
    pub fn predict(&self, raw: &RawRecord, task: Task) -> Result<Prediction> {
        let result = match (task, self.config.validation) {
            (Task::Arrival, ValidationMode::Strict) => {
                ArrivalFeatures::from_raw(raw).and_then(|f| self.arrival_from(&f)).map(Prediction::Arrival)
            }
            (Task::Arrival, ValidationMode::Trusted) => {
                self.arrival_from(&raw.with_defaults(Task::Arrival)).map(Prediction::Arrival)
            }
            (Task::Eta, ValidationMode::Strict) => {
                EtaFeatures::from_raw(raw).and_then(|f| self.eta_from(&f)).map(Prediction::Eta)
            }
            (Task::Eta, ValidationMode::Trusted) => self.eta_from(&raw.with_defaults(Task::Eta)).map(Prediction::Eta),
        };
        self.track(result)
    }
}
