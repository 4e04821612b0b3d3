//! Feature schemas for the arrival and ETA tasks
//!
//! Each task has its own record type. Both are declared with the same
//! field table machinery but share no supertype beyond [`FeatureSchema`].
//! The trainable columns of each task are an explicit list versioned by
//! [`SCHEMA_VERSION`], not derived from the struct at runtime.

mod arrival;
mod eta;
mod field;
mod raw;

pub use arrival::{ArrivalFeatures, ARRIVAL_METADATA_FIELDS, ARRIVAL_TRAINABLE_FIELDS};
pub use eta::{EtaFeatures, ETA_METADATA_FIELDS, ETA_TRAINABLE_FIELDS};
pub use field::{FieldKind, FieldSpec, FieldValue, Presence};
pub use raw::{DefaultedRecord, RawRecord, RawValue};

pub(crate) use field::feature_record;

#[cfg(test)]
pub(crate) use arrival::tests::sample_raw as arrival_sample_raw;
#[cfg(test)]
pub(crate) use eta::tests::minimal_raw as eta_minimal_raw;

use crate::error::{CrowdBusError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Version of the trainable field lists. Bump whenever either list changes.
pub const SCHEMA_VERSION: u32 = 3;

/// Prediction task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    /// Arrival confirmation probability
    Arrival,
    /// Seconds until arrival at a target stop
    Eta,
}

impl Task {
    pub const ALL: [Task; 2] = [Task::Arrival, Task::Eta];

    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Arrival => "arrival",
            Task::Eta => "eta",
        }
    }

    /// Dataset column holding the training target
    pub fn target_column(&self) -> &'static str {
        match self {
            Task::Arrival => "confirm_prob",
            Task::Eta => "actual_eta_seconds",
        }
    }

    pub fn is_classification(&self) -> bool {
        matches!(self, Task::Arrival)
    }

    pub fn fields(&self) -> &'static [FieldSpec] {
        match self {
            Task::Arrival => ArrivalFeatures::FIELDS,
            Task::Eta => EtaFeatures::FIELDS,
        }
    }

    pub fn trainable_fields(&self) -> &'static [&'static str] {
        match self {
            Task::Arrival => ARRIVAL_TRAINABLE_FIELDS,
            Task::Eta => ETA_TRAINABLE_FIELDS,
        }
    }

    pub fn metadata_fields(&self) -> &'static [&'static str] {
        match self {
            Task::Arrival => ARRIVAL_METADATA_FIELDS,
            Task::Eta => ETA_METADATA_FIELDS,
        }
    }

    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields().iter().find(|f| f.name == name)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Task {
    type Err = CrowdBusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "arrival" => Ok(Task::Arrival),
            "eta" => Ok(Task::Eta),
            other => Err(CrowdBusError::invalid_param("task", other, "expected `arrival` or `eta`")),
        }
    }
}

/// A validated feature record type
pub trait FeatureSchema: Sized + Send + Sync {
    const TASK: Task;

    fn fields() -> &'static [FieldSpec];

    fn from_raw(raw: &RawRecord) -> Result<Self>;
}

/// Outcome of validating a batch of rows. Row indices refer to the input.
#[derive(Debug)]
pub struct ValidationReport<T> {
    pub valid: Vec<(usize, T)>,
    pub errors: Vec<(usize, CrowdBusError)>,
}

impl<T> ValidationReport<T> {
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn valid_count(&self) -> usize {
        self.valid.len()
    }

    /// Fails with `EmptyDataset` when nothing survived
    pub fn require_rows(self, task: Task) -> Result<Self> {
        if self.valid.is_empty() {
            return Err(CrowdBusError::EmptyDataset {
                task: task.to_string(),
                rejected: self.errors.len(),
            });
        }
        Ok(self)
    }
}

/// Validate every row, collecting failures instead of stopping at the first
pub fn validate_rows<T: FeatureSchema>(rows: &[RawRecord]) -> ValidationReport<T> {
    let mut valid = Vec::with_capacity(rows.len());
    let mut errors = Vec::new();

    for (idx, row) in rows.iter().enumerate() {
        match T::from_raw(row) {
            Ok(record) => valid.push((idx, record)),
            Err(err) => {
                if let CrowdBusError::SchemaValidation { field, constraint } = &err {
                    warn!(task = %T::TASK, row = idx, field = %field, constraint = %constraint, "Dropping invalid row");
                } else {
                    warn!(task = %T::TASK, row = idx, error = %err, "Dropping invalid row");
                }
                errors.push((idx, err));
            }
        }
    }

    ValidationReport { valid, errors }
}
