//! Error types for the CrowdBus prediction core

use thiserror::Error;

/// Result type alias for CrowdBus operations
pub type Result<T> = std::result::Result<T, CrowdBusError>;

/// Main error type for the prediction core
#[derive(Error, Debug)]
pub enum CrowdBusError {
    /// A field violates its type, range or requiredness constraint
    #[error("Schema validation failed on `{field}`: {constraint}")]
    SchemaValidation { field: String, constraint: String },

    /// No rows survived validation
    #[error("Empty dataset for {task} training ({rejected} rows rejected)")]
    EmptyDataset { task: String, rejected: usize },

    /// A persisted artifact is absent or unreadable
    #[error("Missing artifact for {slot} at {path}: {reason}")]
    MissingArtifact {
        slot: String,
        path: String,
        reason: String,
    },

    /// The model and feature-order artifacts were written by different runs
    #[error("Artifact mismatch for {slot}: model {model_id} vs feature order {order_id}")]
    ArtifactMismatch {
        slot: String,
        model_id: String,
        order_id: String,
    },

    #[error("Hyperparameter grid for `{family}` has no combinations")]
    EmptyGrid { family: String },

    #[error("Data error: {0}")]
    Data(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },
}

impl CrowdBusError {
    pub fn schema(field: impl Into<String>, constraint: impl Into<String>) -> Self {
        CrowdBusError::SchemaValidation {
            field: field.into(),
            constraint: constraint.into(),
        }
    }

    pub fn missing_artifact(
        slot: impl std::fmt::Display,
        path: &std::path::Path,
        reason: impl Into<String>,
    ) -> Self {
        CrowdBusError::MissingArtifact {
            slot: slot.to_string(),
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_param(
        name: impl Into<String>,
        value: impl std::fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        CrowdBusError::InvalidParameter {
            name: name.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<polars::error::PolarsError> for CrowdBusError {
    fn from(err: polars::error::PolarsError) -> Self {
        CrowdBusError::Data(err.to_string())
    }
}

impl From<serde_json::Error> for CrowdBusError {
    fn from(err: serde_json::Error) -> Self {
        CrowdBusError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for CrowdBusError {
    fn from(err: bincode::Error) -> Self {
        CrowdBusError::Serialization(err.to_string())
    }
}

impl From<ndarray::ShapeError> for CrowdBusError {
    fn from(err: ndarray::ShapeError) -> Self {
        CrowdBusError::ShapeMismatch {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CrowdBusError::schema("hour_of_day", "must be <= 23, got 24");
        assert_eq!(
            err.to_string(),
            "Schema validation failed on `hour_of_day`: must be <= 23, got 24"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CrowdBusError = io_err.into();
        assert!(matches!(err, CrowdBusError::Io(_)));
    }

    #[test]
    fn test_missing_artifact_names_path() {
        let err = CrowdBusError::missing_artifact("eta", std::path::Path::new("models/x.bin"), "not found");
        let msg = err.to_string();
        assert!(msg.contains("eta"));
        assert!(msg.contains("models/x.bin"));
    }
}
