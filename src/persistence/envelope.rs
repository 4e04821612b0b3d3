//! On-disk artifact formats

use crate::error::{CrowdBusError, Result};
use crate::schema::{Task, SCHEMA_VERSION};
use crate::training::{Pipeline, ValidationMetrics};
use crate::vectorize::FeatureOrder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const ENVELOPE_MAGIC: [u8; 4] = *b"CBML";
pub const ENVELOPE_VERSION: u32 = 1;

const HEADER_LEN: usize = 4 + 4 + 8;

/// 64-bit FNV-1a
pub fn fnv1a(data: &[u8]) -> u64 {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    data.iter().fold(FNV_OFFSET_BASIS, |hash, &byte| {
        (hash ^ byte as u64).wrapping_mul(FNV_PRIME)
    })
}

/// What was trained, when, and how well it validated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Shared by the model and feature order of one training run
    pub artifact_id: String,
    pub schema_version: u32,
    pub slot: Task,
    pub family: String,
    pub trained_at: DateTime<Utc>,
    pub metrics: Option<ValidationMetrics>,
    pub feature_count: usize,
}

impl ArtifactMetadata {
    pub fn new(
        slot: Task,
        family: impl Into<String>,
        metrics: Option<ValidationMetrics>,
        feature_count: usize,
    ) -> Self {
        Self {
            artifact_id: uuid::Uuid::new_v4().to_string(),
            schema_version: SCHEMA_VERSION,
            slot,
            family: family.into(),
            trained_at: Utc::now(),
            metrics,
            feature_count,
        }
    }
}

/// JSON feature order file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureOrderFile {
    pub artifact_id: String,
    pub schema_version: u32,
    pub slot: Task,
    pub features: FeatureOrder,
}

#[derive(Serialize, Deserialize)]
struct EnvelopeBody {
    metadata: ArtifactMetadata,
    pipeline: Vec<u8>,
}

/// Model file: `CBML`, format version (u32 LE), FNV-1a of the body (u64 LE),
/// then the bincode body
#[derive(Debug, Clone)]
pub struct ModelEnvelope {
    pub metadata: ArtifactMetadata,
    pipeline: Vec<u8>,
}

impl ModelEnvelope {
    pub fn seal(metadata: ArtifactMetadata, pipeline: &Pipeline) -> Result<Self> {
        Ok(Self {
            metadata,
            pipeline: bincode::serialize(pipeline)?,
        })
    }

    /// Decode the pipeline
    pub fn open(&self) -> Result<Pipeline> {
        let pipeline: Pipeline = bincode::deserialize(&self.pipeline)?;
        if pipeline.task() != self.metadata.slot {
            return Err(CrowdBusError::Serialization(format!(
                "{} pipeline stored under the {} slot",
                pipeline.task(),
                self.metadata.slot
            )));
        }
        if pipeline.n_features() != Some(self.metadata.feature_count) {
            return Err(CrowdBusError::Serialization(format!(
                "pipeline fitted on {:?} features, metadata says {}",
                pipeline.n_features(),
                self.metadata.feature_count
            )));
        }
        Ok(pipeline)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(&EnvelopeBody {
            metadata: self.metadata.clone(),
            pipeline: self.pipeline.clone(),
        })?;
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(&ENVELOPE_MAGIC);
        out.extend_from_slice(&ENVELOPE_VERSION.to_le_bytes());
        out.extend_from_slice(&fnv1a(&body).to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(CrowdBusError::Serialization(format!(
                "model file truncated at {} bytes",
                bytes.len()
            )));
        }
        let (header, body) = bytes.split_at(HEADER_LEN);
        if header[..4] != ENVELOPE_MAGIC {
            return Err(CrowdBusError::Serialization("not a model artifact (bad magic)".to_string()));
        }

        let mut version = [0u8; 4];
        version.copy_from_slice(&header[4..8]);
        let version = u32::from_le_bytes(version);
        if version != ENVELOPE_VERSION {
            return Err(CrowdBusError::Serialization(format!(
                "unsupported model format version {} (expected {})",
                version, ENVELOPE_VERSION
            )));
        }

        let mut checksum = [0u8; 8];
        checksum.copy_from_slice(&header[8..16]);
        let expected = u64::from_le_bytes(checksum);
        let actual = fnv1a(body);
        if expected != actual {
            return Err(CrowdBusError::Serialization(format!(
                "checksum mismatch: stored {:016x}, computed {:016x}",
                expected, actual
            )));
        }

        let body: EnvelopeBody = bincode::deserialize(body)?;
        Ok(Self {
            metadata: body.metadata,
            pipeline: body.pipeline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_reference_values() {
        assert_eq!(fnv1a(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a(b"a"), 0xaf63dc4c8601ec8c);
    }

    #[test]
    fn test_bad_magic_and_truncation() {
        assert!(ModelEnvelope::from_bytes(b"CB").is_err());
        let mut bytes = b"XXXX".to_vec();
        bytes.extend_from_slice(&[0u8; 12]);
        let err = ModelEnvelope::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn test_future_version_rejected() {
        let mut bytes = ENVELOPE_MAGIC.to_vec();
        bytes.extend_from_slice(&(ENVELOPE_VERSION + 1).to_le_bytes());
        bytes.extend_from_slice(&fnv1a(b"").to_le_bytes());
        let err = ModelEnvelope::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn test_metadata_ids_are_unique() {
        let a = ArtifactMetadata::new(Task::Eta, "xgboost", None, 65);
        let b = ArtifactMetadata::new(Task::Eta, "xgboost", None, 65);
        assert_ne!(a.artifact_id, b.artifact_id);
        assert_eq!(a.schema_version, SCHEMA_VERSION);
    }
}
