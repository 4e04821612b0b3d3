//! Paired model artifacts
//!
//! Each task slot owns two files under the artifact root:
//!
//! - `best_model_<task>.bin`: a bincode [`ModelEnvelope`] carrying the fitted
//!   pipeline, its [`ArtifactMetadata`] and a checksum
//! - `<task>_feature_order.json`: the exact column order the pipeline expects
//!
//! Both carry the same `artifact_id`. Writes go through a temporary file and a
//! rename so a reader sees either the old file or the new one, never a torn
//! write. The feature order is written first; a crash between the two renames
//! leaves ids that disagree, which `load` reports as a mismatch.

mod envelope;

pub use envelope::{fnv1a, ArtifactMetadata, FeatureOrderFile, ModelEnvelope, ENVELOPE_MAGIC, ENVELOPE_VERSION};

use crate::error::{CrowdBusError, Result};
use crate::schema::Task;
use crate::training::Pipeline;
use crate::vectorize::FeatureOrder;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// A fitted pipeline with the order and metadata it was saved with
#[derive(Debug, Clone)]
pub struct LoadedArtifacts {
    pub pipeline: Pipeline,
    pub feature_order: FeatureOrder,
    pub metadata: ArtifactMetadata,
}

/// Directory of per-task artifact pairs
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn model_path(&self, slot: Task) -> PathBuf {
        self.root.join(format!("best_model_{}.bin", slot))
    }

    pub fn feature_order_path(&self, slot: Task) -> PathBuf {
        self.root.join(format!("{}_feature_order.json", slot))
    }

    /// Both files of the slot are present
    pub fn exists(&self, slot: Task) -> bool {
        self.model_path(slot).is_file() && self.feature_order_path(slot).is_file()
    }

    /// Persist a fitted pipeline and its feature order, replacing the slot's
    /// previous pair
    pub fn save(
        &self,
        slot: Task,
        pipeline: &Pipeline,
        feature_order: &FeatureOrder,
        metadata: &ArtifactMetadata,
    ) -> Result<(PathBuf, PathBuf)> {
        if metadata.slot != slot {
            return Err(CrowdBusError::Config(format!(
                "metadata for {} cannot be saved into the {} slot",
                metadata.slot, slot
            )));
        }
        if metadata.feature_count != feature_order.len() {
            return Err(CrowdBusError::ShapeMismatch {
                expected: format!("{} features", feature_order.len()),
                actual: format!("{} features in metadata", metadata.feature_count),
            });
        }
        fs::create_dir_all(&self.root)?;

        let order_file = FeatureOrderFile {
            artifact_id: metadata.artifact_id.clone(),
            schema_version: metadata.schema_version,
            slot,
            features: feature_order.clone(),
        };
        let order_bytes = serde_json::to_vec_pretty(&order_file)?;
        let model_bytes = ModelEnvelope::seal(metadata.clone(), pipeline)?.to_bytes()?;

        let order_path = self.feature_order_path(slot);
        let model_path = self.model_path(slot);
        write_atomic(&order_path, &order_bytes)?;
        write_atomic(&model_path, &model_bytes)?;

        info!(
            slot = %slot,
            artifact_id = %metadata.artifact_id,
            family = %metadata.family,
            model = %model_path.display(),
            feature_order = %order_path.display(),
            "Artifacts written"
        );
        Ok((model_path, order_path))
    }

    /// Metadata of the slot's model file without decoding the pipeline
    pub fn describe(&self, slot: Task) -> Result<ArtifactMetadata> {
        let path = self.model_path(slot);
        let envelope = self.read_envelope(slot, &path)?;
        Ok(envelope.metadata)
    }

    /// Saved feature order of the slot
    pub fn load_feature_order(&self, slot: Task) -> Result<FeatureOrderFile> {
        let path = self.feature_order_path(slot);
        let bytes = read(slot, &path)?;
        let file: FeatureOrderFile = serde_json::from_slice(&bytes)
            .map_err(|e| CrowdBusError::missing_artifact(slot, &path, format!("invalid feature order: {}", e)))?;
        if file.slot != slot {
            return Err(CrowdBusError::missing_artifact(
                slot,
                &path,
                format!("file belongs to the {} slot", file.slot),
            ));
        }
        Ok(file)
    }

    /// Load both artifacts of a slot. Either one missing, corrupt or
    /// belonging to another run is fatal.
    pub fn load(&self, slot: Task) -> Result<LoadedArtifacts> {
        let order_file = self.load_feature_order(slot)?;
        let model_path = self.model_path(slot);
        let envelope = self.read_envelope(slot, &model_path)?;

        if envelope.metadata.artifact_id != order_file.artifact_id {
            return Err(CrowdBusError::ArtifactMismatch {
                slot: slot.to_string(),
                model_id: envelope.metadata.artifact_id,
                order_id: order_file.artifact_id,
            });
        }
        if envelope.metadata.feature_count != order_file.features.len() {
            return Err(CrowdBusError::missing_artifact(
                slot,
                &model_path,
                format!(
                    "model expects {} features, feature order lists {}",
                    envelope.metadata.feature_count,
                    order_file.features.len()
                ),
            ));
        }

        let pipeline = envelope
            .open()
            .map_err(|e| CrowdBusError::missing_artifact(slot, &model_path, e.to_string()))?;

        info!(
            slot = %slot,
            artifact_id = %envelope.metadata.artifact_id,
            family = %envelope.metadata.family,
            features = order_file.features.len(),
            "Artifacts loaded"
        );
        Ok(LoadedArtifacts {
            pipeline,
            feature_order: order_file.features,
            metadata: envelope.metadata,
        })
    }

    fn read_envelope(&self, slot: Task, path: &Path) -> Result<ModelEnvelope> {
        let bytes = read(slot, path)?;
        let envelope = ModelEnvelope::from_bytes(&bytes)
            .map_err(|e| CrowdBusError::missing_artifact(slot, path, e.to_string()))?;
        if envelope.metadata.slot != slot {
            return Err(CrowdBusError::missing_artifact(
                slot,
                path,
                format!("model belongs to the {} slot", envelope.metadata.slot),
            ));
        }
        Ok(envelope)
    }
}

fn read(slot: Task, path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| CrowdBusError::missing_artifact(slot, path, e.to_string()))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write to `<path>.tmp`, flush to disk, then rename over `path`
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = temp_path(path);
    let written = File::create(&tmp)
        .and_then(|mut file| {
            file.write_all(data)?;
            file.sync_all()
        })
        .and_then(|_| fs::rename(&tmp, path));
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::{Estimator, Pipeline, RandomForest};
    use ndarray::{Array1, Array2};
    use tempfile::TempDir;

    fn fitted(task: Task, n_features: usize) -> Pipeline {
        let x = Array2::from_shape_fn((20, n_features), |(i, j)| (i * (j + 1)) as f64);
        let y = Array1::from_shape_fn(20, |i| (i % 2) as f64);
        let mut pipeline = Pipeline::new(task, Estimator::RandomForest(RandomForest::new(3)));
        pipeline.fit(&x, &y).unwrap();
        pipeline
    }

    fn save_slot(store: &ArtifactStore, task: Task) -> ArtifactMetadata {
        let order = FeatureOrder::for_task(task);
        let metadata = ArtifactMetadata::new(task, "random_forest", None, order.len());
        store.save(task, &fitted(task, order.len()), &order, &metadata).unwrap();
        metadata
    }

    #[test]
    fn test_save_load_pair() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let metadata = save_slot(&store, Task::Eta);

        assert!(store.exists(Task::Eta));
        assert!(!store.exists(Task::Arrival));
        let loaded = store.load(Task::Eta).unwrap();
        assert_eq!(loaded.metadata.artifact_id, metadata.artifact_id);
        assert!(loaded.feature_order.matches_schema(Task::Eta));
        assert!(!temp_path(&store.model_path(Task::Eta)).exists());
    }

    #[test]
    fn test_missing_feature_order_is_fatal() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        save_slot(&store, Task::Arrival);
        fs::remove_file(store.feature_order_path(Task::Arrival)).unwrap();

        let err = store.load(Task::Arrival).unwrap_err();
        assert!(matches!(err, CrowdBusError::MissingArtifact { .. }));
    }

    #[test]
    fn test_mixed_runs_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        save_slot(&store, Task::Arrival);
        let order_bytes = fs::read(store.feature_order_path(Task::Arrival)).unwrap();
        save_slot(&store, Task::Arrival);
        fs::write(store.feature_order_path(Task::Arrival), order_bytes).unwrap();

        assert!(matches!(
            store.load(Task::Arrival),
            Err(CrowdBusError::ArtifactMismatch { .. })
        ));
    }

    #[test]
    fn test_corrupt_model_is_fatal() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        save_slot(&store, Task::Eta);
        let path = store.model_path(Task::Eta);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        assert!(matches!(store.load(Task::Eta), Err(CrowdBusError::MissingArtifact { .. })));
        assert!(store.describe(Task::Eta).is_err());
    }

    #[test]
    fn test_describe_reads_metadata() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let metadata = save_slot(&store, Task::Arrival);
        let described = store.describe(Task::Arrival).unwrap();
        assert_eq!(described.family, "random_forest");
        assert_eq!(described.feature_count, metadata.feature_count);
    }

    #[test]
    fn test_save_rejects_wrong_slot() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let order = FeatureOrder::for_task(Task::Eta);
        let metadata = ArtifactMetadata::new(Task::Eta, "random_forest", None, order.len());
        let result = store.save(Task::Arrival, &fitted(Task::Eta, order.len()), &order, &metadata);
        assert!(result.is_err());
        assert!(!store.model_path(Task::Arrival).exists());
    }

    #[test]
    fn test_failed_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("best_model_eta.bin");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("occupied"), b"x").unwrap();

        assert!(write_atomic(&target, b"payload").is_err());
        assert!(!temp_path(&target).exists());
        assert!(target.is_dir());
    }
}
