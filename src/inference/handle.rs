//! Swappable reference to a loaded model

use crate::error::Result;
use crate::persistence::{ArtifactMetadata, ArtifactStore, LoadedArtifacts};
use crate::schema::Task;
use crate::training::Pipeline;
use crate::vectorize::FeatureOrder;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

/// A pipeline with the feature order it was trained on
#[derive(Debug)]
pub struct LoadedModel {
    pub pipeline: Pipeline,
    pub feature_order: FeatureOrder,
    pub metadata: ArtifactMetadata,
    pub loaded_at: DateTime<Utc>,
}

impl From<LoadedArtifacts> for LoadedModel {
    fn from(artifacts: LoadedArtifacts) -> Self {
        Self {
            pipeline: artifacts.pipeline,
            feature_order: artifacts.feature_order,
            metadata: artifacts.metadata,
            loaded_at: Utc::now(),
        }
    }
}

/// Process-wide handle to the current model of one task.
///
/// Readers take an `Arc` snapshot and never hold the lock while predicting.
/// A reload builds the replacement completely before swapping it in.
#[derive(Debug, Clone)]
pub struct ModelHandle {
    slot: Task,
    current: Arc<RwLock<Arc<LoadedModel>>>,
}

impl ModelHandle {
    pub fn new(model: LoadedModel) -> Self {
        Self {
            slot: model.metadata.slot,
            current: Arc::new(RwLock::new(Arc::new(model))),
        }
    }

    /// Load the slot's artifact pair from `store`
    pub fn load(store: &ArtifactStore, slot: Task) -> Result<Self> {
        Ok(Self::new(store.load(slot)?.into()))
    }

    pub fn slot(&self) -> Task {
        self.slot
    }

    /// The model as of now; unaffected by later reloads
    pub fn snapshot(&self) -> Arc<LoadedModel> {
        Arc::clone(&self.current.read())
    }

    /// Replace the model with the store's current pair. On failure the
    /// previous model stays in place.
    pub fn reload(&self, store: &ArtifactStore) -> Result<Arc<LoadedModel>> {
        let fresh: Arc<LoadedModel> = match store.load(self.slot) {
            Ok(artifacts) => Arc::new(artifacts.into()),
            Err(e) => {
                warn!(slot = %self.slot, error = %e, "Reload failed, keeping current model");
                return Err(e);
            }
        };

        let previous = {
            let mut guard = self.current.write();
            std::mem::replace(&mut *guard, Arc::clone(&fresh))
        };
        info!(
            slot = %self.slot,
            previous = %previous.metadata.artifact_id,
            current = %fresh.metadata.artifact_id,
            family = %fresh.metadata.family,
            "Model reloaded"
        );
        Ok(fresh)
    }
}
