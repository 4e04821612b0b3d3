//! Training runs: dataset in, persisted artifact pair out

use super::cross_validation::{train_validation_split, CVStrategy};
use super::metrics::ValidationMetrics;
use super::registry::{catalog_for, render_leaderboard, FamilyReport, ModelFamily, ModelRegistry};
use crate::config::PipelineConfig;
use crate::error::{CrowdBusError, Result};
use crate::optimizer::{GridSearch, GridSearchConfig};
use crate::persistence::{ArtifactMetadata, ArtifactStore};
use crate::schema::{validate_rows, ArrivalFeatures, EtaFeatures, FeatureSchema, RawRecord, Task};
use crate::vectorize::{vectorize_batch, FeatureLookup, FeatureOrder};
use ndarray::{Array1, Array2, Axis};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// Outcome of one training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub task: Task,
    pub model_family_name: String,
    pub validation_metrics: ValidationMetrics,
    pub artifact_path: PathBuf,
    pub feature_order_path: PathBuf,
    /// Rows dropped by schema or target validation
    pub validation_errors: usize,
    pub training_samples: usize,
    pub validation_samples: usize,
    pub feature_count: usize,
    pub leaderboard: Vec<FamilyReport>,
    pub artifact_id: String,
    pub training_time_secs: f64,
}

impl TrainingReport {
    pub fn generate_report(&self) -> String {
        let mut report = String::new();
        report.push_str(&format!("=== CrowdBus {} Training Report ===\n\n", self.task));

        report.push_str(&format!("Selected:   {}\n", self.model_family_name));
        report.push_str(&format!("Artifact:   {}\n", self.artifact_id));
        report.push_str(&format!("Model file: {}\n", self.artifact_path.display()));
        report.push_str(&format!("Order file: {}\n\n", self.feature_order_path.display()));

        report.push_str("--- Data ---\n");
        report.push_str(&format!("Training rows:   {}\n", self.training_samples));
        report.push_str(&format!("Validation rows: {}\n", self.validation_samples));
        report.push_str(&format!("Rejected rows:   {}\n", self.validation_errors));
        report.push_str(&format!("Features:        {}\n\n", self.feature_count));

        report.push_str("--- Validation Metrics ---\n");
        match &self.validation_metrics {
            ValidationMetrics::Classification(m) => {
                report.push_str(&format!("Accuracy:  {:.4}\n", m.accuracy));
                for (label, scores) in ["0", "1"].iter().zip(m.per_class.iter()) {
                    report.push_str(&format!(
                        "Class {}:   precision {:.4}  recall {:.4}  support {}\n",
                        label, scores.precision, scores.recall, scores.support
                    ));
                }
                if let Some(ll) = m.log_loss {
                    report.push_str(&format!("Log loss:  {:.4}\n", ll));
                }
            }
            ValidationMetrics::Regression(m) => {
                report.push_str(&format!("RMSE:      {:.2} s ({:.2} min)\n", m.rmse, m.rmse_minutes));
                report.push_str(&format!("MAE:       {:.2} s ({:.2} min)\n", m.mae, m.mae_minutes));
                report.push_str(&format!("R²:        {:.4}\n", m.r2));
                report.push_str(&format!("MAPE:      {:.2}%\n", m.mape));
            }
        }
        report.push('\n');

        report.push_str("--- Model Comparison ---\n");
        report.push_str(&render_leaderboard(&self.leaderboard, Some(&self.model_family_name)));
        report.push_str(&format!("\nTotal time: {:.2} seconds\n", self.training_time_secs));
        report
    }
}

/// Validated training matrix
struct PreparedData {
    x: Array2<f64>,
    y: Array1<f64>,
    rejected: usize,
}

/// Runs the validate, vectorize, search and persist steps for one task
pub struct Trainer {
    config: PipelineConfig,
    catalog: Option<Vec<ModelFamily>>,
    quick: bool,
}

impl Trainer {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            catalog: None,
            quick: false,
        }
    }

    /// Replace the built-in catalog
    pub fn with_catalog(mut self, families: Vec<ModelFamily>) -> Self {
        self.catalog = Some(families);
        self
    }

    /// Use the reduced grids
    pub fn with_quick(mut self, quick: bool) -> Self {
        self.quick = quick;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Train from a CSV file with a header row
    pub fn train_csv(&self, task: Task, path: impl AsRef<Path>) -> Result<TrainingReport> {
        let path = path.as_ref();
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?;

        if df.column(task.target_column()).is_err() {
            return Err(CrowdBusError::Data(format!(
                "{} has no `{}` target column",
                path.display(),
                task.target_column()
            )));
        }
        info!(task = %task, path = %path.display(), rows = df.height(), "Loaded training data");

        let rows = RawRecord::from_dataframe(&df)?;
        self.train_rows(task, &rows)
    }

    /// Train from raw rows. Each row carries its target under the task's
    /// target column.
    pub fn train_rows(&self, task: Task, rows: &[RawRecord]) -> Result<TrainingReport> {
        self.config.validate()?;
        let start = Instant::now();

        let order = FeatureOrder::for_task(task);
        let data = match task {
            Task::Arrival => self.prepare::<ArrivalFeatures>(rows, &order)?,
            Task::Eta => self.prepare::<EtaFeatures>(rows, &order)?,
        };
        info!(
            task = %task,
            valid = data.x.nrows(),
            rejected = data.rejected,
            features = order.len(),
            "Training matrix ready"
        );

        let stratify = task.is_classification().then_some(&data.y);
        let (train_idx, val_idx) =
            train_validation_split(data.x.nrows(), stratify, self.config.validation_split, self.config.seed)?;
        let x_train = data.x.select(Axis(0), &train_idx);
        let y_train = data.y.select(Axis(0), &train_idx);
        let x_val = data.x.select(Axis(0), &val_idx);
        let y_val = data.y.select(Axis(0), &val_idx);

        let families = match &self.catalog {
            Some(families) => families.clone(),
            None => catalog_for(task, self.quick),
        };
        let registry = ModelRegistry::new(families, self.grid_search(task)?, self.config.seed);
        let outcome = registry.search(&x_train, &y_train, &x_val, &y_val)?;

        let metadata = ArtifactMetadata::new(task, outcome.family.clone(), Some(outcome.metrics.clone()), order.len());
        let store = ArtifactStore::new(&self.config.artifact_dir);
        let (artifact_path, feature_order_path) = store.save(task, &outcome.pipeline, &order, &metadata)?;

        let report = TrainingReport {
            task,
            model_family_name: outcome.family,
            validation_metrics: outcome.metrics,
            artifact_path,
            feature_order_path,
            validation_errors: data.rejected,
            training_samples: train_idx.len(),
            validation_samples: val_idx.len(),
            feature_count: order.len(),
            leaderboard: outcome.leaderboard,
            artifact_id: metadata.artifact_id,
            training_time_secs: start.elapsed().as_secs_f64(),
        };
        info!(
            task = %task,
            family = %report.model_family_name,
            artifact_id = %report.artifact_id,
            elapsed_secs = report.training_time_secs,
            "Training finished"
        );
        Ok(report)
    }

    fn grid_search(&self, task: Task) -> Result<GridSearch> {
        let n_splits = self.config.cv_folds;
        let cv = if task.is_classification() {
            CVStrategy::StratifiedKFold { n_splits, shuffle: false }
        } else {
            CVStrategy::KFold { n_splits, shuffle: false }
        };
        GridSearch::new(
            GridSearchConfig {
                cv,
                random_state: self.config.seed,
                budget: self.config.family_budget(),
            },
            self.config.n_workers,
        )
    }

    /// Validate rows, pull targets and vectorize. Rows failing the schema or
    /// carrying no usable target are counted and dropped.
    fn prepare<T: FeatureSchema + FeatureLookup>(&self, rows: &[RawRecord], order: &FeatureOrder) -> Result<PreparedData> {
        let task = T::TASK;
        let target_column = task.target_column();
        let report = validate_rows::<T>(rows);
        let mut rejected = report.error_count();

        let mut records = Vec::with_capacity(report.valid_count());
        let mut targets = Vec::with_capacity(report.valid_count());
        for (idx, record) in report.valid {
            match rows[idx].get(target_column).and_then(|v| v.as_number()) {
                Some(target) if target.is_finite() => {
                    targets.push(self.encode_target(task, target));
                    records.push(record);
                }
                other => {
                    warn!(task = %task, row = idx, field = target_column, value = ?other, "Dropping row without a usable target");
                    rejected += 1;
                }
            }
        }

        if records.is_empty() {
            return Err(CrowdBusError::EmptyDataset {
                task: task.to_string(),
                rejected,
            });
        }

        Ok(PreparedData {
            x: vectorize_batch(&records, order, self.config.sanitize_fill),
            y: Array1::from_vec(targets),
            rejected,
        })
    }

    /// Arrival targets become 0/1 labels, ETA targets pass through
    fn encode_target(&self, task: Task, target: f64) -> f64 {
        match task {
            Task::Arrival if target >= self.config.arrival_label_threshold => 1.0,
            Task::Arrival => 0.0,
            Task::Eta => target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{arrival_sample_raw, eta_minimal_raw};
    use tempfile::TempDir;

    fn trainer(dir: &TempDir) -> Trainer {
        Trainer::new(
            PipelineConfig::new()
                .with_artifact_dir(dir.path())
                .with_cv_folds(3)
                .with_n_workers(2),
        )
        .with_quick(true)
    }

    #[test]
    fn test_arrival_targets_are_thresholded() {
        let dir = TempDir::new().unwrap();
        let t = trainer(&dir);
        assert_eq!(t.encode_target(Task::Arrival, 0.5), 1.0);
        assert_eq!(t.encode_target(Task::Arrival, 0.49), 0.0);
        assert_eq!(t.encode_target(Task::Eta, 812.0), 812.0);
    }

    #[test]
    fn test_rows_without_target_are_rejected() {
        let dir = TempDir::new().unwrap();
        let rows = vec![
            arrival_sample_raw().with("confirm_prob", 0.9),
            arrival_sample_raw(),
            arrival_sample_raw().with("confirm_prob", f64::NAN),
        ];
        let order = FeatureOrder::for_task(Task::Arrival);
        let data = trainer(&dir).prepare::<ArrivalFeatures>(&rows, &order).unwrap();
        assert_eq!(data.x.dim(), (1, order.len()));
        assert_eq!(data.rejected, 2);
        assert_eq!(data.y[0], 1.0);
    }

    #[test]
    fn test_all_rows_invalid_is_empty_dataset() {
        let dir = TempDir::new().unwrap();
        let rows: Vec<RawRecord> = (0..4)
            .map(|_| eta_minimal_raw().with("hour_of_day", 99.0).with("actual_eta_seconds", 300.0))
            .collect();
        let err = trainer(&dir).train_rows(Task::Eta, &rows).unwrap_err();
        assert!(matches!(err, CrowdBusError::EmptyDataset { rejected: 4, .. }));
        assert!(!ArtifactStore::new(dir.path()).exists(Task::Eta));
    }

    #[test]
    fn test_report_text_sections() {
        let dir = TempDir::new().unwrap();
        let rows: Vec<RawRecord> = (0..40)
            .map(|i| {
                eta_minimal_raw()
                    .with("hour_of_day", (i % 24) as f64)
                    .with("actual_eta_seconds", 120.0 + 15.0 * i as f64)
            })
            .collect();
        let report = trainer(&dir).train_rows(Task::Eta, &rows).unwrap();
        let text = report.generate_report();
        assert!(text.contains("=== CrowdBus eta Training Report ==="));
        assert!(text.contains("--- Model Comparison ---"));
        assert!(text.contains(&report.model_family_name));
    }
}
