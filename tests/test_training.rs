//! Integration test: dataset to persisted artifacts

use crowdbus_ml::config::PipelineConfig;
use crowdbus_ml::error::CrowdBusError;
use crowdbus_ml::optimizer::{ParamGrid, TrialParams};
use crowdbus_ml::persistence::ArtifactStore;
use crowdbus_ml::schema::{RawRecord, Task};
use crowdbus_ml::training::{
    quick_catalog, Estimator, ModelFamily, Pipeline, RandomForest, Trainer, ValidationMetrics,
};
use crowdbus_ml::vectorize::FeatureOrder;
use std::io::Write;
use tempfile::TempDir;

fn eta_row(i: usize) -> RawRecord {
    RawRecord::new()
        .with("stops_remaining", (i % 10) as f64)
        .with("hour_of_day", (i % 24) as f64)
        .with("day_of_week", (i % 7) as f64)
        .with("is_weekend", 0.0)
        .with("is_rush_hour", (i % 2) as f64)
        .with("is_peak_period", 0.0)
        .with("current_delay_seconds", (i % 5) as f64 * 30.0)
        .with("minutes_since_last_checkpoint", (i % 40) as f64)
        .with("actual_eta_seconds", 90.0 * (i % 10) as f64 + 30.0 * (i % 5) as f64 + 60.0)
}

fn arrival_row(i: usize) -> RawRecord {
    let arrived = i % 2 == 0;
    RawRecord::new()
        .with("report_count", if arrived { 6.0 } else { 1.0 } + (i % 3) as f64)
        .with("unique_reporters", if arrived { 4.0 } else { 1.0 })
        .with("reports_per_minute", if arrived { 2.5 } else { 0.3 })
        .with("time_since_last_report_s", 10.0 + (i % 7) as f64)
        .with("time_since_first_report_s", 60.0)
        .with("pct_within_radius", if arrived { 0.85 } else { 0.2 })
        .with("acc_mean", 0.8)
        .with("t_mean", 1_704_567_880.0 + i as f64)
        .with("t_std", 4.0)
        .with("hour_of_day", (i % 24) as f64)
        .with("day_of_week", (i % 7) as f64)
        .with("is_weekend", 0.0)
        .with("is_rush_hour", 0.0)
        .with("is_early_morning", 0.0)
        .with("is_mid_day", 1.0)
        .with("is_evening", 0.0)
        .with("is_night", 0.0)
        .with("rain_1h", 0.0)
        .with("snow_1h", 0.0)
        .with("temperature", 25.0)
        .with("wind_speed", 2.0)
        .with("humidity", 60.0)
        .with("visibility", 10_000.0)
        .with("weather_delay_multiplier", 1.0)
        .with("confirm_prob", if arrived { 0.9 } else { 0.1 })
}

fn config(dir: &TempDir) -> PipelineConfig {
    PipelineConfig::new()
        .with_artifact_dir(dir.path())
        .with_cv_folds(3)
        .with_n_workers(2)
}

fn same_forest(_params: &TrialParams, seed: u64) -> crowdbus_ml::Result<Pipeline> {
    Ok(Pipeline::new(
        Task::Eta,
        Estimator::RandomForest(RandomForest::new(5).with_max_depth(Some(4)).with_random_state(seed)),
    ))
}

fn twin_catalog(first: &str, second: &str) -> Vec<ModelFamily> {
    vec![
        ModelFamily::new(first, Task::Eta, ParamGrid::new(), same_forest),
        ModelFamily::new(second, Task::Eta, ParamGrid::new(), same_forest),
    ]
}

#[test]
fn test_invalid_rows_dropped_and_counted() {
    let dir = TempDir::new().unwrap();
    let mut rows: Vec<RawRecord> = (0..10).map(eta_row).collect();
    rows[1].insert("hour_of_day", 24.0);
    rows[4].insert("schedule_adherence_score", 1.5);
    rows[7].remove("stops_remaining");

    let report = Trainer::new(config(&dir))
        .with_catalog(twin_catalog("a", "b"))
        .train_rows(Task::Eta, &rows)
        .unwrap();

    assert_eq!(report.validation_errors, 3);
    assert_eq!(report.training_samples + report.validation_samples, 7);
}

#[test]
fn test_all_invalid_rows_write_nothing() {
    let dir = TempDir::new().unwrap();
    let rows: Vec<RawRecord> = (0..6).map(|i| eta_row(i).with("stops_remaining", -1.0)).collect();

    let err = Trainer::new(config(&dir))
        .with_quick(true)
        .train_rows(Task::Eta, &rows)
        .unwrap_err();

    assert!(matches!(err, CrowdBusError::EmptyDataset { rejected: 6, .. }));
    let store = ArtifactStore::new(dir.path());
    assert!(!store.model_path(Task::Eta).exists());
    assert!(!store.feature_order_path(Task::Eta).exists());
}

#[test]
fn test_equal_scores_keep_catalog_order() {
    let rows: Vec<RawRecord> = (0..30).map(eta_row).collect();

    let dir = TempDir::new().unwrap();
    let report = Trainer::new(config(&dir))
        .with_catalog(twin_catalog("first", "second"))
        .train_rows(Task::Eta, &rows)
        .unwrap();
    assert_eq!(report.leaderboard[0].validation_metrics, report.leaderboard[1].validation_metrics);
    assert_eq!(report.model_family_name, "first");

    let dir = TempDir::new().unwrap();
    let report = Trainer::new(config(&dir))
        .with_catalog(twin_catalog("second", "first"))
        .train_rows(Task::Eta, &rows)
        .unwrap();
    assert_eq!(report.model_family_name, "second");
}

#[test]
fn test_quick_eta_training_persists_pair() {
    let dir = TempDir::new().unwrap();
    let rows: Vec<RawRecord> = (0..50).map(eta_row).collect();

    let report = Trainer::new(config(&dir)).with_quick(true).train_rows(Task::Eta, &rows).unwrap();

    assert_eq!(report.leaderboard.len(), quick_catalog(Task::Eta).len());
    assert_eq!(report.feature_count, FeatureOrder::for_task(Task::Eta).len());
    assert!(matches!(report.validation_metrics, ValidationMetrics::Regression(_)));
    assert_eq!(report.validation_samples, 10);

    let store = ArtifactStore::new(dir.path());
    let metadata = store.describe(Task::Eta).unwrap();
    assert_eq!(metadata.artifact_id, report.artifact_id);
    assert_eq!(metadata.family, report.model_family_name);
}

#[test]
fn test_arrival_training_from_csv() {
    let dir = TempDir::new().unwrap();
    let rows: Vec<RawRecord> = (0..40).map(arrival_row).collect();
    let columns: Vec<String> = {
        let mut keys: Vec<String> = rows[0].keys().map(str::to_string).collect();
        keys.sort();
        keys
    };

    let csv_path = dir.path().join("arrivals.csv");
    let mut file = std::fs::File::create(&csv_path).unwrap();
    writeln!(file, "{}", columns.join(",")).unwrap();
    for row in &rows {
        let values: Vec<String> = columns
            .iter()
            .map(|c| row.get(c).and_then(|v| v.as_number()).unwrap().to_string())
            .collect();
        writeln!(file, "{}", values.join(",")).unwrap();
    }
    drop(file);

    let report = Trainer::new(config(&dir).with_artifact_dir(dir.path().join("models")))
        .with_quick(true)
        .train_csv(Task::Arrival, &csv_path)
        .unwrap();

    assert_eq!(report.validation_errors, 0);
    assert_eq!(report.validation_samples, 8);
    match &report.validation_metrics {
        ValidationMetrics::Classification(m) => assert!(m.accuracy >= 0.75, "accuracy {}", m.accuracy),
        other => panic!("expected classification metrics, got {:?}", other),
    }
    assert!(ArtifactStore::new(dir.path().join("models")).exists(Task::Arrival));
}

#[test]
fn test_csv_without_target_column() {
    let dir = TempDir::new().unwrap();
    let csv_path = dir.path().join("rows.csv");
    std::fs::write(&csv_path, "stops_remaining,hour_of_day\n3,8\n").unwrap();

    let err = Trainer::new(config(&dir)).train_csv(Task::Eta, &csv_path).unwrap_err();
    assert!(err.to_string().contains("actual_eta_seconds"));
}
