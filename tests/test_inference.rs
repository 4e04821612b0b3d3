//! Integration test: persisted models served through the inference service

use crowdbus_ml::config::{CONFIRM_THRESHOLD, ETA_MAX_SECONDS};
use crowdbus_ml::error::CrowdBusError;
use crowdbus_ml::inference::{InferenceConfig, InferenceService, ModelHandle, Prediction, ValidationMode};
use crowdbus_ml::persistence::{ArtifactMetadata, ArtifactStore};
use crowdbus_ml::schema::{EtaFeatures, RawRecord, Task};
use crowdbus_ml::training::{Estimator, LogisticRegression, Pipeline, RandomForest};
use crowdbus_ml::vectorize::{vectorize, FeatureOrder};
use ndarray::{Array1, Array2};
use tempfile::TempDir;

/// Arrival model whose output ignores its inputs and equals `probability`
fn constant_arrival(probability: f64) -> Pipeline {
    let n = FeatureOrder::for_task(Task::Arrival).len();
    let mut lr = LogisticRegression::new();
    lr.coefficients = Some(Array1::zeros(n));
    lr.intercept = (probability / (1.0 - probability)).ln();
    Pipeline::from_fitted(Task::Arrival, Estimator::LogisticRegression(lr), n)
}

/// ETA forest fitted on a constant target
fn constant_eta(seconds: f64) -> Pipeline {
    let n = FeatureOrder::for_task(Task::Eta).len();
    let x = Array2::from_shape_fn((12, n), |(i, j)| ((i * 3 + j) % 11) as f64);
    let y = Array1::from_elem(12, seconds);
    let mut pipeline = Pipeline::new(Task::Eta, Estimator::RandomForest(RandomForest::new(3).with_random_state(7)));
    pipeline.fit(&x, &y).unwrap();
    pipeline
}

/// ETA model whose output moves with every input column
fn weighted_eta() -> Pipeline {
    let n = FeatureOrder::for_task(Task::Eta).len();
    let mut lr = LogisticRegression::new();
    lr.coefficients = Some(Array1::from_shape_fn(n, |j| 1e-6 * (j + 1) as f64));
    lr.intercept = -0.5;
    Pipeline::from_fitted(Task::Eta, Estimator::LogisticRegression(lr), n)
}

fn sparse_eta() -> RawRecord {
    RawRecord::new()
        .with("stops_remaining", 6.0)
        .with("hour_of_day", 17.0)
        .with("day_of_week", 3.0)
        .with("is_weekend", 0.0)
        .with("is_rush_hour", 1.0)
        .with("is_peak_period", 1.0)
        .with("minutes_since_last_checkpoint", 12.0)
}

fn save(store: &ArtifactStore, task: Task, pipeline: &Pipeline) -> ArtifactMetadata {
    let order = FeatureOrder::for_task(task);
    let metadata = ArtifactMetadata::new(task, pipeline.estimator().kind(), None, order.len());
    store.save(task, pipeline, &order, &metadata).unwrap();
    metadata
}

fn sparse_arrival() -> RawRecord {
    RawRecord::new()
        .with("report_count", 5.0)
        .with("unique_reporters", 4.0)
        .with("pct_within_radius", 0.8)
        .with("hour_of_day", 14.0)
}

fn service(store: &ArtifactStore, tasks: &[Task], validation: ValidationMode) -> InferenceService {
    InferenceService::load(InferenceConfig::default().with_validation(validation), store, tasks).unwrap()
}

#[test]
fn test_arrival_probability_and_threshold() {
    let dir = TempDir::new().unwrap();
    let store = ArtifactStore::new(dir.path());
    save(&store, Task::Arrival, &constant_arrival(0.92));

    let service = service(&store, &[Task::Arrival], ValidationMode::Trusted);
    match service.predict(&sparse_arrival(), Task::Arrival).unwrap() {
        Prediction::Arrival(p) => {
            assert!((p.confirm_probability - 0.92).abs() < 1e-9);
            assert!(p.confirm);
            assert_eq!(p.threshold, CONFIRM_THRESHOLD);
        }
        other => panic!("expected arrival prediction, got {:?}", other),
    }
    assert_eq!(service.stats().total_predictions, 1);
}

#[test]
fn test_probability_below_threshold_is_not_confirmed() {
    let dir = TempDir::new().unwrap();
    let store = ArtifactStore::new(dir.path());
    save(&store, Task::Arrival, &constant_arrival(0.55));

    let service = service(&store, &[Task::Arrival], ValidationMode::Trusted);
    let prediction = service.predict(&sparse_arrival(), Task::Arrival).unwrap();
    assert!(matches!(prediction, Prediction::Arrival(ref p) if !p.confirm));

    let lenient = InferenceService::load(
        InferenceConfig::default().with_confirm_threshold(0.5),
        &store,
        &[Task::Arrival],
    )
    .unwrap();
    let prediction = lenient.predict(&sparse_arrival(), Task::Arrival).unwrap();
    assert!(matches!(prediction, Prediction::Arrival(ref p) if p.confirm));
}

#[test]
fn test_eta_is_clamped_to_five_days() {
    let dir = TempDir::new().unwrap();
    let store = ArtifactStore::new(dir.path());
    save(&store, Task::Eta, &constant_eta(500_000.0));

    let service = service(&store, &[Task::Eta], ValidationMode::Trusted);
    let record = RawRecord::new()
        .with("stops_remaining", 3.0)
        .with("minutes_since_last_checkpoint", 2.0);
    match service.predict(&record, Task::Eta).unwrap() {
        Prediction::Eta(p) => {
            assert_eq!(p.eta_seconds, ETA_MAX_SECONDS);
            assert_eq!(p.eta_minutes, 7200.0);
            assert_eq!(p.confidence, 0.9);
            assert!(p.uncertainty.min_seconds < p.eta_seconds);
            assert!(p.uncertainty.max_seconds > p.eta_seconds);
        }
        other => panic!("expected ETA prediction, got {:?}", other),
    }
}

#[test]
fn test_non_finite_inputs_still_predict() {
    let dir = TempDir::new().unwrap();
    let store = ArtifactStore::new(dir.path());
    save(&store, Task::Eta, &constant_eta(900.0));

    let service = service(&store, &[Task::Eta], ValidationMode::Trusted);
    let record = RawRecord::new()
        .with("stops_remaining", f64::NAN)
        .with("current_delay_seconds", f64::INFINITY)
        .with("distance_remaining_km", f64::NEG_INFINITY);

    let prediction = service.predict(&record, Task::Eta).unwrap();
    assert!(prediction.value().is_finite());
    assert!((prediction.value() - 900.0).abs() < 1e-6);
}

#[test]
fn test_strict_mode_rejects_incomplete_record() {
    let dir = TempDir::new().unwrap();
    let store = ArtifactStore::new(dir.path());
    save(&store, Task::Arrival, &constant_arrival(0.92));

    let strict = service(&store, &[Task::Arrival], ValidationMode::Strict);
    assert!(strict.predict(&sparse_arrival(), Task::Arrival).is_err());
    assert_eq!(strict.stats().error_count, 1);

    let trusted = service(&store, &[Task::Arrival], ValidationMode::Trusted);
    assert!(trusted.predict(&sparse_arrival(), Task::Arrival).is_ok());
}

#[test]
fn test_unloaded_task_is_missing_artifact() {
    let dir = TempDir::new().unwrap();
    let store = ArtifactStore::new(dir.path());
    save(&store, Task::Arrival, &constant_arrival(0.92));

    let service = service(&store, &[Task::Arrival], ValidationMode::Trusted);
    assert!(service.is_loaded(Task::Arrival));
    assert!(!service.is_loaded(Task::Eta));
    assert!(matches!(
        service.predict(&RawRecord::new(), Task::Eta),
        Err(CrowdBusError::MissingArtifact { .. })
    ));

    assert!(matches!(
        InferenceService::load(InferenceConfig::default(), &store, &[Task::Arrival, Task::Eta]),
        Err(CrowdBusError::MissingArtifact { .. })
    ));
}

#[test]
fn test_reload_swaps_model_and_keeps_snapshots() {
    let dir = TempDir::new().unwrap();
    let store = ArtifactStore::new(dir.path());
    let first = save(&store, Task::Arrival, &constant_arrival(0.92));

    let handle = ModelHandle::load(&store, Task::Arrival).unwrap();
    let service = InferenceService::new(InferenceConfig::default()).with_handle(handle.clone());
    let before = handle.snapshot();

    let second = save(&store, Task::Arrival, &constant_arrival(0.3));
    let after = handle.reload(&store).unwrap();

    assert_eq!(before.metadata.artifact_id, first.artifact_id);
    assert_eq!(after.metadata.artifact_id, second.artifact_id);
    assert_eq!(handle.snapshot().metadata.artifact_id, second.artifact_id);

    let prediction = service.predict(&sparse_arrival(), Task::Arrival).unwrap();
    assert!((prediction.value() - 0.3).abs() < 1e-9);
}

#[test]
fn test_failed_reload_keeps_current_model() {
    let dir = TempDir::new().unwrap();
    let store = ArtifactStore::new(dir.path());
    let current = save(&store, Task::Arrival, &constant_arrival(0.92));
    let handle = ModelHandle::load(&store, Task::Arrival).unwrap();

    std::fs::remove_file(store.feature_order_path(Task::Arrival)).unwrap();
    assert!(handle.reload(&store).is_err());
    assert_eq!(handle.snapshot().metadata.artifact_id, current.artifact_id);

    let service = InferenceService::new(InferenceConfig::default()).with_handle(handle);
    let prediction = service.predict(&sparse_arrival(), Task::Arrival).unwrap();
    assert!((prediction.value() - 0.92).abs() < 1e-9);
}

#[test]
fn test_sparse_record_serves_training_vector() {
    let order = FeatureOrder::for_task(Task::Eta);
    let raw = sparse_eta();
    let training_vector = vectorize(&EtaFeatures::from_raw(&raw).unwrap(), &order);

    assert_eq!(vectorize(&raw.with_defaults(Task::Eta), &order), training_vector);
    assert_ne!(vectorize(&raw, &order), training_vector);
    assert_eq!(training_vector[order.index_of("checkpoint_age_penalty").unwrap()], 2.0);
    assert_eq!(training_vector[order.index_of("historical_completion_rate").unwrap()], 0.9);

    let dir = TempDir::new().unwrap();
    let store = ArtifactStore::new(dir.path());
    let pipeline = weighted_eta();
    save(&store, Task::Eta, &pipeline);

    let expected = pipeline
        .output(&Array2::from_shape_vec((1, order.len()), training_vector).unwrap())
        .unwrap()[0];
    let trusted = service(&store, &[Task::Eta], ValidationMode::Trusted)
        .predict(&raw, Task::Eta)
        .unwrap();
    let strict = service(&store, &[Task::Eta], ValidationMode::Strict)
        .predict(&raw, Task::Eta)
        .unwrap();

    assert_eq!(trusted.value(), expected);
    assert_eq!(strict.value(), expected);
    assert_eq!(trusted, strict);
}
