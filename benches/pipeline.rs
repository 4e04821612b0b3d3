use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use crowdbus_ml::inference::{InferenceConfig, InferenceService};
use crowdbus_ml::persistence::{ArtifactMetadata, ArtifactStore};
use crowdbus_ml::schema::{RawRecord, Task};
use crowdbus_ml::optimizer::{GridSearch, GridSearchConfig};
use crowdbus_ml::training::{quick_catalog, CVStrategy, Estimator, ModelRegistry, Pipeline, RandomForest};
use crowdbus_ml::vectorize::{vectorize, vectorize_batch, FeatureOrder};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::time::Duration;

fn random_eta_records(n: usize, rng: &mut impl Rng) -> Vec<RawRecord> {
    let order = FeatureOrder::for_task(Task::Eta);
    (0..n)
        .map(|_| {
            let mut record = RawRecord::new();
            for name in order.iter() {
                if rng.gen_bool(0.8) {
                    record.insert(name, rng.gen::<f64>() * 100.0);
                }
            }
            record
        })
        .collect()
}

fn bench_vectorize(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let order = FeatureOrder::for_task(Task::Eta);
    let mut group = c.benchmark_group("vectorize");

    let records = random_eta_records(1, &mut rng);
    group.bench_function("single", |b| b.iter(|| vectorize(black_box(&records[0]), &order)));

    for n in [100, 1000].iter() {
        let records = random_eta_records(*n, &mut rng);
        group.bench_with_input(BenchmarkId::new("batch", n), &records, |b, records| {
            b.iter(|| vectorize_batch(black_box(records.as_slice()), &order, 0.0))
        });
    }

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let n_features = FeatureOrder::for_task(Task::Eta).len();
    let x = Array2::from_shape_fn((200, n_features), |_| rng.gen::<f64>() * 10.0);
    let y = Array1::from_shape_fn(200, |i| x[[i, 0]] * 60.0 + x[[i, 1]] * 30.0);

    let config = GridSearchConfig {
        cv: CVStrategy::KFold { n_splits: 3, shuffle: false },
        budget: Duration::from_secs(60),
        ..Default::default()
    };
    let registry = ModelRegistry::new(quick_catalog(Task::Eta), GridSearch::new(config, 2).unwrap(), 42);

    let mut group = c.benchmark_group("search");
    group.sample_size(10);
    group.bench_function("quick_eta", |b| b.iter(|| registry.search(black_box(&x), &y, &x, &y).unwrap()));
    group.finish();
}

fn bench_prediction(c: &mut Criterion) {
    let dir = tempfile::TempDir::new().unwrap();
    let store = ArtifactStore::new(dir.path());
    let order = FeatureOrder::for_task(Task::Eta);

    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let x = Array2::from_shape_fn((300, order.len()), |_| rng.gen::<f64>() * 10.0);
    let y = Array1::from_shape_fn(300, |i| x[[i, 2]] * 120.0);
    let mut pipeline = Pipeline::new(Task::Eta, Estimator::RandomForest(RandomForest::new(50).with_max_depth(Some(10))));
    pipeline.fit(&x, &y).unwrap();
    let metadata = ArtifactMetadata::new(Task::Eta, "random_forest", None, order.len());
    store.save(Task::Eta, &pipeline, &order, &metadata).unwrap();

    let service = InferenceService::load(InferenceConfig::default(), &store, &[Task::Eta]).unwrap();
    let record = random_eta_records(1, &mut rng).remove(0);

    c.bench_function("predict_eta", |b| {
        b.iter(|| service.predict(black_box(&record), Task::Eta).unwrap())
    });
}

criterion_group!(benches, bench_vectorize, bench_search, bench_prediction);
criterion_main!(benches);
