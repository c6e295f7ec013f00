use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use observatory_rs::analytics::anomaly::{
    AdaptiveThresholdDetector, AnomalyAlgorithm, EnsembleDetector, IsolationForestDetector,
    VotingStrategy,
};
use observatory_rs::config::{EnsembleConfig, PipelineConfig};
use observatory_rs::monitoring::tracing_optimizer::Span;
use observatory_rs::ObservabilityRegistry;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// 検知パイプラインベンチマーク
///
/// 学習・判定・取り込みのスループットを測定します。

fn training_data(n: usize) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(1);
    (0..n).map(|_| rng.gen_range(90.0..110.0)).collect()
}

fn bench_isolation_forest_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("isolation_forest_fit");

    for size in [100usize, 1000, 5000].iter() {
        let data = training_data(*size);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| {
                let mut forest = IsolationForestDetector::new(100, 0.1).with_seed(Some(7));
                forest.fit(black_box(data)).unwrap();
                forest
            })
        });
    }

    group.finish();
}

fn bench_ensemble_predict(c: &mut Criterion) {
    let mut group = c.benchmark_group("ensemble_predict");
    let data = training_data(500);

    for strategy in [
        VotingStrategy::Majority,
        VotingStrategy::Weighted,
        VotingStrategy::AverageConfidence,
    ] {
        let mut config = EnsembleConfig {
            voting_strategy: strategy,
            refit_interval: usize::MAX,
            ..Default::default()
        };
        config.isolation_forest.seed = Some(7);
        let detector = EnsembleDetector::new(config);
        detector.fit("latency", &data).unwrap();

        group.bench_function(BenchmarkId::new("strategy", strategy.as_str()), |b| {
            let mut i = 0u64;
            b.iter(|| {
                i += 1;
                let value = if i % 50 == 0 { 400.0 } else { 100.0 };
                detector.predict("latency", black_box(value)).unwrap()
            })
        });
    }

    group.finish();
}

fn bench_production_record(c: &mut Criterion) {
    let detector = AdaptiveThresholdDetector::default();
    let mut rng = StdRng::seed_from_u64(3);

    c.bench_function("production_record_metric", |b| {
        b.iter(|| {
            let value = rng.gen_range(95.0..105.0);
            detector
                .record_metric("api", "response_time", black_box(value))
                .unwrap()
        })
    });
}

fn bench_registry_ingest(c: &mut Criterion) {
    let mut config = PipelineConfig::default();
    config.ensemble.isolation_forest.seed = Some(7);
    config.ensemble.isolation_forest.n_trees = 50;
    let registry = ObservabilityRegistry::from_config(config).unwrap();
    registry.train_ensemble("cpu", &training_data(200)).unwrap();

    let mut group = c.benchmark_group("registry");
    group.throughput(Throughput::Elements(1));

    let mut rng = StdRng::seed_from_u64(5);
    group.bench_function("ingest_metric", |b| {
        b.iter(|| {
            let value = rng.gen_range(90.0..110.0);
            registry.ingest_metric("node-1", "cpu", black_box(value)).unwrap()
        })
    });

    let mut n = 0u64;
    group.bench_function("ingest_span", |b| {
        b.iter(|| {
            n += 1;
            let start = chrono::Utc::now();
            let span = Span::new(format!("t{}", n), "s", "GET /", "api", start)
                .finished_at(start + chrono::Duration::milliseconds((n % 40) as i64));
            registry.ingest_span(black_box(span)).unwrap()
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_isolation_forest_fit,
    bench_ensemble_predict,
    bench_production_record,
    bench_registry_ingest
);
criterion_main!(benches);
