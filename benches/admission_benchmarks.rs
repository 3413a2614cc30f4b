//! Benchmarks for the admission hot path.
//!
//! Tracks the cost of a rate-gate decision and of admitting one event into
//! the bounded queue, both of which sit on every `POST /events`.

use std::{hint::black_box, time::Instant};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sluice_core::EventRequest;
use sluice_ingest::{IngestionService, RateGate, ServiceConfig};
use sluice_testing::{EventBuilder, TestEnv};
use tokio::runtime::Runtime;

fn bench_rate_gate(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_gate");
    group.throughput(Throughput::Elements(1));

    let gate = RateGate::new(f64::MAX, u32::MAX);
    group.bench_function("allow_uncontended", |b| b.iter(|| black_box(gate.allow())));

    let exhausted = RateGate::new(0.0, 0);
    group.bench_function("allow_denied", |b| b.iter(|| black_box(exhausted.allow())));

    group.finish();
}

fn bench_admit(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("admit");
    group.throughput(Throughput::Elements(1));

    for workers in [1, 4, 16] {
        group.bench_with_input(BenchmarkId::new("workers", workers), &workers, |b, &workers| {
            b.iter_custom(|iters| {
                rt.block_on(async {
                    let env = TestEnv::new();
                    let config = ServiceConfig {
                        worker_count: workers,
                        queue_capacity: usize::try_from(iters).unwrap_or(usize::MAX).max(1),
                        ..Default::default()
                    };
                    let service =
                        IngestionService::start(config, env.client(), env.metrics(), env.clock())
                            .unwrap();
                    let events = EventBuilder::batch(usize::try_from(iters).unwrap());

                    let start = Instant::now();
                    for event in events {
                        black_box(service.admit(event)).ok();
                    }
                    let elapsed = start.elapsed();

                    service.shutdown().await.unwrap();
                    elapsed
                })
            });
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let body = serde_json::to_vec(&EventBuilder::new().field("plan", "pro").field("seats", 12).build())
        .unwrap();
    let now = chrono::Utc::now();

    c.bench_function("decode_event_request", |b| {
        b.iter(|| {
            let request: EventRequest = serde_json::from_slice(black_box(&body)).unwrap();
            black_box(request.into_event(now))
        })
    });
}

criterion_group!(benches, bench_rate_gate, bench_admit, bench_decode);
criterion_main!(benches);
