use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use crossguard::coordination::banker::{BankerEngine, Movement};
use crossguard::simulation_engine::lane::LaneId;

/// Measures one request/release round trip through the safety engine for
/// each movement pattern.
fn bench_request_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("banker_request_release");

    for movement in [Movement::Straight, Movement::Left] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{movement:?}")),
            &movement,
            |b, &movement| {
                let banker = BankerEngine::new();
                b.iter(|| {
                    let request = movement.claim(black_box(LaneId::North));
                    banker.request(LaneId::North, request).unwrap();
                    banker.release(LaneId::North);
                });
            },
        );
    }

    group.finish();
}

/// Measures the safety probe alone with allocations outstanding on the two
/// straight-crossing lanes.
fn bench_safety_probe(c: &mut Criterion) {
    let banker = BankerEngine::new();
    banker
        .request(LaneId::North, Movement::Straight.claim(LaneId::North))
        .unwrap();
    banker
        .request(LaneId::South, Movement::Straight.claim(LaneId::South))
        .unwrap();

    c.bench_function("banker_is_safe_state", |b| {
        b.iter(|| black_box(banker.is_safe_state()));
    });
}

criterion_group!(benches, bench_request_release, bench_safety_probe);
criterion_main!(benches);
