use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use frame_schema::{FlowTransition, FramePayload, ZoneCount, ZoneKey};
use timeline_core::{aggregate_flow, union_merge, FlowParams, FlowWindowFrame, PlaneProjection};

fn synthetic_frame(seed: i32, edges: i32) -> FramePayload {
    let transitions = (0..edges)
        .map(|i| FlowTransition {
            from: ZoneKey::new((i + seed) % 40 - 20, i % 17 - 8),
            to: ZoneKey::new((i * 3 + seed) % 40 - 20, (i + 5) % 17 - 8),
            weight: f64::from(1 + i % 7),
            names: Vec::new(),
        })
        .collect();
    let hotspots = (0..edges)
        .map(|i| ZoneCount {
            zone: ZoneKey::new(i % 50 - 25, (i * 7 + seed) % 50 - 25),
            count: f64::from((i * 37 + seed) % 3000),
        })
        .collect();
    FramePayload {
        hotspots,
        transitions,
        ..FramePayload::default()
    }
}

fn bench_flow(c: &mut Criterion) {
    let mut group = c.benchmark_group("flow");
    let projection = PlaneProjection::default();
    let params = FlowParams {
        min_weight: 1.0,
        max_edges: 180,
    };

    for edges in [50i32, 200, 800] {
        let frames: Vec<FlowWindowFrame> = (0..5)
            .map(|seed| FlowWindowFrame {
                id: seed as u64,
                payload: Arc::new(synthetic_frame(seed, edges)),
            })
            .collect();
        group.bench_with_input(BenchmarkId::new("aggregate", edges), &frames, |b, frames| {
            b.iter(|| aggregate_flow(frames, params, &projection))
        });
    }

    group.finish();
}

fn bench_union(c: &mut Criterion) {
    let mut group = c.benchmark_group("union");

    for zones in [100i32, 1000, 4000] {
        group.bench_with_input(BenchmarkId::new("merge", zones), &zones, |b, &zones| {
            b.iter_batched(
                || (0..5).map(|seed| synthetic_frame(seed, zones)).collect::<Vec<_>>(),
                |frames| union_merge(frames.iter(), 500),
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(flow_benches, bench_flow, bench_union);
criterion_main!(flow_benches);
