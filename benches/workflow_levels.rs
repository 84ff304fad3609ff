//! Level assignment throughput on wide fan-out/fan-in dependency graphs.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use toolmesh_engine::prelude::{Dependency, DependencyGraph};

/// A root step, `width` steps depending only on the root, and a single sink
/// step depending on all of them: three levels regardless of width.
fn fan_out_in_graph(width: usize) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    graph.add_step("root", vec![]);
    for i in 0..width {
        graph.add_step(format!("mid-{i}"), vec![Dependency::Completion("root".to_string())]);
    }
    let sink_deps = (0..width)
        .map(|i| Dependency::Completion(format!("mid-{i}")))
        .collect();
    graph.add_step("sink", sink_deps);
    graph
}

fn bench_calculate_execution_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("workflow_levels");
    for width in [8usize, 64, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            b.iter_batched(
                || fan_out_in_graph(width),
                |mut graph| {
                    graph.calculate_execution_order().unwrap();
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_calculate_execution_order);
criterion_main!(benches);
