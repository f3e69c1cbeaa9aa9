use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use runsheet_core::graph::DependencyGraphValidator;
use runsheet_core::model::{ContainerKind, Level, NodeId, Order, ParentId, SiblingNode};
use runsheet_core::ordering::{normalize, validate_ordering};
use runsheet_core::resolve::{ScopeHandle, resolve_scope};
use runsheet_core::store::{ParentRecord, SqliteStore};

const SIZES: [usize; 4] = [10, 100, 1_000, 10_000];

fn bench_scope() -> ScopeHandle {
    let store = SqliteStore::open_in_memory().expect("open store");
    let parent = ParentId::new("bench-step").expect("parent id");
    store
        .register_parent(&ParentRecord {
            id: parent.clone(),
            level: Level::Master,
            kind: ContainerKind::Step,
            instantiated_from: None,
        })
        .expect("register parent");
    resolve_scope(&store, &parent, Level::Master).expect("resolve scope")
}

/// `size` siblings in reverse order, each linked to the node `stride`
/// positions before it, so chains stay within the default depth bound.
fn siblings(size: usize, stride: usize) -> Vec<SiblingNode> {
    let parent = ParentId::new("bench-step").expect("parent id");
    (0..size)
        .map(|index| {
            let order = u32::try_from(size - index).expect("order fits");
            let predecessor = index
                .checked_sub(stride)
                .map(|pred| NodeId::new(format!("node-{pred:05}")).expect("node id"));
            SiblingNode::new(
                NodeId::new(format!("node-{index:05}")).expect("node id"),
                parent.clone(),
                Level::Master,
                Order::try_from(order).expect("positive order"),
            )
            .with_predecessor(predecessor)
        })
        .collect()
}

fn bench_validate(c: &mut Criterion) {
    let scope = bench_scope();
    let validator = DependencyGraphValidator::default();
    let mut group = c.benchmark_group("validate");

    for size in SIZES {
        // Deepest chain is size / stride links.
        let stride = (size / 40).max(1);
        let nodes = siblings(size, stride);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("graph", size), &nodes, |b, nodes| {
            b.iter(|| black_box(validator.validate(&scope, nodes)));
        });
        group.bench_with_input(BenchmarkId::new("ordering", size), &nodes, |b, nodes| {
            b.iter(|| black_box(validate_ordering(&scope, nodes)));
        });
        group.bench_with_input(BenchmarkId::new("normalize", size), &nodes, |b, nodes| {
            b.iter(|| black_box(normalize(&scope, nodes)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_validate);
criterion_main!(benches);
