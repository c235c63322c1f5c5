use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tessera_core::prelude::*;
use tessera_core::sync::handle_all;

const NODE_A: &str = "aaaaaaaaaaaaaaaa";
const NODE_B: &str = "bbbbbbbbbbbbbbbb";

fn stamps(node: &str, start: u64, count: u64) -> Vec<Timestamp> {
    (0..count)
        .map(|i| Timestamp::new(start + i * 37, i % 3, node, TimestampConfig::default()).unwrap())
        .collect()
}

fn bench_insert(c: &mut Criterion) {
    let items = stamps(NODE_A, 1_600_000_000_000, 200);

    c.bench_function("MerkleTree::insert x200", |b| {
        b.iter(|| {
            let tree = items
                .iter()
                .fold(MerkleTree::default(), |tree, ts| tree.insert(ts));
            black_box(tree.key())
        })
    });

    c.bench_function("MerkleTree::build 200", |b| {
        b.iter(|| black_box(MerkleTree::build(TimestampConfig::default(), &items).key()))
    });
}

fn bench_exchange(c: &mut Criterion) {
    let shared = stamps(NODE_A, 1_600_000_000_000, 1_000);
    let mut left_items = shared.clone();
    left_items.extend(stamps(NODE_A, 1_600_000_100_000, 10));
    let mut right_items = shared;
    right_items.extend(stamps(NODE_B, 1_600_000_100_000, 10));

    let left = MerkleTree::build(TimestampConfig::default(), &left_items);
    let right = MerkleTree::build(TimestampConfig::default(), &right_items);

    c.bench_function("sync exchange 1000 shared / 10+10 divergent", |b| {
        b.iter(|| {
            let (mut a, mut z) = (left.clone(), right.clone());
            let mut inbox = vec![prepare_sync(&a)];
            let mut items: Vec<Timestamp> = Vec::new();
            let mut a_turn = false;
            while !inbox.is_empty() || !items.is_empty() {
                let tree = if a_turn { &mut a } else { &mut z };
                tree.apply_delta(&items);
                let out = handle_all(tree, &inbox).unwrap();
                inbox = out.responses;
                items = out.items;
                a_turn = !a_turn;
            }
            black_box((a.key(), z.key()))
        })
    });
}

criterion_group!(benches, bench_insert, bench_exchange);
criterion_main!(benches);
