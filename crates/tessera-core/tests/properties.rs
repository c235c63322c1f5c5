//! Property tests for the clock, the causal index, the diff protocol and the
//! last-writer-wins projection.

use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;

use tessera_core::prelude::*;
use tessera_core::sync::handle_all;

const NODES: [&str; 3] = ["aaaaaaaaaaaaaaaa", "bbbbbbbbbbbbbbbb", "cccccccccccccccc"];
const START: u64 = 1_600_000_000_000;

fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    let time = prop_oneof![0u64..64, 0u64..(1 << 20), START..START + 100_000];
    (time, 0u64..4, 0usize..NODES.len()).prop_map(|(time, counter, node)| {
        Timestamp::new(time, counter, NODES[node], TimestampConfig::default()).unwrap()
    })
}

fn tree_of(items: &[Timestamp]) -> MerkleTree {
    items
        .iter()
        .fold(MerkleTree::default(), |tree, ts| tree.insert(ts))
}

/// Run a full exchange started by `a`, applying pushed items before the
/// messages that travel with them. Returns the number of hops.
fn converge(a: &mut MerkleTree, b: &mut MerkleTree) -> usize {
    let mut inbox = vec![prepare_sync(a)];
    let mut items: Vec<Timestamp> = Vec::new();
    let mut hops = 0;
    let (mut to, mut from) = (b, a);
    while !inbox.is_empty() || !items.is_empty() {
        hops += 1;
        assert!(hops < 500, "exchange did not terminate");
        to.apply_delta(&items);
        let out = handle_all(to, &inbox).unwrap();
        inbox = out.responses;
        items = out.items;
        std::mem::swap(&mut to, &mut from);
    }
    hops
}

#[derive(Debug, Clone)]
enum ClockOp {
    Send,
    Receive { offset: i64, counter: u64, node: usize },
    Tick(i64),
}

fn clock_op_strategy() -> impl Strategy<Value = ClockOp> {
    prop_oneof![
        Just(ClockOp::Send),
        (-100_000i64..70_000, 0u64..100, 1usize..NODES.len())
            .prop_map(|(offset, counter, node)| ClockOp::Receive { offset, counter, node }),
        (-5_000i64..5_000).prop_map(ClockOp::Tick),
    ]
}

proptest! {
    #[test]
    fn clock_is_monotonic(ops in prop::collection::vec(clock_op_strategy(), 1..200)) {
        let time = Arc::new(FixedTimeSource::new(START));
        let mut clock =
            HybridClock::with_time_source(NODES[0], ClockConfig::default(), time.clone()).unwrap();
        let mut seen: Option<Timestamp> = None;

        for op in ops {
            let (result, observed) = match op {
                ClockOp::Send => (clock.send(), None),
                ClockOp::Receive { offset, counter, node } => {
                    let remote_time = time.now_millis().saturating_add_signed(offset);
                    let remote = Timestamp::new(
                        remote_time,
                        counter,
                        NODES[node],
                        TimestampConfig::default(),
                    )
                    .unwrap();
                    (clock.receive(&remote), Some(remote))
                }
                ClockOp::Tick(delta) => {
                    time.advance(delta);
                    continue;
                }
            };
            let Ok(ts) = result else { continue };
            if let Some(prev) = &seen {
                prop_assert!(&ts > prev, "{ts} not after {prev}");
                prop_assert!(ts.to_string() > prev.to_string());
            }
            if let Some(remote) = &observed {
                prop_assert!(&ts > remote);
            }
            seen = Some(ts);
        }
    }

    #[test]
    fn insert_is_idempotent(
        items in prop::collection::vec(timestamp_strategy(), 0..40),
        extra in timestamp_strategy(),
    ) {
        let tree = tree_of(&items).insert(&extra);
        let again = tree.insert(&extra);
        prop_assert_eq!(&again, &tree);
        prop_assert!(again.has(&extra));
    }

    #[test]
    fn insertion_order_does_not_matter(
        (items, shuffled) in prop::collection::vec(timestamp_strategy(), 1..40)
            .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
    ) {
        let left = tree_of(&items);
        let right = tree_of(&shuffled);
        prop_assert_eq!(left.key(), right.key());
        prop_assert_eq!(&left, &right);
        prop_assert_eq!(&left, &MerkleTree::build(TimestampConfig::default(), &items));
    }

    #[test]
    fn exchange_is_complete(
        shared in prop::collection::vec(timestamp_strategy(), 0..20),
        only_a in prop::collection::vec(timestamp_strategy(), 0..20),
        only_b in prop::collection::vec(timestamp_strategy(), 0..20),
    ) {
        let mut a = tree_of(&[shared.clone(), only_a.clone()].concat());
        let mut b = tree_of(&[shared.clone(), only_b.clone()].concat());
        converge(&mut a, &mut b);

        let expected = tree_of(&[shared, only_a, only_b].concat());
        prop_assert_eq!(a.key(), b.key());
        prop_assert_eq!(a.explode(), b.explode());
        prop_assert_eq!(&a, &expected);
    }

    #[test]
    fn projection_converges_in_any_order(
        (writes, shuffled) in prop::collection::vec(
            (timestamp_strategy(), 0usize..3, 0usize..3, 0i64..100),
            0..50,
        )
        .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
    ) {
        let to_fragment = |(ts, row, column, value): &(Timestamp, usize, usize, i64)| {
            Fragment::new("doc", ts, "t", format!("r{row}"), format!("c{column}"), json!(value))
        };
        let mut left = Projection::new();
        for w in &writes {
            left.apply(&to_fragment(w));
        }
        let mut right = Projection::new();
        for w in &shuffled {
            right.apply(&to_fragment(w));
        }
        prop_assert_eq!(&left, &right);
    }
}

#[test]
fn overlapping_replicas_meet_in_one_round_trip() {
    let config = TimestampConfig::default();
    let x = Timestamp::new(START, 0, NODES[0], config).unwrap();
    let y = Timestamp::new(START, 0, NODES[1], config).unwrap();
    let z = Timestamp::new(START, 0, NODES[2], config).unwrap();

    let mut a = MerkleTree::build(config, [&x, &y]);
    let mut b = MerkleTree::build(config, [&y, &z]);
    // RootBase, Response, items + Response, items.
    assert_eq!(converge(&mut a, &mut b), 4);
    assert_eq!(a.explode(), vec![x, y, z]);
    assert_eq!(a.key(), b.key());
}

#[test]
fn independent_replicas_agree_on_a_single_write() {
    let config = TimestampConfig::default();
    let ts = Timestamp::new(1_602_623_793, 0, "0000000000000001", config).unwrap();
    let a = MerkleTree::new(config).insert(&ts);
    let b = MerkleTree::new(config).insert(&ts);
    assert_eq!(a.key(), b.key());
}
