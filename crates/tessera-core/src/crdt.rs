/// Core trait for replicated state that converges by merging.
///
/// # Properties
///
/// All implementations must satisfy:
/// - **Commutativity:** `a.merge(b) == b.merge(a)`
/// - **Associativity:** `a.merge(b.merge(c)) == a.merge(b).merge(c)`
/// - **Idempotency:** `a.merge(a) == a`
pub trait Crdt {
    /// Merge another replica's state into this one.
    ///
    /// After merging, `self` contains the least upper bound of both states.
    fn merge(&mut self, other: &Self);
}

/// Extension trait for state that can ship only what a peer is missing.
///
/// # Example
///
/// ```
/// use tessera_core::prelude::*;
///
/// let config = TimestampConfig::default();
/// let a = Timestamp::new(1, 0, "aaaaaaaaaaaaaaaa", config).unwrap();
/// let b = Timestamp::new(2, 0, "bbbbbbbbbbbbbbbb", config).unwrap();
///
/// let full = MerkleTree::build(config, [&a, &b]);
/// let mut partial = MerkleTree::build(config, [&a]);
///
/// let delta = full.delta(&partial);
/// assert_eq!(delta, vec![b]);
/// partial.apply_delta(&delta);
/// assert_eq!(partial, full);
/// ```
pub trait DeltaCrdt: Crdt {
    /// The type of delta produced by this CRDT.
    type Delta;

    /// Generate a delta containing changes in `self` that `other` does not have.
    fn delta(&self, other: &Self) -> Self::Delta;

    /// Apply a delta to this replica's state.
    fn apply_delta(&mut self, delta: &Self::Delta);
}

/// State that is built by replaying discrete operations.
///
/// Every operation is a durable event: it can be persisted in a log,
/// shipped to other replicas and replayed to rebuild the state. For
/// convergence, `apply_op` must be commutative and idempotent.
pub trait OpCrdt: Crdt {
    /// The operation type.
    type Op;

    /// Apply an operation to the current state. Returns `true` when the
    /// operation changed the state and `false` when it was stale or a
    /// duplicate.
    fn apply_op(&mut self, op: &Self::Op) -> bool;
}
