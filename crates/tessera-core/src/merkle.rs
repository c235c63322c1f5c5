//! Merkle-indexed causal log.
//!
//! [`MerkleTree`] records the set of timestamps a replica has seen as a
//! 4-ary trie over the base-4 digits of each timestamp's time. Leaves hold
//! the timestamps sharing a full time path, every node carries the XOR of the
//! hashes below it, and the root is path-compressed: `base` is the longest
//! prefix shared by every entry.
//!
//! The tree is a persistent value. [`insert`](MerkleTree::insert) never
//! mutates; it rebuilds a canonical tree from the full timestamp set, so the
//! result depends only on which timestamps are present and never on the
//! order they arrived in.
//!
//! # Example
//!
//! ```
//! use tessera_core::{MerkleTree, Timestamp, TimestampConfig};
//!
//! let config = TimestampConfig::default();
//! let a = Timestamp::new(1_000, 0, "aaaaaaaaaaaaaaaa", config).unwrap();
//! let b = Timestamp::new(2_000, 0, "bbbbbbbbbbbbbbbb", config).unwrap();
//!
//! let left = MerkleTree::new(config).insert(&a).insert(&b);
//! let right = MerkleTree::new(config).insert(&b).insert(&a);
//! assert_eq!(left.key(), right.key());
//! assert!(left.has(&a));
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::murmur::hash_str;
use crate::timestamp::{Timestamp, TimestampConfig};
use crate::crdt::{Crdt, DeltaCrdt};

/// A 32-bit subtree digest.
///
/// On the wire a digest is a signed 32-bit integer holding the same bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Digest(pub u32);

impl Digest {
    /// Leaf digest of one timestamp: murmur3 over its full serialized form.
    ///
    /// Digests combine by XOR, so the hash must cover the time prefix too.
    /// Hashing only the counter and node suffix would give two writes from
    /// the same node with the same counter at different milliseconds equal
    /// digests, and they would cancel out of every ancestor.
    fn of(ts: &Timestamp) -> Self {
        Digest(hash_str(&ts.to_string()))
    }
}

impl core::ops::BitXor for Digest {
    type Output = Digest;

    fn bitxor(self, rhs: Self) -> Self::Output {
        Digest(self.0 ^ rhs.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0 as i32)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.0 as i32)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DigestVisitor;

        impl<'de> serde::de::Visitor<'de> for DigestVisitor {
            type Value = Digest;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 32-bit integer")
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Digest, E> {
                if let Ok(v) = i32::try_from(v) {
                    Ok(Digest(v as u32))
                } else if let Ok(v) = u32::try_from(v) {
                    Ok(Digest(v))
                } else {
                    Err(E::custom(format_args!("digest {v} out of 32-bit range")))
                }
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Digest, E> {
                u32::try_from(v)
                    .map(Digest)
                    .map_err(|_| E::custom(format_args!("digest {v} out of 32-bit range")))
            }
        }

        deserializer.deserialize_i64(DigestVisitor)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Node {
    Leaf {
        key: Digest,
        items: Vec<Timestamp>,
    },
    Branch {
        key: Digest,
        children: [Option<Arc<Node>>; 4],
    },
}

impl Node {
    pub(crate) fn key(&self) -> Digest {
        match self {
            Node::Leaf { key, .. } | Node::Branch { key, .. } => *key,
        }
    }

    fn collect(&self, out: &mut Vec<Timestamp>) {
        match self {
            Node::Leaf { items, .. } => out.extend(items.iter().cloned()),
            Node::Branch { children, .. } => {
                for child in children.iter().flatten() {
                    child.collect(out);
                }
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            Node::Leaf { items, .. } => items.len(),
            Node::Branch { children, .. } => children.iter().flatten().map(|c| c.len()).sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Root {
    base: String,
    node: Arc<Node>,
}

/// A node located by [`MerkleTree::find_node`].
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a> {
    path: &'a str,
    node: &'a Node,
}

impl<'a> NodeRef<'a> {
    /// The full path of the located node. Longer than the requested path
    /// when the lookup landed on the compressed root.
    pub fn path(&self) -> &'a str {
        self.path
    }

    /// Digest of the located subtree.
    pub fn key(&self) -> Digest {
        self.node.key()
    }

    /// Whether the node is a leaf bucket.
    pub fn is_leaf(&self) -> bool {
        matches!(self.node, Node::Leaf { .. })
    }

    /// Every timestamp under this node, in ascending order.
    pub fn explode(&self) -> Vec<Timestamp> {
        let mut out = Vec::with_capacity(self.node.len());
        self.node.collect(&mut out);
        out
    }

    pub(crate) fn node(&self) -> &'a Node {
        self.node
    }
}

/// Persistent Merkle trie over a set of timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    config: TimestampConfig,
    root: Option<Root>,
}

impl Default for MerkleTree {
    fn default() -> Self {
        Self::new(TimestampConfig::default())
    }
}

impl MerkleTree {
    /// An empty tree.
    pub fn new(config: TimestampConfig) -> Self {
        Self { config, root: None }
    }

    /// Build a tree from any collection of timestamps. Duplicates collapse.
    pub fn build<'a, I>(config: TimestampConfig, timestamps: I) -> Self
    where
        I: IntoIterator<Item = &'a Timestamp>,
    {
        let mut buckets: BTreeMap<String, BTreeSet<Timestamp>> = BTreeMap::new();
        for ts in timestamps {
            buckets
                .entry(config.time_path(ts.time()))
                .or_default()
                .insert(ts.clone());
        }

        let mut level: BTreeMap<String, Arc<Node>> = buckets
            .into_iter()
            .map(|(path, items)| {
                let key = items
                    .iter()
                    .fold(Digest::default(), |acc, ts| acc ^ Digest::of(ts));
                let items = items.into_iter().collect();
                (path, Arc::new(Node::Leaf { key, items }))
            })
            .collect();

        while level.len() > 1 {
            let mut parents: BTreeMap<String, [Option<Arc<Node>>; 4]> = BTreeMap::new();
            for (mut path, node) in level {
                let slot = path.pop().and_then(digit_index).unwrap_or(0);
                parents.entry(path).or_default()[slot] = Some(node);
            }
            level = parents
                .into_iter()
                .map(|(path, children)| {
                    let key = children
                        .iter()
                        .flatten()
                        .fold(Digest::default(), |acc, c| acc ^ c.key());
                    (path, Arc::new(Node::Branch { key, children }))
                })
                .collect();
        }

        let root = level.pop_first().map(|(base, node)| Root { base, node });
        Self { config, root }
    }

    /// Layout of the timestamps in this tree.
    pub fn config(&self) -> &TimestampConfig {
        &self.config
    }

    /// Whether the tree holds no timestamps.
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Number of timestamps in the tree.
    pub fn len(&self) -> usize {
        self.root.as_ref().map_or(0, |r| r.node.len())
    }

    /// Root digest, `None` for the empty tree.
    pub fn key(&self) -> Option<Digest> {
        self.root.as_ref().map(|r| r.node.key())
    }

    /// The path shared by every entry, `None` for the empty tree.
    pub fn base(&self) -> Option<&str> {
        self.root.as_ref().map(|r| r.base.as_str())
    }

    /// Depth of a full time path.
    pub fn depth(&self) -> usize {
        self.config.merkle_depth()
    }

    /// A tree containing `ts` as well. Returns a cheap clone when `ts` is
    /// already present.
    pub fn insert(&self, ts: &Timestamp) -> MerkleTree {
        if self.has(ts) {
            return self.clone();
        }
        let mut all = self.explode();
        all.push(ts.clone());
        Self::build(self.config, &all)
    }

    /// Insert many timestamps at once, rebuilding only once. Returns the new
    /// tree and the timestamps that were not present before, in ascending
    /// order.
    pub fn handle_items(&self, items: &[Timestamp]) -> (MerkleTree, Vec<Timestamp>) {
        let fresh: Vec<Timestamp> = items
            .iter()
            .filter(|ts| !self.has(ts))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if fresh.is_empty() {
            return (self.clone(), fresh);
        }
        let mut all = self.explode();
        all.extend(fresh.iter().cloned());
        (Self::build(self.config, &all), fresh)
    }

    /// Whether `ts` has been recorded.
    pub fn has(&self, ts: &Timestamp) -> bool {
        let path = self.config.time_path(ts.time());
        match self.find_node(&path) {
            Some(found) if found.path() == path => match found.node() {
                Node::Leaf { items, .. } => items.binary_search(ts).is_ok(),
                Node::Branch { .. } => false,
            },
            _ => false,
        }
    }

    /// Every recorded timestamp, in ascending order.
    pub fn explode(&self) -> Vec<Timestamp> {
        match &self.root {
            Some(root) => NodeRef {
                path: &root.base,
                node: &root.node,
            }
            .explode(),
            None => Vec::new(),
        }
    }

    /// Locate the subtree at `path`.
    ///
    /// When `path` is a prefix of the root base the root itself is returned;
    /// its [`NodeRef::path`] is then longer than the requested path.
    pub fn find_node<'a>(&'a self, path: &'a str) -> Option<NodeRef<'a>> {
        let root = self.root.as_ref()?;
        if root.base.starts_with(path) {
            return Some(NodeRef {
                path: &root.base,
                node: &root.node,
            });
        }
        let rest = path.strip_prefix(root.base.as_str())?;

        let mut node: &Node = &root.node;
        for digit in rest.chars() {
            let index = digit_index(digit)?;
            match node {
                Node::Branch { children, .. } => node = children[index].as_deref()?,
                Node::Leaf { .. } => return None,
            }
        }
        Some(NodeRef { path, node })
    }

    /// Render the trie as an indented outline, one node per line.
    pub fn debug_outline(&self) -> String {
        let mut out = String::new();
        if let Some(root) = &self.root {
            outline(&root.node, &root.base, 0, &mut out);
        }
        out
    }
}

fn outline(node: &Node, path: &str, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    match node {
        Node::Leaf { key, items } => {
            out.push_str(&format!("{pad}{path} leaf {key} ({} items)\n", items.len()));
        }
        Node::Branch { key, children } => {
            out.push_str(&format!("{pad}{path} branch {key}\n"));
            for (digit, child) in children.iter().enumerate() {
                if let Some(child) = child {
                    let child_path = format!("{path}{digit}");
                    outline(child, &child_path, indent + 1, out);
                }
            }
        }
    }
}

pub(crate) fn digit_index(digit: char) -> Option<usize> {
    match digit {
        '0'..='3' => Some(digit as usize - '0' as usize),
        _ => None,
    }
}

impl Crdt for MerkleTree {
    /// Set union of the recorded timestamps.
    fn merge(&mut self, other: &Self) {
        let (merged, _) = self.handle_items(&other.explode());
        *self = merged;
    }
}

impl DeltaCrdt for MerkleTree {
    type Delta = Vec<Timestamp>;

    fn delta(&self, other: &Self) -> Vec<Timestamp> {
        self.explode().into_iter().filter(|ts| !other.has(ts)).collect()
    }

    fn apply_delta(&mut self, delta: &Vec<Timestamp>) {
        let (merged, _) = self.handle_items(delta);
        *self = merged;
    }
}

impl<'a> Extend<&'a Timestamp> for MerkleTree {
    fn extend<T: IntoIterator<Item = &'a Timestamp>>(&mut self, iter: T) {
        let items: Vec<Timestamp> = iter.into_iter().cloned().collect();
        let (merged, _) = self.handle_items(&items);
        *self = merged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(time: u64, counter: u64, id: &str) -> Timestamp {
        Timestamp::new(time, counter, id, TimestampConfig::default()).unwrap()
    }

    fn tree(items: &[Timestamp]) -> MerkleTree {
        MerkleTree::build(TimestampConfig::default(), items)
    }

    #[test]
    fn empty_tree() {
        let t = MerkleTree::default();
        assert!(t.is_empty());
        assert_eq!(t.key(), None);
        assert_eq!(t.base(), None);
        assert!(t.explode().is_empty());
        assert!(t.find_node("").is_none());
    }

    #[test]
    fn single_item_is_a_leaf_at_full_depth() {
        let a = ts(1_602_623_793, 0, "0000000000000001");
        let t = MerkleTree::default().insert(&a);
        assert_eq!(t.base().map(str::len), Some(24));
        assert_eq!(t.key(), Some(Digest(hash_str(&a.to_string()))));
        assert!(t.find_node("").unwrap().is_leaf());
        assert!(t.has(&a));
    }

    #[test]
    fn identical_inserts_agree_across_replicas() {
        let a = ts(1_602_623_793, 0, "0000000000000001");
        let left = MerkleTree::default().insert(&a);
        let right = MerkleTree::default().insert(&a);
        assert_eq!(left.key(), right.key());
        assert_eq!(left, right);
    }

    #[test]
    fn insert_is_idempotent() {
        let a = ts(1000, 0, "aaaaaaaaaaaaaaaa");
        let b = ts(5000, 2, "bbbbbbbbbbbbbbbb");
        let once = tree(&[a.clone(), b.clone()]);
        let twice = once.insert(&a).insert(&b);
        assert_eq!(once, twice);
        assert_eq!(twice.len(), 2);
    }

    #[test]
    fn base_is_common_prefix() {
        let config = TimestampConfig::default();
        let a = ts(0b0000, 0, "aaaaaaaaaaaaaaaa");
        let b = ts(0b0011, 0, "bbbbbbbbbbbbbbbb");
        let t = tree(&[a.clone(), b.clone()]);
        let pa = config.time_path(a.time());
        let pb = config.time_path(b.time());
        let common: String = pa
            .chars()
            .zip(pb.chars())
            .take_while(|(x, y)| x == y)
            .map(|(x, _)| x)
            .collect();
        assert_eq!(t.base(), Some(common.as_str()));
        assert_eq!(t.key(), Some(Digest::of(&a) ^ Digest::of(&b)));
    }

    #[test]
    fn same_millisecond_items_share_a_leaf() {
        let a = ts(4242, 0, "aaaaaaaaaaaaaaaa");
        let b = ts(4242, 1, "aaaaaaaaaaaaaaaa");
        let t = tree(&[b.clone(), a.clone()]);
        let a_path = a.time_path();
        let found = t.find_node(&a_path).unwrap();
        assert!(found.is_leaf());
        assert_eq!(found.explode(), vec![a, b]);
    }

    #[test]
    fn same_suffix_different_time_does_not_cancel() {
        let a = ts(1000, 0, "aaaaaaaaaaaaaaaa");
        let b = ts(2000, 0, "aaaaaaaaaaaaaaaa");
        let t = tree(&[a.clone()]);
        let u = tree(&[a, b]);
        assert_ne!(t.key(), u.key());
        assert_ne!(u.key(), Some(Digest(0)));
    }

    #[test]
    fn find_node_walks_below_base() {
        let a = ts(1 << 40, 0, "aaaaaaaaaaaaaaaa");
        let b = ts(1 << 41, 0, "bbbbbbbbbbbbbbbb");
        let t = tree(&[a.clone(), b.clone()]);
        let base = t.base().unwrap().to_string();

        let root = t.find_node("").unwrap();
        assert_eq!(root.path(), base);
        assert_eq!(root.key(), t.key().unwrap());

        let a_path = a.time_path();
        let leaf = t.find_node(&a_path).unwrap();
        assert_eq!(leaf.path(), a.time_path());
        assert_eq!(leaf.explode(), vec![a]);

        let mut missing = base.clone();
        missing.push('3');
        assert!(t.find_node(&missing).is_none());
        assert!(t.find_node("3").is_none());
    }

    #[test]
    fn handle_items_reports_only_new() {
        let a = ts(1000, 0, "aaaaaaaaaaaaaaaa");
        let b = ts(2000, 0, "bbbbbbbbbbbbbbbb");
        let t = tree(&[a.clone()]);
        let (t2, fresh) = t.handle_items(&[a.clone(), b.clone(), b.clone()]);
        assert_eq!(fresh, vec![b.clone()]);
        assert_eq!(t2.explode(), vec![a, b]);
    }

    #[test]
    fn merge_is_union() {
        let a = ts(1000, 0, "aaaaaaaaaaaaaaaa");
        let b = ts(2000, 0, "bbbbbbbbbbbbbbbb");
        let c = ts(3000, 0, "cccccccccccccccc");
        let mut left = tree(&[a.clone(), b.clone()]);
        let right = tree(&[b.clone(), c.clone()]);
        left.merge(&right);
        assert_eq!(left, tree(&[a, b, c]));
    }

    #[test]
    fn digest_wire_format_is_signed() {
        let d = Digest(0xFFFF_FFFF);
        assert_eq!(serde_json::to_string(&d).unwrap(), "-1");
        assert_eq!(serde_json::from_str::<Digest>("-1").unwrap(), d);
        assert_eq!(serde_json::from_str::<Digest>("4294967295").unwrap(), d);
        assert!(serde_json::from_str::<Digest>("4294967296").is_err());
    }
}
