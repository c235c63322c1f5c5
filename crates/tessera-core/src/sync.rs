//! Merkle diff protocol.
//!
//! Two replicas find the timestamps one of them is missing by walking their
//! [`MerkleTree`]s top-down and only descending where digests differ. The
//! exchange is stateless: every step is a pure function of the local tree and
//! one incoming [`SyncMessage`].
//!
//! ```text
//!   A                                   B
//!   prepare_sync ── RootBase ─────────▶ handle_sync
//!   handle_sync  ◀──────── Request ──── (bases differ)
//!   handle_sync  ── Response ─────────▶ handle_sync
//!                ◀── items + Response ─ (leaf diff)
//! ```
//!
//! [`SyncOutcome::items`] lists *local* timestamps the peer lacks; the caller
//! resolves them to full fragments and ships them along with the responses.
//! A receiver applies shipped items before it handles the messages that came
//! with them.
//!
//! # Example
//!
//! ```
//! use tessera_core::sync::{handle_sync, prepare_sync};
//! use tessera_core::{MerkleTree, Timestamp, TimestampConfig};
//!
//! let config = TimestampConfig::default();
//! let a = Timestamp::new(1_000, 0, "aaaaaaaaaaaaaaaa", config).unwrap();
//! let local = MerkleTree::new(config).insert(&a);
//! let empty = MerkleTree::new(config);
//!
//! // The empty replica asks for everything.
//! let hello = prepare_sync(&local);
//! let reply = handle_sync(&empty, &hello).unwrap();
//! assert!(reply.items.is_empty());
//!
//! // The full replica pushes what it has.
//! let pushed = handle_sync(&local, &reply.responses[0]).unwrap();
//! assert_eq!(pushed.items, vec![a]);
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SyncError;
use crate::merkle::{digit_index, Digest, MerkleTree, Node, NodeRef};
use crate::timestamp::Timestamp;

/// A sync protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncMessage {
    /// Opening announcement of a replica's root prefix and digest.
    RootBase {
        /// Common prefix of every time path in the sender's tree.
        base: String,
        /// Root digest.
        key: Digest,
    },
    /// Ask for the subtree at `path`. `key: None` means the sender has
    /// nothing there and wants everything.
    Request {
        /// Subtree path.
        path: String,
        /// Sender's digest there, if it has a node.
        key: Option<Digest>,
    },
    /// The sender's view of the subtree at `path`.
    Response {
        /// Subtree path.
        path: String,
        /// Sender's digest of the subtree.
        key: Digest,
        /// Child digests, or leaf items at full depth.
        children: Children,
    },
}

impl SyncMessage {
    /// The tree path this message refers to.
    pub fn path(&self) -> &str {
        match self {
            SyncMessage::RootBase { base, .. } => base,
            SyncMessage::Request { path, .. } | SyncMessage::Response { path, .. } => path,
        }
    }
}

/// Children of a node as sent in a [`SyncMessage::Response`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Children {
    /// Digit to digest map for an internal node.
    Digests(BTreeMap<String, Digest>),
    /// `counter ++ id` suffixes for a leaf bucket.
    Items(Vec<String>),
}

/// Result of handling one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Messages to send back to the peer.
    pub responses: Vec<SyncMessage>,
    /// Local timestamps the peer is missing.
    pub items: Vec<Timestamp>,
}

impl SyncOutcome {
    /// Whether nothing needs to be sent back.
    pub fn is_empty(&self) -> bool {
        self.responses.is_empty() && self.items.is_empty()
    }

    /// Fold another outcome into this one.
    pub fn extend(&mut self, other: SyncOutcome) {
        self.responses.extend(other.responses);
        self.items.extend(other.items);
    }
}

/// The opening message for a sync exchange.
pub fn prepare_sync(tree: &MerkleTree) -> SyncMessage {
    match (tree.base(), tree.key()) {
        (Some(base), Some(key)) => SyncMessage::RootBase {
            base: base.to_string(),
            key,
        },
        _ => SyncMessage::Request {
            path: String::new(),
            key: None,
        },
    }
}

/// Handle one incoming message against a tree snapshot.
pub fn handle_sync(tree: &MerkleTree, message: &SyncMessage) -> Result<SyncOutcome, SyncError> {
    validate_path(tree, message.path())?;
    debug!(path = message.path(), kind = message_kind(message), "handling sync message");

    let mut out = SyncOutcome::default();
    match message {
        SyncMessage::RootBase { base, key } => on_root_base(tree, base, *key, &mut out),
        SyncMessage::Request { path, key } => sync_node(tree, path, *key, &mut out),
        SyncMessage::Response {
            path,
            key,
            children,
        } => on_response(tree, path, *key, children, &mut out)?,
    }
    Ok(out)
}

/// Handle a batch of messages, concatenating the outcomes. Stops at the first
/// error.
pub fn handle_all<'a, I>(tree: &MerkleTree, messages: I) -> Result<SyncOutcome, SyncError>
where
    I: IntoIterator<Item = &'a SyncMessage>,
{
    let mut out = SyncOutcome::default();
    for message in messages {
        out.extend(handle_sync(tree, message)?);
    }
    Ok(out)
}

fn message_kind(message: &SyncMessage) -> &'static str {
    match message {
        SyncMessage::RootBase { .. } => "root_base",
        SyncMessage::Request { .. } => "request",
        SyncMessage::Response { .. } => "response",
    }
}

fn validate_path(tree: &MerkleTree, path: &str) -> Result<(), SyncError> {
    if path.len() > tree.depth() {
        return Err(SyncError::mismatch(path, "path longer than the tree depth"));
    }
    if path.chars().any(|c| digit_index(c).is_none()) {
        return Err(SyncError::mismatch(path, "path contains a non base-4 digit"));
    }
    Ok(())
}

fn on_root_base(tree: &MerkleTree, remote_base: &str, remote_key: Digest, out: &mut SyncOutcome) {
    let (Some(base), Some(key)) = (tree.base(), tree.key()) else {
        out.responses.push(SyncMessage::Request {
            path: String::new(),
            key: None,
        });
        return;
    };

    if base == remote_base {
        if key != remote_key {
            if let Some(node) = tree.find_node(base) {
                out.responses.push(response(base, node));
            }
        }
        return;
    }

    let common: String = base
        .chars()
        .zip(remote_base.chars())
        .take_while(|(a, b)| a == b)
        .map(|(a, _)| a)
        .collect();
    let local = tree.find_node(&common).map(|node| node.key());
    out.responses.push(SyncMessage::Request {
        path: common,
        key: local,
    });
}

/// Compare the local subtree at `path` with the peer's digest for it.
fn sync_node(tree: &MerkleTree, path: &str, remote: Option<Digest>, out: &mut SyncOutcome) {
    let local = tree.find_node(path);
    match (remote, local) {
        (None, Some(node)) => out.items.extend(node.explode()),
        (None, None) => {}
        (Some(_), None) => out.responses.push(SyncMessage::Request {
            path: path.to_string(),
            key: None,
        }),
        (Some(key), Some(node)) if key == node.key() => {}
        (Some(_), Some(node)) => out.responses.push(response(path, node)),
    }
}

fn on_response(
    tree: &MerkleTree,
    path: &str,
    remote_key: Digest,
    remote_children: &Children,
    out: &mut SyncOutcome,
) -> Result<(), SyncError> {
    let node = tree
        .find_node(path)
        .ok_or_else(|| SyncError::mismatch(path, "response for a path with no local node"))?;
    if node.key() == remote_key {
        return Ok(());
    }

    match (children_view(path, node), remote_children) {
        (Children::Digests(local), Children::Digests(remote)) => {
            let mut differs = false;
            for digit in ['0', '1', '2', '3'] {
                let d = digit.to_string();
                let remote_child = remote.get(&d).copied();
                if local.get(&d).copied() != remote_child {
                    differs = true;
                    sync_node(tree, &format!("{path}{digit}"), remote_child, out);
                }
            }
            if !differs {
                return Err(SyncError::mismatch(path, "equal children under unequal keys"));
            }
        }
        (Children::Items(_), Children::Items(remote)) => {
            let config = tree.config();
            let time = config.time_from_path(path)?;
            let remote: BTreeSet<&str> = remote.iter().map(String::as_str).collect();
            for suffix in &remote {
                Timestamp::from_suffix(time, suffix, config)?;
            }

            let local = node.explode();
            let local_suffixes: BTreeSet<String> = local.iter().map(Timestamp::suffix).collect();
            let local_only: Vec<Timestamp> = local
                .into_iter()
                .filter(|ts| !remote.contains(ts.suffix().as_str()))
                .collect();
            let remote_extra = remote
                .iter()
                .any(|suffix| !local_suffixes.contains(*suffix));

            if local_only.is_empty() && !remote_extra {
                return Err(SyncError::mismatch(path, "equal items under unequal keys"));
            }
            out.items.extend(local_only);
            if remote_extra {
                out.responses.push(SyncMessage::Response {
                    path: path.to_string(),
                    key: node.key(),
                    children: Children::Items(local_suffixes.into_iter().collect()),
                });
            }
        }
        _ => {
            return Err(SyncError::mismatch(
                path,
                "leaf and internal node at the same path",
            ))
        }
    }
    Ok(())
}

fn response(path: &str, node: NodeRef<'_>) -> SyncMessage {
    SyncMessage::Response {
        path: path.to_string(),
        key: node.key(),
        children: children_view(path, node),
    }
}

/// The children of `node` as seen from `path`. A node found deeper than
/// `path` through the compressed root shows up as a single child.
fn children_view(path: &str, node: NodeRef<'_>) -> Children {
    if node.path().len() > path.len() {
        let digit = node.path()[path.len()..path.len() + 1].to_string();
        return Children::Digests(BTreeMap::from([(digit, node.key())]));
    }
    match node.node() {
        Node::Leaf { items, .. } => Children::Items(items.iter().map(Timestamp::suffix).collect()),
        Node::Branch { children, .. } => Children::Digests(
            children
                .iter()
                .enumerate()
                .filter_map(|(digit, child)| {
                    child.as_ref().map(|c| (digit.to_string(), c.key()))
                })
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::TimestampConfig;

    fn ts(time: u64, counter: u64, id: &str) -> Timestamp {
        Timestamp::new(time, counter, id, TimestampConfig::default()).unwrap()
    }

    fn tree(items: &[Timestamp]) -> MerkleTree {
        MerkleTree::build(TimestampConfig::default(), items)
    }

    /// Drive an exchange to quiescence, applying pushed items before the
    /// messages that came with them.
    fn converge(a: &mut MerkleTree, b: &mut MerkleTree) -> usize {
        let mut inbox = vec![prepare_sync(a)];
        let mut items: Vec<Timestamp> = Vec::new();
        let mut rounds = 0;
        let (mut to, mut from) = (b, a);
        while !inbox.is_empty() || !items.is_empty() {
            rounds += 1;
            assert!(rounds < 200, "exchange did not terminate");
            let (next, _) = to.handle_items(&items);
            *to = next;
            let out = handle_all(to, &inbox).unwrap();
            inbox = out.responses;
            items = out.items;
            std::mem::swap(&mut to, &mut from);
        }
        rounds
    }

    #[test]
    fn empty_tree_asks_for_everything() {
        let msg = prepare_sync(&MerkleTree::default());
        assert_eq!(
            msg,
            SyncMessage::Request {
                path: String::new(),
                key: None
            }
        );
    }

    #[test]
    fn equal_roots_are_quiet() {
        let t = tree(&[ts(1000, 0, "aaaaaaaaaaaaaaaa")]);
        let out = handle_sync(&t, &prepare_sync(&t)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn request_without_key_pushes_subtree() {
        let a = ts(1000, 0, "aaaaaaaaaaaaaaaa");
        let b = ts(2000, 0, "aaaaaaaaaaaaaaaa");
        let t = tree(&[a.clone(), b.clone()]);
        let out = handle_sync(
            &t,
            &SyncMessage::Request {
                path: String::new(),
                key: None,
            },
        )
        .unwrap();
        assert_eq!(out.items, vec![a, b]);
        assert!(out.responses.is_empty());
    }

    #[test]
    fn request_for_missing_subtree_inverts_direction() {
        let t = tree(&[ts(1000, 0, "aaaaaaaaaaaaaaaa")]);
        let path = "3".to_string();
        let out = handle_sync(
            &t,
            &SyncMessage::Request {
                path: path.clone(),
                key: Some(Digest(7)),
            },
        )
        .unwrap();
        assert_eq!(out.responses, vec![SyncMessage::Request { path, key: None }]);
    }

    #[test]
    fn request_above_compressed_root_answers_single_child() {
        let a = ts(1000, 0, "aaaaaaaaaaaaaaaa");
        let t = tree(&[a.clone()]);
        let base = t.base().unwrap().to_string();
        let out = handle_sync(
            &t,
            &SyncMessage::Request {
                path: base[..3].to_string(),
                key: Some(Digest(1)),
            },
        )
        .unwrap();
        let expected = BTreeMap::from([(base[3..4].to_string(), t.key().unwrap())]);
        assert_eq!(
            out.responses,
            vec![SyncMessage::Response {
                path: base[..3].to_string(),
                key: t.key().unwrap(),
                children: Children::Digests(expected),
            }]
        );
    }

    #[test]
    fn overlapping_leaf_converges_in_one_round_trip() {
        let x = ts(1000, 0, "xxxxxxxxxxxxxxxx");
        let y = ts(1000, 0, "yyyyyyyyyyyyyyyy");
        let z = ts(1000, 0, "zzzzzzzzzzzzzzzz");
        let mut a = tree(&[x.clone(), y.clone()]);
        let mut b = tree(&[y.clone(), z.clone()]);
        converge(&mut a, &mut b);
        assert_eq!(a.explode(), vec![x, y, z]);
        assert_eq!(a.key(), b.key());
        assert_eq!(a.explode(), b.explode());
    }

    #[test]
    fn diverging_bases_converge() {
        let mut a = tree(&[ts(1 << 40, 0, "aaaaaaaaaaaaaaaa"), ts(1 << 41, 0, "aaaaaaaaaaaaaaaa")]);
        let mut b = tree(&[ts(3 << 44, 5, "bbbbbbbbbbbbbbbb")]);
        converge(&mut a, &mut b);
        assert_eq!(a.len(), 3);
        assert_eq!(a, b);
    }

    #[test]
    fn nested_bases_converge() {
        let mut a = tree(&[ts(5000, 0, "aaaaaaaaaaaaaaaa")]);
        let mut b = tree(&[ts(5000, 0, "aaaaaaaaaaaaaaaa"), ts(5001, 0, "bbbbbbbbbbbbbbbb")]);
        converge(&mut a, &mut b);
        assert_eq!(a, b);

        let mut c = tree(&[ts(9, 0, "cccccccccccccccc")]);
        converge(&mut b, &mut c);
        assert_eq!(b, c);
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn one_side_empty_converges() {
        let mut a = MerkleTree::default();
        let mut b = tree(&[ts(1, 0, "aaaaaaaaaaaaaaaa"), ts(1 << 30, 3, "bbbbbbbbbbbbbbbb")]);
        converge(&mut a, &mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn mixed_children_is_a_protocol_mismatch() {
        let a = ts(1000, 0, "aaaaaaaaaaaaaaaa");
        let t = tree(&[a.clone()]);
        let path = a.time_path();
        let err = handle_sync(
            &t,
            &SyncMessage::Response {
                path,
                key: Digest(1),
                children: Children::Digests(BTreeMap::new()),
            },
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::ProtocolMismatch { .. }));
    }

    #[test]
    fn response_for_unknown_path_is_a_protocol_mismatch() {
        let err = handle_sync(
            &MerkleTree::default(),
            &SyncMessage::Response {
                path: "0".into(),
                key: Digest(1),
                children: Children::Items(vec![]),
            },
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::ProtocolMismatch { .. }));
    }

    #[test]
    fn malformed_paths_are_rejected() {
        let t = MerkleTree::default();
        let too_long = "0".repeat(25);
        for path in ["0124", too_long.as_str()] {
            let err = handle_sync(
                &t,
                &SyncMessage::Request {
                    path: path.to_string(),
                    key: None,
                },
            )
            .unwrap_err();
            assert!(matches!(err, SyncError::ProtocolMismatch { .. }));
        }
    }

    #[test]
    fn malformed_leaf_item_is_invalid_timestamp() {
        let a = ts(1000, 0, "aaaaaaaaaaaaaaaa");
        let t = tree(&[a.clone()]);
        let err = handle_sync(
            &t,
            &SyncMessage::Response {
                path: a.time_path(),
                key: Digest(1),
                children: Children::Items(vec!["short".into()]),
            },
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::InvalidTimestamp(_)));
    }

    #[test]
    fn wire_format() {
        let msg = SyncMessage::Request {
            path: "01".into(),
            key: None,
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            serde_json::json!({"type": "Request", "path": "01", "key": null})
        );

        let msg: SyncMessage = serde_json::from_str(
            r#"{"type":"Response","path":"0","key":-5,"children":{"1":3,"2":-1}}"#,
        )
        .unwrap();
        let SyncMessage::Response { key, children, .. } = msg else {
            panic!("expected a response");
        };
        assert_eq!(key, Digest(-5i32 as u32));
        assert_eq!(
            children,
            Children::Digests(BTreeMap::from([
                ("1".to_string(), Digest(3)),
                ("2".to_string(), Digest(u32::MAX)),
            ]))
        );

        let msg: SyncMessage = serde_json::from_str(
            r#"{"type":"Response","path":"0","key":1,"children":["0000aaaaaaaaaaaaaaaa"]}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            SyncMessage::Response {
                children: Children::Items(_),
                ..
            }
        ));
    }
}
