//! # tessera-core
//!
//! The replication core of a local-first sync engine.
//!
//! Every replica records its writes as [`Fragment`]s: one value written to one
//! `table/row/column` cell, stamped by a [`HybridClock`]. Replicas reconcile
//! by comparing [`MerkleTree`] digests over the timestamps they have seen and
//! exchanging only what the other side is missing. Received fragments are
//! folded into a [`Projection`] with a last-writer-wins rule, so every replica
//! that has seen the same fragments shows the same data.
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use serde_json::json;
//! use tessera_core::prelude::*;
//!
//! let time = Arc::new(FixedTimeSource::new(1_602_632_453_863));
//! let mut clock =
//!     HybridClock::with_time_source("aaaaaaaaaaaaaaaa", ClockConfig::default(), time).unwrap();
//!
//! let ts = clock.send().unwrap();
//! let fragment = Fragment::new("doc", &ts, "todos", "1", "title", json!("milk"));
//!
//! let tree = MerkleTree::default().insert(&ts);
//! let mut view = Projection::new();
//! view.apply(&fragment);
//!
//! assert!(tree.has(&ts));
//! assert_eq!(view.get("todos", "1", "title"), Some(&json!("milk")));
//! ```
//!
//! ## Modules
//!
//! - [`timestamp`]: fixed-width sortable timestamps
//! - [`clock`]: hybrid logical clock with a drift bound
//! - [`merkle`]: the causal index
//! - [`sync`]: the Merkle diff protocol
//! - [`projection`]: last-writer-wins document view

#![warn(missing_docs)]

mod crdt;
mod error;
mod fragment;

pub mod clock;
pub mod ids;
pub mod merkle;
pub mod murmur;
pub mod prelude;
pub mod projection;
pub mod sync;
pub mod timestamp;

pub use clock::{ClockConfig, FixedTimeSource, HybridClock, SystemTimeSource, TimeSource};
pub use crdt::{Crdt, DeltaCrdt, OpCrdt};
pub use error::{ClockError, SyncError, TimestampError};
pub use fragment::Fragment;
pub use merkle::{Digest, MerkleTree, NodeRef};
pub use projection::{Projection, Row, Table};
pub use sync::{handle_all, handle_sync, prepare_sync, Children, SyncMessage, SyncOutcome};
pub use timestamp::{Timestamp, TimestampConfig};
