//! # tessera-store
//!
//! Persistence backends for [`tessera-core`](tessera_core) documents.
//!
//! A store keeps, per document, its identity record (id, node id, metadata)
//! and an append-only log of [`Fragment`](tessera_core::Fragment)s keyed by
//! timestamp. The projection and the Merkle index are never stored; a
//! session rebuilds both by replaying the log.
//!
//! ## Quick Start
//!
//! ```
//! use serde_json::json;
//! use tessera_store::{DocumentRecord, DocumentStore, MemoryStore};
//! use tessera_core::Fragment;
//!
//! let store = MemoryStore::new();
//! store.add_document(&DocumentRecord::new("doc", "aaaaaaaaaaaaaaaa")).unwrap();
//!
//! let fragment = Fragment {
//!     document_id: "doc".into(),
//!     timestamp: "00000000000A0000aaaaaaaaaaaaaaaa".into(),
//!     table: "todos".into(),
//!     row: "1".into(),
//!     column: "title".into(),
//!     value: json!("milk"),
//! };
//! assert_eq!(store.add_fragments("doc", &[fragment.clone()]).unwrap(), 1);
//! assert_eq!(store.add_fragments("doc", &[fragment]).unwrap(), 0);
//! ```
//!
//! ## Backends
//!
//! | Backend | Feature flag | Use case |
//! |---------|-------------|----------|
//! | [`MemoryStore`] | *(always available)* | Testing, prototyping |
//! | `SqliteStore` | `sqlite` | Edge Linux, mobile, desktop |

#![warn(missing_docs)]

mod memory;
mod notify;
#[cfg(feature = "sqlite")]
mod sqlite;
mod traits;

pub use memory::{MemoryError, MemoryStore};
pub use notify::{Notifier, StoreCallback, StoreEvent, SubscriptionId};
#[cfg(feature = "sqlite")]
pub use sqlite::{JournalMode, SqliteConfig, SqliteError, SqliteStore, StoreStats};
pub use traits::{DocumentRecord, DocumentStore};
