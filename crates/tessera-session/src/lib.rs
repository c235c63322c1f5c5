//! # tessera-session
//!
//! Open documents for [`tessera-core`](tessera_core) replicas.
//!
//! A [`Replica`] wraps one [`DocumentStore`](tessera_store::DocumentStore)
//! and hands out a [`DocumentSession`] per open document. Each session is a
//! single-writer actor: writes, sync merges and metadata changes queue in its
//! mailbox and run one at a time, and nothing is committed in memory until the
//! store has made it durable.
//!
//! ## Quick Start
//!
//! ```
//! use serde_json::json;
//! use tessera_session::{sync_pair, Replica, SessionConfig};
//! use tessera_store::MemoryStore;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let phone = Replica::new(MemoryStore::new(), SessionConfig::default());
//! let laptop = Replica::new(MemoryStore::new(), SessionConfig::default());
//!
//! let list = phone.create_document(json!({"name": "groceries"})).await?;
//! let row = list
//!     .insert("todos", json!({"title": "milk"}).as_object().cloned().unwrap_or_default())
//!     .await?;
//!
//! let copy = laptop.open_or_create_document(list.id(), json!({})).await?;
//! let report = sync_pair(&list, &copy, 16).await?;
//! assert!(report.converged);
//!
//! let state = copy.get_state().await?;
//! assert_eq!(state.data.get("todos", &row, "title"), Some(&json!("milk")));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod config;
mod error;
mod exchange;
mod packet;
mod replica;
mod session;

pub use config::SessionConfig;
pub use error::SessionError;
pub use exchange::{sync_pair, SyncReport};
pub use packet::SyncPacket;
pub use replica::Replica;
pub use session::{
    DocumentSession, DocumentState, FragmentsApplied, Origin, SessionResult, SessionStatus,
};
