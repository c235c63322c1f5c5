//! Convenient re-exports for common usage.
//!
//! ```
//! use tessera_core::prelude::*;
//! ```

pub use crate::clock::{ClockConfig, FixedTimeSource, HybridClock, TimeSource};
pub use crate::sync::{handle_sync, prepare_sync, SyncMessage, SyncOutcome};
pub use crate::Crdt;
pub use crate::DeltaCrdt;
pub use crate::Fragment;
pub use crate::MerkleTree;
pub use crate::OpCrdt;
pub use crate::Projection;
pub use crate::Timestamp;
pub use crate::TimestampConfig;
