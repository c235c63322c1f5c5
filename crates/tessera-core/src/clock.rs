//! Hybrid Logical Clock (HLC) for causal ordering.
//!
//! HLC combines physical time with a logical counter to provide:
//! - **Monotonic timestamps** even when the physical clock goes backward
//! - **Causal ordering**: every timestamp a clock produces is greater than
//!   every timestamp it has produced or observed before
//! - **Fixed width** serialization, so timestamps sort as plain strings
//!
//! The clock also enforces a drift bound: it refuses to run its logical time
//! more than [`ClockConfig::max_drift`] ahead of the wall clock, which keeps a
//! misconfigured or hostile peer from dragging every replica into the future.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tessera_core::clock::{ClockConfig, FixedTimeSource, HybridClock};
//!
//! let time = Arc::new(FixedTimeSource::new(1_602_632_453_863));
//! let mut clock =
//!     HybridClock::with_time_source("12345678azertyui", ClockConfig::default(), time.clone())
//!         .unwrap();
//!
//! let ts1 = clock.send().unwrap();
//! let ts2 = clock.send().unwrap();
//! assert!(ts2 > ts1);
//! assert_eq!(ts2.counter(), 1);
//! ```

use core::cmp;
use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ClockError, TimestampError};
use crate::timestamp::{Timestamp, TimestampConfig};

/// Source of physical time in milliseconds.
pub trait TimeSource: Send + Sync {
    /// Current wall time in milliseconds.
    fn now_millis(&self) -> u64;
}

/// Wall time from [`std::time::SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// A manually driven time source for tests and simulations.
#[derive(Debug, Default)]
pub struct FixedTimeSource {
    now: AtomicU64,
}

impl FixedTimeSource {
    /// Create a source frozen at `millis`.
    pub fn new(millis: u64) -> Self {
        Self {
            now: AtomicU64::new(millis),
        }
    }

    /// Move the source to an absolute time.
    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    /// Move the source forward (or backward for negative deltas).
    pub fn advance(&self, delta: i64) {
        let current = self.now.load(Ordering::SeqCst);
        self.now
            .store(current.saturating_add_signed(delta), Ordering::SeqCst);
    }
}

impl TimeSource for FixedTimeSource {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Configuration for a [`HybridClock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockConfig {
    /// Layout of the timestamps this clock produces.
    pub timestamp: TimestampConfig,
    /// How far logical time may run ahead of wall time.
    pub max_drift: Duration,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            timestamp: TimestampConfig::default(),
            max_drift: Duration::from_secs(60),
        }
    }
}

impl ClockConfig {
    /// Replace the timestamp layout.
    pub fn with_timestamp(mut self, timestamp: TimestampConfig) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Replace the drift bound.
    pub fn with_max_drift(mut self, max_drift: Duration) -> Self {
        self.max_drift = max_drift;
        self
    }

    fn max_drift_ms(&self) -> u64 {
        u64::try_from(self.max_drift.as_millis()).unwrap_or(u64::MAX)
    }
}

/// A Hybrid Logical Clock instance for a single node.
///
/// Call [`send`](HybridClock::send) to generate timestamps for local events.
/// Call [`receive`](HybridClock::receive) when processing a remote timestamp.
///
/// Cloning a clock is cheap and gives an independent copy sharing the same
/// time source.
#[derive(Clone)]
pub struct HybridClock {
    config: ClockConfig,
    current: Timestamp,
    time_source: Arc<dyn TimeSource>,
}

impl fmt::Debug for HybridClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HybridClock")
            .field("config", &self.config)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl HybridClock {
    /// Create a new clock for the given node using system time.
    pub fn new(node_id: impl Into<String>, config: ClockConfig) -> Result<Self, ClockError> {
        Self::with_time_source(node_id, config, Arc::new(SystemTimeSource))
    }

    /// Create a clock with a custom physical time source.
    pub fn with_time_source(
        node_id: impl Into<String>,
        config: ClockConfig,
        time_source: Arc<dyn TimeSource>,
    ) -> Result<Self, ClockError> {
        let current = Timestamp::new(0, 0, node_id, config.timestamp)?;
        Ok(Self {
            config,
            current,
            time_source,
        })
    }

    /// Fast-forward the clock to a previously observed timestamp, keeping this
    /// clock's node id. Timestamps older than the current state are ignored.
    pub fn restore(&mut self, latest: &Timestamp) -> Result<(), ClockError> {
        let candidate = Timestamp::new(
            latest.time(),
            latest.counter(),
            self.current.id().to_string(),
            self.config.timestamp,
        )?;
        if candidate > self.current {
            self.current = candidate;
        }
        Ok(())
    }

    /// Generate a timestamp for a local event.
    ///
    /// Guarantees monotonically increasing timestamps even if the
    /// physical clock goes backward.
    pub fn send(&mut self) -> Result<Timestamp, ClockError> {
        let wall = self.time_source.now_millis();
        self.check_wall(wall)?;

        let (time, counter) = if wall > self.current.time() {
            (wall, 0)
        } else {
            (self.current.time(), self.next_counter(self.current.counter())?)
        };

        self.advance(wall, time, counter)
    }

    /// Update the clock upon receiving a remote timestamp.
    ///
    /// Returns a new timestamp that is strictly greater than both
    /// the local clock and the received timestamp.
    pub fn receive(&mut self, remote: &Timestamp) -> Result<Timestamp, ClockError> {
        let wall = self.time_source.now_millis();
        self.check_wall(wall)?;

        let local = &self.current;
        let (time, counter) = if wall > local.time() && wall > remote.time() {
            (wall, 0)
        } else if local.time() == remote.time() {
            let seen = cmp::max(local.counter(), remote.counter());
            (local.time(), self.next_counter(seen)?)
        } else if remote.time() > local.time() {
            (remote.time(), self.next_counter(remote.counter())?)
        } else {
            (local.time(), self.next_counter(local.counter())?)
        };

        self.advance(wall, time, counter)
    }

    /// The node id this clock stamps onto its timestamps.
    pub fn node_id(&self) -> &str {
        self.current.id()
    }

    /// The last generated or merged timestamp.
    pub fn current(&self) -> &Timestamp {
        &self.current
    }

    /// This clock's configuration.
    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    fn check_wall(&self, wall: u64) -> Result<(), ClockError> {
        let max = self.config.timestamp.time_max();
        if wall > max {
            return Err(TimestampError::TimeOverflow { max }.into());
        }
        Ok(())
    }

    fn next_counter(&self, counter: u64) -> Result<u64, ClockError> {
        counter.checked_add(1).ok_or_else(|| {
            TimestampError::CounterOverflow {
                max: self.config.timestamp.counter_max(),
            }
            .into()
        })
    }

    fn advance(&mut self, wall: u64, time: u64, counter: u64) -> Result<Timestamp, ClockError> {
        let max_drift = self.config.max_drift_ms();
        if time.saturating_sub(wall) > max_drift {
            return Err(ClockError::DriftExceeded {
                logical: time,
                wall,
                max_drift,
            });
        }
        let next = Timestamp::new(
            time,
            counter,
            self.current.id().to_string(),
            self.config.timestamp,
        )?;
        self.current = next.clone();
        Ok(next)
    }
}
