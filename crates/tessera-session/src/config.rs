use std::fmt;
use std::sync::Arc;

use tessera_core::clock::{ClockConfig, SystemTimeSource, TimeSource};

/// Configuration shared by every session a [`Replica`](crate::Replica) opens.
#[derive(Clone)]
pub struct SessionConfig {
    /// Clock layout and drift bound.
    pub clock: ClockConfig,
    /// Commands that may queue for one document before callers wait.
    pub mailbox_capacity: usize,
    /// Buffered change events per subscriber before slow ones lag.
    pub event_capacity: usize,
    /// Wall clock for every session.
    pub time_source: Arc<dyn TimeSource>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            clock: ClockConfig::default(),
            mailbox_capacity: 64,
            event_capacity: 256,
            time_source: Arc::new(SystemTimeSource),
        }
    }
}

impl SessionConfig {
    /// Replace the clock configuration.
    pub fn with_clock(mut self, clock: ClockConfig) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the command mailbox capacity. Zero is raised to one.
    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity.max(1);
        self
    }

    /// Replace the event buffer capacity. Zero is raised to one.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Replace the wall clock.
    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        self
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("clock", &self.clock)
            .field("mailbox_capacity", &self.mailbox_capacity)
            .field("event_capacity", &self.event_capacity)
            .finish_non_exhaustive()
    }
}
