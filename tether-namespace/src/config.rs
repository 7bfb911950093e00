//! Manager configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_core::{Error, Result};

/// Namespace manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Extension-table capacity every namespace starts with
    pub initial_slots: usize,

    /// Capacity of the peer-id notification channel
    pub event_capacity: usize,

    /// Yield to the scheduler between namespaces while a hook batch runs
    pub yield_between_hooks: bool,

    /// Microseconds a reclamation barrier sleeps between polls
    pub barrier_poll_us: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            initial_slots: 13,
            event_capacity: 256,
            yield_between_hooks: true,
            barrier_poll_us: 50,
        }
    }
}

impl ManagerConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial extension-table capacity
    #[must_use]
    pub const fn with_initial_slots(mut self, slots: usize) -> Self {
        self.initial_slots = slots;
        self
    }

    /// Set the notification channel capacity
    #[must_use]
    pub const fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Enable or disable yielding between hook invocations
    #[must_use]
    pub const fn with_yield_between_hooks(mut self, enable: bool) -> Self {
        self.yield_between_hooks = enable;
        self
    }

    /// Set the barrier poll interval in microseconds
    #[must_use]
    pub const fn with_barrier_poll_us(mut self, micros: u64) -> Self {
        self.barrier_poll_us = micros;
        self
    }

    /// Barrier poll interval as a [`Duration`]
    #[must_use]
    pub const fn barrier_poll(&self) -> Duration {
        Duration::from_micros(self.barrier_poll_us)
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] for a zero channel capacity or
    /// poll interval
    pub fn validate(&self) -> Result<()> {
        if self.event_capacity == 0 {
            return Err(Error::invalid("event_capacity must be greater than zero"));
        }
        if self.barrier_poll_us == 0 {
            return Err(Error::invalid("barrier_poll_us must be greater than zero"));
        }
        Ok(())
    }
}
