//! Protocol handler configuration

use serde::{Deserialize, Serialize};
use tether_core::{Error, Result};

/// Peer-id protocol configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtnlConfig {
    /// Most `RTM_NEWNSID` messages one dump page may carry
    pub dump_batch: usize,
}

impl Default for RtnlConfig {
    fn default() -> Self {
        Self { dump_batch: 64 }
    }
}

impl RtnlConfig {
    /// Set the dump page size
    #[must_use]
    pub const fn with_dump_batch(mut self, batch: usize) -> Self {
        self.dump_batch = batch;
        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] for an empty dump page
    pub fn validate(&self) -> Result<()> {
        if self.dump_batch == 0 {
            return Err(Error::invalid("dump_batch must be greater than zero"));
        }
        Ok(())
    }
}
