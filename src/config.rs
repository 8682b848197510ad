//! Driver configuration
//!
//! Tunables for the protocol driver and wire codec. All values have
//! conservative defaults suitable for a serial-speed conduit.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{LinkError, Result};

/// Configuration for a [`ProtocolDriver`](crate::protocol::driver::ProtocolDriver)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Default deadline for a command's response
    pub response_timeout: Duration,
    /// Upper bound on a decoded frame's payload size
    pub max_frame_len: usize,
    /// Capacity of the unsolicited-event broadcast channel
    pub event_buffer: usize,
    /// Size of the receive loop's read chunk
    pub read_chunk: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(5),
            max_frame_len: 1024,
            event_buffer: 64,
            read_chunk: 512,
        }
    }
}

impl DriverConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.response_timeout.is_zero() {
            return Err(LinkError::config("response_timeout must be non-zero"));
        }
        if self.max_frame_len < 8 {
            return Err(LinkError::config("max_frame_len must be at least 8"));
        }
        if self.event_buffer == 0 {
            return Err(LinkError::config("event_buffer must be non-zero"));
        }
        if self.read_chunk == 0 {
            return Err(LinkError::config("read_chunk must be non-zero"));
        }
        Ok(())
    }
}
