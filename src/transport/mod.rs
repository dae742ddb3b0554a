//! Multiplexed request/reply channel to the daemon.

pub mod connection;
pub mod router;

pub use connection::Connection;
pub use router::{Completion, CorrelationTable, Delivery, RouterHandle};

use crate::protocol::frame::DEFAULT_MAX_FRAME_SIZE;

/// Requests allowed in flight before `send` waits for a slot.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1024;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub max_in_flight: usize,
    pub max_frame_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}
