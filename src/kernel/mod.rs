//! Cooperative cancellation: the phase epoch and the hard-stop registry.

pub mod cancel;
pub mod phase;
pub mod time;

pub use cancel::{CancellationRegistry, FnStop, HardStop};
pub use phase::{PhaseController, PhaseGuard};
pub use time::{timeout_from_secs, Deadline, POLL_INTERVAL};
