use std::time::{Duration, Instant};

use crate::error::{BridgeError, Result};

/// Sleep between two polls of a cancellable loop.
pub const POLL_MS: u64 = 50;

pub const POLL_INTERVAL: Duration = Duration::from_millis(POLL_MS);

/// Optional deadline measured from construction. `None` never expires.
/// Converts caller-supplied seconds into a timeout.
///
/// Negative values clamp to zero. A value too large to schedule means no
/// limit; NaN and infinities are rejected.
pub fn timeout_from_secs(secs: f64) -> Result<Option<Duration>> {
    if !secs.is_finite() {
        return Err(BridgeError::invalid(format!(
            "timeout must be a finite number of seconds, got {}",
            secs
        )));
    }
    let Ok(timeout) = Duration::try_from_secs_f64(secs.max(0.0)) else {
        return Ok(None);
    };
    Ok(Instant::now().checked_add(timeout).map(|_| timeout))
}

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Option<Instant>,
}

impl Deadline {
    pub fn after(timeout: Option<Duration>) -> Self {
        Self {
            expires_at: timeout.and_then(|t| Instant::now().checked_add(t)),
        }
    }

    /// From a timeout in (possibly fractional) seconds. Negative means already expired.
    pub fn after_secs(timeout: Option<f64>) -> Result<Self> {
        Ok(Self::after(timeout.map(timeout_from_secs).transpose()?.flatten()))
    }

    pub fn never() -> Self {
        Self { expires_at: None }
    }

    pub fn expired(&self) -> bool {
        self.expires_at
            .map(|at| Instant::now() >= at)
            .unwrap_or(false)
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}
