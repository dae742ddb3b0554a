//! Edge detection over the daemon's press and gesture counters.
//!
//! The daemon only exposes running counters, so "next action" means "a
//! counter moved since the previous call in this process".

use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::debug;

use super::args::CallArgs;
use crate::error::{BridgeError, Result};
use crate::kernel::{Deadline, PhaseController, PhaseGuard, POLL_INTERVAL};
use crate::modules::ModuleHandle;
use crate::protocol::Arguments;

/// Timeout of a single `get_fields` poll. A timed out poll counts as "no data".
const POLL_REQUEST_TIMEOUT: Duration = Duration::from_millis(200);

const BUTTON_COUNTERS: [&str; 3] = ["top_pressed_count", "middle_pressed_count", "bottom_pressed_count"];
const BUTTON_NAMES: [&str; 3] = ["top", "middle", "bottom"];
const GESTURE_COUNTERS: [&str; 2] = ["num_gestures", "last_gesture"];

pub fn gesture_name(code: u64) -> Option<&'static str> {
    match code {
        1 => Some("right"),
        2 => Some("left"),
        3 => Some("up"),
        4 => Some("down"),
        _ => None,
    }
}

/// Reads `names` from one `get_fields` reply. `None` if the poll timed out or
/// any counter is missing.
async fn poll_counters<const N: usize>(handle: &ModuleHandle, names: [&str; N]) -> Result<Option<[u64; N]>> {
    let kind = handle.kind();
    let reply = handle
        .client()
        .invoke_with_timeout(kind.name(), "get_fields", Arguments::new(), Some(POLL_REQUEST_TIMEOUT))
        .await;
    let fields = match reply {
        Ok(Value::Object(fields)) => fields,
        Ok(_) => Map::new(),
        Err(BridgeError::RequestTimeout { .. }) => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut counts = [0u64; N];
    for (slot, name) in counts.iter_mut().zip(names) {
        match fields.get(name).and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64))) {
            Some(value) => *slot = value,
            None => return Ok(None),
        }
    }
    Ok(Some(counts))
}

/// Last counters seen by the previous call, shared by all callers.
struct CounterWatch<const N: usize> {
    names: [&'static str; N],
    last: Mutex<Option<[u64; N]>>,
}

impl<const N: usize> CounterWatch<N> {
    fn new(names: [&'static str; N]) -> Self {
        Self {
            names,
            last: Mutex::new(None),
        }
    }

    /// Polls every 50 ms until `detect` finds a change against the last seen
    /// counters, the deadline passes, or the phase moves on.
    async fn next<T>(
        &self,
        handle: &ModuleHandle,
        guard: &PhaseGuard,
        deadline: Deadline,
        detect: impl Fn(&[u64; N], &[u64; N]) -> Option<T>,
    ) -> Result<Option<T>> {
        let cached = *self.last.lock();
        let seen = match cached {
            Some(counts) => counts,
            None => loop {
                if let Some(counts) = poll_counters(handle, self.names).await? {
                    *self.last.lock() = Some(counts);
                    break counts;
                }
                if deadline.expired() || !guard.pause(POLL_INTERVAL).await {
                    return Ok(None);
                }
            },
        };

        let mut latest = seen;
        let mut result = None;
        while !deadline.expired() {
            if let Some(counts) = poll_counters(handle, self.names).await? {
                latest = counts;
                result = detect(&seen, &counts);
                if result.is_some() {
                    break;
                }
            }
            if !guard.pause(POLL_INTERVAL).await {
                debug!(module = %handle.kind(), "poll interrupted");
                break;
            }
        }
        *self.last.lock() = Some(latest);
        Ok(result)
    }
}

pub struct ButtonsService {
    buttons: ModuleHandle,
    phase: PhaseController,
    watch: CounterWatch<3>,
}

impl ButtonsService {
    pub fn new(buttons: ModuleHandle, phase: PhaseController) -> Self {
        Self {
            buttons,
            phase,
            watch: CounterWatch::new(BUTTON_COUNTERS),
        }
    }

    pub async fn dispatch(&self, method: &str, mut args: CallArgs) -> Result<Option<Value>> {
        match method {
            "get_next_action" => {
                let timeout: Option<f64> = args.optional(0, "timeout")?;
                args.finish()?;
                Ok(Some(self.get_next_action(timeout).await?.into()))
            }
            _ => Ok(None),
        }
    }

    /// `"top"`, `"middle"` or `"bottom"`, checked in that order; `None` on
    /// timeout or interrupt.
    pub async fn get_next_action(&self, timeout: Option<f64>) -> Result<Option<&'static str>> {
        let guard = self.phase.guard();
        let deadline = Deadline::after_secs(timeout)?;
        self.watch
            .next(&self.buttons, &guard, deadline, |seen, now| {
                (0..3).find(|&i| now[i] > seen[i]).map(|i| BUTTON_NAMES[i])
            })
            .await
    }
}

pub struct GestureService {
    light_sensor: ModuleHandle,
    phase: PhaseController,
    watch: CounterWatch<2>,
}

impl GestureService {
    pub fn new(light_sensor: ModuleHandle, phase: PhaseController) -> Self {
        Self {
            light_sensor,
            phase,
            watch: CounterWatch::new(GESTURE_COUNTERS),
        }
    }

    pub async fn dispatch(&self, method: &str, mut args: CallArgs) -> Result<Option<Value>> {
        match method {
            "get_next_gesture" => {
                let timeout: Option<f64> = args.optional(0, "timeout")?;
                args.finish()?;
                Ok(Some(self.get_next_gesture(timeout).await?.into()))
            }
            _ => Ok(None),
        }
    }

    /// `"right"`, `"left"`, `"up"` or `"down"`; `None` on timeout or interrupt.
    ///
    /// A new gesture with an unknown code ends the wait with `None`.
    pub async fn get_next_gesture(&self, timeout: Option<f64>) -> Result<Option<&'static str>> {
        let guard = self.phase.guard();
        let deadline = Deadline::after_secs(timeout)?;
        let gesture = self
            .watch
            .next(&self.light_sensor, &guard, deadline, |seen, now| {
                (now[0] > seen[0] && now[1] > 0).then_some(now[1])
            })
            .await?;
        Ok(gesture.and_then(gesture_name))
    }
}
