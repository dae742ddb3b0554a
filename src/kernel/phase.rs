use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use super::cancel::{CancellationRegistry, HardStop};

#[derive(Default)]
struct PhaseState {
    epoch: Mutex<u64>,
    hard_stops: CancellationRegistry,
}

/// Process-scoped cancellation epoch.
///
/// Long-running operations take a [`PhaseGuard`] on entry and check it after
/// each unit of work; an interrupt bumps the epoch so every such check fails.
/// Components that block inside a device write cannot poll, so they register
/// a [`HardStop`] that runs on every interrupt instead.
#[derive(Clone, Default)]
pub struct PhaseController {
    state: Arc<PhaseState>,
}

impl PhaseController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        *self.state.epoch.lock()
    }

    /// Advances the epoch, runs the hard stops and returns the new phase.
    pub fn interrupt(&self) -> u64 {
        let phase = {
            let mut epoch = self.state.epoch.lock();
            *epoch += 1;
            *epoch
        };
        info!(phase, "interrupting executing methods");
        self.state.hard_stops.stop_all();
        phase
    }

    pub fn register_hard_stop(&self, stop: Arc<dyn HardStop>) {
        self.state.hard_stops.register(stop);
    }

    pub fn guard(&self) -> PhaseGuard {
        PhaseGuard {
            controller: self.clone(),
            start: self.current(),
        }
    }
}

/// The phase observed when an operation began.
#[derive(Clone)]
pub struct PhaseGuard {
    controller: PhaseController,
    start: u64,
}

impl PhaseGuard {
    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn is_current(&self) -> bool {
        self.controller.current() == self.start
    }

    pub fn interrupted(&self) -> bool {
        !self.is_current()
    }

    /// Sleeps for `period`, then reports whether the operation may continue.
    pub async fn pause(&self, period: Duration) -> bool {
        tokio::time::sleep(period).await;
        self.is_current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::cancel::FnStop;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn interrupt_advances_epoch_and_runs_stops() {
        let phase = PhaseController::new();
        let stops = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&stops);
        phase.register_hard_stop(Arc::new(FnStop::new("speaker", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })));

        let guard = phase.guard();
        assert_eq!(guard.start(), 0);
        assert!(guard.is_current());

        assert_eq!(phase.interrupt(), 1);
        assert!(guard.interrupted());
        assert!(phase.guard().is_current());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn controllers_are_isolated() {
        let a = PhaseController::new();
        let b = PhaseController::new();
        a.interrupt();
        assert_eq!(a.current(), 1);
        assert_eq!(b.current(), 0);
    }
}
