use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

/// A component that cannot observe the phase counter and must be stopped
/// explicitly (audio output blocked in a device write, the voice pipeline).
pub trait HardStop: Send + Sync {
    fn name(&self) -> &str;

    fn hard_stop(&self) -> anyhow::Result<()>;
}

/// Hard stops run on every interrupt, in registration order.
#[derive(Default)]
pub struct CancellationRegistry {
    stops: Mutex<Vec<Arc<dyn HardStop>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, stop: Arc<dyn HardStop>) {
        debug!(component = stop.name(), "hard stop registered");
        self.stops.lock().push(stop);
    }

    pub fn len(&self) -> usize {
        self.stops.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.lock().is_empty()
    }

    /// Stops every component. A failing stop is logged and the rest still run.
    pub fn stop_all(&self) -> usize {
        // Snapshot so a stop may register further components without deadlocking
        let stops: Vec<_> = self.stops.lock().clone();
        let mut failures = 0;
        for stop in stops {
            if let Err(e) = stop.hard_stop() {
                warn!(component = stop.name(), error = %e, "hard stop failed");
                failures += 1;
            }
        }
        failures
    }
}

/// Adapts a closure into a [`HardStop`].
pub struct FnStop<F> {
    name: String,
    stop: F,
}

impl<F> FnStop<F>
where
    F: Fn() -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, stop: F) -> Self {
        Self {
            name: name.into(),
            stop,
        }
    }
}

impl<F> HardStop for FnStop<F>
where
    F: Fn() -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn hard_stop(&self) -> anyhow::Result<()> {
        (self.stop)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn failing_stop_does_not_skip_the_rest() {
        let registry = CancellationRegistry::new();
        let ran = Arc::new(AtomicUsize::new(0));

        registry.register(Arc::new(FnStop::new("broken", || {
            Err(anyhow::anyhow!("device gone"))
        })));
        let counter = Arc::clone(&ran);
        registry.register(Arc::new(FnStop::new("audio", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })));

        assert_eq!(registry.stop_all(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
