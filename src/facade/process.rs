use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};
use crate::kernel::HardStop;

/// Builds `argv + extra` with stdio detached. `argv[0]` is the program.
pub fn detached(argv: &[String], extra: &str) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| BridgeError::Unavailable("external command (not configured)".to_string()))?;
    let mut command = Command::new(program);
    command
        .args(args)
        .arg(extra)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    Ok(command)
}

pub fn spawn(mut command: Command, what: &str) -> Result<Child> {
    command
        .spawn()
        .map_err(|e| BridgeError::Unavailable(format!("{} ({})", what, e)))
}

/// Running child processes that can all be killed at once.
#[derive(Clone)]
pub struct ChildSet {
    name: &'static str,
    stops: Arc<Mutex<Vec<oneshot::Sender<()>>>>,
}

impl ChildSet {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            stops: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Watches `child` until it exits or is killed. The handle yields the
    /// exit status, or `None` if the child was killed.
    pub fn track(&self, mut child: Child) -> JoinHandle<Option<ExitStatus>> {
        let (stop_tx, stop_rx) = oneshot::channel();
        {
            let mut stops = self.stops.lock();
            stops.retain(|tx| !tx.is_closed());
            stops.push(stop_tx);
        }

        let name = self.name;
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => Some(status),
                    Err(e) => {
                        warn!(set = name, error = %e, "waiting on child failed");
                        None
                    }
                },
                _ = stop_rx => {
                    if let Err(e) = child.kill().await {
                        warn!(set = name, error = %e, "kill failed");
                    }
                    None
                }
            }
        })
    }

    /// Kills every tracked child. Returns how many were still running.
    pub fn kill_all(&self) -> usize {
        let stops: Vec<_> = self.stops.lock().drain(..).collect();
        let mut killed = 0;
        for stop in stops {
            if stop.send(()).is_ok() {
                killed += 1;
            }
        }
        if killed > 0 {
            debug!(set = self.name, killed, "children stopped");
        }
        killed
    }

    pub fn running(&self) -> usize {
        self.stops.lock().iter().filter(|tx| !tx.is_closed()).count()
    }
}

impl HardStop for ChildSet {
    fn name(&self) -> &str {
        self.name
    }

    fn hard_stop(&self) -> anyhow::Result<()> {
        self.kill_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn kill_all_stops_running_children() {
        let children = ChildSet::new("test");
        let child = spawn(detached(&["sleep".to_string()], "30").unwrap(), "sleep").unwrap();
        let watcher = children.track(child);
        assert_eq!(children.running(), 1);

        assert_eq!(children.kill_all(), 1);
        let status = tokio::time::timeout(Duration::from_secs(5), watcher)
            .await
            .unwrap()
            .unwrap();
        assert!(status.is_none());
        assert_eq!(children.running(), 0);
    }

    #[test]
    fn empty_command_is_unavailable() {
        assert!(matches!(detached(&[], "x"), Err(BridgeError::Unavailable(_))));
    }
}
