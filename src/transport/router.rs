use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};
use crate::protocol::CorrelationId;

/// Invoked exactly once with the reply body of the matching frame.
pub type Completion = Box<dyn FnOnce(Bytes) -> anyhow::Result<()> + Send>;

const ID_SPACE: u64 = 1 << 16;

/// Wrapping correlation counter shared by every caller on one connection.
#[derive(Debug, Default)]
pub struct CorrelationAccumulator {
    counter: u64,
}

impl CorrelationAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id (mod 65536) for which `in_use` is false.
    pub fn next_free(&mut self, in_use: impl Fn(CorrelationId) -> bool) -> Option<CorrelationId> {
        for _ in 0..ID_SPACE {
            let candidate = (self.counter % ID_SPACE) as CorrelationId;
            self.counter = self.counter.wrapping_add(1);
            if !in_use(candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

struct PendingRequest {
    completion: Completion,
    // Released when the entry leaves the table
    _permit: Option<OwnedSemaphorePermit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    CallbackFailed,
    UnknownId,
}

/// `correlation_id -> completion`. Owned by the router task.
#[derive(Default)]
pub struct CorrelationTable {
    accumulator: CorrelationAccumulator,
    pending: HashMap<CorrelationId, PendingRequest>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns an id that is not currently pending and records the completion.
    pub fn register(
        &mut self,
        completion: Completion,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Option<CorrelationId> {
        let pending = &self.pending;
        let id = self.accumulator.next_free(|id| pending.contains_key(&id))?;
        self.pending.insert(
            id,
            PendingRequest {
                completion,
                _permit: permit,
            },
        );
        Some(id)
    }

    /// Pops and runs the completion for `id`. Failures stay isolated here.
    pub fn deliver(&mut self, id: CorrelationId, body: Bytes) -> Delivery {
        let Some(request) = self.pending.remove(&id) else {
            warn!(correlation_id = id, "reply for unknown correlation id");
            return Delivery::UnknownId;
        };

        match catch_unwind(AssertUnwindSafe(|| (request.completion)(body))) {
            Ok(Ok(())) => Delivery::Delivered,
            Ok(Err(e)) => {
                warn!(correlation_id = id, error = %e, "completion callback failed");
                Delivery::CallbackFailed
            }
            Err(_) => {
                warn!(correlation_id = id, "completion callback panicked");
                Delivery::CallbackFailed
            }
        }
    }

    pub fn remove(&mut self, id: CorrelationId) -> bool {
        self.pending.remove(&id).is_some()
    }

    pub fn is_pending(&self, id: CorrelationId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops every completion; callers waiting on them observe a closed channel.
    pub fn clear(&mut self) -> usize {
        let abandoned = self.pending.len();
        self.pending.clear();
        abandoned
    }
}

enum RouterCommand {
    Register {
        completion: Completion,
        permit: OwnedSemaphorePermit,
        reply: oneshot::Sender<Option<CorrelationId>>,
    },
    Deliver {
        id: CorrelationId,
        body: Bytes,
    },
    Cancel {
        id: CorrelationId,
    },
    Close,
}

/// Message-passing front of the router task.
#[derive(Clone)]
pub struct RouterHandle {
    tx: mpsc::UnboundedSender<RouterCommand>,
}

impl RouterHandle {
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(rx));
        (Self { tx }, task)
    }

    pub async fn register(
        &self,
        completion: Completion,
        permit: OwnedSemaphorePermit,
    ) -> Result<CorrelationId> {
        let (reply, assigned) = oneshot::channel();
        self.tx
            .send(RouterCommand::Register {
                completion,
                permit,
                reply,
            })
            .map_err(|_| BridgeError::TransportFatal("router has stopped".to_string()))?;

        match assigned.await {
            Ok(Some(id)) => Ok(id),
            Ok(None) => Err(BridgeError::Unavailable("free correlation id".to_string())),
            Err(_) => Err(BridgeError::TransportFatal("router has stopped".to_string())),
        }
    }

    pub fn deliver(&self, id: CorrelationId, body: Bytes) {
        let _ = self.tx.send(RouterCommand::Deliver { id, body });
    }

    pub fn cancel(&self, id: CorrelationId) {
        let _ = self.tx.send(RouterCommand::Cancel { id });
    }

    pub fn close(&self) {
        let _ = self.tx.send(RouterCommand::Close);
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<RouterCommand>) {
    let mut table = CorrelationTable::new();

    while let Some(command) = rx.recv().await {
        match command {
            RouterCommand::Register {
                completion,
                permit,
                reply,
            } => {
                let id = table.register(completion, Some(permit));
                if reply.send(id).is_err() {
                    // Caller went away before learning its id
                    if let Some(id) = id {
                        table.remove(id);
                    }
                }
            }
            RouterCommand::Deliver { id, body } => {
                table.deliver(id, body);
            }
            RouterCommand::Cancel { id } => {
                if table.remove(id) {
                    debug!(correlation_id = id, "pending request abandoned");
                }
            }
            RouterCommand::Close => break,
        }
    }

    let abandoned = table.clear();
    if abandoned > 0 {
        warn!(abandoned, "router stopped with requests in flight");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(hits: &Arc<AtomicUsize>) -> Completion {
        let hits = Arc::clone(hits);
        Box::new(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn ids_skip_pending_entries_after_wrap() {
        let mut table = CorrelationTable::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let first = table.register(counting(&hits), None).unwrap();
        assert_eq!(first, 0);
        for _ in 1..ID_SPACE {
            let id = table.register(counting(&hits), None).unwrap();
            table.remove(id);
        }
        // Counter wrapped; id 0 is still pending so 1 is handed out
        assert_eq!(table.register(counting(&hits), None), Some(1));
    }

    #[test]
    fn full_table_refuses_registration() {
        let mut table = CorrelationTable::new();
        for _ in 0..ID_SPACE {
            assert!(table.register(Box::new(|_| Ok(())), None).is_some());
        }
        assert!(table.register(Box::new(|_| Ok(())), None).is_none());
    }

    #[test]
    fn delivery_is_at_most_once() {
        let mut table = CorrelationTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = table.register(counting(&hits), None).unwrap();

        assert_eq!(table.deliver(id, Bytes::new()), Delivery::Delivered);
        assert_eq!(table.deliver(id, Bytes::new()), Delivery::UnknownId);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_and_panicking_callbacks_are_contained() {
        let mut table = CorrelationTable::new();
        let failing = table
            .register(Box::new(|_| Err(anyhow::anyhow!("nope"))), None)
            .unwrap();
        let panicking = table
            .register(Box::new(|_| panic!("callback blew up")), None)
            .unwrap();

        assert_eq!(table.deliver(failing, Bytes::new()), Delivery::CallbackFailed);
        assert_eq!(table.deliver(panicking, Bytes::new()), Delivery::CallbackFailed);
        assert!(table.is_empty());
    }
}
