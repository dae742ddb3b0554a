use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

/// Queue depth of a voice pipeline stream, in chunks.
pub const DEFAULT_DEPTH: usize = 64;

struct StreamState {
    chunks: VecDeque<Vec<u8>>,
    terminated: bool,
}

/// Bounded FIFO of PCM chunks between one producer and one consumer thread.
///
/// `write` blocks while the queue is full, `read` blocks while it is empty.
/// After `terminate` every read returns `None` (the end-of-stream sentinel),
/// queued chunks are dropped and writes are ignored.
pub struct AudioStream {
    state: Mutex<StreamState>,
    readable: Condvar,
    writable: Condvar,
    depth: usize,
}

impl AudioStream {
    pub fn new(depth: usize) -> Self {
        Self {
            state: Mutex::new(StreamState {
                chunks: VecDeque::with_capacity(depth),
                terminated: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            depth: depth.max(1),
        }
    }

    /// Queues a chunk. Returns false if the stream was terminated first.
    pub fn write(&self, chunk: Vec<u8>) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.terminated {
                return false;
            }
            if state.chunks.len() < self.depth {
                state.chunks.push_back(chunk);
                self.readable.notify_one();
                return true;
            }
            self.writable.wait(&mut state);
        }
    }

    pub fn read(&self) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        loop {
            if state.terminated {
                return None;
            }
            if let Some(chunk) = state.chunks.pop_front() {
                self.writable.notify_one();
                return Some(chunk);
            }
            self.readable.wait(&mut state);
        }
    }

    /// Drops queued chunks without ending the stream.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        if state.terminated {
            return;
        }
        state.chunks.clear();
        self.writable.notify_all();
    }

    /// Ends the stream. Idempotent.
    pub fn terminate(&self) {
        let mut state = self.state.lock();
        if state.terminated {
            return;
        }
        state.terminated = true;
        state.chunks.clear();
        self.readable.notify_all();
        self.writable.notify_all();
    }

    pub fn is_terminated(&self) -> bool {
        self.state.lock().terminated
    }

    pub fn len(&self) -> usize {
        self.state.lock().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AudioStream {
    fn default() -> Self {
        Self::new(DEFAULT_DEPTH)
    }
}
