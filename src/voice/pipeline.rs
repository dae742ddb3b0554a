use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use super::engine::{Acknowledger, SpeechRecognizer, VoiceBackend, WakeWordDetector};
use crate::audio::{AudioStream, CaptureSource};
use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Bytes per chunk handed to the engines.
    pub chunk_size: usize,
    /// Chunks buffered per stream before the capture thread blocks.
    pub stream_depth: usize,
    /// Finalised utterances kept for `wait_for_sentence`.
    pub command_depth: usize,
    /// Chunks routed to the recogniser after each wake word.
    pub recognition_window: u32,
    /// Utterances between recogniser rebuilds.
    pub rebuild_every: u32,
    pub sample_rate: u32,
    /// Wake-word engine program, see [`super::command`]. Empty disables voice.
    pub wake_word_command: Vec<String>,
    /// Speech recogniser program. Empty disables voice.
    pub recognizer_command: Vec<String>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2048,
            stream_depth: 64,
            command_depth: 6,
            recognition_window: 64,
            rebuild_every: 4,
            sample_rate: 16000,
            wake_word_command: Vec::new(),
            recognizer_command: Vec::new(),
        }
    }
}

impl VoiceConfig {
    pub fn engines_configured(&self) -> bool {
        !self.wake_word_command.is_empty() && !self.recognizer_command.is_empty()
    }
}

/// State shared by the three threads of one session.
struct Coordination {
    running: AtomicBool,
    /// Chunks left in the current recognition window.
    countdown: AtomicU32,
    /// Set on activation; the recogniser drops its partial state.
    discard: AtomicBool,
}

impl Coordination {
    fn take_window_slot(&self) -> bool {
        self.countdown
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

struct Session {
    wake: Arc<AudioStream>,
    recognize: Arc<AudioStream>,
    commands: Receiver<String>,
    coordination: Arc<Coordination>,
    workers: Vec<JoinHandle<()>>,
    // Never joined: it may sit in a device read when the session stops
    _capture: JoinHandle<()>,
}

/// Wake word plus streaming recognition over the microphone.
///
/// Two states, idle and active, switched only under `session`'s lock.
/// While active a capture thread splits PCM into fixed chunks and writes each
/// one to the wake stream, and also to the recognition stream while a window
/// opened by the last wake word is still running. Recognised utterances land
/// in a bounded queue drained by [`VoicePipeline::wait_for_sentence`].
pub struct VoicePipeline {
    backend: Arc<dyn VoiceBackend>,
    config: VoiceConfig,
    session: Mutex<Option<Session>>,
}

impl VoicePipeline {
    pub fn new(backend: Arc<dyn VoiceBackend>, config: VoiceConfig) -> Self {
        Self {
            backend,
            config,
            session: Mutex::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Starts the session. Returns false if it was already running.
    ///
    /// Every successful call is acknowledged, including a repeated one. The
    /// capture device is opened on the capture thread; if that fails the
    /// pipeline stays idle and the error is returned.
    pub fn start(&self) -> Result<bool> {
        let started = {
            let mut session = self.session.lock();
            if session.is_none() {
                *session = Some(self.spawn_session()?);
                true
            } else {
                false
            }
        };

        if started {
            info!("voice recognition started");
        }
        self.backend.acknowledger().acknowledge("at your service");
        Ok(started)
    }

    /// Stops the session. Returns false if it was not running.
    pub fn stop(&self) -> bool {
        let mut guard = self.session.lock();
        let Some(session) = guard.take() else {
            return false;
        };

        session.coordination.running.store(false, Ordering::SeqCst);
        session.wake.terminate();
        session.recognize.terminate();
        for worker in session.workers {
            if worker.join().is_err() {
                warn!("voice worker panicked");
            }
        }

        info!("voice recognition stopped");
        true
    }

    /// Next recognised utterance, or `None` on timeout or when the session
    /// stops while waiting.
    pub fn wait_for_sentence(&self, timeout: Option<Duration>) -> Result<Option<String>> {
        let commands = match self.session.lock().as_ref() {
            Some(session) => session.commands.clone(),
            None => return Err(BridgeError::NotActive),
        };

        Ok(match timeout {
            Some(limit) => commands.recv_timeout(limit).ok(),
            None => commands.recv().ok(),
        })
    }

    fn spawn_session(&self) -> Result<Session> {
        let config = &self.config;
        let wake = Arc::new(AudioStream::new(config.stream_depth));
        let recognize = Arc::new(AudioStream::new(config.stream_depth));
        let (command_tx, command_rx) = bounded(config.command_depth.max(1));
        let coordination = Arc::new(Coordination {
            running: AtomicBool::new(true),
            countdown: AtomicU32::new(0),
            discard: AtomicBool::new(false),
        });

        let detector = self
            .backend
            .wake_word_detector()
            .map_err(|e| BridgeError::Unavailable(format!("wake word engine ({})", e)))?;
        let recognizer = self
            .backend
            .recognizer(config.sample_rate)
            .map_err(|e| BridgeError::Unavailable(format!("speech recogniser ({})", e)))?;

        let (opened_tx, opened_rx) = bounded::<anyhow::Result<()>>(1);
        let capture = {
            let backend = Arc::clone(&self.backend);
            let wake = Arc::clone(&wake);
            let recognize = Arc::clone(&recognize);
            let coordination = Arc::clone(&coordination);
            let (sample_rate, chunk_size) = (config.sample_rate, config.chunk_size);
            thread::Builder::new()
                .name("voice-capture".to_string())
                .spawn(move || {
                    let source = match backend.open_capture(sample_rate) {
                        Ok(source) => {
                            let _ = opened_tx.send(Ok(()));
                            source
                        }
                        Err(e) => {
                            let _ = opened_tx.send(Err(e));
                            return;
                        }
                    };
                    capture_loop(source, chunk_size, &wake, &recognize, &coordination);
                })?
        };

        match opened_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(BridgeError::Unavailable(format!("capture device ({})", e)));
            }
            Err(_) => {
                return Err(BridgeError::Unavailable(
                    "capture device (thread exited)".to_string(),
                ));
            }
        }

        let recognizer_worker = {
            let backend = Arc::clone(&self.backend);
            let recognize = Arc::clone(&recognize);
            let coordination = Arc::clone(&coordination);
            let commands = CommandQueue {
                tx: command_tx,
                rx: command_rx.clone(),
            };
            let (sample_rate, rebuild_every) = (config.sample_rate, config.rebuild_every);
            thread::Builder::new()
                .name("voice-recognizer".to_string())
                .spawn(move || {
                    recognizer_loop(
                        recognizer,
                        backend.as_ref(),
                        sample_rate,
                        rebuild_every,
                        &recognize,
                        &coordination,
                        &commands,
                    )
                })?
        };

        let wake_worker = {
            let acknowledger = self.backend.acknowledger();
            let wake = Arc::clone(&wake);
            let recognize = Arc::clone(&recognize);
            let coordination = Arc::clone(&coordination);
            let window = config.recognition_window;
            thread::Builder::new()
                .name("voice-wake-word".to_string())
                .spawn(move || {
                    wake_loop(
                        detector,
                        acknowledger.as_ref(),
                        window,
                        &wake,
                        &recognize,
                        &coordination,
                    )
                })?
        };

        Ok(Session {
            wake,
            recognize,
            commands: command_rx,
            coordination,
            workers: vec![wake_worker, recognizer_worker],
            _capture: capture,
        })
    }
}

impl Drop for VoicePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    mut source: Box<dyn CaptureSource>,
    chunk_size: usize,
    wake: &AudioStream,
    recognize: &AudioStream,
    coordination: &Coordination,
) {
    let chunk_size = chunk_size.max(1);
    let mut pending: Vec<u8> = Vec::with_capacity(chunk_size * 2);

    while coordination.running.load(Ordering::SeqCst) {
        let data = match source.read() {
            Ok(data) => data,
            Err(e) => {
                error!(error = %e, "capture read failed");
                break;
            }
        };
        if !coordination.running.load(Ordering::SeqCst) {
            break;
        }

        pending.extend_from_slice(&data);
        while pending.len() >= chunk_size {
            let rest = pending.split_off(chunk_size);
            let chunk = std::mem::replace(&mut pending, rest);
            if coordination.take_window_slot() {
                recognize.write(chunk.clone());
            }
            if !wake.write(chunk) {
                debug!("wake stream terminated, capture exiting");
                return;
            }
        }
    }
    debug!("capture thread exiting");
}

fn wake_loop(
    mut detector: Box<dyn WakeWordDetector>,
    acknowledger: &dyn Acknowledger,
    window: u32,
    wake: &AudioStream,
    recognize: &AudioStream,
    coordination: &Coordination,
) {
    while let Some(chunk) = wake.read() {
        match detector.feed(&chunk) {
            Ok(true) => {
                debug!("wake word detected");
                acknowledger.acknowledge("yes");
                recognize.clear();
                coordination.discard.store(true, Ordering::SeqCst);
                coordination.countdown.store(window, Ordering::SeqCst);
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "wake word engine failed on a chunk"),
        }
    }
    detector.stop();
    debug!("wake word worker exiting");
}

/// Bounded utterance queue; a full queue drops its oldest entry.
struct CommandQueue {
    tx: Sender<String>,
    rx: Receiver<String>,
}

impl CommandQueue {
    fn push(&self, text: String) {
        let mut text = text;
        loop {
            match self.tx.try_send(text) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    if let Ok(dropped) = self.rx.try_recv() {
                        warn!(dropped = %dropped, "command queue full, dropping oldest utterance");
                    }
                    text = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

fn recognizer_loop(
    mut recognizer: Box<dyn SpeechRecognizer>,
    backend: &dyn VoiceBackend,
    sample_rate: u32,
    rebuild_every: u32,
    recognize: &AudioStream,
    coordination: &Coordination,
    commands: &CommandQueue,
) {
    let mut finalised = 0;

    while let Some(chunk) = recognize.read() {
        if coordination.discard.swap(false, Ordering::SeqCst) {
            recognizer.reset();
        }

        match recognizer.accept(&chunk) {
            Ok(Some(text)) => {
                info!(utterance = %text, "utterance recognised");
                commands.push(text);
                finalised += 1;
                if finalised >= rebuild_every.max(1) {
                    recognizer.finish();
                    match backend.recognizer(sample_rate) {
                        Ok(fresh) => recognizer = fresh,
                        Err(e) => warn!(error = %e, "recogniser rebuild failed, keeping the old one"),
                    }
                    finalised = 0;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "speech recogniser failed on a chunk"),
        }
    }

    recognizer.finish();
    debug!("recogniser worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_counts_down_to_zero() {
        let coordination = Coordination {
            running: AtomicBool::new(true),
            countdown: AtomicU32::new(2),
            discard: AtomicBool::new(false),
        };
        assert!(coordination.take_window_slot());
        assert!(coordination.take_window_slot());
        assert!(!coordination.take_window_slot());
    }

    #[test]
    fn full_queue_drops_oldest() {
        let (tx, rx) = bounded(2);
        let queue = CommandQueue { tx, rx: rx.clone() };
        queue.push("one".into());
        queue.push("two".into());
        queue.push("three".into());

        assert_eq!(rx.try_recv().unwrap(), "two");
        assert_eq!(rx.try_recv().unwrap(), "three");
    }
}
