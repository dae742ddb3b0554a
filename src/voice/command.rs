//! Voice engines hosted as external programs.
//!
//! Each engine reads raw mono S16LE PCM on stdin and prints one line on
//! stdout per event. Any line from the wake-word engine is a detection; each
//! non-empty line from the recogniser is a finished utterance. The sample
//! rate is passed in `CUBELINK_SAMPLE_RATE`.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context};
use crossbeam_channel::{unbounded, Receiver};
use tracing::debug;

use super::engine::{Acknowledger, SpeechRecognizer, VoiceBackend, WakeWordDetector};
use super::pipeline::VoiceConfig;
use crate::audio::{CaptureFactory, CaptureSource};

pub const SAMPLE_RATE_ENV: &str = "CUBELINK_SAMPLE_RATE";

pub struct CommandBackend {
    wake_word_command: Vec<String>,
    recognizer_command: Vec<String>,
    sample_rate: u32,
    capture: Arc<CaptureFactory>,
    acknowledger: Arc<dyn Acknowledger>,
}

impl CommandBackend {
    pub fn new(
        config: &VoiceConfig,
        capture: Arc<CaptureFactory>,
        acknowledger: Arc<dyn Acknowledger>,
    ) -> Self {
        Self {
            wake_word_command: config.wake_word_command.clone(),
            recognizer_command: config.recognizer_command.clone(),
            sample_rate: config.sample_rate,
            capture,
            acknowledger,
        }
    }
}

impl VoiceBackend for CommandBackend {
    fn open_capture(&self, sample_rate: u32) -> anyhow::Result<Box<dyn CaptureSource>> {
        (self.capture)(sample_rate)
    }

    fn wake_word_detector(&self) -> anyhow::Result<Box<dyn WakeWordDetector>> {
        let engine = EngineProcess::spawn("wake-word", &self.wake_word_command, self.sample_rate)?;
        Ok(Box::new(CommandWakeWord(engine)))
    }

    fn recognizer(&self, sample_rate: u32) -> anyhow::Result<Box<dyn SpeechRecognizer>> {
        let engine = EngineProcess::spawn("recognizer", &self.recognizer_command, sample_rate)?;
        Ok(Box::new(CommandRecognizer(engine)))
    }

    fn acknowledger(&self) -> Arc<dyn Acknowledger> {
        Arc::clone(&self.acknowledger)
    }
}

struct EngineProcess {
    name: &'static str,
    child: Child,
    stdin: Option<ChildStdin>,
    events: Receiver<String>,
}

impl EngineProcess {
    fn spawn(name: &'static str, argv: &[String], sample_rate: u32) -> anyhow::Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("no {} command configured", name))?;
        let mut child = Command::new(program)
            .args(args)
            .env(SAMPLE_RATE_ENV, sample_rate.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("cannot start {} engine {:?}", name, program))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let (tx, events) = unbounded();
        let mut engine = Self {
            name,
            child,
            stdin,
            events,
        };

        let stdout = stdout.ok_or_else(|| anyhow!("{} engine has no stdout", name))?;
        thread::Builder::new()
            .name(format!("{}-events", name))
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    let line = line.trim();
                    if !line.is_empty() && tx.send(line.to_string()).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| {
                engine.shutdown();
                anyhow!("cannot watch {} engine output: {}", name, e)
            })?;

        debug!(engine = name, pid = engine.child.id(), "engine started");
        Ok(engine)
    }

    fn write(&mut self, chunk: &[u8]) -> anyhow::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("{} engine input is closed", self.name))?;
        stdin
            .write_all(chunk)
            .with_context(|| format!("{} engine stopped reading", self.name))
    }

    fn shutdown(&mut self) {
        if self.stdin.take().is_none() {
            return;
        }
        let _ = self.child.kill();
        match self.child.wait() {
            Ok(status) => debug!(engine = self.name, %status, "engine stopped"),
            Err(e) => debug!(engine = self.name, error = %e, "engine already reaped"),
        }
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct CommandWakeWord(EngineProcess);

impl WakeWordDetector for CommandWakeWord {
    fn feed(&mut self, chunk: &[u8]) -> anyhow::Result<bool> {
        self.0.write(chunk)?;
        Ok(self.0.events.try_iter().count() > 0)
    }

    fn stop(&mut self) {
        self.0.shutdown();
    }
}

struct CommandRecognizer(EngineProcess);

impl SpeechRecognizer for CommandRecognizer {
    fn accept(&mut self, chunk: &[u8]) -> anyhow::Result<Option<String>> {
        self.0.write(chunk)?;
        Ok(self.0.events.try_recv().ok())
    }

    /// Drops utterances the engine emitted but nobody collected yet.
    fn reset(&mut self) {
        let stale = self.0.events.try_iter().count();
        if stale > 0 {
            debug!(stale, "discarding recogniser output from before activation");
        }
    }

    fn finish(&mut self) {
        self.0.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    fn config(wake: &str, recognizer: &str) -> VoiceConfig {
        VoiceConfig {
            wake_word_command: sh(wake),
            recognizer_command: sh(recognizer),
            ..VoiceConfig::default()
        }
    }

    struct Mute;

    impl Acknowledger for Mute {
        fn acknowledge(&self, _phrase: &str) {}
    }

    fn backend(config: &VoiceConfig) -> CommandBackend {
        let capture: Arc<CaptureFactory> = Arc::new(|_| Err(anyhow!("no microphone in tests")));
        CommandBackend::new(config, capture, Arc::new(Mute))
    }

    #[test]
    fn wake_word_engine_lines_are_detections() {
        let config = config("head -c 4 >/dev/null; echo wake; cat >/dev/null", "cat >/dev/null");
        let mut detector = backend(&config).wake_word_detector().unwrap();

        let started = Instant::now();
        let mut detected = false;
        while !detected && started.elapsed() < Duration::from_secs(5) {
            detected = detector.feed(&[0; 4]).unwrap();
            thread::sleep(Duration::from_millis(10));
        }
        assert!(detected);
        detector.stop();
    }

    #[test]
    fn recogniser_lines_are_utterances_and_sample_rate_is_passed() {
        let config = config(
            "cat >/dev/null",
            "head -c 8 >/dev/null; echo \"heard at $CUBELINK_SAMPLE_RATE\"; cat >/dev/null",
        );
        let mut recognizer = backend(&config).recognizer(8000).unwrap();

        let started = Instant::now();
        let mut heard = None;
        while heard.is_none() && started.elapsed() < Duration::from_secs(5) {
            heard = recognizer.accept(&[0; 8]).unwrap();
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(heard.as_deref(), Some("heard at 8000"));
        recognizer.finish();
    }

    #[test]
    fn missing_command_is_an_error() {
        let config = VoiceConfig::default();
        assert!(!config.engines_configured());
        assert!(backend(&config).wake_word_detector().is_err());
    }
}
