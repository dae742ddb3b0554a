use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use super::args::CallArgs;
use super::process::{detached, spawn, ChildSet};
use super::resolve_media_path;
use crate::audio::{AudioSink, CpalSink, Tone, Waveform};
use crate::config::SpeakerConfig;
use crate::error::{BridgeError, Result};
use crate::kernel::PhaseController;

/// Periods the output ring holds ahead of the device.
const BUFFERED_PERIODS: usize = 8;

/// Opens the output sink on first use: `(sample_rate, period_size)`.
pub type SinkFactory = dyn Fn(u32, usize) -> anyhow::Result<Box<dyn AudioSink>> + Send + Sync;

pub fn cpal_sink_factory() -> Arc<SinkFactory> {
    Arc::new(|sample_rate, period_size| {
        let sink = CpalSink::open(sample_rate, BUFFERED_PERIODS, period_size)?;
        Ok(Box::new(sink) as Box<dyn AudioSink>)
    })
}

pub struct SpeakerService {
    config: SpeakerConfig,
    media_root: PathBuf,
    phase: PhaseController,
    say_lock: tokio::sync::Mutex<()>,
    children: ChildSet,
    sink: Arc<Mutex<Option<Box<dyn AudioSink>>>>,
    sink_factory: Arc<SinkFactory>,
}

impl SpeakerService {
    pub fn new(
        config: SpeakerConfig,
        media_root: PathBuf,
        phase: PhaseController,
        sink_factory: Arc<SinkFactory>,
    ) -> Self {
        let children = ChildSet::new("speaker");
        phase.register_hard_stop(Arc::new(children.clone()));
        Self {
            config,
            media_root,
            phase,
            say_lock: tokio::sync::Mutex::new(()),
            children,
            sink: Arc::new(Mutex::new(None)),
            sink_factory,
        }
    }

    pub async fn dispatch(&self, method: &str, mut args: CallArgs) -> Result<Option<Value>> {
        match method {
            "say" => {
                let text: String = args.required(0, "text")?;
                args.finish()?;
                self.say(&text).await?;
            }
            "play" => {
                let path: String = args.required(0, "relative_or_absolute_path")?;
                args.finish()?;
                self.play(Path::new(&path)).await?;
            }
            "stop" => {
                args.finish()?;
                self.stop();
            }
            "tone" => {
                let defaults = Tone::default();
                let frequency = args.or(0, "frequency", defaults.frequency)?;
                let duration = args.or(1, "duration", defaults.duration)?;
                let volume = args.or(2, "volume", defaults.volume)?;
                let function: Option<String> = args.optional(3, "function")?;
                let ramp = args.or(4, "ramp", defaults.ramp)?;
                let trailing_samples = args.or(5, "trailing_samples", defaults.trailing_samples)?;
                args.finish()?;

                // Unknown waveform names play a sine
                let waveform = function
                    .and_then(|name| name.parse::<Waveform>().ok())
                    .unwrap_or(Waveform::Sine);
                self.tone(Tone {
                    frequency,
                    duration,
                    volume,
                    waveform,
                    ramp,
                    trailing_samples,
                    sample_rate: self.config.tone_sample_rate,
                })
                .await?;
            }
            _ => return Ok(None),
        }
        Ok(Some(Value::Null))
    }

    /// Speaks `text` and waits for it to finish. Calls are serialised; `stop`
    /// cuts the current utterance short.
    pub async fn say(&self, text: &str) -> Result<()> {
        let _serial = self.say_lock.lock().await;
        let child = spawn(detached(&self.config.tts_command, text)?, "text-to-speech")?;
        let watcher = self.children.track(child);
        let status = watcher
            .await
            .map_err(|e| BridgeError::Unavailable(format!("text-to-speech ({})", e)))?;
        debug!(?status, "say finished");
        Ok(())
    }

    /// Starts playback and returns without waiting for it.
    pub async fn play(&self, path: &Path) -> Result<()> {
        let path = resolve_media_path(&self.media_root, path);
        if !tokio::fs::try_exists(&path).await? {
            return Err(BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                path.display().to_string(),
            )));
        }
        let child = spawn(
            detached(&self.config.player_command, &path.to_string_lossy())?,
            "media player",
        )?;
        info!(path = %path.display(), "playing");
        drop(self.children.track(child));
        Ok(())
    }

    /// Kills every player and any utterance in progress.
    pub fn stop(&self) -> usize {
        self.children.kill_all()
    }

    /// Plays a tone on the shared output sink, opening it on first use.
    /// Returns early once the phase moves on.
    pub async fn tone(&self, tone: Tone) -> Result<()> {
        tone.sample_counts()?;
        let guard = self.phase.guard();
        let sink = Arc::clone(&self.sink);
        let factory = Arc::clone(&self.sink_factory);
        let (sample_rate, period_size) = (self.config.tone_sample_rate, self.config.period_size);

        let written = tokio::task::spawn_blocking(move || -> Result<usize> {
            let mut slot = sink.lock();
            let mut device = match slot.take() {
                Some(device) => device,
                None => factory(sample_rate, period_size)
                    .map_err(|e| BridgeError::Unavailable(format!("audio output ({})", e)))?,
            };
            let written = tone
                .play(device.as_mut(), &guard)
                .map_err(|e| BridgeError::Unavailable(format!("audio output ({})", e)))?;
            *slot = Some(device);
            Ok(written)
        })
        .await
        .map_err(|e| BridgeError::Unavailable(format!("audio output ({})", e)))??;

        debug!(periods = written, "tone played");
        Ok(())
    }
}
