//! Request dispatcher behind the façade socket.
//!
//! Composite operations (LED coordinate mapping, input polling, pixel
//! blitting, audio, host statistics) run here; every other declared module
//! method is forwarded to the daemon unchanged.

pub mod args;
pub mod display;
pub mod envelope;
pub mod input;
pub mod microphone;
pub mod pi;
pub mod process;
pub mod screen;
pub mod speaker;

pub use args::CallArgs;
pub use display::{DisplayService, TextRasteriser};
pub use envelope::{Envelope, Request};
pub use microphone::{CaptureFactory, MicrophoneService};
pub use pi::{PiService, SysinfoStats, SystemStats};
pub use speaker::{SinkFactory, SpeakerService};

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::config::{MicrophoneConfig, SpeakerConfig};
use crate::error::{BridgeError, Result};
use crate::kernel::PhaseController;
use crate::modules::{Cube, ModuleKind};
use crate::protocol::Arguments;
use crate::voice::{Acknowledger, VoiceBackend, VoiceConfig, VoicePipeline};

/// Joins a relative path onto `root`; absolute paths are kept.
pub fn resolve_media_path(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

pub struct Facade {
    cube: Cube,
    phase: PhaseController,
    display: DisplayService,
    buttons: input::ButtonsService,
    gestures: input::GestureService,
    screen: screen::ScreenService,
    speaker: Arc<SpeakerService>,
    microphone: MicrophoneService,
    pi: PiService,
}

/// Builds voice engines around an acknowledger that speaks through the
/// façade's own speaker.
pub type VoiceFactory = dyn FnOnce(Arc<dyn Acknowledger>) -> Arc<dyn VoiceBackend> + Send;

enum VoiceSetup {
    Backend(Arc<dyn VoiceBackend>, VoiceConfig),
    Spoken(VoiceConfig, Box<VoiceFactory>),
}

pub struct FacadeBuilder {
    cube: Cube,
    phase: PhaseController,
    speaker: SpeakerConfig,
    microphone: MicrophoneConfig,
    voice: Option<VoiceSetup>,
    rasteriser: Option<Arc<dyn TextRasteriser>>,
    stats: Option<Arc<dyn SystemStats>>,
    sink_factory: Arc<SinkFactory>,
    capture_factory: Arc<CaptureFactory>,
}

impl FacadeBuilder {
    pub fn phase(mut self, phase: PhaseController) -> Self {
        self.phase = phase;
        self
    }

    pub fn speaker(mut self, config: SpeakerConfig) -> Self {
        self.speaker = config;
        self
    }

    pub fn microphone(mut self, config: MicrophoneConfig) -> Self {
        self.microphone = config;
        self
    }

    pub fn voice(mut self, backend: Arc<dyn VoiceBackend>, config: VoiceConfig) -> Self {
        self.voice = Some(VoiceSetup::Backend(backend, config));
        self
    }

    /// Like [`FacadeBuilder::voice`], but the backend is made during
    /// `build` so it can acknowledge through `speaker.say`. Needs a tokio
    /// runtime at build time.
    pub fn spoken_voice<F>(mut self, config: VoiceConfig, factory: F) -> Self
    where
        F: FnOnce(Arc<dyn Acknowledger>) -> Arc<dyn VoiceBackend> + Send + 'static,
    {
        self.voice = Some(VoiceSetup::Spoken(config, Box::new(factory)));
        self
    }

    pub fn rasteriser(mut self, rasteriser: Arc<dyn TextRasteriser>) -> Self {
        self.rasteriser = Some(rasteriser);
        self
    }

    pub fn system_stats(mut self, stats: Arc<dyn SystemStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn sink_factory(mut self, factory: Arc<SinkFactory>) -> Self {
        self.sink_factory = factory;
        self
    }

    pub fn capture_factory(mut self, factory: Arc<CaptureFactory>) -> Self {
        self.capture_factory = factory;
        self
    }

    pub fn build(self) -> Arc<Facade> {
        let cube = self.cube;
        let phase = self.phase;
        let media_root = self.microphone.media_root.clone();
        let speaker = Arc::new(SpeakerService::new(
            self.speaker,
            media_root.clone(),
            phase.clone(),
            self.sink_factory,
        ));

        let backend = match self.voice {
            None => None,
            Some(VoiceSetup::Backend(backend, config)) => Some((backend, config)),
            Some(VoiceSetup::Spoken(config, factory)) => match Handle::try_current() {
                Ok(runtime) => {
                    let acknowledger: Arc<dyn Acknowledger> = Arc::new(SpokenAcknowledger {
                        speaker: Arc::clone(&speaker),
                        runtime,
                    });
                    Some((factory(acknowledger), config))
                }
                Err(e) => {
                    error!(error = %e, "voice recognition needs a tokio runtime, leaving it off");
                    None
                }
            },
        };
        let voice = backend.map(|(backend, config)| Arc::new(VoicePipeline::new(backend, config)));

        Arc::new(Facade {
            display: DisplayService::new(cube.display.clone(), phase.clone(), self.rasteriser),
            buttons: input::ButtonsService::new((*cube.buttons).clone(), phase.clone()),
            gestures: input::GestureService::new((*cube.light_sensor).clone(), phase.clone()),
            screen: screen::ScreenService::new(cube.screen.clone(), phase.clone(), media_root),
            speaker,
            microphone: MicrophoneService::new(self.microphone, &phase, voice, self.capture_factory),
            pi: PiService::new(self.stats),
            cube,
            phase,
        })
    }
}

impl Facade {
    pub fn builder(cube: Cube) -> FacadeBuilder {
        FacadeBuilder {
            cube,
            phase: PhaseController::new(),
            speaker: SpeakerConfig::default(),
            microphone: MicrophoneConfig::default(),
            voice: None,
            rasteriser: None,
            stats: None,
            sink_factory: speaker::cpal_sink_factory(),
            capture_factory: microphone::cpal_capture_factory(),
        }
    }

    pub fn phase(&self) -> &PhaseController {
        &self.phase
    }

    /// Serves one request on its own task so a panicking handler still
    /// produces a failure envelope.
    pub async fn handle(self: Arc<Self>, request: Request) -> Envelope {
        match tokio::spawn(async move { self.route(request).await }).await {
            Ok(envelope) => envelope,
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                error!(%message, "handler panicked");
                Envelope::failure("Panic", message)
            }
            Err(e) => Envelope::failure("Cancelled", e),
        }
    }

    async fn route(&self, request: Request) -> Envelope {
        match request {
            Request::Ping { value } => Envelope::success(value),
            Request::InterruptExecutingMethods => match self.interrupt().await {
                Ok(phase) => Envelope::phase(phase),
                Err(e) => Envelope::from_error(&e),
            },
            Request::InvokeModuleMethod {
                module,
                method,
                json,
            } => match self.invoke(&module, &method, &json).await {
                Ok(result) => Envelope::success(result),
                Err(e) => {
                    warn!(%module, %method, kind = e.kind(), error = %e, "call failed");
                    Envelope::from_error(&e)
                }
            },
        }
    }

    /// Advances the phase and runs the hard stops. Returns the new phase.
    pub async fn interrupt(&self) -> Result<u64> {
        let phase = self.phase.clone();
        tokio::task::spawn_blocking(move || phase.interrupt())
            .await
            .map_err(|e| BridgeError::Unavailable(format!("interrupt ({})", e)))
    }

    /// Runs `module.method` with arguments taken from the JSON text
    /// `{"arguments": [...] | {...}}`.
    pub async fn invoke(&self, module: &str, method: &str, json: &str) -> Result<Value> {
        let kind: ModuleKind = module.parse().map_err(|_| BridgeError::UnknownMethod {
            module: module.to_string(),
            method: method.to_string(),
        })?;
        kind.check_method(method)?;

        let envelope: Value = serde_json::from_str(json)?;
        let arguments = match envelope {
            Value::Object(mut fields) => {
                Arguments::from_json(fields.remove("arguments").unwrap_or(Value::Null))?
            }
            other => {
                return Err(BridgeError::invalid(format!(
                    "expected an object with arguments, got {}",
                    other
                )))
            }
        };

        let args = CallArgs::new(method, arguments.clone());
        let local = match kind {
            ModuleKind::Display => self.display.dispatch(method, args).await?,
            ModuleKind::Buttons => self.buttons.dispatch(method, args).await?,
            ModuleKind::LightSensor => self.gestures.dispatch(method, args).await?,
            ModuleKind::Screen => self.screen.dispatch(method, args).await?,
            ModuleKind::Speaker => self.speaker.dispatch(method, args).await?,
            ModuleKind::Microphone => self.microphone.dispatch(method, args).await?,
            ModuleKind::Pi => self.pi.dispatch(method, args).await?,
            ModuleKind::EnvSensor | ModuleKind::Imu => None,
        };

        match local {
            Some(result) => Ok(result),
            None => {
                debug!(%kind, method, "forwarding to daemon");
                self.cube.handle(kind).call(method, arguments).await
            }
        }
    }
}

struct SpokenAcknowledger {
    speaker: Arc<SpeakerService>,
    runtime: Handle,
}

impl Acknowledger for SpokenAcknowledger {
    fn acknowledge(&self, phrase: &str) {
        if let Err(e) = self.runtime.block_on(self.speaker.say(phrase)) {
            warn!(phrase, error = %e, "acknowledgement failed");
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
