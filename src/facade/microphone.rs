use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::{info, warn};

use super::args::CallArgs;
use super::process::{detached, spawn, ChildSet};
use super::resolve_media_path;
use crate::audio::spectrum::{capture_buckets, BucketRequest};
pub use crate::audio::capture::{cpal_capture_factory, CaptureFactory};
use crate::config::MicrophoneConfig;
use crate::error::{BridgeError, Result};
use crate::kernel::{timeout_from_secs, FnStop, PhaseController};
use crate::voice::VoicePipeline;

type BucketReply = oneshot::Sender<Result<Map<String, Value>>>;

/// Handle to the thread that owns the frequency-analysis capture device.
struct FrequencyAnalyser {
    requests: Sender<(BucketRequest, BucketReply)>,
}

impl FrequencyAnalyser {
    fn spawn(factory: Arc<CaptureFactory>, sample_rate: u32) -> Result<Self> {
        let (requests, inbox) = unbounded::<(BucketRequest, BucketReply)>();
        let (opened_tx, opened_rx) = crossbeam_channel::bounded::<anyhow::Result<()>>(1);

        thread::Builder::new()
            .name("frequency-analysis".to_string())
            .spawn(move || {
                let mut source = match factory(sample_rate) {
                    Ok(source) => {
                        let _ = opened_tx.send(Ok(()));
                        source
                    }
                    Err(e) => {
                        let _ = opened_tx.send(Err(e));
                        return;
                    }
                };
                for (request, reply) in inbox {
                    let _ = reply.send(capture_buckets(source.as_mut(), &request));
                }
            })?;

        match opened_rx.recv() {
            Ok(Ok(())) => Ok(Self { requests }),
            Ok(Err(e)) => Err(BridgeError::Unavailable(format!("capture device ({})", e))),
            Err(_) => Err(BridgeError::Unavailable(
                "capture device (analysis thread exited)".to_string(),
            )),
        }
    }
}

pub struct MicrophoneService {
    config: MicrophoneConfig,
    recorder: ChildSet,
    voice: Option<Arc<VoicePipeline>>,
    capture_factory: Arc<CaptureFactory>,
    analyser: Mutex<Option<FrequencyAnalyser>>,
}

impl MicrophoneService {
    pub fn new(
        config: MicrophoneConfig,
        phase: &PhaseController,
        voice: Option<Arc<VoicePipeline>>,
        capture_factory: Arc<CaptureFactory>,
    ) -> Self {
        if let Some(pipeline) = &voice {
            let pipeline = Arc::clone(pipeline);
            phase.register_hard_stop(Arc::new(FnStop::new("voice", move || {
                pipeline.stop();
                Ok(())
            })));
        }
        Self {
            config,
            recorder: ChildSet::new("recorder"),
            voice,
            capture_factory,
            analyser: Mutex::new(None),
        }
    }

    pub async fn dispatch(&self, method: &str, mut args: CallArgs) -> Result<Option<Value>> {
        let result = match method {
            "start_recording" => {
                let path: String = args.required(0, "relative_or_absolute_path")?;
                args.finish()?;
                self.start_recording(Path::new(&path))?;
                Value::Null
            }
            "stop_recording" => {
                args.finish()?;
                self.stop_recording();
                Value::Null
            }
            "start_voice_recognition" => {
                args.finish()?;
                let pipeline = self.pipeline()?;
                tokio::task::spawn_blocking(move || pipeline.start())
                    .await
                    .map_err(|e| BridgeError::Unavailable(format!("voice recognition ({})", e)))??;
                Value::Null
            }
            "wait_for_sentence" => {
                let timeout: Option<f64> = args.optional(0, "timeout")?;
                args.finish()?;
                let timeout = timeout.map(timeout_from_secs).transpose()?.flatten();
                let pipeline = self.pipeline()?;
                tokio::task::spawn_blocking(move || pipeline.wait_for_sentence(timeout))
                    .await
                    .map_err(|e| BridgeError::Unavailable(format!("voice recognition ({})", e)))??
                    .into()
            }
            "stop_voice_recognition" => {
                args.finish()?;
                let pipeline = self.pipeline()?;
                tokio::task::spawn_blocking(move || pipeline.stop())
                    .await
                    .map_err(|e| BridgeError::Unavailable(format!("voice recognition ({})", e)))?;
                Value::Null
            }
            "start_recording_for_frequency_analysis" => {
                let sample_rate = args.or(0, "sample_rate", BucketRequest::default().sample_rate)?;
                args.finish()?;
                self.start_frequency_analysis(sample_rate)?;
                Value::Null
            }
            "get_frequency_buckets" => {
                let defaults = BucketRequest::default();
                let request = BucketRequest {
                    num_buckets: args.or(0, "num_buckets", defaults.num_buckets)?,
                    min_hz: args.or(1, "min_hz", defaults.min_hz)?,
                    max_hz: args.or(2, "max_hz", defaults.max_hz)?,
                    sample_rate: args.or(3, "sample_rate", defaults.sample_rate)?,
                };
                args.finish()?;
                Value::Object(self.get_frequency_buckets(request).await?)
            }
            _ => return Ok(None),
        };
        Ok(Some(result))
    }

    fn pipeline(&self) -> Result<Arc<VoicePipeline>> {
        self.voice
            .clone()
            .ok_or_else(|| BridgeError::Unavailable("voice recognition engine".to_string()))
    }

    /// Records the default input to `path` until stopped. A recording already
    /// in progress is stopped first.
    pub fn start_recording(&self, path: &Path) -> Result<()> {
        let path = resolve_media_path(&self.config.media_root, path);
        let extension = path.extension().and_then(|e| e.to_str());
        if !matches!(extension, Some("wav") | Some("mp3")) {
            return Err(BridgeError::invalid("Path does not end with .wav or .mp3"));
        }

        self.recorder.kill_all();
        let child = spawn(
            detached(&self.config.recorder_command, &path.to_string_lossy())?,
            "recorder",
        )?;
        info!(path = %path.display(), "recording");
        drop(self.recorder.track(child));
        Ok(())
    }

    pub fn stop_recording(&self) {
        self.recorder.kill_all();
    }

    /// Opens the analysis capture device. Later calls keep the first device.
    pub fn start_frequency_analysis(&self, sample_rate: u32) -> Result<()> {
        let mut analyser = self.analyser.lock();
        if analyser.is_none() {
            *analyser = Some(FrequencyAnalyser::spawn(
                Arc::clone(&self.capture_factory),
                sample_rate,
            )?);
        }
        Ok(())
    }

    pub async fn get_frequency_buckets(&self, request: BucketRequest) -> Result<Map<String, Value>> {
        request.validate()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let analyser = self.analyser.lock();
            let analyser = analyser.as_ref().ok_or_else(|| {
                BridgeError::Unavailable(
                    "frequency analysis (call start_recording_for_frequency_analysis() first)"
                        .to_string(),
                )
            })?;
            if analyser.requests.send((request, reply_tx)).is_err() {
                warn!("frequency analysis thread has exited");
            }
        }
        reply_rx.await.map_err(|_| {
            BridgeError::Unavailable("frequency analysis (capture thread exited)".to_string())
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::CaptureSource;

    struct Silence;

    impl CaptureSource for Silence {
        fn read(&mut self) -> anyhow::Result<Vec<u8>> {
            Ok(vec![0; 256])
        }

        fn sample_rate(&self) -> u32 {
            8000
        }
    }

    fn service() -> MicrophoneService {
        let factory: Arc<CaptureFactory> =
            Arc::new(|_| Ok(Box::new(Silence) as Box<dyn CaptureSource>));
        MicrophoneService::new(
            MicrophoneConfig::default(),
            &PhaseController::new(),
            None,
            factory,
        )
    }

    #[test]
    fn recording_needs_a_known_extension() {
        let microphone = service();
        let err = microphone.start_recording(Path::new("clip.ogg")).unwrap_err();
        assert_eq!(err.to_string(), "Path does not end with .wav or .mp3");
    }

    #[tokio::test]
    async fn buckets_need_a_started_capture() {
        let microphone = service();
        let request = BucketRequest::default();
        assert!(matches!(
            microphone.get_frequency_buckets(request).await,
            Err(BridgeError::Unavailable(_))
        ));

        microphone.start_frequency_analysis(8000).unwrap();
        let buckets = microphone.get_frequency_buckets(request).await.unwrap();
        assert_eq!(buckets.len(), 8);
        assert!(buckets.values().all(|v| v.as_f64() == Some(0.0)));
    }

    #[tokio::test]
    async fn too_high_max_frequency_is_rejected_first() {
        let microphone = service();
        let request = BucketRequest {
            max_hz: 5000.0,
            ..BucketRequest::default()
        };
        let err = microphone.get_frequency_buckets(request).await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn voice_methods_without_engine_are_unavailable() {
        let microphone = service();
        let args = CallArgs::new("start_voice_recognition", crate::protocol::Arguments::new());
        assert!(matches!(
            microphone.dispatch("start_voice_recognition", args).await,
            Err(BridgeError::Unavailable(_))
        ));
    }
}
