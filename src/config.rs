//! Runtime configuration, loaded from an optional TOML file.
//!
//! Every field has a default so the façade runs without a config file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::protocol::frame::DEFAULT_MAX_FRAME_SIZE;
use crate::transport::{TransportConfig, DEFAULT_MAX_IN_FLIGHT};
use crate::voice::VoiceConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub daemon: DaemonConfig,
    pub facade: FacadeConfig,
    pub speaker: SpeakerConfig,
    pub microphone: MicrophoneConfig,
    pub voice: VoiceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix socket of the daemon. Ignored when `tcp_address` is set.
    pub socket_path: PathBuf,
    /// `host:port`; usually the daemon listens on port 2020.
    pub tcp_address: Option<String>,
    /// Per-request timeout in seconds; unset waits forever.
    pub request_timeout_secs: Option<f64>,
    pub max_in_flight: usize,
    pub max_frame_size: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/foundry_daemon.sock"),
            tcp_address: None,
            request_timeout_secs: None,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl DaemonConfig {
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            // Ids are 16 bits; the in-flight bound keeps them from wrapping onto a pending one
            max_in_flight: self.max_in_flight.clamp(1, u16::MAX as usize),
            max_frame_size: self.max_frame_size,
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs
            .filter(|secs| *secs > 0.0)
            .map(Duration::from_secs_f64)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FacadeConfig {
    pub socket_path: PathBuf,
    /// Requests served concurrently.
    pub workers: usize,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/foundry_python_service.sock"),
            workers: 6,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeakerConfig {
    /// Text-to-speech program; the text is appended as the last argument.
    pub tts_command: Vec<String>,
    /// Media player; the file path is appended as the last argument.
    pub player_command: Vec<String>,
    pub tone_sample_rate: u32,
    pub period_size: usize,
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        Self {
            tts_command: vec!["espeak".into(), "-s".into(), "130".into()],
            player_command: vec![
                "/usr/bin/ffplay".into(),
                "-hide_banner".into(),
                "-nostats".into(),
                "-nodisp".into(),
                "-autoexit".into(),
                "-vn".into(),
            ],
            tone_sample_rate: 16000,
            period_size: 32,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MicrophoneConfig {
    /// Recorder program; the output path is appended as the last argument.
    pub recorder_command: Vec<String>,
    /// Relative media paths resolve against this directory.
    pub media_root: PathBuf,
}

impl Default for MicrophoneConfig {
    fn default() -> Self {
        Self {
            recorder_command: vec![
                "ffmpeg".into(),
                "-hide_banner".into(),
                "-nostats".into(),
                "-y".into(),
                "-f".into(),
                "pulse".into(),
                "-i".into(),
                "default".into(),
            ],
            media_root: default_media_root(),
        }
    }
}

fn default_media_root() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join("Desktop"))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `trace`, `debug`, `info`, `warn` or `error`, or any EnvFilter directive.
    pub level: String,
    /// `text` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Config {
    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("invalid configuration in {}: {}", path.display(), e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!("cannot read {}: {}", path.display(), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_service() {
        let config = Config::default();
        assert_eq!(config.facade.workers, 6);
        assert_eq!(config.voice.chunk_size, 2048);
        assert_eq!(config.voice.command_depth, 6);
        assert_eq!(config.speaker.period_size, 32);
        assert!(config.daemon.request_timeout().is_none());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [daemon]
            tcp_address = "cube.local:2020"
            request_timeout_secs = 2.5
            max_in_flight = 100000

            [voice]
            recognition_window = 32
            "#,
        )
        .unwrap();

        assert_eq!(config.daemon.tcp_address.as_deref(), Some("cube.local:2020"));
        assert_eq!(config.daemon.request_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.daemon.transport().max_in_flight, 65535);
        assert_eq!(config.voice.recognition_window, 32);
        assert_eq!(config.voice.stream_depth, 64);
        assert_eq!(config.logging.format, "text");
    }
}
