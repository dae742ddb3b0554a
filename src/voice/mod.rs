//! Wake word and speech recognition over a live microphone.

pub mod command;
pub mod engine;
pub mod pipeline;

pub use command::CommandBackend;
pub use engine::{Acknowledger, SpeechRecognizer, VoiceBackend, WakeWordDetector};
pub use pipeline::{VoiceConfig, VoicePipeline};
