use std::sync::Arc;

use crate::audio::CaptureSource;

/// Flags the activation phrase in a live PCM stream.
pub trait WakeWordDetector: Send {
    /// Feeds one chunk; true when the wake word completed inside it.
    fn feed(&mut self, chunk: &[u8]) -> anyhow::Result<bool>;

    /// Releases engine resources once the stream has ended.
    fn stop(&mut self) {}
}

/// Incremental speech-to-text.
pub trait SpeechRecognizer: Send {
    /// Feeds one chunk; returns the text of an utterance finalised by it.
    fn accept(&mut self, chunk: &[u8]) -> anyhow::Result<Option<String>>;

    /// Forgets buffered audio without emitting a result.
    fn reset(&mut self);

    /// Flushes internal state at end of stream.
    fn finish(&mut self) {}
}

/// Audible confirmation, e.g. speaking "yes" after the wake word.
pub trait Acknowledger: Send + Sync {
    fn acknowledge(&self, phrase: &str);
}

/// Builds the collaborators of one voice session.
pub trait VoiceBackend: Send + Sync {
    /// Called on the capture thread; the source never leaves it.
    fn open_capture(&self, sample_rate: u32) -> anyhow::Result<Box<dyn CaptureSource>>;

    fn wake_word_detector(&self) -> anyhow::Result<Box<dyn WakeWordDetector>>;

    /// Called at start and again every few utterances to bound engine memory.
    fn recognizer(&self, sample_rate: u32) -> anyhow::Result<Box<dyn SpeechRecognizer>>;

    fn acknowledger(&self) -> Arc<dyn Acknowledger>;
}
