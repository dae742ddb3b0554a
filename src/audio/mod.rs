//! PCM plumbing: capture, playback, the bounded chunk stream and analysis.

pub mod capture;
pub mod output;
pub mod spectrum;
pub mod stream;
pub mod tone;

pub use capture::{cpal_capture_factory, CaptureFactory, CaptureSource, CpalCapture};
pub use output::{AudioSink, CpalSink, MemorySink};
pub use stream::AudioStream;
pub use tone::{Tone, Waveform};
