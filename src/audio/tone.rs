use std::f64::consts::PI;
use std::str::FromStr;

use rand::Rng;

use super::output::AudioSink;
use crate::error::BridgeError;
use crate::kernel::PhaseGuard;

pub const TONE_SAMPLE_RATE: u32 = 16000;
/// Samples written to the device per write.
pub const PERIOD_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    WhiteNoise,
}

impl Waveform {
    fn sample(self, t: f64, frequency: f64, rng: &mut impl Rng) -> f64 {
        match self {
            Waveform::Sine => (2.0 * PI * frequency * t).sin(),
            Waveform::Square => {
                if (t * frequency).rem_euclid(1.0) < 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
            Waveform::WhiteNoise => rng.gen::<f64>(),
        }
    }
}

impl FromStr for Waveform {
    type Err = BridgeError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "sine_wave" => Ok(Waveform::Sine),
            "square_wave" => Ok(Waveform::Square),
            "white_noise" => Ok(Waveform::WhiteNoise),
            other => Err(BridgeError::invalid(format!("unknown waveform {:?}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tone {
    pub frequency: f64,
    pub duration: f64,
    pub volume: f64,
    pub waveform: Waveform,
    /// Linear fade in and out, seconds.
    pub ramp: f64,
    /// Silence appended after the tone so the device drains cleanly.
    pub trailing_samples: usize,
    pub sample_rate: u32,
}

impl Default for Tone {
    fn default() -> Self {
        Self {
            frequency: 261.626,
            duration: 0.5,
            volume: 0.25,
            waveform: Waveform::Sine,
            ramp: 0.0035,
            trailing_samples: 512,
            sample_rate: TONE_SAMPLE_RATE,
        }
    }
}

impl Tone {
    fn envelope(&self, t: f64) -> f64 {
        if self.ramp <= 0.0 {
            1.0
        } else if t < self.ramp {
            t / self.ramp
        } else if t > self.duration - self.ramp {
            ((self.duration - t) / self.ramp).max(0.0)
        } else {
            1.0
        }
    }

    /// Samples of tone, and of tone plus trailing silence.
    ///
    /// Durations must be finite and non-negative and the total must fit
    /// in memory addressing; callers get `InvalidArgument` otherwise.
    pub fn sample_counts(&self) -> Result<(usize, usize), BridgeError> {
        for (name, value) in [
            ("frequency", self.frequency),
            ("duration", self.duration),
            ("volume", self.volume),
            ("ramp", self.ramp),
        ] {
            if !value.is_finite() {
                return Err(BridgeError::invalid(format!("{} must be a finite number", name)));
            }
        }
        if self.duration < 0.0 {
            return Err(BridgeError::invalid("duration must not be negative"));
        }
        if self.sample_rate == 0 {
            return Err(BridgeError::invalid("sample rate must be positive"));
        }

        let tone = (self.duration * self.sample_rate as f64).floor();
        if tone >= usize::MAX as f64 {
            return Err(BridgeError::invalid(format!("duration {} is too long", self.duration)));
        }
        let tone = tone as usize;
        let total = tone
            .checked_add(self.trailing_samples)
            .ok_or_else(|| BridgeError::invalid("trailing_samples is too large"))?;
        Ok((tone, total))
    }

    fn sample_at(&self, index: usize, tone_samples: usize, rng: &mut impl Rng) -> i16 {
        if index >= tone_samples {
            return 0;
        }
        let t = index as f64 / self.sample_rate as f64;
        let value = self.volume * self.waveform.sample(t, self.frequency, rng);
        to_word(self.envelope(t) * value)
    }

    /// Synthesises and writes the tone one period at a time; stops early
    /// once `phase` moves on. Returns the number of periods written.
    pub fn play(&self, sink: &mut dyn AudioSink, phase: &PhaseGuard) -> anyhow::Result<usize> {
        let (tone_samples, total) = self.sample_counts()?;
        let mut rng = rand::thread_rng();
        let mut period = Vec::with_capacity(PERIOD_SIZE);
        let mut written = 0;
        let mut index = 0;

        while index < total {
            let end = total.min(index + PERIOD_SIZE);
            period.clear();
            period.extend((index..end).map(|i| self.sample_at(i, tone_samples, &mut rng)));
            sink.write_period(&period)?;
            written += 1;
            index = end;
            if phase.interrupted() {
                break;
            }
        }
        Ok(written)
    }
}

fn to_word(sample: f64) -> i16 {
    (sample * 32768.0).clamp(-32768.0, 32767.0) as i16
}
