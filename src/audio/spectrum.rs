use std::f64::consts::PI;

use serde_json::{Map, Value};

use super::capture::{bytes_to_samples, CaptureSource};
use crate::error::{BridgeError, Result};

/// At least this many samples are analysed per request.
const MIN_SAMPLES: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct BucketRequest {
    pub num_buckets: u32,
    pub min_hz: f64,
    pub max_hz: f64,
    pub sample_rate: u32,
}

impl Default for BucketRequest {
    fn default() -> Self {
        Self {
            num_buckets: 8,
            min_hz: 0.0,
            max_hz: 4000.0,
            sample_rate: 8000,
        }
    }
}

impl BucketRequest {
    pub fn validate(&self) -> Result<()> {
        if self.max_hz * 2.0 > self.sample_rate as f64 {
            return Err(BridgeError::invalid(
                "Max frequency is too high for the given sample rate. Increase the sample rate.",
            ));
        }
        if self.num_buckets == 0 || self.max_hz <= self.min_hz {
            return Err(BridgeError::invalid(
                "num_buckets must be positive and max_hz above min_hz",
            ));
        }
        if self.window() == 0 {
            return Err(BridgeError::invalid("bucket resolution exceeds the sample rate"));
        }
        Ok(())
    }

    /// Samples per DFT, chosen so one bin spans one bucket.
    pub fn window(&self) -> usize {
        let resolution = (self.max_hz - self.min_hz) / self.num_buckets as f64;
        (self.sample_rate as f64 / resolution) as usize
    }

    /// Windows to sum so that at least [`MIN_SAMPLES`] are analysed.
    pub fn repeats(&self) -> usize {
        MIN_SAMPLES.div_ceil(self.window().max(1))
    }
}

/// Magnitudes of the first `n / 2` DFT bins.
pub fn dft_magnitudes(samples: &[i16]) -> Vec<f64> {
    let n = samples.len();
    (0..n / 2)
        .map(|k| {
            let (mut re, mut im) = (0.0, 0.0);
            for (t, sample) in samples.iter().enumerate() {
                let angle = -2.0 * PI * (k * t) as f64 / n as f64;
                re += *sample as f64 * angle.cos();
                im += *sample as f64 * angle.sin();
            }
            (re * re + im * im).sqrt()
        })
        .collect()
}

/// Sums bin magnitudes over consecutive windows, keyed by bin frequency.
pub fn accumulate_buckets<'a>(
    request: &BucketRequest,
    windows: impl IntoIterator<Item = &'a [i16]>,
) -> Map<String, Value> {
    let window = request.window();
    let mut totals = vec![0.0f64; window / 2];
    for samples in windows {
        for (total, magnitude) in totals.iter_mut().zip(dft_magnitudes(samples)) {
            *total += magnitude;
        }
    }

    let mut buckets = Map::new();
    for (bin, total) in totals.into_iter().enumerate() {
        let frequency = bin as f64 * request.sample_rate as f64 / window as f64;
        if request.min_hz <= frequency && frequency < request.max_hz {
            buckets.insert(format!("{:?}", frequency), Value::from(total));
        }
    }
    buckets
}

/// Reads enough audio from `source` and returns the bucket map.
pub fn capture_buckets(source: &mut dyn CaptureSource, request: &BucketRequest) -> Result<Map<String, Value>> {
    request.validate()?;
    let window = request.window();

    let mut windows = Vec::with_capacity(request.repeats());
    let mut pending: Vec<u8> = Vec::new();
    while windows.len() < request.repeats() {
        while pending.len() < window * 2 {
            let chunk = source
                .read()
                .map_err(|e| BridgeError::Unavailable(format!("microphone ({})", e)))?;
            pending.extend_from_slice(&chunk);
        }
        let rest = pending.split_off(window * 2);
        windows.push(bytes_to_samples(&pending));
        pending = rest;
    }

    Ok(accumulate_buckets(
        request,
        windows.iter().map(|samples| samples.as_slice()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_request_uses_sixteen_sample_windows() {
        let request = BucketRequest::default();
        assert_eq!(request.window(), 16);
        assert_eq!(request.repeats(), 4);
        assert!(request.validate().is_ok());

        let too_high = BucketRequest {
            max_hz: 5000.0,
            ..request
        };
        assert!(matches!(too_high.validate(), Err(BridgeError::InvalidArgument(_))));
    }

    #[test]
    fn pure_tone_lands_in_its_bucket() {
        let request = BucketRequest::default();
        // 1500 Hz sampled at 8 kHz: exactly bin 3 of a 16 sample window
        let samples: Vec<i16> = (0..16)
            .map(|t| (10000.0 * (2.0 * PI * 1500.0 * t as f64 / 8000.0).sin()) as i16)
            .collect();

        let buckets = accumulate_buckets(&request, [samples.as_slice()]);
        assert_eq!(buckets.len(), 8);
        let loudest = buckets
            .iter()
            .max_by(|a, b| a.1.as_f64().unwrap().total_cmp(&b.1.as_f64().unwrap()))
            .unwrap();
        assert_eq!(loudest.0, "1500.0");
    }
}
