use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapRb};
use tracing::{error, info};

/// Blocking source of mono S16LE PCM.
///
/// Not `Send`: a device stream stays on the thread that opened it.
pub trait CaptureSource {
    /// Returns whatever PCM bytes are ready, possibly none after a short wait.
    fn read(&mut self) -> anyhow::Result<Vec<u8>>;

    fn sample_rate(&self) -> u32;
}

/// Opens a capture device at the given sample rate, on the calling thread.
pub type CaptureFactory = dyn Fn(u32) -> anyhow::Result<Box<dyn CaptureSource>> + Send + Sync;

pub fn cpal_capture_factory() -> Arc<CaptureFactory> {
    Arc::new(|sample_rate| Ok(Box::new(CpalCapture::open(sample_rate)?) as Box<dyn CaptureSource>))
}

/// Default input device through cpal, buffered in a ring of i16 samples.
pub struct CpalCapture {
    _stream: cpal::Stream,
    consumer: HeapCons<i16>,
    scratch: Vec<i16>,
    sample_rate: u32,
}

const IDLE_WAIT: Duration = Duration::from_millis(5);

impl CpalCapture {
    pub fn open(sample_rate: u32) -> anyhow::Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow::anyhow!("no input device available"))?;

        info!(device = %device.name().unwrap_or_default(), sample_rate, "opening capture device");

        // Fewest channels wins; only the first channel is kept
        let range = device
            .supported_input_configs()?
            .filter(|range| {
                range.min_sample_rate().0 <= sample_rate && range.max_sample_rate().0 >= sample_rate
            })
            .min_by_key(|range| range.channels())
            .ok_or_else(|| anyhow::anyhow!("capture device does not support {} Hz", sample_rate))?;

        let supported = range.with_sample_rate(cpal::SampleRate(sample_rate));
        let channels = supported.channels().max(1) as usize;
        let format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        // Two seconds of headroom
        let (mut producer, consumer) = HeapRb::<i16>::new(sample_rate as usize * 2).split();

        let err_fn = |err: cpal::StreamError| error!(error = %err, "capture stream error");

        let stream = match format {
            cpal::SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &_| push_first_channel(data, channels, &mut producer, |s| s),
                err_fn,
                None,
            )?,
            cpal::SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &_| {
                    push_first_channel(data, channels, &mut producer, f32_to_i16)
                },
                err_fn,
                None,
            )?,
            other => return Err(anyhow::anyhow!("unsupported sample format {:?}", other)),
        };

        stream.play()?;

        Ok(Self {
            _stream: stream,
            consumer,
            scratch: vec![0; 4096],
            sample_rate,
        })
    }
}

impl CaptureSource for CpalCapture {
    fn read(&mut self) -> anyhow::Result<Vec<u8>> {
        let count = self.consumer.pop_slice(&mut self.scratch);
        if count == 0 {
            std::thread::sleep(IDLE_WAIT);
            return Ok(Vec::new());
        }
        Ok(samples_to_bytes(&self.scratch[..count]))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

// Ring full means the reader fell behind; drop input (lossy)
fn push_first_channel<T, P>(input: &[T], channels: usize, producer: &mut P, convert: impl Fn(T) -> i16)
where
    T: Copy,
    P: Producer<Item = i16>,
{
    for frame in input.chunks(channels) {
        let _ = producer.try_push(convert(frame[0]));
    }
}

pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
