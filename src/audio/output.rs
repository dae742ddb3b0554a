use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, Sender};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{error, info};

/// Playback device fed in fixed periods of mono i16 samples.
pub trait AudioSink: Send {
    /// Blocks until the whole period has been queued on the device.
    fn write_period(&mut self, samples: &[i16]) -> anyhow::Result<()>;
}

/// Default output device through cpal.
///
/// The cpal stream lives on its own thread; this handle only owns the
/// producer side of the ring the device callback drains.
pub struct CpalSink {
    producer: HeapProd<i16>,
    // Dropping the sender lets the device thread exit
    _shutdown: Sender<()>,
}

impl CpalSink {
    pub fn open(sample_rate: u32, buffered_periods: usize, period_size: usize) -> anyhow::Result<Self> {
        let (producer, consumer) = HeapRb::<i16>::new(buffered_periods.max(1) * period_size.max(1)).split();
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let (ready_tx, ready_rx) = bounded::<anyhow::Result<()>>(1);

        thread::Builder::new()
            .name("speaker-output".to_string())
            .spawn(move || run_device(sample_rate, consumer, ready_tx, shutdown_rx))?;

        ready_rx
            .recv()
            .map_err(|_| anyhow::anyhow!("output device thread exited during start-up"))??;

        Ok(Self {
            producer,
            _shutdown: shutdown_tx,
        })
    }
}

impl AudioSink for CpalSink {
    fn write_period(&mut self, samples: &[i16]) -> anyhow::Result<()> {
        let mut offset = 0;
        while offset < samples.len() {
            let pushed = self.producer.push_slice(&samples[offset..]);
            offset += pushed;
            if pushed == 0 {
                thread::sleep(Duration::from_millis(1));
            }
        }
        Ok(())
    }
}

fn run_device(
    sample_rate: u32,
    mut consumer: HeapCons<i16>,
    ready: Sender<anyhow::Result<()>>,
    shutdown: Receiver<()>,
) {
    let stream = match build_stream(sample_rate, move |out: &mut [i16]| {
        let filled = consumer.pop_slice(out);
        out[filled..].fill(0);
    }) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    // Blocks until every sink handle is gone
    let _ = shutdown.recv();
    drop(stream);
    info!("output device closed");
}

fn build_stream<F>(sample_rate: u32, mut fill: F) -> anyhow::Result<cpal::Stream>
where
    F: FnMut(&mut [i16]) + Send + 'static,
{
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow::anyhow!("no output device available"))?;

    info!(device = %device.name().unwrap_or_default(), sample_rate, "opening output device");

    let range = device
        .supported_output_configs()?
        .filter(|range| {
            range.min_sample_rate().0 <= sample_rate && range.max_sample_rate().0 >= sample_rate
        })
        .min_by_key(|range| range.channels())
        .ok_or_else(|| anyhow::anyhow!("output device does not support {} Hz", sample_rate))?;

    let supported = range.with_sample_rate(cpal::SampleRate(sample_rate));
    let channels = supported.channels().max(1) as usize;
    let format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let err_fn = |err: cpal::StreamError| error!(error = %err, "output stream error");

    let mut mono: Vec<i16> = Vec::new();
    let stream = match format {
        cpal::SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &_| {
                mono.resize(data.len() / channels, 0);
                fill(&mut mono);
                for (frame, sample) in data.chunks_mut(channels).zip(&mono) {
                    frame.fill(*sample);
                }
            },
            err_fn,
            None,
        )?,
        cpal::SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &_| {
                mono.resize(data.len() / channels, 0);
                fill(&mut mono);
                for (frame, sample) in data.chunks_mut(channels).zip(&mono) {
                    frame.fill(*sample as f32 / i16::MAX as f32);
                }
            },
            err_fn,
            None,
        )?,
        other => return Err(anyhow::anyhow!("unsupported sample format {:?}", other)),
    };

    stream.play()?;
    Ok(stream)
}

/// In-memory sink, handy when no device is present.
#[derive(Default)]
pub struct MemorySink {
    pub samples: Vec<i16>,
    pub periods: usize,
}

impl AudioSink for MemorySink {
    fn write_period(&mut self, samples: &[i16]) -> anyhow::Result<()> {
        self.samples.extend_from_slice(samples);
        self.periods += 1;
        Ok(())
    }
}
