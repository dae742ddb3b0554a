use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use cubelink::audio::{AudioStream, CaptureSource};
use cubelink::voice::{
    Acknowledger, SpeechRecognizer, VoiceBackend, VoiceConfig, VoicePipeline, WakeWordDetector,
};
use cubelink::BridgeError;

const WAKE: u8 = 0xAA;
const SPEECH: u8 = 0xBB;
const CHUNK: usize = 16;

struct ScriptedMic {
    chunks: Receiver<Vec<u8>>,
}

impl CaptureSource for ScriptedMic {
    fn read(&mut self) -> anyhow::Result<Vec<u8>> {
        Ok(self
            .chunks
            .recv_timeout(Duration::from_millis(5))
            .unwrap_or_default())
    }

    fn sample_rate(&self) -> u32 {
        16000
    }
}

struct MarkerDetector;

impl WakeWordDetector for MarkerDetector {
    fn feed(&mut self, chunk: &[u8]) -> anyhow::Result<bool> {
        Ok(chunk.first() == Some(&WAKE))
    }
}

struct MarkerRecognizer {
    resets: Arc<AtomicUsize>,
}

impl SpeechRecognizer for MarkerRecognizer {
    fn accept(&mut self, chunk: &[u8]) -> anyhow::Result<Option<String>> {
        Ok((chunk.first() == Some(&SPEECH)).then(|| "turn on the lights".to_string()))
    }

    fn reset(&mut self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Transcript(Mutex<Vec<String>>);

impl Acknowledger for Transcript {
    fn acknowledge(&self, phrase: &str) {
        self.0.lock().push(phrase.to_string());
    }
}

#[derive(Default)]
struct Counters {
    recognizers_built: AtomicUsize,
    resets: Arc<AtomicUsize>,
}

struct FakeBackend {
    chunks: Receiver<Vec<u8>>,
    transcript: Arc<Transcript>,
    counters: Arc<Counters>,
    fail_open: bool,
}

impl VoiceBackend for FakeBackend {
    fn open_capture(&self, _sample_rate: u32) -> anyhow::Result<Box<dyn CaptureSource>> {
        if self.fail_open {
            anyhow::bail!("no microphone");
        }
        Ok(Box::new(ScriptedMic {
            chunks: self.chunks.clone(),
        }))
    }

    fn wake_word_detector(&self) -> anyhow::Result<Box<dyn WakeWordDetector>> {
        Ok(Box::new(MarkerDetector))
    }

    fn recognizer(&self, _sample_rate: u32) -> anyhow::Result<Box<dyn SpeechRecognizer>> {
        self.counters.recognizers_built.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MarkerRecognizer {
            resets: Arc::clone(&self.counters.resets),
        }))
    }

    fn acknowledger(&self) -> Arc<dyn Acknowledger> {
        self.transcript.clone()
    }
}

struct Rig {
    voice: VoicePipeline,
    mic: Sender<Vec<u8>>,
    transcript: Arc<Transcript>,
    counters: Arc<Counters>,
}

fn rig(fail_open: bool, rebuild_every: u32) -> Rig {
    let (mic, rx) = unbounded();
    let transcript = Arc::new(Transcript::default());
    let counters = Arc::new(Counters::default());
    let backend = FakeBackend {
        chunks: rx,
        transcript: Arc::clone(&transcript),
        counters: Arc::clone(&counters),
        fail_open,
    };
    let config = VoiceConfig {
        chunk_size: CHUNK,
        rebuild_every,
        ..VoiceConfig::default()
    };
    Rig {
        voice: VoicePipeline::new(Arc::new(backend), config),
        mic,
        transcript,
        counters,
    }
}

fn pipeline(fail_open: bool) -> (VoicePipeline, Sender<Vec<u8>>, Arc<Transcript>) {
    let Rig {
        voice,
        mic,
        transcript,
        ..
    } = rig(fail_open, VoiceConfig::default().rebuild_every);
    (voice, mic, transcript)
}

/// Sends the wake word and gives the wake worker time to open the window.
fn wake(mic: &Sender<Vec<u8>>) {
    mic.send(vec![WAKE; CHUNK]).unwrap();
    thread::sleep(Duration::from_millis(50));
}

#[test]
fn test_wake_word_then_sentence() {
    let (voice, mic, transcript) = pipeline(false);

    // 1. Both starts are acknowledged; only the first spawns a session
    assert!(voice.start().unwrap());
    assert!(!voice.start().unwrap());

    // 2. Speech before the wake word is never recognised
    mic.send(vec![SPEECH; CHUNK]).unwrap();
    assert_eq!(voice.wait_for_sentence(Some(Duration::from_millis(100))).unwrap(), None);

    // 3. Wake word opens the window, speech lands in the queue
    mic.send(vec![WAKE; CHUNK]).unwrap();
    thread::sleep(Duration::from_millis(50));
    mic.send(vec![SPEECH; CHUNK]).unwrap();
    let sentence = voice.wait_for_sentence(Some(Duration::from_secs(2))).unwrap();
    assert_eq!(sentence.as_deref(), Some("turn on the lights"));
    assert_eq!(
        *transcript.0.lock(),
        vec!["at your service", "at your service", "yes"]
    );

    // 4. Stopped pipeline refuses to wait
    assert!(voice.stop());
    assert!(!voice.stop());
    assert!(matches!(voice.wait_for_sentence(None), Err(BridgeError::NotActive)));

    println!("Voice Pipeline Passed");
}

#[test]
fn test_stop_releases_a_waiting_caller() {
    let (voice, _mic, _) = pipeline(false);
    let voice = Arc::new(voice);
    voice.start().unwrap();

    let waiter = {
        let voice = Arc::clone(&voice);
        thread::spawn(move || voice.wait_for_sentence(None))
    };
    thread::sleep(Duration::from_millis(50));
    voice.stop();

    assert_eq!(waiter.join().unwrap().unwrap(), None);

    println!("Stop Releases Waiter Passed");
}

#[test]
fn test_capture_open_failure_stays_idle() {
    let (voice, _mic, transcript) = pipeline(true);

    let err = voice.start().unwrap_err();
    assert_eq!(err.kind(), "Unavailable");
    assert!(!voice.is_active());
    assert!(transcript.0.lock().is_empty());

    println!("Open Failure Passed");
}

#[test]
fn test_terminate_releases_blocked_readers() {
    let stream = Arc::new(AudioStream::new(4));
    let reader = {
        let stream = Arc::clone(&stream);
        thread::spawn(move || stream.read())
    };
    thread::sleep(Duration::from_millis(30));

    stream.terminate();
    stream.terminate();

    assert_eq!(reader.join().unwrap(), None);
    assert!(!stream.write(vec![1, 2, 3]));
    assert!(stream.is_terminated());

    println!("Stream Terminate Passed");
}

#[test]
fn test_recognizer_is_rebuilt_after_every_few_utterances() {
    let Rig {
        voice, mic, counters, ..
    } = rig(false, 2);
    voice.start().unwrap();
    assert_eq!(counters.recognizers_built.load(Ordering::SeqCst), 1);

    // 1. One window, four utterances
    wake(&mic);
    for _ in 0..4 {
        mic.send(vec![SPEECH; CHUNK]).unwrap();
    }
    for _ in 0..4 {
        let sentence = voice.wait_for_sentence(Some(Duration::from_secs(2))).unwrap();
        assert!(sentence.is_some());
    }

    // 2. Fresh recogniser after the 2nd and the 4th
    let started = Instant::now();
    while counters.recognizers_built.load(Ordering::SeqCst) < 3
        && started.elapsed() < Duration::from_secs(2)
    {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(counters.recognizers_built.load(Ordering::SeqCst), 3);
    voice.stop();

    println!("Recogniser Rebuild Passed");
}

#[test]
fn test_each_wake_word_resets_the_recognizer() {
    let Rig {
        voice, mic, counters, ..
    } = rig(false, 100);
    voice.start().unwrap();

    // 1. Nothing reset before the first wake word
    assert_eq!(counters.resets.load(Ordering::SeqCst), 0);

    // 2. Reset happens once per activation, before the next chunk
    for expected in 1..=2 {
        wake(&mic);
        mic.send(vec![SPEECH; CHUNK]).unwrap();
        let sentence = voice.wait_for_sentence(Some(Duration::from_secs(2))).unwrap();
        assert_eq!(sentence.as_deref(), Some("turn on the lights"));
        assert_eq!(counters.resets.load(Ordering::SeqCst), expected);
    }
    voice.stop();

    println!("Recogniser Reset Passed");
}
