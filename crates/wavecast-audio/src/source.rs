//! Sample source abstraction over the capture hardware.
//!
//! Implementations deliver raw 32-bit-slot frames (see [`crate::convert`])
//! through a bounded-timeout read, so the capture loop can always service its
//! stop flag and watchdog. `MockSource` scripts reads for tests; `ToneSource`
//! generates a sine for running without hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wavecast_foundation::clock::TestClock;
use wavecast_foundation::{AudioError, SUPPORTED_SAMPLE_RATES};

use crate::convert::RAW_BYTES_PER_FRAME;

pub trait SampleSource: Send {
    /// Configure for the given sample rate. Must be called before `start`.
    fn init(&mut self, sample_rate: u32) -> Result<(), AudioError>;

    fn start(&mut self) -> Result<(), AudioError>;

    fn stop(&mut self);

    /// Read up to `buf.len()` bytes of whole raw frames, waiting at most
    /// `timeout`. Returns 0 on timeout; that is not an error.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, AudioError>;

    /// Stop, reconfigure, and restart at a new rate. Causes an audible gap in
    /// the capture stream; callers own communicating that to listeners.
    fn change_sample_rate(&mut self, sample_rate: u32) -> Result<(), AudioError> {
        self.stop();
        self.init(sample_rate)?;
        self.start()
    }

    fn sample_rate(&self) -> u32;
}

fn check_rate(sample_rate: u32) -> Result<(), AudioError> {
    if SUPPORTED_SAMPLE_RATES.contains(&sample_rate) {
        Ok(())
    } else {
        Err(AudioError::UnsupportedRate { rate: sample_rate })
    }
}

// ─── Mock source ─────────────────────────────────────────────────────────

/// One scripted outcome of a `read` call.
#[derive(Debug, Clone)]
pub enum MockRead {
    Data(Vec<u8>),
    Timeout,
    Error(String),
}

/// Lifecycle call counters, shared with the test that owns the script.
#[derive(Debug, Default)]
pub struct MockCounters {
    pub init_calls: AtomicU32,
    pub start_calls: AtomicU32,
    pub stop_calls: AtomicU32,
}

/// Scripted sample source. Plays back its script one outcome per `read`;
/// when the script runs dry it returns `after_script` data forever (or times
/// out, if none was set). An attached [`TestClock`] is advanced on every
/// read so watchdog windows elapse deterministically.
pub struct MockSource {
    script: VecDeque<MockRead>,
    after_script: Option<Vec<u8>>,
    sample_rate: u32,
    running: bool,
    counters: Arc<MockCounters>,
    clock: Option<(Arc<TestClock>, Duration)>,
}

impl MockSource {
    pub fn new(script: Vec<MockRead>) -> Self {
        Self {
            script: script.into(),
            after_script: None,
            sample_rate: 48_000,
            running: false,
            counters: Arc::new(MockCounters::default()),
            clock: None,
        }
    }

    /// After the script is exhausted, keep returning this chunk.
    pub fn then_data_forever(mut self, chunk: Vec<u8>) -> Self {
        self.after_script = Some(chunk);
        self
    }

    /// Advance `clock` by `per_read` on every read call, standing in for the
    /// wall time a bounded-timeout read would consume.
    pub fn with_clock(mut self, clock: Arc<TestClock>, per_read: Duration) -> Self {
        self.clock = Some((clock, per_read));
        self
    }

    pub fn counters(&self) -> Arc<MockCounters> {
        Arc::clone(&self.counters)
    }
}

impl SampleSource for MockSource {
    fn init(&mut self, sample_rate: u32) -> Result<(), AudioError> {
        check_rate(sample_rate)?;
        self.counters.init_calls.fetch_add(1, Ordering::SeqCst);
        self.sample_rate = sample_rate;
        Ok(())
    }

    fn start(&mut self) -> Result<(), AudioError> {
        self.counters.start_calls.fetch_add(1, Ordering::SeqCst);
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.counters.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.running = false;
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, AudioError> {
        if let Some((clock, step)) = &self.clock {
            clock.advance(*step);
        }

        let outcome = self.script.pop_front().unwrap_or_else(|| {
            self.after_script
                .clone()
                .map(MockRead::Data)
                .unwrap_or(MockRead::Timeout)
        });

        match outcome {
            MockRead::Timeout => Ok(0),
            MockRead::Error(msg) => Err(AudioError::SourceRead(msg)),
            MockRead::Data(data) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

// ─── Tone source ─────────────────────────────────────────────────────────

/// Sine generator producing raw frames at real-time pace, for development
/// and demos without an ADC attached.
pub struct ToneSource {
    sample_rate: u32,
    freq_hz: f64,
    phase: f64,
    running: bool,
}

impl ToneSource {
    pub fn new(freq_hz: f64) -> Self {
        Self {
            sample_rate: 48_000,
            freq_hz,
            phase: 0.0,
            running: false,
        }
    }
}

impl Default for ToneSource {
    fn default() -> Self {
        Self::new(440.0)
    }
}

impl SampleSource for ToneSource {
    fn init(&mut self, sample_rate: u32) -> Result<(), AudioError> {
        check_rate(sample_rate)?;
        self.sample_rate = sample_rate;
        Ok(())
    }

    fn start(&mut self) -> Result<(), AudioError> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, AudioError> {
        if !self.running {
            return Ok(0);
        }

        let frames = buf.len() / RAW_BYTES_PER_FRAME;
        if frames == 0 {
            return Ok(0);
        }

        // Pace generation to real time so downstream behaves as with
        // hardware.
        let chunk_duration = Duration::from_secs_f64(frames as f64 / self.sample_rate as f64);
        std::thread::sleep(chunk_duration.min(timeout));

        let step = self.freq_hz * std::f64::consts::TAU / self.sample_rate as f64;
        for frame in buf[..frames * RAW_BYTES_PER_FRAME].chunks_exact_mut(RAW_BYTES_PER_FRAME) {
            let sample24 = (self.phase.sin() * 0.5 * 8_388_607.0) as i32;
            let slot = ((sample24 as u32) << 8).to_le_bytes();
            frame[..4].copy_from_slice(&slot);
            frame[4..].copy_from_slice(&slot);
            self.phase = (self.phase + step) % std::f64::consts::TAU;
        }
        Ok(frames * RAW_BYTES_PER_FRAME)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
