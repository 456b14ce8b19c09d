//! Capture engine: owns the sample source and the ring writer.
//!
//! Runs on a dedicated thread so nothing else on the runtime can delay a
//! hardware read; a missed capture window is unrecoverable data loss. The
//! only blocking point is the source's bounded-timeout read; every iteration
//! services the stop flag and the fault watchdog.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use wavecast_foundation::clock::SharedClock;
use wavecast_foundation::{AudioError, CapturePhase, StateManager, StreamFormat};
use wavecast_telemetry::{FpsTracker, PipelineMetrics};

use crate::convert::{self, RAW_BYTES_PER_FRAME};
use crate::detector::ClipDetector;
use crate::ring_buffer::RingWriter;
use crate::source::SampleSource;
use crate::watchdog::FaultWatchdog;

/// Frames per source read, matching the DMA descriptor size of the original
/// hardware (5 ms at 48 kHz).
pub const CHUNK_FRAMES: usize = 240;

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub format: StreamFormat,
    pub chunk_frames: usize,
    pub read_timeout: Duration,
    pub watchdog_window: Duration,
    pub clip_debounce: Duration,
}

impl CaptureConfig {
    pub fn new(format: StreamFormat) -> Self {
        Self {
            format,
            chunk_frames: CHUNK_FRAMES,
            read_timeout: Duration::from_millis(100),
            watchdog_window: Duration::from_secs(5),
            clip_debounce: Duration::from_secs(1),
        }
    }
}

/// Counters mutated only by the capture thread; read by telemetry paths.
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub total_frames: AtomicU64,
    pub underruns: AtomicU64,
    pub source_restarts: AtomicU64,
    pub clipping: AtomicBool,
}

/// Handle to the running capture thread. Constructing it starts capture;
/// `stop` is cooperative and idempotent.
pub struct CaptureEngine {
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
    state: Arc<StateManager>,
    metrics: Arc<PipelineMetrics>,
}

impl CaptureEngine {
    pub fn start(
        mut source: Box<dyn SampleSource>,
        writer: RingWriter,
        cfg: CaptureConfig,
        state: Arc<StateManager>,
        metrics: Arc<PipelineMetrics>,
        clock: SharedClock,
    ) -> Result<Self, AudioError> {
        state
            .transition(CapturePhase::Starting)
            .map_err(|e| AudioError::Fatal(e.to_string()))?;

        source.init(cfg.format.sample_rate)?;
        if let Err(e) = source.start() {
            let _ = state.transition(CapturePhase::Stopped);
            return Err(e);
        }

        let stats = Arc::new(CaptureStats::default());
        let running = Arc::new(AtomicBool::new(true));

        let worker = CaptureWorker {
            source,
            writer,
            cfg,
            stats: Arc::clone(&stats),
            state: Arc::clone(&state),
            metrics: Arc::clone(&metrics),
            running: Arc::clone(&running),
        };

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || worker.run(clock))
            .map_err(|e| {
                let _ = state.transition(CapturePhase::Stopped);
                AudioError::Fatal(format!("Failed to spawn capture thread: {}", e))
            })?;

        state
            .transition(CapturePhase::Running)
            .map_err(|e| AudioError::Fatal(e.to_string()))?;
        metrics.set_capture_running(true);
        tracing::info!("Audio capture started");

        Ok(Self {
            handle: Some(handle),
            running,
            stats,
            state,
            metrics,
        })
    }

    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.state.transition(CapturePhase::Stopping);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        let _ = self.state.transition(CapturePhase::Stopped);
        self.metrics.set_capture_running(false);
        tracing::info!("Audio capture stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Shared flag the delivery tasks poll to exit when capture ends.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

struct CaptureWorker {
    source: Box<dyn SampleSource>,
    writer: RingWriter,
    cfg: CaptureConfig,
    stats: Arc<CaptureStats>,
    state: Arc<StateManager>,
    metrics: Arc<PipelineMetrics>,
    running: Arc<AtomicBool>,
}

impl CaptureWorker {
    fn run(mut self, clock: SharedClock) {
        tracing::info!("Capture loop starting");

        let raw_chunk_bytes = self.cfg.chunk_frames * RAW_BYTES_PER_FRAME;
        let mut raw = vec![0u8; raw_chunk_bytes];
        let mut canonical: Vec<u8> =
            Vec::with_capacity(self.cfg.chunk_frames * self.cfg.format.bytes_per_frame());

        let mut watchdog = FaultWatchdog::new(self.cfg.watchdog_window, clock);
        let mut clip = ClipDetector::for_cadence(
            self.cfg.format.sample_rate,
            self.cfg.chunk_frames,
            self.cfg.clip_debounce,
        );
        let mut rate_tracker = FpsTracker::new();
        let mut chunk_count: u64 = 0;

        while self.running.load(Ordering::Acquire) {
            match self.source.read(&mut raw, self.cfg.read_timeout) {
                Ok(0) => self.on_underrun(&mut watchdog),
                Ok(n) => {
                    watchdog.feed();

                    // Whole frames only; a partial trailing frame is dropped,
                    // not carried over.
                    let whole = n - n % RAW_BYTES_PER_FRAME;
                    if whole == 0 {
                        continue;
                    }

                    canonical.clear();
                    let frames = convert::raw_to_canonical(&raw[..whole], &mut canonical);
                    self.writer.write(&canonical);

                    self.stats
                        .total_frames
                        .fetch_add(frames as u64, Ordering::Release);
                    self.metrics.record_capture_chunk(frames as u64);

                    // Probe one sample per chunk for clipping.
                    let sample =
                        convert::decode_sample24([canonical[0], canonical[1], canonical[2]]);
                    if let Some(raised) = clip.observe(sample) {
                        self.stats.clipping.store(raised, Ordering::Release);
                        self.metrics.set_clipping(raised);
                        if raised {
                            tracing::warn!("Sustained clipping detected");
                        } else {
                            tracing::info!("Clipping cleared");
                        }
                    }

                    chunk_count += 1;
                    if chunk_count == 1 {
                        tracing::info!(frames, "First capture chunk received");
                    }
                    if let Some(rate) = rate_tracker.tick() {
                        self.metrics.update_capture_rate(rate);
                    }
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!("Transient source error: {}", e);
                    self.on_underrun(&mut watchdog);
                }
                Err(e) => {
                    tracing::error!("Source read failed: {}", e);
                    self.on_underrun(&mut watchdog);
                }
            }
        }

        self.source.stop();
        tracing::info!("Capture loop exited");
    }

    /// Missed read: count it, and once per watchdog window run a single
    /// stop/start recovery cycle against the source.
    fn on_underrun(&mut self, watchdog: &mut FaultWatchdog) {
        let count = self.stats.underruns.fetch_add(1, Ordering::Relaxed) + 1;
        self.metrics.record_underrun();
        if count % 100 == 1 {
            tracing::warn!(count, "Sample source read underrun");
        }

        if !watchdog.expired() {
            return;
        }

        tracing::error!(
            "No source data for {:?}, restarting source",
            watchdog.since_last_good()
        );
        let _ = self.state.transition(CapturePhase::Faulted {
            reason: "source watchdog expired".to_string(),
        });
        let _ = self.state.transition(CapturePhase::Recovering);

        self.source.stop();
        thread::sleep(Duration::from_millis(100));
        match self.source.start() {
            Ok(()) => {
                self.stats.source_restarts.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_source_restart();
                let _ = self.state.transition(CapturePhase::Running);
                tracing::info!("Source restarted after fault");
            }
            Err(e) => {
                tracing::error!("Source restart failed: {}", e);
                let _ = self.state.transition(CapturePhase::Faulted {
                    reason: format!("restart failed: {}", e),
                });
            }
        }
        // One recovery cycle per window, successful or not.
        watchdog.reset();
    }
}
