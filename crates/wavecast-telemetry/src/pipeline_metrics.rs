use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared metrics for cross-thread pipeline monitoring. Everything here is a
/// read-only snapshot path: no core behavior depends on these values.
#[derive(Clone)]
pub struct PipelineMetrics {
    // Capture side
    pub frames_captured: Arc<AtomicU64>,
    pub capture_underruns: Arc<AtomicU64>,
    pub capture_running: Arc<AtomicBool>,
    pub clipping: Arc<AtomicBool>,
    pub source_restarts: Arc<AtomicU64>,
    pub capture_chunks_per_sec: Arc<AtomicU64>, // chunks/s * 10
    pub last_capture_time: Arc<RwLock<Option<Instant>>>,

    // Ring buffer
    pub ring_overruns: Arc<AtomicU64>,
    pub buffer_fill_pct: Arc<AtomicUsize>,

    // Delivery side
    pub active_clients: Arc<AtomicUsize>,
    pub bytes_delivered: Arc<AtomicU64>,
    pub starvation_events: Arc<AtomicU64>,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self {
            frames_captured: Arc::new(AtomicU64::new(0)),
            capture_underruns: Arc::new(AtomicU64::new(0)),
            capture_running: Arc::new(AtomicBool::new(false)),
            clipping: Arc::new(AtomicBool::new(false)),
            source_restarts: Arc::new(AtomicU64::new(0)),
            capture_chunks_per_sec: Arc::new(AtomicU64::new(0)),
            last_capture_time: Arc::new(RwLock::new(None)),

            ring_overruns: Arc::new(AtomicU64::new(0)),
            buffer_fill_pct: Arc::new(AtomicUsize::new(0)),

            active_clients: Arc::new(AtomicUsize::new(0)),
            bytes_delivered: Arc::new(AtomicU64::new(0)),
            starvation_events: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl PipelineMetrics {
    pub fn record_capture_chunk(&self, frames: u64) {
        self.frames_captured.fetch_add(frames, Ordering::Relaxed);
        *self.last_capture_time.write() = Some(Instant::now());
    }

    pub fn record_underrun(&self) {
        self.capture_underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_source_restart(&self) {
        self.source_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_clipping(&self, clipping: bool) {
        self.clipping.store(clipping, Ordering::Relaxed);
    }

    pub fn set_capture_running(&self, running: bool) {
        self.capture_running.store(running, Ordering::Relaxed);
    }

    pub fn update_buffer_fill(&self, fill_percent: usize) {
        self.buffer_fill_pct
            .store(fill_percent.min(100), Ordering::Relaxed);
    }

    pub fn update_capture_rate(&self, chunks_per_sec: f64) {
        self.capture_chunks_per_sec
            .store((chunks_per_sec * 10.0) as u64, Ordering::Relaxed);
    }

    pub fn record_delivery(&self, bytes: u64) {
        self.bytes_delivered.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_starvation(&self) {
        self.starvation_events.fetch_add(1, Ordering::Relaxed);
    }
}

/// Counts events and reports a rate once per second.
#[derive(Debug)]
pub struct FpsTracker {
    last_update: Instant,
    event_count: u64,
}

impl FpsTracker {
    pub fn new() -> Self {
        Self {
            last_update: Instant::now(),
            event_count: 0,
        }
    }

    pub fn tick(&mut self) -> Option<f64> {
        self.event_count += 1;
        let elapsed = self.last_update.elapsed();

        if elapsed >= Duration::from_secs(1) {
            let rate = self.event_count as f64 / elapsed.as_secs_f64();
            self.last_update = Instant::now();
            self.event_count = 0;
            Some(rate)
        } else {
            None
        }
    }
}

impl Default for FpsTracker {
    fn default() -> Self {
        Self::new()
    }
}
