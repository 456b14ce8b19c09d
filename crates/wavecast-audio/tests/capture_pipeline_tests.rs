//! End-to-end tests for the capture pipeline: mock source through the
//! capture engine into the ring buffer, watchdog-driven recovery, and
//! clipping detection.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use wavecast_audio::capture::{CaptureConfig, CaptureEngine};
use wavecast_audio::ring_buffer::AudioRingBuffer;
use wavecast_audio::source::{MockRead, MockSource};
use wavecast_foundation::clock::{real_clock, TestClock};
use wavecast_foundation::{StateManager, StreamFormat};
use wavecast_telemetry::PipelineMetrics;

/// One raw stereo frame: left payload 0x030201, right payload 0x070605.
fn raw_frame() -> Vec<u8> {
    vec![0x00, 0x01, 0x02, 0x03, 0x00, 0x05, 0x06, 0x07]
}

/// A raw frame whose left sample sits at positive full scale.
fn clipped_frame() -> Vec<u8> {
    vec![0x00, 0xFF, 0xFF, 0x7F, 0x00, 0x00, 0x00, 0x00]
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn capture_writes_canonical_frames_to_ring() {
    let script = vec![
        MockRead::Data(raw_frame()),
        MockRead::Data(raw_frame()),
        MockRead::Data(raw_frame()),
    ];
    let source = MockSource::new(script);

    let (writer, handle) = AudioRingBuffer::new(1024, 1, 0).split();
    handle.register_client(0).unwrap();

    let format = StreamFormat::new(48_000).unwrap();
    let mut engine = CaptureEngine::start(
        Box::new(source),
        writer,
        CaptureConfig::new(format),
        Arc::new(StateManager::new()),
        Arc::new(PipelineMetrics::default()),
        real_clock(),
    )
    .unwrap();

    let stats = engine.stats();
    assert!(wait_until(Duration::from_secs(2), || {
        stats.total_frames.load(Ordering::Acquire) >= 3
    }));
    engine.stop();

    let mut buf = [0u8; 64];
    let n = handle.read(0, &mut buf).unwrap();
    assert_eq!(n, 18);
    for chunk in buf[..18].chunks_exact(6) {
        assert_eq!(chunk, [0x01, 0x02, 0x03, 0x05, 0x06, 0x07]);
    }
}

#[test]
fn watchdog_runs_exactly_one_recovery_cycle() {
    // 60 timeouts at 100 ms of virtual time apiece: the 5 s window expires
    // mid-script, and data flows again after it.
    let clock = Arc::new(TestClock::new());
    let source = MockSource::new(vec![MockRead::Timeout; 60])
        .with_clock(Arc::clone(&clock), Duration::from_millis(100))
        .then_data_forever(raw_frame());
    let counters = source.counters();

    let (writer, _handle) = AudioRingBuffer::new(4096, 1, 0).split();
    let format = StreamFormat::new(48_000).unwrap();
    let mut engine = CaptureEngine::start(
        Box::new(source),
        writer,
        CaptureConfig::new(format),
        Arc::new(StateManager::new()),
        Arc::new(PipelineMetrics::default()),
        clock,
    )
    .unwrap();

    let stats = engine.stats();
    assert!(wait_until(Duration::from_secs(2), || {
        stats.source_restarts.load(Ordering::Relaxed) >= 1
    }));

    // Data is flowing again: no further restart.
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(stats.source_restarts.load(Ordering::Relaxed), 1);
    assert_eq!(counters.start_calls.load(Ordering::SeqCst), 2);
    assert_eq!(counters.stop_calls.load(Ordering::SeqCst), 1);
    assert!(stats.underruns.load(Ordering::Relaxed) >= 50);

    engine.stop();
    assert_eq!(counters.stop_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn sustained_clipping_raises_the_flag() {
    let script = vec![MockRead::Data(clipped_frame()); 30];
    let source = MockSource::new(script);

    let (writer, _handle) = AudioRingBuffer::new(4096, 1, 0).split();
    let format = StreamFormat::new(48_000).unwrap();
    let mut cfg = CaptureConfig::new(format);
    // 10-chunk debounce at the default 240-frame cadence.
    cfg.clip_debounce = Duration::from_millis(50);

    let mut engine = CaptureEngine::start(
        Box::new(source),
        writer,
        cfg,
        Arc::new(StateManager::new()),
        Arc::new(PipelineMetrics::default()),
        real_clock(),
    )
    .unwrap();

    let stats = engine.stats();
    assert!(wait_until(Duration::from_secs(2), || {
        stats.clipping.load(Ordering::Acquire)
    }));
    engine.stop();
}

#[test]
fn stop_is_idempotent_and_stops_the_source() {
    let source = MockSource::new(vec![]);
    let counters = source.counters();

    let (writer, _handle) = AudioRingBuffer::new(1024, 1, 0).split();
    let format = StreamFormat::new(48_000).unwrap();
    let mut engine = CaptureEngine::start(
        Box::new(source),
        writer,
        CaptureConfig::new(format),
        Arc::new(StateManager::new()),
        Arc::new(PipelineMetrics::default()),
        real_clock(),
    )
    .unwrap();

    assert!(engine.is_running());
    engine.stop();
    engine.stop();
    assert!(!engine.is_running());
    assert_eq!(counters.stop_calls.load(Ordering::SeqCst), 1);
}
