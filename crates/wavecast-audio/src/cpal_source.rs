//! CPAL-backed sample source.
//!
//! The audio backend pushes samples from its callback; the capture loop wants
//! a blocking read with a timeout. An SPSC ring bridges the two: the callback
//! serializes each sample into a raw 32-bit slot and pushes the bytes, and
//! `read` drains whole frames until data arrives or the deadline passes.
//!
//! The CPAL stream itself is not `Send`, so it lives on a dedicated thread
//! owned by this source; `start`/`stop` manage that thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use rtrb::{Consumer, Producer, RingBuffer};

use wavecast_foundation::{AudioError, SUPPORTED_SAMPLE_RATES};

use crate::convert::RAW_BYTES_PER_FRAME;
use crate::source::SampleSource;

/// Headroom between the callback and the capture loop: 250 ms of raw bytes.
fn bridge_capacity(sample_rate: u32) -> usize {
    sample_rate as usize * RAW_BYTES_PER_FRAME / 4
}

pub struct CpalSource {
    sample_rate: u32,
    device_name: Option<String>,
    consumer: Option<Consumer<u8>>,
    worker: Option<StreamThread>,
    restart_needed: Arc<AtomicBool>,
    dropped_bytes: Arc<AtomicU64>,
}

struct StreamThread {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

impl CpalSource {
    /// `device_name: None` selects the host's default input device.
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            sample_rate: 48_000,
            device_name,
            consumer: None,
            worker: None,
            restart_needed: Arc::new(AtomicBool::new(false)),
            dropped_bytes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Bytes the callback had to drop because the capture loop fell behind.
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes.load(Ordering::Relaxed)
    }
}

impl SampleSource for CpalSource {
    fn init(&mut self, sample_rate: u32) -> Result<(), AudioError> {
        if !SUPPORTED_SAMPLE_RATES.contains(&sample_rate) {
            return Err(AudioError::UnsupportedRate { rate: sample_rate });
        }
        self.sample_rate = sample_rate;
        Ok(())
    }

    fn start(&mut self) -> Result<(), AudioError> {
        if self.worker.is_some() {
            return Ok(());
        }

        let (producer, consumer) = RingBuffer::<u8>::new(bridge_capacity(self.sample_rate));
        let stop = Arc::new(AtomicBool::new(false));
        let restart_needed = Arc::clone(&self.restart_needed);
        let dropped = Arc::clone(&self.dropped_bytes);
        let device_name = self.device_name.clone();
        let sample_rate = self.sample_rate;

        // start() reports the outcome of stream creation, which happens on
        // the stream thread.
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), AudioError>>();

        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("cpal-input".to_string())
            .spawn(move || {
                let stream = match build_stream(
                    device_name.as_deref(),
                    sample_rate,
                    producer,
                    restart_needed,
                    dropped,
                ) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while !thread_stop.load(Ordering::Acquire) {
                    thread::sleep(Duration::from_millis(50));
                }
                drop(stream);
            })
            .map_err(|e| AudioError::SourceInit(format!("spawn stream thread: {}", e)))?;

        match ready_rx.recv_timeout(Duration::from_secs(3)) {
            Ok(Ok(())) => {
                self.restart_needed.store(false, Ordering::Release);
                self.consumer = Some(consumer);
                self.worker = Some(StreamThread { handle, stop });
                tracing::info!(sample_rate, "CPAL input stream started");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                stop.store(true, Ordering::Release);
                let _ = handle.join();
                Err(AudioError::SourceInit(
                    "timed out waiting for input stream".to_string(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::Release);
            let _ = worker.handle.join();
            tracing::info!("CPAL input stream stopped");
        }
        self.consumer = None;
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, AudioError> {
        let consumer = self
            .consumer
            .as_mut()
            .ok_or_else(|| AudioError::SourceRead("source not started".to_string()))?;

        let deadline = Instant::now() + timeout;
        loop {
            if self.restart_needed.swap(false, Ordering::AcqRel) {
                return Err(AudioError::SourceRead("input stream error".to_string()));
            }

            let want = buf.len().min(consumer.slots());
            let aligned = want - want % RAW_BYTES_PER_FRAME;
            if aligned > 0 {
                let chunk = match consumer.read_chunk(aligned) {
                    Ok(chunk) => chunk,
                    Err(rtrb::chunks::ChunkError::TooFewSlots(_)) => continue,
                };
                let (first, second) = chunk.as_slices();
                let split = first.len();
                buf[..split].copy_from_slice(first);
                buf[split..split + second.len()].copy_from_slice(second);
                let read = chunk.len();
                chunk.commit_all();
                return Ok(read);
            }

            if Instant::now() >= deadline {
                return Ok(0);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    match name {
        Some(wanted) => host
            .input_devices()
            .map_err(|e| AudioError::SourceInit(e.to_string()))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| AudioError::SourceInit(format!("input device not found: {}", wanted))),
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::SourceInit("no default input device".to_string())),
    }
}

fn build_stream(
    device_name: Option<&str>,
    sample_rate: u32,
    mut producer: Producer<u8>,
    restart_needed: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
) -> Result<cpal::Stream, AudioError> {
    let device = open_device(device_name)?;
    if let Ok(name) = device.name() {
        tracing::info!("Opened input device: {}", name);
    }

    let sample_format = device
        .default_input_config()
        .map_err(|e| AudioError::SourceInit(e.to_string()))?
        .sample_format();

    let config = StreamConfig {
        channels: 2,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let err_fn = move |err: cpal::StreamError| {
        tracing::error!("Input stream error: {}", err);
        restart_needed.store(true, Ordering::Release);
    };

    // Every format is normalized to the raw 32-bit slot layout with the
    // 24-bit payload MSB-aligned, so the converter sees one wire format.
    let mut scratch: Vec<u8> = Vec::new();
    let mut push_slots = move |slots: &mut dyn Iterator<Item = u32>| {
        scratch.clear();
        for slot in slots {
            scratch.extend_from_slice(&slot.to_le_bytes());
        }
        match producer.write_chunk(scratch.len()) {
            Ok(mut chunk) => {
                let (first, second) = chunk.as_mut_slices();
                let split = first.len();
                first.copy_from_slice(&scratch[..split]);
                second.copy_from_slice(&scratch[split..]);
                chunk.commit_all();
            }
            Err(_) => {
                dropped.fetch_add(scratch.len() as u64, Ordering::Relaxed);
            }
        }
    };

    let stream = match sample_format {
        SampleFormat::I32 => device.build_input_stream(
            &config,
            move |data: &[i32], _: &_| {
                push_slots(&mut data.iter().map(|&s| s as u32));
            },
            err_fn,
            None,
        )?,
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &_| {
                push_slots(&mut data.iter().map(|&s| (s as i32 as u32) << 16));
            },
            err_fn,
            None,
        )?,
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &_| {
                push_slots(&mut data.iter().map(|&s| {
                    let sample24 = (s.clamp(-1.0, 1.0) * 8_388_607.0) as i32;
                    (sample24 as u32) << 8
                }));
            },
            err_fn,
            None,
        )?,
        other => {
            return Err(AudioError::SourceInit(format!(
                "unsupported input sample format: {:?}",
                other
            )));
        }
    };

    stream.play()?;
    Ok(stream)
}
