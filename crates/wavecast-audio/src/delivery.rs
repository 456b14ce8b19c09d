//! Per-client stream delivery.
//!
//! One task per connected client reads chunks from the client's ring cursor
//! and hands them to the transport. There is no wall-clock pacing: when the
//! capture side has produced nothing new the read comes back empty and the
//! task sleeps briefly and retries. Silence is never synthesized, since that
//! would desynchronize the client from the live position.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use wavecast_telemetry::PipelineMetrics;

use crate::registry::ClientLease;
use crate::ring_buffer::RingHandle;

/// Chunk size per ring read, aligned to the capture production unit
/// (240 frames × 6 bytes).
pub const DELIVERY_CHUNK_BYTES: usize = 1440;

/// The empty-read retry behavior, named so it is testable on its own. A
/// starved client is logged once per streak and the loop keeps retrying;
/// starvation is never fatal.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub poll_interval: Duration,
    pub starvation_threshold: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2),
            starvation_threshold: 500,
        }
    }
}

impl RetryPolicy {
    /// True exactly when `consecutive_empty` first crosses the threshold.
    pub fn starvation_edge(&self, consecutive_empty: u32) -> bool {
        consecutive_empty == self.starvation_threshold
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub chunk_bytes: usize,
    pub retry: RetryPolicy,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: DELIVERY_CHUNK_BYTES,
            retry: RetryPolicy::default(),
        }
    }
}

/// Spawn the delivery loop for one client. The task exits when the transport
/// drops its receiver, when the ring reports a hard error, or when capture
/// stops; the lease (and with it the slot and ring cursor) is released on
/// every exit path.
pub fn spawn_delivery(
    lease: ClientLease,
    ring: RingHandle,
    capture_running: Arc<AtomicBool>,
    tx: mpsc::Sender<Bytes>,
    cfg: DeliveryConfig,
    metrics: Arc<PipelineMetrics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let client = lease.id();
        tracing::info!(client, "Delivery task started");

        let mut chunk = vec![0u8; cfg.chunk_bytes];
        let mut consecutive_empty: u32 = 0;
        let mut period_bytes: u64 = 0;
        let mut last_log = Instant::now();

        loop {
            if !capture_running.load(Ordering::Acquire) {
                tracing::info!(client, "Capture stopped, ending stream");
                break;
            }

            match ring.read(client, &mut chunk) {
                Err(e) => {
                    tracing::error!(client, "Ring read error: {}", e);
                    break;
                }
                Ok(0) => {
                    consecutive_empty += 1;
                    if cfg.retry.starvation_edge(consecutive_empty) {
                        tracing::warn!(
                            client,
                            waits = consecutive_empty,
                            "Stream starved, still waiting for capture data"
                        );
                        lease.slot().starved_streaks.fetch_add(1, Ordering::Relaxed);
                        metrics.record_starvation();
                    }
                    tokio::time::sleep(cfg.retry.poll_interval).await;
                }
                Ok(n) => {
                    consecutive_empty = 0;
                    if tx.send(Bytes::copy_from_slice(&chunk[..n])).await.is_err() {
                        tracing::info!(client, "Client transport closed");
                        break;
                    }
                    lease
                        .slot()
                        .bytes_delivered
                        .fetch_add(n as u64, Ordering::Relaxed);
                    metrics.record_delivery(n as u64);
                    period_bytes += n as u64;

                    let elapsed = last_log.elapsed();
                    if elapsed >= Duration::from_secs(10) {
                        let kbps = period_bytes * 8 / elapsed.as_millis().max(1) as u64;
                        tracing::info!(
                            client,
                            kbps,
                            total = lease.slot().bytes_delivered.load(Ordering::Relaxed),
                            "Stream throughput"
                        );
                        period_bytes = 0;
                        last_log = Instant::now();
                    }
                }
            }
        }

        // Lease drop unregisters the slot and ring cursor.
        drop(lease);
        tracing::info!(client, "Delivery task ended");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starvation_edge_fires_exactly_once_per_streak() {
        let policy = RetryPolicy {
            poll_interval: Duration::from_millis(2),
            starvation_threshold: 3,
        };
        let edges: Vec<bool> = (1..=6).map(|n| policy.starvation_edge(n)).collect();
        assert_eq!(edges, [false, false, true, false, false, false]);
    }

    #[test]
    fn default_chunk_is_aligned_to_canonical_frames() {
        assert_eq!(DELIVERY_CHUNK_BYTES % 6, 0);
    }
}
