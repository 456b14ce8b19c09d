//! Client registry: a fixed table of streaming slots.
//!
//! Slot assignment and the paired ring-buffer cursor registration happen
//! under one lock, so a half-registered client (slot active without a ring
//! cursor, or the reverse) cannot be observed. Slots are handed out as
//! leases; dropping a lease releases the slot even if the delivery task
//! unwinds.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use wavecast_foundation::AudioError;
use wavecast_telemetry::PipelineMetrics;

use crate::ring_buffer::RingHandle;

pub struct ClientSlot {
    id: usize,
    active: AtomicBool,
    pub bytes_delivered: AtomicU64,
    pub starved_streaks: AtomicU64,
    meta: Mutex<SlotMeta>,
}

#[derive(Default)]
struct SlotMeta {
    peer: Option<SocketAddr>,
    connected_at: Option<Instant>,
}

impl ClientSlot {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Read-only view of one slot for the status page.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub id: usize,
    pub peer: Option<SocketAddr>,
    pub bytes_delivered: u64,
    pub connected_secs: u64,
}

pub struct ClientRegistry {
    slots: Box<[Arc<ClientSlot>]>,
    ring: RingHandle,
    admission: Mutex<()>,
    metrics: Arc<PipelineMetrics>,
}

impl ClientRegistry {
    /// `max_clients` must match the reader count the ring was built with.
    pub fn new(ring: RingHandle, max_clients: usize, metrics: Arc<PipelineMetrics>) -> Arc<Self> {
        let slots = (0..max_clients)
            .map(|id| {
                Arc::new(ClientSlot {
                    id,
                    active: AtomicBool::new(false),
                    bytes_delivered: AtomicU64::new(0),
                    starved_streaks: AtomicU64::new(0),
                    meta: Mutex::new(SlotMeta::default()),
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Arc::new(Self {
            slots,
            ring,
            admission: Mutex::new(()),
            metrics,
        })
    }

    /// Claim the first free slot and register its ring cursor. Fails with
    /// `RegistryFull` when every slot is taken.
    pub fn connect(self: &Arc<Self>, peer: SocketAddr) -> Result<ClientLease, AudioError> {
        let _guard = self.admission.lock();

        let slot = self
            .slots
            .iter()
            .find(|s| !s.active.load(Ordering::Acquire))
            .ok_or(AudioError::RegistryFull)?;

        // Ring registration first: if it fails the slot stays free.
        self.ring.register_client(slot.id)?;

        slot.bytes_delivered.store(0, Ordering::Relaxed);
        slot.starved_streaks.store(0, Ordering::Relaxed);
        {
            let mut meta = slot.meta.lock();
            meta.peer = Some(peer);
            meta.connected_at = Some(Instant::now());
        }
        slot.active.store(true, Ordering::Release);

        self.publish_active_count();
        tracing::info!(client = slot.id, %peer, "Client connected");

        Ok(ClientLease {
            registry: Arc::clone(self),
            slot: Arc::clone(slot),
        })
    }

    fn release(&self, id: usize) {
        let _guard = self.admission.lock();
        let slot = &self.slots[id];
        if slot.active.swap(false, Ordering::AcqRel) {
            let _ = self.ring.unregister_client(id);
            tracing::info!(
                client = id,
                bytes = slot.bytes_delivered.load(Ordering::Relaxed),
                "Client disconnected"
            );
        }
        self.publish_active_count();
    }

    pub fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.active.load(Ordering::Acquire))
            .count()
    }

    pub fn max_clients(&self) -> usize {
        self.slots.len()
    }

    pub fn snapshot(&self) -> Vec<ClientInfo> {
        self.slots
            .iter()
            .filter(|s| s.active.load(Ordering::Acquire))
            .map(|s| {
                let meta = s.meta.lock();
                ClientInfo {
                    id: s.id,
                    peer: meta.peer,
                    bytes_delivered: s.bytes_delivered.load(Ordering::Relaxed),
                    connected_secs: meta
                        .connected_at
                        .map(|t| t.elapsed().as_secs())
                        .unwrap_or(0),
                }
            })
            .collect()
    }

    fn publish_active_count(&self) {
        self.metrics
            .active_clients
            .store(self.active_count(), Ordering::Relaxed);
    }
}

/// Owned claim on a client slot. Dropping it releases the slot and the ring
/// cursor.
pub struct ClientLease {
    registry: Arc<ClientRegistry>,
    slot: Arc<ClientSlot>,
}

impl ClientLease {
    pub fn id(&self) -> usize {
        self.slot.id
    }

    pub fn slot(&self) -> &Arc<ClientSlot> {
        &self.slot
    }
}

impl Drop for ClientLease {
    fn drop(&mut self) {
        self.registry.release(self.slot.id);
    }
}
