//! Single-writer, multi-reader byte ring with an overwrite-on-overrun policy.
//!
//! The capture thread owns the only write cursor; each streaming client owns
//! one read cursor. Writing always succeeds and overwrites old data, so the
//! writer can never be blocked by a slow client. A client that falls too far
//! behind loses data silently; the loss is visible through the overrun
//! counter, never through backpressure.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use wavecast_foundation::{AudioError, StreamFormat};

/// Warn (and count an overrun) when the distance between the write cursor and
/// a client's read cursor drops below this fraction of capacity.
const LOW_DISTANCE_PCT: usize = 5;

/// At most one low-distance warning per this many consecutive events.
const LOW_DISTANCE_LOG_EVERY: u32 = 5000;

struct ReaderSlot {
    read_pos: AtomicUsize,
    active: AtomicBool,
    // Consecutive low-distance events, for log throttling.
    low_streak: AtomicU32,
}

struct RingShared {
    storage: Box<[UnsafeCell<u8>]>,
    capacity: usize,
    lead_bytes: usize,
    write_pos: AtomicUsize,
    readers: Box<[ReaderSlot]>,
    overruns: AtomicU64,
}

// The storage is shared between the writer and the readers without a lock.
// Cursor handoff uses acquire/release: a reader only dereferences bytes at
// positions the writer published before its last `write_pos` release store.
// During an overrun the writer may overwrite bytes a lagging reader is
// copying; the torn read is accepted by design and accounted for in
// `overruns` rather than prevented.
unsafe impl Send for RingShared {}
unsafe impl Sync for RingShared {}

impl RingShared {
    fn data_ptr(&self) -> *mut u8 {
        self.storage.as_ptr() as *mut u8
    }

    /// Distance from `rp` forward to `wp`, i.e. bytes readable at `rp`.
    fn distance(&self, wp: usize, rp: usize) -> usize {
        if wp >= rp {
            wp - rp
        } else {
            self.capacity - rp + wp
        }
    }
}

/// Fixed-capacity audio ring buffer. Build one per capture session, then
/// `split()` into the unique writer handle and a cloneable reader handle.
pub struct AudioRingBuffer {
    shared: Arc<RingShared>,
}

impl AudioRingBuffer {
    /// `lead_bytes` must be smaller than `capacity`; a freshly registered
    /// client starts that many bytes behind the writer.
    pub fn new(capacity: usize, max_clients: usize, lead_bytes: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        assert!(
            lead_bytes < capacity,
            "lead bytes must be smaller than ring capacity"
        );

        let storage = (0..capacity)
            .map(|_| UnsafeCell::new(0u8))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let readers = (0..max_clients)
            .map(|_| ReaderSlot {
                read_pos: AtomicUsize::new(0),
                active: AtomicBool::new(false),
                low_streak: AtomicU32::new(0),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shared: Arc::new(RingShared {
                storage,
                capacity,
                lead_bytes,
                write_pos: AtomicUsize::new(0),
                readers,
                overruns: AtomicU64::new(0),
            }),
        }
    }

    /// Capacity and lead derived from the stream format: 2 s of audio with a
    /// 500 ms registration lead.
    pub fn for_format(format: &StreamFormat, max_clients: usize) -> Self {
        Self::new(format.ring_capacity(), max_clients, format.lead_bytes())
    }

    pub fn split(self) -> (RingWriter, RingHandle) {
        (
            RingWriter {
                shared: Arc::clone(&self.shared),
            },
            RingHandle {
                shared: self.shared,
            },
        )
    }
}

/// Writer half. Exactly one exists per ring; holding it is the capture
/// engine's write permission.
pub struct RingWriter {
    shared: Arc<RingShared>,
}

impl RingWriter {
    /// Append `data` at the write cursor, wrapping at capacity. Never fails
    /// and never blocks: old data is overwritten. After the copy, every
    /// active client whose cursor distance fell below 5% of capacity is
    /// counted as overrun, with a throttled warning.
    pub fn write(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let shared = &*self.shared;
        let capacity = shared.capacity;
        let wp = shared.write_pos.load(Ordering::Acquire);

        // A write longer than the ring only leaves its tail behind.
        let skip = data.len().saturating_sub(capacity);
        let effective = &data[skip..];
        let start = (wp + skip) % capacity;

        let to_end = capacity - start;
        let ptr = shared.data_ptr();
        // SAFETY: `start + n <= capacity` in both segments; the writer is the
        // only thread storing into the buffer.
        unsafe {
            if effective.len() <= to_end {
                ptr::copy_nonoverlapping(effective.as_ptr(), ptr.add(start), effective.len());
            } else {
                ptr::copy_nonoverlapping(effective.as_ptr(), ptr.add(start), to_end);
                ptr::copy_nonoverlapping(
                    effective.as_ptr().add(to_end),
                    ptr,
                    effective.len() - to_end,
                );
            }
        }

        let new_wp = (wp + data.len()) % capacity;

        // Overrun accounting against every active client before publishing
        // the new cursor.
        for (id, reader) in shared.readers.iter().enumerate() {
            if !reader.active.load(Ordering::Acquire) {
                continue;
            }
            let rp = reader.read_pos.load(Ordering::Acquire);
            let dist = shared.distance(new_wp, rp);
            if dist * 100 / capacity < LOW_DISTANCE_PCT {
                shared.overruns.fetch_add(1, Ordering::Relaxed);
                let streak = reader.low_streak.fetch_add(1, Ordering::Relaxed);
                if streak % LOW_DISTANCE_LOG_EVERY == 0 {
                    tracing::warn!(
                        client = id,
                        distance = dist,
                        "Client cursor nearly lapped by writer"
                    );
                }
            } else {
                reader.low_streak.store(0, Ordering::Relaxed);
            }
        }

        shared.write_pos.store(new_wp, Ordering::Release);
    }
}

/// Reader-side handle: client registration, per-client reads, and fill
/// telemetry. Cloneable; the per-client cursor discipline (one task per
/// client id) is enforced by the client registry, not here.
#[derive(Clone)]
pub struct RingHandle {
    shared: Arc<RingShared>,
}

impl RingHandle {
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn lead_bytes(&self) -> usize {
        self.shared.lead_bytes
    }

    /// Activate a client slot with its cursor `lead_bytes` behind the
    /// current write position, so the first reads find data immediately.
    pub fn register_client(&self, id: usize) -> Result<(), AudioError> {
        let shared = &*self.shared;
        let reader = shared
            .readers
            .get(id)
            .ok_or(AudioError::ClientOutOfRange { id })?;
        if reader.active.load(Ordering::Acquire) {
            return Err(AudioError::ClientAlreadyRegistered { id });
        }

        let wp = shared.write_pos.load(Ordering::Acquire);
        let rp = (wp + shared.capacity - shared.lead_bytes) % shared.capacity;
        reader.read_pos.store(rp, Ordering::Release);
        reader.low_streak.store(0, Ordering::Relaxed);
        reader.active.store(true, Ordering::Release);

        tracing::info!(
            client = id,
            read_pos = rp,
            write_pos = wp,
            "Ring client registered"
        );
        Ok(())
    }

    pub fn unregister_client(&self, id: usize) -> Result<(), AudioError> {
        let reader = self
            .shared
            .readers
            .get(id)
            .ok_or(AudioError::ClientOutOfRange { id })?;
        reader.active.store(false, Ordering::Release);
        reader.read_pos.store(0, Ordering::Release);
        tracing::info!(client = id, "Ring client unregistered");
        Ok(())
    }

    /// Copy up to `buf.len()` available bytes into `buf`, advancing only this
    /// client's cursor. Returns 0 when no data is available; callers poll.
    ///
    /// A client lagging more than a full buffer behind may observe bytes the
    /// writer has already overwritten (overwrite-and-count policy); the
    /// overrun counter is the only signal for that case.
    pub fn read(&self, id: usize, buf: &mut [u8]) -> Result<usize, AudioError> {
        let shared = &*self.shared;
        let reader = shared
            .readers
            .get(id)
            .ok_or(AudioError::ClientOutOfRange { id })?;
        if !reader.active.load(Ordering::Acquire) {
            return Err(AudioError::ClientNotRegistered { id });
        }

        let wp = shared.write_pos.load(Ordering::Acquire);
        let rp = reader.read_pos.load(Ordering::Acquire);
        let available = shared.distance(wp, rp);
        if available == 0 || buf.is_empty() {
            return Ok(0);
        }

        let to_read = buf.len().min(available);
        let to_end = shared.capacity - rp;
        let ptr = shared.data_ptr();
        // SAFETY: `rp + n <= capacity` in both segments; bytes below `wp`
        // were published by the writer's release store.
        unsafe {
            if to_read <= to_end {
                ptr::copy_nonoverlapping(ptr.add(rp), buf.as_mut_ptr(), to_read);
            } else {
                ptr::copy_nonoverlapping(ptr.add(rp), buf.as_mut_ptr(), to_end);
                ptr::copy_nonoverlapping(ptr, buf[to_end..].as_mut_ptr(), to_read - to_end);
            }
        }

        let new_rp = (rp + to_read) % shared.capacity;
        reader.read_pos.store(new_rp, Ordering::Release);
        Ok(to_read)
    }

    /// Bytes readable by client `id` right now.
    pub fn available(&self, id: usize) -> Result<usize, AudioError> {
        let shared = &*self.shared;
        let reader = shared
            .readers
            .get(id)
            .ok_or(AudioError::ClientOutOfRange { id })?;
        if !reader.active.load(Ordering::Acquire) {
            return Err(AudioError::ClientNotRegistered { id });
        }
        let wp = shared.write_pos.load(Ordering::Acquire);
        let rp = reader.read_pos.load(Ordering::Acquire);
        Ok(shared.distance(wp, rp))
    }

    /// Minimum fill across active clients; the worst-served client defines
    /// buffer health. Zero when no client is active.
    pub fn fill_bytes(&self) -> usize {
        let shared = &*self.shared;
        let wp = shared.write_pos.load(Ordering::Acquire);

        let mut min_fill = shared.capacity;
        let mut any_active = false;
        for reader in shared.readers.iter() {
            if !reader.active.load(Ordering::Acquire) {
                continue;
            }
            any_active = true;
            let rp = reader.read_pos.load(Ordering::Acquire);
            min_fill = min_fill.min(shared.distance(wp, rp));
        }

        if any_active {
            min_fill
        } else {
            0
        }
    }

    pub fn fill_percentage(&self) -> f32 {
        (self.fill_bytes() * 100) as f32 / self.shared.capacity as f32
    }

    pub fn overrun_count(&self) -> u64 {
        self.shared.overruns.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(capacity: usize, clients: usize, lead: usize) -> (RingWriter, RingHandle) {
        AudioRingBuffer::new(capacity, clients, lead).split()
    }

    #[test]
    fn read_without_data_returns_zero() {
        let (_writer, handle) = ring(64, 1, 0);
        handle.register_client(0).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(handle.read(0, &mut buf).unwrap(), 0);
    }

    #[test]
    fn write_then_read_round_trip() {
        let (mut writer, handle) = ring(64, 1, 0);
        handle.register_client(0).unwrap();

        writer.write(&[1, 2, 3, 4, 5]);
        let mut buf = [0u8; 16];
        assert_eq!(handle.read(0, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn lead_time_scenario_with_wrap() {
        // Capacity 12, lead 4: write [1..8], register, read 4 -> [5,6,7,8];
        // write 10 more (wraps), read 4 -> the next 4 bytes of the logical
        // stream.
        let (mut writer, handle) = ring(12, 1, 4);

        writer.write(&[1, 2, 3, 4, 5, 6, 7, 8]);
        handle.register_client(0).unwrap();
        assert_eq!(handle.available(0).unwrap(), 4);

        let mut buf = [0u8; 4];
        assert_eq!(handle.read(0, &mut buf).unwrap(), 4);
        assert_eq!(buf, [5, 6, 7, 8]);

        writer.write(&[9, 10, 11, 12, 13, 14, 15, 16, 17, 18]);
        assert_eq!(handle.read(0, &mut buf).unwrap(), 4);
        assert_eq!(buf, [9, 10, 11, 12]);
    }

    #[test]
    fn wrapping_write_preserves_byte_order() {
        let (mut writer, handle) = ring(16, 1, 0);
        handle.register_client(0).unwrap();

        // Advance cursor near the end, drain, then straddle the boundary.
        writer.write(&[0u8; 12]);
        let mut sink = [0u8; 12];
        assert_eq!(handle.read(0, &mut sink).unwrap(), 12);

        writer.write(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut buf = [0u8; 8];
        assert_eq!(handle.read(0, &mut buf).unwrap(), 8);
        assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn write_longer_than_capacity_keeps_tail() {
        let (mut writer, handle) = ring(8, 1, 7);

        let data: Vec<u8> = (0..20).collect();
        writer.write(&data);

        // A client registered with the maximum lead sees the last 7 of the
        // surviving 8 bytes, in order.
        handle.register_client(0).unwrap();
        let mut buf = [0u8; 7];
        assert_eq!(handle.read(0, &mut buf).unwrap(), 7);
        assert_eq!(buf, [13, 14, 15, 16, 17, 18, 19]);
    }

    #[test]
    fn cursors_are_independent() {
        let (mut writer, handle) = ring(64, 2, 0);
        handle.register_client(0).unwrap();
        writer.write(&[1, 2, 3, 4]);
        handle.register_client(1).unwrap();
        writer.write(&[5, 6, 7, 8]);

        // Client 0 sees all eight bytes, client 1 only the last four.
        let mut buf = [0u8; 8];
        assert_eq!(handle.read(0, &mut buf).unwrap(), 8);
        assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);

        let mut buf1 = [0u8; 8];
        assert_eq!(handle.read(1, &mut buf1).unwrap(), 4);
        assert_eq!(&buf1[..4], &[5, 6, 7, 8]);

        // Reading client 1 did not move client 0.
        assert_eq!(handle.available(0).unwrap(), 0);
    }

    #[test]
    fn unregister_leaves_other_client_untouched() {
        let (mut writer, handle) = ring(64, 2, 0);
        handle.register_client(0).unwrap();
        handle.register_client(1).unwrap();
        writer.write(&[1, 2, 3, 4]);

        handle.unregister_client(1).unwrap();
        assert_eq!(handle.available(0).unwrap(), 4);
        assert_eq!(handle.fill_bytes(), 4);
    }

    #[test]
    fn fill_is_zero_without_clients() {
        let (mut writer, handle) = ring(64, 2, 0);
        writer.write(&[1, 2, 3, 4]);
        assert_eq!(handle.fill_bytes(), 0);
        assert_eq!(handle.fill_percentage(), 0.0);
    }

    #[test]
    fn fill_is_minimum_across_clients() {
        let (mut writer, handle) = ring(64, 2, 0);
        handle.register_client(0).unwrap();
        writer.write(&[0u8; 10]);
        handle.register_client(1).unwrap();
        writer.write(&[0u8; 6]);

        // Client 0 has 16 unread, client 1 has 6.
        assert_eq!(handle.fill_bytes(), 6);
    }

    #[test]
    fn registration_lead_is_immediately_readable() {
        let (mut writer, handle) = ring(100, 1, 25);
        writer.write(&[7u8; 60]);
        handle.register_client(0).unwrap();
        assert_eq!(handle.available(0).unwrap(), 25);
        assert_eq!(handle.fill_bytes(), 25);
    }

    #[test]
    fn overrun_counted_when_writer_laps_reader() {
        let (mut writer, handle) = ring(100, 1, 10);
        writer.write(&[0u8; 50]);
        handle.register_client(0).unwrap();

        // Advance the writer by capacity - lead without any reads: the
        // distance wraps below the warning threshold.
        let before = handle.overrun_count();
        writer.write(&[0u8; 90]);
        assert!(handle.overrun_count() > before);
        // Fill never exceeds capacity.
        assert!(handle.fill_bytes() <= handle.capacity());
    }

    #[test]
    fn double_register_fails() {
        let (_writer, handle) = ring(64, 1, 0);
        handle.register_client(0).unwrap();
        assert!(matches!(
            handle.register_client(0),
            Err(AudioError::ClientAlreadyRegistered { id: 0 })
        ));
    }

    #[test]
    fn out_of_range_client_is_rejected() {
        let (_writer, handle) = ring(64, 2, 0);
        assert!(matches!(
            handle.register_client(5),
            Err(AudioError::ClientOutOfRange { id: 5 })
        ));
        let mut buf = [0u8; 4];
        assert!(handle.read(2, &mut buf).is_err());
    }

    #[test]
    fn read_from_unregistered_slot_is_an_error() {
        let (_writer, handle) = ring(64, 2, 0);
        let mut buf = [0u8; 4];
        assert!(matches!(
            handle.read(0, &mut buf),
            Err(AudioError::ClientNotRegistered { id: 0 })
        ));
    }
}
