//! Clipping detection with hysteresis.
//!
//! One sample per captured chunk is probed against a near-full-scale
//! threshold. A decaying counter (+1 on clip, -1 otherwise, floored at zero)
//! debounces the flag: it raises only after roughly a second of sustained
//! clipping and clears when the counter drains back to zero, so isolated
//! transients never flap it.

/// ~99.9% of 24-bit full scale (8_388_608).
pub const CLIP_THRESHOLD: i32 = 8_388_000;

#[derive(Debug, Clone)]
pub struct ClipDetector {
    threshold: i32,
    raise_after: u32,
    counter: u32,
    clipping: bool,
}

impl ClipDetector {
    /// `raise_after` is the counter level that raises the flag; pass the
    /// number of chunks per second for a one-second debounce.
    pub fn new(threshold: i32, raise_after: u32) -> Self {
        Self {
            threshold,
            raise_after: raise_after.max(1),
            counter: 0,
            clipping: false,
        }
    }

    /// Debounce expressed as a duration, for a capture cadence of
    /// `chunk_frames` frames per chunk at `sample_rate`.
    pub fn for_cadence(sample_rate: u32, chunk_frames: usize, debounce: std::time::Duration) -> Self {
        let chunks_per_window =
            (sample_rate as f64 * debounce.as_secs_f64() / chunk_frames.max(1) as f64) as u32;
        Self::new(CLIP_THRESHOLD, chunks_per_window)
    }

    /// Feed the probed sample of one chunk. Returns `Some(state)` when the
    /// debounced flag changes.
    pub fn observe(&mut self, sample: i32) -> Option<bool> {
        if sample.abs() > self.threshold {
            self.counter = self.counter.saturating_add(1);
        } else {
            self.counter = self.counter.saturating_sub(1);
        }

        if !self.clipping && self.counter > self.raise_after {
            self.clipping = true;
            return Some(true);
        }
        if self.clipping && self.counter == 0 {
            self.clipping = false;
            return Some(false);
        }
        None
    }

    pub fn is_clipping(&self) -> bool {
        self.clipping
    }

    pub fn reset(&mut self) {
        self.counter = 0;
        self.clipping = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOUD: i32 = CLIP_THRESHOLD + 100;
    const QUIET: i32 = 1000;

    #[test]
    fn isolated_transient_does_not_raise() {
        let mut det = ClipDetector::new(CLIP_THRESHOLD, 10);
        assert_eq!(det.observe(LOUD), None);
        assert_eq!(det.observe(QUIET), None);
        assert!(!det.is_clipping());
    }

    #[test]
    fn sustained_clipping_raises_once() {
        let mut det = ClipDetector::new(CLIP_THRESHOLD, 5);
        let mut edges = Vec::new();
        for _ in 0..10 {
            if let Some(edge) = det.observe(LOUD) {
                edges.push(edge);
            }
        }
        assert_eq!(edges, [true]);
        assert!(det.is_clipping());
    }

    #[test]
    fn flag_clears_when_counter_drains() {
        let mut det = ClipDetector::new(CLIP_THRESHOLD, 3);
        for _ in 0..6 {
            det.observe(LOUD);
        }
        assert!(det.is_clipping());

        let mut cleared = None;
        for _ in 0..10 {
            if let Some(edge) = det.observe(QUIET) {
                cleared = Some(edge);
                break;
            }
        }
        assert_eq!(cleared, Some(false));
        assert!(!det.is_clipping());
    }

    #[test]
    fn negative_samples_count_as_clipping() {
        let mut det = ClipDetector::new(CLIP_THRESHOLD, 2);
        for _ in 0..4 {
            det.observe(-LOUD);
        }
        assert!(det.is_clipping());
    }

    #[test]
    fn cadence_constructor_matches_one_second() {
        // 240-frame chunks at 48 kHz: 200 chunks per second.
        let det = ClipDetector::for_cadence(48_000, 240, std::time::Duration::from_secs(1));
        assert_eq!(det.raise_after, 200);
    }
}
