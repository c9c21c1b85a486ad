//! Non-blocking circular sample store.
//!
//! `SampleRing` is the handoff between real-time device callbacks and
//! worker tasks. Both sides hold shared access guarded by one mutex with
//! O(1) critical sections; neither side ever blocks on the other. A full
//! ring drops the excess write, an under-filled read is padded with
//! silence. The backing storage is allocated once at construction, so the
//! callback-side operations are allocation-free.

use std::sync::Mutex;

struct RingInner {
    buf: Box<[f32]>,
    read_pos: usize,
    write_pos: usize,
    len: usize,
}

/// A bounded circular store of f32 samples.
///
/// Invariants: `0 <= len <= capacity` and
/// `(read_pos + len) % capacity == write_pos`.
pub struct SampleRing {
    inner: Mutex<RingInner>,
    capacity: usize,
}

impl SampleRing {
    /// Create a ring holding up to `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Self {
            inner: Mutex::new(RingInner {
                buf: vec![0.0; capacity].into_boxed_slice(),
                read_pos: 0,
                write_pos: 0,
                len: 0,
            }),
            capacity,
        }
    }

    /// Write `min(samples.len(), space)` samples; excess is dropped.
    ///
    /// Returns `true` when every sample fit. Never blocks.
    pub fn write(&self, samples: &[f32]) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let space = self.capacity - inner.len;
        let to_write = samples.len().min(space);

        for &sample in &samples[..to_write] {
            let pos = inner.write_pos;
            inner.buf[pos] = sample;
            inner.write_pos = (pos + 1) % self.capacity;
        }
        inner.len += to_write;

        to_write == samples.len()
    }

    /// Copy `min(out.len(), available)` samples into `out`, zero-filling
    /// the remainder.
    ///
    /// Returns `true` when any real data was produced. Never blocks.
    pub fn read(&self, out: &mut [f32]) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let to_read = out.len().min(inner.len);

        for slot in &mut out[..to_read] {
            let pos = inner.read_pos;
            *slot = inner.buf[pos];
            inner.read_pos = (pos + 1) % self.capacity;
        }
        inner.len -= to_read;

        for slot in &mut out[to_read..] {
            *slot = 0.0;
        }

        to_read > 0
    }

    /// Number of samples currently stored.
    pub fn available(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len
    }

    /// Number of samples that can be written without dropping.
    pub fn space(&self) -> usize {
        self.capacity - self.available()
    }

    /// Total capacity in samples.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discard all stored samples.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.read_pos = 0;
        inner.write_pos = 0;
        inner.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read() {
        let ring = SampleRing::new(8);
        assert!(ring.write(&[1.0, 2.0, 3.0]));
        assert_eq!(ring.available(), 3);
        assert_eq!(ring.space(), 5);

        let mut out = [0.0f32; 3];
        assert!(ring.read(&mut out));
        assert_eq!(out, [1.0, 2.0, 3.0]);
        assert_eq!(ring.available(), 0);
    }

    #[test]
    fn overflow_drops_excess() {
        let ring = SampleRing::new(4);
        assert!(!ring.write(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
        assert_eq!(ring.available(), 4);

        let mut out = [0.0f32; 4];
        ring.read(&mut out);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn under_read_pads_silence() {
        let ring = SampleRing::new(8);
        ring.write(&[0.5, 0.5]);

        let mut out = [9.0f32; 5];
        assert!(ring.read(&mut out));
        assert_eq!(out, [0.5, 0.5, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn empty_read_is_all_silence() {
        let ring = SampleRing::new(4);
        let mut out = [9.0f32; 4];
        assert!(!ring.read(&mut out));
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn wraparound_preserves_order() {
        let ring = SampleRing::new(4);
        ring.write(&[1.0, 2.0, 3.0]);

        let mut out = [0.0f32; 2];
        ring.read(&mut out);
        assert_eq!(out, [1.0, 2.0]);

        ring.write(&[4.0, 5.0, 6.0]);
        let mut out = [0.0f32; 4];
        ring.read(&mut out);
        assert_eq!(out, [3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn reads_never_exceed_writes() {
        // Total samples produced by reads never exceeds total samples
        // accepted by writes, and len stays within capacity.
        let ring = SampleRing::new(16);
        let mut written = 0usize;
        let mut read_back = 0usize;

        for round in 0..100 {
            let chunk = vec![round as f32; (round % 7) + 1];
            let before = ring.available();
            ring.write(&chunk);
            written += ring.available() - before;

            let mut out = vec![0.0f32; (round % 5) + 1];
            let before = ring.available();
            ring.read(&mut out);
            read_back += before - ring.available();

            assert!(ring.available() <= ring.capacity());
        }
        assert!(read_back <= written);
    }

    #[test]
    fn clear_empties_the_ring() {
        let ring = SampleRing::new(8);
        ring.write(&[1.0; 8]);
        ring.clear();
        assert_eq!(ring.available(), 0);
        assert_eq!(ring.space(), 8);
    }
}
