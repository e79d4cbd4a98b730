//! Single-producer / single-consumer ring buffer of IQ samples.
//!
//! Decouples the tuner callback thread from the PSD frame extractor. The
//! producer never blocks: when the buffer is full, the oldest samples are
//! overwritten and accounted in a drop counter. Reads are non-destructive;
//! the consumer advances the read side explicitly by the hop size.

use crate::IqSample;
use num_complex::Complex;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

pub struct IqRing {
    buf: Box<[UnsafeCell<IqSample>]>,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
    available: AtomicUsize,
    dropped: AtomicU64,
}

// SAFETY: positions and the sample count are synchronized with
// release/acquire atomics. The producer only writes cells in
// [write_pos, write_pos + count) which the consumer cannot observe until
// `available` is published; the consumer only reads cells accounted in
// `available`. An overflowing write reclaims the oldest region from the
// consumer side, so writes that can overflow must not race an in-flight
// read; the PSD engine upholds this by draining on the feeding thread.
unsafe impl Sync for IqRing {}
unsafe impl Send for IqRing {}

impl IqRing {
    /// Allocate a ring holding `capacity` samples. The PSD engine sizes
    /// this at 4x the FFT length to ride out burst jitter.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        let buf: Vec<UnsafeCell<IqSample>> =
            (0..capacity).map(|_| UnsafeCell::new(Complex::new(0.0, 0.0))).collect();
        Self {
            buf: buf.into_boxed_slice(),
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            available: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Samples currently readable.
    pub fn available(&self) -> usize {
        self.available.load(Ordering::Acquire)
    }

    /// Total samples discarded by overflowing writes.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Copy `samples` into the ring, overwriting the oldest data on
    /// overflow. Never blocks, never allocates.
    pub fn write(&self, samples: &[IqSample]) {
        let cap = self.buf.len();
        // A write larger than the ring keeps only the newest samples.
        let (samples, skipped) = if samples.len() > cap {
            let skip = samples.len() - cap;
            (&samples[skip..], skip as u64)
        } else {
            (samples, 0)
        };
        if skipped > 0 {
            self.dropped.fetch_add(skipped, Ordering::Relaxed);
        }
        let count = samples.len();
        if count == 0 {
            return;
        }

        // Make room by dropping the oldest samples if the write would
        // exceed capacity.
        let avail = self.available.load(Ordering::Acquire);
        let free = cap - avail;
        if count > free {
            let drop = count - free;
            let rp = self.read_pos.load(Ordering::Acquire);
            self.read_pos.store((rp + drop) % cap, Ordering::Release);
            self.available.fetch_sub(drop, Ordering::Release);
            self.dropped.fetch_add(drop as u64, Ordering::Relaxed);
        }

        let wp = self.write_pos.load(Ordering::Relaxed);
        let first = count.min(cap - wp);
        // SAFETY: the region [wp, wp+first) and the wrapped tail are not
        // readable by the consumer until `available` is increased below.
        unsafe {
            std::ptr::copy_nonoverlapping(
                samples.as_ptr(),
                self.buf[wp].get(),
                first,
            );
            if first < count {
                std::ptr::copy_nonoverlapping(
                    samples.as_ptr().add(first),
                    self.buf[0].get(),
                    count - first,
                );
            }
        }

        self.write_pos.store((wp + count) % cap, Ordering::Release);
        self.available.fetch_add(count, Ordering::Release);
    }

    /// Copy `out.len()` samples starting at the read position into `out`
    /// without consuming them. Returns false when not enough samples are
    /// buffered.
    pub fn try_read_frame(&self, out: &mut [IqSample]) -> bool {
        let count = out.len();
        if self.available.load(Ordering::Acquire) < count {
            return false;
        }
        let cap = self.buf.len();
        let rp = self.read_pos.load(Ordering::Acquire);
        let first = count.min(cap - rp);
        // SAFETY: `available >= count` guarantees the producer has
        // published these cells and will not rewrite them before
        // `advance` releases them.
        unsafe {
            std::ptr::copy_nonoverlapping(self.buf[rp].get(), out.as_mut_ptr(), first);
            if first < count {
                std::ptr::copy_nonoverlapping(
                    self.buf[0].get(),
                    out.as_mut_ptr().add(first),
                    count - first,
                );
            }
        }
        true
    }

    /// Drop `k` samples from the read side. Clamped to what is available.
    pub fn advance(&self, k: usize) {
        let k = k.min(self.available.load(Ordering::Acquire));
        if k == 0 {
            return;
        }
        let cap = self.buf.len();
        let rp = self.read_pos.load(Ordering::Acquire);
        self.read_pos.store((rp + k) % cap, Ordering::Release);
        self.available.fetch_sub(k, Ordering::Release);
    }

    /// Discard all buffered samples.
    pub fn clear(&self) {
        let avail = self.available.load(Ordering::Acquire);
        self.advance(avail);
    }
}
