//! Lock-free SPSC ring buffer for PCM samples
//!
//! Single producer (decode thread) / single consumer (render callback).
//! Cursor discipline comes from ringbuf's atomic read/write indices over a
//! fixed arena, so the consumer side never locks or allocates.
//!
//! Backpressure: a full buffer makes `write_all` sleep-and-retry, pacing the
//! whole upstream pipeline. The consumer never blocks; a short read is
//! zero-padded with silence, and the caller sees the shortfall in the
//! return value (underrun accounting lives with the render callback).
//!
//! Resizing and flushing happen only through [`RingSwap`]: the decode thread
//! parks a fresh consumer half and the render callback adopts it at the next
//! quantum, so cursors are never reset while either side is active.

use crate::render::AudioSpec;
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Sleep between retries when the buffer is full. Small enough that a
/// drained quantum is refilled promptly.
const FULL_BACKOFF: Duration = Duration::from_millis(2);

/// Allocate a ring sized for `seconds` of audio at `spec` and split it.
pub fn pcm_ring(spec: AudioSpec, seconds: u32) -> (PcmProducer, PcmConsumer) {
    let capacity = spec.samples_per_sec() * seconds as usize;
    debug!(
        capacity,
        sample_rate = spec.sample_rate,
        channels = spec.channels,
        "allocating pcm ring"
    );
    let (prod, cons) = HeapRb::<f32>::new(capacity.max(1)).split();
    (PcmProducer { prod }, PcmConsumer { cons })
}

/// Write half, owned by the decode thread.
pub struct PcmProducer {
    prod: ringbuf::HeapProd<f32>,
}

impl PcmProducer {
    /// Write every sample, sleeping while the buffer is full. Returns the
    /// number of samples written, which is only short of `samples.len()`
    /// when `should_abort` fires (stop or seek requested).
    ///
    /// Never overwrites unread data.
    pub fn write_all(&mut self, samples: &[f32], should_abort: impl Fn() -> bool) -> usize {
        let mut written = 0;
        while written < samples.len() {
            let pushed = self.prod.push_slice(&samples[written..]);
            written += pushed;
            if written == samples.len() {
                break;
            }
            if should_abort() {
                break;
            }
            if pushed == 0 {
                thread::sleep(FULL_BACKOFF);
            }
        }
        written
    }

    /// Samples currently buffered (readable by the consumer).
    pub fn occupied(&self) -> usize {
        self.prod.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.prod.capacity().into()
    }

    /// Buffer fill level from 0.0 to 1.0.
    pub fn fullness(&self) -> f32 {
        self.occupied() as f32 / self.capacity() as f32
    }
}

/// Read half, owned by the render callback.
pub struct PcmConsumer {
    cons: ringbuf::HeapCons<f32>,
}

impl PcmConsumer {
    /// Fill `out` from the buffer, zero-padding whatever is missing.
    /// Returns the number of real samples copied; a short count is an
    /// underrun for the caller to account. Never blocks.
    pub fn read_padded(&mut self, out: &mut [f32]) -> usize {
        let read = self.cons.pop_slice(out);
        if read < out.len() {
            out[read..].fill(0.0);
        }
        read
    }
}

/// Consumer handoff slot between the decode thread and the render callback.
///
/// The render callback polls `pending` (one atomic load per quantum); only
/// when a swap is parked does it touch the mutex, and at that moment the
/// decode side has already quiesced and is not holding it.
#[derive(Default)]
pub struct RingSwap {
    slot: Mutex<Option<PcmConsumer>>,
    pending: AtomicBool,
}

impl RingSwap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a fresh consumer for the render side to adopt. Called from the
    /// decode thread after a seek flush or a format change.
    pub fn park(&self, consumer: PcmConsumer) {
        *self.slot.lock().unwrap() = Some(consumer);
        self.pending.store(true, Ordering::Release);
    }

    /// Adopt a parked consumer, if any. Called from the render callback.
    pub fn try_adopt(&self) -> Option<PcmConsumer> {
        if !self.pending.load(Ordering::Acquire) {
            return None;
        }
        // try_lock keeps the callback wait-free even if the decode thread
        // parks again at exactly this instant; the swap lands next quantum.
        let mut slot = self.slot.try_lock().ok()?;
        let consumer = slot.take()?;
        self.pending.store(false, Ordering::Release);
        Some(consumer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn spec() -> AudioSpec {
        AudioSpec::new(100, 1) // tiny ring for tests: 100 samples/sec
    }

    #[test]
    fn test_fifo_order_preserved() {
        let (mut prod, mut cons) = pcm_ring(spec(), 1);
        let input: Vec<f32> = (0..50).map(|i| i as f32).collect();
        assert_eq!(prod.write_all(&input, || false), 50);

        let mut out = vec![0.0f32; 50];
        assert_eq!(cons.read_padded(&mut out), 50);
        assert_eq!(out, input);
    }

    #[test]
    fn test_underrun_pads_with_silence() {
        let (mut prod, mut cons) = pcm_ring(spec(), 1);
        prod.write_all(&[0.5, 0.5], || false);

        let mut out = vec![1.0f32; 8];
        let read = cons.read_padded(&mut out);
        assert_eq!(read, 2);
        assert_eq!(&out[..2], &[0.5, 0.5]);
        assert!(out[2..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_write_never_overwrites_unread_data() {
        let (mut prod, mut cons) = pcm_ring(spec(), 1); // capacity 100
        let first: Vec<f32> = vec![1.0; 100];
        assert_eq!(prod.write_all(&first, || false), 100);

        // Buffer is full: an aborting write makes no progress and loses
        // nothing already buffered.
        let written = prod.write_all(&[2.0; 10], || true);
        assert_eq!(written, 0);

        let mut out = vec![0.0f32; 100];
        cons.read_padded(&mut out);
        assert!(out.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_backpressure_blocks_then_resumes_without_loss() {
        let (mut prod, mut cons) = pcm_ring(spec(), 1); // capacity 100
        let total = 1000usize;

        let writer = thread::spawn(move || {
            let input: Vec<f32> = (0..total).map(|i| i as f32).collect();
            let written = prod.write_all(&input, || false);
            assert_eq!(written, total);
        });

        // Drain slowly; every sample must arrive exactly once, in order.
        let mut received = Vec::with_capacity(total);
        let mut out = [0.0f32; 32];
        while received.len() < total {
            let n = cons.cons.pop_slice(&mut out);
            received.extend_from_slice(&out[..n]);
            thread::sleep(Duration::from_micros(200));
        }
        writer.join().unwrap();

        for (i, &sample) in received.iter().enumerate() {
            assert_eq!(sample, i as f32);
        }
    }

    #[test]
    fn test_consumer_never_reads_unwritten_data() {
        let (mut prod, mut cons) = pcm_ring(spec(), 1);
        let stop = Arc::new(AtomicBool::new(false));

        let stop_w = Arc::clone(&stop);
        let writer = thread::spawn(move || {
            let mut value = 0.0f32;
            while !stop_w.load(Ordering::Relaxed) {
                // Write a recognizable ramp
                let chunk: Vec<f32> = (0..16).map(|i| value + i as f32).collect();
                let n = prod.write_all(&chunk, || stop_w.load(Ordering::Relaxed));
                value += n as f32;
            }
        });

        let mut expected = 0.0f32;
        let mut out = [0.0f32; 16];
        for _ in 0..200 {
            let n = cons.cons.pop_slice(&mut out);
            for &sample in &out[..n] {
                assert_eq!(sample, expected, "consumer observed unwritten data");
                expected += 1.0;
            }
        }

        stop.store(true, Ordering::Relaxed);
        writer.join().unwrap();
    }

    #[test]
    fn test_ring_swap_handoff() {
        let swap = RingSwap::new();
        assert!(swap.try_adopt().is_none());

        let (mut prod, cons) = pcm_ring(spec(), 1);
        prod.write_all(&[0.25; 4], || false);
        swap.park(cons);

        let mut adopted = swap.try_adopt().expect("parked consumer");
        let mut out = [0.0f32; 4];
        assert_eq!(adopted.read_padded(&mut out), 4);
        assert!(swap.try_adopt().is_none());
    }
}
