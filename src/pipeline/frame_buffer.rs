//! Bounded single-producer/single-consumer frame queue between stages.
//!
//! The queue never blocks the producer: when it is full the oldest frame is
//! evicted and an overrun is recorded. Capacity is fixed per instance. A
//! resize builds a fresh instance that the producer swaps in between two
//! pushes; the consumer finishes draining the retired instance before it
//! reads from the new one, so FIFO order survives the swap.
//!
//! A shrink is only swapped in once the frames still queued fit in the new
//! capacity. Until the consumer drains the retired instance, `occupancy()`
//! counts both instances and can briefly read up to twice the new capacity.

use crate::error::{Result, VoxError};
use crate::pipeline::frame::AudioFrame;
use arc_swap::{ArcSwap, ArcSwapOption};
use crossbeam::queue::ArrayQueue;
use crossbeam::utils::Backoff;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One fixed-capacity storage instance.
struct Slots {
    queue: ArrayQueue<AudioFrame>,
}

impl Slots {
    fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
        }
    }
}

/// Counters recorded by a frame buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Frames accepted by `push`.
    pub pushed: u64,
    /// Frames handed out by `pop`.
    pub popped: u64,
    /// Frames evicted because the buffer was full.
    pub overruns: u64,
    /// Sequence numbers the consumer never saw.
    pub dropped: u64,
}

struct Shared {
    name: &'static str,
    current: ArcSwap<Slots>,
    pending: ArcSwapOption<Slots>,
    retired: ArcSwapOption<Slots>,
    pushed: AtomicU64,
    popped: AtomicU64,
    overruns: AtomicU64,
    dropped: AtomicU64,
}

/// Creates a frame buffer and splits it into its producer, consumer and
/// observer halves.
///
/// `capacity` must be a power of two of at least 2.
pub fn frame_buffer(
    name: &'static str,
    capacity: usize,
) -> Result<(FrameProducer, FrameConsumer, FrameBufferHandle)> {
    validate_capacity(capacity)?;
    let shared = Arc::new(Shared {
        name,
        current: ArcSwap::from_pointee(Slots::new(capacity)),
        pending: ArcSwapOption::empty(),
        retired: ArcSwapOption::empty(),
        pushed: AtomicU64::new(0),
        popped: AtomicU64::new(0),
        overruns: AtomicU64::new(0),
        dropped: AtomicU64::new(0),
    });

    Ok((
        FrameProducer {
            shared: shared.clone(),
        },
        FrameConsumer {
            shared: shared.clone(),
            next_sequence: 0,
        },
        FrameBufferHandle { shared },
    ))
}

fn validate_capacity(capacity: usize) -> Result<()> {
    if capacity < 2 || !capacity.is_power_of_two() {
        return Err(VoxError::ConfigInvalidValue {
            key: "capacity".to_string(),
            message: format!("{capacity} is not a power of two >= 2"),
        });
    }
    Ok(())
}

/// Write half. Exactly one exists per buffer.
pub struct FrameProducer {
    shared: Arc<Shared>,
}

impl FrameProducer {
    /// Pushes a frame without blocking.
    ///
    /// Returns false when the buffer was full; the oldest queued frame was
    /// evicted to make room and an overrun was recorded.
    pub fn push(&mut self, frame: AudioFrame) -> bool {
        self.apply_pending_resize();

        let sequence = frame.sequence();
        let slots = self.shared.current.load();
        self.shared.pushed.fetch_add(1, Ordering::Relaxed);
        match slots.queue.force_push(frame) {
            None => true,
            Some(evicted) => {
                self.shared.overruns.fetch_add(1, Ordering::Relaxed);
                debug!(
                    buffer = self.shared.name,
                    evicted = evicted.sequence(),
                    incoming = sequence,
                    "frame buffer overrun"
                );
                false
            }
        }
    }

    /// Swaps in a requested instance, but only once the consumer has
    /// finished with the previously retired one and, for a shrink, once the
    /// frames still queued fit in the new capacity.
    fn apply_pending_resize(&mut self) {
        if self.shared.retired.load().is_some() {
            return;
        }
        match self.shared.pending.load().as_ref() {
            None => return,
            Some(next) if self.shared.current.load().queue.len() > next.queue.capacity() => return,
            Some(_) => {}
        }
        let Some(next) = self.shared.pending.swap(None) else {
            return;
        };
        let capacity = next.queue.capacity();
        // Retire before publishing so a consumer that sees the new instance
        // also sees the old one it has to drain first.
        self.shared.retired.store(Some(self.shared.current.load_full()));
        self.shared.current.store(next);
        debug!(buffer = self.shared.name, capacity, "frame buffer resized");
    }

    pub fn capacity(&self) -> usize {
        self.shared.current.load().queue.capacity()
    }
}

/// Read half. Exactly one exists per buffer.
pub struct FrameConsumer {
    shared: Arc<Shared>,
    next_sequence: u64,
}

impl FrameConsumer {
    /// Pops the oldest frame, or `None` when the buffer is empty.
    pub fn pop(&mut self) -> Option<AudioFrame> {
        let current = self.shared.current.load_full();
        if let Some(retired) = self.shared.retired.load_full() {
            if let Some(frame) = retired.queue.pop() {
                return Some(self.accept(frame));
            }
            if !Arc::ptr_eq(&retired, &current) {
                self.shared.retired.store(None);
            }
        }
        current.queue.pop().map(|frame| self.accept(frame))
    }

    /// Pops a frame, waiting at most `timeout` for one to arrive.
    ///
    /// Only for contexts that are allowed to wait (the transform loop);
    /// device callbacks use [`FrameConsumer::pop`].
    pub fn pop_timeout(&mut self, timeout: Duration) -> Option<AudioFrame> {
        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();
        loop {
            if let Some(frame) = self.pop() {
                return Some(frame);
            }
            if Instant::now() >= deadline {
                return None;
            }
            if backoff.is_completed() {
                thread::sleep(Duration::from_micros(250));
            } else {
                backoff.snooze();
            }
        }
    }

    /// Discards everything queued, returning how many frames were dropped.
    pub fn clear(&mut self) -> usize {
        let mut discarded = 0;
        while self.pop().is_some() {
            discarded += 1;
        }
        discarded
    }

    pub fn len(&self) -> usize {
        occupancy(&self.shared)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn accept(&mut self, frame: AudioFrame) -> AudioFrame {
        let sequence = frame.sequence();
        if sequence > self.next_sequence {
            let missing = sequence - self.next_sequence;
            self.shared.dropped.fetch_add(missing, Ordering::Relaxed);
            debug!(
                buffer = self.shared.name,
                expected = self.next_sequence,
                got = sequence,
                missing,
                "sequence gap"
            );
        } else if sequence < self.next_sequence {
            warn!(
                buffer = self.shared.name,
                expected = self.next_sequence,
                got = sequence,
                "frame arrived out of order"
            );
        }
        self.next_sequence = self.next_sequence.max(sequence + 1);
        self.shared.popped.fetch_add(1, Ordering::Relaxed);
        frame
    }
}

fn occupancy(shared: &Shared) -> usize {
    let current = shared.current.load();
    let retired = shared
        .retired
        .load()
        .as_ref()
        .filter(|retired| !Arc::ptr_eq(retired, &current))
        .map(|retired| retired.queue.len())
        .unwrap_or(0);
    current.queue.len() + retired
}

/// Observer half used by the governor and the metrics surface.
#[derive(Clone)]
pub struct FrameBufferHandle {
    shared: Arc<Shared>,
}

impl FrameBufferHandle {
    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    /// Capacity of the instance the producer currently writes to.
    pub fn capacity(&self) -> usize {
        self.shared.current.load().queue.capacity()
    }

    /// Capacity that will take effect at the producer's next push, if any.
    pub fn pending_capacity(&self) -> Option<usize> {
        self.shared
            .pending
            .load()
            .as_ref()
            .map(|slots| slots.queue.capacity())
    }

    /// Frames currently queued, including any left in a retired instance.
    pub fn occupancy(&self) -> usize {
        occupancy(&self.shared)
    }

    /// Requests a new capacity. The producer swaps it in between two pushes.
    pub fn request_resize(&self, capacity: usize) -> Result<()> {
        validate_capacity(capacity)?;
        self.shared
            .pending
            .store(Some(Arc::new(Slots::new(capacity))));
        Ok(())
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            pushed: self.shared.pushed.load(Ordering::Relaxed),
            popped: self.shared.popped.load(Ordering::Relaxed),
            overruns: self.shared.overruns.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
        }
    }
}
