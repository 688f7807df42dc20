//! Frame type that flows between pipeline stages.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// A fixed-length block of mono 16-bit PCM audio.
///
/// Frames are immutable once built. The transform stage produces a new frame
/// that keeps the sequence number and capture timestamp of its input, so
/// end-to-end latency and ordering can be checked at playback.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    sequence: u64,
    captured_at: Instant,
    samples: Arc<[i16]>,
}

impl AudioFrame {
    /// Creates a new audio frame.
    pub fn new(sequence: u64, captured_at: Instant, samples: Vec<i16>) -> Self {
        Self {
            sequence,
            captured_at,
            samples: samples.into(),
        }
    }

    /// Builds the successor of this frame carrying different samples.
    pub fn with_samples(&self, samples: Vec<i16>) -> Self {
        Self::new(self.sequence, self.captured_at, samples)
    }

    /// Sequence number assigned at capture.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// When the first sample of this frame was captured.
    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the duration of this frame at the given sample rate.
    pub fn duration(&self, sample_rate: u32) -> Duration {
        frame_duration(self.samples.len(), sample_rate)
    }
}

/// Duration covered by `frame_size` samples at `sample_rate`.
pub fn frame_duration(frame_size: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(frame_size as u64 * 1_000_000_000 / sample_rate as u64)
}
