//! Capture stage: device chunks → fixed-size frames in the input buffer.

use crate::pipeline::clock::Clock;
use crate::pipeline::control::{ClockSync, Correction, DeviceSide, SessionEvent, StageControl};
use crate::pipeline::frame::AudioFrame;
use crate::pipeline::frame_buffer::FrameProducer;
use crate::pipeline::metrics::PipelineMetrics;
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Reactive handler invoked by the capture driver.
///
/// Re-buffers chunks of any size into frames of `frame_size` samples, stamps
/// each frame with a sequence number and the capture time of its first sample,
/// and pushes it without blocking. No transform work happens here.
pub struct CaptureStage {
    frame_size: usize,
    sample_rate: u32,
    pending: Vec<i16>,
    pending_started: Option<Instant>,
    next_sequence: u64,
    producer: FrameProducer,
    control: Arc<StageControl>,
    sync: Arc<ClockSync>,
    clock: Arc<dyn Clock>,
    metrics: Arc<PipelineMetrics>,
    events: Sender<SessionEvent>,
    failed: bool,
}

/// Everything the capture stage needs, gathered by the pipeline builder.
pub struct CaptureParts {
    pub frame_size: usize,
    pub sample_rate: u32,
    pub producer: FrameProducer,
    pub control: Arc<StageControl>,
    pub sync: Arc<ClockSync>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<PipelineMetrics>,
    pub events: Sender<SessionEvent>,
}

impl CaptureStage {
    pub fn new(parts: CaptureParts) -> Self {
        Self {
            frame_size: parts.frame_size,
            sample_rate: parts.sample_rate,
            pending: Vec::with_capacity(parts.frame_size),
            pending_started: None,
            next_sequence: 0,
            producer: parts.producer,
            control: parts.control,
            sync: parts.sync,
            clock: parts.clock,
            metrics: parts.metrics,
            events: parts.events,
            failed: false,
        }
    }

    /// Delivers one chunk from the device. `now` (from the clock) is taken as
    /// the time the last sample of the chunk arrived.
    pub fn on_chunk(&mut self, samples: &[i16]) {
        if self.failed || !self.control.is_running() {
            // A frame straddling a pause would glue two unrelated moments.
            self.pending.clear();
            self.pending_started = None;
            return;
        }

        let now = self.clock.now();
        self.sync.add_captured(samples.len());

        let mut offset = 0;
        while offset < samples.len() {
            if self.pending.is_empty() {
                let behind = self.samples_to_duration(samples.len() - offset);
                self.pending_started = Some(now.checked_sub(behind).unwrap_or(now));
            }
            let take = (self.frame_size - self.pending.len()).min(samples.len() - offset);
            self.pending
                .extend_from_slice(&samples[offset..offset + take]);
            offset += take;

            if self.pending.len() == self.frame_size {
                self.emit_frame(now);
            }
        }
    }

    /// Reports a device failure. The stage stops producing and the session
    /// controller is told to shut the session down.
    pub fn on_device_error(&mut self, message: &str) {
        if self.failed {
            return;
        }
        self.failed = true;
        error!(message, "Capture device failed");
        let event = SessionEvent::DeviceError {
            side: DeviceSide::Capture,
            message: message.to_string(),
        };
        if self.events.send(event).is_err() {
            debug!("Session no longer listening for capture errors");
        }
    }

    /// Sequence number the next frame will get.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn emit_frame(&mut self, now: Instant) {
        let samples = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
        let captured_at = self.pending_started.take().unwrap_or(now);

        if self.sync.take(Correction::DropFrame) {
            self.sync.applied(Correction::DropFrame, self.frame_size);
            self.metrics.record_drift_correction();
            debug!(next_sequence = self.next_sequence, "Dropped one captured frame to resync clocks");
            return;
        }

        let frame = AudioFrame::new(self.next_sequence, captured_at, samples);
        self.next_sequence += 1;
        self.metrics.record_captured();
        self.producer.push(frame);
    }

    fn samples_to_duration(&self, samples: usize) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(samples as u64 * 1_000_000_000 / self.sample_rate as u64)
    }
}
