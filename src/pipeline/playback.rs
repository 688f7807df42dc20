//! Playback stage: output buffer → device chunks, with underrun fades and
//! drift tracking.

use crate::audio::dsp;
use crate::pipeline::clock::Clock;
use crate::pipeline::control::{ClockSync, Correction, DeviceSide, SessionEvent, StageControl};
use crate::pipeline::frame_buffer::FrameConsumer;
use crate::pipeline::metrics::PipelineMetrics;
use crossbeam_channel::Sender;
use std::sync::Arc;
use tracing::{debug, error};

/// Fills this many device callbacks before fixing the drift baseline.
const DRIFT_SETTLE_FILLS: u32 = 16;

/// Converts the raw capture/playback offset into drift relative to the offset
/// observed once streaming settled.
#[derive(Debug, Default)]
pub struct DriftTracker {
    settled: u32,
    sum: i64,
    baseline: Option<i64>,
}

impl DriftTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds the current offset; returns drift once a baseline exists.
    pub fn observe(&mut self, offset: i64) -> Option<i64> {
        match self.baseline {
            Some(baseline) => Some(offset - baseline),
            None => {
                self.settled += 1;
                self.sum += offset;
                if self.settled >= DRIFT_SETTLE_FILLS {
                    self.baseline = Some(self.sum / self.settled as i64);
                }
                None
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn baseline(&self) -> Option<i64> {
        self.baseline
    }
}

/// Reactive handler invoked by the playback driver.
///
/// Always fills the whole device buffer. Frames are copied out across device
/// chunks of any size; when the output buffer is empty a fade from the last
/// delivered sample to silence takes the place of the missing frame.
pub struct PlaybackStage {
    frame_size: usize,
    consumer: FrameConsumer,
    current: Vec<i16>,
    position: usize,
    last_sample: i16,
    control: Arc<StageControl>,
    sync: Arc<ClockSync>,
    clock: Arc<dyn Clock>,
    metrics: Arc<PipelineMetrics>,
    events: Sender<SessionEvent>,
    drift: DriftTracker,
    epoch: u64,
    failed: bool,
}

/// Everything the playback stage needs, gathered by the pipeline builder.
pub struct PlaybackParts {
    pub frame_size: usize,
    pub consumer: FrameConsumer,
    pub control: Arc<StageControl>,
    pub sync: Arc<ClockSync>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<PipelineMetrics>,
    pub events: Sender<SessionEvent>,
}

impl PlaybackStage {
    pub fn new(parts: PlaybackParts) -> Self {
        let epoch = parts.control.epoch();
        Self {
            frame_size: parts.frame_size,
            consumer: parts.consumer,
            current: Vec::with_capacity(parts.frame_size),
            position: 0,
            last_sample: 0,
            control: parts.control,
            sync: parts.sync,
            clock: parts.clock,
            metrics: parts.metrics,
            events: parts.events,
            drift: DriftTracker::new(),
            epoch,
            failed: false,
        }
    }

    /// Fills one device buffer.
    pub fn fill(&mut self, out: &mut [i16]) {
        if self.failed || !self.control.is_running() {
            out.fill(0);
            self.last_sample = 0;
            return;
        }

        let epoch = self.control.epoch();
        if epoch != self.epoch {
            self.epoch = epoch;
            self.drift.reset();
            self.sync.invalidate_drift();
        }

        self.sync.add_played(out.len());

        let mut written = 0;
        while written < out.len() {
            if self.position >= self.current.len() {
                self.next_frame();
            }
            let available = self.current.len() - self.position;
            let n = available.min(out.len() - written);
            out[written..written + n]
                .copy_from_slice(&self.current[self.position..self.position + n]);
            self.position += n;
            written += n;
        }
        if let Some(&last) = out.last() {
            self.last_sample = last;
        }

        if let Some(drift) = self.drift.observe(self.sync.offset()) {
            self.sync.report_drift(drift);
        }
    }

    /// Reports a device failure. The stage outputs silence from now on.
    pub fn on_device_error(&mut self, message: &str) {
        if self.failed {
            return;
        }
        self.failed = true;
        error!(message, "Playback device failed");
        let event = SessionEvent::DeviceError {
            side: DeviceSide::Playback,
            message: message.to_string(),
        };
        if self.events.send(event).is_err() {
            debug!("Session no longer listening for playback errors");
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn next_frame(&mut self) {
        self.current.clear();
        self.position = 0;

        if self.sync.take(Correction::InsertFrame) {
            self.sync.applied(Correction::InsertFrame, self.frame_size);
            self.metrics.record_drift_correction();
            self.current
                .extend(dsp::fade_to_silence(self.last_sample, self.frame_size));
            debug!("Inserted one filler frame to resync clocks");
            return;
        }

        match self.consumer.pop() {
            Some(frame) => {
                let latency = self.clock.now().saturating_duration_since(frame.captured_at());
                self.metrics.record_played(latency);
                self.current.extend_from_slice(frame.samples());
            }
            None => {
                self.metrics.record_underrun();
                debug!(last_sample = self.last_sample, "Playback underrun, fading to silence");
                self.current
                    .extend(dsp::fade_to_silence(self.last_sample, self.frame_size));
            }
        }
        if self.current.is_empty() {
            // Zero-length frames would stall the fill loop.
            self.current.push(0);
        }
        if let Some(&last) = self.current.last() {
            self.last_sample = last;
        }
    }
}
