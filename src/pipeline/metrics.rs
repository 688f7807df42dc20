//! Counters and published reports polled by the display surface.
//!
//! Stages bump lock-free counters; the governor publishes its latest
//! evaluation through an `ArcSwap` so readers never contend with the
//! transform loop.

use crate::pipeline::frame_buffer::FrameBufferHandle;
use crate::pipeline::latency::SessionSummary;
use crate::pipeline::params::TransformParameters;
use arc_swap::ArcSwap;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Result of the governor's most recent evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GovernorReport {
    /// Mean transform duration of the last evaluated window.
    pub average_transform: Duration,
    /// `average_transform` divided by the frame duration.
    pub load: f64,
    /// Mean occupancy of both buffers over the last window.
    pub average_occupancy: f64,
    /// Mean drift in samples, when playback has reported any.
    pub drift_samples: Option<f64>,
    /// Buffer capacity after the evaluation.
    pub capacity: usize,
    /// Windows evaluated so far.
    pub windows: u64,
    /// Underruns plus overruns per frame over the last window.
    pub xrun_rate: f64,
    /// Set while `xrun_rate` stays above the warning threshold.
    pub xrun_warning: bool,
}

/// Per-session counters shared by every stage.
#[derive(Debug)]
pub struct PipelineMetrics {
    frames_captured: AtomicU64,
    frames_transformed: AtomicU64,
    frames_played: AtomicU64,
    fallback_frames: AtomicU64,
    underruns: AtomicU64,
    model_failures: AtomicU64,
    drift_corrections: AtomicU64,
    transform_total_ns: AtomicU64,
    transform_max_ns: AtomicU64,
    last_transform_ns: AtomicU64,
    latency_total_ns: AtomicU64,
    latency_max_ns: AtomicU64,
    latency_count: AtomicU64,
    last_latency_ns: AtomicU64,
    governor: ArcSwap<GovernorReport>,
}

fn nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            frames_captured: AtomicU64::new(0),
            frames_transformed: AtomicU64::new(0),
            frames_played: AtomicU64::new(0),
            fallback_frames: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            model_failures: AtomicU64::new(0),
            drift_corrections: AtomicU64::new(0),
            transform_total_ns: AtomicU64::new(0),
            transform_max_ns: AtomicU64::new(0),
            last_transform_ns: AtomicU64::new(0),
            latency_total_ns: AtomicU64::new(0),
            latency_max_ns: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
            last_latency_ns: AtomicU64::new(0),
            governor: ArcSwap::from_pointee(GovernorReport::default()),
        }
    }

    pub fn record_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one transformed frame and how long it took.
    pub fn record_transform(&self, duration: Duration, fallback: bool) {
        let ns = nanos(duration);
        self.frames_transformed.fetch_add(1, Ordering::Relaxed);
        if fallback {
            self.fallback_frames.fetch_add(1, Ordering::Relaxed);
        }
        self.transform_total_ns.fetch_add(ns, Ordering::Relaxed);
        self.transform_max_ns.fetch_max(ns, Ordering::Relaxed);
        self.last_transform_ns.store(ns, Ordering::Relaxed);
    }

    /// Records a frame reaching the playback device.
    pub fn record_played(&self, latency: Duration) {
        let ns = nanos(latency);
        self.frames_played.fetch_add(1, Ordering::Relaxed);
        self.latency_total_ns.fetch_add(ns, Ordering::Relaxed);
        self.latency_max_ns.fetch_max(ns, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
        self.last_latency_ns.store(ns, Ordering::Relaxed);
    }

    pub fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_model_failure(&self) {
        self.model_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drift_correction(&self) {
        self.drift_corrections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish(&self, report: GovernorReport) {
        self.governor.store(Arc::new(report));
    }

    pub fn governor(&self) -> Arc<GovernorReport> {
        self.governor.load_full()
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    pub fn frames_transformed(&self) -> u64 {
        self.frames_transformed.load(Ordering::Relaxed)
    }

    pub fn frames_played(&self) -> u64 {
        self.frames_played.load(Ordering::Relaxed)
    }

    pub fn fallback_frames(&self) -> u64 {
        self.fallback_frames.load(Ordering::Relaxed)
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn model_failures(&self) -> u64 {
        self.model_failures.load(Ordering::Relaxed)
    }

    pub fn drift_corrections(&self) -> u64 {
        self.drift_corrections.load(Ordering::Relaxed)
    }

    pub fn last_latency(&self) -> Duration {
        Duration::from_nanos(self.last_latency_ns.load(Ordering::Relaxed))
    }

    pub fn last_transform(&self) -> Duration {
        Duration::from_nanos(self.last_transform_ns.load(Ordering::Relaxed))
    }

    /// Point-in-time view for the display surface.
    pub fn snapshot(
        &self,
        frame_duration: Duration,
        input: &FrameBufferHandle,
        output: &FrameBufferHandle,
        params: &TransformParameters,
    ) -> MetricsSnapshot {
        let report = self.governor();
        // Before the first evaluation fall back to the last measured frame.
        let (transform, load) = if report.windows == 0 {
            let last = self.last_transform();
            (last, ratio(last, frame_duration))
        } else {
            (report.average_transform, report.load)
        };
        let input_stats = input.stats();
        let output_stats = output.stats();

        MetricsSnapshot {
            transform_ms: transform.as_secs_f64() * 1000.0,
            transform_load: load,
            latency_ms: self.last_latency().as_secs_f64() * 1000.0,
            input_occupancy: input.occupancy(),
            output_occupancy: output.occupancy(),
            capacity: output.capacity(),
            fallback_active: params.fallback_active,
            xrun_warning: report.xrun_warning,
            pitch_shift: params.pitch_shift,
            formant_shift: params.formant_shift,
            intensity: params.intensity,
            frames_played: self.frames_played(),
            underruns: self.underruns(),
            overruns: input_stats.overruns + output_stats.overruns,
            dropped: output_stats.dropped,
            model_failures: self.model_failures(),
            drift_corrections: self.drift_corrections(),
        }
    }

    /// Session totals, with buffer counters taken from the two handles.
    pub fn summary(&self, input: &FrameBufferHandle, output: &FrameBufferHandle) -> SessionSummary {
        let transformed = self.frames_transformed();
        let latency_count = self.latency_count.load(Ordering::Relaxed);
        let mean = |total: &AtomicU64, count: u64| {
            if count == 0 {
                Duration::ZERO
            } else {
                Duration::from_nanos(total.load(Ordering::Relaxed) / count)
            }
        };

        SessionSummary {
            frames_played: self.frames_played(),
            frames_transformed: transformed,
            fallback_frames: self.fallback_frames(),
            avg_transform: mean(&self.transform_total_ns, transformed),
            worst_transform: Duration::from_nanos(self.transform_max_ns.load(Ordering::Relaxed)),
            avg_latency: mean(&self.latency_total_ns, latency_count),
            worst_latency: Duration::from_nanos(self.latency_max_ns.load(Ordering::Relaxed)),
            underruns: self.underruns(),
            overruns: input.stats().overruns + output.stats().overruns,
            dropped: output.stats().dropped,
            model_failures: self.model_failures(),
            drift_corrections: self.drift_corrections(),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// `part / whole` as a fraction, zero when `whole` is zero.
pub fn ratio(part: Duration, whole: Duration) -> f64 {
    if whole.is_zero() {
        return 0.0;
    }
    part.as_nanos() as f64 / whole.as_nanos() as f64
}

/// Metrics exposed to an external display, serialisable for `--json` style output.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Mean transform duration in milliseconds.
    pub transform_ms: f64,
    /// Transform duration as a fraction of the frame duration.
    pub transform_load: f64,
    /// Most recent end-to-end latency in milliseconds.
    pub latency_ms: f64,
    pub input_occupancy: usize,
    pub output_occupancy: usize,
    pub capacity: usize,
    pub fallback_active: bool,
    /// Underruns or overruns are happening often enough to be audible.
    pub xrun_warning: bool,
    pub pitch_shift: f32,
    pub formant_shift: f32,
    pub intensity: f32,
    pub frames_played: u64,
    pub underruns: u64,
    pub overruns: u64,
    pub dropped: u64,
    pub model_failures: u64,
    pub drift_corrections: u64,
}

impl MetricsSnapshot {
    /// Snapshot for a session without a running pipeline.
    pub fn idle(params: &TransformParameters) -> Self {
        Self {
            fallback_active: params.fallback_active,
            pitch_shift: params.pitch_shift,
            formant_shift: params.formant_shift,
            intensity: params.intensity,
            ..Default::default()
        }
    }
}
