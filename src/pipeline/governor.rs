//! Adaptive latency policy.
//!
//! Every `window_frames` frames the governor compares the mean transform
//! duration with the frame budget. Action is only taken after
//! `hysteresis_windows` consecutive windows on the same side of a watermark;
//! a window between the two watermarks resets both streaks.
//!
//! Overload grows both buffers one power-of-two step at a time and, once at
//! the maximum, switches the transform to the fallback path. Relief clears the
//! fallback and shrinks the buffers back toward the baseline. Drift reports
//! from playback turn into a single one-frame correction at a time.
//!
//! Underruns and overruns are only debug-logged where they happen. The
//! governor warns once when their rate over a window passes
//! `xrun_warn_rate`, and flags the published report until it drops back.

use crate::pipeline::control::{ClockSync, Correction};
use crate::pipeline::frame_buffer::FrameBufferHandle;
use crate::pipeline::latency::LatencyMeasurement;
use crate::pipeline::metrics::{GovernorReport, PipelineMetrics, ratio};
use crate::pipeline::params::ParameterStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tunables for [`LatencyGovernor`].
#[derive(Debug, Clone, PartialEq)]
pub struct GovernorConfig {
    pub frame_duration: Duration,
    pub frame_size: usize,
    pub high_watermark: f64,
    pub low_watermark: f64,
    pub window_frames: u32,
    pub hysteresis_windows: u32,
    pub measurement_window: usize,
    pub baseline_capacity: usize,
    pub min_capacity: usize,
    pub max_capacity: usize,
    /// Drift tolerated before a correction, in samples.
    pub drift_threshold: f64,
    /// Underruns plus overruns per frame tolerated before warning.
    pub xrun_warn_rate: f64,
}

/// Something the governor did during an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernorAction {
    Grow { from: usize, to: usize },
    Shrink { from: usize, to: usize },
    EnterFallback,
    ExitFallback,
    Correct(Correction),
}

pub struct LatencyGovernor {
    config: GovernorConfig,
    measurement: LatencyMeasurement,
    params: Arc<ParameterStore>,
    input: FrameBufferHandle,
    output: FrameBufferHandle,
    sync: Arc<ClockSync>,
    metrics: Arc<PipelineMetrics>,
    capacity: usize,
    frames_since_eval: u32,
    overload_streak: u32,
    relaxed_streak: u32,
    windows: u64,
    awaiting_correction: Option<Correction>,
    last_xruns: u64,
    xrun_warning: bool,
}

impl LatencyGovernor {
    pub fn new(
        config: GovernorConfig,
        params: Arc<ParameterStore>,
        input: FrameBufferHandle,
        output: FrameBufferHandle,
        sync: Arc<ClockSync>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let capacity = output.capacity();
        Self {
            measurement: LatencyMeasurement::new(config.measurement_window),
            config,
            params,
            input,
            output,
            sync,
            metrics,
            capacity,
            frames_since_eval: 0,
            overload_streak: 0,
            relaxed_streak: 0,
            windows: 0,
            awaiting_correction: None,
            last_xruns: 0,
            xrun_warning: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn measurement(&self) -> &LatencyMeasurement {
        &self.measurement
    }

    /// Records one processed frame; evaluates when a window completes.
    pub fn record_frame(&mut self, transform: Duration) -> Vec<GovernorAction> {
        let occupancy = self.input.occupancy() + self.output.occupancy();
        self.measurement.record_frame(transform, occupancy);
        if let Some(drift) = self.sync.drift() {
            self.measurement.record_drift(drift);
        }

        self.frames_since_eval += 1;
        if self.frames_since_eval < self.config.window_frames {
            return Vec::new();
        }
        self.frames_since_eval = 0;
        self.evaluate()
    }

    /// Switches to the fallback path outside the normal evaluation, e.g. after
    /// repeated model failures. It stays active until relief clears it.
    pub fn force_fallback(&mut self) -> bool {
        if !self.params.set_fallback(true) {
            return false;
        }
        self.on_fallback_entered();
        warn!("Fallback forced: model keeps failing");
        true
    }

    /// Forgets drift history gathered before a pause.
    pub fn on_resume(&mut self) {
        self.measurement.clear_drift();
        self.frames_since_eval = 0;
        let (underruns, overruns) = self.xrun_counts();
        self.last_xruns = underruns + overruns;
    }

    fn evaluate(&mut self) -> Vec<GovernorAction> {
        self.windows += 1;
        let window = self.config.window_frames as usize;
        let average = self.measurement.recent_transform(window);
        let load = ratio(average, self.config.frame_duration);
        let occupancy = self.measurement.recent_occupancy(window);

        if load > self.config.high_watermark {
            self.overload_streak += 1;
            self.relaxed_streak = 0;
        } else if load < self.config.low_watermark {
            self.relaxed_streak += 1;
            self.overload_streak = 0;
        } else {
            self.overload_streak = 0;
            self.relaxed_streak = 0;
        }

        debug!(
            window = self.windows,
            load = format_args!("{load:.2}"),
            occupancy = format_args!("{occupancy:.1}"),
            overload_streak = self.overload_streak,
            relaxed_streak = self.relaxed_streak,
            "governor window"
        );

        let mut actions = Vec::new();
        let fallback = self.params.fallback_active();
        let hysteresis = self.config.hysteresis_windows;

        if self.overload_streak >= hysteresis {
            self.overload_streak = 0;
            if self.capacity < self.config.max_capacity {
                let to = (self.capacity * 2).min(self.config.max_capacity);
                actions.extend(self.resize(to));
            } else if !fallback && self.params.set_fallback(true) {
                self.on_fallback_entered();
                warn!(load = format_args!("{load:.2}"), "Sustained overload, switching to fallback");
                actions.push(GovernorAction::EnterFallback);
            }
        } else if fallback && self.relaxed_streak >= hysteresis {
            self.relaxed_streak = 0;
            if self.params.set_fallback(false) {
                info!(load = format_args!("{load:.2}"), "Load relieved, leaving fallback");
                actions.push(GovernorAction::ExitFallback);
            }
            if let Some(shrink) = self.shrink_if_idle(occupancy) {
                actions.push(shrink);
            }
        } else if !fallback && self.relaxed_streak >= hysteresis {
            if let Some(shrink) = self.shrink_if_idle(occupancy) {
                self.relaxed_streak = 0;
                actions.push(shrink);
            }
        }

        if let Some(correction) = self.check_drift() {
            actions.push(GovernorAction::Correct(correction));
        }

        let xrun_rate = self.check_xruns();

        self.metrics.publish(GovernorReport {
            average_transform: average,
            load,
            average_occupancy: occupancy,
            drift_samples: self.measurement.average_drift(),
            capacity: self.capacity,
            windows: self.windows,
            xrun_rate,
            xrun_warning: self.xrun_warning,
        });
        actions
    }

    /// Streaks restart from zero on every entry, so recovery always takes
    /// `hysteresis_windows` relaxed windows.
    fn on_fallback_entered(&mut self) {
        self.overload_streak = 0;
        self.relaxed_streak = 0;
    }

    /// Rate of underruns plus overruns since the previous window.
    fn check_xruns(&mut self) -> f64 {
        let (underruns, overruns) = self.xrun_counts();
        let total = underruns + overruns;
        let delta = total.saturating_sub(self.last_xruns);
        self.last_xruns = total;

        let rate = delta as f64 / f64::from(self.config.window_frames);
        let excessive = rate > self.config.xrun_warn_rate;
        if excessive && !self.xrun_warning {
            warn!(
                rate = format_args!("{rate:.2}"),
                underruns,
                overruns,
                "Frequent audio dropouts, output may stutter"
            );
        } else if !excessive && self.xrun_warning {
            info!("Audio dropouts back to normal");
        }
        self.xrun_warning = excessive;
        rate
    }

    fn xrun_counts(&self) -> (u64, u64) {
        let overruns = self.input.stats().overruns + self.output.stats().overruns;
        (self.metrics.underruns(), overruns)
    }

    fn shrink_if_idle(&mut self, occupancy: f64) -> Option<GovernorAction> {
        if self.capacity <= self.config.baseline_capacity {
            return None;
        }
        // Both buffers together less than a quarter full.
        if occupancy > (2 * self.capacity) as f64 / 4.0 {
            return None;
        }
        let to = (self.capacity / 2)
            .max(self.config.baseline_capacity)
            .max(self.config.min_capacity);
        self.resize(to)
    }

    fn resize(&mut self, to: usize) -> Option<GovernorAction> {
        let from = self.capacity;
        if to == from {
            return None;
        }
        for handle in [&self.input, &self.output] {
            if let Err(e) = handle.request_resize(to) {
                warn!(buffer = handle.name(), error = %e, "Resize rejected");
                return None;
            }
        }
        self.capacity = to;
        info!(from, to, "Buffer capacity changed");
        Some(if to > from {
            GovernorAction::Grow { from, to }
        } else {
            GovernorAction::Shrink { from, to }
        })
    }

    fn check_drift(&mut self) -> Option<Correction> {
        if let Some(awaiting) = self.awaiting_correction {
            if self.sync.pending() == Some(awaiting) {
                return None;
            }
            // Applied; judge the new offset on fresh reports only.
            self.awaiting_correction = None;
            self.measurement.clear_drift();
            return None;
        }

        if self.measurement.drift_reports() < self.config.window_frames as usize {
            return None;
        }
        let drift = self.measurement.average_drift()?;
        let correction = if drift > self.config.drift_threshold {
            Correction::DropFrame
        } else if drift < -self.config.drift_threshold {
            Correction::InsertFrame
        } else {
            return None;
        };

        if !self.sync.request(correction) {
            return None;
        }
        info!(
            drift_samples = format_args!("{drift:.0}"),
            correction = ?correction,
            "Clock drift beyond threshold, correcting by one frame"
        );
        self.awaiting_correction = Some(correction);
        Some(correction)
    }
}
