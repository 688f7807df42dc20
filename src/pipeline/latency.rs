//! Latency measurement and reporting for the streaming pipeline.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// Sliding window over the most recent frames.
///
/// Holds per-frame transform durations and buffer occupancy, plus the drift
/// reports seen while those frames were processed. Owned and mutated by the
/// governor only.
#[derive(Debug, Clone)]
pub struct LatencyMeasurement {
    window: usize,
    transforms: VecDeque<Duration>,
    occupancy: VecDeque<usize>,
    drift: VecDeque<i64>,
}

impl LatencyMeasurement {
    /// Creates a window holding at most `window` frames.
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            transforms: VecDeque::with_capacity(window),
            occupancy: VecDeque::with_capacity(window),
            drift: VecDeque::with_capacity(window),
        }
    }

    /// Records one processed frame.
    pub fn record_frame(&mut self, transform: Duration, occupancy: usize) {
        push_bounded(&mut self.transforms, transform, self.window);
        push_bounded(&mut self.occupancy, occupancy, self.window);
    }

    /// Records a drift report in samples.
    pub fn record_drift(&mut self, samples: i64) {
        push_bounded(&mut self.drift, samples, self.window);
    }

    /// Discards drift history, e.g. after a correction or a resume.
    pub fn clear_drift(&mut self) {
        self.drift.clear();
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Mean transform duration of the last `frames` frames.
    pub fn recent_transform(&self, frames: usize) -> Duration {
        let skip = self.transforms.len().saturating_sub(frames);
        let recent: Vec<Duration> = self.transforms.iter().skip(skip).copied().collect();
        avg_duration(&recent)
    }

    /// Mean transform duration over the whole window.
    pub fn average_transform(&self) -> Duration {
        self.recent_transform(self.transforms.len())
    }

    pub fn max_transform(&self) -> Duration {
        self.transforms.iter().max().copied().unwrap_or_default()
    }

    /// Mean occupancy of the last `frames` frames.
    pub fn recent_occupancy(&self, frames: usize) -> f64 {
        let skip = self.occupancy.len().saturating_sub(frames);
        let taken = self.occupancy.len() - skip;
        if taken == 0 {
            return 0.0;
        }
        let sum: usize = self.occupancy.iter().skip(skip).sum();
        sum as f64 / taken as f64
    }

    /// Mean drift over the window, or `None` before any report arrived.
    pub fn average_drift(&self) -> Option<f64> {
        if self.drift.is_empty() {
            return None;
        }
        let sum: i64 = self.drift.iter().sum();
        Some(sum as f64 / self.drift.len() as f64)
    }

    /// Number of drift reports currently held.
    pub fn drift_reports(&self) -> usize {
        self.drift.len()
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, value: T, limit: usize) {
    if queue.len() == limit {
        queue.pop_front();
    }
    queue.push_back(value);
}

/// Totals collected over a whole session, printed when it stops.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    pub frames_played: u64,
    pub frames_transformed: u64,
    pub fallback_frames: u64,
    pub avg_transform: Duration,
    pub worst_transform: Duration,
    pub avg_latency: Duration,
    pub worst_latency: Duration,
    pub underruns: u64,
    pub overruns: u64,
    pub dropped: u64,
    pub model_failures: u64,
    pub drift_corrections: u64,
}

impl SessionSummary {
    /// Prints the summary to stderr. Prints nothing for an empty session.
    pub fn print_summary(&self) {
        if self.frames_transformed == 0 && self.frames_played == 0 {
            return;
        }
        eprintln!();
        eprint!("{self}");
    }
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Session Summary ===")?;
        writeln!(
            f,
            "Converted {} frame{} ({} via fallback)",
            self.frames_transformed,
            if self.frames_transformed == 1 { "" } else { "s" },
            self.fallback_frames
        )?;
        writeln!(f)?;
        writeln!(
            f,
            "  Transform:   avg {}  worst {}",
            format_duration(self.avg_transform),
            format_duration(self.worst_transform)
        )?;
        writeln!(
            f,
            "  End-to-end:  avg {}  worst {}",
            format_duration(self.avg_latency),
            format_duration(self.worst_latency)
        )?;
        writeln!(f)?;
        writeln!(
            f,
            "  Underruns: {} | Overruns: {} | Dropped: {} | Model failures: {} | Drift corrections: {}",
            self.underruns, self.overruns, self.dropped, self.model_failures, self.drift_corrections
        )
    }
}

/// Formats a duration as a human-friendly string.
/// Under 1ms: "850µs", under 1s: "12.3ms", at or above 1s: "1.5s".
pub fn format_duration(d: Duration) -> String {
    let micros = d.as_micros();
    if micros < 1000 {
        format!("{micros}µs")
    } else if micros < 1_000_000 {
        format!("{:.1}ms", d.as_secs_f64() * 1000.0)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

/// Calculates average duration from a slice.
pub fn avg_duration(durations: &[Duration]) -> Duration {
    if durations.is_empty() {
        return Duration::ZERO;
    }
    let sum: Duration = durations.iter().sum();
    sum / durations.len() as u32
}
