//! Default configuration constants for voxshift.
//!
//! Shared by the persisted configuration, the resolved session configuration
//! and the command-line surface so every entry point agrees on the same values.

use std::ops::RangeInclusive;

/// Default audio sample rate in Hz.
///
/// 16kHz keeps the voice band intact while leaving the model enough headroom
/// to finish a frame well inside its time budget.
pub const SAMPLE_RATE: u32 = 16000;

/// Default frame size in samples (20ms at 16kHz).
pub const FRAME_SIZE: usize = 320;

/// Default pitch shift in semitones (male → female).
pub const PITCH_SHIFT: f32 = 5.0;

/// Default formant shift factor.
pub const FORMANT_SHIFT: f32 = 1.2;

/// Default voice conversion intensity (wet/dry blend).
pub const INTENSITY: f32 = 0.8;

/// Accepted sample rates.
pub const SAMPLE_RATE_RANGE: RangeInclusive<u32> = 8000..=96000;

/// Accepted frame sizes in samples.
pub const FRAME_SIZE_RANGE: RangeInclusive<usize> = 32..=4096;

/// Longest frame allowed; anything longer cannot meet the 100ms end-to-end budget.
pub const MAX_FRAME_DURATION_MS: u64 = 50;

/// Accepted pitch shift in semitones.
pub const PITCH_RANGE: RangeInclusive<f32> = -24.0..=24.0;

/// Accepted formant shift factor.
pub const FORMANT_RANGE: RangeInclusive<f32> = 0.5..=2.0;

/// Accepted intensity.
pub const INTENSITY_RANGE: RangeInclusive<f32> = 0.0..=1.0;

/// Frame buffer capacity the session starts with (frame slots).
pub const BASELINE_CAPACITY: usize = 4;

/// Smallest capacity the governor may shrink to.
pub const MIN_CAPACITY: usize = 2;

/// Largest capacity the governor may grow to before falling back.
pub const MAX_CAPACITY: usize = 16;

/// Hard upper bound on any configured capacity.
pub const CAPACITY_LIMIT: usize = 256;

/// Fraction of the frame budget above which a window counts as overloaded.
pub const HIGH_WATERMARK: f64 = 0.85;

/// Fraction of the frame budget below which a window counts as relaxed.
pub const LOW_WATERMARK: f64 = 0.50;

/// Governor evaluates once every this many frames.
pub const WINDOW_FRAMES: u32 = 10;

/// Consecutive windows required before the governor acts.
pub const HYSTERESIS_WINDOWS: u32 = 3;

/// Number of frames kept in the latency measurement window.
pub const MEASUREMENT_WINDOW: usize = 50;

/// Drift (in frames) the playback side tolerates before asking for a correction.
pub const DRIFT_THRESHOLD_FRAMES: f64 = 1.0;

/// Model time budget as a fraction of the frame duration.
///
/// Sits above the high watermark so a slow-but-finishing model is handled by
/// the governor, while a hung one is cut off by the timeout.
pub const MODEL_TIMEOUT_FRACTION: f64 = 1.0;

/// Consecutive model failures that force the fallback path.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Underruns plus overruns per frame above which a window counts as
/// dropping out, and the user is warned.
pub const XRUN_WARN_RATE: f64 = 0.1;

/// Shutdown drain budget, in frame durations.
pub const DRAIN_FRAMES: u32 = 2;

/// Interval between metrics refreshes in the interactive console.
pub const REFRESH_MS: u64 = 250;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_frame_fits_latency_budget() {
        let frame = Duration::from_secs_f64(FRAME_SIZE as f64 / SAMPLE_RATE as f64);
        assert!(frame <= Duration::from_millis(MAX_FRAME_DURATION_MS));
    }

    #[test]
    fn test_default_capacities_are_ordered_powers_of_two() {
        for capacity in [MIN_CAPACITY, BASELINE_CAPACITY, MAX_CAPACITY] {
            assert!(capacity.is_power_of_two(), "{capacity} is not a power of two");
        }
        assert!(MIN_CAPACITY <= BASELINE_CAPACITY);
        assert!(BASELINE_CAPACITY <= MAX_CAPACITY);
        assert!(MAX_CAPACITY <= CAPACITY_LIMIT);
    }

    #[test]
    fn test_watermarks_leave_a_hysteresis_band() {
        assert!(LOW_WATERMARK < HIGH_WATERMARK);
        assert!(HIGH_WATERMARK <= 1.0);
    }

    #[test]
    fn test_model_timeout_above_high_watermark() {
        assert!(MODEL_TIMEOUT_FRACTION > HIGH_WATERMARK);
    }

    #[test]
    fn test_default_shifts_are_in_range() {
        assert!(PITCH_RANGE.contains(&PITCH_SHIFT));
        assert!(FORMANT_RANGE.contains(&FORMANT_SHIFT));
        assert!(INTENSITY_RANGE.contains(&INTENSITY));
    }
}
