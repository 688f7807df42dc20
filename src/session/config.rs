//! Resolved parameter set the core consumes when a session starts.

use crate::defaults;
use crate::error::{Result, VoxError};
use crate::pipeline::frame::frame_duration;
use crate::pipeline::governor::GovernorConfig;
use crate::pipeline::params::TransformParameters;
use std::time::Duration;

/// Everything a session needs, already merged from file, environment and
/// command line.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub sample_rate: u32,
    pub frame_size: usize,
    pub pitch_shift: f32,
    pub formant_shift: f32,
    pub intensity: f32,
    pub baseline_capacity: usize,
    pub min_capacity: usize,
    pub max_capacity: usize,
    pub high_watermark: f64,
    pub low_watermark: f64,
    pub window_frames: u32,
    pub hysteresis_windows: u32,
    pub measurement_window: usize,
    pub drift_threshold_frames: f64,
    /// Explicit model budget; derived from the frame duration when `None`.
    pub model_timeout: Option<Duration>,
    pub max_consecutive_failures: u32,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            frame_size: defaults::FRAME_SIZE,
            pitch_shift: defaults::PITCH_SHIFT,
            formant_shift: defaults::FORMANT_SHIFT,
            intensity: defaults::INTENSITY,
            baseline_capacity: defaults::BASELINE_CAPACITY,
            min_capacity: defaults::MIN_CAPACITY,
            max_capacity: defaults::MAX_CAPACITY,
            high_watermark: defaults::HIGH_WATERMARK,
            low_watermark: defaults::LOW_WATERMARK,
            window_frames: defaults::WINDOW_FRAMES,
            hysteresis_windows: defaults::HYSTERESIS_WINDOWS,
            measurement_window: defaults::MEASUREMENT_WINDOW,
            drift_threshold_frames: defaults::DRIFT_THRESHOLD_FRAMES,
            model_timeout: None,
            max_consecutive_failures: defaults::MAX_CONSECUTIVE_FAILURES,
            input_device: None,
            output_device: None,
        }
    }
}

fn invalid(key: &str, message: String) -> VoxError {
    VoxError::ConfigInvalidValue {
        key: key.to_string(),
        message,
    }
}

impl SessionConfig {
    /// Rejects out-of-range values before any stage is built.
    pub fn validate(&self) -> Result<()> {
        if !defaults::SAMPLE_RATE_RANGE.contains(&self.sample_rate) {
            return Err(invalid(
                "sample_rate",
                format!(
                    "{} Hz is outside {}..={} Hz",
                    self.sample_rate,
                    defaults::SAMPLE_RATE_RANGE.start(),
                    defaults::SAMPLE_RATE_RANGE.end()
                ),
            ));
        }
        if !defaults::FRAME_SIZE_RANGE.contains(&self.frame_size) {
            return Err(invalid(
                "frame_size",
                format!(
                    "{} samples is outside {}..={}",
                    self.frame_size,
                    defaults::FRAME_SIZE_RANGE.start(),
                    defaults::FRAME_SIZE_RANGE.end()
                ),
            ));
        }
        let frame = self.frame_duration();
        if frame > Duration::from_millis(defaults::MAX_FRAME_DURATION_MS) {
            return Err(invalid(
                "frame_size",
                format!(
                    "{} samples at {} Hz is {}ms, longer than {}ms",
                    self.frame_size,
                    self.sample_rate,
                    frame.as_millis(),
                    defaults::MAX_FRAME_DURATION_MS
                ),
            ));
        }
        validate_pitch(self.pitch_shift)?;
        validate_formant(self.formant_shift)?;
        validate_intensity(self.intensity)?;

        for (key, value) in [
            ("min_capacity", self.min_capacity),
            ("baseline_capacity", self.baseline_capacity),
            ("max_capacity", self.max_capacity),
        ] {
            if value < 2 || !value.is_power_of_two() || value > defaults::CAPACITY_LIMIT {
                return Err(invalid(
                    key,
                    format!(
                        "{value} must be a power of two between 2 and {}",
                        defaults::CAPACITY_LIMIT
                    ),
                ));
            }
        }
        if !(self.min_capacity <= self.baseline_capacity
            && self.baseline_capacity <= self.max_capacity)
        {
            return Err(invalid(
                "baseline_capacity",
                format!(
                    "capacities must satisfy min <= baseline <= max (got {} / {} / {})",
                    self.min_capacity, self.baseline_capacity, self.max_capacity
                ),
            ));
        }

        if !(self.low_watermark > 0.0
            && self.low_watermark < self.high_watermark
            && self.high_watermark <= 1.0)
        {
            return Err(invalid(
                "low_watermark",
                format!(
                    "watermarks must satisfy 0 < low < high <= 1 (got {} / {})",
                    self.low_watermark, self.high_watermark
                ),
            ));
        }
        for (key, value) in [
            ("window_frames", self.window_frames as usize),
            ("hysteresis_windows", self.hysteresis_windows as usize),
            ("measurement_window", self.measurement_window),
            ("max_consecutive_failures", self.max_consecutive_failures as usize),
        ] {
            if value == 0 {
                return Err(invalid(key, "must be at least 1".to_string()));
            }
        }
        if self.drift_threshold_frames.is_nan() || self.drift_threshold_frames <= 0.0 {
            return Err(invalid(
                "drift_threshold_frames",
                format!("{} must be positive", self.drift_threshold_frames),
            ));
        }
        if let Some(timeout) = self.model_timeout
            && timeout.is_zero()
        {
            return Err(invalid("model_timeout_ms", "must be positive".to_string()));
        }
        Ok(())
    }

    pub fn frame_duration(&self) -> Duration {
        frame_duration(self.frame_size, self.sample_rate)
    }

    /// Time the model may take for one frame before the frame is passed through.
    pub fn model_timeout(&self) -> Duration {
        self.model_timeout
            .unwrap_or_else(|| self.frame_duration().mul_f64(defaults::MODEL_TIMEOUT_FRACTION))
    }

    /// How long shutdown waits for in-flight frames.
    pub fn drain_timeout(&self) -> Duration {
        self.frame_duration() * defaults::DRAIN_FRAMES
    }

    /// Longest single wait of the transform loop on its input buffer.
    pub fn poll_interval(&self) -> Duration {
        (self.frame_duration() / 4).clamp(Duration::from_millis(1), Duration::from_millis(5))
    }

    pub fn initial_parameters(&self) -> TransformParameters {
        TransformParameters::new(self.pitch_shift, self.formant_shift, self.intensity)
    }

    pub fn governor_config(&self) -> GovernorConfig {
        GovernorConfig {
            frame_duration: self.frame_duration(),
            frame_size: self.frame_size,
            high_watermark: self.high_watermark,
            low_watermark: self.low_watermark,
            window_frames: self.window_frames,
            hysteresis_windows: self.hysteresis_windows,
            measurement_window: self.measurement_window,
            baseline_capacity: self.baseline_capacity,
            min_capacity: self.min_capacity,
            max_capacity: self.max_capacity,
            drift_threshold: self.drift_threshold_frames * self.frame_size as f64,
            xrun_warn_rate: defaults::XRUN_WARN_RATE,
        }
    }
}

pub fn validate_pitch(semitones: f32) -> Result<()> {
    if !defaults::PITCH_RANGE.contains(&semitones) {
        return Err(invalid(
            "pitch_shift",
            format!(
                "{semitones} semitones is outside {}..={}",
                defaults::PITCH_RANGE.start(),
                defaults::PITCH_RANGE.end()
            ),
        ));
    }
    Ok(())
}

pub fn validate_formant(factor: f32) -> Result<()> {
    if !defaults::FORMANT_RANGE.contains(&factor) {
        return Err(invalid(
            "formant_shift",
            format!(
                "{factor} is outside {}..={}",
                defaults::FORMANT_RANGE.start(),
                defaults::FORMANT_RANGE.end()
            ),
        ));
    }
    Ok(())
}

pub fn validate_intensity(intensity: f32) -> Result<()> {
    if !defaults::INTENSITY_RANGE.contains(&intensity) {
        return Err(invalid(
            "intensity",
            format!("{intensity} is outside 0..=1"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_of(result: Result<()>) -> String {
        match result {
            Err(VoxError::ConfigInvalidValue { key, .. }) => key,
            other => panic!("Expected ConfigInvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn test_default_is_valid() {
        SessionConfig::default().validate().unwrap();
    }

    #[test]
    fn test_derived_durations() {
        let config = SessionConfig::default();
        assert_eq!(config.frame_duration(), Duration::from_millis(20));
        assert_eq!(config.model_timeout(), Duration::from_millis(20));
        assert_eq!(config.drain_timeout(), Duration::from_millis(40));
        assert_eq!(config.poll_interval(), Duration::from_millis(5));

        let explicit = SessionConfig {
            model_timeout: Some(Duration::from_millis(12)),
            ..Default::default()
        };
        assert_eq!(explicit.model_timeout(), Duration::from_millis(12));
    }

    #[test]
    fn test_rejects_sample_rate() {
        let config = SessionConfig {
            sample_rate: 4000,
            ..Default::default()
        };
        assert_eq!(key_of(config.validate()), "sample_rate");
    }

    #[test]
    fn test_rejects_frame_size() {
        let tiny = SessionConfig {
            frame_size: 8,
            ..Default::default()
        };
        assert_eq!(key_of(tiny.validate()), "frame_size");

        // 1024 samples at 16kHz is 64ms.
        let long = SessionConfig {
            frame_size: 1024,
            ..Default::default()
        };
        assert_eq!(key_of(long.validate()), "frame_size");
    }

    #[test]
    fn test_rejects_shifts() {
        let pitch = SessionConfig {
            pitch_shift: 30.0,
            ..Default::default()
        };
        assert_eq!(key_of(pitch.validate()), "pitch_shift");

        let formant = SessionConfig {
            formant_shift: 0.1,
            ..Default::default()
        };
        assert_eq!(key_of(formant.validate()), "formant_shift");

        let intensity = SessionConfig {
            intensity: 1.5,
            ..Default::default()
        };
        assert_eq!(key_of(intensity.validate()), "intensity");

        let nan = SessionConfig {
            pitch_shift: f32::NAN,
            ..Default::default()
        };
        assert_eq!(key_of(nan.validate()), "pitch_shift");
    }

    #[test]
    fn test_rejects_capacities() {
        let not_power = SessionConfig {
            baseline_capacity: 6,
            ..Default::default()
        };
        assert_eq!(key_of(not_power.validate()), "baseline_capacity");

        let unordered = SessionConfig {
            min_capacity: 8,
            baseline_capacity: 4,
            ..Default::default()
        };
        assert_eq!(key_of(unordered.validate()), "baseline_capacity");

        let too_big = SessionConfig {
            max_capacity: 512,
            ..Default::default()
        };
        assert_eq!(key_of(too_big.validate()), "max_capacity");
    }

    #[test]
    fn test_rejects_watermarks() {
        let inverted = SessionConfig {
            low_watermark: 0.9,
            high_watermark: 0.8,
            ..Default::default()
        };
        assert_eq!(key_of(inverted.validate()), "low_watermark");

        let above_one = SessionConfig {
            high_watermark: 1.2,
            ..Default::default()
        };
        assert_eq!(key_of(above_one.validate()), "low_watermark");
    }

    #[test]
    fn test_rejects_zero_counts() {
        let config = SessionConfig {
            hysteresis_windows: 0,
            ..Default::default()
        };
        assert_eq!(key_of(config.validate()), "hysteresis_windows");
    }

    #[test]
    fn test_governor_config_threshold_in_samples() {
        let config = SessionConfig::default();
        let governor = config.governor_config();
        assert_eq!(governor.drift_threshold, 320.0);
        assert_eq!(governor.frame_duration, Duration::from_millis(20));
    }
}
