use crate::defaults;
use crate::error::{Result, VoxError};
use crate::session::config::SessionConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub transform: TransformConfig,
    pub buffer: BufferConfig,
    pub governor: GovernorSettings,
    pub display: DisplayConfig,
}

/// Audio device configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub sample_rate: u32,
    pub frame_size: usize,
}

/// Voice conversion configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransformConfig {
    pub pitch_shift: f32,
    pub formant_shift: f32,
    pub intensity: f32,
    /// Per-frame model budget; one frame duration when unset.
    pub model_timeout_ms: Option<u64>,
    pub max_consecutive_failures: u32,
}

/// Frame buffer sizing, in frames
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BufferConfig {
    pub baseline_capacity: usize,
    pub min_capacity: usize,
    pub max_capacity: usize,
}

/// Latency governor tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GovernorSettings {
    pub high_watermark: f64,
    pub low_watermark: f64,
    pub window_frames: u32,
    pub hysteresis_windows: u32,
    pub measurement_window: usize,
    pub drift_threshold_frames: f64,
}

/// Console output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    pub refresh_ms: u64,
    pub show_metrics: bool,
    pub color: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            sample_rate: defaults::SAMPLE_RATE,
            frame_size: defaults::FRAME_SIZE,
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            pitch_shift: defaults::PITCH_SHIFT,
            formant_shift: defaults::FORMANT_SHIFT,
            intensity: defaults::INTENSITY,
            model_timeout_ms: None,
            max_consecutive_failures: defaults::MAX_CONSECUTIVE_FAILURES,
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            baseline_capacity: defaults::BASELINE_CAPACITY,
            min_capacity: defaults::MIN_CAPACITY,
            max_capacity: defaults::MAX_CAPACITY,
        }
    }
}

impl Default for GovernorSettings {
    fn default() -> Self {
        Self {
            high_watermark: defaults::HIGH_WATERMARK,
            low_watermark: defaults::LOW_WATERMARK,
            window_frames: defaults::WINDOW_FRAMES,
            hysteresis_windows: defaults::HYSTERESIS_WINDOWS,
            measurement_window: defaults::MEASUREMENT_WINDOW,
            drift_threshold_frames: defaults::DRIFT_THRESHOLD_FRAMES,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh_ms: defaults::REFRESH_MS,
            show_metrics: false,
            color: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file is missing or contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VoxError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                VoxError::ConfigRead {
                    path: path.display().to_string(),
                    source: e,
                }
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(VoxError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Write the configuration as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| VoxError::ConfigParse {
            message: e.to_string(),
        })
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXSHIFT_INPUT_DEVICE → audio.input_device
    /// - VOXSHIFT_OUTPUT_DEVICE → audio.output_device
    /// - VOXSHIFT_PITCH → transform.pitch_shift
    /// - VOXSHIFT_FORMANT → transform.formant_shift
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(device) = std::env::var("VOXSHIFT_INPUT_DEVICE")
            && !device.is_empty()
        {
            self.audio.input_device = Some(device);
        }

        if let Ok(device) = std::env::var("VOXSHIFT_OUTPUT_DEVICE")
            && !device.is_empty()
        {
            self.audio.output_device = Some(device);
        }

        if let Some(pitch) = env_f32("VOXSHIFT_PITCH") {
            self.transform.pitch_shift = pitch;
        }

        if let Some(formant) = env_f32("VOXSHIFT_FORMANT") {
            self.transform.formant_shift = formant;
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voxshift/config.toml on Linux
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("voxshift").join("config.toml"))
            .ok_or_else(|| VoxError::Other("Could not determine config directory".to_string()))
    }

    /// Resolve into the parameter set a session runs with. Validation happens
    /// when the session starts.
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            sample_rate: self.audio.sample_rate,
            frame_size: self.audio.frame_size,
            pitch_shift: self.transform.pitch_shift,
            formant_shift: self.transform.formant_shift,
            intensity: self.transform.intensity,
            baseline_capacity: self.buffer.baseline_capacity,
            min_capacity: self.buffer.min_capacity,
            max_capacity: self.buffer.max_capacity,
            high_watermark: self.governor.high_watermark,
            low_watermark: self.governor.low_watermark,
            window_frames: self.governor.window_frames,
            hysteresis_windows: self.governor.hysteresis_windows,
            measurement_window: self.governor.measurement_window,
            drift_threshold_frames: self.governor.drift_threshold_frames,
            model_timeout: self.transform.model_timeout_ms.map(Duration::from_millis),
            max_consecutive_failures: self.transform.max_consecutive_failures,
            input_device: self.audio.input_device.clone(),
            output_device: self.audio.output_device.clone(),
        }
    }
}

fn env_f32(key: &str) -> Option<f32> {
    let value = std::env::var(key).ok().filter(|v| !v.is_empty())?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(key, value = %value, "Ignoring non-numeric environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_voxshift_env() {
        remove_env("VOXSHIFT_INPUT_DEVICE");
        remove_env("VOXSHIFT_OUTPUT_DEVICE");
        remove_env("VOXSHIFT_PITCH");
        remove_env("VOXSHIFT_FORMANT");
    }

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.audio.input_device, None);
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.frame_size, 320);

        assert_eq!(config.transform.pitch_shift, 5.0);
        assert_eq!(config.transform.formant_shift, 1.2);
        assert_eq!(config.transform.intensity, 0.8);
        assert_eq!(config.transform.model_timeout_ms, None);

        assert_eq!(config.buffer.baseline_capacity, 4);
        assert_eq!(config.governor.hysteresis_windows, 3);
        assert_eq!(config.display.refresh_ms, 250);
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_file = write_temp(
            r#"
            [audio]
            input_device = "hw:0,0"
            output_device = "pulse"
            sample_rate = 48000
            frame_size = 960

            [transform]
            pitch_shift = -4.0
            formant_shift = 0.9
            intensity = 1.0
            model_timeout_ms = 15

            [buffer]
            baseline_capacity = 8
            max_capacity = 32

            [governor]
            high_watermark = 0.9
            window_frames = 5
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.audio.input_device, Some("hw:0,0".to_string()));
        assert_eq!(config.audio.output_device, Some("pulse".to_string()));
        assert_eq!(config.audio.sample_rate, 48000);
        assert_eq!(config.audio.frame_size, 960);
        assert_eq!(config.transform.pitch_shift, -4.0);
        assert_eq!(config.transform.model_timeout_ms, Some(15));
        assert_eq!(config.buffer.baseline_capacity, 8);
        assert_eq!(config.buffer.min_capacity, 2, "unset field keeps its default");
        assert_eq!(config.governor.high_watermark, 0.9);
        assert_eq!(config.governor.window_frames, 5);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let temp_file = write_temp(
            r#"
            [transform]
            pitch_shift = 7.0
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.transform.pitch_shift, 7.0);
        assert_eq!(config.transform.formant_shift, 1.2);
        assert_eq!(config.audio, AudioConfig::default());
        assert_eq!(config.governor, GovernorSettings::default());
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let temp_file = write_temp(
            r#"
            [audio
            sample_rate = "broken
        "#,
        );

        let err = Config::load(temp_file.path()).unwrap_err();
        assert!(err.is_configuration(), "got {err:?}");
        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        assert!(matches!(
            Config::load(&path),
            Err(VoxError::ConfigFileNotFound { .. })
        ));
        assert_eq!(Config::load_or_default(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_save_then_load_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.audio.output_device = Some("speakers".to_string());
        config.transform.model_timeout_ms = Some(12);
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_env_override_devices() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxshift_env();

        set_env("VOXSHIFT_INPUT_DEVICE", "hw:1,0");
        set_env("VOXSHIFT_OUTPUT_DEVICE", "pulse");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.audio.input_device, Some("hw:1,0".to_string()));
        assert_eq!(config.audio.output_device, Some("pulse".to_string()));

        clear_voxshift_env();
    }

    #[test]
    fn test_env_override_shifts() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxshift_env();

        set_env("VOXSHIFT_PITCH", "-3.5");
        set_env("VOXSHIFT_FORMANT", "0.85");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.transform.pitch_shift, -3.5);
        assert_eq!(config.transform.formant_shift, 0.85);

        clear_voxshift_env();
    }

    #[test]
    fn test_env_override_empty_or_garbage_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxshift_env();

        set_env("VOXSHIFT_INPUT_DEVICE", "");
        set_env("VOXSHIFT_PITCH", "loud");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.audio.input_device, None);
        assert_eq!(config.transform.pitch_shift, 5.0);

        clear_voxshift_env();
    }

    #[test]
    fn test_to_session_config_carries_every_section() {
        let mut config = Config::default();
        config.audio.frame_size = 160;
        config.transform.model_timeout_ms = Some(8);
        config.buffer.max_capacity = 32;
        config.governor.drift_threshold_frames = 2.0;
        config.audio.input_device = Some("mic".to_string());

        let session = config.to_session_config();
        assert_eq!(session.frame_size, 160);
        assert_eq!(session.model_timeout, Some(Duration::from_millis(8)));
        assert_eq!(session.max_capacity, 32);
        assert_eq!(session.drift_threshold_frames, 2.0);
        assert_eq!(session.input_device, Some("mic".to_string()));
        session.validate().unwrap();
    }
}
