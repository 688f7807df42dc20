//! Error types for voxshift.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Cannot read configuration at {path}: {source}")]
    ConfigRead {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio device errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio device failed: {message}")]
    AudioDevice { message: String },

    // Session control errors
    #[error("Cannot {command} while session is {from}")]
    InvalidStateTransition { from: String, command: String },

    #[error("Invalid value for {name}: {message}")]
    InvalidParameter { name: String, message: String },

    // Voice model errors
    #[error("Voice model failed: {message}")]
    ModelTransform { message: String },

    #[error("Voice model exceeded its {timeout_ms}ms budget")]
    ModelTimeout { timeout_ms: u64 },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl VoxError {
    /// Device failures end the session; everything else is recoverable or
    /// rejected before any stage runs.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VoxError::AudioDevice { .. } | VoxError::AudioDeviceNotFound { .. }
        )
    }

    /// Returns true for errors raised while validating or loading configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            VoxError::ConfigFileNotFound { .. }
                | VoxError::ConfigRead { .. }
                | VoxError::ConfigParse { .. }
                | VoxError::ConfigInvalidValue { .. }
                | VoxError::Config(_)
        )
    }

    /// Process exit code used when the error ends a non-interactive run.
    pub fn exit_code(&self) -> i32 {
        if self.is_configuration() {
            2
        } else if self.is_fatal() {
            3
        } else {
            1
        }
    }
}

pub type Result<T> = std::result::Result<T, VoxError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_invalid_value_display() {
        let error = VoxError::ConfigInvalidValue {
            key: "sample_rate".to_string(),
            message: "must be between 8000 and 96000".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for sample_rate: must be between 8000 and 96000"
        );
    }

    #[test]
    fn test_invalid_state_transition_display() {
        let error = VoxError::InvalidStateTransition {
            from: "Idle".to_string(),
            command: "resume".to_string(),
        };
        assert_eq!(error.to_string(), "Cannot resume while session is Idle");
    }

    #[test]
    fn test_audio_device_display() {
        let error = VoxError::AudioDevice {
            message: "input stream disconnected".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Audio device failed: input stream disconnected"
        );
    }

    #[test]
    fn test_model_timeout_display() {
        let error = VoxError::ModelTimeout { timeout_ms: 16 };
        assert_eq!(error.to_string(), "Voice model exceeded its 16ms budget");
    }

    #[test]
    fn test_device_errors_are_fatal() {
        assert!(
            VoxError::AudioDevice {
                message: "gone".to_string()
            }
            .is_fatal()
        );
        assert!(
            VoxError::AudioDeviceNotFound {
                device: "hw:9".to_string()
            }
            .is_fatal()
        );
        assert!(
            !VoxError::ModelTransform {
                message: "nan".to_string()
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_exit_codes_distinguish_config_and_device() {
        let config = VoxError::ConfigInvalidValue {
            key: "frame_size".to_string(),
            message: "too small".to_string(),
        };
        let device = VoxError::AudioDevice {
            message: "unplugged".to_string(),
        };
        let other = VoxError::Other("boom".to_string());
        assert_eq!(config.exit_code(), 2);
        assert_eq!(device.exit_code(), 3);
        assert_eq!(other.exit_code(), 1);
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: VoxError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error_is_configuration() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: VoxError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
        assert!(error.is_configuration());

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<VoxError>();
        assert_sync::<VoxError>();
    }
}
