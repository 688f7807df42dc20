//! voxshift - Real-time microphone voice conversion
//!
//! Captures microphone audio in fixed frames, converts each frame through a
//! voice model and plays the result back with bounded end-to-end latency.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
#[cfg(feature = "cli")]
pub mod display;
pub mod error;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod session;

// Composition root: real devices plus the console
#[cfg(all(feature = "cpal-audio", feature = "cli"))]
pub mod app;

// Collaborator seams
pub use audio::backend::{AudioBackend, SimulatedBackend, StreamGuard};
pub use model::{DspVoiceModel, MockVoiceModel, VoiceModel};
pub use pipeline::clock::{Clock, MockClock, SystemClock};

// Pipeline
pub use pipeline::frame::AudioFrame;
pub use pipeline::frame_buffer::{FrameBufferHandle, frame_buffer};
pub use pipeline::metrics::MetricsSnapshot;
pub use pipeline::orchestrator::Pipeline;

// Session
pub use session::{Command, Reply, SessionConfig, SessionController, SessionState};

// Error handling
pub use error::{Result, VoxError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn test_version_string_contains_plus_when_git_hash_present() {
        let ver = version_string();
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            assert!(
                ver.contains('+'),
                "With GIT_HASH set, version should contain '+', got: {}",
                ver
            );
            let hash_part = ver.split('+').nth(1).unwrap_or("");
            assert_eq!(hash_part.len(), 7, "Git hash should be 7 chars, got: {}", hash_part);
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}
