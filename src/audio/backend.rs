//! Audio device abstraction.
//!
//! A backend takes ownership of the capture and playback stages and calls them
//! from its own device callbacks. The returned guards keep the streams alive;
//! closing a guard stops its callbacks and drops the stage.

use crate::error::{Result, VoxError};
use crate::pipeline::capture::CaptureStage;
use crate::pipeline::playback::PlaybackStage;
use crate::session::config::SessionConfig;
use std::sync::{Arc, Mutex, MutexGuard};

/// Keeps one device stream open until closed or dropped.
pub trait StreamGuard: Send {
    /// Stops the stream. After this returns no further callbacks run.
    fn close(&mut self);

    /// Name of the device behind the stream.
    fn device(&self) -> &str;
}

/// Trait for audio backends, allowing real devices to be swapped for a
/// simulation in tests.
pub trait AudioBackend: Send {
    fn open_capture(
        &mut self,
        stage: CaptureStage,
        config: &SessionConfig,
    ) -> Result<Box<dyn StreamGuard>>;

    fn open_playback(
        &mut self,
        stage: PlaybackStage,
        config: &SessionConfig,
    ) -> Result<Box<dyn StreamGuard>>;

    fn name(&self) -> &str;
}

#[derive(Default)]
struct SimulatedDevices {
    capture: Option<CaptureStage>,
    playback: Option<PlaybackStage>,
    fail_capture_open: Option<String>,
    fail_playback_open: Option<String>,
}

type SharedDevices = Arc<Mutex<SimulatedDevices>>;

fn lock(devices: &SharedDevices) -> MutexGuard<'_, SimulatedDevices> {
    match devices.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Backend without hardware. Device callbacks are issued by hand through a
/// [`SimulatedDriver`].
#[derive(Clone, Default)]
pub struct SimulatedBackend {
    devices: SharedDevices,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes opening the capture device fail with `message`.
    pub fn with_capture_failure(self, message: &str) -> Self {
        lock(&self.devices).fail_capture_open = Some(message.to_string());
        self
    }

    /// Makes opening the playback device fail with `message`.
    pub fn with_playback_failure(self, message: &str) -> Self {
        lock(&self.devices).fail_playback_open = Some(message.to_string());
        self
    }

    /// Driver sharing this backend's devices.
    pub fn driver(&self) -> SimulatedDriver {
        SimulatedDriver {
            devices: self.devices.clone(),
        }
    }
}

impl AudioBackend for SimulatedBackend {
    fn open_capture(
        &mut self,
        stage: CaptureStage,
        _config: &SessionConfig,
    ) -> Result<Box<dyn StreamGuard>> {
        let mut devices = lock(&self.devices);
        if let Some(message) = &devices.fail_capture_open {
            return Err(VoxError::AudioDevice {
                message: message.clone(),
            });
        }
        devices.capture = Some(stage);
        Ok(Box::new(SimulatedStream {
            devices: self.devices.clone(),
            side: Side::Capture,
        }))
    }

    fn open_playback(
        &mut self,
        stage: PlaybackStage,
        _config: &SessionConfig,
    ) -> Result<Box<dyn StreamGuard>> {
        let mut devices = lock(&self.devices);
        if let Some(message) = &devices.fail_playback_open {
            return Err(VoxError::AudioDevice {
                message: message.clone(),
            });
        }
        devices.playback = Some(stage);
        Ok(Box::new(SimulatedStream {
            devices: self.devices.clone(),
            side: Side::Playback,
        }))
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

#[derive(Clone, Copy)]
enum Side {
    Capture,
    Playback,
}

struct SimulatedStream {
    devices: SharedDevices,
    side: Side,
}

impl StreamGuard for SimulatedStream {
    fn close(&mut self) {
        let mut devices = lock(&self.devices);
        match self.side {
            Side::Capture => devices.capture = None,
            Side::Playback => devices.playback = None,
        }
    }

    fn device(&self) -> &str {
        match self.side {
            Side::Capture => "simulated-input",
            Side::Playback => "simulated-output",
        }
    }
}

impl Drop for SimulatedStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Plays the part of the audio hardware for a [`SimulatedBackend`].
///
/// Each call is one device callback. Calls on a closed stream do nothing.
#[derive(Clone)]
pub struct SimulatedDriver {
    devices: SharedDevices,
}

impl SimulatedDriver {
    /// Delivers one captured chunk. Returns false if the stream is closed.
    pub fn capture(&self, samples: &[i16]) -> bool {
        match lock(&self.devices).capture.as_mut() {
            Some(stage) => {
                stage.on_chunk(samples);
                true
            }
            None => false,
        }
    }

    /// Requests `len` samples for the speaker. `None` if the stream is closed.
    pub fn playback(&self, len: usize) -> Option<Vec<i16>> {
        let mut devices = lock(&self.devices);
        let stage = devices.playback.as_mut()?;
        let mut out = vec![0i16; len];
        stage.fill(&mut out);
        Some(out)
    }

    /// Raises a device error on the capture stream.
    pub fn capture_error(&self, message: &str) -> bool {
        match lock(&self.devices).capture.as_mut() {
            Some(stage) => {
                stage.on_device_error(message);
                true
            }
            None => false,
        }
    }

    /// Raises a device error on the playback stream.
    pub fn playback_error(&self, message: &str) -> bool {
        match lock(&self.devices).playback.as_mut() {
            Some(stage) => {
                stage.on_device_error(message);
                true
            }
            None => false,
        }
    }

    pub fn is_capture_open(&self) -> bool {
        lock(&self.devices).capture.is_some()
    }

    pub fn is_playback_open(&self) -> bool {
        lock(&self.devices).playback.is_some()
    }
}
