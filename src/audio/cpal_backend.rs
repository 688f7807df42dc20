//! Real capture and playback streams using CPAL (Cross-Platform Audio Library).

use crate::audio::backend::{AudioBackend, StreamGuard};
use crate::audio::dsp;
use crate::error::{Result, VoxError};
use crate::pipeline::capture::CaptureStage;
use crate::pipeline::playback::PlaybackStage;
use crate::session::config::SessionConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Suppress noisy JACK/ALSA messages that occur during audio backend probing.
///
/// # Safety
/// Modifies environment variables; call at startup before any threads exist.
pub fn suppress_audio_warnings() {
    // SAFETY: called from main before the runtime or any stage thread starts
    unsafe {
        std::env::set_var("JACK_NO_START_SERVER", "1");
        std::env::set_var("JACK_NO_AUDIO_RESERVATION", "1");
        std::env::set_var("PIPEWIRE_DEBUG", "0");
        std::env::set_var("ALSA_DEBUG", "0");
        std::env::set_var("PW_LOG", "0");
    }
}

/// Preferred device names for GNOME/PipeWire environments.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Single-channel ALSA aliases that are never useful for a mono voice stream.
const CHANNEL_PATTERNS: &[&str] = &["surround", "front:", "rear:", "center:", "side:"];

/// Inputs that are really outputs.
const OUTPUT_ONLY_PATTERNS: &[&str] = &["Digital Output", "HDMI", "S/PDIF"];

fn matches_any(name: &str, patterns: &[&str]) -> bool {
    let lower = name.to_lowercase();
    patterns
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    matches_any(name, PREFERRED_DEVICES)
}

fn should_filter_input(name: &str) -> bool {
    matches_any(name, CHANNEL_PATTERNS) || matches_any(name, OUTPUT_ONLY_PATTERNS)
}

fn should_filter_output(name: &str) -> bool {
    matches_any(name, CHANNEL_PATTERNS)
}

fn label(name: String) -> String {
    if is_preferred_device(&name) {
        format!("{name} [recommended]")
    } else {
        name
    }
}

fn device_error(context: &str, err: impl std::fmt::Display) -> VoxError {
    VoxError::AudioDevice {
        message: format!("{context}: {err}"),
    }
}

/// Lists usable input devices, preferred ones marked "\[recommended\]".
pub fn list_input_devices() -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| cpal::default_host().input_devices())
        .map_err(|e| device_error("Failed to enumerate input devices", e))?;
    Ok(devices
        .filter_map(|device| device.name().ok())
        .filter(|name| !should_filter_input(name))
        .map(label)
        .collect())
}

/// Lists usable output devices, preferred ones marked "\[recommended\]".
pub fn list_output_devices() -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| cpal::default_host().output_devices())
        .map_err(|e| device_error("Failed to enumerate output devices", e))?;
    Ok(devices
        .filter_map(|device| device.name().ok())
        .filter(|name| !should_filter_output(name))
        .map(label)
        .collect())
}

#[derive(Clone, Copy)]
enum Direction {
    Input,
    Output,
}

/// Finds a device by exact name, or the best default (PipeWire, then
/// PulseAudio, then the system default).
fn find_device(direction: Direction, name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = match direction {
            Direction::Input => host.input_devices(),
            Direction::Output => host.output_devices(),
        }
        .map_err(|e| device_error("Failed to enumerate devices", e))?;

        let mut preferred = None;
        for device in devices {
            let Ok(device_name) = device.name() else {
                continue;
            };
            match name {
                Some(wanted) if device_name == wanted => return Ok(device),
                None if preferred.is_none() && is_preferred_device(&device_name) => {
                    preferred = Some(device);
                }
                _ => {}
            }
        }
        if let Some(wanted) = name {
            return Err(VoxError::AudioDeviceNotFound {
                device: wanted.to_string(),
            });
        }
        if let Some(device) = preferred {
            return Ok(device);
        }

        match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        }
        .ok_or_else(|| VoxError::AudioDeviceNotFound {
            device: "default".to_string(),
        })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched by the guard that owns it, which the
/// session controller holds and drops from one thread.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

fn lock<T>(stage: &Mutex<T>) -> MutexGuard<'_, T> {
    match stage.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// An open CPAL stream feeding or fed by one pipeline stage.
struct CpalStream {
    stream: Option<SendableStream>,
    device: String,
}

impl StreamGuard for CpalStream {
    fn close(&mut self) {
        if let Some(SendableStream(stream)) = self.stream.take() {
            if let Err(e) = stream.pause() {
                debug!(device = %self.device, error = %e, "Failed to pause stream before close");
            }
            drop(stream);
            info!(device = %self.device, "Audio stream closed");
        }
    }

    fn device(&self) -> &str {
        &self.device
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Mono 16-bit streams at the session sample rate on real hardware.
///
/// Each stream tries i16 first and falls back to f32 with conversion for
/// devices that only expose float formats.
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalBackend {
    pub fn new(input_device: Option<String>, output_device: Option<String>) -> Self {
        Self {
            input_device,
            output_device,
        }
    }

    fn stream_config(sample_rate: u32) -> cpal::StreamConfig {
        cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        }
    }

    fn build_input(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        stage: Arc<Mutex<CaptureStage>>,
    ) -> Result<cpal::Stream> {
        let on_error = |stage: Arc<Mutex<CaptureStage>>| {
            move |err: cpal::StreamError| lock(&stage).on_device_error(&err.to_string())
        };

        let data_stage = Arc::clone(&stage);
        let i16_attempt = device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| lock(&data_stage).on_chunk(data),
            on_error(Arc::clone(&stage)),
            None,
        );
        match i16_attempt {
            Ok(stream) => return Ok(stream),
            Err(e) => debug!(error = %e, "i16 capture unsupported, trying f32"),
        }

        let data_stage = Arc::clone(&stage);
        let mut scratch = Vec::new();
        device
            .build_input_stream(
                config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    scratch.clear();
                    scratch.extend(data.iter().copied().map(dsp::sample_to_i16));
                    lock(&data_stage).on_chunk(&scratch);
                },
                on_error(stage),
                None,
            )
            .map_err(|e| device_error("Failed to build capture stream", e))
    }

    fn build_output(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        stage: Arc<Mutex<PlaybackStage>>,
    ) -> Result<cpal::Stream> {
        let on_error = |stage: Arc<Mutex<PlaybackStage>>| {
            move |err: cpal::StreamError| lock(&stage).on_device_error(&err.to_string())
        };

        let data_stage = Arc::clone(&stage);
        let i16_attempt = device.build_output_stream(
            config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| lock(&data_stage).fill(data),
            on_error(Arc::clone(&stage)),
            None,
        );
        match i16_attempt {
            Ok(stream) => return Ok(stream),
            Err(e) => debug!(error = %e, "i16 playback unsupported, trying f32"),
        }

        let data_stage = Arc::clone(&stage);
        let mut scratch = Vec::new();
        device
            .build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0i16);
                    lock(&data_stage).fill(&mut scratch);
                    for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                        *out = dsp::sample_to_f32(sample);
                    }
                },
                on_error(stage),
                None,
            )
            .map_err(|e| device_error("Failed to build playback stream", e))
    }
}

impl AudioBackend for CpalBackend {
    fn open_capture(
        &mut self,
        stage: CaptureStage,
        config: &SessionConfig,
    ) -> Result<Box<dyn StreamGuard>> {
        let device = find_device(Direction::Input, self.input_device.as_deref())?;
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());
        let stream = Self::build_input(
            &device,
            &Self::stream_config(config.sample_rate),
            Arc::new(Mutex::new(stage)),
        )?;
        stream
            .play()
            .map_err(|e| device_error("Failed to start capture stream", e))?;
        info!(device = %name, sample_rate = config.sample_rate, "Capture stream opened");
        Ok(Box::new(CpalStream {
            stream: Some(SendableStream(stream)),
            device: name,
        }))
    }

    fn open_playback(
        &mut self,
        stage: PlaybackStage,
        config: &SessionConfig,
    ) -> Result<Box<dyn StreamGuard>> {
        let device = find_device(Direction::Output, self.output_device.as_deref())?;
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());
        if let Ok(default) = device.default_output_config()
            && default.sample_rate().0 != config.sample_rate
        {
            warn!(
                device = %name,
                native = default.sample_rate().0,
                requested = config.sample_rate,
                "Output device runs at a different rate; relying on the sound server to convert"
            );
        }
        let stream = Self::build_output(
            &device,
            &Self::stream_config(config.sample_rate),
            Arc::new(Mutex::new(stage)),
        )?;
        stream
            .play()
            .map_err(|e| device_error("Failed to start playback stream", e))?;
        info!(device = %name, sample_rate = config.sample_rate, "Playback stream opened");
        Ok(Box::new(CpalStream {
            stream: Some(SendableStream(stream)),
            device: name,
        }))
    }

    fn name(&self) -> &str {
        "cpal"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_filter_drops_channel_aliases_and_outputs() {
        assert!(should_filter_input("surround51:CARD=PCH"));
        assert!(should_filter_input("front:CARD=PCH,DEV=0"));
        assert!(should_filter_input("HDMI 1"));
        assert!(!should_filter_input("pipewire"));
        assert!(!should_filter_input("USB Microphone"));
    }

    #[test]
    fn test_output_filter_keeps_hdmi() {
        assert!(should_filter_output("rear:CARD=PCH"));
        assert!(!should_filter_output("HDMI 1"));
        assert!(!should_filter_output("default"));
    }

    #[test]
    fn test_preferred_devices_are_labelled() {
        assert_eq!(label("pipewire".to_string()), "pipewire [recommended]");
        assert_eq!(
            label("PulseAudio Sound Server".to_string()),
            "PulseAudio Sound Server [recommended]"
        );
        assert_eq!(label("hw:1,0".to_string()), "hw:1,0");
    }

    #[test]
    fn test_stream_config_is_mono_at_session_rate() {
        let config = CpalBackend::stream_config(16000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.sample_rate, cpal::SampleRate(16000));
    }
}
