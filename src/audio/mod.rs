//! Audio devices and signal processing.

pub mod backend;
#[cfg(feature = "cpal-audio")]
pub mod cpal_backend;
pub mod dsp;

pub use backend::{AudioBackend, SimulatedBackend, SimulatedDriver, StreamGuard};
#[cfg(feature = "cpal-audio")]
pub use cpal_backend::{CpalBackend, list_input_devices, list_output_devices};
