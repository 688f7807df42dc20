//! Voice conversion model collaborators.

pub mod dsp_model;
pub mod voice_model;

pub use dsp_model::DspVoiceModel;
pub use voice_model::{MockCost, MockVoiceModel, ModelError, VoiceModel, VoiceShift};
