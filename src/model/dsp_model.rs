//! Built-in voice model running entirely on the DSP helpers.

use crate::audio::dsp::{self, FormantTilt, PitchShifter};
use crate::model::voice_model::{ModelError, VoiceModel, VoiceShift};
use crate::pipeline::frame::AudioFrame;

/// Pitch shift, formant tilt and a wet/dry blend.
///
/// Stands in for a neural conversion model: same contract, same per-frame
/// state, but a predictable and small cost.
#[derive(Debug, Clone)]
pub struct DspVoiceModel {
    shifter: PitchShifter,
    tilt: FormantTilt,
}

impl DspVoiceModel {
    pub const NAME: &'static str = "dsp";

    pub fn new(sample_rate: u32) -> Self {
        Self {
            shifter: PitchShifter::new(sample_rate),
            tilt: FormantTilt::new(sample_rate),
        }
    }
}

impl VoiceModel for DspVoiceModel {
    fn transform(&mut self, frame: &AudioFrame, shift: VoiceShift) -> Result<Vec<i16>, ModelError> {
        let mut dry = dsp::i16_to_f32(frame.samples());
        let mut wet = dry.clone();
        self.tilt.process(&mut wet, shift.formant_shift);
        self.shifter.process(&mut wet, shift.pitch_shift);
        if wet.iter().any(|s| !s.is_finite()) {
            self.shifter.reset();
            self.tilt.reset();
            return Err(ModelError::Failed {
                message: "non-finite output".to_string(),
            });
        }
        dsp::blend(&mut dry, &wet, shift.intensity);
        Ok(dsp::f32_to_i16(&dry))
    }

    fn name(&self) -> &str {
        Self::NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn shift(pitch_shift: f32, intensity: f32) -> VoiceShift {
        VoiceShift {
            pitch_shift,
            formant_shift: 1.0,
            intensity,
        }
    }

    #[test]
    fn test_output_length_matches_input() {
        let mut model = DspVoiceModel::new(16000);
        let frame = AudioFrame::new(0, Instant::now(), vec![100; 320]);
        let out = model.transform(&frame, shift(5.0, 0.8)).unwrap();
        assert_eq!(out.len(), 320);
    }

    #[test]
    fn test_zero_intensity_is_dry() {
        let mut model = DspVoiceModel::new(16000);
        let samples: Vec<i16> = (0..320).map(|i| (i * 50) as i16).collect();
        let frame = AudioFrame::new(0, Instant::now(), samples.clone());
        let out = model.transform(&frame, shift(7.0, 0.0)).unwrap();
        assert_eq!(out, samples);
    }

    #[test]
    fn test_silence_stays_silent() {
        let mut model = DspVoiceModel::new(16000);
        let frame = AudioFrame::new(0, Instant::now(), vec![0; 320]);
        let out = model.transform(&frame, shift(5.0, 1.0)).unwrap();
        assert!(out.iter().all(|&s| s == 0));
    }
}
