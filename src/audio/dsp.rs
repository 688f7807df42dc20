//! Small real-time DSP building blocks: sample conversion, a delay-line
//! pitch shifter, a spectral-tilt formant stage and fades.
//!
//! Everything here works on one frame at a time and keeps its state across
//! calls so consecutive frames join without discontinuities.

use std::f32::consts::PI;

pub fn sample_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

pub fn sample_to_i16(sample: f32) -> i16 {
    (sample * 32768.0).clamp(-32768.0, 32767.0) as i16
}

/// Converts 16-bit PCM to floats in [-1, 1).
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().copied().map(sample_to_f32).collect()
}

/// Converts floats back to 16-bit PCM, clamping out-of-range values.
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples.iter().copied().map(sample_to_i16).collect()
}

/// Frequency ratio for a shift in semitones.
pub fn semitones_to_ratio(semitones: f32) -> f32 {
    2.0_f32.powf(semitones / 12.0)
}

/// Mixes `wet` into `dry` in place. `intensity` 0 keeps dry, 1 is fully wet.
pub fn blend(dry: &mut [f32], wet: &[f32], intensity: f32) {
    let amount = intensity.clamp(0.0, 1.0);
    for (d, &w) in dry.iter_mut().zip(wet) {
        *d += (w - *d) * amount;
    }
}

/// A frame of `len` samples ramping linearly from `from` down to silence.
///
/// Used on underrun: continuing from the last delivered sample avoids a click,
/// and unlike repeating the previous frame it cannot loop audibly.
pub fn fade_to_silence(from: i16, len: usize) -> Vec<i16> {
    if len == 0 {
        return Vec::new();
    }
    (0..len)
        .map(|i| {
            let remaining = (len - 1 - i) as f32 / len as f32;
            (from as f32 * remaining).round() as i16
        })
        .collect()
}

/// Dual-grain delay-line pitch shifter.
///
/// Two read taps sweep through a short delay line half a grain apart. Each
/// tap is weighted by a squared-sine window so the pair always sums to unity
/// gain and the tap that is about to wrap is silent.
#[derive(Debug, Clone)]
pub struct PitchShifter {
    line: Vec<f32>,
    write: usize,
    grain: f32,
    phase: f32,
}

impl PitchShifter {
    /// Grain length in milliseconds.
    const GRAIN_MS: f32 = 30.0;

    pub fn new(sample_rate: u32) -> Self {
        let grain = (sample_rate as f32 * Self::GRAIN_MS / 1000.0).max(16.0);
        let len = (grain as usize + 2).next_power_of_two();
        Self {
            line: vec![0.0; len],
            write: 0,
            grain,
            phase: 0.0,
        }
    }

    /// Shifts `samples` in place by `semitones`.
    pub fn process(&mut self, samples: &mut [f32], semitones: f32) {
        let ratio = semitones_to_ratio(semitones);
        if (ratio - 1.0).abs() < 1e-4 {
            // Keep the delay line warm so a later shift starts from real audio.
            for &s in samples.iter() {
                self.write_sample(s);
            }
            return;
        }

        let step = (1.0 - ratio) / self.grain;
        for sample in samples.iter_mut() {
            self.write_sample(*sample);

            let a = self.phase;
            let b = (a + 0.5).fract();
            let gain_a = (PI * a).sin().powi(2);
            let gain_b = (PI * b).sin().powi(2);
            *sample = self.tap(a * self.grain) * gain_a + self.tap(b * self.grain) * gain_b;

            self.phase = (self.phase + step).rem_euclid(1.0);
        }
    }

    fn write_sample(&mut self, sample: f32) {
        let mask = self.line.len() - 1;
        self.line[self.write & mask] = sample;
        self.write = self.write.wrapping_add(1);
    }

    /// Reads `delay` samples behind the most recent write, interpolating linearly.
    fn tap(&self, delay: f32) -> f32 {
        let mask = self.line.len() - 1;
        let whole = delay.floor();
        let frac = delay - whole;
        let newest = self.write.wrapping_sub(1);
        let i0 = newest.wrapping_sub(whole as usize) & mask;
        let i1 = newest.wrapping_sub(whole as usize + 1) & mask;
        self.line[i0] * (1.0 - frac) + self.line[i1] * frac
    }

    pub fn reset(&mut self) {
        self.line.fill(0.0);
        self.write = 0;
        self.phase = 0.0;
    }
}

/// First-order spectral tilt that approximates a formant shift.
///
/// Factors above 1 lift the upper spectrum (shorter vocal tract), factors
/// below 1 darken it.
#[derive(Debug, Clone)]
pub struct FormantTilt {
    coefficient: f32,
    low: f32,
}

impl FormantTilt {
    /// Low-pass corner separating "body" from "brightness".
    const CORNER_HZ: f32 = 1200.0;

    pub fn new(sample_rate: u32) -> Self {
        let rate = sample_rate.max(1) as f32;
        let coefficient = 1.0 - (-2.0 * PI * Self::CORNER_HZ / rate).exp();
        Self {
            coefficient,
            low: 0.0,
        }
    }

    pub fn process(&mut self, samples: &mut [f32], factor: f32) {
        let emphasis = (factor - 1.0).clamp(-0.9, 1.0);
        for sample in samples.iter_mut() {
            self.low += self.coefficient * (*sample - self.low);
            let high = *sample - self.low;
            *sample += emphasis * high;
        }
    }

    pub fn reset(&mut self) {
        self.low = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / rate as f32).sin() * 0.5)
            .collect()
    }

    /// Counts upward zero crossings as a crude pitch estimate.
    fn crossings(samples: &[f32]) -> usize {
        samples
            .windows(2)
            .filter(|w| w[0] <= 0.0 && w[1] > 0.0)
            .count()
    }

    #[test]
    fn test_sample_conversion_clamps() {
        assert_eq!(i16_to_f32(&[0, -32768]), vec![0.0, -1.0]);
        assert_eq!(f32_to_i16(&[0.0, 2.0, -2.0]), vec![0, 32767, -32768]);
        assert_eq!(f32_to_i16(&i16_to_f32(&[1234, -4321])), vec![1234, -4321]);
    }

    #[test]
    fn test_semitones_to_ratio() {
        assert!((semitones_to_ratio(12.0) - 2.0).abs() < 1e-6);
        assert!((semitones_to_ratio(-12.0) - 0.5).abs() < 1e-6);
        assert_eq!(semitones_to_ratio(0.0), 1.0);
    }

    #[test]
    fn test_fade_to_silence_ramps_down() {
        let fade = fade_to_silence(1000, 4);
        assert_eq!(fade, vec![750, 500, 250, 0]);
        assert!(fade_to_silence(1000, 0).is_empty());
        assert!(fade_to_silence(0, 8).iter().all(|&s| s == 0));
    }

    #[test]
    fn test_blend_extremes() {
        let wet = vec![1.0, 1.0];
        let mut dry = vec![0.0, 0.0];
        blend(&mut dry, &wet, 0.0);
        assert_eq!(dry, vec![0.0, 0.0]);
        blend(&mut dry, &wet, 1.0);
        assert_eq!(dry, vec![1.0, 1.0]);
        let mut half = vec![0.0];
        blend(&mut half, &[1.0], 0.5);
        assert_eq!(half, vec![0.5]);
    }

    #[test]
    fn test_pitch_shifter_zero_shift_is_identity() {
        let mut shifter = PitchShifter::new(16000);
        let input = sine(220.0, 16000, 320);
        let mut output = input.clone();
        shifter.process(&mut output, 0.0);
        assert_eq!(output, input);
    }

    #[test]
    fn test_pitch_shifter_octave_up_doubles_crossings() {
        let rate = 16000;
        let mut shifter = PitchShifter::new(rate);
        let input = sine(200.0, rate, rate as usize);
        let mut output = input.clone();
        for chunk in output.chunks_mut(320) {
            shifter.process(chunk, 12.0);
        }
        // Skip the first grain while the delay line fills.
        let settled = &output[1600..];
        let reference = crossings(&input[1600..]) as f32;
        let shifted = crossings(settled) as f32;
        assert!(
            (shifted / reference - 2.0).abs() < 0.25,
            "expected about twice the crossings, got {shifted} vs {reference}"
        );
    }

    #[test]
    fn test_pitch_shifter_output_is_bounded() {
        let mut shifter = PitchShifter::new(16000);
        let mut samples = sine(300.0, 16000, 3200);
        shifter.process(&mut samples, 5.0);
        assert!(samples.iter().all(|s| s.abs() <= 0.5 + 1e-3));
    }

    #[test]
    fn test_formant_tilt_neutral_factor_is_identity() {
        let mut tilt = FormantTilt::new(16000);
        let input = sine(3000.0, 16000, 320);
        let mut output = input.clone();
        tilt.process(&mut output, 1.0);
        assert_eq!(output, input);
    }

    #[test]
    fn test_formant_tilt_brightens_high_frequencies() {
        let energy = |s: &[f32]| s.iter().map(|x| x * x).sum::<f32>();
        let input = sine(4000.0, 16000, 1600);

        let mut bright = input.clone();
        FormantTilt::new(16000).process(&mut bright, 1.5);
        let mut dark = input.clone();
        FormantTilt::new(16000).process(&mut dark, 0.6);

        assert!(energy(&bright) > energy(&input));
        assert!(energy(&dark) < energy(&input));
    }
}
