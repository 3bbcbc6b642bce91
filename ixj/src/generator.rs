//! DTMF and dual-tone test signals at the 8 kHz line rate, for feeding the
//! record path.

use std::f32::consts::TAU;

use crate::detector::dtmf::{HIGH_GROUP_HZ, KEYPAD, LOW_GROUP_HZ, SAMPLE_RATE_HZ};

pub struct DualToneGenerator {
    phase: [f32; 2],
    step: [f32; 2],
    amplitude: f32,
}

impl DualToneGenerator {
    pub fn new(low_hz: f32, high_hz: f32) -> Self {
        Self {
            phase: [0.0; 2],
            step: [TAU * low_hz / SAMPLE_RATE_HZ, TAU * high_hz / SAMPLE_RATE_HZ],
            amplitude: 0.1,
        }
    }

    /// The row and column tones of a keypad digit.
    pub fn for_digit(digit: char) -> Option<Self> {
        KEYPAD.iter().enumerate().find_map(|(row, keys)| {
            let column = keys.iter().position(|&k| k == digit)?;
            Some(Self::new(LOW_GROUP_HZ[row], HIGH_GROUP_HZ[column]))
        })
    }

    /// Peak amplitude of the sum, full scale 1.0.
    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    pub fn next_sample(&mut self) -> f32 {
        let output = (self.phase[0].sin() + self.phase[1].sin()) * 0.5 * self.amplitude;
        for (phase, step) in self.phase.iter_mut().zip(self.step) {
            *phase = (*phase + step) % TAU;
        }
        output
    }

    /// `n` samples of 16-bit PCM.
    pub fn take_pcm(&mut self, n: usize) -> Vec<i16> {
        self.by_ref().take(n).collect()
    }
}

impl Iterator for DualToneGenerator {
    type Item = i16;

    fn next(&mut self) -> Option<i16> {
        Some((self.next_sample() * i16::MAX as f32) as i16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_stays_within_amplitude() {
        let mut generator = DualToneGenerator::new(697.0, 1209.0).with_amplitude(0.5);
        let peak = generator.take_pcm(800).into_iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak <= (0.5 * i16::MAX as f32) as u16 + 1);
        assert!(peak > (0.4 * i16::MAX as f32) as u16);
    }

    #[test]
    fn keypad_lookup() {
        assert!(DualToneGenerator::for_digit('5').is_some());
        assert!(DualToneGenerator::for_digit('D').is_some());
        assert!(DualToneGenerator::for_digit('x').is_none());
    }
}
