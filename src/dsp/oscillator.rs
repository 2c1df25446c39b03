// src/dsp/oscillator.rs

use std::f32::consts::{PI, TAU};

/// Phase-accumulator sine oscillator. Phase is kept in cycles (0..1).
#[derive(Debug, Clone, Copy, Default)]
pub struct SineOsc {
    phase: f32,
}

impl SineOsc {
    pub fn new(phase: f32) -> Self {
        Self {
            phase: phase.rem_euclid(1.0),
        }
    }

    /// Phase increment in cycles per sample.
    #[inline]
    pub fn increment(freq: f32, sample_rate: f32) -> f32 {
        freq / sample_rate
    }

    /// Current sample, then advance by `inc` cycles.
    #[inline(always)]
    pub fn next(&mut self, inc: f32) -> f32 {
        let s = (self.phase * TAU).sin();
        self.phase += inc;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        s
    }
}

/// Constant-power pan law; `pan` in -1 (left) ..= 1 (right).
#[inline]
pub fn pan_gains(pan: f32) -> (f32, f32) {
    let angle = (pan.clamp(-1.0, 1.0) + 1.0) * 0.25 * PI;
    (angle.cos(), angle.sin())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_completes_one_cycle() {
        let mut osc = SineOsc::new(0.0);
        let inc = SineOsc::increment(1.0, 4.0);
        let samples: Vec<f32> = (0..4).map(|_| osc.next(inc)).collect();
        assert!(samples[0].abs() < 1e-6);
        assert!((samples[1] - 1.0).abs() < 1e-6);
        assert!(samples[2].abs() < 1e-6);
        assert!((samples[3] + 1.0).abs() < 1e-6);
        assert!(osc.phase < 1e-6);
    }

    #[test]
    fn pan_is_constant_power() {
        for pan in [-1.0, -0.5, 0.0, 0.3, 1.0] {
            let (l, r) = pan_gains(pan);
            assert!((l * l + r * r - 1.0).abs() < 1e-5);
        }
        let (l, r) = pan_gains(-1.0);
        assert!((l - 1.0).abs() < 1e-6 && r.abs() < 1e-6);
    }
}
