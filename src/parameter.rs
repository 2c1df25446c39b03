// src/parameter.rs

use crate::dsp::ease_coefficient;

/// A control value that glides toward its target once per block.
///
/// Engines read `value()` as the block's target level and ramp their own
/// per-voice level toward it, so a jump in the target never produces a step.
#[derive(Debug, Clone, Copy)]
pub struct SmoothedParam {
    current: f32,
    target: f32,
    glide_secs: f32,
}

impl SmoothedParam {
    pub fn new(value: f32, glide_secs: f32) -> Self {
        Self {
            current: value,
            target: value,
            glide_secs,
        }
    }

    /// Set the value to glide toward (e.g. from a control message).
    #[inline]
    pub fn set_target(&mut self, value: f32) {
        self.target = value;
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    /// Advance one block of `dt` seconds.
    #[inline]
    pub fn advance(&mut self, dt: f32) {
        self.current += (self.target - self.current) * ease_coefficient(dt, self.glide_secs);
        if (self.target - self.current).abs() < 1e-6 {
            self.current = self.target;
        }
    }

    /// Value at the end of the current block.
    #[inline]
    pub fn value(&self) -> f32 {
        self.current
    }
}
