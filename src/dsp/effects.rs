// src/dsp/effects.rs
//
// Stereo effect units used by the post processor. Each processes one
// frame at a time and never allocates after construction.

use crate::config::{ChorusConfig, DelayConfig, LimiterConfig, ReverbConfig};

use super::delay_line::DelayLine;
use super::envelope::ease_coefficient;

pub const MAX_CHORUS_VOICES: usize = 8;

// ═══════════════════════════════════════════════════════════════════
// Chorus
// ═══════════════════════════════════════════════════════════════════

/// Modulated delay network: several taps into one stereo buffer, each
/// swept by its own slow sine LFO, averaged and fed back.
pub struct Chorus {
    lines: [DelayLine; 2],
    lfo_phase: [f32; MAX_CHORUS_VOICES],
    lfo_inc: [f32; MAX_CHORUS_VOICES],
    voices: usize,
    base_delay: f32,
    depth: f32,
    feedback: f32,
    last: [f32; 2],
}

impl Chorus {
    /// `phases` seeds each tap's LFO (in cycles) so taps start decorrelated.
    pub fn new(config: &ChorusConfig, sample_rate: f32, phases: [f32; MAX_CHORUS_VOICES]) -> Self {
        let voices = config.voices.clamp(1, MAX_CHORUS_VOICES);
        let lfo_inc = std::array::from_fn(|v| {
            config.rate_hz * (0.8 + 0.2 * v as f32) / sample_rate
        });
        let lines = [
            DelayLine::with_duration(config.buffer_secs, sample_rate),
            DelayLine::with_duration(config.buffer_secs, sample_rate),
        ];
        let max_delay = lines[0].max_delay();
        Self {
            base_delay: (config.base_delay_secs * sample_rate).clamp(1.0, max_delay),
            depth: config.depth_secs * sample_rate,
            feedback: config.feedback,
            lfo_phase: phases.map(|p| p.rem_euclid(1.0)),
            lfo_inc,
            voices,
            lines,
            last: [0.0; 2],
        }
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let mut out = [0.0f32; 2];
        for v in 0..self.voices {
            let phase = &mut self.lfo_phase[v];
            *phase += self.lfo_inc[v];
            if *phase >= 1.0 {
                *phase -= 1.0;
            }
            let delay = self.base_delay + (*phase * std::f32::consts::TAU).sin() * self.depth;
            out[0] += self.lines[0].read(delay);
            out[1] += self.lines[1].read(delay);
        }
        let norm = 1.0 / self.voices as f32;
        out[0] *= norm;
        out[1] *= norm;

        self.lines[0].write(left + self.last[0] * self.feedback);
        self.lines[1].write(right + self.last[1] * self.feedback);
        self.last = out;
        (out[0], out[1])
    }

    pub fn reset(&mut self) {
        self.lines.iter_mut().for_each(DelayLine::clear);
        self.last = [0.0; 2];
    }
}

// ═══════════════════════════════════════════════════════════════════
// Feedback delay
// ═══════════════════════════════════════════════════════════════════

/// Echo with a one-pole low-pass in the feedback path. The wet output is
/// the delayed signal itself; only what is fed back gets darker.
pub struct FeedbackDelay {
    lines: [DelayLine; 2],
    lowpass: [f32; 2],
    delay: f32,
    feedback: f32,
    damping: f32,
}

impl FeedbackDelay {
    pub fn new(config: &DelayConfig, sample_rate: f32) -> Self {
        let lines = [
            DelayLine::with_duration(config.buffer_secs, sample_rate),
            DelayLine::with_duration(config.buffer_secs, sample_rate),
        ];
        let delay = (config.time_secs * sample_rate).clamp(1.0, lines[0].max_delay());
        Self {
            lines,
            lowpass: [0.0; 2],
            delay,
            feedback: config.feedback.clamp(0.0, 0.95),
            damping: config.damping.clamp(0.0, 0.99),
        }
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let input = [left, right];
        let mut out = [0.0f32; 2];
        for ch in 0..2 {
            let delayed = self.lines[ch].read(self.delay);
            self.lowpass[ch] += (delayed - self.lowpass[ch]) * (1.0 - self.damping);
            self.lines[ch].write(input[ch] + self.lowpass[ch] * self.feedback);
            out[ch] = delayed;
        }
        (out[0], out[1])
    }

    pub fn reset(&mut self) {
        self.lines.iter_mut().for_each(DelayLine::clear);
        self.lowpass = [0.0; 2];
    }
}

// ═══════════════════════════════════════════════════════════════════
// Reverb
// ═══════════════════════════════════════════════════════════════════

/// Comb and allpass lengths are quoted at this rate.
const REVERB_REFERENCE_RATE: f32 = 48_000.0;
/// Extra samples on the right channel's lines to decorrelate the sides.
const STEREO_SPREAD: f32 = 23.0;

struct Comb {
    line: DelayLine,
    delay: f32,
    feedback: f32,
    lowpass: f32,
}

impl Comb {
    fn new(delay: f32, decay_secs: f32, sample_rate: f32) -> Self {
        Self {
            line: DelayLine::new(delay as usize + 1),
            delay,
            // fall by 60 dB over decay_secs
            feedback: 10f32.powf(-3.0 * delay / (decay_secs * sample_rate)).min(0.98),
            lowpass: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, damping: f32) -> f32 {
        let delayed = self.line.read(self.delay);
        self.lowpass = delayed * (1.0 - damping) + self.lowpass * damping;
        self.line.write(input + self.lowpass * self.feedback);
        delayed
    }
}

struct Allpass {
    line: DelayLine,
    delay: f32,
}

impl Allpass {
    fn new(delay: f32) -> Self {
        Self {
            line: DelayLine::new(delay as usize + 1),
            delay,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, diffusion: f32) -> f32 {
        let delayed = self.line.read(self.delay);
        self.line.write(input + delayed * diffusion);
        delayed - input * diffusion
    }
}

/// Schroeder-style wash: predelay, four damped combs in parallel, two
/// allpasses in series, one network per channel. Output is wet only.
pub struct Reverb {
    predelay: [DelayLine; 2],
    predelay_samples: f32,
    combs: [[Comb; 4]; 2],
    allpasses: [[Allpass; 2]; 2],
    damping: f32,
    diffusion: f32,
}

impl Reverb {
    pub fn new(config: &ReverbConfig, sample_rate: f32) -> Self {
        let scale = sample_rate / REVERB_REFERENCE_RATE;
        let length = |n: usize, ch: usize| (n as f32 * scale + STEREO_SPREAD * ch as f32).round().max(1.0);
        let predelay_samples = (config.predelay_secs * sample_rate).round().max(1.0);
        Self {
            predelay: std::array::from_fn(|_| DelayLine::new(predelay_samples as usize + 1)),
            predelay_samples,
            combs: std::array::from_fn(|ch| {
                std::array::from_fn(|i| {
                    Comb::new(length(config.comb_samples[i], ch), config.decay_secs, sample_rate)
                })
            }),
            allpasses: std::array::from_fn(|ch| {
                std::array::from_fn(|i| Allpass::new(length(config.allpass_samples[i], ch)))
            }),
            damping: config.damping.clamp(0.0, 0.99),
            diffusion: config.diffusion.clamp(0.0, 0.9),
        }
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let input = [left, right];
        let mut out = [0.0f32; 2];
        for ch in 0..2 {
            let pre = self.predelay[ch].read(self.predelay_samples);
            self.predelay[ch].write(input[ch]);

            let mut wet = 0.0;
            for comb in &mut self.combs[ch] {
                wet += comb.process(pre, self.damping);
            }
            wet *= 0.25;
            for allpass in &mut self.allpasses[ch] {
                wet = allpass.process(wet, self.diffusion);
            }
            out[ch] = wet;
        }
        (out[0], out[1])
    }

    pub fn reset(&mut self) {
        self.predelay.iter_mut().for_each(DelayLine::clear);
        for comb in self.combs.iter_mut().flatten() {
            comb.line.clear();
            comb.lowpass = 0.0;
        }
        for allpass in self.allpasses.iter_mut().flatten() {
            allpass.line.clear();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Limiter
// ═══════════════════════════════════════════════════════════════════

/// Stereo-linked peak limiter: instant attack, exponential release.
pub struct PeakLimiter {
    threshold: f32,
    release: f32,
    gain: f32,
}

impl PeakLimiter {
    pub fn new(config: &LimiterConfig, sample_rate: f32) -> Self {
        Self {
            threshold: config.threshold,
            release: ease_coefficient(1.0 / sample_rate, config.release_secs),
            gain: 1.0,
        }
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let peak = left.abs().max(right.abs());
        if peak > self.threshold {
            self.gain = self.gain.min(self.threshold / peak);
        } else {
            self.gain += (1.0 - self.gain) * self.release;
        }
        (left * self.gain, right * self.gain)
    }

    #[inline]
    pub fn gain(&self) -> f32 {
        self.gain
    }
}
