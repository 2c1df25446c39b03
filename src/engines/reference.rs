// src/engines/reference.rs
//
// Reference tones: the fundamental and its octaves, a fixed tonal frame
// the pathway voices are heard against.

use super::{AUDIBILITY_FLOOR, SoundEngine};
use crate::audio_buffer::MixBus;
use crate::catalog::Catalog;
use crate::config::{EngineConfig, ReferenceConfig};
use crate::context::SharedContext;
use crate::dsp::{SineOsc, pan_gains};
use crate::parameter::SmoothedParam;

const TONES: usize = 5;

/// 1% pitch tolerance, in octaves.
const MATCH_OCTAVES: f32 = 0.014_355;

#[derive(Debug, Clone, Copy)]
struct Tone {
    ratio: f32,
    amplitude: f32,
    pan: (f32, f32),
    osc: SineOsc,
    level: f32,
}

/// How a reference tone relates to the focused pitch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PitchRelation {
    Match,
    Octave,
    Other,
}

pub fn pitch_relation(focus_ratio: f32, tone_ratio: f32) -> PitchRelation {
    let octaves = (focus_ratio / tone_ratio).log2();
    if !octaves.is_finite() {
        PitchRelation::Other
    } else if octaves.abs() < MATCH_OCTAVES {
        PitchRelation::Match
    } else if (octaves - octaves.round()).abs() < MATCH_OCTAVES {
        PitchRelation::Octave
    } else {
        PitchRelation::Other
    }
}

pub struct ReferenceEngine {
    config: ReferenceConfig,
    tones: [Tone; TONES],
    breath: SineOsc,
    /// Ratio of the focused entity, held through the release tail.
    focus_ratio: Option<f32>,
    mix: SmoothedParam,
}

impl ReferenceEngine {
    pub fn new(config: &EngineConfig) -> Self {
        let r = &config.reference;
        Self {
            tones: std::array::from_fn(|i| Tone {
                ratio: r.tones[i].ratio,
                amplitude: r.tones[i].amplitude,
                pan: pan_gains(r.tones[i].pan),
                osc: SineOsc::new(0.0),
                level: 0.0,
            }),
            breath: SineOsc::new(0.0),
            focus_ratio: None,
            mix: SmoothedParam::new(r.mix, config.bridge.parameter_glide_secs),
            config: r.clone(),
        }
    }

    /// Level each tone reached at the end of the last block.
    pub fn tone_levels(&self) -> [f32; TONES] {
        std::array::from_fn(|i| self.tones[i].level)
    }

    fn duck_factor(&self, tone_ratio: f32, envelope: f32) -> f32 {
        let Some(focus_ratio) = self.focus_ratio else {
            return 1.0;
        };
        let depth = match pitch_relation(focus_ratio, tone_ratio) {
            PitchRelation::Match => self.config.match_duck,
            PitchRelation::Octave => self.config.octave_duck,
            PitchRelation::Other => self.config.other_duck,
        };
        (1.0 - depth.clamp(0.0, 1.0) * envelope).clamp(0.0, 1.0)
    }
}

impl SoundEngine for ReferenceEngine {
    fn render(&mut self, ctx: &mut SharedContext, catalog: &Catalog, bus: &mut MixBus) {
        let dt = ctx.dt();
        self.mix.advance(dt);

        if let Some(e) = ctx.focus.entity {
            self.focus_ratio = catalog.get(e).map(|p| p.ratio_value);
        } else if ctx.focus.envelope == 0.0 {
            self.focus_ratio = None;
        }

        let breath = 1.0 + self.config.breathing_depth * self.breath.next(self.config.breathing_hz * dt);
        let global = self.mix.value() * ctx.master_gain() * ctx.solo_duck() * breath;
        let envelope = ctx.focus.envelope;
        let frames = bus.frames();
        let nyquist = ctx.sample_rate() * 0.5;

        for i in 0..TONES {
            let duck = self.duck_factor(self.tones[i].ratio, envelope);
            let tone = &mut self.tones[i];
            let target = tone.amplitude * duck * global;
            let freq = ctx.fundamental() * tone.ratio;
            if (target < AUDIBILITY_FLOOR && tone.level < AUDIBILITY_FLOOR) || freq >= nyquist {
                tone.level = target;
                continue;
            }
            let inc = SineOsc::increment(freq, ctx.sample_rate());
            let step = (target - tone.level) / frames as f32;
            let mut a = tone.level;
            for frame in 0..frames {
                a += step;
                let s = tone.osc.next(inc) * a;
                bus.dry.add(frame, s * tone.pan.0, s * tone.pan.1);
            }
            tone.level = target;
        }
    }

    fn set_mix_level(&mut self, level: f32) {
        if level.is_finite() {
            self.mix.set_target(level.clamp(0.0, 1.0));
        }
    }

    fn mix_level(&self) -> f32 {
        self.mix.target()
    }

    fn active_count(&self) -> usize {
        self.tones.iter().filter(|t| t.level >= AUDIBILITY_FLOOR).count()
    }

    fn reset(&mut self) {
        self.focus_ratio = None;
    }
}
