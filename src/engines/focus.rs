// src/engines/focus.rs
//
// Focus voice: a clear, lightly harmonic tone at the selected pathway's
// pitch, independent of its abundance.

use super::{AUDIBILITY_FLOOR, SoundEngine};
use crate::audio_buffer::MixBus;
use crate::catalog::Catalog;
use crate::config::{EngineConfig, FocusConfig, Sends};
use crate::context::SharedContext;
use crate::dsp::{SineOsc, ease_coefficient};
use crate::parameter::SmoothedParam;

const SNAP: f32 = 0.001;

/// Level correction so the focus tone reads evenly across the range.
pub fn frequency_compensation(config: &FocusConfig, freq: f32) -> f32 {
    if freq < config.low_corner_hz {
        1.0 + config.low_boost * (1.0 - freq / config.low_corner_hz)
    } else if freq > config.high_corner_hz {
        1.0 - config.high_cut * ((freq - config.high_corner_hz) / config.high_corner_hz).min(1.0)
    } else {
        1.0
    }
}

pub struct FocusEngine {
    config: FocusConfig,
    envelope: f32,
    /// Entity being voiced; kept through the release tail.
    entity: Option<usize>,
    partials: [SineOsc; 3],
    level: f32,
    mix: SmoothedParam,
}

impl FocusEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.focus.clone(),
            envelope: 0.0,
            entity: None,
            partials: [SineOsc::default(); 3],
            level: 0.0,
            mix: SmoothedParam::new(config.focus.mix, config.bridge.parameter_glide_secs),
        }
    }

    pub fn envelope(&self) -> f32 {
        self.envelope
    }

    pub fn entity(&self) -> Option<usize> {
        self.entity
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    fn update_envelope(&mut self, target: f32, dt: f32) {
        let coeff = if target > self.envelope {
            ease_coefficient(dt * 4.0, self.config.attack_secs)
        } else {
            ease_coefficient(dt * 3.0, self.config.release_secs)
        };
        self.envelope = (self.envelope + (target - self.envelope) * coeff).clamp(0.0, 1.0);
        if target == 0.0 && self.envelope < SNAP {
            self.envelope = 0.0;
        }
    }
}

impl SoundEngine for FocusEngine {
    fn render(&mut self, ctx: &mut SharedContext, catalog: &Catalog, bus: &mut MixBus) {
        let dt = ctx.dt();
        self.mix.advance(dt);
        self.update_envelope(ctx.focus.target, dt);

        if let Some(e) = ctx.focus.entity {
            if self.entity != Some(e) {
                // a new entity starts from silence
                self.level = 0.0;
                self.partials = [SineOsc::default(); 3];
            }
            self.entity = Some(e);
        }
        let Some(ratio) = self.entity.and_then(|e| catalog.get(e)).map(|p| p.ratio_value) else {
            self.level = 0.0;
            return;
        };

        let freq = ctx.fundamental() * ratio;
        let target = self.config.target_volume
            * self.envelope
            * ctx.master_gain()
            * ctx.solo_duck()
            * self.mix.value()
            * frequency_compensation(&self.config, freq);

        if target < AUDIBILITY_FLOOR && self.level < AUDIBILITY_FLOOR {
            self.level = 0.0;
            if self.envelope == 0.0 && ctx.focus.entity.is_none() {
                self.entity = None;
            }
            return;
        }

        let frames = bus.frames();
        let nyquist = ctx.sample_rate() * 0.5;
        let step = (target - self.level) / frames as f32;
        let sends = Sends::new(0.0, 0.0, self.config.reverb_send);
        for (h, (osc, weight)) in self.partials.iter_mut().zip(self.config.partials).enumerate() {
            let partial_freq = freq * (h + 1) as f32;
            if partial_freq >= nyquist || weight == 0.0 {
                continue;
            }
            let inc = SineOsc::increment(partial_freq, ctx.sample_rate());
            let mut a = self.level;
            for frame in 0..frames {
                a += step;
                let s = osc.next(inc) * a * weight * std::f32::consts::FRAC_1_SQRT_2;
                bus.add_with_sends(frame, s, s, sends);
            }
        }
        self.level = target;
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
        (self.level >= AUDIBILITY_FLOOR) as usize
    }

    fn reset(&mut self) {
        self.envelope = 0.0;
        self.entity = None;
        self.level = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RawPathway;
    use crate::context::EntityTables;

    #[test]
    fn compensation_corners() {
        let c = FocusConfig::default();
        assert!((frequency_compensation(&c, 100.0) - 1.075).abs() < 1e-6);
        assert_eq!(frequency_compensation(&c, 660.0), 1.0);
        assert!((frequency_compensation(&c, 3000.0) - 0.925).abs() < 1e-6);
        assert!((frequency_compensation(&c, 9000.0) - 0.85).abs() < 1e-6);
    }

    #[test]
    fn sounds_through_release_and_ignores_abundance() {
        let config = EngineConfig::default();
        let records = [0.01, 1.0]
            .into_iter()
            .enumerate()
            .map(|(i, a)| RawPathway {
                id: format!("PWY-{i}"),
                n: Some(3),
                d: Some(2),
                abundance: Some(a),
                ..Default::default()
            })
            .collect();
        let catalog = Catalog::from_records(records).unwrap();

        let run = |entity: usize| {
            let mut ctx = SharedContext::new(&config);
            ctx.tables = EntityTables::new(2);
            ctx.set_focus(Some(entity));
            let mut engine = FocusEngine::new(&config);
            let mut bus = MixBus::new(128);
            let mut step = |ctx: &mut SharedContext, engine: &mut FocusEngine| {
                ctx.advance(128);
                bus.begin_block(128);
                engine.render(ctx, &catalog, &mut bus);
            };
            for _ in 0..300 {
                step(&mut ctx, &mut engine);
            }
            let held = engine.level();
            ctx.set_focus(None);
            step(&mut ctx, &mut engine);
            assert_eq!(engine.entity(), Some(entity));
            assert!(engine.level() > 0.0 && engine.level() < held);
            for _ in 0..1_000 {
                step(&mut ctx, &mut engine);
            }
            assert_eq!(engine.envelope(), 0.0);
            assert_eq!(engine.level(), 0.0);
            held
        };

        assert!((run(0) - run(1)).abs() < 1e-6);
    }
}
