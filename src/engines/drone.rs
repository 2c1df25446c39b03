// src/engines/drone.rs
//
// Drone engine: one sine voice per pathway, each with three independent
// layers (roots, branches, leaves) that drift in and out stochastically.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::{AUDIBILITY_FLOOR, EngineKind, SoundEngine, engine_seed};
use crate::audio_buffer::MixBus;
use crate::catalog::{Catalog, Category, PathwayEntity};
use crate::config::{DecayCurve, DroneConfig, EngineConfig};
use crate::context::SharedContext;
use crate::dsp::{SineOsc, arch, ease_coefficient, pan_gains};
use crate::parameter::SmoothedParam;

const LAYERS: usize = 3;
const RIPPLE_DAMPING: f32 = 0.995;
const RIPPLE_RANGE: (f32, f32) = (0.8, 1.2);

/// Stereo home position per category, indexed by `Category::index`.
const CATEGORY_PAN: [f32; Category::COUNT] = [-0.6, -0.25, 0.25, 0.6, 0.1, -0.1];

/// Long-term attenuation of harmonically complex ratios.
pub fn consonance_decay(
    curve: DecayCurve,
    complexity: f32,
    strength: f32,
    linear_cutoff: f32,
    floor: f32,
) -> f32 {
    let nd = complexity.max(1.0);
    let gain = match curve {
        DecayCurve::Exponential => (-strength * 0.5 * nd.ln()).exp(),
        DecayCurve::Linear => 1.0 - strength * nd / linear_cutoff.max(1.0),
        DecayCurve::Logarithmic => 1.0 / (nd + 1.0).log2().powf(strength),
    };
    gain.clamp(floor, 1.0)
}

#[derive(Debug, Clone, Copy, Default)]
struct LayerState {
    active: bool,
    elapsed: f32,
    duration: f32,
    envelope: f32,
}

/// Per-pathway drone voice. Built off the audio thread with the population.
#[derive(Debug, Clone)]
pub struct DroneVoice {
    entity: u32,
    category: Category,
    ratio: f32,
    consonance: f32,
    /// abundance^k, the voice's base activation probability.
    propensity: f32,
    decay_gain: f32,
    pan: (f32, f32),
    osc: SineOsc,
    drift: SineOsc,
    drift_hz: f32,
    layers: [LayerState; LAYERS],
    habituation: f32,
    interaction_energy: f32,
    active_secs: f32,
    /// Amplitude at the end of the last rendered block.
    level: f32,
}

impl DroneVoice {
    pub fn new(
        index: usize,
        entity: &PathwayEntity,
        config: &DroneConfig,
        rng: &mut impl Rng,
    ) -> Self {
        let home = CATEGORY_PAN[entity.category.index()];
        let spread = config.pan_spread.max(0.0);
        let offset = if spread > 0.0 {
            rng.random_range(-spread..=spread)
        } else {
            0.0
        };
        let (lo, hi) = (config.drift_min_hz, config.drift_max_hz.max(config.drift_min_hz));
        Self {
            entity: index as u32,
            category: entity.category,
            ratio: entity.ratio_value,
            consonance: entity.consonance,
            propensity: entity.abundance.powf(config.abundance_exponent),
            decay_gain: consonance_decay(
                config.decay_curve,
                entity.ratio.complexity() as f32,
                config.decay_strength,
                config.decay_linear_cutoff,
                config.decay_floor,
            ),
            pan: pan_gains((home + offset).clamp(-0.9, 0.9)),
            osc: SineOsc::new(rng.random::<f32>()),
            drift: SineOsc::new(rng.random::<f32>()),
            drift_hz: lo + (hi - lo) * rng.random::<f32>(),
            layers: [LayerState::default(); LAYERS],
            habituation: 0.0,
            interaction_energy: 0.0,
            active_secs: 0.0,
            level: 0.0,
        }
    }

    #[inline]
    pub fn entity(&self) -> usize {
        self.entity as usize
    }

    #[inline]
    pub fn habituation(&self) -> f32 {
        self.habituation
    }

    #[inline]
    pub fn interaction_energy(&self) -> f32 {
        self.interaction_energy
    }

    #[inline]
    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn is_active(&self) -> bool {
        self.layers.iter().any(|l| l.active)
    }

    fn add_energy(&mut self, amount: f32, sensitivity: f32) {
        self.interaction_energy += amount * (0.5 + sensitivity * self.consonance);
    }
}

pub struct DroneEngine {
    config: DroneConfig,
    voices: Vec<DroneVoice>,
    active_per_layer: [usize; LAYERS],
    active_voices: usize,
    ripple_field: f32,
    ripple_velocity: f32,
    rng: SmallRng,
    mix: SmoothedParam,
}

impl DroneEngine {
    pub fn new(config: &EngineConfig, seed: u64) -> Self {
        Self {
            config: config.drone.clone(),
            voices: Vec::new(),
            active_per_layer: [0; LAYERS],
            active_voices: 0,
            ripple_field: 1.0,
            ripple_velocity: 0.0,
            rng: SmallRng::seed_from_u64(engine_seed(seed, EngineKind::Drone)),
            mix: SmoothedParam::new(config.drone.mix, config.bridge.parameter_glide_secs),
        }
    }

    /// Exchange the voice set with `voices` (the old set ends up in `voices`).
    pub fn swap_voices(&mut self, voices: &mut Vec<DroneVoice>) {
        std::mem::swap(&mut self.voices, voices);
        self.recount();
    }

    pub fn voices(&self) -> &[DroneVoice] {
        &self.voices
    }

    /// Amplitude the voice for `entity` reached at the end of the last block.
    pub fn voice_level(&self, entity: usize) -> f32 {
        self.voices.get(entity).map_or(0.0, |v| v.level)
    }

    /// Active layer count per tier (roots, branches, leaves).
    pub fn active_layers(&self) -> [usize; LAYERS] {
        self.active_per_layer
    }

    /// Raise the interaction energy of `entity` and, more weakly, of its
    /// harmonic relations.
    pub fn excite(&mut self, entity: usize, catalog: &Catalog) {
        let strength = self.config.excitation_strength;
        let sensitivity = self.config.excitation_consonance_sensitivity;
        let Some(voice) = self.voices.get_mut(entity) else {
            return;
        };
        voice.add_energy(strength, sensitivity);
        for rel in catalog.relations(entity) {
            if let Some(v) = self.voices.get_mut(rel.index) {
                v.add_energy(strength * self.config.excitation_spread * rel.strength, sensitivity);
            }
        }
    }

    fn recount(&mut self) {
        self.active_per_layer = [0; LAYERS];
        self.active_voices = 0;
        for v in &self.voices {
            for (count, layer) in self.active_per_layer.iter_mut().zip(&v.layers) {
                *count += layer.active as usize;
            }
            self.active_voices += v.is_active() as usize;
        }
    }

    fn update_ripple(&mut self) {
        self.ripple_velocity += self.rng.random_range(-1.0f32..1.0) * self.config.ripple_speed;
        self.ripple_velocity *= RIPPLE_DAMPING;
        self.ripple_field =
            (self.ripple_field + self.ripple_velocity).clamp(RIPPLE_RANGE.0, RIPPLE_RANGE.1);
    }
}

impl SoundEngine for DroneEngine {
    fn render(&mut self, ctx: &mut SharedContext, _catalog: &Catalog, bus: &mut MixBus) {
        let dt = ctx.dt();
        self.mix.advance(dt);
        self.update_ripple();

        let Self {
            config,
            voices,
            active_per_layer,
            active_voices,
            ripple_field,
            rng,
            mix,
            ..
        } = self;

        let frames = bus.frames();
        let nyquist = ctx.sample_rate() * 0.5;
        let fundamental = ctx.fundamental();
        let duck = ctx.focus_duck_gain();
        let focus_env = ctx.focus.envelope;
        let global = mix.value() * ctx.master_gain() * ctx.activity.drone;
        let energy_decay = (-dt / config.excitation_decay_secs.max(1e-3)).exp();
        let recovery = ease_coefficient(dt, config.habituation_recovery_secs);
        let layer_cfg = config.layers();
        let ripple_dev = (*ripple_field - 1.0) * config.ripple_strength;

        *active_voices = 0;
        for v in voices.iter_mut() {
            let entity = v.entity as usize;
            v.interaction_energy *= energy_decay;

            let offset = (v.category.index() as f32 * 0.37).fract();
            let ripple = 1.0 + ripple_dev * (0.7 + offset);
            let response = 0.5 + 0.5 * v.consonance;
            let probability = ripple * response * v.propensity * (1.0 + v.interaction_energy);

            let mut amp = config.whisper;
            for (li, cfg) in layer_cfg.iter().enumerate() {
                let layer = &mut v.layers[li];
                if layer.active {
                    layer.elapsed += dt;
                    let t = layer.elapsed / layer.duration;
                    if t >= 1.0 {
                        *layer = LayerState::default();
                        active_per_layer[li] -= 1;
                    } else {
                        layer.envelope = arch(t);
                    }
                } else if active_per_layer[li] < cfg.max_active
                    && rng.random::<f32>() < dt * probability / cfg.recurrence_secs
                {
                    let bias = config.consonance_duration_bias;
                    let shape = bias * v.consonance + (1.0 - bias) * rng.random::<f32>();
                    *layer = LayerState {
                        active: true,
                        elapsed: 0.0,
                        duration: (cfg.min_secs + (cfg.max_secs - cfg.min_secs) * shape).max(dt),
                        envelope: 0.0,
                    };
                    active_per_layer[li] += 1;
                }
                amp += layer.envelope * cfg.weight;
            }

            if v.is_active() {
                *active_voices += 1;
                v.active_secs += dt;
                if v.active_secs > config.habituation_onset_secs {
                    let rate = config.habituation_rate
                        * (1.0 - config.habituation_consonance_bias * v.consonance);
                    v.habituation = (v.habituation + rate * dt).min(1.0);
                }
            } else {
                v.active_secs = 0.0;
                v.habituation -= v.habituation * recovery;
            }

            let drift_value = v.drift.next(v.drift_hz * dt);
            let (habituation_gain, drift, focus_term) = if ctx.is_focused(entity) {
                (1.0, 1.0, 1.0 + (config.focus_boost - 1.0) * focus_env)
            } else {
                (
                    1.0 - v.habituation * config.habituation_max_reduction,
                    1.0 + config.drift_depth * drift_value,
                    duck,
                )
            };

            let target = amp
                * v.decay_gain
                * habituation_gain
                * drift
                * ctx.comparison_scale(entity)
                * ctx.category_gain(v.category)
                * focus_term
                * ctx.cascade_fade(entity)
                * global;

            let freq = fundamental * v.ratio;
            if (target < AUDIBILITY_FLOOR && v.level < AUDIBILITY_FLOOR) || freq >= nyquist {
                v.level = target;
                continue;
            }

            let sends = ctx.sends(v.category).scaled(config.send_level);
            let inc = SineOsc::increment(freq, ctx.sample_rate());
            let step = (target - v.level) / frames as f32;
            let mut a = v.level;
            for i in 0..frames {
                a += step;
                let s = v.osc.next(inc) * a;
                bus.add_with_sends(i, s * v.pan.0, s * v.pan.1, sends);
            }
            v.level = target;
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
        self.active_voices
    }

    fn reset(&mut self) {
        for v in &mut self.voices {
            v.layers = [LayerState::default(); LAYERS];
            v.habituation = 0.0;
            v.interaction_energy = 0.0;
            v.active_secs = 0.0;
            v.level = 0.0;
        }
        self.recount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RawPathway;
    use crate::context::EntityTables;

    fn catalog(n: usize) -> Catalog {
        let records = (0..n)
            .map(|i| RawPathway {
                id: format!("PWY-{i}"),
                n: Some(i as u32 % 7 + 1),
                d: Some(i as u32 % 5 + 1),
                category: Some(["energy", "biosynthesis", "degradation"][i % 3].into()),
                abundance: Some(1.0 + i as f64),
                ..Default::default()
            })
            .collect();
        Catalog::from_records(records).unwrap()
    }

    fn setup(config: &EngineConfig, catalog: &Catalog) -> (DroneEngine, SharedContext, MixBus) {
        let mut rng = SmallRng::seed_from_u64(3);
        let mut voices: Vec<DroneVoice> = catalog
            .entities()
            .iter()
            .enumerate()
            .map(|(i, e)| DroneVoice::new(i, e, &config.drone, &mut rng))
            .collect();
        let mut engine = DroneEngine::new(config, 11);
        engine.swap_voices(&mut voices);
        let mut ctx = SharedContext::new(config);
        ctx.tables = EntityTables::new(catalog.len());
        (engine, ctx, MixBus::new(config.block_size))
    }

    fn block(engine: &mut DroneEngine, ctx: &mut SharedContext, bus: &mut MixBus, catalog: &Catalog) {
        ctx.advance(128);
        ctx.update_focus_envelope();
        bus.begin_block(128);
        engine.render(ctx, catalog, bus);
    }

    #[test]
    fn decay_curves_fall_with_complexity() {
        for curve in [DecayCurve::Exponential, DecayCurve::Linear, DecayCurve::Logarithmic] {
            let simple = consonance_decay(curve, 2.0, 1.0, 256.0, 0.05);
            let complex = consonance_decay(curve, 90.0, 1.0, 256.0, 0.05);
            assert!(simple > complex, "{curve:?}");
            assert!(complex >= 0.05);
            assert!(consonance_decay(curve, 1.0, 1.0, 256.0, 0.05) <= 1.0);
        }
        assert_eq!(consonance_decay(DecayCurve::Linear, 10_000.0, 1.0, 256.0, 0.05), 0.05);
    }

    #[test]
    fn layer_caps_are_never_exceeded() {
        let mut config = EngineConfig::default();
        for layer in [&mut config.drone.roots, &mut config.drone.branches, &mut config.drone.leaves] {
            layer.recurrence_secs = 0.01;
            layer.max_active = 5;
        }
        let catalog = catalog(40);
        let (mut engine, mut ctx, mut bus) = setup(&config, &catalog);
        for _ in 0..500 {
            block(&mut engine, &mut ctx, &mut bus, &catalog);
            let counted = engine.voices().iter().fold([0usize; 3], |mut acc, v| {
                for (c, l) in acc.iter_mut().zip(&v.layers) {
                    *c += l.active as usize;
                }
                acc
            });
            assert_eq!(counted, engine.active_layers());
            assert!(counted.iter().all(|&c| c <= 5));
        }
        assert!(engine.active_layers().iter().all(|&c| c == 5));
    }

    #[test]
    fn whisper_keeps_every_voice_audible() {
        let config = EngineConfig::default();
        let catalog = catalog(6);
        let (mut engine, mut ctx, mut bus) = setup(&config, &catalog);
        for _ in 0..10 {
            block(&mut engine, &mut ctx, &mut bus, &catalog);
        }
        assert!(engine.voices().iter().all(|v| v.level() > 0.0));
        assert!(bus.dry.left[..128].iter().any(|s| *s != 0.0));
    }

    #[test]
    fn excitation_spreads_to_relations() {
        let config = EngineConfig::default();
        let catalog = catalog(12);
        let (mut engine, _, _) = setup(&config, &catalog);
        engine.excite(0, &catalog);
        let own = engine.voices()[0].interaction_energy();
        assert!(own > 0.0);
        for rel in catalog.relations(0) {
            let e = engine.voices()[rel.index].interaction_energy();
            assert!(e > 0.0 && e < own);
        }
        engine.excite(999, &catalog);
    }

    #[test]
    fn habituation_builds_while_active_and_recovers() {
        let mut config = EngineConfig::default();
        config.drone.roots = crate::config::LayerConfig {
            min_secs: 20.0,
            max_secs: 20.0,
            recurrence_secs: 0.001,
            weight: 0.55,
            max_active: 10,
        };
        config.drone.habituation_onset_secs = 1.0;
        let catalog = catalog(2);
        let (mut engine, mut ctx, mut bus) = setup(&config, &catalog);
        // ~5 s of rendering
        for _ in 0..1_900 {
            block(&mut engine, &mut ctx, &mut bus, &catalog);
        }
        assert!(engine.voices().iter().all(|v| v.habituation() > 0.0));
        engine.reset();
        assert!(engine.voices().iter().all(|v| v.habituation() == 0.0));
        assert_eq!(engine.active_layers(), [0, 0, 0]);
    }

    #[test]
    fn habituation_fades_once_layers_expire() {
        let mut config = EngineConfig::default();
        config.drone.roots = crate::config::LayerConfig {
            min_secs: 3.0,
            max_secs: 3.0,
            recurrence_secs: 0.001,
            weight: 0.55,
            max_active: 10,
        };
        config.drone.branches.max_active = 0;
        config.drone.leaves.max_active = 0;
        config.drone.habituation_onset_secs = 0.0;
        let catalog = catalog(2);
        let (mut engine, mut ctx, mut bus) = setup(&config, &catalog);
        for _ in 0..400 {
            block(&mut engine, &mut ctx, &mut bus, &catalog);
        }
        assert!(engine.voices().iter().all(|v| v.is_active()));
        let built: Vec<f32> = engine.voices().iter().map(DroneVoice::habituation).collect();
        assert!(built.iter().all(|&h| h > 0.0));

        // No new layers from here on; the 3 s roots run out on their own.
        engine.config.roots.max_active = 0;
        let mut previous = built;
        let mut peak = 0.0f32;
        let mut released = false;
        for _ in 0..1_500 {
            block(&mut engine, &mut ctx, &mut bus, &catalog);
            let all_idle = !engine.voices().iter().any(DroneVoice::is_active);
            for (v, prev) in engine.voices().iter().zip(previous.iter_mut()) {
                if all_idle {
                    assert_eq!(v.active_secs, 0.0);
                    assert!(v.habituation() <= *prev);
                } else {
                    peak = peak.max(v.habituation());
                }
                *prev = v.habituation();
            }
            released |= all_idle;
        }
        assert!(released);
        assert_eq!(engine.active_layers(), [0, 0, 0]);
        assert!(peak > 0.0);
        for v in engine.voices() {
            assert!(v.habituation() < peak * 0.01, "{} vs {peak}", v.habituation());
        }
    }
}
