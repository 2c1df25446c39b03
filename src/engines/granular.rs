// src/engines/granular.rs
//
// Granular engine: short sine grains scattered per category, selected by
// consonance, abundance and how long a pathway has been silent.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::{EngineKind, SoundEngine, engine_seed};
use crate::audio_buffer::MixBus;
use crate::catalog::{Catalog, Category};
use crate::config::{EngineConfig, GranularConfig, Sends};
use crate::context::SharedContext;
use crate::dsp::{SineOsc, grain_envelope, pan_gains};
use crate::parameter::SmoothedParam;

/// Gain below which a grain is advanced without being rendered.
const SILENT_GAIN: f32 = 2e-5;
const MIN_ACTIVITY: f32 = 0.05;

#[derive(Debug, Clone, Copy)]
struct Grain {
    entity: u32,
    category: Category,
    ratio: f32,
    amplitude: f32,
    pan: (f32, f32),
    osc: SineOsc,
    age: f32,
    duration: f32,
}

#[derive(Debug, Clone, Copy, Default)]
struct SpawnTimer {
    since: f32,
    interval: f32,
}

pub struct GranularEngine {
    config: GranularConfig,
    /// Pool sized to the sum of category caps; never grows.
    grains: Vec<Grain>,
    counts: [usize; Category::COUNT],
    caps: [usize; Category::COUNT],
    rates: [f32; Category::COUNT],
    timers: [SpawnTimer; Category::COUNT],
    rng: SmallRng,
    mix: SmoothedParam,
}

impl GranularEngine {
    pub fn new(config: &EngineConfig, seed: u64) -> Self {
        let g = &config.granular;
        let caps = g.max_grains.to_array();
        let rates = g.spawn_rates.to_array();
        let mut rng = SmallRng::seed_from_u64(engine_seed(seed, EngineKind::Granular));
        let timers = std::array::from_fn(|i| SpawnTimer {
            since: 0.0,
            interval: next_interval(rates[i], &mut rng),
        });
        Self {
            config: g.clone(),
            grains: Vec::with_capacity(caps.iter().sum()),
            counts: [0; Category::COUNT],
            caps,
            rates,
            timers,
            rng,
            mix: SmoothedParam::new(g.mix, config.bridge.parameter_glide_secs),
        }
    }

    /// Live grains per category.
    pub fn counts(&self) -> [usize; Category::COUNT] {
        self.counts
    }

    /// Choose a source pathway from `category`, weighted by consonance,
    /// abundance and the fairness bonus. Allocation-free.
    pub fn choose_source(
        &mut self,
        ctx: &SharedContext,
        catalog: &Catalog,
        category: Category,
    ) -> Option<usize> {
        let candidates = catalog.in_category(category);
        if candidates.is_empty() {
            return None;
        }
        let cfg = &self.config;
        let weight = |e: usize| {
            catalog.get(e).map_or(0.0, |p| {
                p.consonance * cfg.consonance_weight
                    + p.base_volume * cfg.abundance_weight
                    + ctx.fairness_bonus(e) * cfg.fairness_weight
            })
        };
        let total: f32 = candidates.iter().map(|&e| weight(e)).sum();
        if !(total > 0.0) {
            return Some(candidates[self.rng.random_range(0..candidates.len())]);
        }
        let mut r = self.rng.random::<f32>() * total;
        for &e in candidates {
            r -= weight(e);
            if r <= 0.0 {
                return Some(e);
            }
        }
        candidates.last().copied()
    }

    fn spawn(&mut self, ctx: &mut SharedContext, catalog: &Catalog, entity: usize) {
        let Some(p) = catalog.get(entity) else {
            return;
        };
        let cfg = &self.config;
        let duration = self.rng.random_range(cfg.min_grain_secs..=cfg.max_grain_secs.max(cfg.min_grain_secs));
        let width = cfg.pan_width.abs().min(1.0);
        let pan = self.rng.random_range(-width..=width);
        let grain = Grain {
            entity: entity as u32,
            category: p.category,
            ratio: p.ratio_value,
            amplitude: p.base_volume * cfg.amplitude,
            pan: pan_gains(pan),
            osc: SineOsc::new(self.rng.random::<f32>()),
            age: 0.0,
            duration,
        };
        if self.grains.len() < self.grains.capacity() {
            self.grains.push(grain);
            self.counts[p.category.index()] += 1;
            ctx.mark_sounded(entity);
        }
    }

    fn schedule(&mut self, ctx: &mut SharedContext, catalog: &Catalog) {
        let dt = ctx.dt();
        let activity = ctx.activity.granular.max(MIN_ACTIVITY);
        for category in Category::ALL {
            let c = category.index();
            self.timers[c].since += dt;
            if ctx.category_gain(category) < self.config.gate
                || catalog.in_category(category).is_empty()
            {
                continue;
            }
            if self.timers[c].since > self.timers[c].interval / activity
                && self.counts[c] < self.caps[c]
            {
                if let Some(entity) = self.choose_source(ctx, catalog, category) {
                    self.spawn(ctx, catalog, entity);
                }
                self.timers[c] = SpawnTimer {
                    since: 0.0,
                    interval: next_interval(self.rates[c], &mut self.rng),
                };
            }
        }
    }
}

fn next_interval(rate: f32, rng: &mut impl Rng) -> f32 {
    if rate <= 0.0 {
        return f32::INFINITY;
    }
    rng.random_range(0.7..1.3) / rate
}

impl SoundEngine for GranularEngine {
    fn render(&mut self, ctx: &mut SharedContext, catalog: &Catalog, bus: &mut MixBus) {
        self.mix.advance(ctx.dt());
        self.schedule(ctx, catalog);

        let cfg = &self.config;
        let frames = bus.frames();
        let sample_rate = ctx.sample_rate();
        let nyquist = sample_rate * 0.5;
        let duck = ctx.focus_duck_gain();
        let global =
            ctx.activity.granular * self.mix.value() * ctx.master_gain() * ctx.solo_duck();

        let mut i = 0;
        while i < self.grains.len() {
            let g = &mut self.grains[i];
            if g.age >= g.duration {
                self.counts[g.category.index()] -= 1;
                self.grains.swap_remove(i);
                continue;
            }
            let entity = g.entity as usize;
            let focus = if ctx.is_focused(entity) { 1.0 } else { duck };
            let gain = g.amplitude
                * focus
                * ctx.comparison_scale(entity)
                * ctx.category_gain(g.category)
                * ctx.cascade_fade(entity)
                * global;
            let freq = ctx.fundamental() * g.ratio;

            if gain > SILENT_GAIN && freq < nyquist {
                let base = ctx.sends(g.category);
                let sends = Sends::new(
                    base.chorus * cfg.chorus_send,
                    base.delay * cfg.delay_send,
                    base.reverb * cfg.reverb_send,
                );
                let inc = SineOsc::increment(freq, sample_rate);
                let step = 1.0 / (sample_rate * g.duration);
                let mut progress = g.age / g.duration;
                for frame in 0..frames {
                    if progress >= 1.0 {
                        break;
                    }
                    let s = g.osc.next(inc) * grain_envelope(progress, cfg.attack, cfg.release) * gain;
                    bus.add_with_sends(frame, s * g.pan.0, s * g.pan.1, sends);
                    progress += step;
                }
            }
            g.age += ctx.dt();
            i += 1;
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
        self.grains.len()
    }

    fn reset(&mut self) {
        self.grains.clear();
        self.counts = [0; Category::COUNT];
        for timer in &mut self.timers {
            timer.since = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RawPathway;
    use crate::context::EntityTables;

    fn catalog() -> Catalog {
        let records = (0..24)
            .map(|i| RawPathway {
                id: format!("PWY-{i}"),
                n: Some(i % 4 + 1),
                d: Some(1),
                category: Some(Category::ALL[i as usize % Category::COUNT].name().into()),
                abundance: Some(1.0),
                ..Default::default()
            })
            .collect();
        Catalog::from_records(records).unwrap()
    }

    fn context(config: &EngineConfig, len: usize) -> SharedContext {
        let mut ctx = SharedContext::new(config);
        ctx.tables = EntityTables::new(len);
        ctx
    }

    #[test]
    fn grain_counts_respect_category_caps() {
        let mut config = EngineConfig::default();
        config.granular.spawn_rates = crate::catalog::PerCategory::splat(5_000.0);
        config.granular.max_grains = crate::catalog::PerCategory::splat(3);
        config.granular.min_grain_secs = 0.5;
        config.granular.max_grain_secs = 0.5;
        let catalog = catalog();
        let mut ctx = context(&config, catalog.len());
        let mut engine = GranularEngine::new(&config, 5);
        let mut bus = MixBus::new(128);
        for _ in 0..1_000 {
            ctx.advance(128);
            bus.begin_block(128);
            engine.render(&mut ctx, &catalog, &mut bus);
            assert!(engine.counts().iter().all(|&c| c <= 3));
            assert_eq!(engine.counts().iter().sum::<usize>(), engine.active_count());
        }
        assert!(engine.active_count() > 0);
    }

    #[test]
    fn gated_category_stops_spawning() {
        let config = EngineConfig::default();
        let catalog = catalog();
        let mut ctx = context(&config, catalog.len());
        for category in Category::ALL {
            ctx.set_category_gain(category, 0.0);
        }
        let mut engine = GranularEngine::new(&config, 5);
        let mut bus = MixBus::new(128);
        for _ in 0..400 {
            ctx.advance(128);
            bus.begin_block(128);
            engine.render(&mut ctx, &catalog, &mut bus);
        }
        assert_eq!(engine.active_count(), 0);
    }

    #[test]
    fn fairness_favours_long_silent_pathways() {
        let mut config = EngineConfig::default();
        config.granular.fairness_weight = 1.0;
        let records = ["A", "B"]
            .into_iter()
            .map(|id| RawPathway {
                id: id.into(),
                n: Some(3),
                d: Some(2),
                category: Some("salvage".into()),
                abundance: Some(1.0),
                ..Default::default()
            })
            .collect();
        let catalog = Catalog::from_records(records).unwrap();
        let mut ctx = context(&config, 2);
        for _ in 0..(20 * 375) {
            ctx.advance(128);
        }
        ctx.mark_sounded(0);

        let mut engine = GranularEngine::new(&config, 9);
        let mut picks = [0u32; 2];
        for _ in 0..10_000 {
            let e = engine.choose_source(&ctx, &catalog, Category::Salvage).unwrap();
            picks[e] += 1;
        }
        assert!(picks[1] > picks[0], "{picks:?}");
        assert_eq!(engine.choose_source(&ctx, &catalog, Category::Energy), None);
    }
}
