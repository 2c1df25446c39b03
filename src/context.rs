// src/context.rs
//
// Shared context: the per-session state every engine reads each block.
//
// Owned by the orchestrator on the audio thread. Control messages are
// applied to it between blocks; nothing else mutates it concurrently.

use crate::cascade::FadeDirection;
use crate::catalog::Category;
use crate::conductor::{ActivityLevels, ConductorPhase};
use crate::config::{
    ContextConfig, EngineConfig, MAX_CATEGORY_GAIN, MAX_FUNDAMENTAL, MIN_FUNDAMENTAL, Sends,
};
use crate::dsp::{db_to_gain, ease_coefficient, smoothstep};
use crate::parameter::SmoothedParam;
use crate::state::{ComparisonEntry, Direction};

const FOCUS_SNAP: f32 = 0.001;
const COMPARISON_SNAP: f32 = 0.005;
const COMPARISON_IDLE: f32 = 0.001;

/// Focus record: the selected entity and its eased envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct FocusState {
    pub entity: Option<usize>,
    pub envelope: f32,
    pub target: f32,
}

/// Comparison-mode switch and its eased transition scalar.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComparisonState {
    pub enabled: bool,
    pub transition: f32,
}

/// Whole-output fade. `level` moves linearly toward `target` and is heard
/// through a smoothstep curve.
#[derive(Debug, Clone, Copy)]
pub struct MasterFade {
    pub level: f32,
    pub target: f32,
    /// Level change per second.
    rate: f32,
}

impl Default for MasterFade {
    fn default() -> Self {
        Self {
            level: 1.0,
            target: 1.0,
            rate: 1.0,
        }
    }
}

/// Drone solo: every other engine ducks to `duck` while active.
#[derive(Debug, Clone, Copy)]
pub struct DroneSolo {
    pub active: bool,
    pub duck: f32,
    /// Eased gain the non-drone engines apply.
    pub gain: f32,
}

/// Per-entity tables, sized to the current population and replaced with it.
#[derive(Debug, Clone, Default)]
pub struct EntityTables {
    /// Context time each entity last sounded as a grain.
    pub last_sounded: Vec<f64>,
    pub comparison: Vec<Option<ComparisonEntry>>,
    /// Cascade fade gain per entity.
    pub fade: Vec<f32>,
    /// Entity indices ordered most consonant first.
    pub cascade_order: Vec<u32>,
    /// Random start offset per cascade rank.
    pub cascade_offset: Vec<f32>,
}

impl EntityTables {
    pub fn new(len: usize) -> Self {
        Self {
            last_sounded: vec![0.0; len],
            comparison: vec![None; len],
            fade: vec![1.0; len],
            cascade_order: (0..len as u32).collect(),
            cascade_offset: vec![0.0; len],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.last_sounded.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.last_sounded.is_empty()
    }
}

pub struct SharedContext {
    config: ContextConfig,
    sample_rate: f32,
    frames: usize,
    dt: f32,
    time: f64,
    fundamental: f32,
    master: SmoothedParam,
    category_gain: [f32; Category::COUNT],
    sends: [Sends; Category::COUNT],
    pub focus: FocusState,
    pub comparison: ComparisonState,
    pub fade: MasterFade,
    pub solo: DroneSolo,
    pub activity: ActivityLevels,
    pub phase: ConductorPhase,
    pub tables: EntityTables,
}

impl SharedContext {
    pub fn new(config: &EngineConfig) -> Self {
        let c = &config.context;
        Self {
            sample_rate: config.sample_rate,
            frames: config.block_size,
            dt: config.block_size as f32 / config.sample_rate,
            time: 0.0,
            fundamental: c.fundamental.clamp(MIN_FUNDAMENTAL, MAX_FUNDAMENTAL),
            master: SmoothedParam::new(c.master_volume.clamp(0.0, 1.0), config.bridge.parameter_glide_secs),
            category_gain: [1.0; Category::COUNT],
            sends: c.sends.to_array(),
            focus: FocusState::default(),
            comparison: ComparisonState::default(),
            fade: if c.start_faded_out {
                MasterFade {
                    level: 0.0,
                    target: 0.0,
                    ..MasterFade::default()
                }
            } else {
                MasterFade::default()
            },
            solo: DroneSolo {
                active: false,
                duck: c.solo_duck.clamp(0.0, 1.0),
                gain: 1.0,
            },
            activity: ActivityLevels::INITIAL,
            phase: ConductorPhase::Quiescent,
            tables: EntityTables::default(),
            config: c.clone(),
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Clock
    // ───────────────────────────────────────────────────────────────

    /// Advance the clock by one block of `frames` frames.
    pub fn advance(&mut self, frames: usize) {
        self.frames = frames;
        self.dt = frames as f32 / self.sample_rate;
        self.time += self.dt as f64;
        self.master.advance(self.dt);
        self.update_master_fade();
        self.update_solo();
    }

    #[inline]
    pub fn dt(&self) -> f32 {
        self.dt
    }

    /// Block duration for `frames` frames at the context's sample rate.
    #[inline]
    pub fn dt_for(&self, frames: usize) -> f32 {
        frames as f32 / self.sample_rate
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn time(&self) -> f64 {
        self.time
    }

    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    // ───────────────────────────────────────────────────────────────
    // Global levels
    // ───────────────────────────────────────────────────────────────

    #[inline]
    pub fn fundamental(&self) -> f32 {
        self.fundamental
    }

    pub fn set_fundamental(&mut self, hz: f32) {
        if hz.is_finite() {
            self.fundamental = hz.clamp(MIN_FUNDAMENTAL, MAX_FUNDAMENTAL);
        }
    }

    /// Master volume at the end of the current block.
    #[inline]
    pub fn master_volume(&self) -> f32 {
        self.master.value()
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        if volume.is_finite() {
            self.master.set_target(volume.clamp(0.0, 1.0));
        }
    }

    /// Master volume times the audible master fade: the global gain every
    /// engine applies.
    #[inline]
    pub fn master_gain(&self) -> f32 {
        self.master.value() * self.master_fade()
    }

    /// Audible master fade gain in 0..=1.
    #[inline]
    pub fn master_fade(&self) -> f32 {
        smoothstep(self.fade.level)
    }

    /// Fade the whole output in or out. A non-positive or non-finite
    /// duration uses the configured default for the direction.
    pub fn start_master_fade(&mut self, direction: FadeDirection, duration_secs: f32) {
        let (target, default) = match direction {
            FadeDirection::In => (1.0, self.config.master_fade_in_secs),
            FadeDirection::Out => (0.0, self.config.master_fade_out_secs),
        };
        let duration = if duration_secs.is_finite() && duration_secs > 0.0 {
            duration_secs
        } else {
            default
        };
        self.fade.target = target;
        self.fade.rate = 1.0 / duration.max(1e-3);
    }

    fn update_master_fade(&mut self) {
        let f = &mut self.fade;
        let step = f.rate * self.dt;
        if f.level < f.target {
            f.level = (f.level + step).min(f.target);
        } else if f.level > f.target {
            f.level = (f.level - step).max(f.target);
        }
    }

    /// Solo the drone: the other engines duck to `duck` (or the last duck
    /// amount when `None`). Releasing the solo eases them back to unity.
    pub fn set_drone_solo(&mut self, active: bool, duck: Option<f32>) {
        self.solo.active = active;
        if let Some(duck) = duck.filter(|d| d.is_finite()) {
            self.solo.duck = duck.clamp(0.0, 1.0);
        }
    }

    /// Gain applied by every engine except the drone.
    #[inline]
    pub fn solo_duck(&self) -> f32 {
        self.solo.gain
    }

    fn update_solo(&mut self) {
        let s = &mut self.solo;
        let target = if s.active { s.duck } else { 1.0 };
        let coeff = (self.config.solo_rate * self.dt).min(1.0);
        s.gain = (s.gain + (target - s.gain) * coeff).clamp(0.0, 1.0);
    }

    #[inline]
    pub fn category_gain(&self, category: Category) -> f32 {
        self.category_gain[category.index()]
    }

    pub fn set_category_gain(&mut self, category: Category, gain: f32) {
        if gain.is_finite() {
            self.category_gain[category.index()] = gain.clamp(0.0, MAX_CATEGORY_GAIN);
        }
    }

    #[inline]
    pub fn sends(&self, category: Category) -> Sends {
        self.sends[category.index()]
    }

    // ───────────────────────────────────────────────────────────────
    // Focus
    // ───────────────────────────────────────────────────────────────

    /// Select an entity (or none). Indices outside the population clear focus.
    pub fn set_focus(&mut self, entity: Option<usize>) {
        let entity = entity.filter(|&e| e < self.tables.len());
        self.focus.entity = entity;
        self.focus.target = if entity.is_some() { 1.0 } else { 0.0 };
    }

    /// Ease the focus envelope toward its target; attack is faster than release.
    pub fn update_focus_envelope(&mut self) {
        let f = &mut self.focus;
        let coeff = if f.target > f.envelope {
            ease_coefficient(self.dt * 3.0, self.config.focus_attack_secs)
        } else {
            ease_coefficient(self.dt * 2.5, self.config.focus_release_secs)
        };
        f.envelope = (f.envelope + (f.target - f.envelope) * coeff).clamp(0.0, 1.0);
        if f.target == 0.0 && f.envelope < FOCUS_SNAP {
            f.envelope = 0.0;
        }
    }

    /// Gain applied to everything that is not the focused entity.
    #[inline]
    pub fn focus_duck_gain(&self) -> f32 {
        1.0 - (1.0 - self.config.duck_floor) * self.focus.envelope
    }

    #[inline]
    pub fn is_focused(&self, entity: usize) -> bool {
        self.focus.entity == Some(entity)
    }

    // ───────────────────────────────────────────────────────────────
    // Comparison mode
    // ───────────────────────────────────────────────────────────────

    pub fn set_comparison_enabled(&mut self, enabled: bool) {
        self.comparison.enabled = enabled;
    }

    /// Ease the transition scalar; engaging is slower than disengaging.
    pub fn update_comparison_envelope(&mut self) {
        let c = &mut self.comparison;
        let (target, tau) = if c.enabled {
            (1.0, self.config.comparison_engage_secs)
        } else {
            (0.0, self.config.comparison_release_secs)
        };
        c.transition =
            (c.transition + (target - c.transition) * ease_coefficient(self.dt, tau)).clamp(0.0, 1.0);
        if !c.enabled && c.transition < COMPARISON_SNAP {
            c.transition = 0.0;
        }
    }

    /// Multiplicative gain for `entity` under the current comparison state.
    pub fn comparison_scale(&self, entity: usize) -> f32 {
        let t = self.comparison.transition;
        if t < COMPARISON_IDLE {
            return 1.0;
        }
        let c = &self.config;
        match self.tables.comparison.get(entity).copied().flatten() {
            Some(ComparisonEntry {
                direction: Direction::Elevated,
                magnitude,
            }) => {
                db_to_gain((c.comparison_boost_db + c.comparison_elevated_extra_db * magnitude) * t)
                    * (1.0 + 0.5 * magnitude * t)
            }
            Some(ComparisonEntry {
                direction: Direction::Depleted,
                magnitude,
            }) => db_to_gain(c.comparison_depleted_db * magnitude * t),
            None => db_to_gain(c.comparison_unaffected_db * t),
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Fairness
    // ───────────────────────────────────────────────────────────────

    #[inline]
    pub fn mark_sounded(&mut self, entity: usize) {
        if let Some(t) = self.tables.last_sounded.get_mut(entity) {
            *t = self.time;
        }
    }

    /// Bonus growing with time since `entity` last sounded, saturating.
    #[inline]
    pub fn fairness_bonus(&self, entity: usize) -> f32 {
        let last = self.tables.last_sounded.get(entity).copied().unwrap_or(0.0);
        let since = (self.time - last).max(0.0) as f32;
        (since / self.config.fairness_decay_secs).min(1.0) * self.config.fairness_weight
    }

    #[inline]
    pub fn cascade_fade(&self, entity: usize) -> f32 {
        self.tables.fade.get(entity).copied().unwrap_or(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(len: usize) -> SharedContext {
        let mut ctx = SharedContext::new(&EngineConfig::default());
        ctx.tables = EntityTables::new(len);
        ctx
    }

    fn step(ctx: &mut SharedContext) {
        ctx.advance(128);
        ctx.update_focus_envelope();
        ctx.update_comparison_envelope();
    }

    #[test]
    fn focus_envelope_is_monotonic_and_snaps_to_zero() {
        let mut ctx = context(4);
        ctx.set_focus(Some(2));
        let mut last = 0.0;
        for _ in 0..400 {
            step(&mut ctx);
            assert!(ctx.focus.envelope >= last);
            assert!(ctx.focus.envelope <= 1.0);
            last = ctx.focus.envelope;
        }
        assert!(last > 0.99);

        ctx.set_focus(None);
        let mut blocks = 0;
        while ctx.focus.envelope > 0.0 {
            step(&mut ctx);
            assert!(ctx.focus.envelope <= last);
            last = ctx.focus.envelope;
            blocks += 1;
            assert!(blocks < 2_000, "release never reached zero");
        }
        assert_eq!(ctx.focus.envelope, 0.0);
    }

    #[test]
    fn duck_gain_stays_within_floor_and_unity() {
        let mut ctx = context(2);
        assert_eq!(ctx.focus_duck_gain(), 1.0);
        ctx.set_focus(Some(0));
        for _ in 0..1_000 {
            step(&mut ctx);
            let g = ctx.focus_duck_gain();
            assert!(g > 0.25 - 1e-6 && g <= 1.0);
        }
    }

    #[test]
    fn out_of_range_focus_clears_selection() {
        let mut ctx = context(2);
        ctx.set_focus(Some(5));
        assert_eq!(ctx.focus.entity, None);
        assert_eq!(ctx.focus.target, 0.0);
    }

    #[test]
    fn comparison_scale_orders_elevated_depleted_unaffected() {
        let mut ctx = context(3);
        ctx.tables.comparison[0] = Some(ComparisonEntry::new(Direction::Elevated, 1.0));
        ctx.tables.comparison[1] = Some(ComparisonEntry::new(Direction::Depleted, 1.0));
        assert_eq!(ctx.comparison_scale(0), 1.0);

        ctx.set_comparison_enabled(true);
        for _ in 0..2_000 {
            step(&mut ctx);
        }
        assert!(ctx.comparison.transition > 0.99);
        let (elevated, depleted, unaffected) =
            (ctx.comparison_scale(0), ctx.comparison_scale(1), ctx.comparison_scale(2));
        assert!(elevated > 1.0);
        assert!(depleted < 1.0);
        assert!(unaffected < depleted);

        ctx.set_comparison_enabled(false);
        for _ in 0..2_000 {
            step(&mut ctx);
        }
        assert_eq!(ctx.comparison.transition, 0.0);
        assert_eq!(ctx.comparison_scale(0), 1.0);
    }

    #[test]
    fn comparison_engages_slower_than_it_releases() {
        let mut ctx = context(1);
        ctx.set_comparison_enabled(true);
        for _ in 0..20 {
            step(&mut ctx);
        }
        let rise = ctx.comparison.transition;
        for _ in 0..2_000 {
            step(&mut ctx);
        }
        ctx.set_comparison_enabled(false);
        for _ in 0..20 {
            step(&mut ctx);
        }
        let fall = 1.0 - ctx.comparison.transition;
        assert!(fall > rise);
    }

    #[test]
    fn fairness_bonus_grows_then_saturates() {
        let mut ctx = context(2);
        for _ in 0..375 {
            ctx.advance(128);
        }
        ctx.mark_sounded(0);
        assert!(ctx.fairness_bonus(0) < 1e-6);
        assert!(ctx.fairness_bonus(1) > 0.0);
        for _ in 0..(20 * 375) {
            ctx.advance(128);
        }
        assert!((ctx.fairness_bonus(0) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn master_fade_is_linear_in_time_and_smoothstep_in_gain() {
        let mut ctx = context(1);
        assert_eq!(ctx.master_fade(), 1.0);
        // 1.2 s at 128 frames per block is 450 blocks
        ctx.start_master_fade(FadeDirection::Out, 1.2);
        let mut last = 1.0;
        for block in 1..=450 {
            ctx.advance(128);
            let g = ctx.master_fade();
            assert!(g <= last);
            last = g;
            if block == 225 {
                assert!((ctx.fade.level - 0.5).abs() < 1e-3);
                assert!((g - 0.5).abs() < 1e-3);
            }
        }
        assert!(last < 1e-4);
        ctx.advance(128);
        assert_eq!(ctx.master_fade(), 0.0);
        assert_eq!(ctx.master_gain(), 0.0);

        ctx.start_master_fade(FadeDirection::In, f32::NAN);
        for _ in 0..((2.2 * 375.0) as usize + 2) {
            ctx.advance(128);
        }
        assert_eq!(ctx.master_fade(), 1.0);
        assert!((ctx.master_gain() - ctx.master_volume()).abs() < 1e-6);
    }

    #[test]
    fn starting_faded_out_waits_for_a_fade_in() {
        let mut config = EngineConfig::default();
        config.context.start_faded_out = true;
        let mut ctx = SharedContext::new(&config);
        for _ in 0..100 {
            ctx.advance(128);
        }
        assert_eq!(ctx.master_gain(), 0.0);
        ctx.start_master_fade(FadeDirection::In, 0.5);
        ctx.advance(128);
        assert!(ctx.master_fade() > 0.0);
    }

    #[test]
    fn drone_solo_eases_the_duck_in_and_out() {
        let mut ctx = context(1);
        assert_eq!(ctx.solo_duck(), 1.0);
        ctx.set_drone_solo(true, Some(0.2));
        let mut last = 1.0;
        for _ in 0..375 {
            ctx.advance(128);
            assert!(ctx.solo_duck() <= last);
            last = ctx.solo_duck();
        }
        // one second at 4/s leaves exp(-4) of the distance
        assert!((last - 0.2).abs() < 0.8 * 0.03);

        ctx.set_drone_solo(false, None);
        assert_eq!(ctx.solo.duck, 0.2);
        for _ in 0..3_000 {
            ctx.advance(128);
        }
        assert!((ctx.solo_duck() - 1.0).abs() < 1e-4);
        ctx.set_drone_solo(true, Some(-3.0));
        assert_eq!(ctx.solo.duck, 0.0);
    }

    #[test]
    fn control_values_are_clamped() {
        let mut ctx = context(1);
        ctx.set_fundamental(1.0);
        assert_eq!(ctx.fundamental(), MIN_FUNDAMENTAL);
        ctx.set_fundamental(f32::NAN);
        assert_eq!(ctx.fundamental(), MIN_FUNDAMENTAL);
        ctx.set_category_gain(Category::Salvage, 9.0);
        assert_eq!(ctx.category_gain(Category::Salvage), MAX_CATEGORY_GAIN);
    }
}
