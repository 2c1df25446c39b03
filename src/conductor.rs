// src/conductor.rs
//
// Activity conductor: a four-phase cycle modeled on the migrating motor
// complex. Each phase owns a share of the cycle and a target activity
// vector; the live vector eases toward the current target every block.

use serde::Serialize;

use crate::config::{ConductorConfig, MAX_CYCLE_SECS, MIN_CYCLE_SECS, PhaseConfig};
use crate::context::SharedContext;
use crate::dsp::ease_coefficient;

/// Conductor phase, in cycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConductorPhase {
    Quiescent,
    Increasing,
    Active,
    Decreasing,
}

impl ConductorPhase {
    pub const ALL: [ConductorPhase; 4] = [
        ConductorPhase::Quiescent,
        ConductorPhase::Increasing,
        ConductorPhase::Active,
        ConductorPhase::Decreasing,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ConductorPhase::Quiescent => "quiescent",
            ConductorPhase::Increasing => "increasing",
            ConductorPhase::Active => "active",
            ConductorPhase::Decreasing => "decreasing",
        }
    }

    #[inline]
    pub fn next(self) -> Self {
        match self {
            ConductorPhase::Quiescent => ConductorPhase::Increasing,
            ConductorPhase::Increasing => ConductorPhase::Active,
            ConductorPhase::Active => ConductorPhase::Decreasing,
            ConductorPhase::Decreasing => ConductorPhase::Quiescent,
        }
    }

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

/// Named activity scalars (0..1) consumed by the engines.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ActivityLevels {
    pub drone: f32,
    pub granular: f32,
    pub chorus: f32,
    pub delay: f32,
}

impl ActivityLevels {
    pub const INITIAL: ActivityLevels = ActivityLevels {
        drone: 1.0,
        granular: 0.5,
        chorus: 0.5,
        delay: 0.5,
    };

    pub const FULL: ActivityLevels = ActivityLevels {
        drone: 1.0,
        granular: 1.0,
        chorus: 1.0,
        delay: 1.0,
    };

    fn from_phase(phase: &PhaseConfig) -> Self {
        Self {
            drone: phase.drone,
            granular: phase.granular,
            chorus: phase.chorus,
            delay: phase.delay,
        }
    }

    fn lerp_from(base: f32, target: &ActivityLevels, amount: f32) -> Self {
        let mix = |t: f32| base + (t - base) * amount;
        Self {
            drone: mix(target.drone),
            granular: mix(target.granular),
            chorus: mix(target.chorus),
            delay: mix(target.delay),
        }
    }

    fn ease_toward(&mut self, target: &ActivityLevels, coeff: f32) {
        self.drone += (target.drone - self.drone) * coeff;
        self.granular += (target.granular - self.granular) * coeff;
        self.chorus += (target.chorus - self.chorus) * coeff;
        self.delay += (target.delay - self.delay) * coeff;
    }
}

impl Default for ActivityLevels {
    fn default() -> Self {
        Self::INITIAL
    }
}

pub struct Conductor {
    phase: ConductorPhase,
    phase_elapsed: f32,
    cycle_secs: f32,
    intensity: f32,
    base_level: f32,
    smoothing_secs: f32,
    fractions: [f32; 4],
    targets: [ActivityLevels; 4],
}

impl Conductor {
    pub fn new(config: &ConductorConfig) -> Self {
        let phases = [
            &config.quiescent,
            &config.increasing,
            &config.active,
            &config.decreasing,
        ];
        let total: f32 = phases.iter().map(|p| p.fraction).sum();
        Self {
            phase: ConductorPhase::Quiescent,
            phase_elapsed: 0.0,
            cycle_secs: config.cycle_secs.clamp(MIN_CYCLE_SECS, MAX_CYCLE_SECS),
            intensity: config.intensity.clamp(0.0, 1.0),
            base_level: config.base_level,
            smoothing_secs: config.smoothing_secs,
            fractions: phases.map(|p| p.fraction / total.max(f32::EPSILON)),
            targets: phases.map(ActivityLevels::from_phase),
        }
    }

    /// Advance by the context's block time and ease its activity levels.
    pub fn update(&mut self, ctx: &mut SharedContext) {
        let dt = ctx.dt();
        self.phase_elapsed += dt;

        // A shortened cycle may leave several phases already expired.
        for _ in 0..ConductorPhase::ALL.len() {
            let duration = self.phase_duration(self.phase);
            if self.phase_elapsed < duration {
                break;
            }
            self.phase_elapsed -= duration;
            self.phase = self.phase.next();
        }
        self.phase_elapsed = self.phase_elapsed.min(self.phase_duration(self.phase));

        let target = self.target();
        ctx.activity
            .ease_toward(&target, ease_coefficient(dt, self.smoothing_secs));
        ctx.phase = self.phase;
    }

    /// Instantaneous target: phase vector pulled toward the flat base by
    /// `1 - intensity`.
    pub fn target(&self) -> ActivityLevels {
        ActivityLevels::lerp_from(
            self.base_level,
            &self.targets[self.phase.index()],
            self.intensity,
        )
    }

    #[inline]
    fn phase_duration(&self, phase: ConductorPhase) -> f32 {
        self.fractions[phase.index()] * self.cycle_secs
    }

    pub fn set_intensity(&mut self, intensity: f32) {
        if intensity.is_finite() {
            self.intensity = intensity.clamp(0.0, 1.0);
        }
    }

    /// Change the cycle length without restarting the current phase.
    pub fn set_cycle_secs(&mut self, secs: f32) {
        if secs.is_finite() {
            self.cycle_secs = secs.clamp(MIN_CYCLE_SECS, MAX_CYCLE_SECS);
        }
    }

    #[inline]
    pub fn phase(&self) -> ConductorPhase {
        self.phase
    }

    #[inline]
    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    #[inline]
    pub fn cycle_secs(&self) -> f32 {
        self.cycle_secs
    }

    #[inline]
    pub fn phase_elapsed(&self) -> f32 {
        self.phase_elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn run(conductor: &mut Conductor, ctx: &mut SharedContext, secs: f32) {
        let blocks = (secs / ctx.dt_for(128)).round() as usize;
        for _ in 0..blocks {
            ctx.advance(128);
            conductor.update(ctx);
        }
    }

    #[test]
    fn walks_through_all_phases_in_order() {
        let config = EngineConfig::default();
        let mut ctx = SharedContext::new(&config);
        let mut conductor = Conductor::new(&config.conductor);
        let mut seen = vec![conductor.phase()];
        let blocks = (90.0 / ctx.dt_for(128)) as usize + 10;
        for _ in 0..blocks {
            ctx.advance(128);
            conductor.update(&mut ctx);
            if *seen.last().unwrap() != conductor.phase() {
                seen.push(conductor.phase());
            }
        }
        assert_eq!(
            seen,
            vec![
                ConductorPhase::Quiescent,
                ConductorPhase::Increasing,
                ConductorPhase::Active,
                ConductorPhase::Decreasing,
                ConductorPhase::Quiescent,
            ]
        );
    }

    #[test]
    fn zero_intensity_flattens_activity() {
        let config = EngineConfig::default();
        let mut ctx = SharedContext::new(&config);
        let mut conductor = Conductor::new(&config.conductor);
        conductor.set_intensity(0.0);
        run(&mut conductor, &mut ctx, 2.0);
        let a = ctx.activity;
        for level in [a.drone, a.granular, a.chorus, a.delay] {
            assert!((level - 0.5).abs() < 1e-3, "{level}");
        }
    }

    #[test]
    fn full_intensity_reaches_phase_targets() {
        let config = EngineConfig::default();
        let mut ctx = SharedContext::new(&config);
        let mut conductor = Conductor::new(&config.conductor);
        conductor.set_intensity(1.0);
        run(&mut conductor, &mut ctx, 5.0);
        assert_eq!(conductor.phase(), ConductorPhase::Quiescent);
        assert!((ctx.activity.granular - 0.3).abs() < 1e-3);
    }

    #[test]
    fn cycle_change_keeps_phase_and_clamps() {
        let config = EngineConfig::default();
        let mut ctx = SharedContext::new(&config);
        let mut conductor = Conductor::new(&config.conductor);
        run(&mut conductor, &mut ctx, 20.0);
        let elapsed = conductor.phase_elapsed();
        conductor.set_cycle_secs(1000.0);
        assert_eq!(conductor.cycle_secs(), MAX_CYCLE_SECS);
        assert_eq!(conductor.phase(), ConductorPhase::Quiescent);
        assert_eq!(conductor.phase_elapsed(), elapsed);

        // Shrinking below the elapsed time moves on rather than restarting.
        conductor.set_cycle_secs(MIN_CYCLE_SECS);
        run(&mut conductor, &mut ctx, 0.01);
        assert_ne!(conductor.phase(), ConductorPhase::Quiescent);
    }
}
