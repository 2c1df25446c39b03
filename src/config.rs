// src/config.rs
//
// Engine configuration.
//
// * Loaded from TOML; every field has a default so the file is optional
//   and may name only what it changes.
// * Values are clamped by `sanitized()` before an engine is built.
//
// The tuned constants of the sonification live here rather than in the
// engines so they can be adjusted without touching DSP code.

use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::catalog::PerCategory;
use crate::error::ConfigError;

pub const MIN_FUNDAMENTAL: f32 = 20.0;
pub const MAX_FUNDAMENTAL: f32 = 2000.0;
pub const MIN_CYCLE_SECS: f32 = 30.0;
pub const MAX_CYCLE_SECS: f32 = 180.0;
pub const MAX_CATEGORY_GAIN: f32 = 2.0;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output sample rate in Hz.
    pub sample_rate: f32,
    /// Internal render block in frames; host buffers are split into blocks
    /// of at most this size.
    pub block_size: usize,
    /// Seed for all stochastic behavior. `None` picks one at startup.
    pub seed: Option<u64>,
    pub context: ContextConfig,
    pub conductor: ConductorConfig,
    pub drone: DroneConfig,
    pub granular: GranularConfig,
    pub reference: ReferenceConfig,
    pub focus: FocusConfig,
    pub post: PostConfig,
    pub telemetry: TelemetryConfig,
    pub bridge: BridgeConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            block_size: 128,
            seed: None,
            context: ContextConfig::default(),
            conductor: ConductorConfig::default(),
            drone: DroneConfig::default(),
            granular: GranularConfig::default(),
            reference: ReferenceConfig::default(),
            focus: FocusConfig::default(),
            post: PostConfig::default(),
            telemetry: TelemetryConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Shared context
// ───────────────────────────────────────────────────────────────

/// Effect send levels for one category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sends {
    pub chorus: f32,
    pub delay: f32,
    #[serde(default)]
    pub reverb: f32,
}

impl Sends {
    pub const NONE: Sends = Sends::new(0.0, 0.0, 0.0);

    pub const fn new(chorus: f32, delay: f32, reverb: f32) -> Self {
        Self {
            chorus,
            delay,
            reverb,
        }
    }

    #[inline]
    pub fn scaled(self, k: f32) -> Self {
        Self::new(self.chorus * k, self.delay * k, self.reverb * k)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub fundamental: f32,
    pub master_volume: f32,
    pub focus_attack_secs: f32,
    pub focus_release_secs: f32,
    /// Gain non-focused material ducks to at full focus.
    pub duck_floor: f32,
    pub comparison_engage_secs: f32,
    pub comparison_release_secs: f32,
    pub comparison_boost_db: f32,
    pub comparison_elevated_extra_db: f32,
    pub comparison_depleted_db: f32,
    pub comparison_unaffected_db: f32,
    pub fairness_decay_secs: f32,
    pub fairness_weight: f32,
    /// Start silent and wait for a master fade in.
    pub start_faded_out: bool,
    /// Default durations of the master fade.
    pub master_fade_in_secs: f32,
    pub master_fade_out_secs: f32,
    /// Gain the other engines duck to while the drone plays solo.
    pub solo_duck: f32,
    /// Rate (1/s) the solo duck eases toward its target.
    pub solo_rate: f32,
    pub sends: PerCategory<Sends>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            fundamental: 660.0,
            master_volume: 0.4,
            focus_attack_secs: 0.15,
            focus_release_secs: 0.4,
            duck_floor: 0.25,
            comparison_engage_secs: 0.33,
            comparison_release_secs: 0.167,
            comparison_boost_db: 10.0,
            comparison_elevated_extra_db: 4.0,
            comparison_depleted_db: -6.0,
            comparison_unaffected_db: -14.0,
            fairness_decay_secs: 15.0,
            fairness_weight: 0.3,
            start_faded_out: false,
            master_fade_in_secs: 2.2,
            master_fade_out_secs: 0.8,
            solo_duck: 0.0,
            solo_rate: 4.0,
            sends: PerCategory {
                energy: Sends::new(0.3, 0.25, 0.3),
                biosynthesis: Sends::new(0.35, 0.3, 0.35),
                degradation: Sends::new(0.25, 0.35, 0.3),
                salvage: Sends::new(0.4, 0.2, 0.4),
                other: Sends::new(0.3, 0.4, 0.3),
                superpathways: Sends::new(0.35, 0.3, 0.45),
            },
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Conductor
// ───────────────────────────────────────────────────────────────

/// Activity levels one conductor phase aims for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseConfig {
    /// Share of the cycle spent in this phase.
    pub fraction: f32,
    pub drone: f32,
    pub granular: f32,
    pub chorus: f32,
    pub delay: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    pub cycle_secs: f32,
    pub intensity: f32,
    /// Flat activity level intensity 0 collapses every phase to.
    pub base_level: f32,
    pub smoothing_secs: f32,
    pub quiescent: PhaseConfig,
    pub increasing: PhaseConfig,
    pub active: PhaseConfig,
    pub decreasing: PhaseConfig,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            cycle_secs: 90.0,
            intensity: 0.7,
            base_level: 0.5,
            smoothing_secs: 0.053,
            quiescent: PhaseConfig {
                fraction: 0.45,
                drone: 1.0,
                granular: 0.3,
                chorus: 0.4,
                delay: 0.5,
            },
            increasing: PhaseConfig {
                fraction: 0.20,
                drone: 1.0,
                granular: 0.6,
                chorus: 0.6,
                delay: 0.6,
            },
            active: PhaseConfig {
                fraction: 0.15,
                drone: 1.0,
                granular: 1.0,
                chorus: 0.8,
                delay: 0.7,
            },
            decreasing: PhaseConfig {
                fraction: 0.20,
                drone: 1.0,
                granular: 0.5,
                chorus: 0.5,
                delay: 0.6,
            },
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Drone
// ───────────────────────────────────────────────────────────────

/// Shape of the long-term consonance decay applied to drone voices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecayCurve {
    Exponential,
    Linear,
    Logarithmic,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub min_secs: f32,
    pub max_secs: f32,
    /// Mean seconds between activations at unit probability.
    pub recurrence_secs: f32,
    pub weight: f32,
    /// Most voices this layer may have active at once.
    pub max_active: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DroneConfig {
    pub max_voices: usize,
    pub mix: f32,
    pub whisper: f32,
    pub ripple_strength: f32,
    pub ripple_speed: f32,
    pub abundance_exponent: f32,
    /// Share of each voice's duration drawn from consonance (rest is random).
    pub consonance_duration_bias: f32,
    pub decay_curve: DecayCurve,
    pub decay_strength: f32,
    pub decay_floor: f32,
    /// n·d at which the linear curve reaches zero (before strength).
    pub decay_linear_cutoff: f32,
    pub habituation_onset_secs: f32,
    pub habituation_max_reduction: f32,
    pub habituation_rate: f32,
    pub habituation_consonance_bias: f32,
    pub habituation_recovery_secs: f32,
    pub excitation_strength: f32,
    pub excitation_spread: f32,
    pub excitation_decay_secs: f32,
    pub excitation_consonance_sensitivity: f32,
    /// Gain of the focused voice at full focus.
    pub focus_boost: f32,
    pub drift_depth: f32,
    pub drift_min_hz: f32,
    pub drift_max_hz: f32,
    pub pan_spread: f32,
    pub send_level: f32,
    pub roots: LayerConfig,
    pub branches: LayerConfig,
    pub leaves: LayerConfig,
}

impl Default for DroneConfig {
    fn default() -> Self {
        Self {
            max_voices: 600,
            mix: 0.18,
            whisper: 0.001715,
            ripple_strength: 0.85,
            ripple_speed: 0.0008,
            abundance_exponent: 1.1,
            consonance_duration_bias: 0.7,
            decay_curve: DecayCurve::Logarithmic,
            decay_strength: 1.0,
            decay_floor: 0.05,
            decay_linear_cutoff: 256.0,
            habituation_onset_secs: 4.0,
            habituation_max_reduction: 0.45,
            habituation_rate: 0.08,
            habituation_consonance_bias: 0.6,
            habituation_recovery_secs: 0.052,
            excitation_strength: 0.6,
            excitation_spread: 0.25,
            excitation_decay_secs: 18.0,
            excitation_consonance_sensitivity: 0.4,
            focus_boost: 1.6,
            drift_depth: 0.12,
            drift_min_hz: 0.03,
            drift_max_hz: 0.12,
            pan_spread: 0.25,
            send_level: 0.2,
            roots: LayerConfig {
                min_secs: 40.0,
                max_secs: 240.0,
                recurrence_secs: 160.0,
                weight: 0.55,
                max_active: 240,
            },
            branches: LayerConfig {
                min_secs: 6.0,
                max_secs: 30.0,
                recurrence_secs: 42.0,
                weight: 0.3,
                max_active: 160,
            },
            leaves: LayerConfig {
                min_secs: 1.6,
                max_secs: 6.0,
                recurrence_secs: 16.0,
                weight: 0.15,
                max_active: 120,
            },
        }
    }
}

impl DroneConfig {
    pub fn layers(&self) -> [&LayerConfig; 3] {
        [&self.roots, &self.branches, &self.leaves]
    }
}

// ───────────────────────────────────────────────────────────────
// Granular
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GranularConfig {
    pub mix: f32,
    pub min_grain_secs: f32,
    pub max_grain_secs: f32,
    /// Grains per second at unit activity.
    pub spawn_rates: PerCategory<f32>,
    pub max_grains: PerCategory<usize>,
    pub consonance_weight: f32,
    pub abundance_weight: f32,
    pub fairness_weight: f32,
    pub attack: f32,
    pub release: f32,
    pub amplitude: f32,
    pub pan_width: f32,
    pub chorus_send: f32,
    pub delay_send: f32,
    pub reverb_send: f32,
    /// Category gain below which a category stops spawning.
    pub gate: f32,
}

impl Default for GranularConfig {
    fn default() -> Self {
        Self {
            mix: 0.08,
            min_grain_secs: 0.03,
            max_grain_secs: 0.08,
            spawn_rates: PerCategory {
                energy: 25.0,
                biosynthesis: 30.0,
                degradation: 20.0,
                salvage: 8.0,
                other: 15.0,
                superpathways: 6.0,
            },
            max_grains: PerCategory {
                energy: 40,
                biosynthesis: 50,
                degradation: 35,
                salvage: 15,
                other: 25,
                superpathways: 10,
            },
            consonance_weight: 0.35,
            abundance_weight: 0.55,
            fairness_weight: 0.2,
            attack: 0.35,
            release: 0.45,
            amplitude: 0.6,
            pan_width: 0.7,
            chorus_send: 0.5,
            delay_send: 0.4,
            reverb_send: 0.9,
            gate: 0.05,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Reference tones
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToneConfig {
    pub ratio: f32,
    pub amplitude: f32,
    pub pan: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    pub mix: f32,
    pub breathing_hz: f32,
    pub breathing_depth: f32,
    /// Reduction of a tone matching the focused pitch, at full focus.
    pub match_duck: f32,
    pub octave_duck: f32,
    pub other_duck: f32,
    pub tones: [ToneConfig; 5],
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        let tone = |ratio, amplitude, pan| ToneConfig {
            ratio,
            amplitude,
            pan,
        };
        Self {
            mix: 0.09,
            breathing_hz: 0.02,
            breathing_depth: 0.06,
            match_duck: 0.85,
            octave_duck: 0.4,
            other_duck: 0.0,
            tones: [
                tone(0.25, 0.06, -0.7),
                tone(0.5, 0.2, -0.35),
                tone(1.0, 1.0, 0.0),
                tone(2.0, 0.2, 0.35),
                tone(4.0, 0.06, 0.7),
            ],
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Focus voice
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusConfig {
    pub mix: f32,
    pub target_volume: f32,
    pub attack_secs: f32,
    pub release_secs: f32,
    /// Relative levels of partials 1, 2 and 3.
    pub partials: [f32; 3],
    pub low_boost: f32,
    pub low_corner_hz: f32,
    pub high_cut: f32,
    pub high_corner_hz: f32,
    pub reverb_send: f32,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            mix: 1.0,
            target_volume: 0.25,
            attack_secs: 0.12,
            release_secs: 0.35,
            partials: [1.0, 0.12, 0.05],
            low_boost: 0.15,
            low_corner_hz: 200.0,
            high_cut: 0.15,
            high_corner_hz: 2000.0,
            reverb_send: 0.4,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Post processing
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChorusConfig {
    pub enabled: bool,
    pub wet: f32,
    pub voices: usize,
    pub depth_secs: f32,
    pub rate_hz: f32,
    pub base_delay_secs: f32,
    pub buffer_secs: f32,
    pub feedback: f32,
}

impl Default for ChorusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            wet: 0.25,
            voices: 3,
            depth_secs: 0.003,
            rate_hz: 0.4,
            base_delay_secs: 0.015,
            buffer_secs: 0.05,
            feedback: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayConfig {
    pub enabled: bool,
    pub wet: f32,
    pub time_secs: f32,
    pub feedback: f32,
    pub damping: f32,
    pub buffer_secs: f32,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            wet: 0.2,
            time_secs: 0.35,
            feedback: 0.4,
            damping: 0.3,
            buffer_secs: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    pub threshold: f32,
    pub release_secs: f32,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            threshold: 0.85,
            release_secs: 0.05,
        }
    }
}

/// Diffuse wash: predelay, four damped combs in parallel, two allpasses
/// in series. Comb lengths are given at 48 kHz and scaled to the rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbConfig {
    pub enabled: bool,
    pub wet: f32,
    /// Time for the comb tails to fall by 60 dB.
    pub decay_secs: f32,
    pub damping: f32,
    pub diffusion: f32,
    pub predelay_secs: f32,
    pub comb_samples: [usize; 4],
    pub allpass_samples: [usize; 2],
}

impl Default for ReverbConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            wet: 0.35,
            decay_secs: 6.5,
            damping: 0.4,
            diffusion: 0.7,
            predelay_secs: 0.02,
            comb_samples: [1557, 1617, 1491, 1422],
            allpass_samples: [225, 556],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostConfig {
    pub chorus: ChorusConfig,
    pub delay: DelayConfig,
    pub reverb: ReverbConfig,
    pub limiter: LimiterConfig,
}

// ───────────────────────────────────────────────────────────────
// Telemetry and bridge
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub interval_secs: f32,
    pub capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval_secs: 0.033,
            capacity: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub command_capacity: usize,
    /// Mix level changes glide over this time to avoid zipper noise.
    pub parameter_glide_secs: f32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command_capacity: 256,
            parameter_glide_secs: 0.05,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════════════════════════════

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(text)?;
        Ok(config.sanitized())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Load `path` if given, falling back to defaults on any error.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match Self::load(path) {
            Ok(config) => {
                info!("loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("{e}; using defaults");
                Self::default()
            }
        }
    }

    /// Clamp every value into the range the engines can handle.
    pub fn sanitized(mut self) -> Self {
        self.sample_rate = finite_or(self.sample_rate, 48_000.0).clamp(8_000.0, 384_000.0);
        self.block_size = self.block_size.clamp(16, 4096);

        let c = &mut self.context;
        c.fundamental = c.fundamental.clamp(MIN_FUNDAMENTAL, MAX_FUNDAMENTAL);
        c.master_volume = c.master_volume.clamp(0.0, 1.0);
        c.focus_attack_secs = c.focus_attack_secs.max(1e-3);
        c.focus_release_secs = c.focus_release_secs.max(1e-3);
        c.duck_floor = c.duck_floor.clamp(0.0, 1.0);
        c.comparison_engage_secs = c.comparison_engage_secs.max(1e-3);
        c.comparison_release_secs = c.comparison_release_secs.max(1e-3);
        c.fairness_decay_secs = c.fairness_decay_secs.max(1e-3);
        c.master_fade_in_secs = c.master_fade_in_secs.max(1e-3);
        c.master_fade_out_secs = c.master_fade_out_secs.max(1e-3);
        c.solo_duck = c.solo_duck.clamp(0.0, 1.0);
        c.solo_rate = c.solo_rate.max(0.0);

        let k = &mut self.conductor;
        k.cycle_secs = k.cycle_secs.clamp(MIN_CYCLE_SECS, MAX_CYCLE_SECS);
        k.intensity = k.intensity.clamp(0.0, 1.0);
        k.smoothing_secs = k.smoothing_secs.max(1e-3);
        for phase in [&mut k.quiescent, &mut k.increasing, &mut k.active, &mut k.decreasing] {
            phase.fraction = phase.fraction.max(1e-3);
        }

        let d = &mut self.drone;
        d.max_voices = d.max_voices.min(4096);
        for layer in [&mut d.roots, &mut d.branches, &mut d.leaves] {
            layer.min_secs = layer.min_secs.max(0.05);
            layer.max_secs = layer.max_secs.max(layer.min_secs);
            layer.recurrence_secs = layer.recurrence_secs.max(1e-3);
        }
        d.habituation_recovery_secs = d.habituation_recovery_secs.max(1e-3);
        d.excitation_decay_secs = d.excitation_decay_secs.max(1e-3);
        d.decay_linear_cutoff = d.decay_linear_cutoff.max(1.0);
        d.drift_max_hz = d.drift_max_hz.max(d.drift_min_hz);

        let g = &mut self.granular;
        g.min_grain_secs = g.min_grain_secs.max(0.005);
        g.max_grain_secs = g.max_grain_secs.max(g.min_grain_secs);
        g.attack = g.attack.clamp(1e-3, 1.0);
        g.release = g.release.clamp(1e-3, 1.0);
        g.pan_width = g.pan_width.clamp(0.0, 1.0);

        let f = &mut self.focus;
        f.attack_secs = f.attack_secs.max(1e-3);
        f.release_secs = f.release_secs.max(1e-3);

        let p = &mut self.post;
        p.chorus.voices = p.chorus.voices.clamp(1, 8);
        p.chorus.feedback = p.chorus.feedback.clamp(0.0, 0.95);
        p.chorus.buffer_secs = p
            .chorus
            .buffer_secs
            .max(p.chorus.base_delay_secs + p.chorus.depth_secs + 0.001);
        p.delay.feedback = p.delay.feedback.clamp(0.0, 0.95);
        p.delay.damping = p.delay.damping.clamp(0.0, 0.99);
        p.delay.buffer_secs = p.delay.buffer_secs.max(p.delay.time_secs + 0.001);
        p.reverb.wet = p.reverb.wet.max(0.0);
        p.reverb.decay_secs = p.reverb.decay_secs.max(0.05);
        p.reverb.damping = p.reverb.damping.clamp(0.0, 0.99);
        p.reverb.diffusion = p.reverb.diffusion.clamp(0.0, 0.9);
        p.reverb.predelay_secs = p.reverb.predelay_secs.clamp(0.0, 0.5);
        for n in p.reverb.comb_samples.iter_mut().chain(&mut p.reverb.allpass_samples) {
            *n = (*n).clamp(1, 48_000);
        }
        p.limiter.threshold = p.limiter.threshold.clamp(0.01, 1.0);
        p.limiter.release_secs = p.limiter.release_secs.max(1e-4);

        self.telemetry.interval_secs = self.telemetry.interval_secs.max(1e-3);
        self.telemetry.capacity = self.telemetry.capacity.max(4);
        self.bridge.command_capacity = self.bridge.command_capacity.max(8);
        self
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() { value } else { fallback }
}
