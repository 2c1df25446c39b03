// Telemetry from the audio thread.
//
// Reports are plain `Copy` values so they can be pushed through a
// preallocated ring without allocation.

use serde::Serialize;

use crate::catalog::Category;
use crate::conductor::{ActivityLevels, ConductorPhase};

/// Periodic engine state.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TelemetrySnapshot {
    /// Engine time in seconds.
    pub time: f64,
    pub phase: ConductorPhase,
    pub activity: ActivityLevels,
    pub focus_entity: Option<u32>,
    pub focus_envelope: f32,
    pub comparison_enabled: bool,
    pub comparison_transition: f32,
    /// Audible master fade gain.
    pub master_fade: f32,
    /// Gain of the non-drone engines under drone solo.
    pub solo_duck: f32,
    /// Drone voices with at least one active layer.
    pub drone_voices: u32,
    /// Active layers per tier: roots, branches, leaves.
    pub active_layers: [u32; 3],
    pub grains: u32,
    pub limiter_gain: f32,
    pub non_finite_samples: u64,
}

/// Sent once after a dataset swap.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReadyReport {
    pub generation: u64,
    pub entity_count: u32,
    pub voice_count: u32,
    pub category_counts: [u32; Category::COUNT],
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Report {
    Ready(ReadyReport),
    State(TelemetrySnapshot),
}
