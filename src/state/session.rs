// src/state/session.rs
//
// Session state.
//
// The Session is the control thread's record of what the engine should be
// doing, kept in control-side terms so it survives dataset reloads.

use std::sync::Arc;

use crate::catalog::{Catalog, Category};
use crate::config::{EngineConfig, MAX_CYCLE_SECS, MIN_CYCLE_SECS};
use crate::engines::EngineKind;

use super::ComparisonMap;

/// Complete desired state of one sonification session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Current catalog (shared with the audio thread's population).
    pub catalog: Option<Arc<Catalog>>,

    /// Generation of the last population sent.
    pub generation: u64,

    pub fundamental: f32,
    pub master_volume: f32,

    /// Focused pathway id; re-resolved after every reload.
    pub focus: Option<String>,

    pub category_gains: [f32; Category::COUNT],

    pub comparison_enabled: bool,

    /// Comparison data by pathway id; re-resolved after every reload.
    pub comparison: ComparisonMap,

    pub conductor_intensity: f32,
    pub conductor_cycle_secs: f32,

    /// Mix level per engine, indexed by `EngineKind::index`.
    pub engine_mix: [f32; 4],

    /// Last master fade went out.
    pub faded_out: bool,

    pub drone_solo: bool,
}

impl Session {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            catalog: None,
            generation: 0,
            fundamental: config.context.fundamental,
            master_volume: config.context.master_volume,
            focus: None,
            category_gains: [1.0; Category::COUNT],
            comparison_enabled: false,
            comparison: ComparisonMap::new(),
            conductor_intensity: config.conductor.intensity,
            conductor_cycle_secs: config.conductor.cycle_secs.clamp(MIN_CYCLE_SECS, MAX_CYCLE_SECS),
            engine_mix: [
                config.reference.mix,
                config.drone.mix,
                config.granular.mix,
                config.focus.mix,
            ],
            faded_out: false,
            drone_solo: false,
        }
    }

    /// Catalog index of the focused pathway in the current catalog.
    pub fn focus_index(&self) -> Option<usize> {
        let id = self.focus.as_deref()?;
        self.catalog.as_ref()?.index_of(id)
    }

    pub fn engine_mix(&self, engine: EngineKind) -> f32 {
        self.engine_mix[engine.index()]
    }

    pub fn entity_count(&self) -> usize {
        self.catalog.as_ref().map_or(0, |c| c.len())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

/// Read-only engine state for display.
///
/// Updated by the audio thread through atomics, read by the control side.
#[derive(Debug, Clone, Default)]
pub struct EngineReadback {
    /// Frames rendered since start.
    pub sample_position: u64,

    /// Drone voices with at least one active layer.
    pub active_voices: usize,

    pub active_grains: usize,

    /// Peak levels per channel of the last block (for meters).
    pub output_peaks: [f32; 2],

    /// Non-finite samples replaced so far.
    pub non_finite_samples: u64,

    /// Whether a dataset is loaded and sounding.
    pub running: bool,
}
