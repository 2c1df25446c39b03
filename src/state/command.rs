// Commands from the control thread to the audio thread.
//
// Commands are the ONLY way the control side can mutate engine state.
// They are queued on a lock-free ring and applied between blocks.

use crate::cascade::FadeDirection;
use crate::catalog::Category;
use crate::engines::EngineKind;
use crate::population::Population;

use super::ComparisonTable;

/// A control message for the audio thread.
///
/// Commands are:
/// - Fully resolved (indices, not ids)
/// - Cheap to apply: large payloads arrive prebuilt and boxed
/// - Applied in order, at block boundaries
#[derive(Debug)]
pub enum Command {
    // ═══════════════════════════════════════════
    // Dataset
    // ═══════════════════════════════════════════
    /// Swap in a prebuilt population. The previous one is retired.
    LoadDataset(Box<Population>),

    // ═══════════════════════════════════════════
    // Global levels
    // ═══════════════════════════════════════════
    /// Fundamental frequency in Hz (clamped 20..2000).
    SetFundamental(f32),

    /// Master volume (clamped 0..1, glides).
    SetMasterVolume(f32),

    SetCategoryGain { category: Category, gain: f32 },

    /// Output level of one engine (glides).
    SetEngineMixLevel { engine: EngineKind, level: f32 },

    /// Fade the whole output in or out (non-positive duration: default).
    MasterFade {
        direction: FadeDirection,
        duration_secs: f32,
    },

    /// Solo the drone by ducking every other engine; `duck` replaces the
    /// duck amount when given.
    SetDroneSolo { solo: bool, duck: Option<f32> },

    // ═══════════════════════════════════════════
    // Interaction
    // ═══════════════════════════════════════════
    /// Select a pathway by catalog index, or clear the selection.
    SetFocus(Option<usize>),

    /// Stir a pathway and its harmonic relations.
    Excite(usize),

    /// Enable or disable comparison mode, optionally replacing its table.
    SetComparisonMode {
        enabled: bool,
        table: Option<Box<ComparisonTable>>,
    },

    /// Staggered fade of all pathways in or out.
    CascadeFade {
        direction: FadeDirection,
        duration_secs: f32,
    },

    // ═══════════════════════════════════════════
    // Conductor
    // ═══════════════════════════════════════════
    SetConductorIntensity(f32),

    /// Cycle length in seconds (clamped 30..180).
    SetConductorCycleLength(f32),
}

/// Storage the audio thread replaced, handed back for dropping.
#[derive(Debug)]
pub enum Retired {
    Population(Box<Population>),
    Comparison(Box<ComparisonTable>),
}
