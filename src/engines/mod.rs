// src/engines/mod.rs
//
// Sound engines. Each renders one block at a time into the shared mix
// bus, reading the shared context and the current catalog.

pub mod drone;
pub mod focus;
pub mod granular;
pub mod reference;

use std::fmt;

use crate::audio_buffer::MixBus;
use crate::catalog::Catalog;
use crate::context::SharedContext;

pub use drone::{DroneEngine, DroneVoice, consonance_decay};
pub use focus::FocusEngine;
pub use granular::GranularEngine;
pub use reference::ReferenceEngine;

/// Amplitude below which a voice is not rendered.
pub const AUDIBILITY_FLOOR: f32 = 1e-6;

/// A block renderer driven by the orchestrator.
///
/// `render` runs on the audio thread: it must not allocate, lock or block,
/// and its cost must be bounded by the engine's voice caps.
pub trait SoundEngine {
    fn render(&mut self, ctx: &mut SharedContext, catalog: &Catalog, bus: &mut MixBus);

    /// Set the engine's output level (glides, never steps).
    fn set_mix_level(&mut self, level: f32);

    fn mix_level(&self) -> f32;

    /// Voices or grains currently sounding.
    fn active_count(&self) -> usize;

    /// Drop all transient state (e.g. after a dataset swap).
    fn reset(&mut self);
}

/// Engine addressed by set-engine-mix-level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Reference,
    Drone,
    Granular,
    Focus,
}

impl EngineKind {
    pub const ALL: [EngineKind; 4] = [
        EngineKind::Reference,
        EngineKind::Drone,
        EngineKind::Granular,
        EngineKind::Focus,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EngineKind::Reference => "reference",
            EngineKind::Drone => "drone",
            EngineKind::Granular => "granular",
            EngineKind::Focus => "focus",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        EngineKind::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(name))
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Derive an engine's RNG seed from the session seed.
pub(crate) fn engine_seed(seed: u64, kind: EngineKind) -> u64 {
    seed ^ (0x9E37_79B9_7F4A_7C15u64.wrapping_mul(kind.index() as u64 + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_names_round_trip() {
        for kind in EngineKind::ALL {
            assert_eq!(EngineKind::parse(kind.name()), Some(kind));
        }
        assert_eq!(EngineKind::parse(" Drone "), Some(EngineKind::Drone));
        assert_eq!(EngineKind::parse("reverb"), None);
    }
}
