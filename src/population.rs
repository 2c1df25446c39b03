// src/population.rs
//
// The bundle built off the audio thread on dataset reload and swapped in
// whole: catalog, drone voices and the per-entity tables.

use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::context::EntityTables;
use crate::engines::DroneVoice;
use crate::state::ComparisonTable;

const MAX_CASCADE_OFFSET: f32 = 0.12;

#[derive(Debug)]
pub struct Population {
    pub generation: u64,
    pub catalog: Arc<Catalog>,
    /// Drone voice `i` sounds entity `i`.
    pub voices: Vec<DroneVoice>,
    pub tables: EntityTables,
}

impl Population {
    /// Build everything the audio thread needs for `catalog`.
    pub fn build(catalog: Arc<Catalog>, config: &EngineConfig, generation: u64) -> Self {
        let seed = config.seed.unwrap_or_default() ^ generation.wrapping_mul(0xA24B_AED4_963E_E407);
        let mut rng = SmallRng::seed_from_u64(seed);

        let voices: Vec<DroneVoice> = catalog
            .entities()
            .iter()
            .take(config.drone.max_voices)
            .enumerate()
            .map(|(i, e)| DroneVoice::new(i, e, &config.drone, &mut rng))
            .collect();

        let mut tables = EntityTables::new(catalog.len());
        let entities = catalog.entities();
        tables
            .cascade_order
            .sort_by_key(|&i| entities[i as usize].ratio.complexity());
        for offset in &mut tables.cascade_offset {
            *offset = rng.random_range(0.0..MAX_CASCADE_OFFSET);
        }

        Self {
            generation,
            catalog,
            voices,
            tables,
        }
    }

    /// Install comparison entries resolved against this population.
    pub fn with_comparison(mut self, table: ComparisonTable) -> Self {
        if table.generation == self.generation && table.entries.len() == self.tables.len() {
            self.tables.comparison = table.entries;
        }
        self
    }
}
