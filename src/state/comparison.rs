// src/state/comparison.rs
//
// Per-entity comparison data (e.g. a health-state comparison), keyed by
// entity id on the control side and by catalog index on the audio side.

use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;

/// Which way an affected entity moved in the comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[serde(alias = "ms", alias = "dysregulated", alias = "up")]
    Elevated,
    #[serde(alias = "healthy", alias = "down")]
    Depleted,
}

/// Comparison data for one affected entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComparisonEntry {
    #[serde(alias = "enrichedIn")]
    pub direction: Direction,
    /// Effect size, clamped to 0..1 when resolved.
    #[serde(default = "default_magnitude", alias = "ldaScore")]
    pub magnitude: f32,
}

fn default_magnitude() -> f32 {
    0.5
}

impl ComparisonEntry {
    pub fn new(direction: Direction, magnitude: f32) -> Self {
        Self {
            direction,
            magnitude: if magnitude.is_finite() {
                magnitude.clamp(0.0, 1.0)
            } else {
                default_magnitude()
            },
        }
    }
}

/// Comparison map from entity id, as supplied by a control message.
pub type ComparisonMap = HashMap<String, ComparisonEntry>;

/// Parse a JSON object `{ "<id>": { "direction": ..., "magnitude": ... } }`.
pub fn parse_comparison_json(text: &str) -> Result<ComparisonMap, serde_json::Error> {
    serde_json::from_str(text)
}

/// Comparison entries resolved to catalog indices for one population.
///
/// Built on the control thread; the audio thread swaps its storage in.
#[derive(Debug, Clone)]
pub struct ComparisonTable {
    pub generation: u64,
    pub entries: Vec<Option<ComparisonEntry>>,
}

impl ComparisonTable {
    pub fn resolve(catalog: &Catalog, generation: u64, map: &ComparisonMap) -> Self {
        let mut entries = vec![None; catalog.len()];
        for (id, entry) in map {
            match catalog.index_of(id) {
                Some(index) => entries[index] = Some(ComparisonEntry::new(entry.direction, entry.magnitude)),
                None => warn!("comparison data for unknown pathway {id:?}"),
            }
        }
        Self {
            generation,
            entries,
        }
    }

    pub fn affected_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_source_style_keys() {
        let map = parse_comparison_json(
            r#"{
                "a": {"direction": "elevated", "magnitude": 1.0},
                "b": {"enrichedIn": "healthy", "ldaScore": 3.5},
                "c": {"direction": "ms"}
            }"#,
        )
        .unwrap();
        assert_eq!(map["a"].direction, Direction::Elevated);
        assert_eq!(map["b"].direction, Direction::Depleted);
        assert_eq!(map["c"].magnitude, 0.5);

        let catalog = Catalog::from_json(
            r#"[{"id":"a","ratio":"1/1"},{"id":"b","ratio":"3/2"},{"id":"z","ratio":"2/1"}]"#,
        )
        .unwrap();
        let table = ComparisonTable::resolve(&catalog, 3, &map);
        assert_eq!(table.generation, 3);
        assert_eq!(table.affected_count(), 2);
        assert_eq!(table.entries[1].map(|e| e.magnitude), Some(1.0));
        assert!(table.entries[2].is_none());
    }
}
