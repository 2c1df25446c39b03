// src/catalog.rs
//
// Entity catalog: one immutable record per pathway, built once per dataset
// on the control thread and shared with the audio thread behind an `Arc`.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::DatasetError;

/// Smallest abundance the catalog will store. Keeps `powf` and the
/// weighted selectors away from zero.
pub const MIN_ABUNDANCE: f32 = 1e-4;

/// Abundance assumed for records that carry none.
const DEFAULT_ABUNDANCE: f64 = 0.5;

/// Exponent mapping abundance to base volume.
const BASE_VOLUME_EXPONENT: f32 = 1.5;

/// Denominator used when a ratio arrives as a plain number.
const NUMERIC_RATIO_DENOMINATOR: u32 = 12;

const MAX_RELATIONS: usize = 8;
const SUBCATEGORY_RELATION: f32 = 0.7;
const CONSONANT_RELATION_THRESHOLD: f32 = 0.6;

// ═══════════════════════════════════════════════════════════════════
// Category
// ═══════════════════════════════════════════════════════════════════

/// Functional category of a pathway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Energy,
    Biosynthesis,
    Degradation,
    Salvage,
    Other,
    Superpathways,
}

impl Category {
    pub const COUNT: usize = 6;

    pub const ALL: [Category; Category::COUNT] = [
        Category::Energy,
        Category::Biosynthesis,
        Category::Degradation,
        Category::Salvage,
        Category::Other,
        Category::Superpathways,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Category::Energy => "energy",
            Category::Biosynthesis => "biosynthesis",
            Category::Degradation => "degradation",
            Category::Salvage => "salvage",
            Category::Other => "other",
            Category::Superpathways => "superpathways",
        }
    }

    /// Parse a category label, case-insensitively.
    pub fn parse(label: &str) -> Option<Self> {
        let label = label.trim();
        Category::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(label))
    }

    /// Parse a label, substituting `Other` for anything unknown.
    pub fn parse_or_other(label: &str) -> Self {
        Self::parse(label).unwrap_or_else(|| {
            warn!("unknown category {label:?}, using \"other\"");
            Category::Other
        })
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value stored once per category, addressable by [`Category`].
///
/// Serialized with one named field per category so TOML tables stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerCategory<T> {
    pub energy: T,
    pub biosynthesis: T,
    pub degradation: T,
    pub salvage: T,
    pub other: T,
    pub superpathways: T,
}

impl<T: Copy> PerCategory<T> {
    pub const fn splat(value: T) -> Self {
        Self {
            energy: value,
            biosynthesis: value,
            degradation: value,
            salvage: value,
            other: value,
            superpathways: value,
        }
    }

    #[inline]
    pub fn get(&self, category: Category) -> T {
        match category {
            Category::Energy => self.energy,
            Category::Biosynthesis => self.biosynthesis,
            Category::Degradation => self.degradation,
            Category::Salvage => self.salvage,
            Category::Other => self.other,
            Category::Superpathways => self.superpathways,
        }
    }

    pub fn to_array(&self) -> [T; Category::COUNT] {
        Category::ALL.map(|c| self.get(c))
    }
}

// ═══════════════════════════════════════════════════════════════════
// Ratio
// ═══════════════════════════════════════════════════════════════════

/// A just-intonation ratio n/d, always reduced and positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ratio {
    pub n: u32,
    pub d: u32,
}

impl Ratio {
    pub const UNISON: Ratio = Ratio { n: 1, d: 1 };

    /// Build a reduced ratio; zero terms fall back to unison.
    pub fn new(n: u32, d: u32) -> Self {
        if n == 0 || d == 0 {
            return Self::UNISON;
        }
        let g = gcd(n, d);
        Self { n: n / g, d: d / g }
    }

    /// Approximate a positive float on a twelfths grid.
    pub fn from_value(value: f64) -> Option<Self> {
        if !value.is_finite() || value <= 0.0 {
            return None;
        }
        let d = NUMERIC_RATIO_DENOMINATOR;
        let n = (value * d as f64).round().max(1.0);
        if n > u32::MAX as f64 {
            return None;
        }
        Some(Self::new(n as u32, d))
    }

    /// Parse `"n/d"` or a decimal string.
    pub fn parse(text: &str) -> Option<(Self, f64)> {
        let text = text.trim();
        if let Some((n, d)) = text.split_once('/') {
            let n: u32 = n.trim().parse().ok()?;
            let d: u32 = d.trim().parse().ok()?;
            if n == 0 || d == 0 {
                return None;
            }
            let ratio = Self::new(n, d);
            return Some((ratio, ratio.value()));
        }
        let value: f64 = text.parse().ok()?;
        Self::from_value(value).map(|r| (r, value))
    }

    #[inline]
    pub fn value(self) -> f64 {
        self.n as f64 / self.d as f64
    }

    /// n·d, the complexity measure consonance is derived from.
    #[inline]
    pub fn complexity(self) -> u64 {
        self.n as u64 * self.d as u64
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.n, self.d)
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}

/// Consonance score: 1/√(n·d). Monotonically decreasing in n·d.
#[inline]
pub fn consonance_score(ratio: Ratio) -> f32 {
    (1.0 / (ratio.complexity().max(1) as f64).sqrt()) as f32
}

/// Closeness of an interval to a small set of simple intervals after
/// folding it into one octave. Used to link related entities.
///
/// Symmetric: `a/b` and `b/a` score the same, so relations are mutual.
fn interval_affinity(ratio: f64) -> f32 {
    if ratio <= 0.0 || !ratio.is_finite() {
        return 0.0;
    }
    folded_affinity(ratio).max(folded_affinity(ratio.recip()))
}

fn folded_affinity(ratio: f64) -> f32 {
    const SIMPLE: [f64; 8] = [1.0, 1.5, 1.333, 1.25, 1.2, 1.667, 1.125, 1.0625];
    let folded = 2f64.powf(ratio.log2().rem_euclid(1.0));
    SIMPLE
        .iter()
        .map(|s| (-(folded - s).abs() * 10.0).exp())
        .fold(0.0, f64::max) as f32
}

// ═══════════════════════════════════════════════════════════════════
// Raw payload
// ═══════════════════════════════════════════════════════════════════

/// Ratio as it appears in ingested data: `"3/2"`, `"1.5"` or `1.5`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawRatio {
    Number(f64),
    Text(String),
}

/// One record of the initialize-with-dataset payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPathway {
    pub id: String,
    #[serde(default)]
    pub ratio: Option<RawRatio>,
    #[serde(default)]
    pub n: Option<u32>,
    #[serde(default)]
    pub d: Option<u32>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default, alias = "amplitude")]
    pub abundance: Option<f64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DatasetDocument {
    Wrapped { pathways: Vec<RawPathway> },
    Bare(Vec<RawPathway>),
}

// ═══════════════════════════════════════════════════════════════════
// Catalog
// ═══════════════════════════════════════════════════════════════════

/// One pathway, immutable once the catalog is built.
#[derive(Debug, Clone)]
pub struct PathwayEntity {
    pub id: String,
    pub ratio: Ratio,
    /// Exact frequency multiplier (may differ from `ratio` for numeric input).
    pub ratio_value: f32,
    pub category: Category,
    pub subcategory: String,
    /// Normalized so the most abundant entity is 1.
    pub abundance: f32,
    pub base_volume: f32,
    pub consonance: f32,
}

/// Link between two entities, by catalog index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Relation {
    pub index: usize,
    pub strength: f32,
}

/// Read-only set of entities with lookup tables.
#[derive(Debug, Default)]
pub struct Catalog {
    entities: Vec<PathwayEntity>,
    by_id: HashMap<String, usize>,
    by_category: [Vec<usize>; Category::COUNT],
    relations: Vec<Vec<Relation>>,
}

impl Catalog {
    /// Build from raw records, recovering malformed fields locally.
    pub fn from_records(records: Vec<RawPathway>) -> Result<Self, DatasetError> {
        let mut staged = Vec::with_capacity(records.len());
        let mut by_id = HashMap::with_capacity(records.len());

        for raw in records {
            if by_id.contains_key(&raw.id) {
                warn!("duplicate pathway id {:?}, keeping the first", raw.id);
                continue;
            }
            let (ratio, ratio_value) = resolve_ratio(&raw);
            let category = raw
                .category
                .as_deref()
                .map(Category::parse_or_other)
                .unwrap_or(Category::Other);
            let subcategory = raw
                .subcategory
                .clone()
                .unwrap_or_else(|| category.name().to_string());
            let abundance = match raw.abundance {
                Some(a) if a.is_finite() => a,
                Some(_) => {
                    warn!("non-finite abundance for {:?}", raw.id);
                    DEFAULT_ABUNDANCE
                }
                None => DEFAULT_ABUNDANCE,
            };
            by_id.insert(raw.id.clone(), staged.len());
            staged.push((raw.id, ratio, ratio_value, category, subcategory, abundance));
        }

        if staged.is_empty() {
            return Err(DatasetError::Empty);
        }

        let max_abundance = staged
            .iter()
            .map(|s| s.5)
            .fold(0.0_f64, f64::max);
        let scale = if max_abundance > 0.0 { 1.0 / max_abundance } else { 1.0 };

        let entities: Vec<PathwayEntity> = staged
            .into_iter()
            .map(|(id, ratio, ratio_value, category, subcategory, abundance)| {
                let abundance = ((abundance * scale) as f32).clamp(MIN_ABUNDANCE, 1.0);
                PathwayEntity {
                    id,
                    ratio,
                    ratio_value,
                    category,
                    subcategory,
                    abundance,
                    base_volume: abundance.powf(BASE_VOLUME_EXPONENT),
                    consonance: consonance_score(ratio),
                }
            })
            .collect();

        let mut by_category: [Vec<usize>; Category::COUNT] = Default::default();
        for (i, e) in entities.iter().enumerate() {
            by_category[e.category.index()].push(i);
        }

        let relations = build_relations(&entities);

        debug!(
            "catalog built: {} entities, {} categories in use",
            entities.len(),
            by_category.iter().filter(|c| !c.is_empty()).count()
        );

        Ok(Self {
            entities,
            by_id,
            by_category,
            relations,
        })
    }

    /// Parse a JSON payload: either an array of records or `{"pathways": [...]}`.
    pub fn from_json(text: &str) -> Result<Self, DatasetError> {
        let records = match serde_json::from_str::<DatasetDocument>(text)? {
            DatasetDocument::Wrapped { pathways } => pathways,
            DatasetDocument::Bare(pathways) => pathways,
        };
        Self::from_records(records)
    }

    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let text = std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&PathwayEntity> {
        self.entities.get(index)
    }

    #[inline]
    pub fn entities(&self) -> &[PathwayEntity] {
        &self.entities
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    /// Entity indices belonging to `category`, in catalog order.
    #[inline]
    pub fn in_category(&self, category: Category) -> &[usize] {
        &self.by_category[category.index()]
    }

    #[inline]
    pub fn relations(&self, index: usize) -> &[Relation] {
        self.relations.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of entities per category.
    pub fn category_counts(&self) -> [u32; Category::COUNT] {
        std::array::from_fn(|i| self.by_category[i].len() as u32)
    }
}

fn resolve_ratio(raw: &RawPathway) -> (Ratio, f32) {
    if let (Some(n), Some(d)) = (raw.n, raw.d) {
        if n > 0 && d > 0 {
            let ratio = Ratio::new(n, d);
            return (ratio, ratio.value() as f32);
        }
    }
    let parsed = match &raw.ratio {
        Some(RawRatio::Number(v)) => Ratio::from_value(*v).map(|r| (r, *v)),
        Some(RawRatio::Text(t)) => Ratio::parse(t),
        None => None,
    };
    match parsed {
        Some((ratio, value)) => (ratio, value as f32),
        None => {
            warn!("unusable ratio for {:?}, using 1/1", raw.id);
            (Ratio::UNISON, 1.0)
        }
    }
}

fn build_relations(entities: &[PathwayEntity]) -> Vec<Vec<Relation>> {
    let mut by_subcategory: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, e) in entities.iter().enumerate() {
        by_subcategory.entry(e.subcategory.as_str()).or_default().push(i);
    }

    entities
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let mut relations: Vec<Relation> = by_subcategory
                .get(e.subcategory.as_str())
                .into_iter()
                .flatten()
                .filter(|&&j| j != i)
                .map(|&j| Relation {
                    index: j,
                    strength: SUBCATEGORY_RELATION,
                })
                .collect();

            for (j, other) in entities.iter().enumerate() {
                if j == i {
                    continue;
                }
                let affinity = interval_affinity(e.ratio_value as f64 / other.ratio_value as f64);
                if affinity <= CONSONANT_RELATION_THRESHOLD {
                    continue;
                }
                // A sibling may also be consonant: one entry, strongest link.
                match relations.iter_mut().find(|r| r.index == j) {
                    Some(existing) => existing.strength = existing.strength.max(affinity),
                    None => relations.push(Relation {
                        index: j,
                        strength: affinity,
                    }),
                }
            }

            relations.sort_by(|a, b| b.strength.total_cmp(&a.strength));
            relations.truncate(MAX_RELATIONS);
            relations
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: &str, ratio: &str, category: &str, abundance: f64) -> RawPathway {
        RawPathway {
            id: id.into(),
            ratio: Some(RawRatio::Text(ratio.into())),
            category: Some(category.into()),
            abundance: Some(abundance),
            ..Default::default()
        }
    }

    #[test]
    fn parses_fraction_and_decimal_ratios() {
        assert_eq!(Ratio::parse("3/2").map(|r| r.0), Some(Ratio { n: 3, d: 2 }));
        assert_eq!(Ratio::parse("6/4").map(|r| r.0), Some(Ratio { n: 3, d: 2 }));
        let (r, v) = Ratio::parse("1.5").unwrap();
        assert_eq!(r, Ratio { n: 3, d: 2 });
        assert_eq!(v, 1.5);
        assert!(Ratio::parse("x/2").is_none());
        assert!(Ratio::parse("0/2").is_none());
        assert!(Ratio::parse("-1").is_none());
    }

    #[test]
    fn malformed_fields_fall_back_to_defaults() {
        let catalog = Catalog::from_records(vec![
            raw("a", "banana", "nonsense", 1.0),
            raw("b", "-2", "energy", -3.0),
        ])
        .unwrap();

        let a = catalog.get(0).unwrap();
        assert_eq!(a.ratio, Ratio::UNISON);
        assert_eq!(a.category, Category::Other);

        let b = catalog.get(1).unwrap();
        assert_eq!(b.ratio, Ratio::UNISON);
        assert!(b.abundance >= MIN_ABUNDANCE);
        assert!(b.base_volume.is_finite());
    }

    #[test]
    fn abundance_is_normalized_to_the_maximum() {
        let catalog = Catalog::from_records(vec![
            raw("a", "1/1", "energy", 4.0),
            raw("b", "3/2", "energy", 2.0),
        ])
        .unwrap();
        assert_eq!(catalog.get(0).unwrap().abundance, 1.0);
        assert!((catalog.get(1).unwrap().abundance - 0.5).abs() < 1e-6);
        assert!((catalog.get(1).unwrap().base_volume - 0.5f32.powf(1.5)).abs() < 1e-6);
    }

    #[test]
    fn consonance_orders_by_complexity() {
        let ratios = [(1, 1), (2, 1), (3, 2), (5, 4), (9, 8), (15, 8), (45, 32)];
        for a in ratios {
            for b in ratios {
                let (ra, rb) = (Ratio::new(a.0, a.1), Ratio::new(b.0, b.1));
                if ra.complexity() < rb.complexity() {
                    assert!(consonance_score(ra) >= consonance_score(rb), "{ra} vs {rb}");
                }
            }
        }
    }

    #[test]
    fn json_accepts_wrapped_and_bare_documents() {
        let bare = r#"[{"id":"x","ratio":"5/4","category":"Salvage","amplitude":0.2}]"#;
        let wrapped = r#"{"pathways":[{"id":"x","ratio":1.25,"category":"salvage"}]}"#;
        let a = Catalog::from_json(bare).unwrap();
        let b = Catalog::from_json(wrapped).unwrap();
        assert_eq!(a.get(0).unwrap().ratio, Ratio { n: 5, d: 4 });
        assert_eq!(b.get(0).unwrap().ratio, Ratio { n: 5, d: 4 });
        assert_eq!(a.get(0).unwrap().category, Category::Salvage);
        assert_eq!(a.in_category(Category::Salvage), &[0]);
        assert!(matches!(Catalog::from_json("[]"), Err(DatasetError::Empty)));
    }

    #[test]
    fn duplicate_ids_keep_the_first_record() {
        let catalog = Catalog::from_records(vec![
            raw("a", "1/1", "energy", 1.0),
            raw("a", "2/1", "energy", 1.0),
        ])
        .unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.index_of("a"), Some(0));
    }

    #[test]
    fn relations_link_siblings_and_consonant_intervals() {
        let catalog = Catalog::from_records(vec![
            raw("root", "1/1", "energy", 1.0),
            raw("fifth", "3/2", "degradation", 1.0),
            raw("odd", "17/16", "salvage", 1.0),
        ])
        .unwrap();
        let rel = catalog.relations(0);
        assert!(rel.len() <= MAX_RELATIONS);
        assert!(rel.iter().any(|r| r.index == 1));
        assert!(rel.windows(2).all(|w| w[0].strength >= w[1].strength));
    }

    #[test]
    fn consonant_siblings_appear_once_with_the_stronger_link() {
        let catalog = Catalog::from_records(vec![
            raw("unison", "1/1", "energy", 1.0),
            raw("fifth", "3/2", "energy", 1.0),
            raw("third", "5/4", "energy", 1.0),
        ])
        .unwrap();
        for i in 0..catalog.len() {
            let rel = catalog.relations(i);
            let mut indices: Vec<usize> = rel.iter().map(|r| r.index).collect();
            indices.sort_unstable();
            indices.dedup();
            assert_eq!(indices.len(), rel.len(), "duplicate relation on {i}");
            assert!(rel.iter().all(|r| r.strength >= SUBCATEGORY_RELATION));
        }
        // 1/1 vs 3/2 is a perfect fifth: affinity 1.0 beats the sibling link.
        let fifth = catalog.relations(0).iter().find(|r| r.index == 1).unwrap();
        assert!(fifth.strength > SUBCATEGORY_RELATION);
    }

    #[test]
    fn interval_relations_are_mutual() {
        for (a, b) in [(1.0, 1.25), (1.0, 1.5), (1.0, 1.2), (1.5, 1.875)] {
            let up = interval_affinity(a / b);
            let down = interval_affinity(b / a);
            assert!((up - down).abs() < 1e-6, "{a}/{b}: {up} vs {down}");
        }
        let catalog = Catalog::from_records(vec![
            raw("unison", "1/1", "energy", 1.0),
            raw("third", "5/4", "degradation", 1.0),
        ])
        .unwrap();
        assert!(catalog.relations(0).iter().any(|r| r.index == 1));
        assert!(catalog.relations(1).iter().any(|r| r.index == 0));
    }
}
