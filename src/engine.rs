// src/engine.rs

use std::sync::Arc;

use log::debug;
use rand::SeedableRng;
use rand::rngs::SmallRng;

use crate::audio_buffer::MixBus;
use crate::cascade::CascadeFade;
use crate::catalog::Catalog;
use crate::conductor::Conductor;
use crate::config::EngineConfig;
use crate::context::{FocusState, SharedContext};
use crate::engines::{
    DroneEngine, EngineKind, FocusEngine, GranularEngine, ReferenceEngine, SoundEngine,
};
use crate::population::Population;
use crate::post::PostProcessor;
use crate::state::{Command, ReadyReport, Report, Retired, TelemetrySnapshot};

const POST_SALT: u64 = 0x5EED_0F_C0_4B05;

/// Result of a render call. Rendering never fails; there is no stop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    Continue,
}

/// Real-time sonification engine.
///
/// This struct runs exclusively on the audio thread.
/// It must be deterministic, allocation-free, and lock-free once a
/// population is installed. Control messages arrive through [`apply`].
///
/// [`apply`]: Engine::apply
pub struct Engine {
    ctx: SharedContext,
    conductor: Conductor,
    cascade: CascadeFade,

    reference: ReferenceEngine,
    drone: DroneEngine,
    granular: GranularEngine,
    focus: FocusEngine,

    post: PostProcessor,
    bus: MixBus,

    catalog: Arc<Catalog>,
    generation: u64,
    loaded: bool,

    telemetry_interval: f32,
    since_report: f32,
    ready_pending: bool,

    /// Frames rendered since construction.
    sample_pos: u64,
}

impl Engine {
    pub fn new(config: &EngineConfig) -> Self {
        let seed = config.seed.unwrap_or_default();
        let block = config.block_size.max(1);
        let mut post_rng = SmallRng::seed_from_u64(seed ^ POST_SALT);
        Self {
            ctx: SharedContext::new(config),
            conductor: Conductor::new(&config.conductor),
            cascade: CascadeFade::default(),
            reference: ReferenceEngine::new(config),
            drone: DroneEngine::new(config, seed),
            granular: GranularEngine::new(config, seed),
            focus: FocusEngine::new(config),
            post: PostProcessor::new(&config.post, config.sample_rate, &mut post_rng),
            bus: MixBus::new(block),
            catalog: Arc::new(Catalog::default()),
            generation: 0,
            loaded: false,
            telemetry_interval: config.telemetry.interval_secs.max(0.001),
            since_report: 0.0,
            ready_pending: false,
            sample_pos: 0,
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Control
    // ───────────────────────────────────────────────────────────────

    /// Apply one control message. Anything replaced is returned so the
    /// caller can hand it back for dropping off the audio thread.
    pub fn apply(&mut self, cmd: Command) -> Option<Retired> {
        match cmd {
            Command::LoadDataset(population) => Some(self.install(population)),
            Command::SetFundamental(hz) => {
                self.ctx.set_fundamental(hz);
                None
            }
            Command::SetMasterVolume(volume) => {
                self.ctx.set_master_volume(volume);
                None
            }
            Command::SetCategoryGain { category, gain } => {
                self.ctx.set_category_gain(category, gain);
                None
            }
            Command::SetEngineMixLevel { engine, level } => {
                self.engine_mut(engine).set_mix_level(level);
                None
            }
            Command::MasterFade {
                direction,
                duration_secs,
            } => {
                self.ctx.start_master_fade(direction, duration_secs);
                None
            }
            Command::SetDroneSolo { solo, duck } => {
                self.ctx.set_drone_solo(solo, duck);
                None
            }
            Command::SetFocus(entity) => {
                self.ctx.set_focus(entity);
                None
            }
            Command::Excite(entity) => {
                self.drone.excite(entity, &self.catalog);
                None
            }
            Command::SetComparisonMode { enabled, table } => {
                self.ctx.set_comparison_enabled(enabled);
                table.map(|mut table| {
                    if table.generation == self.generation
                        && table.entries.len() == self.ctx.tables.len()
                    {
                        std::mem::swap(&mut self.ctx.tables.comparison, &mut table.entries);
                    }
                    Retired::Comparison(table)
                })
            }
            Command::CascadeFade {
                direction,
                duration_secs,
            } => {
                self.cascade.start(direction, duration_secs);
                None
            }
            Command::SetConductorIntensity(intensity) => {
                self.conductor.set_intensity(intensity);
                None
            }
            Command::SetConductorCycleLength(secs) => {
                self.conductor.set_cycle_secs(secs);
                None
            }
        }
    }

    /// Swap in a new population; the old one travels back in the same box.
    fn install(&mut self, mut population: Box<Population>) -> Retired {
        let p = &mut *population;
        std::mem::swap(&mut self.ctx.tables, &mut p.tables);
        std::mem::swap(&mut self.catalog, &mut p.catalog);
        std::mem::swap(&mut self.generation, &mut p.generation);
        self.drone.swap_voices(&mut p.voices);

        self.ctx.focus = FocusState::default();
        self.cascade.stop();
        self.reference.reset();
        self.granular.reset();
        self.focus.reset();
        self.post.reset();

        self.loaded = !self.catalog.is_empty();
        self.ready_pending = true;
        Retired::Population(population)
    }

    fn engine_mut(&mut self, kind: EngineKind) -> &mut dyn SoundEngine {
        match kind {
            EngineKind::Reference => &mut self.reference,
            EngineKind::Drone => &mut self.drone,
            EngineKind::Granular => &mut self.granular,
            EngineKind::Focus => &mut self.focus,
        }
    }

    pub fn engine(&self, kind: EngineKind) -> &dyn SoundEngine {
        match kind {
            EngineKind::Reference => &self.reference,
            EngineKind::Drone => &self.drone,
            EngineKind::Granular => &self.granular,
            EngineKind::Focus => &self.focus,
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Rendering
    // ───────────────────────────────────────────────────────────────

    /// Render `left.len()` frames (channels of equal length) in chunks of
    /// at most one block. `observer` receives telemetry as it falls due.
    ///
    /// Called once per audio callback. It must not allocate or block.
    pub fn render<F>(&mut self, left: &mut [f32], right: &mut [f32], mut observer: F) -> RenderStatus
    where
        F: FnMut(&Report),
    {
        let frames = left.len().min(right.len());
        let block = self.bus.capacity();
        let mut offset = 0;
        while offset < frames {
            let n = (frames - offset).min(block);
            self.render_block(&mut left[offset..offset + n], &mut right[offset..offset + n]);
            offset += n;
            while let Some(report) = self.poll_report() {
                observer(&report);
            }
        }
        left[frames..].fill(0.0);
        right[frames..].fill(0.0);
        RenderStatus::Continue
    }

    /// Render one block of `left.len()` frames (at most one bus capacity).
    fn render_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len();
        self.sample_pos += frames as u64;
        if !self.loaded {
            left.fill(0.0);
            right.fill(0.0);
            return;
        }

        self.ctx.advance(frames);
        self.conductor.update(&mut self.ctx);
        self.ctx.update_focus_envelope();
        self.ctx.update_comparison_envelope();
        self.cascade.update(self.ctx.dt(), &mut self.ctx.tables);

        self.bus.begin_block(frames);
        let engines: [&mut dyn SoundEngine; 4] = [
            &mut self.reference,
            &mut self.drone,
            &mut self.granular,
            &mut self.focus,
        ];
        for engine in engines {
            engine.render(&mut self.ctx, &self.catalog, &mut self.bus);
        }
        let fade = self.ctx.master_fade();
        self.post.process(&self.bus, &self.ctx.activity, fade, left, right);
        self.since_report += self.ctx.dt();
    }

    /// Next due report, if any.
    fn poll_report(&mut self) -> Option<Report> {
        if self.ready_pending {
            self.ready_pending = false;
            debug!("population {} installed", self.generation);
            return Some(Report::Ready(ReadyReport {
                generation: self.generation,
                entity_count: self.catalog.len() as u32,
                voice_count: self.drone.voices().len() as u32,
                category_counts: self.catalog.category_counts(),
            }));
        }
        if self.loaded && self.since_report >= self.telemetry_interval {
            self.since_report -= self.telemetry_interval;
            // never queue more than one overdue snapshot
            self.since_report = self.since_report.min(self.telemetry_interval);
            return Some(Report::State(self.snapshot()));
        }
        None
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let layers = self.drone.active_layers();
        TelemetrySnapshot {
            time: self.ctx.time(),
            phase: self.ctx.phase,
            activity: self.ctx.activity,
            focus_entity: self.ctx.focus.entity.map(|e| e as u32),
            focus_envelope: self.ctx.focus.envelope,
            comparison_enabled: self.ctx.comparison.enabled,
            comparison_transition: self.ctx.comparison.transition,
            master_fade: self.ctx.master_fade(),
            solo_duck: self.ctx.solo_duck(),
            drone_voices: self.drone.active_count() as u32,
            active_layers: layers.map(|c| c as u32),
            grains: self.granular.active_count() as u32,
            limiter_gain: self.post.limiter_gain(),
            non_finite_samples: self.post.non_finite_samples(),
        }
    }

    // ───────────────────────────────────────────────────────────────
    // State access
    // ───────────────────────────────────────────────────────────────

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn context(&self) -> &SharedContext {
        &self.ctx
    }

    pub fn conductor(&self) -> &Conductor {
        &self.conductor
    }

    pub fn drone(&self) -> &DroneEngine {
        &self.drone
    }

    pub fn granular(&self) -> &GranularEngine {
        &self.granular
    }

    pub fn reference(&self) -> &ReferenceEngine {
        &self.reference
    }

    pub fn focus_voice(&self) -> &FocusEngine {
        &self.focus
    }

    pub fn post(&self) -> &PostProcessor {
        &self.post
    }

    #[inline]
    pub fn sample_position(&self) -> u64 {
        self.sample_pos
    }

    /// Largest chunk rendered in one pass.
    pub fn block_size(&self) -> usize {
        self.bus.capacity()
    }

    /// Drone voices plus grains currently sounding.
    pub fn active_voices(&self) -> usize {
        self.drone.active_count() + self.granular.active_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::FadeDirection;
    use crate::catalog::RawPathway;
    use crate::state::{ComparisonEntry, ComparisonTable, Direction};

    fn config() -> EngineConfig {
        EngineConfig {
            seed: Some(42),
            ..EngineConfig::default()
        }
    }

    fn population(config: &EngineConfig, generation: u64, n: usize) -> Box<Population> {
        let records = (0..n)
            .map(|i| RawPathway {
                id: format!("PWY-{i}"),
                n: Some(i as u32 + 1),
                d: Some(1),
                category: Some("energy".into()),
                abundance: Some(1.0),
                ..Default::default()
            })
            .collect();
        let catalog = Arc::new(Catalog::from_records(records).unwrap());
        Box::new(Population::build(catalog, config, generation))
    }

    #[test]
    fn silent_until_a_dataset_is_loaded() {
        let mut engine = Engine::new(&config());
        let (mut l, mut r) = (vec![1.0; 300], vec![1.0; 300]);
        let mut reports = 0;
        let status = engine.render(&mut l, &mut r, |_| reports += 1);
        assert_eq!(status, RenderStatus::Continue);
        assert!(l.iter().chain(&r).all(|&s| s == 0.0));
        assert_eq!(reports, 0);
        assert_eq!(engine.sample_position(), 300);
    }

    #[test]
    fn load_retires_previous_population_and_reports_ready() {
        let config = config();
        let mut engine = Engine::new(&config);
        let first = engine.apply(Command::LoadDataset(population(&config, 1, 3)));
        assert!(matches!(first, Some(Retired::Population(p)) if p.catalog.is_empty()));

        engine.apply(Command::SetFocus(Some(2)));
        let second = engine.apply(Command::LoadDataset(population(&config, 2, 5)));
        match second {
            Some(Retired::Population(p)) => {
                assert_eq!(p.generation, 1);
                assert_eq!(p.catalog.len(), 3);
                assert_eq!(p.voices.len(), 3);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(engine.context().focus.entity, None);
        assert_eq!(engine.drone().voices().len(), 5);

        let (mut l, mut r) = (vec![0.0; 128], vec![0.0; 128]);
        let mut ready = None;
        engine.render(&mut l, &mut r, |report| {
            if let Report::Ready(info) = report {
                ready = Some(*info);
            }
        });
        let ready = ready.expect("ready report");
        assert_eq!(ready.generation, 2);
        assert_eq!(ready.entity_count, 5);
        assert_eq!(ready.category_counts[0], 5);
    }

    #[test]
    fn comparison_table_for_another_generation_is_not_installed() {
        let config = config();
        let mut engine = Engine::new(&config);
        engine.apply(Command::LoadDataset(population(&config, 4, 2)));
        let mut entries = vec![None; 2];
        entries[1] = Some(ComparisonEntry::new(Direction::Depleted, 1.0));

        let stale = Box::new(ComparisonTable {
            generation: 3,
            entries: entries.clone(),
        });
        let retired = engine.apply(Command::SetComparisonMode {
            enabled: true,
            table: Some(stale),
        });
        assert!(matches!(retired, Some(Retired::Comparison(_))));
        assert!(engine.context().tables.comparison.iter().all(Option::is_none));

        let fresh = Box::new(ComparisonTable {
            generation: 4,
            entries,
        });
        engine.apply(Command::SetComparisonMode {
            enabled: true,
            table: Some(fresh),
        });
        assert!(engine.context().tables.comparison[1].is_some());
        assert!(engine.context().comparison.enabled);
    }

    #[test]
    fn telemetry_arrives_at_the_configured_rate() {
        let config = config();
        let mut engine = Engine::new(&config);
        engine.apply(Command::LoadDataset(population(&config, 1, 4)));
        let (mut l, mut r) = (vec![0.0; 48_000], vec![0.0; 48_000]);
        let mut states = 0;
        engine.render(&mut l, &mut r, |report| {
            if let Report::State(s) = report {
                assert!(s.limiter_gain > 0.0 && s.limiter_gain <= 1.0);
                states += 1;
            }
        });
        // one second at one snapshot per 33 ms
        assert!((29..=31).contains(&states), "{states}");
        assert!(l.iter().chain(&r).all(|s| s.is_finite() && s.abs() <= 1.0));
    }

    #[test]
    fn reload_clears_effect_tails() {
        let mut config = config();
        config.reference.mix = 0.0;
        let mut engine = Engine::new(&config);
        engine.apply(Command::LoadDataset(population(&config, 1, 6)));
        let (mut l, mut r) = (vec![0.0; 96_000], vec![0.0; 96_000]);
        engine.render(&mut l, &mut r, |_| {});
        assert!(l.iter().any(|&s| s != 0.0));

        engine.apply(Command::MasterFade {
            direction: FadeDirection::Out,
            duration_secs: 1e-3,
        });
        let (mut l, mut r) = (vec![0.0; 128], vec![0.0; 128]);
        engine.render(&mut l, &mut r, |_| {});
        assert_eq!(engine.context().master_fade(), 0.0);

        // Sources are silent from here on; only effect memory could sound.
        engine.apply(Command::LoadDataset(population(&config, 2, 6)));
        let (mut l, mut r) = (vec![1.0; 24_000], vec![1.0; 24_000]);
        engine.render(&mut l, &mut r, |_| {});
        assert!(l.iter().chain(&r).all(|&s| s == 0.0));
    }

    #[test]
    fn drone_solo_leaves_the_drone_at_full_level() {
        let config = config();
        let mut engine = Engine::new(&config);
        engine.apply(Command::LoadDataset(population(&config, 1, 4)));
        engine.apply(Command::SetDroneSolo {
            solo: true,
            duck: Some(0.0),
        });
        let (mut l, mut r) = (vec![0.0; 96_000], vec![0.0; 96_000]);
        engine.render(&mut l, &mut r, |_| {});
        assert!(engine.context().solo_duck() < 1e-3);
        assert!(engine.reference().tone_levels().iter().all(|&a| a < 1e-3));
        assert!(engine.drone().voices().iter().all(|v| v.level() > 0.0));
        assert!(l.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn mix_levels_route_to_the_named_engine() {
        let mut engine = Engine::new(&config());
        engine.apply(Command::SetEngineMixLevel {
            engine: EngineKind::Granular,
            level: 0.5,
        });
        assert_eq!(engine.engine(EngineKind::Granular).mix_level(), 0.5);
        assert_eq!(engine.engine(EngineKind::Drone).mix_level(), config().drone.mix);
    }
}
