//! Thread-safe bridge between the control side and the audio engine.
//!
//! # Architecture
//!
//! - **Control thread** owns [`SessionHandle`] with the local [`Session`] mirror
//! - **Audio thread** owns [`EngineHandle`] with the [`Engine`]
//! - Three lock-free SPSC rings connect them: commands in, retired storage
//!   and telemetry out. Readback values are published through atomics.
//!
//! # Usage
//!
//! ```ignore
//! let (mut session, mut engine) = create_bridge(EngineConfig::default());
//!
//! // Control thread: load data and steer
//! session.load_dataset_json(&json)?;
//! session.set_focus(Some("PWY-101"))?;
//!
//! // Audio thread: drain commands and render, once per callback
//! engine.render(&mut left, &mut right);
//! ```

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::path::Path;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
};

use log::{debug, info, warn};
use ringbuf::{HeapCons, HeapProd, HeapRb, traits::*};

use crate::cascade::FadeDirection;
use crate::catalog::{Catalog, Category};
use crate::config::EngineConfig;
use crate::engine::{Engine, RenderStatus};
use crate::engines::{EngineKind, SoundEngine};
use crate::error::BridgeError;
use crate::population::Population;
use crate::state::{
    Command, ComparisonMap, ComparisonTable, EngineReadback, Report, Retired, Session,
    parse_comparison_json,
};

/// Retired payloads in flight at once (datasets and comparison tables).
const RETIRE_CAPACITY: usize = 16;

/// Handle for the control thread to communicate with the engine.
///
/// This is the interface host applications talk to. All methods are safe
/// to call from a non-real-time thread; none of them block.
pub struct SessionHandle {
    /// Desired state, in control-side terms.
    session: Session,

    config: EngineConfig,

    command_tx: HeapProd<Command>,

    /// Storage the audio thread has replaced, to be dropped here.
    retire_rx: HeapCons<Retired>,

    telemetry_rx: HeapCons<Report>,

    /// Shared readback state (updated by engine, read by control side).
    readback: Arc<SharedReadback>,
}

/// Handle for the audio thread containing the engine and its rings.
pub struct EngineHandle {
    engine: Engine,

    command_rx: HeapCons<Command>,
    retire_tx: HeapProd<Retired>,
    telemetry_tx: HeapProd<Report>,

    /// A retired payload that did not fit in the ring. While set, no more
    /// commands are drained.
    pending_retire: Option<Retired>,

    dropped_reports: u64,

    /// Planar scratch for interleaved rendering.
    scratch: [Vec<f32>; 2],

    readback: Arc<SharedReadback>,
}

/// Lock-free shared state for engine -> control readback.
struct SharedReadback {
    sample_position: AtomicU64,
    active_voices: AtomicU64,
    active_grains: AtomicU64,
    /// Peaks stored as f32 bits (no AtomicF32 in std)
    peak_left_bits: AtomicU32,
    peak_right_bits: AtomicU32,
    non_finite_samples: AtomicU64,
    running: AtomicBool,
}

impl SharedReadback {
    fn new() -> Self {
        Self {
            sample_position: AtomicU64::new(0),
            active_voices: AtomicU64::new(0),
            active_grains: AtomicU64::new(0),
            peak_left_bits: AtomicU32::new(0.0_f32.to_bits()),
            peak_right_bits: AtomicU32::new(0.0_f32.to_bits()),
            non_finite_samples: AtomicU64::new(0),
            running: AtomicBool::new(false),
        }
    }
}

fn entropy_seed() -> u64 {
    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(0x6D65_7461);
    hasher.finish()
}

/// Create a linked pair of handles for control and audio threads.
///
/// A missing `config.seed` is drawn once here so both sides share it.
pub fn create_bridge(config: EngineConfig) -> (SessionHandle, EngineHandle) {
    let mut config = config.sanitized();
    let seed = *config.seed.get_or_insert_with(entropy_seed);
    debug!("bridge seed {seed:#018x}");

    let (command_tx, command_rx) = HeapRb::<Command>::new(config.bridge.command_capacity.max(1)).split();
    let (retire_tx, retire_rx) = HeapRb::<Retired>::new(RETIRE_CAPACITY).split();
    let (telemetry_tx, telemetry_rx) = HeapRb::<Report>::new(config.telemetry.capacity.max(1)).split();
    let readback = Arc::new(SharedReadback::new());
    let block = config.block_size.max(1);

    let engine_handle = EngineHandle {
        engine: Engine::new(&config),
        command_rx,
        retire_tx,
        telemetry_tx,
        pending_retire: None,
        dropped_reports: 0,
        scratch: [vec![0.0; block], vec![0.0; block]],
        readback: Arc::clone(&readback),
    };

    let session_handle = SessionHandle {
        session: Session::new(&config),
        config,
        command_tx,
        retire_rx,
        telemetry_rx,
        readback,
    };

    (session_handle, engine_handle)
}

// ═══════════════════════════════════════════════════════════════════
// SessionHandle - Control Thread API
// ═══════════════════════════════════════════════════════════════════

impl SessionHandle {
    /// Get a reference to the current session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Send a command to the engine.
    ///
    /// Also updates the local session mirror for immediate feedback.
    pub fn send(&mut self, cmd: Command) -> Result<(), BridgeError> {
        self.collect_garbage();
        self.apply_to_session(&cmd);
        self.command_tx.try_push(cmd).map_err(|_| BridgeError::QueueFull)
    }

    /// Apply a command to the local session mirror.
    fn apply_to_session(&mut self, cmd: &Command) {
        match cmd {
            Command::SetFundamental(hz) => self.session.fundamental = *hz,
            Command::SetMasterVolume(volume) => self.session.master_volume = *volume,
            Command::SetCategoryGain { category, gain } => {
                self.session.category_gains[category.index()] = *gain;
            }
            Command::SetEngineMixLevel { engine, level } => {
                self.session.engine_mix[engine.index()] = *level;
            }
            Command::SetComparisonMode { enabled, .. } => {
                self.session.comparison_enabled = *enabled;
            }
            Command::SetConductorIntensity(intensity) => {
                self.session.conductor_intensity = *intensity;
            }
            Command::SetConductorCycleLength(secs) => {
                self.session.conductor_cycle_secs = *secs;
            }
            Command::MasterFade { direction, .. } => {
                self.session.faded_out = *direction == FadeDirection::Out;
            }
            Command::SetDroneSolo { solo, .. } => self.session.drone_solo = *solo,

            // Id-level state is recorded by the resolving setters
            Command::LoadDataset(_)
            | Command::SetFocus(_)
            | Command::Excite(_)
            | Command::CascadeFade { .. } => {}
        }
    }

    /// Drop everything the audio thread has retired.
    pub fn collect_garbage(&mut self) -> usize {
        let mut count = 0;
        while let Some(retired) = self.retire_rx.try_pop() {
            if let Retired::Population(p) = &retired {
                debug!("dropping population {} ({} entities)", p.generation, p.catalog.len());
            }
            drop(retired);
            count += 1;
        }
        count
    }

    /// Drain pending telemetry.
    pub fn poll_telemetry(&mut self) -> Vec<Report> {
        let mut reports = Vec::with_capacity(self.telemetry_rx.occupied_len());
        while let Some(report) = self.telemetry_rx.try_pop() {
            reports.push(report);
        }
        reports
    }

    /// Get the current engine readback state.
    pub fn readback(&self) -> EngineReadback {
        let r = &self.readback;
        EngineReadback {
            sample_position: r.sample_position.load(Ordering::Relaxed),
            active_voices: r.active_voices.load(Ordering::Relaxed) as usize,
            active_grains: r.active_grains.load(Ordering::Relaxed) as usize,
            output_peaks: [
                f32::from_bits(r.peak_left_bits.load(Ordering::Relaxed)),
                f32::from_bits(r.peak_right_bits.load(Ordering::Relaxed)),
            ],
            non_finite_samples: r.non_finite_samples.load(Ordering::Relaxed),
            running: r.running.load(Ordering::Relaxed),
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Dataset
    // ───────────────────────────────────────────────────────────────

    /// Parse a JSON dataset and swap it in. Returns the entity count.
    pub fn load_dataset_json(&mut self, text: &str) -> Result<usize, BridgeError> {
        let catalog = Catalog::from_json(text)?;
        self.load_catalog(catalog)
    }

    pub fn load_dataset_file(&mut self, path: &Path) -> Result<usize, BridgeError> {
        let catalog = Catalog::load(path)?;
        self.load_catalog(catalog)
    }

    /// Build a population for `catalog` and send it to the engine, then
    /// re-apply focus and comparison data against the new ids.
    pub fn load_catalog(&mut self, catalog: Catalog) -> Result<usize, BridgeError> {
        let catalog = Arc::new(catalog);
        let generation = self.session.generation + 1;
        let mut population = Population::build(Arc::clone(&catalog), &self.config, generation);
        if !self.session.comparison.is_empty() {
            let table = ComparisonTable::resolve(&catalog, generation, &self.session.comparison);
            population = population.with_comparison(table);
        }
        self.send(Command::LoadDataset(Box::new(population)))?;

        let count = catalog.len();
        info!(
            "dataset generation {generation}: {count} pathways, {} drone voices",
            count.min(self.config.drone.max_voices)
        );
        self.session.catalog = Some(catalog);
        self.session.generation = generation;

        if let Some(id) = self.session.focus.clone() {
            match self.session.focus_index() {
                Some(index) => self.send(Command::SetFocus(Some(index)))?,
                None => {
                    warn!("focused pathway {id:?} not in new dataset, clearing focus");
                    self.session.focus = None;
                }
            }
        }
        Ok(count)
    }

    fn require_catalog(&self) -> Result<&Arc<Catalog>, BridgeError> {
        self.session.catalog.as_ref().ok_or(BridgeError::NoDataset)
    }

    // ───────────────────────────────────────────────────────────────
    // Convenience methods
    // ───────────────────────────────────────────────────────────────

    pub fn set_fundamental(&mut self, hz: f32) -> Result<(), BridgeError> {
        self.send(Command::SetFundamental(hz))
    }

    pub fn set_master_volume(&mut self, volume: f32) -> Result<(), BridgeError> {
        self.send(Command::SetMasterVolume(volume))
    }

    /// Focus a pathway by id, or clear focus. Unknown ids clear focus.
    pub fn set_focus(&mut self, id: Option<&str>) -> Result<(), BridgeError> {
        let index = match id {
            Some(id) => {
                let index = self.require_catalog()?.index_of(id);
                if index.is_none() {
                    warn!("focus on unknown pathway {id:?} ignored");
                }
                index
            }
            None => None,
        };
        self.session.focus = index.and(id.map(str::to_string));
        self.send(Command::SetFocus(index))
    }

    /// Stir a pathway and its relations. Unknown ids are ignored.
    pub fn excite(&mut self, id: &str) -> Result<(), BridgeError> {
        match self.require_catalog()?.index_of(id) {
            Some(index) => self.send(Command::Excite(index)),
            None => {
                warn!("excite on unknown pathway {id:?} ignored");
                Ok(())
            }
        }
    }

    /// Set a category's gain. Unknown category names map to `other`.
    pub fn set_category_gain(&mut self, category: &str, gain: f32) -> Result<(), BridgeError> {
        let category = Category::parse_or_other(category);
        self.send(Command::SetCategoryGain { category, gain })
    }

    /// Set an engine's mix level by name. Unknown names are ignored.
    pub fn set_engine_mix_level(&mut self, engine: &str, level: f32) -> Result<(), BridgeError> {
        match EngineKind::parse(engine) {
            Some(engine) => self.send(Command::SetEngineMixLevel { engine, level }),
            None => {
                warn!("mix level for unknown engine {engine:?} ignored");
                Ok(())
            }
        }
    }

    /// Toggle comparison mode, optionally replacing the comparison data.
    pub fn set_comparison_mode(
        &mut self,
        enabled: bool,
        data: Option<ComparisonMap>,
    ) -> Result<(), BridgeError> {
        let table = match data {
            Some(map) => {
                self.session.comparison = map;
                self.session.catalog.as_ref().map(|catalog| {
                    let table =
                        ComparisonTable::resolve(catalog, self.session.generation, &self.session.comparison);
                    debug!("comparison data: {} affected pathways", table.affected_count());
                    Box::new(table)
                })
            }
            None => None,
        };
        self.send(Command::SetComparisonMode { enabled, table })
    }

    /// Like [`set_comparison_mode`](Self::set_comparison_mode) with data as
    /// a JSON object keyed by pathway id.
    pub fn set_comparison_json(&mut self, enabled: bool, text: &str) -> Result<(), BridgeError> {
        let map = parse_comparison_json(text).map_err(|e| BridgeError::Dataset(e.into()))?;
        self.set_comparison_mode(enabled, Some(map))
    }

    pub fn set_conductor_intensity(&mut self, intensity: f32) -> Result<(), BridgeError> {
        self.send(Command::SetConductorIntensity(intensity))
    }

    pub fn set_conductor_cycle_length(&mut self, secs: f32) -> Result<(), BridgeError> {
        self.send(Command::SetConductorCycleLength(secs))
    }

    /// Cascade all pathways in or out; `None` uses the direction's default.
    pub fn cascade_fade(
        &mut self,
        direction: FadeDirection,
        duration_secs: Option<f32>,
    ) -> Result<(), BridgeError> {
        self.send(Command::CascadeFade {
            direction,
            duration_secs: duration_secs.unwrap_or(direction.default_duration()),
        })
    }

    /// Fade the whole output in or out; `None` uses the configured default.
    pub fn master_fade(
        &mut self,
        direction: FadeDirection,
        duration_secs: Option<f32>,
    ) -> Result<(), BridgeError> {
        self.send(Command::MasterFade {
            direction,
            duration_secs: duration_secs.unwrap_or(0.0),
        })
    }

    /// Solo the drone; `duck` is the level the other engines fall to.
    pub fn set_drone_solo(&mut self, solo: bool, duck: Option<f32>) -> Result<(), BridgeError> {
        debug!("drone solo {}", if solo { "on" } else { "off" });
        self.send(Command::SetDroneSolo { solo, duck })
    }
}

// ═══════════════════════════════════════════════════════════════════
// EngineHandle - Audio Thread API
// ═══════════════════════════════════════════════════════════════════

impl EngineHandle {
    // ───────────────────────────────────────────────────────────────
    // Command Processing
    // ───────────────────────────────────────────────────────────────

    /// Apply all pending commands. Returns how many were applied.
    ///
    /// Called at the start of each render call.
    pub fn process_commands(&mut self) -> usize {
        if let Some(retired) = self.pending_retire.take() {
            if let Err(retired) = self.retire_tx.try_push(retired) {
                self.pending_retire = Some(retired);
                return 0;
            }
        }

        let mut applied = 0;
        while let Some(cmd) = self.command_rx.try_pop() {
            applied += 1;
            if let Some(retired) = self.engine.apply(cmd) {
                if let Err(retired) = self.retire_tx.try_push(retired) {
                    self.pending_retire = Some(retired);
                    break;
                }
            }
        }
        applied
    }

    // ───────────────────────────────────────────────────────────────
    // Audio Processing (delegates to Engine)
    // ───────────────────────────────────────────────────────────────

    /// Drain commands, then fill `left` and `right` in place.
    ///
    /// Call this once per audio block from the audio callback.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) -> RenderStatus {
        self.process_commands();
        let Self {
            engine,
            telemetry_tx,
            dropped_reports,
            ..
        } = self;
        let status = engine.render(left, right, |report| {
            if telemetry_tx.try_push(*report).is_err() {
                *dropped_reports += 1;
            }
        });
        self.sync_readback();
        status
    }

    /// Render into an interleaved buffer of `channels` channels.
    ///
    /// One channel gets the mono sum; channels beyond two are silent.
    pub fn render_interleaved(&mut self, out: &mut [f32], channels: usize) -> RenderStatus {
        if channels == 0 {
            return RenderStatus::Continue;
        }
        let frames = out.len() / channels;
        let block = self.scratch[0].len();
        let mut scratch = std::mem::take(&mut self.scratch);
        let [left, right] = &mut scratch;
        let mut offset = 0;
        while offset < frames {
            let n = (frames - offset).min(block);
            let (left, right) = (&mut left[..n], &mut right[..n]);
            self.render(left, right);
            let chunk = &mut out[offset * channels..(offset + n) * channels];
            for (f, frame) in chunk.chunks_exact_mut(channels).enumerate() {
                match frame {
                    [mono] => *mono = 0.5 * (left[f] + right[f]),
                    [l, r, rest @ ..] => {
                        *l = left[f];
                        *r = right[f];
                        rest.fill(0.0);
                    }
                    [] => {}
                }
            }
            offset += n;
        }
        self.scratch = scratch;
        out[frames * channels..].fill(0.0);
        RenderStatus::Continue
    }

    // ───────────────────────────────────────────────────────────────
    // Engine State Access
    // ───────────────────────────────────────────────────────────────

    /// Get a reference to the engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Telemetry reports dropped because the ring was full.
    pub fn dropped_reports(&self) -> u64 {
        self.dropped_reports
    }

    /// Sync readback state from the engine.
    fn sync_readback(&self) {
        let r = &self.readback;
        let peaks = self.engine.post().peaks();
        r.sample_position
            .store(self.engine.sample_position(), Ordering::Relaxed);
        r.active_voices
            .store(self.engine.drone().active_count() as u64, Ordering::Relaxed);
        r.active_grains
            .store(self.engine.granular().active_count() as u64, Ordering::Relaxed);
        r.peak_left_bits.store(peaks[0].to_bits(), Ordering::Relaxed);
        r.peak_right_bits.store(peaks[1].to_bits(), Ordering::Relaxed);
        r.non_finite_samples
            .store(self.engine.post().non_finite_samples(), Ordering::Relaxed);
        r.running.store(self.engine.is_loaded(), Ordering::Relaxed);
    }
}
