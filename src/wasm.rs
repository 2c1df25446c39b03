//! WebAssembly bindings via wasm-bindgen for browser integration.
//!
//! This module is only compiled when the `web` feature is enabled.
//!
//! # Usage
//!
//! Build with wasm-pack:
//! ```bash
//! wasm-pack build --target web --features web
//! ```
//!
//! # JavaScript Example
//!
//! ```javascript
//! import init, { metaharmony_init, MetaHarmony, MetaHarmonyConfig } from './metaharmony.js';
//!
//! await init();
//! metaharmony_init();
//!
//! // Inside the AudioWorkletProcessor
//! const synth = new MetaHarmony(new MetaHarmonyConfig());
//! synth.load_dataset_json(json);
//! synth.set_focus("PWY-101");
//!
//! process(inputs, outputs) {
//!     const [left, right] = outputs[0];
//!     synth.render(left, right);
//!     return true;
//! }
//! ```

use wasm_bindgen::prelude::*;

use crate::bridge::{EngineHandle, SessionHandle, create_bridge};
use crate::cascade::FadeDirection;
use crate::config::EngineConfig;
use crate::engine::RenderStatus;
use crate::error::BridgeError;
use crate::state::EngineReadback;

// ═══════════════════════════════════════════════════════════════════════════
// Initialization
// ═══════════════════════════════════════════════════════════════════════════

/// Initialize the wasm module. Call this once before using any other functions.
/// Sets up panic hooks and console logging.
#[wasm_bindgen]
pub fn metaharmony_init() {
    console_error_panic_hook::set_once();
    console_log::init_with_level(log::Level::Info).ok();
}

fn js_error(e: BridgeError) -> JsValue {
    JsValue::from_str(&e.to_string())
}

// ═══════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════

/// Configuration for creating an engine.
#[wasm_bindgen]
#[derive(Clone, Copy)]
pub struct MetaHarmonyConfig {
    /// Sample rate in Hz (AudioContext.sampleRate).
    pub sample_rate: f32,
    /// Largest block rendered in one pass (128 in an AudioWorklet).
    pub block_size: u32,
    /// Seed for stochastic behaviour; 0 draws a fresh one.
    pub seed: u64,
}

#[wasm_bindgen]
impl MetaHarmonyConfig {
    /// Create a new configuration with default values.
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration with custom values.
    pub fn with_values(sample_rate: f32, block_size: u32, seed: u64) -> Self {
        Self {
            sample_rate,
            block_size,
            seed,
        }
    }
}

impl Default for MetaHarmonyConfig {
    fn default() -> Self {
        let d = EngineConfig::default();
        Self {
            sample_rate: d.sample_rate,
            block_size: d.block_size as u32,
            seed: 0,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Readback Data
// ═══════════════════════════════════════════════════════════════════════════

/// Readback data from the engine (for meters/displays).
#[wasm_bindgen]
#[derive(Clone, Copy, Default)]
pub struct MetaHarmonyReadback {
    pub sample_position: u64,
    /// Drone voices with an active layer.
    pub active_voices: u32,
    pub active_grains: u32,
    pub peak_left: f32,
    pub peak_right: f32,
    pub running: bool,
}

impl From<EngineReadback> for MetaHarmonyReadback {
    fn from(r: EngineReadback) -> Self {
        Self {
            sample_position: r.sample_position,
            active_voices: r.active_voices as u32,
            active_grains: r.active_grains as u32,
            peak_left: r.output_peaks[0],
            peak_right: r.output_peaks[1],
            running: r.running,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════════════════

/// Both halves of the bridge, for hosts where control and rendering share
/// one JavaScript realm (typically the AudioWorklet global scope).
#[wasm_bindgen]
pub struct MetaHarmony {
    session: SessionHandle,
    engine: EngineHandle,
}

#[wasm_bindgen]
impl MetaHarmony {
    #[wasm_bindgen(constructor)]
    pub fn new(config: MetaHarmonyConfig) -> MetaHarmony {
        let config = EngineConfig {
            sample_rate: config.sample_rate,
            block_size: config.block_size as usize,
            seed: (config.seed != 0).then_some(config.seed),
            ..EngineConfig::default()
        };
        let (session, engine) = create_bridge(config);
        MetaHarmony { session, engine }
    }

    /// Create an engine from a TOML configuration string.
    pub fn from_toml(text: &str) -> Result<MetaHarmony, JsValue> {
        let config = EngineConfig::from_toml_str(text).map_err(|e| JsValue::from_str(&e.to_string()))?;
        let (session, engine) = create_bridge(config);
        Ok(MetaHarmony { session, engine })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dataset
    // ─────────────────────────────────────────────────────────────────────────

    /// Load a JSON dataset. Returns the number of pathways.
    pub fn load_dataset_json(&mut self, json: &str) -> Result<u32, JsValue> {
        self.session
            .load_dataset_json(json)
            .map(|n| n as u32)
            .map_err(js_error)
    }

    pub fn entity_count(&self) -> u32 {
        self.session.session().entity_count() as u32
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Controls
    // ─────────────────────────────────────────────────────────────────────────

    pub fn set_fundamental(&mut self, hz: f32) -> Result<(), JsValue> {
        self.session.set_fundamental(hz).map_err(js_error)
    }

    pub fn set_master_volume(&mut self, volume: f32) -> Result<(), JsValue> {
        self.session.set_master_volume(volume).map_err(js_error)
    }

    /// Focus a pathway by id; `undefined` clears focus.
    pub fn set_focus(&mut self, id: Option<String>) -> Result<(), JsValue> {
        self.session.set_focus(id.as_deref()).map_err(js_error)
    }

    pub fn excite(&mut self, id: &str) -> Result<(), JsValue> {
        self.session.excite(id).map_err(js_error)
    }

    pub fn set_category_gain(&mut self, category: &str, gain: f32) -> Result<(), JsValue> {
        self.session.set_category_gain(category, gain).map_err(js_error)
    }

    pub fn set_engine_mix_level(&mut self, engine: &str, level: f32) -> Result<(), JsValue> {
        self.session.set_engine_mix_level(engine, level).map_err(js_error)
    }

    /// Toggle comparison mode; `json` (optional) replaces the comparison data.
    pub fn set_comparison_mode(&mut self, enabled: bool, json: Option<String>) -> Result<(), JsValue> {
        match json {
            Some(json) => self.session.set_comparison_json(enabled, &json),
            None => self.session.set_comparison_mode(enabled, None),
        }
        .map_err(js_error)
    }

    pub fn set_conductor_intensity(&mut self, intensity: f32) -> Result<(), JsValue> {
        self.session.set_conductor_intensity(intensity).map_err(js_error)
    }

    pub fn set_conductor_cycle_length(&mut self, secs: f32) -> Result<(), JsValue> {
        self.session.set_conductor_cycle_length(secs).map_err(js_error)
    }

    /// Cascade pathways in or out ("in" | "out"); duration in seconds.
    pub fn cascade_fade(&mut self, direction: &str, duration_secs: Option<f32>) -> Result<(), JsValue> {
        let direction = FadeDirection::parse(direction)
            .ok_or_else(|| JsValue::from_str("direction must be \"in\" or \"out\""))?;
        self.session.cascade_fade(direction, duration_secs).map_err(js_error)
    }

    /// Fade the whole output in or out ("in" | "out"); duration in seconds.
    pub fn master_fade(&mut self, direction: &str, duration_secs: Option<f32>) -> Result<(), JsValue> {
        let direction = FadeDirection::parse(direction)
            .ok_or_else(|| JsValue::from_str("direction must be \"in\" or \"out\""))?;
        self.session.master_fade(direction, duration_secs).map_err(js_error)
    }

    pub fn set_drone_solo(&mut self, solo: bool, duck: Option<f32>) -> Result<(), JsValue> {
        self.session.set_drone_solo(solo, duck).map_err(js_error)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Audio Processing
    // ─────────────────────────────────────────────────────────────────────────

    /// Render into planar channel buffers. Always returns true (keep alive).
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) -> bool {
        let status = self.engine.render(left, right);
        self.session.collect_garbage();
        status == RenderStatus::Continue
    }

    /// Render into an interleaved buffer of `channels` channels.
    pub fn render_interleaved(&mut self, output: &mut [f32], channels: u32) -> bool {
        let status = self.engine.render_interleaved(output, channels as usize);
        self.session.collect_garbage();
        status == RenderStatus::Continue
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Readback
    // ─────────────────────────────────────────────────────────────────────────

    /// Pending telemetry as a JSON array of reports.
    pub fn poll_telemetry(&mut self) -> String {
        let reports = self.session.poll_telemetry();
        serde_json::to_string(&reports).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn readback(&self) -> MetaHarmonyReadback {
        self.session.readback().into()
    }
}
