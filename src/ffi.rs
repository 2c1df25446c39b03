// C-compatible FFI bindings for Swift/iOS (and other native) hosts.
//
// Safety requirements:
// - All pointers must be non-null unless documented otherwise
// - All handles must be created by this module and not fabricated
// - String parameters must be valid null-terminated UTF-8
// - Caller must call the corresponding _destroy function for each _create
// - Session functions run on a control thread, engine functions on the
//   audio thread; a handle must not be used from two threads at once

use std::ffi::{CStr, c_char};
use std::path::Path;

use log::{error, warn};

use crate::bridge::{EngineHandle, SessionHandle, create_bridge};
use crate::cascade::FadeDirection;
use crate::config::EngineConfig;
use crate::error::BridgeError;
use crate::state::EngineReadback;

// Logger subsystem identifier
#[cfg(feature = "ios")]
const LOG_SUBSYSTEM: &str = "com.metaharmony.engine";

// ═══════════════════════════════════════════════════════════════════════════
// Logger Initialization
// ═══════════════════════════════════════════════════════════════════════════

/// Initialize the oslog logger.
///
/// Call once at application startup before using any other FFI function.
/// Output appears in Console.app and Xcode's debug console.
#[cfg(feature = "ios")]
#[unsafe(no_mangle)]
pub extern "C" fn metaharmony_init_logger() {
    oslog::OsLogger::new(LOG_SUBSYSTEM)
        .level_filter(log::LevelFilter::Debug)
        .init()
        .ok();
}

// ═══════════════════════════════════════════════════════════════════════════
// Opaque Handle Types
// ═══════════════════════════════════════════════════════════════════════════

/// Opaque handle to the SessionHandle (control side).
pub struct MetaHarmonySession {
    inner: SessionHandle,
}

/// Opaque handle to the EngineHandle (audio side).
pub struct MetaHarmonyEngine {
    inner: EngineHandle,
}

// ═══════════════════════════════════════════════════════════════════════════
// FFI Result Types
// ═══════════════════════════════════════════════════════════════════════════

/// Readback data from the engine (for meters/displays).
#[repr(C)]
pub struct MetaHarmonyReadback {
    pub sample_position: u64,
    pub active_voices: u32,
    pub active_grains: u32,
    pub peak_left: f32,
    pub peak_right: f32,
    pub non_finite_samples: u64,
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
            non_finite_samples: r.non_finite_samples,
            running: r.running,
        }
    }
}

/// Configuration for creating a session and engine.
#[repr(C)]
pub struct MetaHarmonyConfig {
    /// Sample rate in Hz (e.g. 44100.0, 48000.0).
    pub sample_rate: f32,
    /// Largest block rendered in one pass, in frames.
    pub block_size: u32,
    /// Seed for all stochastic behaviour; used only when `has_seed`.
    pub seed: u64,
    pub has_seed: bool,
}

impl Default for MetaHarmonyConfig {
    fn default() -> Self {
        let d = EngineConfig::default();
        Self {
            sample_rate: d.sample_rate,
            block_size: d.block_size as u32,
            seed: 0,
            has_seed: false,
        }
    }
}

impl From<&MetaHarmonyConfig> for EngineConfig {
    fn from(c: &MetaHarmonyConfig) -> Self {
        EngineConfig {
            sample_rate: c.sample_rate,
            block_size: c.block_size as usize,
            seed: c.has_seed.then_some(c.seed),
            ..EngineConfig::default()
        }
    }
}

/// Get the default configuration values.
#[unsafe(no_mangle)]
pub extern "C" fn metaharmony_default_config() -> MetaHarmonyConfig {
    MetaHarmonyConfig::default()
}

// ═══════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════

/// Borrow a C string as UTF-8. NULL and invalid UTF-8 yield `None`.
unsafe fn c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    match unsafe { CStr::from_ptr(ptr) }.to_str() {
        Ok(s) => Some(s),
        Err(_) => {
            warn!("ignoring non-UTF-8 string argument");
            None
        }
    }
}

fn report(result: Result<(), BridgeError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            error!("{e}");
            false
        }
    }
}

fn pair(config: EngineConfig, out_engine: *mut *mut MetaHarmonyEngine) -> *mut MetaHarmonySession {
    let (session, engine) = create_bridge(config);
    if !out_engine.is_null() {
        unsafe {
            *out_engine = Box::into_raw(Box::new(MetaHarmonyEngine { inner: engine }));
        }
    }
    Box::into_raw(Box::new(MetaHarmonySession { inner: session }))
}

// ═══════════════════════════════════════════════════════════════════════════
// Session/Engine Creation
// ═══════════════════════════════════════════════════════════════════════════

/// Create a session and engine pair with default configuration.
///
/// # Safety
/// `out_engine` must be a valid pointer to store the engine handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_create(out_engine: *mut *mut MetaHarmonyEngine) -> *mut MetaHarmonySession {
    pair(EngineConfig::default(), out_engine)
}

/// Create a session and engine pair with custom configuration.
///
/// Returns a session handle. The engine handle is returned via `out_engine`.
/// Both handles must be destroyed with their respective destroy functions.
///
/// # Safety
/// - `config` must be a valid pointer to a MetaHarmonyConfig or NULL
/// - `out_engine` must be a valid pointer to store the engine handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_create_with_config(
    config: *const MetaHarmonyConfig,
    out_engine: *mut *mut MetaHarmonyEngine,
) -> *mut MetaHarmonySession {
    let config = if config.is_null() {
        EngineConfig::default()
    } else {
        EngineConfig::from(unsafe { &*config })
    };
    pair(config, out_engine)
}

/// Create a session and engine pair from a TOML configuration file.
/// A missing or invalid file falls back to defaults (logged).
///
/// # Safety
/// - `path` must be a valid null-terminated UTF-8 string or NULL
/// - `out_engine` must be a valid pointer to store the engine handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_create_from_toml(
    path: *const c_char,
    out_engine: *mut *mut MetaHarmonyEngine,
) -> *mut MetaHarmonySession {
    let path = unsafe { c_str(path) }.map(Path::new);
    pair(EngineConfig::load_or_default(path), out_engine)
}

/// Destroy a session handle.
///
/// # Safety
/// `session` must be a valid pointer returned by a `session_create*` function.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_destroy(session: *mut MetaHarmonySession) {
    if !session.is_null() {
        unsafe { drop(Box::from_raw(session)) };
    }
}

/// Destroy an engine handle.
///
/// # Safety
/// `engine` must be a valid pointer returned via a `session_create*` function.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn engine_destroy(engine: *mut MetaHarmonyEngine) {
    if !engine.is_null() {
        unsafe { drop(Box::from_raw(engine)) };
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Session - Dataset
// ═══════════════════════════════════════════════════════════════════════════

/// Load a JSON dataset. Returns the number of pathways, or -1 on error.
///
/// # Safety
/// `json` must be a valid null-terminated UTF-8 string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_load_dataset_json(
    session: *mut MetaHarmonySession,
    json: *const c_char,
) -> i32 {
    if session.is_null() {
        return -1;
    }
    let Some(json) = (unsafe { c_str(json) }) else {
        return -1;
    };
    match unsafe { (*session).inner.load_dataset_json(json) } {
        Ok(count) => count.min(i32::MAX as usize) as i32,
        Err(e) => {
            error!("dataset load failed: {e}");
            -1
        }
    }
}

/// Load a JSON dataset from a file. Returns the number of pathways, or -1.
///
/// # Safety
/// `path` must be a valid null-terminated UTF-8 string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_load_dataset_file(
    session: *mut MetaHarmonySession,
    path: *const c_char,
) -> i32 {
    if session.is_null() {
        return -1;
    }
    let Some(path) = (unsafe { c_str(path) }) else {
        return -1;
    };
    match unsafe { (*session).inner.load_dataset_file(Path::new(path)) } {
        Ok(count) => count.min(i32::MAX as usize) as i32,
        Err(e) => {
            error!("dataset load failed: {e}");
            -1
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Session - Controls
// ═══════════════════════════════════════════════════════════════════════════

#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_set_fundamental(session: *mut MetaHarmonySession, hz: f32) -> bool {
    if session.is_null() {
        return false;
    }
    report(unsafe { (*session).inner.set_fundamental(hz) })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_set_master_volume(session: *mut MetaHarmonySession, volume: f32) -> bool {
    if session.is_null() {
        return false;
    }
    report(unsafe { (*session).inner.set_master_volume(volume) })
}

/// Focus a pathway by id; NULL clears focus.
///
/// # Safety
/// `id` must be a valid null-terminated UTF-8 string or NULL.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_set_focus(session: *mut MetaHarmonySession, id: *const c_char) -> bool {
    if session.is_null() {
        return false;
    }
    let id = unsafe { c_str(id) };
    report(unsafe { (*session).inner.set_focus(id) })
}

/// # Safety
/// `id` must be a valid null-terminated UTF-8 string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_excite(session: *mut MetaHarmonySession, id: *const c_char) -> bool {
    if session.is_null() {
        return false;
    }
    let Some(id) = (unsafe { c_str(id) }) else {
        return false;
    };
    report(unsafe { (*session).inner.excite(id) })
}

/// # Safety
/// `category` must be a valid null-terminated UTF-8 string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_set_category_gain(
    session: *mut MetaHarmonySession,
    category: *const c_char,
    gain: f32,
) -> bool {
    if session.is_null() {
        return false;
    }
    let category = unsafe { c_str(category) }.unwrap_or("other");
    report(unsafe { (*session).inner.set_category_gain(category, gain) })
}

/// Set an engine's level by name: "reference", "drone", "granular", "focus".
///
/// # Safety
/// `engine_name` must be a valid null-terminated UTF-8 string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_set_engine_mix_level(
    session: *mut MetaHarmonySession,
    engine_name: *const c_char,
    level: f32,
) -> bool {
    if session.is_null() {
        return false;
    }
    let Some(name) = (unsafe { c_str(engine_name) }) else {
        return false;
    };
    report(unsafe { (*session).inner.set_engine_mix_level(name, level) })
}

/// Toggle comparison mode. `json` (optional) replaces the comparison data:
/// an object keyed by pathway id with `direction` and `magnitude`.
///
/// # Safety
/// `json` must be a valid null-terminated UTF-8 string or NULL.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_set_comparison_mode(
    session: *mut MetaHarmonySession,
    enabled: bool,
    json: *const c_char,
) -> bool {
    if session.is_null() {
        return false;
    }
    let inner = unsafe { &mut (*session).inner };
    match unsafe { c_str(json) } {
        Some(json) => report(inner.set_comparison_json(enabled, json)),
        None => report(inner.set_comparison_mode(enabled, None)),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_set_conductor_intensity(
    session: *mut MetaHarmonySession,
    intensity: f32,
) -> bool {
    if session.is_null() {
        return false;
    }
    report(unsafe { (*session).inner.set_conductor_intensity(intensity) })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_set_conductor_cycle_length(
    session: *mut MetaHarmonySession,
    secs: f32,
) -> bool {
    if session.is_null() {
        return false;
    }
    report(unsafe { (*session).inner.set_conductor_cycle_length(secs) })
}

/// Cascade all pathways in (`fade_out` false) or out. A non-positive
/// duration uses the direction's default.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_cascade_fade(
    session: *mut MetaHarmonySession,
    fade_out: bool,
    duration_secs: f32,
) -> bool {
    if session.is_null() {
        return false;
    }
    let direction = if fade_out { FadeDirection::Out } else { FadeDirection::In };
    let duration = (duration_secs > 0.0).then_some(duration_secs);
    report(unsafe { (*session).inner.cascade_fade(direction, duration) })
}

/// Fade the whole output in (`fade_out` false) or out. A non-positive
/// duration uses the configured default.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_master_fade(
    session: *mut MetaHarmonySession,
    fade_out: bool,
    duration_secs: f32,
) -> bool {
    if session.is_null() {
        return false;
    }
    let direction = if fade_out { FadeDirection::Out } else { FadeDirection::In };
    let duration = (duration_secs > 0.0).then_some(duration_secs);
    report(unsafe { (*session).inner.master_fade(direction, duration) })
}

/// Solo the drone. A negative `duck` keeps the current duck amount.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_set_drone_solo(
    session: *mut MetaHarmonySession,
    solo: bool,
    duck: f32,
) -> bool {
    if session.is_null() {
        return false;
    }
    let duck = (duck >= 0.0).then_some(duck);
    report(unsafe { (*session).inner.set_drone_solo(solo, duck) })
}

// ═══════════════════════════════════════════════════════════════════════════
// Session - Housekeeping & Readback
// ═══════════════════════════════════════════════════════════════════════════

/// Drop storage retired by the audio thread. Call periodically.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_collect_garbage(session: *mut MetaHarmonySession) -> u32 {
    if session.is_null() {
        return 0;
    }
    unsafe { (*session).inner.collect_garbage() as u32 }
}

/// Drain pending telemetry and write the most recent report as JSON into
/// `buffer` (NUL-terminated). Returns the JSON length, 0 if nothing was
/// pending, or -1 if the buffer is too small.
///
/// # Safety
/// `buffer` must have space for `capacity` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_poll_telemetry_json(
    session: *mut MetaHarmonySession,
    buffer: *mut c_char,
    capacity: u32,
) -> i32 {
    if session.is_null() || buffer.is_null() {
        return -1;
    }
    let reports = unsafe { (*session).inner.poll_telemetry() };
    let Some(latest) = reports.last() else {
        return 0;
    };
    let json = match serde_json::to_string(latest) {
        Ok(json) => json,
        Err(e) => {
            error!("telemetry encoding failed: {e}");
            return -1;
        }
    };
    if json.len() + 1 > capacity as usize {
        return -1;
    }
    unsafe {
        std::ptr::copy_nonoverlapping(json.as_ptr(), buffer as *mut u8, json.len());
        *buffer.add(json.len()) = 0;
    }
    json.len() as i32
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_get_readback(session: *const MetaHarmonySession) -> MetaHarmonyReadback {
    if session.is_null() {
        return EngineReadback::default().into();
    }
    unsafe { (*session).inner.readback().into() }
}

/// Number of pathways in the current dataset.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn session_entity_count(session: *const MetaHarmonySession) -> u32 {
    if session.is_null() {
        return 0;
    }
    unsafe { (*session).inner.session().entity_count() as u32 }
}

// ═══════════════════════════════════════════════════════════════════════════
// Engine - Audio Thread
// ═══════════════════════════════════════════════════════════════════════════

/// Apply pending commands without rendering. `engine_render` already does
/// this; use it only when a host needs commands applied between callbacks.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn engine_process_commands(engine: *mut MetaHarmonyEngine) -> u32 {
    if engine.is_null() {
        return 0;
    }
    unsafe { (*engine).inner.process_commands() as u32 }
}

/// Render `frames` frames into two planar channel buffers.
///
/// Buffers are filled with silence if the engine handle is invalid.
///
/// # Safety
/// - Must be called from the audio thread
/// - Output buffers must be valid and have space for `frames` samples
#[unsafe(no_mangle)]
pub unsafe extern "C" fn engine_render(
    engine: *mut MetaHarmonyEngine,
    frames: u32,
    output_left: *mut f32,
    output_right: *mut f32,
) {
    let total_frames = frames as usize;

    if engine.is_null() || output_left.is_null() || output_right.is_null() {
        if !output_left.is_null() {
            unsafe { std::ptr::write_bytes(output_left, 0, total_frames) };
        }
        if !output_right.is_null() {
            unsafe { std::ptr::write_bytes(output_right, 0, total_frames) };
        }
        return;
    }

    let left = unsafe { std::slice::from_raw_parts_mut(output_left, total_frames) };
    let right = unsafe { std::slice::from_raw_parts_mut(output_right, total_frames) };
    unsafe { (*engine).inner.render(left, right) };
}

/// Render into an interleaved buffer: [L0, R0, L1, R1, ...] for stereo.
/// One channel receives the mono sum; channels beyond two are silent.
///
/// # Safety
/// - Must be called from the audio thread
/// - `output` must have space for `frames * channels` floats
#[unsafe(no_mangle)]
pub unsafe extern "C" fn engine_render_interleaved(
    engine: *mut MetaHarmonyEngine,
    frames: u32,
    channels: u32,
    output: *mut f32,
) {
    let total = frames as usize * channels as usize;
    if output.is_null() {
        return;
    }
    let out = unsafe { std::slice::from_raw_parts_mut(output, total) };
    if engine.is_null() {
        out.fill(0.0);
        return;
    }
    unsafe { (*engine).inner.render_interleaved(out, channels as usize) };
}
