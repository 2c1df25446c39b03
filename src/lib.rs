// src/lib.rs
//
// Library entry point for Rust, FFI (iOS/Swift) and WebAssembly consumers.

mod audio_buffer;
mod dsp;
mod parameter;
mod post;

pub mod bridge;
pub mod cascade;
pub mod catalog;
pub mod conductor;
pub mod config;
pub mod context;
pub mod engine;
pub mod engines;
pub mod error;
pub mod population;
pub mod state;

pub mod ffi;
#[cfg(feature = "web")]
pub mod wasm;

// Re-export key types for Rust consumers
pub use bridge::{EngineHandle, SessionHandle, create_bridge};
pub use cascade::FadeDirection;
pub use catalog::{Catalog, Category};
pub use config::EngineConfig;
pub use engine::{Engine, RenderStatus};
pub use engines::EngineKind;
pub use error::{BridgeError, ConfigError, DatasetError};
pub use population::Population;
pub use state::{Command, Report, Session};
