// src/state/mod.rs
//
// Control-side state and the messages that cross to the audio thread.
//
// Key principles:
// - The session mirror holds the *desired* state in control-thread terms
//   (string ids, category names); the engine never reads it
// - Commands carry only resolved, typed values
// - Anything the audio thread replaces comes back as `Retired` to be
//   dropped off the audio thread
// - Telemetry leaves the audio thread as plain `Copy` reports

mod command;
mod comparison;
mod session;
mod telemetry;

pub use command::*;
pub use comparison::*;
pub use session::*;
pub use telemetry::*;
