// src/dsp/mod.rs
//
// Small DSP building blocks shared by the engines and the post processor.
// Everything here is allocation-free after construction.

pub mod delay_line;
pub mod effects;
pub mod envelope;
pub mod oscillator;

pub use effects::{Chorus, FeedbackDelay, MAX_CHORUS_VOICES, PeakLimiter, Reverb};
pub use envelope::{arch, db_to_gain, ease_coefficient, grain_envelope, smoothstep};
pub use oscillator::{SineOsc, pan_gains};
