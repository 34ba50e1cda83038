//! Voice capture: pre-roll buffering, WAV finalization, and the
//! per-speaker capture engine.

pub mod capture;
pub mod pre_roll;
pub mod wav;
