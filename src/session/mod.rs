//! Session lifecycle: state machine, durable records, and post-recording
//! processing.

pub mod manager;
pub mod persistence;
pub mod processor;
pub mod types;
