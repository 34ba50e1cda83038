//! Timeline assembly and transcript rendering.

pub mod formatter;
pub mod timeline;
