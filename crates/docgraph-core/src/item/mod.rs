//! Sync items: the unit of queued work and its execution outcome.

pub mod model;
pub mod progress;
