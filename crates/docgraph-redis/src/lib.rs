//! docgraph Redis Layer
//!
//! Sync history persisted as a capped Redis list.

pub mod client;
pub mod history;

pub use client::{RedisError, RedisPool, RedisResult, init_pool};
pub use history::RedisHistoryStore;
