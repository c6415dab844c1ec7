//! Two-tier cache for data persistence and offline support.
//!
//! This module provides:
//! - A volatile in-process tier for same-session reads
//! - A durable tier (SQLite or in-memory) that survives restarts
//! - TTL-based freshness with promotion from the durable tier
//! - Namespaced keys so the durable medium can be shared with other data

mod storage;
mod store;
mod traits;

pub use storage::{MemoryStorage, SqliteStorage};
pub use store::{CacheStore, DEFAULT_NAMESPACE, DEFAULT_TTL};
pub use traits::{CacheEntry, CacheStats, DurableStore};
