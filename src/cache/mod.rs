//! Cache generations and their storage backends.
//!
//! This module provides:
//! - Versioned generation names and the allow-list used for garbage collection
//! - A storage trait with SQLite (persistent) and in-memory backends
//! - Request keys and response snapshots as they are stored

mod generation;
mod storage;
mod traits;

pub use generation::{CacheTarget, Generations};
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use traits::{CacheKey, CachedResponse, FetchResult, ResponseSource};
