//! # Cache System
//!
//! Pluggable multi-tier caching: uniform providers ordered into a chain,
//! tried fastest-first, warmed on slow-tier hits, written through on fetch.

mod chain;
pub mod providers;
mod types;

pub use chain::{CacheChain, ChainHit};
pub use types::{CacheConfig, CacheKey, CacheKind, CacheLookup, CacheMetadata, CacheResult};

pub use providers::{CacheProvider, FileCache, MemoryCache, RemoteCache};
