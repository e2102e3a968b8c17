//! # Cache Provider
//!
//! The trait every cache tier implements.

use async_trait::async_trait;
use bytes::Bytes;

use crate::cache::types::{CacheKey, CacheLookup, CacheMetadata, CacheResult};

/// A single cache tier: a uniform key -> bytes store.
///
/// Providers differ in durability and latency, not in interface. A provider
/// that is not usable in this deployment reports `available() == false` and
/// the chain skips it without special-case logic.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Short tier name used in traces and logs.
    fn name(&self) -> &str;

    /// Whether this tier can serve requests in this deployment.
    fn available(&self) -> bool;

    /// Look up an entry. Expired entries are treated as misses.
    async fn get(&self, key: &CacheKey) -> CacheLookup;

    /// Store an entry, replacing any previous value wholesale.
    async fn put(&self, key: CacheKey, data: Bytes, metadata: CacheMetadata) -> CacheResult<()>;

    /// Remove an entry. Removing a missing key is not an error.
    async fn remove(&self, key: &CacheKey) -> CacheResult<()>;

    /// Drop all entries from this tier.
    async fn clear(&self) -> CacheResult<()>;
}
