//! # Cache Chain
//!
//! Ordered sequence of cache tiers, fastest first. Lookups walk the chain in
//! order; a hit on a slow tier warms every faster tier on the way out.
//! Writes go through every available tier, best-effort.
//!
//! The provider list is copy-on-write so deployments can add, remove, or
//! reorder tiers at runtime while requests are in flight.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::cache::providers::CacheProvider;
use crate::cache::types::{CacheKey, CacheMetadata};
use crate::trace::{AttemptOutcome, AttemptTarget, FetchTrace};

/// A successful chain lookup: the blob plus which tier produced it.
#[derive(Debug, Clone)]
pub struct ChainHit {
    pub bytes: Bytes,
    pub metadata: CacheMetadata,
    pub tier: String,
    pub tier_index: usize,
}

pub struct CacheChain {
    providers: RwLock<Arc<Vec<Arc<dyn CacheProvider>>>>,
    enabled: bool,
}

impl CacheChain {
    /// Build a chain over `providers`, ordered lowest latency first.
    pub fn new(providers: Vec<Arc<dyn CacheProvider>>, enabled: bool) -> Self {
        Self {
            providers: RwLock::new(Arc::new(providers)),
            enabled,
        }
    }

    fn snapshot(&self) -> Arc<Vec<Arc<dyn CacheProvider>>> {
        self.providers.read().clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Names of currently registered tiers, in lookup order.
    pub fn tier_names(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Replace the whole provider list (reorder / change strategy).
    pub fn set_providers(&self, providers: Vec<Arc<dyn CacheProvider>>) {
        *self.providers.write() = Arc::new(providers);
    }

    /// Append a tier at the slow end of the chain.
    pub fn push_provider(&self, provider: Arc<dyn CacheProvider>) {
        let mut guard = self.providers.write();
        let mut next = guard.as_ref().clone();
        next.push(provider);
        *guard = Arc::new(next);
    }

    /// Remove the first tier with the given name. Returns whether one was
    /// removed.
    pub fn remove_provider(&self, name: &str) -> bool {
        let mut guard = self.providers.write();
        let mut next = guard.as_ref().clone();
        let before = next.len();
        if let Some(pos) = next.iter().position(|p| p.name() == name) {
            next.remove(pos);
        }
        let removed = next.len() != before;
        *guard = Arc::new(next);
        removed
    }

    /// Look up a key across the tiers in order, recording every tier check
    /// in the trace. On a hit at position `i`, tiers `0..i` are warmed with
    /// the value before it is returned.
    pub async fn get(&self, key: &CacheKey, trace: &mut FetchTrace) -> Option<ChainHit> {
        if !self.enabled {
            return None;
        }

        let providers = self.snapshot();
        for (index, provider) in providers.iter().enumerate() {
            if !provider.available() {
                debug!(tier = provider.name(), "skipping unavailable cache tier");
                continue;
            }

            let started = Instant::now();
            let target = AttemptTarget::CacheTier {
                tier: provider.name().to_string(),
            };

            match provider.get(key).await {
                Ok(Some((bytes, metadata))) => {
                    trace.record(target, AttemptOutcome::Hit, started);
                    self.warm(&providers[..index], key, &bytes, &metadata).await;
                    return Some(ChainHit {
                        bytes,
                        metadata,
                        tier: provider.name().to_string(),
                        tier_index: index,
                    });
                }
                Ok(None) => {
                    trace.record(target, AttemptOutcome::Miss, started);
                }
                Err(e) => {
                    // Provider errors degrade performance, not correctness.
                    warn!(tier = provider.name(), key = ?key, error = %e, "cache tier get failed");
                    trace.record(
                        target,
                        AttemptOutcome::Failed {
                            reason: e.to_string(),
                        },
                        started,
                    );
                }
            }
        }

        None
    }

    /// Write the value into every faster tier after a slow-tier hit.
    /// Completion order does not matter; failures are logged and dropped.
    async fn warm(
        &self,
        faster: &[Arc<dyn CacheProvider>],
        key: &CacheKey,
        bytes: &Bytes,
        metadata: &CacheMetadata,
    ) {
        let writes = faster.iter().filter(|p| p.available()).map(|provider| {
            let provider = provider.clone();
            let key = key.clone();
            let bytes = bytes.clone();
            let metadata = metadata.clone();
            async move {
                if let Err(e) = provider.put(key, bytes, metadata).await {
                    warn!(tier = provider.name(), error = %e, "cache warm-up write failed");
                }
            }
        });
        futures::future::join_all(writes).await;
    }

    /// Write through every available tier. Best-effort: returns the number
    /// of tiers that stored the value, never an error.
    pub async fn put(&self, key: &CacheKey, bytes: Bytes, metadata: CacheMetadata) -> usize {
        if !self.enabled {
            return 0;
        }

        let providers = self.snapshot();
        let writes = providers
            .iter()
            .filter(|p| p.available())
            .map(|provider| {
                let provider = provider.clone();
                let key = key.clone();
                let bytes = bytes.clone();
                let metadata = metadata.clone();
                async move {
                    match provider.put(key, bytes, metadata).await {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(tier = provider.name(), error = %e, "cache tier put failed");
                            false
                        }
                    }
                }
            })
            .collect::<Vec<_>>();

        futures::future::join_all(writes)
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count()
    }

    /// Remove a key from every tier. Used when a cached blob fails
    /// integrity validation, so one corrupted write cannot poison the chain.
    pub async fn purge(&self, key: &CacheKey) -> usize {
        let providers = self.snapshot();
        let mut purged = 0;
        for provider in providers.iter().filter(|p| p.available()) {
            match provider.remove(key).await {
                Ok(()) => purged += 1,
                Err(e) => {
                    warn!(tier = provider.name(), key = ?key, error = %e, "cache tier purge failed")
                }
            }
        }
        purged
    }

    /// Drop everything from every tier.
    pub async fn clear(&self) {
        let providers = self.snapshot();
        for provider in providers.iter().filter(|p| p.available()) {
            if let Err(e) = provider.clear().await {
                warn!(tier = provider.name(), error = %e, "cache tier clear failed");
            }
        }
    }
}
