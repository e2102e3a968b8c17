//! # Cache Types
//!
//! Common types shared by the cache providers and the chain.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Kinds of data handed to the cache tiers.
///
/// Cache keys are namespaced by kind so a catalog query result can never
/// collide with archive bytes for the same URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheKind {
    /// A serialized catalog query result. The only kind with a TTL.
    Catalog,
    /// Raw archive bytes, keyed by resolved URL.
    Archive,
    /// A single file extracted from an archive, keyed by version + inner path.
    File,
}

impl CacheKind {
    /// Directory / key-prefix name for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Catalog => "catalog",
            CacheKind::Archive => "archive",
            CacheKind::File => "file",
        }
    }
}

/// Cache key identifying one stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Kind of data stored under this key.
    pub kind: CacheKind,
    /// Opaque locator: exact query parameters, a resolved URL, or
    /// `version:inner_path` depending on the kind.
    pub locator: String,
}

impl CacheKey {
    pub fn new(kind: CacheKind, locator: impl Into<String>) -> Self {
        Self {
            kind,
            locator: locator.into(),
        }
    }

    /// Key for archive bytes. A pure function of the resolved URL, so the
    /// zip and tarball shapes of the same logical resource cache
    /// independently.
    pub fn archive(url: &str) -> Self {
        Self::new(CacheKind::Archive, url)
    }

    /// Key for an extracted file, addressed by the owning archive's version
    /// and the exact inner path. Content-addressed, never expires.
    pub fn file(version: &str, inner_path: &str) -> Self {
        Self::new(CacheKind::File, format!("{version}:{inner_path}"))
    }

    /// Convert to a filename-safe string.
    pub fn to_filename(&self) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(self.kind.as_str());
        hasher.update(":");
        hasher.update(&self.locator);
        hex::encode(hasher.finalize())
    }
}

/// Metadata stored alongside a cached blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// When the blob was cached (unix seconds).
    pub cached_at: u64,
    /// When the blob expires, if ever (unix seconds).
    pub expires_at: Option<u64>,
    /// Content type, when known.
    pub content_type: Option<String>,
    /// Size of the blob in bytes.
    pub size: u64,
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl CacheMetadata {
    pub fn new(size: u64) -> Self {
        Self {
            cached_at: unix_now(),
            expires_at: None,
            content_type: None,
            size,
        }
    }

    /// Set an expiration relative to `cached_at`.
    pub fn with_expiration(mut self, ttl: Duration) -> Self {
        self.expires_at = Some(self.cached_at + ttl.as_secs());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => unix_now() >= expires_at,
            None => false,
        }
    }
}

/// Configuration for the cache tiers.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether caching is enabled at all.
    pub enabled: bool,
    /// Directory for the disk tier. Falls back to the system temp dir.
    pub disk_path: Option<PathBuf>,
    /// Maximum size of the in-memory tier in bytes.
    pub max_memory_bytes: u64,
    /// Base URL of a remote key/value tier, when this deployment has one.
    pub remote_endpoint: Option<String>,
    /// TTL for cached catalog query results. Everything else is
    /// versioned/immutable and cached without expiry.
    pub catalog_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            disk_path: None,
            max_memory_bytes: 64 * 1024 * 1024, // 64MB
            remote_endpoint: None,
            catalog_ttl: Duration::from_secs(3600), // 1 hour
        }
    }
}

/// Result of a cache operation.
pub type CacheResult<T> = std::result::Result<T, std::io::Error>;

/// Result of a cache lookup: the blob and its metadata, or a miss.
pub type CacheLookup = CacheResult<Option<(Bytes, CacheMetadata)>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_is_stable_and_distinct_per_kind() {
        let a = CacheKey::archive("https://example.org/a.zip");
        let b = CacheKey::archive("https://example.org/a.zip");
        let c = CacheKey::new(CacheKind::File, "https://example.org/a.zip");
        assert_eq!(a.to_filename(), b.to_filename());
        assert_ne!(a.to_filename(), c.to_filename());
        assert_eq!(a.to_filename().len(), 64);
    }

    #[test]
    fn metadata_expiry() {
        let fresh = CacheMetadata::new(10).with_expiration(Duration::from_secs(3600));
        assert!(!fresh.is_expired());

        let mut stale = CacheMetadata::new(10);
        stale.cached_at = stale.cached_at.saturating_sub(100);
        stale.expires_at = Some(stale.cached_at + 1);
        assert!(stale.is_expired());

        assert!(!CacheMetadata::new(10).is_expired());
    }
}
