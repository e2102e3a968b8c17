//! # File Cache Provider
//!
//! Disk-backed tier. Blobs live under one subdirectory per cache kind with a
//! JSON metadata sidecar next to each blob.

use std::path::PathBuf;

use bytes::Bytes;
use tokio::fs;
use tokio::io;
use tracing::{debug, warn};

use crate::cache::types::{CacheKey, CacheKind, CacheLookup, CacheMetadata, CacheResult};

use super::CacheProvider;

#[derive(Debug, Clone)]
pub struct FileCache {
    cache_dir: PathBuf,
    initialized: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl FileCache {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            initialized: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    /// Create the cache directories. Called lazily from every operation,
    /// cheap once initialized.
    async fn ensure_initialized(&self) -> io::Result<()> {
        use std::sync::atomic::Ordering;

        if self.initialized.load(Ordering::Relaxed) {
            return Ok(());
        }

        if self
            .initialized
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            fs::create_dir_all(&self.cache_dir).await?;
            for kind in [CacheKind::Catalog, CacheKind::Archive, CacheKind::File] {
                fs::create_dir_all(self.cache_dir.join(kind.as_str())).await?;
            }
            self.initialized.store(true, Ordering::Release);
        } else {
            while !self.initialized.load(Ordering::Acquire) {
                tokio::task::yield_now().await;
            }
        }

        Ok(())
    }

    fn data_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir
            .join(key.kind.as_str())
            .join(key.to_filename())
    }

    fn meta_path(&self, key: &CacheKey) -> PathBuf {
        let mut path = self.data_path(key);
        path.set_extension("meta");
        path
    }

    fn remove_in_background(data_path: PathBuf, meta_path: PathBuf) {
        tokio::spawn(async move {
            let _ = fs::remove_file(&data_path).await;
            let _ = fs::remove_file(&meta_path).await;
        });
    }
}

#[async_trait::async_trait]
impl CacheProvider for FileCache {
    fn name(&self) -> &str {
        "disk"
    }

    fn available(&self) -> bool {
        true
    }

    async fn get(&self, key: &CacheKey) -> CacheLookup {
        self.ensure_initialized().await?;

        let data_path = self.data_path(key);
        let meta_path = self.meta_path(key);

        if !fs::try_exists(&data_path).await? || !fs::try_exists(&meta_path).await? {
            return Ok(None);
        }

        let metadata_bytes = match fs::read(&meta_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = ?meta_path, error = %e, "failed to read cache metadata file");
                return Ok(None);
            }
        };

        let metadata: CacheMetadata = match serde_json::from_slice(&metadata_bytes) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = ?meta_path, error = %e, "failed to parse cache metadata, dropping entry");
                Self::remove_in_background(data_path, meta_path);
                return Ok(None);
            }
        };

        if metadata.is_expired() {
            debug!(key = ?key, "disk cache entry expired");
            Self::remove_in_background(data_path, meta_path);
            return Ok(None);
        }

        let data = match fs::read(&data_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = ?data_path, error = %e, "failed to read cache data file");
                return Ok(None);
            }
        };

        Ok(Some((Bytes::from(data), metadata)))
    }

    async fn put(&self, key: CacheKey, data: Bytes, metadata: CacheMetadata) -> CacheResult<()> {
        self.ensure_initialized().await?;

        let data_path = self.data_path(&key);
        let meta_path = self.meta_path(&key);

        let metadata_json = serde_json::to_vec(&metadata).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to serialize metadata: {e}"),
            )
        })?;

        // Write to temporary files, then rename, so a crash mid-write never
        // leaves a half-written entry behind.
        let temp_data_path = data_path.with_extension("tmp");
        let temp_meta_path = meta_path.with_extension("mtmp");

        if let Err(e) = fs::write(&temp_data_path, &data).await {
            warn!(path = ?temp_data_path, error = %e, "failed to write cache data file");
            return Err(e);
        }

        if let Err(e) = fs::write(&temp_meta_path, &metadata_json).await {
            warn!(path = ?temp_meta_path, error = %e, "failed to write cache metadata file");
            let _ = fs::remove_file(&temp_data_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_data_path, &data_path).await {
            warn!(from = ?temp_data_path, to = ?data_path, error = %e, "failed to rename cache data file");
            let _ = fs::remove_file(&temp_data_path).await;
            let _ = fs::remove_file(&temp_meta_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_meta_path, &meta_path).await {
            warn!(from = ?temp_meta_path, to = ?meta_path, error = %e, "failed to rename cache metadata file");
            // Data was renamed but metadata was not, clean up both.
            let _ = fs::remove_file(&data_path).await;
            let _ = fs::remove_file(&temp_meta_path).await;
            return Err(e);
        }

        debug!(key = ?key, "cached entry to disk");
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        self.ensure_initialized().await?;

        let data_result = fs::remove_file(self.data_path(key)).await;
        let meta_result = fs::remove_file(self.meta_path(key)).await;

        match (data_result, meta_result) {
            (Err(e), _) if e.kind() != io::ErrorKind::NotFound => Err(e),
            (_, Err(e)) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    async fn clear(&self) -> CacheResult<()> {
        self.ensure_initialized().await?;

        let mut entries = fs::read_dir(&self.cache_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_dir() {
                if let Err(e) = fs::remove_dir_all(&path).await {
                    warn!(path = ?path, error = %e, "failed to remove cache subdirectory");
                }
            } else if let Err(e) = fs::remove_file(&path).await {
                warn!(path = ?path, error = %e, "failed to remove cache file");
            }
        }

        self.initialized
            .store(false, std::sync::atomic::Ordering::Relaxed);
        self.ensure_initialized().await
    }
}
