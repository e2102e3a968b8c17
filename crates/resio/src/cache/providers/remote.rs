//! # Remote Cache Provider
//!
//! HTTP key/value tier for deployments with a remote metadata or blob store.
//! The blob is stored at `{base}/{kind}/{filename}` with a JSON metadata
//! document at `{base}/{kind}/{filename}.meta`.
//!
//! When no endpoint is bound in this deployment the provider reports itself
//! unavailable and the chain skips it.

use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tokio::io;
use tracing::{debug, warn};
use url::Url;

use crate::cache::types::{CacheKey, CacheLookup, CacheMetadata, CacheResult};

use super::CacheProvider;

#[derive(Debug, Clone)]
pub struct RemoteCache {
    client: Client,
    base: Option<Url>,
}

impl RemoteCache {
    /// Create a remote tier. `endpoint == None` means the binding is not
    /// configured for this deployment; the tier stays registered but
    /// unavailable.
    pub fn new(client: Client, endpoint: Option<&str>) -> Self {
        let base = endpoint.and_then(|e| match Url::parse(e) {
            Ok(url) => Some(url),
            Err(err) => {
                warn!(endpoint = e, error = %err, "invalid remote cache endpoint, tier disabled");
                None
            }
        });
        Self { client, base }
    }

    fn object_url(&self, key: &CacheKey, suffix: &str) -> Option<Url> {
        let base = self.base.as_ref()?;
        base.join(&format!(
            "{}/{}{}",
            key.kind.as_str(),
            key.to_filename(),
            suffix
        ))
        .ok()
    }

    async fn fetch_object(&self, url: Url) -> CacheResult<Option<Bytes>> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(io::Error::other)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                Ok(Some(response.bytes().await.map_err(io::Error::other)?))
            }
            status => Err(io::Error::other(format!(
                "remote cache returned {status} for {url}"
            ))),
        }
    }

    async fn store_object(&self, url: Url, body: Bytes) -> CacheResult<()> {
        let response = self
            .client
            .put(url.clone())
            .body(body)
            .send()
            .await
            .map_err(io::Error::other)?;

        if !response.status().is_success() {
            return Err(io::Error::other(format!(
                "remote cache returned {} storing {url}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CacheProvider for RemoteCache {
    fn name(&self) -> &str {
        "remote"
    }

    fn available(&self) -> bool {
        self.base.is_some()
    }

    async fn get(&self, key: &CacheKey) -> CacheLookup {
        let (Some(data_url), Some(meta_url)) =
            (self.object_url(key, ""), self.object_url(key, ".meta"))
        else {
            return Ok(None);
        };

        let Some(meta_bytes) = self.fetch_object(meta_url).await? else {
            return Ok(None);
        };
        let metadata: CacheMetadata = match serde_json::from_slice(&meta_bytes) {
            Ok(m) => m,
            Err(e) => {
                warn!(key = ?key, error = %e, "remote cache metadata unparseable");
                return Ok(None);
            }
        };

        if metadata.is_expired() {
            debug!(key = ?key, "remote cache entry expired");
            let _ = self.remove(key).await;
            return Ok(None);
        }

        let Some(data) = self.fetch_object(data_url).await? else {
            return Ok(None);
        };

        Ok(Some((data, metadata)))
    }

    async fn put(&self, key: CacheKey, data: Bytes, metadata: CacheMetadata) -> CacheResult<()> {
        let (Some(data_url), Some(meta_url)) =
            (self.object_url(&key, ""), self.object_url(&key, ".meta"))
        else {
            return Ok(());
        };

        let meta_json = serde_json::to_vec(&metadata).map_err(io::Error::other)?;
        self.store_object(data_url, data).await?;
        self.store_object(meta_url, Bytes::from(meta_json)).await?;
        debug!(key = ?key, "cached entry to remote store");
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        let (Some(data_url), Some(meta_url)) =
            (self.object_url(key, ""), self.object_url(key, ".meta"))
        else {
            return Ok(());
        };

        for url in [data_url, meta_url] {
            let response = self
                .client
                .delete(url.clone())
                .send()
                .await
                .map_err(io::Error::other)?;
            if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
                return Err(io::Error::other(format!(
                    "remote cache returned {} deleting {url}",
                    response.status()
                )));
            }
        }
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        // The remote store exposes no bulk listing; entries age out or are
        // purged individually on corruption.
        Ok(())
    }
}
