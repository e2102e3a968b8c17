//! # Resource Engine
//!
//! Top-level API tying the pieces together: catalog resolution, coordinated
//! archive fetching, and single-entry extraction, with a [`FetchTrace`]
//! accumulated per request and returned on success and failure alike.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};

use crate::archive::extract_entry;
use crate::cache::{
    CacheChain, CacheKey, CacheMetadata, CacheProvider, FileCache, MemoryCache, RemoteCache,
};
use crate::catalog::{
    CatalogEntry, CatalogResolver, CatalogSource, HttpCatalogSource, OrganizationFailure,
    OrganizationFilter,
};
use crate::client::create_client;
use crate::config::EngineConfig;
use crate::error::{EngineError, FetchError};
use crate::fetch::{ArchiveRequest, ArchiveSource, FetchCoordinator, HttpArchiveSource};
use crate::trace::FetchTrace;

/// Outcome of [`ResourceEngine::resolve`]: matched entries, any
/// organizations whose queries failed during fan-out, and the trace.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub entries: Vec<CatalogEntry>,
    pub failed: Vec<OrganizationFailure>,
    pub trace: FetchTrace,
}

impl Resolution {
    /// True when at least one fan-out query failed while others succeeded.
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Outcome of a file fetch: the entry's bytes and the trace of every cache
/// tier and URL consulted on the way.
#[derive(Debug, Clone)]
pub struct FileContent {
    pub bytes: Bytes,
    pub trace: FetchTrace,
}

/// The engine. Cheap to clone and safe to share across tasks.
#[derive(Clone)]
pub struct ResourceEngine {
    resolver: Arc<CatalogResolver>,
    coordinator: FetchCoordinator,
    chain: Arc<CacheChain>,
}

impl ResourceEngine {
    /// Build an engine from configuration: HTTP client, catalog source, and
    /// the cache chain in memory, disk, remote order.
    pub fn new(config: EngineConfig) -> Result<Self, FetchError> {
        let client = create_client(&config)?;
        let catalog = Arc::new(HttpCatalogSource::new(client.clone(), &config.catalog_url)?);

        let mut providers: Vec<Arc<dyn CacheProvider>> = Vec::new();
        if config.cache.max_memory_bytes > 0 {
            providers.push(Arc::new(MemoryCache::new(config.cache.max_memory_bytes)));
        }
        let disk_path = config
            .cache
            .disk_path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("resio-cache"));
        providers.push(Arc::new(FileCache::new(disk_path)));
        if config.cache.remote_endpoint.is_some() {
            providers.push(Arc::new(RemoteCache::new(
                client.clone(),
                config.cache.remote_endpoint.as_deref(),
            )));
        }

        let chain = Arc::new(CacheChain::new(providers, config.cache.enabled));
        let archive = Arc::new(HttpArchiveSource::new(client));
        Ok(Self::assemble(&config, catalog, archive, chain))
    }

    /// Build an engine around injected sources and an existing chain.
    pub fn with_sources(
        config: &EngineConfig,
        catalog: Arc<dyn CatalogSource>,
        archive: Arc<dyn ArchiveSource>,
        chain: Arc<CacheChain>,
    ) -> Self {
        Self::assemble(config, catalog, archive, chain)
    }

    fn assemble(
        config: &EngineConfig,
        catalog: Arc<dyn CatalogSource>,
        archive: Arc<dyn ArchiveSource>,
        chain: Arc<CacheChain>,
    ) -> Self {
        info!(
            catalog = config.catalog_url,
            tiers = ?chain.tier_names(),
            "resource engine ready"
        );
        Self {
            resolver: Arc::new(CatalogResolver::new(
                catalog,
                chain.clone(),
                config.stage.clone(),
                config.search_limit,
                config.cache.catalog_ttl,
            )),
            coordinator: FetchCoordinator::new(archive, chain.clone()),
            chain,
        }
    }

    /// The cache chain, for runtime tier management.
    pub fn cache_chain(&self) -> &Arc<CacheChain> {
        &self.chain
    }

    /// Resolve a filter into catalog entries.
    ///
    /// A fan-out where some organizations fail is still a success, annotated
    /// in [`Resolution::failed`]. No entries matching at all is
    /// [`FetchError::NoMatchingResource`].
    pub async fn resolve(
        &self,
        filter: &OrganizationFilter,
        language: &str,
        subject: &str,
        force_refresh: bool,
    ) -> Result<Resolution, EngineError> {
        let mut trace = FetchTrace::new();
        let resolved = match self
            .resolver
            .resolve(filter, language, subject, force_refresh, &mut trace)
            .await
        {
            Ok(resolved) => resolved,
            Err(e) => return Err(EngineError::new(e, trace)),
        };

        if resolved.entries.is_empty() {
            return Err(EngineError::new(FetchError::NoMatchingResource, trace));
        }

        trace.finish(format!(
            "resolved {} entries ({} failed queries)",
            resolved.entries.len(),
            resolved.failed.len()
        ));
        Ok(Resolution {
            entries: resolved.entries,
            failed: resolved.failed,
            trace,
        })
    }

    /// Fetch one file out of an entry's archive.
    ///
    /// `force_refresh` skips cache reads for this call only; results are
    /// still written back through the chain.
    pub async fn get_file(
        &self,
        entry: &CatalogEntry,
        inner_path: &str,
        force_refresh: bool,
    ) -> Result<FileContent, EngineError> {
        let mut trace = FetchTrace::new();
        match self
            .get_file_inner(entry, inner_path, force_refresh, &mut trace)
            .await
        {
            Ok(bytes) => {
                trace.finish(format!("{} bytes from {}", bytes.len(), entry.version_key()));
                Ok(FileContent { bytes, trace })
            }
            Err(e) => Err(EngineError::new(e, trace)),
        }
    }

    /// Fetch a file by its logical content identifier (e.g. a book code)
    /// instead of an explicit inner path.
    pub async fn get_ingredient(
        &self,
        entry: &CatalogEntry,
        identifier: &str,
        force_refresh: bool,
    ) -> Result<FileContent, EngineError> {
        let Some(inner_path) = entry.ingredient_path(identifier) else {
            return Err(EngineError::new(
                FetchError::NotFound(format!(
                    "no ingredient {identifier:?} in {}/{}",
                    entry.owner, entry.name
                )),
                FetchTrace::new(),
            ));
        };
        let inner_path = inner_path.to_string();
        self.get_file(entry, &inner_path, force_refresh).await
    }

    async fn get_file_inner(
        &self,
        entry: &CatalogEntry,
        inner_path: &str,
        force_refresh: bool,
        trace: &mut FetchTrace,
    ) -> Result<Bytes, FetchError> {
        // When the entry declares its contents, a path outside the ingredient
        // map can be refused before any archive traffic.
        if !entry.ingredients.is_empty() && !entry.has_ingredient_path(inner_path) {
            return Err(FetchError::NotFound(format!(
                "{inner_path} is not an ingredient of {}",
                entry.version_key()
            )));
        }

        // Extracted files are content-addressed by version + path, so a hit
        // here needs no validation or expiry check.
        let file_key = CacheKey::file(&entry.version_key(), inner_path);
        if !force_refresh
            && let Some(hit) = self.chain.get(&file_key, trace).await
        {
            return Ok(hit.bytes);
        }

        let primary = ArchiveRequest::for_url(&entry.primary_archive_url);
        let fallback = entry
            .fallback_archive_url
            .as_deref()
            .map(ArchiveRequest::for_url);
        let handle = self
            .coordinator
            .fetch(primary, fallback, force_refresh, trace)
            .await?;

        // Decompression is the one CPU-bound step; keep it off the runtime.
        let format = handle.format;
        let archive_bytes = handle.bytes.clone();
        let wanted = inner_path.to_string();
        let bytes = tokio::task::spawn_blocking(move || {
            extract_entry(format, &archive_bytes, &wanted)
        })
        .await
        .map_err(|e| FetchError::Internal(format!("extraction task failed: {e}")))??;

        let metadata = CacheMetadata::new(bytes.len() as u64);
        let stored = self.chain.put(&file_key, bytes.clone(), metadata).await;
        debug!(
            version = entry.version_key(),
            path = inner_path,
            size = bytes.len(),
            tiers = stored,
            "extracted file cached"
        );

        Ok(bytes)
    }
}
