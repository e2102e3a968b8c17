//! # Resio
//!
//! A resource fetch engine with tiered caching.
//!
//! Resolves resource identifiers against a remote catalog, downloads the
//! matching archive with a format fallback, extracts single entries in
//! place, and runs every byte through a pluggable multi-tier cache chain.
//!
//! ## Features
//!
//! - Catalog resolution with parallel organization fan-out
//! - Ordered cache chain (memory, disk, remote) with warm-up on slow hits
//! - Single-flighted archive fetches with primary/fallback URL shapes
//! - Signature validation with corrupt-entry self-healing
//! - A per-request [`FetchTrace`] returned on success and failure alike

pub mod archive;
pub mod cache;
pub mod catalog;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod trace;

pub use archive::ArchiveFormat;
pub use cache::{
    CacheChain, CacheConfig, CacheKey, CacheKind, CacheMetadata, CacheProvider, FileCache,
    MemoryCache, RemoteCache,
};
pub use catalog::{
    CatalogEntry, CatalogQuery, CatalogResolver, CatalogSource, ContentIngredient,
    HttpCatalogSource, OrganizationFailure, OrganizationFilter, ResolvedCatalog,
    ResourceIdentifier,
};
pub use client::create_client;
pub use config::{DEFAULT_CATALOG_URL, EngineConfig, EngineConfigBuilder};
pub use engine::{FileContent, Resolution, ResourceEngine};
pub use error::{EngineError, FetchError};
pub use fetch::{ArchiveHandle, ArchiveRequest, ArchiveSource, FetchCoordinator, HttpArchiveSource};
pub use trace::{AttemptOutcome, AttemptTarget, FetchTrace, TraceAttempt};
