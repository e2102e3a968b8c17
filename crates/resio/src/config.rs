//! Engine configuration.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::cache::CacheConfig;

const DEFAULT_USER_AGENT: &str = concat!("resio-engine/", env!("CARGO_PKG_VERSION"));

/// Default catalog service endpoint.
pub const DEFAULT_CATALOG_URL: &str = "https://git.door43.org";

/// Configurable options for the resource engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the catalog service.
    pub catalog_url: String,

    /// Release stage filter sent with every catalog query.
    pub stage: String,

    /// Maximum number of entries requested per catalog query.
    pub search_limit: u32,

    /// Cache tier configuration.
    pub cache: CacheConfig,

    /// Overall timeout per upstream HTTP call. Timeouts apply per call, not
    /// per logical request; a timeout on the primary archive URL triggers
    /// the fallback exactly as a hard failure would.
    pub timeout: Duration,

    /// Connection timeout (time to establish the initial connection).
    pub connect_timeout: Duration,

    /// Whether to follow redirects (archive origins redirect to blob hosts).
    pub follow_redirects: bool,

    /// User agent string.
    pub user_agent: String,

    /// Custom HTTP headers for requests.
    pub headers: HeaderMap,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            catalog_url: DEFAULT_CATALOG_URL.to_owned(),
            stage: "prod".to_owned(),
            search_limit: 50,
            cache: CacheConfig::default(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: EngineConfig::default_headers(),
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    pub fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/json, application/zip, application/gzip, */*"),
        );
        headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate"),
        );
        headers
    }
}

/// Builder for [`EngineConfig`] with a fluent API.
#[derive(Debug, Clone)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn with_catalog_url(mut self, url: impl Into<String>) -> Self {
        self.config.catalog_url = url.into();
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.config.stage = stage.into();
        self
    }

    pub fn with_search_limit(mut self, limit: u32) -> Self {
        self.config.search_limit = limit;
        self
    }

    pub fn with_cache_config(mut self, cache: CacheConfig) -> Self {
        self.config.cache = cache;
        self
    }

    pub fn with_caching_enabled(mut self, enabled: bool) -> Self {
        self.config.cache.enabled = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<reqwest::header::HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.config.headers.insert(name, value);
        }
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
