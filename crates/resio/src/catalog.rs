//! # Catalog Resolution
//!
//! Queries the remote catalog service for entries matching an
//! organization/language/subject filter, fans out across organizations in
//! parallel, de-duplicates the merge, and caches query results with a short
//! TTL through the cache chain.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheChain, CacheKey, CacheKind, CacheMetadata};
use crate::error::FetchError;
use crate::trace::{AttemptOutcome, AttemptTarget, FetchTrace, TraceAttempt};

/// Identifies exactly one archive. Immutable once constructed; all cache
/// keys derive from it or from the URLs it resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    pub organization: String,
    pub language: String,
    pub subject: String,
    /// A version tag or the default branch.
    #[serde(rename = "ref")]
    pub reference: String,
}

/// Maps a logical content unit (e.g. a book code) to its exact path inside
/// the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentIngredient {
    pub identifier: String,
    #[serde(rename = "path")]
    pub inner_path: String,
}

/// One matched catalog entry. Built from a single upstream query response,
/// read-only afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub owner: String,
    pub subject: String,
    pub language: String,
    #[serde(rename = "ref")]
    pub reference: String,
    pub primary_archive_url: String,
    pub fallback_archive_url: Option<String>,
    pub ingredients: Vec<ContentIngredient>,
}

impl CatalogEntry {
    pub fn identifier(&self) -> ResourceIdentifier {
        ResourceIdentifier {
            organization: self.owner.clone(),
            language: self.language.clone(),
            subject: self.subject.clone(),
            reference: self.reference.clone(),
        }
    }

    /// Version string used to content-address extracted files.
    pub fn version_key(&self) -> String {
        format!("{}/{}@{}", self.owner, self.name, self.reference)
    }

    /// Inner path for a logical content identifier. Exact match only, to
    /// avoid cross-resource contamination.
    pub fn ingredient_path(&self, identifier: &str) -> Option<&str> {
        self.ingredients
            .iter()
            .find(|i| i.identifier == identifier)
            .map(|i| i.inner_path.as_str())
    }

    /// Whether `inner_path` is one of this entry's declared ingredients.
    pub fn has_ingredient_path(&self, inner_path: &str) -> bool {
        self.ingredients.iter().any(|i| i.inner_path == inner_path)
    }
}

/// Organization scope of a catalog query, resolved once at the API
/// boundary into a normalized list of per-query owner filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrganizationFilter {
    /// Search across all organizations.
    All,
    /// One filtered query.
    One(String),
    /// One query per organization, issued in parallel.
    Many(Vec<String>),
}

impl OrganizationFilter {
    /// Owner filters for the individual queries. `None` means unfiltered.
    fn owners(&self) -> Vec<Option<String>> {
        match self {
            OrganizationFilter::All => vec![None],
            OrganizationFilter::One(org) => vec![Some(org.clone())],
            OrganizationFilter::Many(orgs) if orgs.is_empty() => vec![None],
            OrganizationFilter::Many(orgs) => orgs.iter().cloned().map(Some).collect(),
        }
    }
}

impl From<&str> for OrganizationFilter {
    fn from(org: &str) -> Self {
        OrganizationFilter::One(org.to_string())
    }
}

impl From<Vec<String>> for OrganizationFilter {
    fn from(orgs: Vec<String>) -> Self {
        OrganizationFilter::Many(orgs)
    }
}

/// Exact parameters of one upstream catalog query. The cache key for a
/// query result is derived from these and nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogQuery {
    pub owner: Option<String>,
    pub language: String,
    pub subject: String,
    pub stage: String,
    pub limit: u32,
}

impl CatalogQuery {
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(
            CacheKind::Catalog,
            format!(
                "owner={}&lang={}&subject={}&stage={}&limit={}",
                self.owner.as_deref().unwrap_or(""),
                self.language,
                self.subject,
                self.stage,
                self.limit
            ),
        )
    }
}

/// Seam over the catalog service, so resolution logic is testable without a
/// network.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn search(&self, query: &CatalogQuery) -> Result<Vec<CatalogEntry>, FetchError>;
}

/// Catalog source over a DCS-style `catalog/search` HTTP endpoint.
pub struct HttpCatalogSource {
    client: Client,
    search_url: Url,
}

impl HttpCatalogSource {
    pub fn new(client: Client, base_url: &str) -> Result<Self, FetchError> {
        let base = Url::parse(base_url)
            .map_err(|e| FetchError::Url(format!("catalog base URL {base_url}: {e}")))?;
        let search_url = base
            .join("api/v1/catalog/search")
            .map_err(|e| FetchError::Url(format!("catalog search URL: {e}")))?;
        Ok(Self { client, search_url })
    }
}

/// Wire shape of one upstream catalog record. Only the fields the engine
/// consumes; everything else in the response is ignored.
#[derive(Debug, Deserialize)]
struct SearchRecord {
    name: String,
    #[serde(default)]
    owner: String,
    #[serde(default)]
    subject: String,
    #[serde(default, alias = "lang_code")]
    language: String,
    #[serde(default)]
    branch_or_tag_name: String,
    #[serde(default)]
    zipball_url: String,
    #[serde(default)]
    tarball_url: Option<String>,
    #[serde(default)]
    ingredients: Vec<ContentIngredient>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SearchRecord>,
}

impl SearchRecord {
    fn into_entry(self) -> Option<CatalogEntry> {
        // An entry with no download URL at all cannot be fetched.
        let (primary, fallback) = if !self.zipball_url.is_empty() {
            (self.zipball_url, self.tarball_url.filter(|u| !u.is_empty()))
        } else if let Some(tarball) = self.tarball_url.filter(|u| !u.is_empty()) {
            (tarball, None)
        } else {
            return None;
        };

        Some(CatalogEntry {
            name: self.name,
            owner: self.owner,
            subject: self.subject,
            language: self.language,
            reference: self.branch_or_tag_name,
            primary_archive_url: primary,
            fallback_archive_url: fallback,
            ingredients: self.ingredients,
        })
    }
}

#[async_trait]
impl CatalogSource for HttpCatalogSource {
    async fn search(&self, query: &CatalogQuery) -> Result<Vec<CatalogEntry>, FetchError> {
        let mut url = self.search_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(owner) = &query.owner {
                pairs.append_pair("owner", owner);
            }
            pairs.append_pair("lang", &query.language);
            pairs.append_pair("subject", &query.subject);
            pairs.append_pair("stage", &query.stage);
            pairs.append_pair("limit", &query.limit.to_string());
        }

        debug!(url = %url, "catalog search");
        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Catalog(format!(
                "catalog returned {} for {url}",
                response.status()
            )));
        }

        let body: SearchResponse = response.json().await?;
        Ok(body
            .data
            .into_iter()
            .filter_map(SearchRecord::into_entry)
            .collect())
    }
}

/// A catalog query failure inside a fan-out. Partial discovery is still
/// useful, so these annotate a successful result instead of failing it.
#[derive(Debug, Clone, Serialize)]
pub struct OrganizationFailure {
    pub organization: Option<String>,
    pub reason: String,
}

/// Result of catalog resolution: the de-duplicated entries plus any
/// organizations whose queries failed during fan-out.
#[derive(Debug, Clone)]
pub struct ResolvedCatalog {
    pub entries: Vec<CatalogEntry>,
    pub failed: Vec<OrganizationFailure>,
}

impl ResolvedCatalog {
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

pub struct CatalogResolver {
    source: Arc<dyn CatalogSource>,
    chain: Arc<CacheChain>,
    stage: String,
    limit: u32,
    catalog_ttl: Duration,
}

impl CatalogResolver {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        chain: Arc<CacheChain>,
        stage: impl Into<String>,
        limit: u32,
        catalog_ttl: Duration,
    ) -> Self {
        Self {
            source,
            chain,
            stage: stage.into(),
            limit,
            catalog_ttl,
        }
    }

    /// Resolve the filter into catalog entries. Per-organization queries run
    /// in parallel; one organization failing does not fail the others.
    pub async fn resolve(
        &self,
        filter: &OrganizationFilter,
        language: &str,
        subject: &str,
        force_refresh: bool,
        trace: &mut FetchTrace,
    ) -> Result<ResolvedCatalog, FetchError> {
        let queries: Vec<CatalogQuery> = filter
            .owners()
            .into_iter()
            .map(|owner| CatalogQuery {
                owner,
                language: language.to_string(),
                subject: subject.to_string(),
                stage: self.stage.clone(),
                limit: self.limit,
            })
            .collect();

        let results = futures::future::join_all(
            queries
                .iter()
                .map(|query| self.run_query(query, force_refresh)),
        )
        .await;

        let mut merged: Vec<CatalogEntry> = Vec::new();
        let mut index: HashMap<(String, String), usize> = HashMap::new();
        let mut failed = Vec::new();

        for (query, (attempts, result)) in queries.iter().zip(results) {
            trace.absorb(attempts);
            match result {
                Ok(entries) => {
                    for entry in entries {
                        let key = (entry.name.clone(), entry.owner.clone());
                        match index.get(&key) {
                            Some(&at) => {
                                // Prefer a non-empty owner; otherwise first
                                // seen wins, including on ref conflicts.
                                if merged[at].owner.is_empty() && !entry.owner.is_empty() {
                                    merged[at] = entry;
                                }
                            }
                            None => {
                                index.insert(key, merged.len());
                                merged.push(entry);
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(owner = ?query.owner, error = %e, "catalog query failed during fan-out");
                    failed.push(OrganizationFailure {
                        organization: query.owner.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        // When every query failed there is nothing partial to return.
        if merged.is_empty() && !failed.is_empty() && failed.len() == queries.len() {
            return Err(FetchError::Catalog(format!(
                "all {} catalog queries failed; first: {}",
                failed.len(),
                failed[0].reason
            )));
        }

        Ok(ResolvedCatalog {
            entries: merged,
            failed,
        })
    }

    /// Run one query, consulting the chain first. Returns the attempts made
    /// so the caller can merge them into the request trace in fan-out order.
    async fn run_query(
        &self,
        query: &CatalogQuery,
        force_refresh: bool,
    ) -> (Vec<TraceAttempt>, Result<Vec<CatalogEntry>, FetchError>) {
        let mut scratch = FetchTrace::new();
        let key = query.cache_key();

        if !force_refresh
            && let Some(hit) = self.chain.get(&key, &mut scratch).await
        {
            match serde_json::from_slice::<Vec<CatalogEntry>>(&hit.bytes) {
                Ok(entries) => return (scratch.attempts, Ok(entries)),
                Err(e) => {
                    warn!(key = ?key, error = %e, "cached catalog result unparseable, purging");
                    self.chain.purge(&key).await;
                }
            }
        }

        let started = Instant::now();
        let target = AttemptTarget::CatalogQuery {
            organization: query.owner.clone(),
        };
        match self.source.search(query).await {
            Ok(entries) => {
                scratch.record(target, AttemptOutcome::Success, started);
                if let Ok(serialized) = serde_json::to_vec(&entries) {
                    let metadata = CacheMetadata::new(serialized.len() as u64)
                        .with_content_type("application/json")
                        .with_expiration(self.catalog_ttl);
                    self.chain
                        .put(&key, Bytes::from(serialized), metadata)
                        .await;
                }
                (scratch.attempts, Ok(entries))
            }
            Err(e) => {
                scratch.record(
                    target,
                    AttemptOutcome::Failed {
                        reason: e.to_string(),
                    },
                    started,
                );
                (scratch.attempts, Err(e))
            }
        }
    }
}
