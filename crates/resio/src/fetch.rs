//! # Fetch Coordination
//!
//! Obtains archive bytes for a catalog entry: cache chain first, then the
//! origin, with a format fallback and single-flighted upstream calls so
//! many concurrent requests for the same archive produce exactly one
//! download.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::Client;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::archive::ArchiveFormat;
use crate::cache::{CacheChain, CacheKey, CacheMetadata};
use crate::error::FetchError;
use crate::trace::{AttemptOutcome, AttemptTarget, FetchTrace, TraceAttempt};

/// One archive URL to try, with the format its bytes must validate as.
#[derive(Debug, Clone)]
pub struct ArchiveRequest {
    pub url: String,
    pub format: ArchiveFormat,
}

impl ArchiveRequest {
    /// Build a request with the format inferred from the URL shape.
    pub fn for_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let format = ArchiveFormat::for_url(&url);
        Self { url, format }
    }
}

/// Validated archive bytes plus the key they are cached under.
///
/// Cheap to clone: the payload is a shared [`Bytes`].
#[derive(Debug, Clone)]
pub struct ArchiveHandle {
    pub cache_key: CacheKey,
    pub bytes: Bytes,
    pub format: ArchiveFormat,
}

/// Seam over the archive origin, so coordination logic is testable without
/// a network.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Download the full body at `url`. Non-success statuses are errors.
    async fn download(&self, url: &str) -> Result<Bytes, FetchError>;
}

pub struct HttpArchiveSource {
    client: Client,
}

impl HttpArchiveSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArchiveSource for HttpArchiveSource {
    async fn download(&self, url: &str) -> Result<Bytes, FetchError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::UpstreamUnavailable(format!(
                "{url}: status {}",
                response.status()
            )));
        }
        Ok(response.bytes().await?)
    }
}

/// What a completed origin fetch broadcasts to its waiters: the shared
/// result plus the attempts the leader made, so every waiter's trace shows
/// what actually happened upstream.
#[derive(Clone)]
struct FlightOutcome {
    result: Result<ArchiveHandle, FetchError>,
    attempts: Vec<TraceAttempt>,
}

struct CoordinatorInner {
    source: Arc<dyn ArchiveSource>,
    chain: Arc<CacheChain>,
    /// In-flight origin fetches by cache-key filename. An entry exists only
    /// while one upstream call runs; it is removed before waiters are
    /// released.
    in_flight: Mutex<HashMap<String, broadcast::Sender<FlightOutcome>>>,
}

#[derive(Clone)]
pub struct FetchCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl FetchCoordinator {
    pub fn new(source: Arc<dyn ArchiveSource>, chain: Arc<CacheChain>) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                source,
                chain,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Obtain validated archive bytes, preferring `primary` and falling back
    /// to `fallback` on any failure (transport, status, or corruption).
    ///
    /// Each attempt caches under its own key; a successful fallback is never
    /// written under the primary key.
    pub async fn fetch(
        &self,
        primary: ArchiveRequest,
        fallback: Option<ArchiveRequest>,
        force_refresh: bool,
        trace: &mut FetchTrace,
    ) -> Result<ArchiveHandle, FetchError> {
        let primary_err = match self.obtain(&primary, force_refresh, trace).await {
            Ok(handle) => return Ok(handle),
            Err(e) => e,
        };

        let Some(fallback) = fallback else {
            return Err(classify_single(&primary.url, primary_err));
        };

        warn!(
            primary = primary.url,
            fallback = fallback.url,
            error = %primary_err,
            "primary archive attempt failed, trying fallback format"
        );

        match self.obtain(&fallback, force_refresh, trace).await {
            Ok(handle) => Ok(handle),
            Err(fallback_err) => Err(combine_failures(
                &primary.url,
                primary_err,
                &fallback.url,
                fallback_err,
            )),
        }
    }

    /// One attempt: chain lookup (with corrupt-hit purge), then a
    /// single-flighted origin fetch.
    async fn obtain(
        &self,
        request: &ArchiveRequest,
        force_refresh: bool,
        trace: &mut FetchTrace,
    ) -> Result<ArchiveHandle, FetchError> {
        let key = CacheKey::archive(&request.url);

        if !force_refresh
            && let Some(hit) = self.inner.chain.get(&key, trace).await
        {
            match request.format.validate(&hit.bytes) {
                Ok(()) => {
                    return Ok(ArchiveHandle {
                        cache_key: key,
                        bytes: hit.bytes,
                        format: request.format,
                    });
                }
                Err(e) => {
                    // A corrupted write must not poison the chain: drop it
                    // from every tier and fall through to origin.
                    warn!(key = ?key, tier = hit.tier, error = %e, "cached archive failed validation, purging");
                    let started = Instant::now();
                    self.inner.chain.purge(&key).await;
                    trace.record(
                        AttemptTarget::CacheTier { tier: hit.tier },
                        AttemptOutcome::CorruptPurged,
                        started,
                    );
                }
            }
        }

        self.single_flight(request, &key, trace).await
    }

    /// At most one upstream fetch per cache key. Later callers attach as
    /// waiters and share the leader's result. The actual fetch runs in a
    /// spawned task, so a caller cancelling its own request never aborts a
    /// fetch other waiters depend on.
    async fn single_flight(
        &self,
        request: &ArchiveRequest,
        key: &CacheKey,
        trace: &mut FetchTrace,
    ) -> Result<ArchiveHandle, FetchError> {
        let slot = key.to_filename();

        let (mut rx, is_leader) = {
            let mut in_flight = self.inner.in_flight.lock();
            match in_flight.get(&slot) {
                Some(tx) => (tx.subscribe(), false),
                None => {
                    let (tx, rx) = broadcast::channel(1);
                    in_flight.insert(slot.clone(), tx.clone());

                    let inner = self.inner.clone();
                    let request = request.clone();
                    let key = key.clone();
                    tokio::spawn(async move {
                        let outcome = run_origin_fetch(&inner, &request, &key).await;
                        // Remove before sending so callers arriving after
                        // completion start a fresh fetch instead of
                        // subscribing to a finished channel.
                        inner.in_flight.lock().remove(&slot);
                        let _ = tx.send(outcome);
                    });

                    (rx, true)
                }
            }
        };

        let wait_started = Instant::now();
        let outcome = rx.recv().await.map_err(|_| {
            FetchError::Internal("in-flight archive fetch dropped without a result".into())
        })?;

        if !is_leader {
            trace.record(
                AttemptTarget::InFlight {
                    key: request.url.clone(),
                },
                match &outcome.result {
                    Ok(_) => AttemptOutcome::Success,
                    Err(e) => AttemptOutcome::Failed {
                        reason: e.to_string(),
                    },
                },
                wait_started,
            );
        }
        trace.absorb(outcome.attempts);
        outcome.result
    }
}

/// The leader's work: download, validate, store through the chain, release.
async fn run_origin_fetch(
    inner: &CoordinatorInner,
    request: &ArchiveRequest,
    key: &CacheKey,
) -> FlightOutcome {
    let mut scratch = FetchTrace::new();
    let started = Instant::now();
    let target = AttemptTarget::Origin {
        url: request.url.clone(),
    };

    let bytes = match inner.source.download(&request.url).await {
        Ok(bytes) => bytes,
        Err(e) => {
            scratch.record(
                target,
                AttemptOutcome::Failed {
                    reason: e.to_string(),
                },
                started,
            );
            return FlightOutcome {
                result: Err(e),
                attempts: scratch.attempts,
            };
        }
    };

    if let Err(e) = request.format.validate(&bytes) {
        scratch.record(
            target,
            AttemptOutcome::Failed {
                reason: e.to_string(),
            },
            started,
        );
        // Corrupted bytes are never persisted.
        return FlightOutcome {
            result: Err(e),
            attempts: scratch.attempts,
        };
    }

    scratch.record(target, AttemptOutcome::Success, started);

    let content_type = match request.format {
        ArchiveFormat::Zip => "application/zip",
        ArchiveFormat::TarGz => "application/gzip",
    };
    let metadata = CacheMetadata::new(bytes.len() as u64).with_content_type(content_type);
    let stored = inner.chain.put(key, bytes.clone(), metadata).await;
    debug!(key = ?key, tiers = stored, size = bytes.len(), "archive stored through cache chain");

    FlightOutcome {
        result: Ok(ArchiveHandle {
            cache_key: key.clone(),
            bytes,
            format: request.format,
        }),
        attempts: scratch.attempts,
    }
}

fn classify_single(url: &str, err: FetchError) -> FetchError {
    match err {
        FetchError::CorruptArchive(_) => err,
        FetchError::UpstreamUnavailable(_) => err,
        other => FetchError::UpstreamUnavailable(format!("{url}: {other}")),
    }
}

fn combine_failures(
    primary_url: &str,
    primary: FetchError,
    fallback_url: &str,
    fallback: FetchError,
) -> FetchError {
    let detail = format!("primary {primary_url}: {primary}; fallback {fallback_url}: {fallback}");
    match (&primary, &fallback) {
        // Bytes were obtained both times but never validated.
        (FetchError::CorruptArchive(_), FetchError::CorruptArchive(_)) => {
            FetchError::CorruptArchive(detail)
        }
        _ => FetchError::UpstreamUnavailable(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheProvider, MemoryCache};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Origin fake: canned responses per URL, per-URL call counts, optional
    /// latency so tests can overlap requests.
    struct FakeOrigin {
        responses: Mutex<HashMap<String, Result<Bytes, String>>>,
        calls: Mutex<HashMap<String, usize>>,
        total_calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl FakeOrigin {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(HashMap::new()),
                calls: Mutex::new(HashMap::new()),
                total_calls: AtomicUsize::new(0),
                delay: None,
            })
        }

        fn with_delay(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(HashMap::new()),
                calls: Mutex::new(HashMap::new()),
                total_calls: AtomicUsize::new(0),
                delay: Some(delay),
            })
        }

        fn serve(&self, url: &str, bytes: Bytes) {
            self.responses.lock().insert(url.to_string(), Ok(bytes));
        }

        fn fail(&self, url: &str, reason: &str) {
            self.responses
                .lock()
                .insert(url.to_string(), Err(reason.to_string()));
        }

        fn calls_for(&self, url: &str) -> usize {
            self.calls.lock().get(url).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl ArchiveSource for FakeOrigin {
        async fn download(&self, url: &str) -> Result<Bytes, FetchError> {
            self.total_calls.fetch_add(1, Ordering::SeqCst);
            *self.calls.lock().entry(url.to_string()).or_insert(0) += 1;
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match self.responses.lock().get(url) {
                Some(Ok(bytes)) => Ok(bytes.clone()),
                Some(Err(reason)) => Err(FetchError::UpstreamUnavailable(format!(
                    "{url}: {reason}"
                ))),
                None => Err(FetchError::UpstreamUnavailable(format!(
                    "{url}: status 404"
                ))),
            }
        }
    }

    fn zip_bytes() -> Bytes {
        crate::archive::tests::build_zip(&[("51-GEN.usfm", b"\\id GEN")])
    }

    fn tar_gz_bytes() -> Bytes {
        crate::archive::tests::build_tar_gz(&[("51-GEN.usfm", b"\\id GEN")])
    }

    fn coordinator(origin: Arc<FakeOrigin>) -> (FetchCoordinator, Arc<CacheChain>) {
        let chain = Arc::new(CacheChain::new(
            vec![Arc::new(MemoryCache::new(16 * 1024 * 1024)) as Arc<dyn CacheProvider>],
            true,
        ));
        (FetchCoordinator::new(origin, chain.clone()), chain)
    }

    const PRIMARY: &str = "https://origin.example/repo/archive/v1.zip";
    const FALLBACK: &str = "https://origin.example/repo/tarball/v1";

    fn primary() -> ArchiveRequest {
        ArchiveRequest::for_url(PRIMARY)
    }

    fn fallback() -> Option<ArchiveRequest> {
        Some(ArchiveRequest::for_url(FALLBACK))
    }

    #[tokio::test]
    async fn miss_then_fetch_then_hit() {
        let origin = FakeOrigin::new();
        origin.serve(PRIMARY, zip_bytes());
        let (coordinator, _) = coordinator(origin.clone());

        let mut trace = FetchTrace::new();
        let handle = coordinator
            .fetch(primary(), fallback(), false, &mut trace)
            .await
            .unwrap();
        assert_eq!(handle.format, ArchiveFormat::Zip);
        assert_eq!(origin.calls_for(PRIMARY), 1);
        // One cache miss, one successful origin attempt.
        assert!(trace.attempts.iter().any(|a| a.outcome == AttemptOutcome::Miss));
        assert!(trace.attempts.iter().any(|a| a.outcome == AttemptOutcome::Success));

        let mut trace = FetchTrace::new();
        coordinator
            .fetch(primary(), fallback(), false, &mut trace)
            .await
            .unwrap();
        // Second call is a pure cache hit.
        assert_eq!(origin.calls_for(PRIMARY), 1);
        assert_eq!(trace.attempts.len(), 1);
        assert_eq!(trace.attempts[0].outcome, AttemptOutcome::Hit);
    }

    #[tokio::test]
    async fn concurrent_fetches_single_flight() {
        let origin = FakeOrigin::with_delay(Duration::from_millis(50));
        origin.serve(PRIMARY, zip_bytes());
        let (coordinator, _) = coordinator(origin.clone());

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    let mut trace = FetchTrace::new();
                    coordinator
                        .fetch(primary(), fallback(), false, &mut trace)
                        .await
                })
            })
            .collect();

        for task in tasks {
            let handle = task.await.unwrap().unwrap();
            assert_eq!(handle.bytes, zip_bytes());
        }

        assert_eq!(origin.total_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn status_failure_falls_back_and_caches_under_own_key() {
        let origin = FakeOrigin::new();
        origin.fail(PRIMARY, "status 500");
        origin.serve(FALLBACK, tar_gz_bytes());
        let (coordinator, chain) = coordinator(origin.clone());

        let mut trace = FetchTrace::new();
        let handle = coordinator
            .fetch(primary(), fallback(), false, &mut trace)
            .await
            .unwrap();
        assert_eq!(handle.format, ArchiveFormat::TarGz);
        assert_eq!(handle.cache_key, CacheKey::archive(FALLBACK));

        // The fallback result is cached under the fallback key only, so the
        // primary URL is always retried independently.
        let mut scratch = FetchTrace::new();
        assert!(chain.get(&CacheKey::archive(PRIMARY), &mut scratch).await.is_none());
        assert!(chain.get(&CacheKey::archive(FALLBACK), &mut scratch).await.is_some());
    }

    #[tokio::test]
    async fn corrupt_origin_bytes_fall_back_without_caching() {
        let origin = FakeOrigin::new();
        origin.serve(PRIMARY, Bytes::from_static(b"this is not a zip archive at all"));
        origin.serve(FALLBACK, tar_gz_bytes());
        let (coordinator, chain) = coordinator(origin.clone());

        let mut trace = FetchTrace::new();
        let handle = coordinator
            .fetch(primary(), fallback(), false, &mut trace)
            .await
            .unwrap();
        assert_eq!(handle.format, ArchiveFormat::TarGz);

        // Corrupted primary bytes were never persisted.
        let mut scratch = FetchTrace::new();
        assert!(chain.get(&CacheKey::archive(PRIMARY), &mut scratch).await.is_none());
    }

    #[tokio::test]
    async fn both_attempts_failing_is_upstream_unavailable() {
        let origin = FakeOrigin::new();
        origin.fail(PRIMARY, "status 502");
        origin.fail(FALLBACK, "status 503");
        let (coordinator, _) = coordinator(origin);

        let mut trace = FetchTrace::new();
        let err = coordinator
            .fetch(primary(), fallback(), false, &mut trace)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::UpstreamUnavailable(_)));
        // Both URLs appear in the trace even on the error path.
        let failed = trace
            .attempts
            .iter()
            .filter(|a| matches!(a.outcome, AttemptOutcome::Failed { .. }))
            .count();
        assert!(failed >= 2);
    }

    #[tokio::test]
    async fn both_attempts_corrupt_is_corrupt_archive() {
        let origin = FakeOrigin::new();
        origin.serve(PRIMARY, Bytes::from_static(b"garbage that is long enough......"));
        origin.serve(FALLBACK, Bytes::from_static(b"also garbage, equally long......"));
        let (coordinator, _) = coordinator(origin);

        let mut trace = FetchTrace::new();
        let err = coordinator
            .fetch(primary(), fallback(), false, &mut trace)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::CorruptArchive(_)));
    }

    #[tokio::test]
    async fn corrupt_cache_hit_self_heals() {
        let origin = FakeOrigin::new();
        origin.serve(PRIMARY, zip_bytes());
        let (coordinator, chain) = coordinator(origin.clone());

        // Poison the cache with bytes that fail signature validation.
        let key = CacheKey::archive(PRIMARY);
        let garbage = Bytes::from_static(b"poisoned cache entry, long enough to pass size");
        chain
            .put(&key, garbage, CacheMetadata::new(46))
            .await;

        let mut trace = FetchTrace::new();
        let handle = coordinator
            .fetch(primary(), fallback(), false, &mut trace)
            .await
            .unwrap();
        assert_eq!(handle.bytes, zip_bytes());
        assert_eq!(origin.calls_for(PRIMARY), 1);
        assert!(trace
            .attempts
            .iter()
            .any(|a| a.outcome == AttemptOutcome::CorruptPurged));

        // Subsequent call hits cache cleanly.
        let mut trace = FetchTrace::new();
        coordinator
            .fetch(primary(), fallback(), false, &mut trace)
            .await
            .unwrap();
        assert_eq!(origin.calls_for(PRIMARY), 1);
        assert_eq!(trace.attempts[0].outcome, AttemptOutcome::Hit);
    }

    #[tokio::test]
    async fn force_refresh_bypasses_cache_and_writes_back() {
        let origin = FakeOrigin::new();
        origin.serve(PRIMARY, zip_bytes());
        let (coordinator, chain) = coordinator(origin.clone());

        let mut trace = FetchTrace::new();
        coordinator
            .fetch(primary(), fallback(), false, &mut trace)
            .await
            .unwrap();
        assert_eq!(origin.calls_for(PRIMARY), 1);

        let mut trace = FetchTrace::new();
        coordinator
            .fetch(primary(), fallback(), true, &mut trace)
            .await
            .unwrap();
        assert_eq!(origin.calls_for(PRIMARY), 2);

        // Still written back through the chain.
        let mut scratch = FetchTrace::new();
        assert!(chain.get(&CacheKey::archive(PRIMARY), &mut scratch).await.is_some());
    }

    #[tokio::test]
    async fn caller_cancellation_does_not_abort_shared_fetch() {
        let origin = FakeOrigin::with_delay(Duration::from_millis(80));
        origin.serve(PRIMARY, zip_bytes());
        let (coordinator, _) = coordinator(origin.clone());

        let leader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                let mut trace = FetchTrace::new();
                coordinator.fetch(primary(), None, false, &mut trace).await
            })
        };
        // Give the leader time to register, then attach a waiter.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                let mut trace = FetchTrace::new();
                coordinator.fetch(primary(), None, false, &mut trace).await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        leader.abort();

        let handle = waiter.await.unwrap().unwrap();
        assert_eq!(handle.bytes, zip_bytes());
        assert_eq!(origin.total_calls.load(Ordering::SeqCst), 1);
    }
}
