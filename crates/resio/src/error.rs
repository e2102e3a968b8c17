//! Error taxonomy for the fetch engine.

use std::sync::Arc;

use crate::trace::FetchTrace;

/// Errors produced while resolving, fetching, or extracting a resource.
///
/// `Clone` so every single-flight waiter can receive the same failure;
/// non-cloneable sources are wrapped in `Arc`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("no matching resource in catalog")]
    NoMatchingResource,

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("catalog query failed: {0}")]
    Catalog(String),

    #[error("invalid URL: {0}")]
    Url(String),

    #[error("HTTP error: {source}")]
    Http {
        #[from]
        source: Arc<reqwest::Error>,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: Arc<std::io::Error>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Http {
            source: Arc::new(err),
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::Io {
            source: Arc::new(err),
        }
    }
}

/// A failure surfaced to the caller, carrying the trace of everything the
/// engine tried before giving up.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct EngineError {
    #[source]
    source: FetchError,
    trace: FetchTrace,
}

impl EngineError {
    pub fn new(source: FetchError, mut trace: FetchTrace) -> Self {
        if trace.final_outcome.is_none() {
            trace.finish(source.to_string());
        }
        Self { source, trace }
    }

    pub fn kind(&self) -> &FetchError {
        &self.source
    }

    pub fn trace(&self) -> &FetchTrace {
        &self.trace
    }

    pub fn into_parts(self) -> (FetchError, FetchTrace) {
        (self.source, self.trace)
    }
}
