//! # Fetch Trace
//!
//! A structured record of everything tried while serving one logical
//! request: cache tiers checked, URLs fetched, outcomes, timings. The trace
//! is part of the API contract, not incidental logging; it is returned with
//! every result and attached to every error.

use serde::Serialize;
use std::time::Instant;
use uuid::Uuid;

/// What a single attempt was aimed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptTarget {
    /// A cache tier lookup.
    CacheTier { tier: String },
    /// An upstream archive download.
    Origin { url: String },
    /// A catalog search query, optionally scoped to one organization.
    CatalogQuery { organization: Option<String> },
    /// Joined an already in-flight fetch for the same key instead of
    /// issuing a duplicate upstream call.
    InFlight { key: String },
}

/// How a single attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Hit,
    Miss,
    Success,
    Failed { reason: String },
    /// A cache hit that failed integrity validation and was purged from
    /// every tier before falling through to origin.
    CorruptPurged,
}

/// One attempt within a request.
#[derive(Debug, Clone, Serialize)]
pub struct TraceAttempt {
    pub target: AttemptTarget,
    pub outcome: AttemptOutcome,
    pub duration_ms: u64,
}

/// Accumulated trace for one logical request. Append-only while the request
/// runs, immutable once returned.
#[derive(Debug, Clone, Serialize)]
pub struct FetchTrace {
    pub request_id: Uuid,
    pub attempts: Vec<TraceAttempt>,
    pub final_outcome: Option<String>,
}

impl FetchTrace {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            attempts: Vec::new(),
            final_outcome: None,
        }
    }

    /// Append one attempt, timing it from `started`.
    pub fn record(&mut self, target: AttemptTarget, outcome: AttemptOutcome, started: Instant) {
        self.attempts.push(TraceAttempt {
            target,
            outcome,
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }

    /// Append attempts gathered elsewhere (fan-out tasks, a shared in-flight
    /// fetch) in the order they happened.
    pub fn absorb(&mut self, attempts: impl IntoIterator<Item = TraceAttempt>) {
        self.attempts.extend(attempts);
    }

    pub fn finish(&mut self, outcome: impl Into<String>) {
        self.final_outcome = Some(outcome.into());
    }
}

impl Default for FetchTrace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_in_order() {
        let mut trace = FetchTrace::new();
        let started = Instant::now();
        trace.record(
            AttemptTarget::CacheTier {
                tier: "memory".into(),
            },
            AttemptOutcome::Miss,
            started,
        );
        trace.record(
            AttemptTarget::Origin {
                url: "https://example.org/a.zip".into(),
            },
            AttemptOutcome::Success,
            started,
        );
        trace.finish("ok");

        assert_eq!(trace.attempts.len(), 2);
        assert_eq!(trace.attempts[0].outcome, AttemptOutcome::Miss);
        assert_eq!(trace.final_outcome.as_deref(), Some("ok"));
    }

    #[test]
    fn serializes_to_json() {
        let mut trace = FetchTrace::new();
        trace.record(
            AttemptTarget::CatalogQuery {
                organization: Some("unfoldingWord".into()),
            },
            AttemptOutcome::Failed {
                reason: "status 500".into(),
            },
            Instant::now(),
        );
        let json = serde_json::to_string(&trace).unwrap();
        assert!(json.contains("catalog_query"));
        assert!(json.contains("unfoldingWord"));
    }
}
