use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use simdesk_telemetry::MetricsRecorder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::expiring::{normalize_path, ExpiringCache};
use crate::upstream::{Upstream, UpstreamResponse};
use crate::validators::{ValidatorRecord, ValidatorScope, ValidatorState};

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub scope: ValidatorScope,
    pub fetch_timeout: Duration,
    pub ttl: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            scope: ValidatorScope::Shared,
            fetch_timeout: Duration::from_secs(10),
            ttl: Duration::from_secs(300),
        }
    }
}

/// Result of a validator-layer fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    /// New content from the upstream; validators and body store updated.
    Fresh(Bytes),
    /// Upstream reported no change; body served from the store.
    NotModified(Bytes),
    /// Upstream reported no change but nothing is stored for the key.
    NoContent,
}

impl FetchOutcome {
    pub fn is_fresh_from_upstream(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }

    pub fn body(&self) -> Option<&Bytes> {
        match self {
            Self::Fresh(body) | Self::NotModified(body) => Some(body),
            Self::NoContent => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Fresh(_) => "fresh",
            Self::NotModified(_) => "not_modified",
            Self::NoContent => "no_content",
        }
    }
}

/// Result of a full read through both cache layers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Served {
    /// Short-circuited by the expiring cache; no upstream call was made.
    Expiring(Bytes),
    Fetched(FetchOutcome),
}

impl Served {
    pub fn body(&self) -> Option<&Bytes> {
        match self {
            Self::Expiring(body) => Some(body),
            Self::Fetched(outcome) => outcome.body(),
        }
    }
}

/// Injected cache service shared by every handler that mirrors an
/// upstream or derived resource.
pub struct CacheGateway {
    validators: ValidatorState,
    bodies: DashMap<String, Bytes>,
    expiring: ExpiringCache,
    /// Serializes validator replacement with the matching body insert.
    commit: Mutex<()>,
    config: GatewayConfig,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl CacheGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            validators: ValidatorState::new(config.scope),
            bodies: DashMap::new(),
            expiring: ExpiringCache::new(config.ttl),
            commit: Mutex::new(()),
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Validators currently governing `key`.
    pub fn validators(&self, key: &str) -> Arc<ValidatorRecord> {
        self.validators.get(key)
    }

    /// How many times the validator record has been replaced.
    pub fn validator_writes(&self) -> u64 {
        self.validators.writes()
    }

    pub fn stored_body(&self, key: &str) -> Option<Bytes> {
        self.bodies.get(key).map(|b| b.value().clone())
    }

    pub fn expiring(&self) -> &ExpiringCache {
        &self.expiring
    }

    /// Read through the expiring cache, keyed by the normalized
    /// `request_path`, then the validator layer keyed by `key`.
    /// Fresh and not-modified bodies are placed in the expiring cache;
    /// `NoContent` and errors are not.
    pub async fn serve(
        &self,
        request_path: &str,
        key: &str,
        upstream: &dyn Upstream,
        cancel: &CancellationToken,
    ) -> Result<Served, FetchError> {
        let path = normalize_path(request_path);
        if let Some(body) = self.expiring.get(&path) {
            debug!(path = %path, "Expiring cache hit");
            self.count("expiring_hit");
            return Ok(Served::Expiring(body));
        }

        let outcome = self.fetch_with_validators(key, upstream, cancel).await?;
        if let Some(body) = outcome.body() {
            self.expiring.insert(&path, body.clone());
        }
        Ok(Served::Fetched(outcome))
    }

    /// Conditional fetch of `key`, bounded by the configured timeout and
    /// `cancel`. On any error the validator record and body store are
    /// left exactly as they were.
    pub async fn fetch_with_validators(
        &self,
        key: &str,
        upstream: &dyn Upstream,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, FetchError> {
        let preconditions = self.validators.get(key).preconditions();
        let timeout = self.config.fetch_timeout;
        let started = Instant::now();

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            r = tokio::time::timeout(timeout, upstream.fetch(key, &preconditions)) => {
                r.unwrap_or(Err(FetchError::Timeout(timeout)))
            }
        };
        self.observe_latency(started.elapsed());

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(key, error = %e, kind = e.error_kind(), "Upstream fetch failed");
                self.count(e.error_kind());
                return Err(e);
            }
        };

        let outcome = match response {
            UpstreamResponse::NotModified => match self.stored_body(key) {
                Some(body) => FetchOutcome::NotModified(body),
                None => {
                    warn!(key, "Upstream reported not modified but no body is stored");
                    FetchOutcome::NoContent
                }
            },
            UpstreamResponse::Fresh(fresh) => {
                {
                    let _guard = self.commit.lock();
                    self.validators.replace(
                        key,
                        ValidatorRecord {
                            etag: fresh.etag,
                            last_modified: fresh.last_modified,
                        },
                    );
                    self.bodies.insert(key.to_string(), fresh.body.clone());
                }
                FetchOutcome::Fresh(fresh.body)
            }
        };

        debug!(key, outcome = outcome.label(), "Conditional fetch complete");
        self.count(outcome.label());
        Ok(outcome)
    }

    fn count(&self, outcome: &str) {
        if let Some(m) = &self.metrics {
            m.counter_inc("cache.fetch", &[("outcome", outcome)], 1);
        }
    }

    fn observe_latency(&self, elapsed: Duration) {
        if let Some(m) = &self.metrics {
            m.histogram_observe("cache.upstream_ms", &[], elapsed.as_secs_f64() * 1000.0);
        }
    }
}
