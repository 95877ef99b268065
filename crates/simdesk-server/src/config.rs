use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use simdesk_cache::{GatewayConfig, ValidatorScope};
use simdesk_telemetry::LogFormat;
use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    /// Per-session outbound queue bound.
    pub max_send_queue: usize,
    pub question_bank_path: PathBuf,
    /// Base URL mirrored under `/mirror`. Mirroring is off when unset.
    pub upstream_url: Option<String>,
    pub upstream_timeout_secs: u64,
    pub cache_ttl_secs: u64,
    pub validator_scope: ValidatorScope,
    pub log_format: LogFormat,
    /// `(token, user)` pairs accepted on bearer-protected routes.
    pub credentials: Vec<(String, String)>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            max_send_queue: 256,
            question_bank_path: PathBuf::from("data/questions.json"),
            upstream_url: None,
            upstream_timeout_secs: 10,
            cache_ttl_secs: 300,
            validator_scope: ValidatorScope::Shared,
            log_format: LogFormat::Json,
            credentials: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `SIMDESK_*` variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            port: try_load(&lookup, "SIMDESK_PORT", d.port),
            max_send_queue: try_load(&lookup, "SIMDESK_MAX_SEND_QUEUE", d.max_send_queue),
            question_bank_path: lookup("SIMDESK_QUESTION_BANK")
                .map(PathBuf::from)
                .unwrap_or(d.question_bank_path),
            upstream_url: lookup("SIMDESK_UPSTREAM_URL").filter(|s| !s.trim().is_empty()),
            upstream_timeout_secs: try_load(&lookup, "SIMDESK_UPSTREAM_TIMEOUT_SECS", d.upstream_timeout_secs),
            cache_ttl_secs: try_load(&lookup, "SIMDESK_CACHE_TTL_SECS", d.cache_ttl_secs),
            validator_scope: try_load(&lookup, "SIMDESK_VALIDATOR_SCOPE", d.validator_scope),
            log_format: try_load(&lookup, "SIMDESK_LOG_FORMAT", d.log_format),
            credentials: lookup("SIMDESK_TOKENS")
                .map(|raw| parse_credentials(&raw))
                .unwrap_or_default(),
        }
    }

    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            scope: self.validator_scope,
            fetch_timeout: Duration::from_secs(self.upstream_timeout_secs),
            ttl: Duration::from_secs(self.cache_ttl_secs),
        }
    }

    /// Listings synthesize tags per user, so their validators are never
    /// shared regardless of `validator_scope`.
    pub fn listings_gateway(&self) -> GatewayConfig {
        GatewayConfig {
            scope: ValidatorScope::PerResource,
            ..self.gateway()
        }
    }
}

fn try_load<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
    T::Err: Display,
{
    let Some(raw) = lookup(key) else {
        info!("{key} not set, using default: {default:?}");
        return default;
    };
    raw.trim().parse().unwrap_or_else(|e| {
        warn!("Invalid {key} value {raw:?}: {e}, using default: {default:?}");
        default
    })
}

/// `tok_a:alice,tok_b:bob`. Malformed pairs are skipped.
fn parse_credentials(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (token, user) = pair.split_once(':')?;
            let (token, user) = (token.trim(), user.trim());
            if token.is_empty() || user.is_empty() {
                warn!("Skipping malformed credential entry");
                return None;
            }
            Some((token.to_string(), user.to_string()))
        })
        .collect()
}
