use std::time::Duration;

/// Why a gateway fetch produced no outcome. Shared state is never
/// modified when one of these is returned.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("upstream unavailable: {0}")]
    Upstream(String),

    #[error("upstream returned status {status}")]
    Status { status: u16 },

    #[error("upstream fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("fetch cancelled")]
    Cancelled,

    #[error("local source failed: {0}")]
    Source(String),
}

impl FetchError {
    /// Worth retrying later with the same request.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Upstream(_) | Self::Timeout(_) => true,
            Self::Status { status } => *status == 429 || *status >= 500,
            Self::Cancelled | Self::Source(_) => false,
        }
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Upstream(_) => "upstream_unavailable",
            Self::Status { .. } => "upstream_status",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::Source(_) => "source_failed",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Upstream(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(FetchError::Upstream("connection refused".into()).is_transient());
        assert!(FetchError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(FetchError::Status { status: 503 }.is_transient());
        assert!(FetchError::Status { status: 429 }.is_transient());
        assert!(!FetchError::Status { status: 404 }.is_transient());
        assert!(!FetchError::Cancelled.is_transient());
        assert!(!FetchError::Source("bad row".into()).is_transient());
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(FetchError::Cancelled.error_kind(), "cancelled");
        assert_eq!(FetchError::Timeout(Duration::ZERO).error_kind(), "timeout");
        assert_eq!(FetchError::Status { status: 500 }.error_kind(), "upstream_status");
    }
}
