use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::StatusCode;

use crate::error::FetchError;
use crate::hash::content_tag;
use crate::validators::Preconditions;

/// Body plus the validators that came with it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FreshBody {
    pub body: Bytes,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpstreamResponse {
    NotModified,
    Fresh(FreshBody),
}

/// Any idempotent read that understands conditional requests.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn fetch(&self, key: &str, preconditions: &Preconditions) -> Result<UpstreamResponse, FetchError>;
}

/// Conditional GET against a remote HTTP origin.
#[derive(Clone, Debug)]
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUpstream {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn url_for(&self, key: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            key.trim_start_matches('/')
        )
    }
}

fn header_string(headers: &reqwest::header::HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(&self, key: &str, preconditions: &Preconditions) -> Result<UpstreamResponse, FetchError> {
        let mut request = self.client.get(self.url_for(key));
        if let Some(tag) = &preconditions.if_none_match {
            request = request.header(IF_NONE_MATCH, tag);
        }
        if let Some(stamp) = &preconditions.if_modified_since {
            request = request.header(IF_MODIFIED_SINCE, stamp);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            return Ok(UpstreamResponse::NotModified);
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let etag = header_string(response.headers(), ETAG);
        let last_modified = header_string(response.headers(), LAST_MODIFIED);
        let body = response.bytes().await?;

        Ok(UpstreamResponse::Fresh(FreshBody {
            body,
            etag,
            last_modified,
        }))
    }
}

/// Output of a local query: a serialized body and, optionally, the
/// modification stamp of its newest item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalBody {
    pub body: Bytes,
    pub last_modified: Option<String>,
}

/// A read answered in-process, e.g. a store lookup.
#[async_trait]
pub trait LocalQuery: Send + Sync {
    async fn query(&self, key: &str) -> Result<LocalBody, FetchError>;
}

/// Treats a local query as a conditional upstream by deriving its ETag
/// from the body. Identical bodies always yield identical tags, so a
/// repeated poll over unchanged data reports `NotModified`.
///
/// Only `if_none_match` is compared; the tag is authoritative.
pub struct HashedSource<Q> {
    query: Q,
}

impl<Q: LocalQuery> HashedSource<Q> {
    pub fn new(query: Q) -> Self {
        Self { query }
    }
}

#[async_trait]
impl<Q: LocalQuery> Upstream for HashedSource<Q> {
    async fn fetch(&self, key: &str, preconditions: &Preconditions) -> Result<UpstreamResponse, FetchError> {
        let local = self.query.query(key).await?;
        let tag = content_tag(&local.body);

        if preconditions.if_none_match.as_deref() == Some(tag.as_str()) {
            return Ok(UpstreamResponse::NotModified);
        }

        Ok(UpstreamResponse::Fresh(FreshBody {
            body: local.body,
            etag: Some(tag),
            last_modified: local.last_modified,
        }))
    }
}
