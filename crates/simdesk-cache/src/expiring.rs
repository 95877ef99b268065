use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::time::Instant;

/// Canonical form of a request path used as a cache key.
///
/// Collapses repeated slashes, drops a trailing slash (except for the
/// root) and sorts query pairs, so `/a//b/?y=2&x=1` and `/a/b?x=1&y=2`
/// share one entry.
pub fn normalize_path(path_and_query: &str) -> String {
    let (path, query) = match path_and_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_and_query, None),
    };

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let mut normalized = format!("/{}", segments.join("/"));

    if let Some(query) = query {
        let mut pairs: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
        if !pairs.is_empty() {
            pairs.sort_unstable();
            normalized.push('?');
            normalized.push_str(&pairs.join("&"));
        }
    }
    normalized
}

struct Entry {
    body: Bytes,
    inserted_at: Instant,
}

/// Fixed-TTL body cache. Entries are never refreshed in place; an
/// expired entry is dropped on the next read or purge.
pub struct ExpiringCache {
    entries: DashMap<String, Entry>,
    ttl: Duration,
}

impl ExpiringCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        if let Some(entry) = self.entries.get(key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.body.clone());
            }
        }
        self.entries
            .remove_if(key, |_, entry| entry.inserted_at.elapsed() >= self.ttl);
        None
    }

    pub fn insert(&self, key: &str, body: Bytes) {
        self.entries.insert(
            key.to_string(),
            Entry {
                body,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
