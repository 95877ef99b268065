use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

/// Validators remembered from the last fresh upstream response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidatorRecord {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl ValidatorRecord {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }

    pub fn preconditions(&self) -> Preconditions {
        Preconditions {
            if_none_match: self.etag.clone(),
            if_modified_since: self.last_modified.clone(),
        }
    }
}

/// Conditional headers attached to an outgoing fetch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Preconditions {
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<String>,
}

impl Preconditions {
    pub fn is_empty(&self) -> bool {
        self.if_none_match.is_none() && self.if_modified_since.is_none()
    }
}

/// How validator records are keyed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ValidatorScope {
    /// One record for every resource. A fresh fetch of any key replaces
    /// the validators used for all keys.
    #[default]
    Shared,
    /// One record per resource key.
    PerResource,
}

impl FromStr for ValidatorScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "shared" => Ok(Self::Shared),
            "per_resource" => Ok(Self::PerResource),
            other => Err(format!("unknown validator scope: {other}")),
        }
    }
}

enum Records {
    Shared(RwLock<Arc<ValidatorRecord>>),
    PerResource(DashMap<String, Arc<ValidatorRecord>>),
}

/// Validator storage. Records are immutable snapshots behind `Arc`; a
/// write swaps the whole snapshot, so readers never see a mixed record.
pub struct ValidatorState {
    records: Records,
    writes: AtomicU64,
}

impl ValidatorState {
    pub fn new(scope: ValidatorScope) -> Self {
        let records = match scope {
            ValidatorScope::Shared => Records::Shared(RwLock::new(Arc::new(ValidatorRecord::default()))),
            ValidatorScope::PerResource => Records::PerResource(DashMap::new()),
        };
        Self {
            records,
            writes: AtomicU64::new(0),
        }
    }

    pub fn scope(&self) -> ValidatorScope {
        match self.records {
            Records::Shared(_) => ValidatorScope::Shared,
            Records::PerResource(_) => ValidatorScope::PerResource,
        }
    }

    /// Current record governing `key`.
    pub fn get(&self, key: &str) -> Arc<ValidatorRecord> {
        match &self.records {
            Records::Shared(record) => Arc::clone(&record.read()),
            Records::PerResource(map) => map
                .get(key)
                .map(|r| Arc::clone(r.value()))
                .unwrap_or_default(),
        }
    }

    /// Replace the record governing `key`. No fields carry over.
    pub fn replace(&self, key: &str, record: ValidatorRecord) {
        let record = Arc::new(record);
        match &self.records {
            Records::Shared(current) => *current.write() = record,
            Records::PerResource(map) => {
                map.insert(key.to_string(), record);
            }
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of replacements since startup.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}
