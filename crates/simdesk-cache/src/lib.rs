//! Conditional-cache gateway.
//!
//! Two independent layers sit in front of any idempotent read:
//!
//! - an expiring cache keyed by normalized request path, consulted first;
//! - a validator layer (ETag / Last-Modified) that turns repeat reads into
//!   conditional fetches and serves the stored body on "not modified".
//!
//! The layers can disagree for up to one TTL: the expiring cache keeps
//! serving a body the validator layer would already have replaced.

pub mod error;
pub mod expiring;
pub mod gateway;
pub mod hash;
pub mod upstream;
pub mod validators;

pub use error::FetchError;
pub use expiring::{normalize_path, ExpiringCache};
pub use gateway::{CacheGateway, FetchOutcome, GatewayConfig, Served};
pub use hash::content_tag;
pub use upstream::{FreshBody, HashedSource, HttpUpstream, LocalBody, LocalQuery, Upstream, UpstreamResponse};
pub use validators::{Preconditions, ValidatorRecord, ValidatorScope, ValidatorState};
