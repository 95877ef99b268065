//! Opaque bearer tokens mapped to users.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use dashmap::DashMap;
use simdesk_core::ids::UserId;
use uuid::Uuid;

pub trait CredentialStore: Send + Sync {
    fn verify(&self, token: &str) -> Option<UserId>;

    /// Mint a token for `user`.
    fn issue(&self, user: UserId) -> String;
}

/// In-memory token table.
#[derive(Default)]
pub struct StaticCredentials {
    tokens: DashMap<String, UserId>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let creds = Self::new();
        for (token, user) in pairs {
            creds.insert(token, UserId::from_raw(user));
        }
        creds
    }

    fn insert(&self, token: impl Into<String>, user: UserId) {
        self.tokens.insert(token.into(), user);
    }
}

impl CredentialStore for StaticCredentials {
    fn verify(&self, token: &str) -> Option<UserId> {
        self.tokens.get(token).map(|u| u.value().clone())
    }

    fn issue(&self, user: UserId) -> String {
        let token = format!("tok_{}", Uuid::now_v7().simple());
        self.insert(token.clone(), user);
        token
    }
}

/// Token from the `Authorization` header. Accepts `Bearer <token>` and a
/// bare token.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?.trim_start();
    let token = raw
        .strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .unwrap_or(raw)
        .trim();
    (!token.is_empty()).then_some(token)
}
