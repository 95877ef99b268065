//! Username/password accounts behind `/register` and `/login`.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use simdesk_core::ids::UserId;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
    #[error("User already exists")]
    UserExists,

    #[error("Invalid credentials")]
    InvalidCredentials,
}

/// Body of `/register` and `/login`.
#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn validate(&self) -> Result<(), String> {
        if self.username.trim().is_empty() {
            return Err("username must not be empty".into());
        }
        if self.password.is_empty() {
            return Err("password must not be empty".into());
        }
        Ok(())
    }
}

pub trait UserStore: Send + Sync {
    /// Create an account. Fails when the username is taken.
    fn register(&self, username: &str, password: &str) -> Result<UserId, AccountError>;

    /// Check a username/password pair.
    fn authenticate(&self, username: &str, password: &str) -> Result<UserId, AccountError>;
}

struct Account {
    salt: String,
    digest: String,
}

#[derive(Default)]
pub struct InMemoryUserStore {
    accounts: DashMap<String, Account>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserStore for InMemoryUserStore {
    fn register(&self, username: &str, password: &str) -> Result<UserId, AccountError> {
        match self.accounts.entry(username.to_string()) {
            Entry::Occupied(_) => Err(AccountError::UserExists),
            Entry::Vacant(slot) => {
                let salt = Uuid::now_v7().simple().to_string();
                let digest = password_digest(&salt, password);
                slot.insert(Account { salt, digest });
                Ok(UserId::from_raw(username))
            }
        }
    }

    fn authenticate(&self, username: &str, password: &str) -> Result<UserId, AccountError> {
        let account = self.accounts.get(username).ok_or(AccountError::InvalidCredentials)?;
        if password_digest(&account.salt, password) != account.digest {
            return Err(AccountError::InvalidCredentials);
        }
        Ok(UserId::from_raw(username))
    }
}

fn password_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}
