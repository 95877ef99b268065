use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use simdesk_cache::{FetchError, LocalBody, LocalQuery};
use simdesk_core::ids::{SimulationId, UserId};

/// A saved simulation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Simulation {
    pub id: SimulationId,
    pub user_id: UserId,
    pub data: serde_json::Value,
    pub capital: f64,
    pub created_at: DateTime<Utc>,
}

/// Request body for saving a simulation.
#[derive(Clone, Debug, Deserialize)]
pub struct NewSimulation {
    pub data: serde_json::Value,
    pub capital: f64,
}

impl NewSimulation {
    pub fn validate(&self) -> Result<(), String> {
        if !self.data.is_object() {
            return Err("data must be a JSON object".into());
        }
        if !self.capital.is_finite() {
            return Err("capital must be a finite number".into());
        }
        Ok(())
    }

    pub fn into_simulation(self, user_id: UserId) -> Simulation {
        Simulation {
            id: SimulationId::new(),
            user_id,
            data: self.data,
            capital: self.capital,
            created_at: Utc::now(),
        }
    }
}

pub trait SimulationStore: Send + Sync {
    /// A user's simulations, oldest first.
    fn list_for_user(&self, user: &UserId) -> Vec<Simulation>;
    fn insert(&self, simulation: Simulation);
}

#[derive(Default)]
pub struct InMemorySimulationStore {
    by_user: DashMap<UserId, Vec<Simulation>>,
}

impl InMemorySimulationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SimulationStore for InMemorySimulationStore {
    fn list_for_user(&self, user: &UserId) -> Vec<Simulation> {
        self.by_user.get(user).map(|v| v.clone()).unwrap_or_default()
    }

    fn insert(&self, simulation: Simulation) {
        self.by_user
            .entry(simulation.user_id.clone())
            .or_default()
            .push(simulation);
    }
}

/// HTTP-date form used for `Last-Modified`.
pub fn http_date(at: &DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// One user's simulation list as a cacheable local query.
pub struct UserSimulations {
    store: Arc<dyn SimulationStore>,
    user: UserId,
}

impl UserSimulations {
    pub fn new(store: Arc<dyn SimulationStore>, user: UserId) -> Self {
        Self { store, user }
    }
}

#[async_trait]
impl LocalQuery for UserSimulations {
    async fn query(&self, _key: &str) -> Result<LocalBody, FetchError> {
        let simulations = self.store.list_for_user(&self.user);
        let last_modified = simulations.iter().map(|s| s.created_at).max().map(|t| http_date(&t));
        let body = serde_json::to_vec(&simulations).map_err(|e| FetchError::Source(e.to_string()))?;
        Ok(LocalBody {
            body: Bytes::from(body),
            last_modified,
        })
    }
}
