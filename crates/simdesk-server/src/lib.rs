pub mod accounts;
pub mod auth;
pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod routes;
pub mod server;
pub mod simulations;

pub use chat::{ChatAssistant, ChatEvent};
pub use client::{BroadcastReport, SessionRegistry};
pub use config::ServerConfig;
pub use error::ApiError;
pub use server::{build_router, start, AppState, ServerHandle};
