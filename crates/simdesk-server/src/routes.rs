//! HTTP handlers. Cached reads go through a `CacheGateway`; the response
//! always carries an `ETag` derived from the served body.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, RawQuery, State};
use axum::http::header::{CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use simdesk_cache::{content_tag, normalize_path, FetchOutcome, HashedSource, Served};
use simdesk_core::ids::UserId;

use crate::accounts::Credentials;
use crate::auth::bearer_token;
use crate::error::ApiError;
use crate::server::AppState;
use crate::simulations::{NewSimulation, UserSimulations};

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "sessions": state.registry.open_count(),
    }))
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<UserId, ApiError> {
    let token = bearer_token(headers).ok_or(ApiError::Unauthorized)?;
    state.credentials.verify(token).ok_or(ApiError::InvalidToken)
}

fn credentials_from(
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Credentials, ApiError> {
    let Json(creds) = payload.map_err(|e| ApiError::MalformedPayload(e.body_text()))?;
    creds.validate().map_err(ApiError::MalformedPayload)?;
    Ok(creds)
}

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Response, ApiError> {
    let creds = credentials_from(payload)?;
    let user = state.users.register(&creds.username, &creds.password)?;
    tracing::info!(user_id = %user, "User registered");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "User registered successfully" })),
    )
        .into_response())
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Response, ApiError> {
    let creds = credentials_from(payload)?;
    let user = state
        .users
        .authenticate(&creds.username, &creds.password)
        .inspect_err(|_| tracing::debug!("Login rejected"))?;
    let token = state.credentials.issue(user);
    Ok(Json(json!({ "token": token, "username": creds.username })).into_response())
}

pub async fn profile(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user = authenticate(&state, &headers)?;
    Ok(Json(json!({
        "message": "Welcome to your profile",
        "user": { "username": user },
    }))
    .into_response())
}

pub async fn list_simulations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user = authenticate(&state, &headers)?;
    let request_path = format!("/simulations?user={user}");
    let key = format!("simulations:{user}");
    let source = HashedSource::new(UserSimulations::new(Arc::clone(&state.store), user));

    let served = state
        .listings
        .serve(&request_path, &key, &source, &state.shutdown)
        .await?;
    let response = respond(served, &headers)?;
    Ok(([(CONTENT_TYPE, "application/json")], response).into_response())
}

pub async fn create_simulation(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<NewSimulation>, JsonRejection>,
) -> Result<Response, ApiError> {
    let user = authenticate(&state, &headers)?;
    let Json(new) = payload.map_err(|e| ApiError::MalformedPayload(e.body_text()))?;
    new.validate().map_err(ApiError::MalformedPayload)?;

    let simulation = new.into_simulation(user);
    tracing::info!(simulation_id = %simulation.id, user_id = %simulation.user_id, "Simulation saved");
    state.store.insert(simulation.clone());
    Ok((StatusCode::CREATED, Json(simulation)).into_response())
}

pub async fn mirror(
    State(state): State<AppState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let upstream = state.mirror.as_deref().ok_or(ApiError::MirrorDisabled)?;
    let resource = match query {
        Some(q) => format!("/{path}?{q}"),
        None => format!("/{path}"),
    };
    let key = normalize_path(&resource);

    let served = state
        .gateway
        .serve(&format!("/mirror{resource}"), &key, upstream, &state.shutdown)
        .await?;
    respond(served, &headers)
}

/// Turn a gateway read into a response: 304 when the client already
/// holds the served body's tag, 204 when there is no body at all.
fn respond(served: Served, headers: &HeaderMap) -> Result<Response, ApiError> {
    let label = match &served {
        Served::Expiring(_) => "hit",
        Served::Fetched(FetchOutcome::Fresh(_)) => "fresh",
        Served::Fetched(_) => "revalidated",
    };
    let body: Bytes = served.body().cloned().ok_or(ApiError::NoContent)?;
    let tag = content_tag(&body);
    let validators = [(ETAG, tag.clone()), (X_CACHE, label.to_string())];

    let client_tag = headers.get(IF_NONE_MATCH).and_then(|v| v.to_str().ok());
    if client_tag == Some(tag.as_str()) {
        return Ok((StatusCode::NOT_MODIFIED, validators).into_response());
    }
    Ok((StatusCode::OK, validators, body).into_response())
}
