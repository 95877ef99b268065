use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use simdesk_cache::{CacheGateway, HttpUpstream};
use simdesk_core::{Matcher, QuestionBank};
use simdesk_telemetry::MetricsRecorder;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::accounts::{InMemoryUserStore, UserStore};
use crate::auth::{CredentialStore, StaticCredentials};
use crate::chat::{self, ChatAssistant, ChatEvent};
use crate::client::{self, SessionRegistry};
use crate::config::ServerConfig;
use crate::routes;
use crate::simulations::{InMemorySimulationStore, SimulationStore};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub events: mpsc::Sender<ChatEvent>,
    /// Mirrored upstream resources.
    pub gateway: Arc<CacheGateway>,
    /// Per-user simulation listings; validators are kept per resource.
    pub listings: Arc<CacheGateway>,
    pub store: Arc<dyn SimulationStore>,
    pub users: Arc<dyn UserStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub mirror: Option<Arc<HttpUpstream>>,
    pub metrics: Arc<MetricsRecorder>,
    /// Cancels in-flight upstream fetches on shutdown.
    pub shutdown: CancellationToken,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::profile))
        .route("/register", post(routes::register))
        .route("/login", post(routes::login))
        .route("/ws", get(ws_handler))
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics))
        .route(
            "/simulations",
            get(routes::list_simulations).post(routes::create_simulation),
        )
        .route("/mirror/{*path}", get(routes::mirror))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle to shut it down.
pub async fn start(
    config: ServerConfig,
    bank: QuestionBank,
    metrics: Arc<MetricsRecorder>,
) -> Result<ServerHandle, std::io::Error> {
    let shutdown = CancellationToken::new();
    let registry = Arc::new(SessionRegistry::new(config.max_send_queue));

    let gateway = Arc::new(CacheGateway::new(config.gateway()).with_metrics(Arc::clone(&metrics)));
    let listings =
        Arc::new(CacheGateway::new(config.listings_gateway()).with_metrics(Arc::clone(&metrics)));
    let cleanup = start_maintenance(
        Arc::clone(&registry),
        vec![Arc::clone(&gateway), Arc::clone(&listings)],
        shutdown.clone(),
    );

    // Chat events: one worker, in arrival order
    let (event_tx, event_rx) = mpsc::channel::<ChatEvent>(1024);
    let assistant = Arc::new(
        ChatAssistant::new(Matcher::with_defaults(bank), Arc::clone(&registry))
            .with_metrics(Arc::clone(&metrics)),
    );
    let assistant_handle = tokio::spawn(chat::run_assistant(event_rx, assistant));

    let mirror = config.upstream_url.as_ref().map(|url| {
        tracing::info!(upstream = %url, "Mirroring upstream");
        Arc::new(HttpUpstream::new(url.clone()))
    });

    let app_state = AppState {
        registry,
        events: event_tx,
        gateway,
        listings,
        store: Arc::new(InMemorySimulationStore::new()),
        users: Arc::new(InMemoryUserStore::new()),
        credentials: Arc::new(StaticCredentials::from_pairs(config.credentials.clone())),
        mirror,
        metrics,
        shutdown: shutdown.clone(),
    };

    let router = build_router(app_state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "Simdesk server started");

    let server_shutdown = shutdown.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
            .ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown,
        server: server_handle,
        _assistant: assistant_handle,
        _cleanup: cleanup,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    _assistant: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections, cancel in-flight fetches and wait for
    /// the listener to drain.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.server.await {
            tracing::warn!(error = %e, "Server task ended abnormally");
        }
        tracing::info!("Simdesk server stopped");
    }
}

/// Session reaping plus expired-body purge on one ticker.
fn start_maintenance(
    registry: Arc<SessionRegistry>,
    gateways: Vec<Arc<CacheGateway>>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let purge_shutdown = shutdown.clone();
    let sessions = client::start_cleanup_task(registry, CLEANUP_INTERVAL, shutdown);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            tokio::select! {
                _ = purge_shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let purged: usize = gateways
                        .iter()
                        .map(|g| g.expiring().purge_expired())
                        .sum();
                    if purged > 0 {
                        tracing::debug!(purged, "Purged expired cache entries");
                    }
                }
            }
        }
        sessions.await.ok();
    })
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (session, rx) = state.registry.register();
    tracing::info!(session_id = %session.id, "WebSocket session connected");

    client::handle_ws_connection(socket, session, rx, state.registry, state.events).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode as Status;
    use futures::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use simdesk_core::QaPair;
    use tokio_tungstenite::tungstenite::Message as WsFrame;

    fn bank() -> QuestionBank {
        QuestionBank::new(vec![QaPair::new("How do I run a simulation?", "Press Run.")])
    }

    fn config() -> ServerConfig {
        ServerConfig {
            port: 0,
            credentials: vec![
                ("tok_alice".into(), "alice".into()),
                ("tok_bob".into(), "bob".into()),
            ],
            ..Default::default()
        }
    }

    async fn start_test(config: ServerConfig) -> (ServerHandle, String) {
        let handle = start(config, bank(), Arc::new(MetricsRecorder::new())).await.unwrap();
        let base = format!("http://127.0.0.1:{}", handle.port);
        (handle, base)
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let (handle, base) = start_test(config()).await;
        assert!(handle.port > 0);

        let resp = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["sessions"], 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn simulations_require_credentials() {
        let (handle, base) = start_test(config()).await;
        let client = reqwest::Client::new();

        let resp = client.get(format!("{base}/simulations")).send().await.unwrap();
        assert_eq!(resp.status(), Status::UNAUTHORIZED);

        let resp = client
            .get(format!("{base}/simulations"))
            .bearer_auth("tok_mallory")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), Status::UNAUTHORIZED);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn create_rejects_malformed_payload() {
        let (handle, base) = start_test(config()).await;
        let client = reqwest::Client::new();

        for payload in [json!({"data": {}}), json!({"data": [1], "capital": 10.0})] {
            let resp = client
                .post(format!("{base}/simulations"))
                .bearer_auth("tok_alice")
                .json(&payload)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), Status::BAD_REQUEST);
            let body: Value = resp.json().await.unwrap();
            assert!(body["message"].is_string());
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn saved_simulation_listed_with_etag_and_revalidates() {
        let (handle, base) = start_test(config()).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/simulations"))
            .bearer_auth("tok_alice")
            .json(&json!({"data": {"years": 30}, "capital": 10000.0}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), Status::CREATED);
        let saved: Value = resp.json().await.unwrap();
        assert_eq!(saved["user_id"], "alice");
        assert_eq!(saved["capital"], 10000.0);

        let resp = client
            .get(format!("{base}/simulations"))
            .bearer_auth("tok_alice")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), Status::OK);
        assert_eq!(resp.headers()["x-cache"], "fresh");
        let etag = resp.headers()["etag"].to_str().unwrap().to_string();
        let list: Vec<Value> = resp.json().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["id"], saved["id"]);

        // Second read is answered by the expiring cache; the tag still matches.
        let resp = client
            .get(format!("{base}/simulations"))
            .bearer_auth("tok_alice")
            .header("if-none-match", &etag)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), Status::NOT_MODIFIED);
        assert_eq!(resp.headers()["x-cache"], "hit");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn users_see_only_their_own_simulations() {
        let (handle, base) = start_test(config()).await;
        let client = reqwest::Client::new();

        client
            .post(format!("{base}/simulations"))
            .bearer_auth("tok_alice")
            .json(&json!({"data": {}, "capital": 1.0}))
            .send()
            .await
            .unwrap();

        let resp = client
            .get(format!("{base}/simulations"))
            .bearer_auth("tok_bob")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), Status::OK);
        let list: Vec<Value> = resp.json().await.unwrap();
        assert!(list.is_empty());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn empty_lists_are_served_to_each_user() {
        let (handle, base) = start_test(config()).await;
        let client = reqwest::Client::new();

        for token in ["tok_bob", "tok_alice"] {
            let resp = client
                .get(format!("{base}/simulations"))
                .bearer_auth(token)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), Status::OK);
            assert_eq!(resp.headers()["x-cache"], "fresh");
            assert_eq!(resp.text().await.unwrap(), "[]");
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn register_login_and_profile() {
        let (handle, base) = start_test(config()).await;
        let client = reqwest::Client::new();
        let creds = json!({"username": "carol", "password": "hunter2"});

        let resp = client.post(format!("{base}/register")).json(&creds).send().await.unwrap();
        assert_eq!(resp.status(), Status::CREATED);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["message"], "User registered successfully");

        let resp = client.post(format!("{base}/register")).json(&creds).send().await.unwrap();
        assert_eq!(resp.status(), Status::BAD_REQUEST);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["message"], "User already exists");

        let resp = client.post(format!("{base}/login")).json(&creds).send().await.unwrap();
        assert_eq!(resp.status(), Status::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["username"], "carol");
        let token = body["token"].as_str().unwrap().to_string();

        let resp = client.get(format!("{base}/")).bearer_auth(&token).send().await.unwrap();
        assert_eq!(resp.status(), Status::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["message"], "Welcome to your profile");
        assert_eq!(body["user"]["username"], "carol");

        // The issued token also unlocks the simulation routes.
        let resp = client
            .get(format!("{base}/simulations"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), Status::OK);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn login_rejects_bad_credentials() {
        let (handle, base) = start_test(config()).await;
        let client = reqwest::Client::new();

        client
            .post(format!("{base}/register"))
            .json(&json!({"username": "dave", "password": "right"}))
            .send()
            .await
            .unwrap();

        for creds in [
            json!({"username": "dave", "password": "wrong"}),
            json!({"username": "nobody", "password": "right"}),
        ] {
            let resp = client.post(format!("{base}/login")).json(&creds).send().await.unwrap();
            assert_eq!(resp.status(), Status::BAD_REQUEST);
            let body: Value = resp.json().await.unwrap();
            assert_eq!(body["message"], "Invalid credentials");
        }

        let resp = client
            .post(format!("{base}/login"))
            .json(&json!({"username": "dave"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), Status::BAD_REQUEST);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn profile_distinguishes_missing_and_invalid_tokens() {
        let (handle, base) = start_test(config()).await;
        let client = reqwest::Client::new();

        let resp = client.get(format!("{base}/")).send().await.unwrap();
        assert_eq!(resp.status(), Status::UNAUTHORIZED);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["message"], "Unauthorized");

        let resp = client.get(format!("{base}/")).bearer_auth("tok_forged").send().await.unwrap();
        assert_eq!(resp.status(), Status::UNAUTHORIZED);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["message"], "Invalid token");

        let resp = client.get(format!("{base}/")).bearer_auth("tok_bob").send().await.unwrap();
        assert_eq!(resp.status(), Status::OK);

        handle.shutdown().await;
    }

    type WsClient = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn next_text(ws: &mut WsClient) -> String {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if frame.is_text() {
                return frame.to_text().unwrap().to_owned();
            }
        }
    }

    #[tokio::test]
    async fn websocket_chat_broadcasts_echo_and_reply() {
        let (handle, base) = start_test(config()).await;
        let url = format!("ws://127.0.0.1:{}/ws", handle.port);
        let welcome = simdesk_core::MatcherConfig::default().welcome;

        let (mut alice, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        assert_eq!(next_text(&mut alice).await, welcome);

        // A new arrival is welcomed on every open session.
        let (mut bob, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        assert_eq!(next_text(&mut bob).await, welcome);
        assert_eq!(next_text(&mut alice).await, welcome);

        alice.send(WsFrame::text("How do I run a simulation?")).await.unwrap();
        for ws in [&mut alice, &mut bob] {
            assert_eq!(next_text(ws).await, "How do I run a simulation?");
            assert_eq!(
                next_text(ws).await,
                "Press Run.\nCan I help you with anything else?"
            );
        }

        let health: Value = reqwest::get(format!("{base}/health")).await.unwrap().json().await.unwrap();
        assert_eq!(health["sessions"], 2);

        bob.close(None).await.unwrap();
        alice.send(WsFrame::text("unrelated chatter")).await.unwrap();
        assert_eq!(next_text(&mut alice).await, "unrelated chatter");
        assert!(next_text(&mut alice).await.starts_with("Sorry"));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn mirror_passes_through_upstream_not_found() {
        let origin = spawn_origin().await;
        let (handle, base) = start_test(ServerConfig {
            upstream_url: Some(origin),
            ..config()
        })
        .await;

        let resp = reqwest::get(format!("{base}/mirror/missing")).await.unwrap();
        assert_eq!(resp.status(), Status::NOT_FOUND);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn mirror_disabled_without_upstream() {
        let (handle, base) = start_test(config()).await;
        let resp = reqwest::get(format!("{base}/mirror/prices")).await.unwrap();
        assert_eq!(resp.status(), Status::NOT_FOUND);
        handle.shutdown().await;
    }

    async fn spawn_origin() -> String {
        let app = Router::new().route(
            "/prices",
            get(|| async { ([("etag", "\"p1\"")], "[101,102]") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn mirror_serves_through_gateway() {
        let origin = spawn_origin().await;
        let (handle, base) = start_test(ServerConfig {
            upstream_url: Some(origin),
            ..config()
        })
        .await;

        let resp = reqwest::get(format!("{base}/mirror/prices")).await.unwrap();
        assert_eq!(resp.status(), Status::OK);
        assert_eq!(resp.headers()["x-cache"], "fresh");
        assert_eq!(resp.text().await.unwrap(), "[101,102]");

        let resp = reqwest::get(format!("{base}/mirror/prices/")).await.unwrap();
        assert_eq!(resp.headers()["x-cache"], "hit");

        let resp = reqwest::get(format!("{base}/metrics")).await.unwrap();
        let snapshot: Vec<Value> = resp.json().await.unwrap();
        assert!(snapshot.iter().any(|m| m["name"] == "cache.fetch"));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn mirror_reports_bad_gateway_for_dead_upstream() {
        let (handle, base) = start_test(ServerConfig {
            upstream_url: Some("http://127.0.0.1:1".into()),
            ..config()
        })
        .await;

        let resp = reqwest::get(format!("{base}/mirror/prices")).await.unwrap();
        assert_eq!(resp.status(), Status::BAD_GATEWAY);
        handle.shutdown().await;
    }

    #[test]
    fn build_router_creates_routes() {
        let (events, _) = mpsc::channel(32);
        let state = AppState {
            registry: Arc::new(SessionRegistry::new(32)),
            events,
            gateway: Arc::new(CacheGateway::new(Default::default())),
            listings: Arc::new(CacheGateway::new(Default::default())),
            store: Arc::new(InMemorySimulationStore::new()),
            users: Arc::new(InMemoryUserStore::new()),
            credentials: Arc::new(StaticCredentials::new()),
            mirror: None,
            metrics: Arc::new(MetricsRecorder::new()),
            shutdown: CancellationToken::new(),
        };

        let _router = build_router(state);
    }
}
