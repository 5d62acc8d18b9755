//! Fedsync server library: router assembly and shared state.

pub mod api;
pub mod background;
pub mod config;
pub mod middleware;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use ed25519_dalek::VerifyingKey;
use fedsync_auth::{NonceLedger, TokenIssuer};
use fedsync_gateway::{PlatformDirectory, RateLimitTracker, RequestGateway};
use fedsync_handshake::{HandshakeEngine, NodeKeyDirectory};
use fedsync_hub::{ConnectionHub, HubConfig, MemorySyncStore};
use fedsync_types::FederationEvent;
use rand::RngCore;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Maximum request body size (2 MiB).
const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Buffer for lifecycle event fan-out; laggy receivers drop, never block.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The WebSocket connection hub.
    pub hub: Arc<ConnectionHub>,
    /// The signed REST gateway.
    pub gateway: Arc<RequestGateway>,
    /// Consumed handshake nonces, swept by a background task.
    pub nonces: Arc<NonceLedger>,
    /// Lifecycle event channel; subscribe for dashboards or tests.
    pub events: broadcast::Sender<FederationEvent>,
}

/// Errors constructing [`AppState`] from configuration.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("security.token_key_hex is not valid hex: {0}")]
    BadTokenKey(hex::FromHexError),
    #[error("node {node_id} has an invalid public key")]
    BadNodeKey { node_id: String },
}

impl AppState {
    /// Wires every component from configuration. Nothing here is global;
    /// tests construct as many states as they like.
    pub fn from_config(config: &config::Config) -> Result<Self, StateError> {
        let token_key = if config.security.token_key_hex.is_empty() {
            let mut key = vec![0u8; 32];
            rand::thread_rng().fill_bytes(&mut key);
            tracing::warn!(
                "no token key configured, generated an ephemeral one; \
                 tokens will not survive a restart"
            );
            key
        } else {
            hex::decode(&config.security.token_key_hex).map_err(StateError::BadTokenKey)?
        };

        let keys = Arc::new(NodeKeyDirectory::new());
        for node in &config.nodes {
            let key_bytes: [u8; 32] = hex::decode(&node.public_key_hex)
                .ok()
                .and_then(|bytes| bytes.try_into().ok())
                .ok_or_else(|| StateError::BadNodeKey {
                    node_id: node.node_id.clone(),
                })?;
            let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| StateError::BadNodeKey {
                node_id: node.node_id.clone(),
            })?;
            keys.register(node.node_id.clone(), key);
        }

        let directory = Arc::new(PlatformDirectory::new());
        for platform in &config.platforms {
            directory.register(platform.clone());
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let nonces = Arc::new(NonceLedger::new(Duration::from_secs(
            config.security.nonce_window_secs,
        )));
        let freshness = Duration::from_secs(config.security.freshness_window_secs);

        let engine = Arc::new(HandshakeEngine::new(
            freshness,
            Duration::from_secs(config.security.token_ttl_secs),
            nonces.clone(),
            keys,
            TokenIssuer::new(token_key),
            events.clone(),
        ));

        let hub = Arc::new(ConnectionHub::new(
            engine,
            Arc::new(MemorySyncStore::new()),
            events.clone(),
            HubConfig {
                auth_timeout: Duration::from_secs(config.hub.auth_timeout_secs),
                sweep_interval: Duration::from_secs(config.hub.sweep_interval_secs),
                probe_after: Duration::from_secs(config.hub.probe_after_secs),
                hard_timeout: Duration::from_secs(config.hub.hard_timeout_secs),
            },
        ));

        let gateway = Arc::new(RequestGateway::new(
            directory,
            RateLimitTracker::new(),
            freshness,
        ));

        Ok(Self {
            hub,
            gateway,
            nonces,
            events,
        })
    }
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let gateway_routes = Router::new()
        .route("/api/sync", post(api::submit_sync_handler))
        .route("/api/nodes", get(api::list_nodes_handler))
        .route(
            "/api/nodes/{nodeId}/status",
            post(api::update_node_status_handler),
        )
        .layer(axum::middleware::from_fn(middleware::gateway_middleware));

    let hub = state.hub.clone();

    Router::new()
        .route("/health", get(health))
        .merge(gateway_routes)
        .route("/ws", get(fedsync_hub::ws_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .layer(Extension(hub))
        .layer(Extension(Arc::new(state)))
}
