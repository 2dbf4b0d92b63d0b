//! Webhook server (C11, spec §4.11): one HTTP listener serving health
//! endpoints and dynamically registered per-ingester push routes.
//!
//! Routes are registered and deregistered at runtime as ingesters come and
//! go (spec §4.9), without ever rebuilding the `axum::Router` itself: a
//! single catch-all POST handler looks up the path in a shared
//! `Arc<DashMap<String, WebhookRoute>>` at request time. Rebuilding the
//! router per reconcile would race with in-flight requests against routes
//! that are mid-swap; this design doesn't have that race because the map
//! swap is atomic from any one request's point of view.

pub mod auth;
pub mod ratelimit;
pub mod secrets;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::{BoxError, Router};
use dashmap::DashMap;
use ipnet::IpNet;
use kube::Client;
use serde_json::json;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower::timeout::TimeoutLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, warn};

/// Caps how long a single webhook request may take end to end, so one slow
/// or stalled client can't tie up a pipeline's intake indefinitely.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

use crate::event::RawEvent;
use crate::k8s::ingester::WebhookAuth;
use crate::leader::LeaderHandle;
use crate::sources::StatusCell;
use ratelimit::IpRateLimiter;
use secrets::SecretCache;

/// One registered webhook ingester: where accepted events go, and how to
/// authenticate them.
pub struct WebhookRoute {
    pub source: String,
    pub namespace: String,
    pub auth: Option<WebhookAuth>,
    pub tx: mpsc::Sender<RawEvent>,
    pub status: Arc<StatusCell>,
}

/// Shared, mutation-friendly route table. Cloning is cheap (`Arc` inside).
#[derive(Clone, Default)]
pub struct WebhookRegistry(Arc<DashMap<String, Arc<WebhookRoute>>>);

impl WebhookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, path: String, route: WebhookRoute) {
        self.0.insert(path, Arc::new(route));
    }

    pub fn unregister(&self, path: &str) {
        self.0.remove(path);
    }

    fn get(&self, path: &str) -> Option<Arc<WebhookRoute>> {
        self.0.get(path).map(|r| r.clone())
    }
}

#[derive(Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub max_body_bytes: usize,
    pub rate_limit_per_min: u32,
    pub trusted_proxies: Vec<IpNet>,
}

#[derive(Clone)]
struct AppState {
    registry: WebhookRegistry,
    secrets: Arc<SecretCache>,
    rate_limiter: Arc<IpRateLimiter>,
    trusted_proxies: Vec<IpNet>,
    leader: LeaderHandle,
}

/// Builds the router and starts serving on `config.bind_addr`. Runs until
/// `cancel` fires; this task runs on every replica regardless of
/// leadership (spec §4.10).
pub async fn serve(
    config: ServerConfig,
    registry: WebhookRegistry,
    client: Client,
    leader: LeaderHandle,
    cancel: tokio_util::sync::CancellationToken,
) -> std::io::Result<()> {
    let rate_limiter = Arc::new(IpRateLimiter::new(config.rate_limit_per_min));
    let sweeper_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            sweeper_limiter.sweep(Duration::from_secs(15 * 60));
        }
    });

    let state = AppState {
        registry,
        secrets: Arc::new(SecretCache::new(client)),
        rate_limiter,
        trusted_proxies: config.trusted_proxies.clone(),
        leader,
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/*path", post(ingest))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout))
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
                .layer(RequestBodyLimitLayer::new(config.max_body_bytes)),
        )
        .with_state(state);

    axum::Server::bind(&config.bind_addr)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
}

async fn handle_timeout(err: BoxError) -> impl IntoResponse {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, "request timed out")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "unhandled middleware error")
    }
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let leader_known = state.leader.is_known();
    if leader_known {
        (
            StatusCode::OK,
            Json(json!({ "leader": state.leader.is_leader(), "leaderKnown": true })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "leaderKnown": false })),
        )
    }
}

async fn ingest(
    State(state): State<AppState>,
    Path(path): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    let full_path = format!("/{path}");
    let Some(route) = state.registry.get(&full_path) else {
        return StatusCode::NOT_FOUND;
    };

    let client_ip = resolve_client_ip(peer.ip(), &headers, &state.trusted_proxies);
    if !state.rate_limiter.check(client_ip) {
        return StatusCode::TOO_MANY_REQUESTS;
    }

    if let Some(auth) = &route.auth {
        match auth::authenticate(auth, &state.secrets, &route.namespace, &headers).await {
            Ok(true) => {}
            Ok(false) => return StatusCode::UNAUTHORIZED,
            Err(e) => {
                error!(source = %route.source, error = %e, "[CONFIG_ERROR] webhook auth secret unavailable");
                return StatusCode::INTERNAL_SERVER_ERROR;
            }
        }
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return StatusCode::BAD_REQUEST,
    };

    let raw = RawEvent::new(route.source.clone(), payload);
    match route.tx.try_send(raw) {
        Ok(()) => {
            route.status.record_event();
            StatusCode::OK
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(source = %route.source, "pipeline intake channel full, rejecting webhook event");
            StatusCode::SERVICE_UNAVAILABLE
        }
        Err(mpsc::error::TrySendError::Closed(_)) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Derives the client IP, trusting `X-Forwarded-For`/`X-Real-IP` only when
/// `peer` itself is in `trusted_proxies` (default empty = never trust),
/// per spec §4.11.
fn resolve_client_ip(peer: IpAddr, headers: &HeaderMap, trusted_proxies: &[IpNet]) -> IpAddr {
    let peer_trusted = trusted_proxies.iter().any(|net| net.contains(&peer));
    if !peer_trusted {
        return peer;
    }
    if let Some(value) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = value.split(',').next() {
            if let Ok(ip) = first.trim().parse() {
                return ip;
            }
        }
    }
    if let Some(value) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if let Ok(ip) = value.trim().parse() {
            return ip;
        }
    }
    peer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untrusted_peer_ip_is_used_verbatim() {
        let peer: IpAddr = "203.0.113.9".parse().unwrap();
        let headers = {
            let mut h = HeaderMap::new();
            h.insert("x-forwarded-for", "10.0.0.1".parse().unwrap());
            h
        };
        assert_eq!(resolve_client_ip(peer, &headers, &[]), peer);
    }

    #[test]
    fn trusted_proxy_forwarded_header_is_honored() {
        let peer: IpAddr = "10.0.0.1".parse().unwrap();
        let trusted: IpNet = "10.0.0.0/8".parse().unwrap();
        let headers = {
            let mut h = HeaderMap::new();
            h.insert("x-forwarded-for", "203.0.113.9".parse().unwrap());
            h
        };
        assert_eq!(
            resolve_client_ip(peer, &headers, &[trusted]),
            "203.0.113.9".parse::<IpAddr>().unwrap()
        );
    }
}
