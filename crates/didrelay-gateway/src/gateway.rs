//! Gateway main structure
//!
//! The WebSocket endpoint in front of the hub. Every request path is an
//! upgrade endpoint; anything that is not a WebSocket upgrade gets a
//! `426 Upgrade Required` and never reaches a session.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::connection;
use crate::hub::{HubOptions, RelayHub};
use didrelay_config::GatewayConfig;
use didrelay_observability::ConnectionMetrics;

/// The main Gateway server
#[derive(Debug, Clone)]
pub struct Gateway {
    config: GatewayConfig,
    hub: Arc<RelayHub>,
    active: Arc<AtomicUsize>,
}

#[derive(Debug, Clone)]
struct GatewayState {
    hub: Arc<RelayHub>,
    active: Arc<AtomicUsize>,
    max_connections: usize,
}

impl GatewayState {
    /// Claim a connection slot, or `None` when at capacity
    fn reserve_slot(&self) -> Option<ConnectionSlot> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_connections).then_some(n + 1)
            })
            .ok()
            .map(|_| ConnectionSlot {
                active: Arc::clone(&self.active),
            })
    }
}

/// Releases its connection slot on drop
struct ConnectionSlot {
    active: Arc<AtomicUsize>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Gateway {
    /// Create a new Gateway with its own routing table
    pub fn new(config: GatewayConfig) -> Self {
        let hub = Arc::new(RelayHub::with_options(HubOptions::from(&config)));
        Self::with_hub(config, hub)
    }

    /// Create a Gateway around an existing hub
    pub fn with_hub(config: GatewayConfig, hub: Arc<RelayHub>) -> Self {
        Self {
            config,
            hub,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Gateway configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Get the routing table
    pub fn hub(&self) -> &Arc<RelayHub> {
        &self.hub
    }

    /// Number of currently upgraded connections
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Build the HTTP router serving the upgrade endpoint
    pub fn router(&self) -> Router {
        let state = GatewayState {
            hub: Arc::clone(&self.hub),
            active: Arc::clone(&self.active),
            max_connections: self.config.max_connections,
        };
        Router::new().fallback(upgrade).with_state(state)
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(&self.config.bind).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!("Gateway listening on ws://{}", addr);

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        info!("Gateway on {} stopped", addr);
        Ok(())
    }
}

impl std::fmt::Display for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Gateway({})", self.config.bind)
    }
}

fn wants_websocket(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

fn upgrade_required() -> Response {
    ConnectionMetrics::record_rejected("upgrade_required");
    (StatusCode::UPGRADE_REQUIRED, "Expected WebSocket").into_response()
}

async fn upgrade(
    State(state): State<GatewayState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    if !wants_websocket(&headers) {
        return upgrade_required();
    }
    let Some(ws) = ws else {
        return upgrade_required();
    };

    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let Some(slot) = state.reserve_slot() else {
        warn!("Connection limit reached, rejecting {:?}", peer);
        ConnectionMetrics::record_rejected("capacity");
        return (StatusCode::SERVICE_UNAVAILABLE, "Relay at capacity").into_response();
    };

    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| async move {
        let _slot = slot;
        connection::serve(socket, hub, peer).await;
    })
}

/// Gateway-related errors
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_plain_request_gets_upgrade_required() {
        let gateway = Gateway::new(GatewayConfig::default());

        let response = gateway
            .router()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);
        assert!(gateway.hub().is_empty());
        assert_eq!(gateway.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_wrong_upgrade_header_gets_upgrade_required() {
        let gateway = Gateway::new(GatewayConfig::default());

        let response = gateway
            .router()
            .oneshot(
                Request::builder()
                    .uri("/any/path")
                    .header(header::CONNECTION, "upgrade")
                    .header(header::UPGRADE, "h2c")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);
    }

    #[test]
    fn test_wants_websocket_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        assert!(!wants_websocket(&headers));

        headers.insert(header::UPGRADE, "WebSocket".parse().unwrap());
        assert!(wants_websocket(&headers));
    }

    #[test]
    fn test_slots_are_released() {
        let state = GatewayState {
            hub: Arc::new(RelayHub::new()),
            active: Arc::new(AtomicUsize::new(0)),
            max_connections: 1,
        };

        let slot = state.reserve_slot();
        assert!(slot.is_some());
        assert!(state.reserve_slot().is_none());

        drop(slot);
        assert!(state.reserve_slot().is_some());
        assert_eq!(state.active.load(Ordering::Acquire), 0);
    }
}
