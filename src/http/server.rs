//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router; every path and method goes to the gateway
//! - Wire up middleware (tracing, timeout, request ID, concurrency limit)
//! - Bind server to listener and stop on the shutdown signal
//! - Apply reloaded configuration while serving

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    response::Response,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::GatewayConfig;
use crate::gateway::Gateway;
use crate::http::exchange::Exchange;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    gateway: Arc<Gateway>,
}

impl HttpServer {
    /// Create a server with the default backend transport and rate limiter.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(config: GatewayConfig) -> Self {
        let gateway = Arc::new(Gateway::builder(config.clone()).build());
        Self::with_gateway(gateway, &config)
    }

    /// Serve an already assembled gateway.
    pub fn with_gateway(gateway: Arc<Gateway>, config: &GatewayConfig) -> Self {
        let state = AppState {
            gateway: gateway.clone(),
        };
        let router = Self::build_router(config, state);
        Self { router, gateway }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        Router::new()
            .fallback(gateway_handler)
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(GlobalConcurrencyLimitLayer::new(config.listener.max_connections))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let gateway = self.gateway.clone();
        tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                tracing::info!(routes = config.routes.len(), "Applying reloaded configuration");
                gateway.apply_config(&config);
            }
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Hands every request to the gateway pipeline.
async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response<Body> {
    let exchange = Exchange::from_http(request, Some(addr));
    state.gateway.handle(exchange).await
}
