use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use vellora_agent::RunSession;
use vellora_core::config::GatewayConfig;

use crate::routes;
use crate::state::AppState;

/// HTTP gateway streaming graph runs as server-sent events.
pub struct GatewayServer {
    config: GatewayConfig,
    session: RunSession,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, session: RunSession) -> Self {
        Self { config, session }
    }

    /// Run the gateway server until the cancellation token is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let state = Arc::new(AppState {
            config: self.config.clone(),
            session: self.session.clone(),
        });
        let app = router(state);

        let listener = TcpListener::bind(&self.config.bind).await?;
        info!(bind = %self.config.bind, "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/chat", post(routes::chat))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
