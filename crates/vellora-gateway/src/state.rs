use vellora_agent::RunSession;
use vellora_core::config::GatewayConfig;

/// Shared application state for axum handlers.
pub struct AppState {
    pub config: GatewayConfig,
    pub session: RunSession,
}
