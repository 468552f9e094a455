pub mod handlers;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{config::Settings, gateways::GatewayRegistry, service::ServiceContext};
use state::AppState;

pub fn create_app(
    services: Arc<ServiceContext>,
    registry: Arc<GatewayRegistry>,
    settings: Arc<Settings>,
) -> Router {
    let app_state = AppState::new(services, registry, settings);

    Router::new()
        // Root and health endpoints
        .route("/", get(handlers::root::root))
        .route("/health", get(handlers::root::health_check))
        // Gateway registry metadata + credential checks
        .route("/gateways", get(handlers::gateways::list))
        .route("/gateways/:gateway/test", post(handlers::gateways::test_connection))
        // Inbound webhooks, one endpoint per source. The static /legacy
        // route wins over the :gateway capture.
        .route("/webhooks/legacy", post(handlers::webhooks::legacy_webhook))
        .route("/webhooks/:gateway", post(handlers::webhooks::gateway_webhook))
        // Payment initiation
        .route("/orders/:id/charge", post(handlers::payments::charge_card))
        .route("/orders/:id/pix", post(handlers::payments::create_pix))
        // Operator-triggered resync
        .route("/orders/:id/sync", post(handlers::sync::sync_order))
        .route("/sync", post(handlers::sync::sync_pending))
        .with_state(app_state)
        // Gateways preflight their webhook POSTs from odd origins; answer
        // OPTIONS permissively.
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
