//! Management API router. Mounts all endpoints under /api/v1/management,
//! plus the public unsubscribe landing route.

use crate::handlers::{self, ManagementState};
use axum::routing::{get, post};
use axum::Router;

/// Build the management router. Returns a Router that should be merged
/// into the main app.
pub fn management_router(state: ManagementState) -> Router {
    Router::new()
        // Campaigns
        .route("/api/v1/management/campaigns", get(handlers::list_campaigns).post(handlers::create_campaign))
        .route("/api/v1/management/campaigns/:id", get(handlers::get_campaign))
        .route("/api/v1/management/campaigns/:id/send", post(handlers::send_campaign))
        .route("/api/v1/management/campaigns/:id/release", post(handlers::release_campaign))
        .route("/api/v1/management/campaigns/:id/deliveries", get(handlers::list_deliveries))
        // Experiments
        .route("/api/v1/management/experiments", post(handlers::create_experiment))
        .route("/api/v1/management/experiments/:id", get(handlers::get_experiment))
        .route("/api/v1/management/experiments/:id/start", post(handlers::start_experiment))
        .route("/api/v1/management/experiments/:id/complete", post(handlers::complete_experiment))
        .route("/api/v1/management/experiments/:id/distribution", get(handlers::experiment_distribution))
        // Recipients
        .route("/api/v1/management/recipients", post(handlers::upsert_recipients))
        .route("/unsubscribe/:token", get(handlers::unsubscribe))
        // Operational
        .route("/health", get(handlers::health))
        .with_state(state)
}
