// libs/booking-cell/src/router.rs
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, patch, post},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn booking_routes(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        .route("/reserve", post(handlers::reserve_slot))
        .route("/reclaim", post(handlers::reclaim_reservations))
        .route("/{booking_id}", get(handlers::get_booking))
        .route("/{booking_id}/cancel", post(handlers::cancel_booking))
        .route("/{booking_id}/status", patch(handlers::update_booking_status))
        .route("/patients/{patient_id}", get(handlers::get_patient_bookings))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}

/// The gateway callback authenticates by signature, not bearer token, so it
/// lives outside the auth middleware.
pub fn payment_webhook_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/webhook", post(handlers::payment_webhook))
        .with_state(state)
}
