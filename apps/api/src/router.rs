use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use booking_cell::router::{booking_routes, payment_webhook_routes};
use shared_config::AppConfig;
use slot_cell::router::slot_routes;

pub fn create_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(|| async { "Slot scheduling API is running!" }))
        .nest("/slots", slot_routes(state.clone()))
        .nest("/bookings", booking_routes(state.clone()))
        .nest("/payments", payment_webhook_routes(state.clone()))
}
