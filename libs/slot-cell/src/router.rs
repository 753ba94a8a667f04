// libs/slot-cell/src/router.rs
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn slot_routes(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        .route("/generate", post(handlers::generate_slots))
        .route("/available", get(handlers::get_available_slots))
        .route("/{slot_id}", get(handlers::get_slot))
        .route("/sweep-expired", post(handlers::sweep_expired_slots))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
