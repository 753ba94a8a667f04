// libs/slot-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, Extension},
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use serde::Deserialize;
use serde_json::{json, Value};
use chrono::NaiveDate;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{GenerateSlotsRequest, SlotError};
use crate::services::expiry::SlotExpiryService;
use crate::services::generator::SlotGeneratorService;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct AvailableSlotsQuery {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
}

// ==============================================================================
// SLOT HANDLERS
// ==============================================================================

fn map_slot_error(e: SlotError) -> AppError {
    match e {
        SlotError::InvalidDuration { .. }
        | SlotError::WindowTooShort
        | SlotError::InvalidRecurrence(_)
        | SlotError::PastDate => AppError::BadRequest(e.to_string()),
        SlotError::NotFound => AppError::NotFound("Slot not found".to_string()),
        SlotError::DatabaseError(_) => {
            AppError::Database("Slot storage unavailable, please retry later".to_string())
        }
    }
}

#[axum::debug_handler]
pub async fn generate_slots(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<GenerateSlotsRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if !user.can_manage_slots(&request.doctor_id) {
        return Err(AppError::Auth("Not authorized to manage this doctor's slots".to_string()));
    }

    let generator = SlotGeneratorService::new(&state);
    let response = generator.generate(request, token).await.map_err(map_slot_error)?;

    Ok(Json(json!({
        "success": true,
        "created_count": response.created_count,
        "skipped_overlaps": response.skipped_overlaps,
        "slots": response.created,
    })))
}

#[axum::debug_handler]
pub async fn get_available_slots(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Query(query): Query<AvailableSlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let generator = SlotGeneratorService::new(&state);
    let slots = generator.get_available_slots(query.doctor_id, query.date, token)
        .await
        .map_err(map_slot_error)?;

    Ok(Json(json!({
        "doctor_id": query.doctor_id,
        "date": query.date,
        "slots": slots,
    })))
}

#[axum::debug_handler]
pub async fn get_slot(
    State(state): State<Arc<AppConfig>>,
    Path(slot_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let generator = SlotGeneratorService::new(&state);
    let slot = generator.get_slot(slot_id, token).await.map_err(map_slot_error)?;

    Ok(Json(json!(slot)))
}

#[axum::debug_handler]
pub async fn sweep_expired_slots(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    if !user.is_admin() {
        return Err(AppError::Auth("Admin access required".to_string()));
    }

    let expiry = SlotExpiryService::new(&state);
    let expired_count = expiry.sweep_expired().await.map_err(map_slot_error)?;

    Ok(Json(json!({
        "success": true,
        "expired_count": expired_count,
    })))
}
