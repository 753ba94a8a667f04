// libs/booking-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State, Extension},
    http::HeaderMap,
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    BookingError, PaymentEvent, ReserveSlotRequest, UpdateBookingStatusRequest,
};
use crate::services::payment::PaymentGatewayService;
use crate::services::reclaim::ReservationReclaimService;
use crate::services::reservation::SlotReservationService;

const SIGNATURE_HEADER: &str = "x-payment-signature";

fn map_booking_error(e: BookingError) -> AppError {
    match e {
        BookingError::SlotNotFound => AppError::NotFound("Slot not found".to_string()),
        BookingError::NotFound => AppError::NotFound("Booking not found".to_string()),
        BookingError::SlotUnavailable => {
            AppError::Conflict("This slot was just taken, please choose another".to_string())
        }
        BookingError::StaleReservation => {
            AppError::Conflict("Reservation is no longer active".to_string())
        }
        BookingError::InvalidStatusTransition { .. } => AppError::BadRequest(e.to_string()),
        BookingError::ValidationError(msg) => AppError::BadRequest(msg),
        BookingError::InvalidSignature => {
            AppError::Auth("Invalid webhook signature".to_string())
        }
        BookingError::PaymentError(_) => {
            AppError::ExternalService("Payment service unavailable, please retry later".to_string())
        }
        BookingError::DatabaseError(_) => {
            AppError::Database("Booking storage unavailable, please retry later".to_string())
        }
    }
}

// ==============================================================================
// RESERVATION HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn reserve_slot(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<ReserveSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if !user.can_book_for(&request.patient_id) {
        return Err(AppError::Auth("Not authorized to book for this patient".to_string()));
    }

    let service = SlotReservationService::new(&state);
    let reservation = service.reserve(request, token).await.map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "reservation": reservation,
        "message": "Slot reserved, awaiting payment confirmation"
    })))
}

#[axum::debug_handler]
pub async fn get_booking(
    State(state): State<Arc<AppConfig>>,
    Path(booking_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let service = SlotReservationService::new(&state);

    let booking = service.get_booking(booking_id, Some(token)).await.map_err(map_booking_error)?;
    let slot = service.get_slot(booking.slot_id, Some(token)).await.map_err(map_booking_error)?;

    if !user.can_view_booking(&booking.patient_id, &slot.doctor_id) {
        return Err(AppError::Auth("Not authorized to view this booking".to_string()));
    }

    Ok(Json(json!({
        "booking": booking,
        "slot": slot,
    })))
}

#[axum::debug_handler]
pub async fn get_patient_bookings(
    State(state): State<Arc<AppConfig>>,
    Path(patient_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if !user.can_book_for(&patient_id) {
        return Err(AppError::Auth("Not authorized to view this patient's bookings".to_string()));
    }

    let service = SlotReservationService::new(&state);
    let bookings = service.get_patient_bookings(patient_id, token).await.map_err(map_booking_error)?;

    Ok(Json(json!({
        "patient_id": patient_id,
        "bookings": bookings,
    })))
}

#[axum::debug_handler]
pub async fn cancel_booking(
    State(state): State<Arc<AppConfig>>,
    Path(booking_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let service = SlotReservationService::new(&state);

    let booking = service.get_booking(booking_id, Some(token)).await.map_err(map_booking_error)?;
    let slot = service.get_slot(booking.slot_id, Some(token)).await.map_err(map_booking_error)?;

    if !user.can_view_booking(&booking.patient_id, &slot.doctor_id) {
        return Err(AppError::Auth("Not authorized to cancel this booking".to_string()));
    }

    let cancelled = service.release(booking_id, Some(token)).await.map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "booking": cancelled,
    })))
}

#[axum::debug_handler]
pub async fn update_booking_status(
    State(state): State<Arc<AppConfig>>,
    Path(booking_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateBookingStatusRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let service = SlotReservationService::new(&state);

    let booking = service.get_booking(booking_id, Some(token)).await.map_err(map_booking_error)?;
    let slot = service.get_slot(booking.slot_id, Some(token)).await.map_err(map_booking_error)?;

    // Post-consult outcomes are the slot owner's call.
    if !user.can_manage_slots(&slot.doctor_id) {
        return Err(AppError::Auth("Not authorized to update this booking".to_string()));
    }

    let updated = service.update_status(booking_id, request, token).await.map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "booking": updated,
    })))
}

#[axum::debug_handler]
pub async fn reclaim_reservations(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    if !user.is_admin() {
        return Err(AppError::Auth("Admin access required".to_string()));
    }

    let reclaim = ReservationReclaimService::new(&state);
    let reclaimed_count = reclaim.reclaim_overdue().await.map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "reclaimed_count": reclaimed_count,
    })))
}

// ==============================================================================
// PAYMENT WEBHOOK
// ==============================================================================

/// Gateway callback. Not behind the auth middleware: trust is established
/// by the HMAC signature over the raw body, checked before parsing.
#[axum::debug_handler]
pub async fn payment_webhook(
    State(state): State<Arc<AppConfig>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Auth("Missing webhook signature".to_string()))?;

    let payment = PaymentGatewayService::new(&state);
    if !payment.verify_signature(&body, signature) {
        warn!("Rejected payment webhook with bad signature");
        return Err(map_booking_error(BookingError::InvalidSignature));
    }

    let payload = payment.parse_webhook(&body).map_err(map_booking_error)?;
    info!("Payment webhook for booking {}: {:?}", payload.booking_id, payload.event);

    let service = SlotReservationService::new(&state);
    let booking = match payload.event {
        PaymentEvent::Succeeded => service.confirm(payload.booking_id, None).await,
        PaymentEvent::Failed => service.release(payload.booking_id, None).await,
    }.map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "booking_id": booking.id,
        "status": booking.status,
    })))
}
