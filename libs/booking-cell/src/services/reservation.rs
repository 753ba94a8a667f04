// libs/booking-cell/src/services/reservation.rs
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;
use std::sync::Arc;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use slot_cell::models::Slot;

use crate::models::{
    Booking, BookingError, BookingEvent, BookingStatus, ReservationResponse,
    ReserveSlotRequest, UpdateBookingStatusRequest,
};
use crate::services::events::BookingEventPublisher;
use crate::services::payment::PaymentGatewayService;

/// Coordinates the slot `available -> reserved -> booked` lifecycle against
/// concurrent access. Every contested transition is a single conditional
/// PATCH whose filter encodes the expected prior state; the returned row set
/// is the success signal. The store applies the filtered update to one row
/// atomically, so two racing callers get exactly one winner without any
/// application-side locking.
pub struct SlotReservationService {
    supabase: Arc<SupabaseClient>,
    payment_service: PaymentGatewayService,
    event_publisher: BookingEventPublisher,
}

impl SlotReservationService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            payment_service: PaymentGatewayService::new(config),
            event_publisher: BookingEventPublisher::new(config),
        }
    }

    /// Claim a slot for a patient and open the payment flow.
    pub async fn reserve(
        &self,
        request: ReserveSlotRequest,
        auth_token: &str,
    ) -> Result<ReservationResponse, BookingError> {
        info!("Reserving slot {} for patient {}", request.slot_id, request.patient_id);

        // Existence check first so an unknown id is distinguishable from a
        // lost race.
        let slot = self.get_slot(request.slot_id, Some(auth_token)).await?;

        // Test-and-set: only an available, still-future slot transitions.
        let now = Utc::now();
        let path = format!(
            "/rest/v1/slots?id=eq.{}&status=eq.available&start_time=gt.{}",
            request.slot_id,
            urlencoding::encode(&now.to_rfc3339()),
        );
        let update = json!({
            "status": "reserved",
            "reserved_by": request.patient_id,
            "reserved_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339()
        });

        let reserved = self.conditional_update_slots(&path, update, Some(auth_token)).await?;
        let Some(slot) = reserved.into_iter().next() else {
            debug!("Slot {} was not available (current status {})", slot.id, slot.status);
            return Err(BookingError::SlotUnavailable);
        };

        // Reservation held; record the booking. A failure here must not
        // leave the slot stuck in reserved.
        let booking = match self.insert_booking(&slot, request.patient_id, auth_token).await {
            Ok(booking) => booking,
            Err(e) => {
                warn!("Booking insert failed for slot {}, releasing reservation", slot.id);
                self.revert_reservation(slot.id, request.patient_id, auth_token).await;
                return Err(e);
            }
        };

        // Hand off to the payment collaborator, keyed to the booking.
        let payment_order_id = if self.payment_service.is_configured() {
            match self.payment_service.create_order(booking.id).await {
                Ok(order) => {
                    self.set_payment_order(booking.id, &order.order_id, auth_token).await?;
                    Some(order.order_id)
                }
                Err(e) => {
                    warn!("Payment order creation failed for booking {}: {}", booking.id, e);
                    self.revert_reservation(slot.id, request.patient_id, auth_token).await;
                    self.update_booking_row(booking.id, BookingStatus::Cancelled, Some(auth_token)).await?;
                    return Err(e);
                }
            }
        } else {
            None
        };

        self.event_publisher.publish(slot.doctor_id, &BookingEvent::BookingCreated {
            booking_id: booking.id,
            slot_id: slot.id,
            patient_id: request.patient_id,
            start_time: slot.start_time,
        }).await;

        info!("Slot {} reserved, booking {} pending payment", slot.id, booking.id);

        Ok(ReservationResponse {
            booking_id: booking.id,
            slot_id: slot.id,
            status: booking.status,
            payment_order_id,
        })
    }

    /// Payment-success path: seal the reservation. The slot must still be
    /// reserved by the paying patient; anything else (reclaimed, rebooked,
    /// cancelled meanwhile) is reported as a stale reservation and changes
    /// nothing.
    pub async fn confirm(&self, booking_id: Uuid, auth_token: Option<&str>) -> Result<Booking, BookingError> {
        debug!("Confirming booking {}", booking_id);

        let booking = self.get_booking(booking_id, auth_token).await?;

        match booking.status {
            BookingStatus::Pending => {}
            // Gateways redeliver webhooks; a repeat confirm is a no-op.
            BookingStatus::Confirmed => return Ok(booking),
            _ => return Err(BookingError::StaleReservation),
        }

        let now = Utc::now();
        let path = format!(
            "/rest/v1/slots?id=eq.{}&status=eq.reserved&reserved_by=eq.{}",
            booking.slot_id, booking.patient_id,
        );
        let update = json!({
            "status": "booked",
            "updated_at": now.to_rfc3339()
        });

        let updated = self.conditional_update_slots(&path, update, auth_token).await?;
        let Some(slot) = updated.into_iter().next() else {
            warn!("Confirmation for booking {} found slot {} no longer reserved",
                  booking_id, booking.slot_id);
            return Err(BookingError::StaleReservation);
        };

        let confirmed = self.update_booking_row(booking_id, BookingStatus::Confirmed, auth_token).await?;

        self.event_publisher.publish(slot.doctor_id, &BookingEvent::PaymentConfirmed {
            booking_id,
            slot_id: slot.id,
        }).await;

        info!("Booking {} confirmed, slot {} booked", booking_id, slot.id);
        Ok(confirmed)
    }

    /// Payment-failure or party-cancel path. A pending reservation puts the
    /// slot back on the market; cancelling a confirmed booking retires the
    /// slot instead.
    pub async fn release(&self, booking_id: Uuid, auth_token: Option<&str>) -> Result<Booking, BookingError> {
        debug!("Releasing booking {}", booking_id);

        let booking = self.get_booking(booking_id, auth_token).await?;

        match booking.status {
            BookingStatus::Pending => {
                self.revert_reservation_checked(booking.slot_id, booking.patient_id, auth_token).await?;
            }
            BookingStatus::Confirmed => {
                let now = Utc::now();
                let path = format!(
                    "/rest/v1/slots?id=eq.{}&status=eq.booked",
                    booking.slot_id,
                );
                let update = json!({
                    "status": "cancelled",
                    "updated_at": now.to_rfc3339()
                });
                self.conditional_update_slots(&path, update, auth_token).await?;
            }
            // Releasing twice is a no-op.
            BookingStatus::Cancelled => return Ok(booking),
            BookingStatus::Completed => {
                return Err(BookingError::InvalidStatusTransition {
                    from: booking.status,
                    to: BookingStatus::Cancelled,
                });
            }
        }

        let cancelled = self.update_booking_row(booking_id, BookingStatus::Cancelled, auth_token).await?;

        if self.event_publisher.is_enabled() {
            if let Ok(slot) = self.get_slot(booking.slot_id, auth_token).await {
                self.event_publisher.publish(slot.doctor_id, &BookingEvent::BookingCancelled {
                    booking_id,
                    slot_id: slot.id,
                }).await;
            }
        }

        info!("Booking {} cancelled", booking_id);
        Ok(cancelled)
    }

    /// Doctor-side post-consult updates. Plain authorized field writes; the
    /// transition table is the only guard needed.
    pub async fn update_status(
        &self,
        booking_id: Uuid,
        request: UpdateBookingStatusRequest,
        auth_token: &str,
    ) -> Result<Booking, BookingError> {
        let booking = self.get_booking(booking_id, Some(auth_token)).await?;

        if !booking.status.can_transition_to(&request.status) {
            return Err(BookingError::InvalidStatusTransition {
                from: booking.status,
                to: request.status,
            });
        }

        match request.status {
            BookingStatus::Cancelled => self.release(booking_id, Some(auth_token)).await,
            BookingStatus::Completed => {
                self.update_booking_row(booking_id, BookingStatus::Completed, Some(auth_token)).await
            }
            // Confirmation belongs to the payment collaborator, not this path.
            BookingStatus::Pending | BookingStatus::Confirmed => {
                Err(BookingError::ValidationError(
                    "Booking status can only be set to completed or cancelled".to_string(),
                ))
            }
        }
    }

    pub async fn get_booking(
        &self,
        booking_id: Uuid,
        auth_token: Option<&str>,
    ) -> Result<Booking, BookingError> {
        let path = format!("/rest/v1/bookings?id=eq.{}", booking_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            auth_token,
            None,
        ).await.map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(BookingError::NotFound);
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse booking: {}", e)))
    }

    pub async fn get_patient_bookings(
        &self,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<Booking>, BookingError> {
        let path = format!(
            "/rest/v1/bookings?patient_id=eq.{}&order=created_at.desc",
            patient_id,
        );
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        result.into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<Booking>, _>>()
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse bookings: {}", e)))
    }

    pub async fn get_slot(&self, slot_id: Uuid, auth_token: Option<&str>) -> Result<Slot, BookingError> {
        let path = format!("/rest/v1/slots?id=eq.{}", slot_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            auth_token,
            None,
        ).await.map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(BookingError::SlotNotFound);
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse slot: {}", e)))
    }

    // ==============================================================================
    // PRIVATE HELPER METHODS
    // ==============================================================================

    /// Conditional PATCH against the slots table. The filter in `path` is
    /// the compare half of the compare-and-swap; the returned rows are the
    /// rows that actually transitioned.
    async fn conditional_update_slots(
        &self,
        path: &str,
        update: Value,
        auth_token: Option<&str>,
    ) -> Result<Vec<Slot>, BookingError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            path,
            auth_token,
            Some(update),
            Some(headers),
        ).await.map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        result.into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<Slot>, _>>()
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse slots: {}", e)))
    }

    async fn insert_booking(
        &self,
        slot: &Slot,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Booking, BookingError> {
        let now = Utc::now();
        let booking_data = json!({
            "slot_id": slot.id,
            "patient_id": patient_id,
            "status": BookingStatus::Pending.to_string(),
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/bookings",
            Some(auth_token),
            Some(booking_data),
            Some(headers),
        ).await.map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(BookingError::DatabaseError("Failed to create booking".to_string()));
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse created booking: {}", e)))
    }

    /// Best-effort rollback used on the failure paths inside `reserve`. The
    /// reserved_by condition keeps it from touching a reservation someone
    /// else has since taken.
    async fn revert_reservation(&self, slot_id: Uuid, patient_id: Uuid, auth_token: &str) {
        if let Err(e) = self.revert_reservation_checked(slot_id, patient_id, Some(auth_token)).await {
            warn!("Failed to release reservation on slot {}: {}", slot_id, e);
        }
    }

    async fn revert_reservation_checked(
        &self,
        slot_id: Uuid,
        patient_id: Uuid,
        auth_token: Option<&str>,
    ) -> Result<(), BookingError> {
        let now = Utc::now();
        let path = format!(
            "/rest/v1/slots?id=eq.{}&status=eq.reserved&reserved_by=eq.{}",
            slot_id, patient_id,
        );
        let update = json!({
            "status": "available",
            "reserved_by": null,
            "reserved_at": null,
            "updated_at": now.to_rfc3339()
        });

        self.conditional_update_slots(&path, update, auth_token).await?;
        Ok(())
    }

    async fn update_booking_row(
        &self,
        booking_id: Uuid,
        status: BookingStatus,
        auth_token: Option<&str>,
    ) -> Result<Booking, BookingError> {
        let now = Utc::now();
        let path = format!("/rest/v1/bookings?id=eq.{}", booking_id);
        let update = json!({
            "status": status.to_string(),
            "updated_at": now.to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            auth_token,
            Some(update),
            Some(headers),
        ).await.map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(BookingError::NotFound);
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse updated booking: {}", e)))
    }

    async fn set_payment_order(
        &self,
        booking_id: Uuid,
        order_id: &str,
        auth_token: &str,
    ) -> Result<(), BookingError> {
        let path = format!("/rest/v1/bookings?id=eq.{}", booking_id);
        let update = json!({
            "payment_order_id": order_id,
            "updated_at": Utc::now().to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let _: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(update),
            Some(headers),
        ).await.map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        Ok(())
    }
}
