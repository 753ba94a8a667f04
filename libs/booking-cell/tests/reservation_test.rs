// libs/booking-cell/tests/reservation_test.rs
use serde_json::json;
use uuid::Uuid;
use wiremock::{Mock, MockServer, ResponseTemplate, matchers::{method, path}};

use booking_cell::models::{BookingError, BookingStatus, ReserveSlotRequest};
use booking_cell::services::reclaim::ReservationReclaimService;
use booking_cell::services::reservation::SlotReservationService;
use shared_utils::test_utils::TestConfig;

// ==============================================================================
// TEST FIXTURES AND UTILITIES
// ==============================================================================

struct TestSetup {
    service: SlotReservationService,
    mock_server: MockServer,
    slot_id: Uuid,
    doctor_id: Uuid,
    patient_id: Uuid,
    booking_id: Uuid,
    auth_token: String,
}

impl TestSetup {
    async fn new() -> Self {
        let mock_server = MockServer::start().await;
        let app_config = TestConfig::with_base_url(&mock_server.uri()).to_app_config();

        Self {
            service: SlotReservationService::new(&app_config),
            mock_server,
            slot_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            booking_id: Uuid::new_v4(),
            auth_token: "test_token".to_string(),
        }
    }

    fn slot_row(&self, status: &str, reserved_by: Option<Uuid>) -> serde_json::Value {
        json!({
            "id": self.slot_id,
            "doctor_id": self.doctor_id,
            "start_time": "2030-06-10T09:00:00Z",
            "end_time": "2030-06-10T09:20:00Z",
            "duration_minutes": 20,
            "status": status,
            "reserved_by": reserved_by,
            "reserved_at": reserved_by.map(|_| "2030-06-10T08:00:00Z"),
            "created_at": "2030-01-01T00:00:00Z",
            "updated_at": "2030-01-01T00:00:00Z"
        })
    }

    fn booking_row(&self, status: &str) -> serde_json::Value {
        json!({
            "id": self.booking_id,
            "slot_id": self.slot_id,
            "patient_id": self.patient_id,
            "status": status,
            "payment_order_id": null,
            "created_at": "2030-01-01T00:00:00Z",
            "updated_at": "2030-01-01T00:00:00Z"
        })
    }

    async fn mock(&self, http_method: &str, url_path: &str, body: serde_json::Value) {
        Mock::given(method(http_method))
            .and(path(url_path))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.mock_server)
            .await;
    }
}

// ==============================================================================
// RESERVATION TESTS
// ==============================================================================

#[tokio::test]
async fn reserve_claims_slot_and_opens_payment() {
    let setup = TestSetup::new().await;
    setup.mock("GET", "/rest/v1/slots", json!([setup.slot_row("available", None)])).await;
    setup.mock("PATCH", "/rest/v1/slots",
               json!([setup.slot_row("reserved", Some(setup.patient_id))])).await;
    setup.mock("POST", "/rest/v1/bookings", json!([setup.booking_row("pending")])).await;
    setup.mock("POST", "/v1/orders", json!({ "order_id": "ord_123" })).await;
    setup.mock("PATCH", "/rest/v1/bookings", json!([setup.booking_row("pending")])).await;

    let reservation = setup.service.reserve(
        ReserveSlotRequest {
            slot_id: setup.slot_id,
            patient_id: setup.patient_id,
        },
        &setup.auth_token,
    ).await.unwrap();

    assert_eq!(reservation.booking_id, setup.booking_id);
    assert_eq!(reservation.slot_id, setup.slot_id);
    assert_eq!(reservation.status, BookingStatus::Pending);
    assert_eq!(reservation.payment_order_id.as_deref(), Some("ord_123"));
}

#[tokio::test]
async fn reserve_reports_unknown_slot() {
    let setup = TestSetup::new().await;
    setup.mock("GET", "/rest/v1/slots", json!([])).await;

    let result = setup.service.reserve(
        ReserveSlotRequest {
            slot_id: setup.slot_id,
            patient_id: setup.patient_id,
        },
        &setup.auth_token,
    ).await;

    assert!(matches!(result, Err(BookingError::SlotNotFound)));
}

#[tokio::test]
async fn reserve_loses_race_when_conditional_update_matches_nothing() {
    let setup = TestSetup::new().await;
    // The slot read sees it available, but the guarded write finds it
    // already claimed: empty affected-row set.
    setup.mock("GET", "/rest/v1/slots", json!([setup.slot_row("available", None)])).await;
    setup.mock("PATCH", "/rest/v1/slots", json!([])).await;

    let result = setup.service.reserve(
        ReserveSlotRequest {
            slot_id: setup.slot_id,
            patient_id: setup.patient_id,
        },
        &setup.auth_token,
    ).await;

    assert!(matches!(result, Err(BookingError::SlotUnavailable)));
}

#[tokio::test]
async fn concurrent_reserves_have_exactly_one_winner() {
    let mock_server = MockServer::start().await;
    let app_config = TestConfig::with_base_url(&mock_server.uri()).to_app_config();
    let setup = TestSetup::new().await; // ids only; requests go to mock_server

    Mock::given(method("GET"))
        .and(path("/rest/v1/slots"))
        .respond_with(ResponseTemplate::new(200)
            .set_body_json(json!([setup.slot_row("available", None)])))
        .mount(&mock_server)
        .await;

    // The store lets the guarded update through once; every later attempt
    // matches zero rows.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/slots"))
        .respond_with(ResponseTemplate::new(200)
            .set_body_json(json!([setup.slot_row("reserved", Some(setup.patient_id))])))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/bookings"))
        .respond_with(ResponseTemplate::new(201)
            .set_body_json(json!([setup.booking_row("pending")])))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "order_id": "ord_123" })))
        .mount(&mock_server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/bookings"))
        .respond_with(ResponseTemplate::new(200)
            .set_body_json(json!([setup.booking_row("pending")])))
        .mount(&mock_server)
        .await;

    let slot_id = setup.slot_id;
    let mut handles = Vec::new();
    for _ in 0..2 {
        let service = SlotReservationService::new(&app_config);
        let patient = Uuid::new_v4();
        handles.push(tokio::spawn(async move {
            service.reserve(
                ReserveSlotRequest { slot_id, patient_id: patient },
                "test_token",
            ).await
        }));
    }

    let results = futures::future::join_all(handles).await;
    let outcomes: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();

    let winners = outcomes.iter().filter(|r| r.is_ok()).count();
    let losers = outcomes.iter()
        .filter(|r| matches!(r, Err(BookingError::SlotUnavailable)))
        .count();

    assert_eq!(winners, 1);
    assert_eq!(losers, 1);
}

// ==============================================================================
// CONFIRMATION / RELEASE TESTS
// ==============================================================================

#[tokio::test]
async fn confirm_seals_reservation_into_booked() {
    let setup = TestSetup::new().await;
    setup.mock("GET", "/rest/v1/bookings", json!([setup.booking_row("pending")])).await;
    setup.mock("PATCH", "/rest/v1/slots",
               json!([setup.slot_row("booked", Some(setup.patient_id))])).await;
    setup.mock("PATCH", "/rest/v1/bookings", json!([setup.booking_row("confirmed")])).await;

    let booking = setup.service.confirm(setup.booking_id, None).await.unwrap();

    assert_eq!(booking.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn confirm_is_stale_when_reservation_was_reclaimed() {
    let setup = TestSetup::new().await;
    setup.mock("GET", "/rest/v1/bookings", json!([setup.booking_row("pending")])).await;
    // Slot no longer reserved by this patient: guarded update hits nothing
    setup.mock("PATCH", "/rest/v1/slots", json!([])).await;

    let result = setup.service.confirm(setup.booking_id, None).await;

    assert!(matches!(result, Err(BookingError::StaleReservation)));
}

#[tokio::test]
async fn confirm_is_idempotent_for_already_confirmed_booking() {
    let setup = TestSetup::new().await;
    // Gateways redeliver webhooks; only the booking read should happen.
    setup.mock("GET", "/rest/v1/bookings", json!([setup.booking_row("confirmed")])).await;

    let booking = setup.service.confirm(setup.booking_id, None).await.unwrap();

    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(setup.mock_server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn release_returns_pending_reservation_to_market() {
    let setup = TestSetup::new().await;
    setup.mock("GET", "/rest/v1/bookings", json!([setup.booking_row("pending")])).await;
    setup.mock("PATCH", "/rest/v1/slots", json!([setup.slot_row("available", None)])).await;
    setup.mock("PATCH", "/rest/v1/bookings", json!([setup.booking_row("cancelled")])).await;

    let booking = setup.service.release(setup.booking_id, None).await.unwrap();

    assert_eq!(booking.status, BookingStatus::Cancelled);
}

#[tokio::test]
async fn release_refuses_completed_booking() {
    let setup = TestSetup::new().await;
    setup.mock("GET", "/rest/v1/bookings", json!([setup.booking_row("completed")])).await;

    let result = setup.service.release(setup.booking_id, None).await;

    assert!(matches!(result, Err(BookingError::InvalidStatusTransition { .. })));
}

// ==============================================================================
// RECLAIM TESTS
// ==============================================================================

#[tokio::test]
async fn reclaim_reverts_overdue_reservations_and_cancels_bookings() {
    let mock_server = MockServer::start().await;
    let app_config = TestConfig::with_base_url(&mock_server.uri()).to_app_config();
    let setup = TestSetup::new().await;

    let other_slot = {
        let mut row = setup.slot_row("available", None);
        row["id"] = json!(Uuid::new_v4());
        row
    };
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/slots"))
        .respond_with(ResponseTemplate::new(200)
            .set_body_json(json!([setup.slot_row("available", None), other_slot])))
        .mount(&mock_server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/bookings"))
        .respond_with(ResponseTemplate::new(200)
            .set_body_json(json!([setup.booking_row("cancelled")])))
        .mount(&mock_server)
        .await;

    let reclaim = ReservationReclaimService::new(&app_config);
    let reclaimed = reclaim.reclaim_overdue().await.unwrap();

    assert_eq!(reclaimed, 2);
}

#[tokio::test]
async fn reclaim_with_nothing_overdue_is_a_noop() {
    let mock_server = MockServer::start().await;
    let app_config = TestConfig::with_base_url(&mock_server.uri()).to_app_config();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let reclaim = ReservationReclaimService::new(&app_config);
    let reclaimed = reclaim.reclaim_overdue().await.unwrap();

    assert_eq!(reclaimed, 0);
    // Only the slot sweep ran; no booking writes without reclaimed slots
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
}
