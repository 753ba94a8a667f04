// libs/booking-cell/tests/handlers_test.rs
use std::sync::Arc;
use axum::{
    body::Bytes,
    extract::{Extension, State},
    http::{HeaderMap, HeaderValue},
    Json,
};
use axum_extra::TypedHeader;
use base64::{engine::general_purpose::STANDARD, Engine};
use headers::Authorization;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;
use wiremock::{Mock, MockServer, ResponseTemplate, matchers::{method, path}};

use booking_cell::handlers::{payment_webhook, reserve_slot};
use booking_cell::models::ReserveSlotRequest;
use shared_models::error::AppError;
use shared_utils::test_utils::{MockStoreResponses, TestConfig, TestUser};

fn sign_body(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    STANDARD.encode(mac.finalize().into_bytes())
}

fn signature_headers(signature: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-payment-signature", HeaderValue::from_str(signature).unwrap());
    headers
}

// ==============================================================================
// RESERVATION AUTHORIZATION
// ==============================================================================

#[tokio::test]
async fn patient_cannot_reserve_for_someone_else() {
    let config = TestConfig::default().to_arc();
    let patient = TestUser::patient("patient@example.com").to_user();

    let result = reserve_slot(
        State(config),
        TypedHeader(Authorization::bearer("test_token").unwrap()),
        Extension(patient),
        Json(ReserveSlotRequest {
            slot_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
        }),
    ).await;

    match result.unwrap_err() {
        AppError::Auth(_) => {}
        other => panic!("Expected Auth error, got {:?}", other),
    }
}

// ==============================================================================
// PAYMENT WEBHOOK
// ==============================================================================

#[tokio::test]
async fn webhook_without_signature_is_rejected() {
    let config = TestConfig::default().to_arc();

    let result = payment_webhook(
        State(config),
        HeaderMap::new(),
        Bytes::from_static(b"{}"),
    ).await;

    match result.unwrap_err() {
        AppError::Auth(_) => {}
        other => panic!("Expected Auth error, got {:?}", other),
    }
}

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected() {
    let config = TestConfig::default().to_arc();

    let body = br#"{"booking_id":"550e8400-e29b-41d4-a716-446655440000","order_id":"ord_1","event":"succeeded"}"#;
    let signature = sign_body("not-the-configured-secret", body);

    let result = payment_webhook(
        State(config),
        signature_headers(&signature),
        Bytes::from_static(body),
    ).await;

    match result.unwrap_err() {
        AppError::Auth(_) => {}
        other => panic!("Expected Auth error, got {:?}", other),
    }
}

#[tokio::test]
async fn webhook_failure_event_releases_reservation() {
    let mock_server = MockServer::start().await;
    let test_config = TestConfig::with_base_url(&mock_server.uri());
    let webhook_secret = test_config.payment_webhook_secret.clone();
    let config = Arc::new(test_config.to_app_config());

    let booking_id = Uuid::new_v4();
    let slot_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/bookings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::booking_row(booking_id, slot_id, patient_id, "pending")
        ])))
        .mount(&mock_server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::slot_row(
                slot_id,
                Uuid::new_v4(),
                "2030-06-10T09:00:00Z",
                "2030-06-10T09:30:00Z",
                "available",
            )
        ])))
        .mount(&mock_server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/bookings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::booking_row(booking_id, slot_id, patient_id, "cancelled")
        ])))
        .mount(&mock_server)
        .await;

    let body = serde_json::to_vec(&json!({
        "booking_id": booking_id,
        "order_id": "ord_1",
        "event": "failed"
    })).unwrap();
    let signature = sign_body(&webhook_secret, &body);

    let result = payment_webhook(
        State(config),
        signature_headers(&signature),
        Bytes::from(body),
    ).await;

    let response = result.unwrap().0;
    assert_eq!(response["success"], json!(true));
    assert_eq!(response["status"], json!("cancelled"));
}
