// libs/slot-cell/tests/generator_test.rs
use chrono::{NaiveDate, NaiveTime};
use serde_json::json;
use uuid::Uuid;
use wiremock::{Mock, MockServer, ResponseTemplate, matchers::{method, path}};

use slot_cell::models::{GenerateSlotsRequest, RecurrenceRule, SlotError};
use slot_cell::services::generator::SlotGeneratorService;
use shared_utils::test_utils::TestConfig;

// ==============================================================================
// TEST FIXTURES AND UTILITIES
// ==============================================================================

struct TestSetup {
    generator: SlotGeneratorService,
    mock_server: MockServer,
    doctor_id: Uuid,
    auth_token: String,
}

impl TestSetup {
    async fn new() -> Self {
        let mock_server = MockServer::start().await;
        let app_config = TestConfig::with_base_url(&mock_server.uri()).to_app_config();

        Self {
            generator: SlotGeneratorService::new(&app_config),
            mock_server,
            doctor_id: Uuid::new_v4(),
            auth_token: "test_token".to_string(),
        }
    }

    fn single_day_request(&self, end: (u32, u32)) -> GenerateSlotsRequest {
        GenerateSlotsRequest {
            doctor_id: self.doctor_id,
            date: Some(NaiveDate::from_ymd_opt(2030, 6, 10).unwrap()),
            recurrence: None,
            daily_start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            daily_end_time: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
            duration_minutes: 20,
            timezone: "UTC".to_string(),
        }
    }

    fn slot_row(&self, start: &str, end: &str, status: &str) -> serde_json::Value {
        json!({
            "id": Uuid::new_v4(),
            "doctor_id": self.doctor_id,
            "start_time": start,
            "end_time": end,
            "duration_minutes": 20,
            "status": status,
            "reserved_by": null,
            "reserved_at": null,
            "created_at": "2030-01-01T00:00:00Z",
            "updated_at": "2030-01-01T00:00:00Z"
        })
    }

    async fn mock_existing_slots(&self, rows: Vec<serde_json::Value>) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/slots"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rows))
            .mount(&self.mock_server)
            .await;
    }

    async fn mock_insert_returning(&self, rows: Vec<serde_json::Value>) {
        Mock::given(method("POST"))
            .and(path("/rest/v1/slots"))
            .respond_with(ResponseTemplate::new(201).set_body_json(rows))
            .mount(&self.mock_server)
            .await;
    }
}

// ==============================================================================
// GENERATION TESTS
// ==============================================================================

#[tokio::test]
async fn single_day_window_fills_with_contiguous_slots() {
    let setup = TestSetup::new().await;
    setup.mock_existing_slots(vec![]).await;
    setup.mock_insert_returning(vec![
        setup.slot_row("2030-06-10T09:00:00Z", "2030-06-10T09:20:00Z", "available"),
        setup.slot_row("2030-06-10T09:20:00Z", "2030-06-10T09:40:00Z", "available"),
        setup.slot_row("2030-06-10T09:40:00Z", "2030-06-10T10:00:00Z", "available"),
    ]).await;

    let response = setup.generator
        .generate(setup.single_day_request((10, 0)), &setup.auth_token)
        .await
        .unwrap();

    assert_eq!(response.created_count, 3);
    assert_eq!(response.skipped_overlaps, 0);

    // Every persisted slot carries the full requested duration
    for slot in &response.created {
        assert_eq!((slot.end_time - slot.start_time).num_minutes(), 20);
    }

    // And no two created slots intersect
    for (i, a) in response.created.iter().enumerate() {
        for b in response.created.iter().skip(i + 1) {
            assert!(a.end_time <= b.start_time || b.end_time <= a.start_time);
        }
    }
}

#[tokio::test]
async fn trailing_partial_window_emits_no_slot() {
    let setup = TestSetup::new().await;
    setup.mock_existing_slots(vec![]).await;
    setup.mock_insert_returning(vec![
        setup.slot_row("2030-06-10T09:00:00Z", "2030-06-10T09:20:00Z", "available"),
        setup.slot_row("2030-06-10T09:20:00Z", "2030-06-10T09:40:00Z", "available"),
        setup.slot_row("2030-06-10T09:40:00Z", "2030-06-10T10:00:00Z", "available"),
    ]).await;

    // 09:00-10:10: the trailing 10 minutes fit no 20-minute slot
    let response = setup.generator
        .generate(setup.single_day_request((10, 10)), &setup.auth_token)
        .await
        .unwrap();

    assert_eq!(response.created_count, 3);
}

#[tokio::test]
async fn overlapping_candidates_are_skipped_not_errors() {
    let setup = TestSetup::new().await;
    // 09:00-09:20 already held by a reserved slot
    setup.mock_existing_slots(vec![
        setup.slot_row("2030-06-10T09:00:00Z", "2030-06-10T09:20:00Z", "reserved"),
    ]).await;
    setup.mock_insert_returning(vec![
        setup.slot_row("2030-06-10T09:20:00Z", "2030-06-10T09:40:00Z", "available"),
        setup.slot_row("2030-06-10T09:40:00Z", "2030-06-10T10:00:00Z", "available"),
    ]).await;

    let response = setup.generator
        .generate(setup.single_day_request((10, 0)), &setup.auth_token)
        .await
        .unwrap();

    assert_eq!(response.created_count, 2);
    assert_eq!(response.skipped_overlaps, 1);
}

#[tokio::test]
async fn rerunning_identical_request_creates_nothing() {
    let setup = TestSetup::new().await;
    // The store already holds everything the request would generate; no
    // insert should happen (no POST mock is mounted, so one would fail).
    setup.mock_existing_slots(vec![
        setup.slot_row("2030-06-10T09:00:00Z", "2030-06-10T09:20:00Z", "available"),
        setup.slot_row("2030-06-10T09:20:00Z", "2030-06-10T09:40:00Z", "available"),
        setup.slot_row("2030-06-10T09:40:00Z", "2030-06-10T10:00:00Z", "booked"),
    ]).await;

    let response = setup.generator
        .generate(setup.single_day_request((10, 0)), &setup.auth_token)
        .await
        .unwrap();

    assert_eq!(response.created_count, 0);
    assert_eq!(response.skipped_overlaps, 3);
}

#[tokio::test]
async fn recurring_request_expands_across_weekdays() {
    let setup = TestSetup::new().await;
    setup.mock_existing_slots(vec![]).await;
    setup.mock_insert_returning(vec![
        setup.slot_row("2030-06-10T09:00:00Z", "2030-06-10T09:20:00Z", "available"),
        setup.slot_row("2030-06-10T09:20:00Z", "2030-06-10T09:40:00Z", "available"),
        setup.slot_row("2030-06-12T09:00:00Z", "2030-06-12T09:20:00Z", "available"),
        setup.slot_row("2030-06-12T09:20:00Z", "2030-06-12T09:40:00Z", "available"),
    ]).await;

    // 2030-06-10 is a Monday; one week of Mon/Wed at 09:00-09:40
    let request = GenerateSlotsRequest {
        doctor_id: setup.doctor_id,
        date: None,
        recurrence: Some(RecurrenceRule {
            start_date: NaiveDate::from_ymd_opt(2030, 6, 10).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2030, 6, 16).unwrap(),
            weekdays: vec![1, 3],
        }),
        daily_start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        daily_end_time: NaiveTime::from_hms_opt(9, 40, 0).unwrap(),
        duration_minutes: 20,
        timezone: "UTC".to_string(),
    };

    let response = setup.generator.generate(request, &setup.auth_token).await.unwrap();

    assert_eq!(response.created_count, 4);
}

// ==============================================================================
// VALIDATION TESTS
// ==============================================================================

#[tokio::test]
async fn rejects_duration_below_floor_before_touching_store() {
    let setup = TestSetup::new().await;
    // Deliberately no mocks: validation must fail before any request

    let mut request = setup.single_day_request((10, 0));
    request.duration_minutes = 15;

    let result = setup.generator.generate(request, &setup.auth_token).await;
    assert!(matches!(result, Err(SlotError::InvalidDuration { minimum: 20 })));

    assert!(setup.mock_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn rejects_window_with_no_room_for_a_slot() {
    let setup = TestSetup::new().await;

    let result = setup.generator
        .generate(setup.single_day_request((9, 10)), &setup.auth_token)
        .await;

    assert!(matches!(result, Err(SlotError::WindowTooShort)));
}

#[tokio::test]
async fn rejects_past_start_date() {
    let setup = TestSetup::new().await;

    let mut request = setup.single_day_request((10, 0));
    request.date = Some(NaiveDate::from_ymd_opt(2020, 6, 10).unwrap());

    let result = setup.generator.generate(request, &setup.auth_token).await;
    assert!(matches!(result, Err(SlotError::PastDate)));
}

#[tokio::test]
async fn rejects_recurrence_without_weekdays() {
    let setup = TestSetup::new().await;

    let request = GenerateSlotsRequest {
        doctor_id: setup.doctor_id,
        date: None,
        recurrence: Some(RecurrenceRule {
            start_date: NaiveDate::from_ymd_opt(2030, 6, 10).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2030, 6, 16).unwrap(),
            weekdays: vec![],
        }),
        daily_start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        daily_end_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        duration_minutes: 30,
        timezone: "UTC".to_string(),
    };

    let result = setup.generator.generate(request, &setup.auth_token).await;
    assert!(matches!(result, Err(SlotError::InvalidRecurrence(_))));
}
