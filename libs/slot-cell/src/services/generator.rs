// libs/slot-cell/src/services/generator.rs
use chrono::{DateTime, Utc, Duration as ChronoDuration, NaiveDate, NaiveTime, Datelike, Weekday};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;
use std::sync::Arc;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    GenerateSlotsRequest, GenerateSlotsResponse, Slot, SlotError, SlotGenerationRules,
};

pub struct SlotGeneratorService {
    supabase: Arc<SupabaseClient>,
    rules: SlotGenerationRules,
}

impl SlotGeneratorService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            rules: SlotGenerationRules::default(),
        }
    }

    pub fn with_rules(config: &AppConfig, rules: SlotGenerationRules) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            rules,
        }
    }

    /// Expand a generation request into concrete slots and persist them in
    /// one batch. Structural validation failures abort before any write;
    /// candidates that overlap an existing active slot are skipped silently,
    /// so re-running an identical request only fills gaps.
    pub async fn generate(
        &self,
        request: GenerateSlotsRequest,
        auth_token: &str,
    ) -> Result<GenerateSlotsResponse, SlotError> {
        info!("Generating slots for doctor {} ({} min each)",
              request.doctor_id, request.duration_minutes);

        self.validate_request(&request, Utc::now().date_naive())?;

        let dates = enumerate_target_dates(&request)?;
        let mut candidates: Vec<(DateTime<Utc>, DateTime<Utc>)> = Vec::new();
        for date in &dates {
            candidates.extend(walk_daily_window(
                *date,
                request.daily_start_time,
                request.daily_end_time,
                request.duration_minutes,
            ));
        }

        if candidates.is_empty() {
            debug!("No candidate slots for doctor {} in requested window", request.doctor_id);
            return Ok(GenerateSlotsResponse {
                created: vec![],
                created_count: 0,
                skipped_overlaps: 0,
            });
        }

        // One range query covering the whole request span; the per-candidate
        // overlap test happens in memory. Candidates are emitted in
        // ascending date and time order.
        let span_start = candidates[0].0;
        let span_end = candidates[candidates.len() - 1].1;
        let existing = self.fetch_blocking_slots(
            request.doctor_id,
            span_start,
            span_end,
            auth_token,
        ).await?;

        let total = candidates.len();
        let surviving: Vec<(DateTime<Utc>, DateTime<Utc>)> = candidates
            .into_iter()
            .filter(|(start, end)| {
                !existing.iter().any(|slot| {
                    slot.blocks_interval() && overlaps(*start, *end, slot.start_time, slot.end_time)
                })
            })
            .collect();
        let skipped_overlaps = total - surviving.len();

        if skipped_overlaps > 0 {
            debug!("Skipped {} overlapping candidates for doctor {}",
                   skipped_overlaps, request.doctor_id);
        }

        if surviving.is_empty() {
            info!("All {} candidates overlapped existing slots for doctor {}",
                  total, request.doctor_id);
            return Ok(GenerateSlotsResponse {
                created: vec![],
                created_count: 0,
                skipped_overlaps,
            });
        }

        let created = self.insert_slot_batch(&request, &surviving, auth_token).await?;

        info!("Created {} slots for doctor {} ({} skipped)",
              created.len(), request.doctor_id, skipped_overlaps);

        Ok(GenerateSlotsResponse {
            created_count: created.len(),
            created,
            skipped_overlaps,
        })
    }

    /// Fetch a slot by id.
    pub async fn get_slot(&self, slot_id: Uuid, auth_token: &str) -> Result<Slot, SlotError> {
        let path = format!("/rest/v1/slots?id=eq.{}", slot_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| SlotError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(SlotError::NotFound);
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| SlotError::DatabaseError(format!("Failed to parse slot: {}", e)))
    }

    /// Bookable slots for a doctor on a given date. Filtering on
    /// `start_time > now` makes a stale `available` row indistinguishable
    /// from an `expired` one, so listings never depend on the sweep having run.
    pub async fn get_available_slots(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<Slot>, SlotError> {
        debug!("Listing available slots for doctor {} on {}", doctor_id, date);

        let day_start = date.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let day_end = day_start + ChronoDuration::days(1);
        let from = day_start.max(Utc::now());
        if from >= day_end {
            return Ok(vec![]);
        }

        let path = format!(
            "/rest/v1/slots?doctor_id=eq.{}&status=eq.available&start_time=gt.{}&start_time=lt.{}&order=start_time.asc",
            doctor_id,
            urlencoding::encode(&from.to_rfc3339()),
            urlencoding::encode(&day_end.to_rfc3339()),
        );

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| SlotError::DatabaseError(e.to_string()))?;

        result.into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<Slot>, _>>()
            .map_err(|e| SlotError::DatabaseError(format!("Failed to parse slots: {}", e)))
    }

    // ==============================================================================
    // PRIVATE HELPER METHODS
    // ==============================================================================

    fn validate_request(
        &self,
        request: &GenerateSlotsRequest,
        today: NaiveDate,
    ) -> Result<(), SlotError> {
        if request.duration_minutes < self.rules.min_duration_minutes {
            return Err(SlotError::InvalidDuration {
                minimum: self.rules.min_duration_minutes,
            });
        }

        if request.daily_end_time <= request.daily_start_time {
            return Err(SlotError::WindowTooShort);
        }
        let window_minutes = (request.daily_end_time - request.daily_start_time).num_minutes();
        if window_minutes < request.duration_minutes as i64 {
            return Err(SlotError::WindowTooShort);
        }

        let first_date = match (&request.date, &request.recurrence) {
            (Some(date), None) => *date,
            (None, Some(recurrence)) => {
                if recurrence.weekdays.is_empty() {
                    return Err(SlotError::InvalidRecurrence(
                        "at least one weekday is required".to_string(),
                    ));
                }
                if recurrence.weekdays.iter().any(|d| *d > 6) {
                    return Err(SlotError::InvalidRecurrence(
                        "weekdays must be between 0 (Sunday) and 6 (Saturday)".to_string(),
                    ));
                }
                if recurrence.end_date < recurrence.start_date {
                    return Err(SlotError::InvalidRecurrence(
                        "end date must not be before start date".to_string(),
                    ));
                }
                recurrence.start_date
            }
            _ => {
                return Err(SlotError::InvalidRecurrence(
                    "exactly one of date or recurrence must be provided".to_string(),
                ));
            }
        };

        if first_date < today {
            return Err(SlotError::PastDate);
        }

        Ok(())
    }

    /// Existing slots that still occupy their interval on the doctor's
    /// calendar. Expired and cancelled slots are deliberately absent so a
    /// freed interval can be regenerated.
    async fn fetch_blocking_slots(
        &self,
        doctor_id: Uuid,
        span_start: DateTime<Utc>,
        span_end: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Vec<Slot>, SlotError> {
        let path = format!(
            "/rest/v1/slots?doctor_id=eq.{}&status=in.(available,reserved,booked)&start_time=lt.{}&end_time=gt.{}&order=start_time.asc",
            doctor_id,
            urlencoding::encode(&span_end.to_rfc3339()),
            urlencoding::encode(&span_start.to_rfc3339()),
        );

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| SlotError::DatabaseError(e.to_string()))?;

        result.into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<Slot>, _>>()
            .map_err(|e| SlotError::DatabaseError(format!("Failed to parse slots: {}", e)))
    }

    /// Single POST with an array body: PostgREST runs the insert as one
    /// statement, so the batch lands all-or-nothing.
    async fn insert_slot_batch(
        &self,
        request: &GenerateSlotsRequest,
        intervals: &[(DateTime<Utc>, DateTime<Utc>)],
        auth_token: &str,
    ) -> Result<Vec<Slot>, SlotError> {
        let now = Utc::now();
        let rows: Vec<Value> = intervals.iter().map(|(start, end)| {
            json!({
                "doctor_id": request.doctor_id,
                "start_time": start.to_rfc3339(),
                "end_time": end.to_rfc3339(),
                "duration_minutes": request.duration_minutes,
                "status": "available",
                "created_at": now.to_rfc3339(),
                "updated_at": now.to_rfc3339()
            })
        }).collect();

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/slots",
            Some(auth_token),
            Some(Value::Array(rows)),
            Some(headers),
        ).await.map_err(|e| SlotError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            warn!("Slot batch insert returned no rows for doctor {}", request.doctor_id);
            return Err(SlotError::DatabaseError("Failed to create slots".to_string()));
        }

        result.into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<Slot>, _>>()
            .map_err(|e| SlotError::DatabaseError(format!("Failed to parse created slots: {}", e)))
    }
}

// ==============================================================================
// PURE SLOT MATH
// ==============================================================================

/// The target calendar dates of a generation request: the single date, or
/// every date in the recurrence range whose weekday is selected.
pub(crate) fn enumerate_target_dates(
    request: &GenerateSlotsRequest,
) -> Result<Vec<NaiveDate>, SlotError> {
    match (&request.date, &request.recurrence) {
        (Some(date), None) => Ok(vec![*date]),
        (None, Some(recurrence)) => {
            let mut dates = Vec::new();
            let mut current = recurrence.start_date;
            while current <= recurrence.end_date {
                if recurrence.weekdays.contains(&weekday_index(current.weekday())) {
                    dates.push(current);
                }
                current = current.succ_opt().ok_or_else(|| {
                    SlotError::InvalidRecurrence("date range overflow".to_string())
                })?;
            }
            Ok(dates)
        }
        _ => Err(SlotError::InvalidRecurrence(
            "exactly one of date or recurrence must be provided".to_string(),
        )),
    }
}

/// Fixed-step walk over one day's window. A trailing remainder shorter than
/// `duration_minutes` produces no candidate.
pub(crate) fn walk_daily_window(
    date: NaiveDate,
    daily_start: NaiveTime,
    daily_end: NaiveTime,
    duration_minutes: i32,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let step = ChronoDuration::minutes(duration_minutes as i64);
    let window_end = date.and_time(daily_end).and_utc();

    let mut candidates = Vec::new();
    let mut current = date.and_time(daily_start).and_utc();
    while current + step <= window_end {
        candidates.push((current, current + step));
        current += step;
    }
    candidates
}

/// Half-open interval overlap: `[a_start, a_end)` intersects `[b_start, b_end)`.
pub(crate) fn overlaps(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}

fn weekday_index(weekday: Weekday) -> u8 {
    match weekday {
        Weekday::Sun => 0,
        Weekday::Mon => 1,
        Weekday::Tue => 2,
        Weekday::Wed => 3,
        Weekday::Thu => 4,
        Weekday::Fri => 5,
        Weekday::Sat => 6,
    }
}
