// libs/slot-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc, NaiveDate, NaiveTime};
use std::fmt;

// ==============================================================================
// CORE SLOT MODELS
// ==============================================================================

/// A fixed-duration, doctor-owned bookable time interval. Intervals are
/// half-open: `[start_time, end_time)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub status: SlotStatus,
    pub reserved_by: Option<Uuid>,
    pub reserved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Slot {
    /// True while the slot occupies its interval on the doctor's calendar.
    /// Expired and cancelled slots free the interval up for regeneration.
    pub fn blocks_interval(&self) -> bool {
        self.status.blocks_interval()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    Reserved,
    Booked,
    Expired,
    Cancelled,
}

impl SlotStatus {
    pub fn blocks_interval(&self) -> bool {
        matches!(self, SlotStatus::Available | SlotStatus::Reserved | SlotStatus::Booked)
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotStatus::Available => write!(f, "available"),
            SlotStatus::Reserved => write!(f, "reserved"),
            SlotStatus::Booked => write!(f, "booked"),
            SlotStatus::Expired => write!(f, "expired"),
            SlotStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

/// Weekday-repeated expansion rule. `weekdays` uses the store convention:
/// 0 = Sunday through 6 = Saturday.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub weekdays: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateSlotsRequest {
    pub doctor_id: Uuid,
    /// Single-day mode. Exactly one of `date` / `recurrence` must be set.
    pub date: Option<NaiveDate>,
    /// Recurring mode.
    pub recurrence: Option<RecurrenceRule>,
    pub daily_start_time: NaiveTime,
    pub daily_end_time: NaiveTime,
    pub duration_minutes: i32,
    /// Display label carried through to clients; slot math is UTC.
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateSlotsResponse {
    pub created: Vec<Slot>,
    pub created_count: usize,
    /// Candidates dropped because an active slot already covered the
    /// interval. Not an error: re-running generation only fills gaps.
    pub skipped_overlaps: usize,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum SlotError {
    #[error("Slot duration must be at least {minimum} minutes")]
    InvalidDuration { minimum: i32 },

    #[error("Daily window is shorter than one slot")]
    WindowTooShort,

    #[error("Invalid recurrence: {0}")]
    InvalidRecurrence(String),

    #[error("Generation window starts in the past")]
    PastDate,

    #[error("Slot not found")]
    NotFound,

    #[error("Database error: {0}")]
    DatabaseError(String),
}

// ==============================================================================
// GENERATION RULES
// ==============================================================================

#[derive(Debug, Clone)]
pub struct SlotGenerationRules {
    /// Minimum consult length.
    pub min_duration_minutes: i32,
}

impl Default for SlotGenerationRules {
    fn default() -> Self {
        Self {
            min_duration_minutes: 20,
        }
    }
}
