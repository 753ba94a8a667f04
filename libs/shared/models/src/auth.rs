use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    pub typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

/// Closed set of roles. Unknown role strings from a token map to `None`
/// on the user rather than being carried around for ad-hoc comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Doctor,
    Patient,
}

impl Role {
    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "admin" => Some(Role::Admin),
            "doctor" => Some(Role::Doctor),
            "patient" | "user" => Some(Role::Patient),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Some(Role::Admin)
    }

    fn is_self(&self, subject: &Uuid) -> bool {
        self.id == subject.to_string()
    }

    /// Slot generation and expiry sweeps: the owning doctor, or an admin.
    pub fn can_manage_slots(&self, owner_id: &Uuid) -> bool {
        self.is_admin() || (self.role == Some(Role::Doctor) && self.is_self(owner_id))
    }

    /// Reserving a slot: patients book for themselves; admins on behalf of anyone.
    pub fn can_book_for(&self, patient_id: &Uuid) -> bool {
        self.is_admin() || self.is_self(patient_id)
    }

    /// Reading or cancelling a booking: either involved party, or an admin.
    pub fn can_view_booking(&self, patient_id: &Uuid, doctor_id: &Uuid) -> bool {
        self.is_admin() || self.is_self(patient_id) || self.is_self(doctor_id)
    }
}
