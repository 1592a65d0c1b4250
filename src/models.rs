use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub session_ttl_hours: i64,
    pub slot_granularity_min: i64,
    pub min_lead_min: i64,
}

/* -------------------------
   Status vocabularies
--------------------------*/

// appointment.status
pub const APPT_PENDING: i16 = 0;
pub const APPT_CONFIRMED: i16 = 1;
pub const APPT_ARRIVED: i16 = 2;
pub const APPT_IN_SERVICE: i16 = 3;
pub const APPT_COMPLETED: i16 = 4;
pub const APPT_CANCELLED: i16 = 5;
pub const APPT_NO_SHOW: i16 = 6;

/// Statuses that hold an employee's time. Completed/cancelled/no-show
/// appointments never participate in conflict or availability checks.
pub fn status_blocks_time(status: i16) -> bool {
    (APPT_PENDING..=APPT_IN_SERVICE).contains(&status)
}

// appointment.source
pub const SOURCE_DESK: i16 = 0;
pub const SOURCE_ONLINE: i16 = 1;

// waitlist_entry.status
pub const WAITLIST_WAITING: i16 = 0;
pub const WAITLIST_NOTIFIED: i16 = 1;
pub const WAITLIST_BOOKED: i16 = 2;
pub const WAITLIST_CANCELLED: i16 = 3;
pub const WAITLIST_EXPIRED: i16 = 4;

/* -------------------------
   API DTOs
--------------------------*/

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub device_name: Option<String>,
    pub remember_me: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub data: LoginResponseData,
}

#[derive(Debug, Serialize)]
pub struct LoginResponseData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub salon_user: UserProfile,
    pub salon: SalonProfile,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub data: MeResponseData,
}

#[derive(Debug, Serialize)]
pub struct MeResponseData {
    pub salon_user: UserProfile,
    pub salon: SalonProfile,
    pub session: SessionInfo,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub data: OkData,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    /// Single role stored as smallint in DB; returned as an array for
    /// client compatibility.
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SalonProfile {
    pub salon_name: String,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub password_hash: String,
    pub roles: i16,
    pub is_active: bool,
}

#[derive(Debug, sqlx::FromRow)]
pub struct SessionTokenRow {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ServiceCatalogRow {
    pub service_id: Uuid,
    pub display_number: i32,
    pub display_name: String,
    pub duration_min: i32,
    /// Cleanup/turnover time reserved after the service.
    pub buffer_min: i32,
    pub price_cents: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AddonCatalogRow {
    pub addon_id: Uuid,
    pub service_id: Uuid,
    pub display_name: String,
    pub extra_min: i32,
    pub price_cents: i32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EmployeeRow {
    pub employee_id: Uuid,
    pub user_id: Option<Uuid>,
    pub employee_display_number: i64,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
}

/* -------------------------
   Helpers
--------------------------*/

/// Role mapping for salon_user.roles:
/// 0 customer, 1 admin, 2 manager, 3 stylist, 4 receptionist
pub fn role_to_string(role: i16) -> String {
    match role {
        0 => "customer",
        1 => "admin",
        2 => "manager",
        3 => "stylist",
        4 => "receptionist",
        _ => "unknown",
    }
    .to_string()
}
