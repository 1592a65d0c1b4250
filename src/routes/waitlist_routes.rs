// src/routes/waitlist_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, *},
    scheduling::conflict::TimeRange,
};

fn is_customer(auth: &AuthContext) -> bool {
    auth.role == 0
}

fn can_manage_waitlist(auth: &AuthContext) -> bool {
    // roles: 1 admin, 2 manager, 4 receptionist
    matches!(auth.role, 1 | 2 | 4)
}

fn ensure_manage(auth: &AuthContext) -> Result<(), ApiError> {
    if can_manage_waitlist(auth) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only admin/manager/receptionist can manage the waitlist".into(),
        ))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/waitlist", post(create_entry).get(list_entries))
        .route("/waitlist/matches", get(get_matches))
        .route("/waitlist/expire_past", post(expire_past))
        .route("/waitlist/{waitlist_id}/notify", post(mark_notified))
        .route("/waitlist/{waitlist_id}/book", post(mark_booked))
        .route("/waitlist/{waitlist_id}/cancel", post(mark_cancelled))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct WaitlistEntryRow {
    pub waitlist_id: Uuid,
    pub customer_id: Uuid,
    pub service_id: Uuid,
    pub employee_id: Option<Uuid>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub status: i16,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub notified_at: Option<DateTime<Utc>>,
}

const ENTRY_SELECT: &str = r#"
    SELECT waitlist_id, customer_id, service_id, employee_id,
           window_start, window_end, status, note, created_at, notified_at
    FROM waitlist_entry
"#;

/* ============================================================
   POST /waitlist
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreateEntryRequest {
    /// Required for desk entries; customers always join for themselves.
    pub customer_id: Option<Uuid>,
    pub service_id: Uuid,
    /// Preferred stylist, if the customer insists on one.
    pub employee_id: Option<Uuid>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub note: Option<String>,
}

pub async fn create_entry(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateEntryRequest>,
) -> Result<Json<WaitlistEntryRow>, ApiError> {
    let customer_id = if is_customer(&auth) {
        let customer_id: Option<Uuid> =
            sqlx::query_scalar(r#"SELECT customer_id FROM customer WHERE user_id = $1"#)
                .bind(auth.user_id)
                .fetch_optional(&state.db)
                .await
                .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
        customer_id.ok_or_else(|| {
            ApiError::BadRequest(
                "NO_CUSTOMER_PROFILE",
                "This account has no customer profile".into(),
            )
        })?
    } else {
        ensure_manage(&auth)?;
        req.customer_id.ok_or_else(|| {
            ApiError::BadRequest("VALIDATION_ERROR", "customer_id is required".into())
        })?
    };

    if req.window_end <= req.window_start {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "window_end must be > window_start".into(),
        ));
    }
    if req.window_end <= Utc::now() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "window is entirely in the past".into(),
        ));
    }

    let row: WaitlistEntryRow = sqlx::query_as::<_, WaitlistEntryRow>(
        r#"
        INSERT INTO waitlist_entry
          (customer_id, service_id, employee_id, window_start, window_end, status, note)
        VALUES ($1, $2, $3, $4, $5, 0, $6)
        RETURNING waitlist_id, customer_id, service_id, employee_id,
                  window_start, window_end, status, note, created_at, notified_at
        "#,
    )
    .bind(customer_id)
    .bind(req.service_id)
    .bind(req.employee_id)
    .bind(req.window_start)
    .bind(req.window_end)
    .bind(req.note)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::BadRequest("WAITLIST_CREATE_FAILED", format!("{e}")))?;

    Ok(Json(row))
}

/* ============================================================
   GET /waitlist?date=YYYY-MM-DD[&status=n]
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub date: Option<String>,
    pub status: Option<i16>,
}

pub async fn list_entries(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<WaitlistEntryRow>>, ApiError> {
    ensure_manage(&auth)?;

    let day = match q.date.as_deref() {
        Some(raw) => Some(NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
            ApiError::BadRequest("VALIDATION_ERROR", "date must be YYYY-MM-DD".into())
        })?),
        None => None,
    };
    let (day_start, day_end) = match day {
        Some(d) => {
            let start = d.and_hms_opt(0, 0, 0).unwrap().and_utc();
            (Some(start), Some(start + chrono::Duration::days(1)))
        }
        None => (None, None),
    };

    let rows: Vec<WaitlistEntryRow> = sqlx::query_as::<_, WaitlistEntryRow>(&format!(
        r#"
        {ENTRY_SELECT}
        WHERE ($1::timestamptz IS NULL OR (window_start < $2 AND window_end > $1))
          AND ($3::smallint IS NULL OR status = $3)
        ORDER BY created_at ASC
        "#
    ))
    .bind(day_start)
    .bind(day_end)
    .bind(q.status)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

/* ============================================================
   GET /waitlist/matches (who could take a freed window)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct MatchQuery {
    pub service_id: Uuid,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

pub async fn get_matches(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<MatchQuery>,
) -> Result<Json<Vec<WaitlistEntryRow>>, ApiError> {
    ensure_manage(&auth)?;

    let freed = TimeRange::new(q.start_at, q.end_at)
        .map_err(|e| ApiError::BadRequest("VALIDATION_ERROR", e.to_string()))?;

    let rows = find_matches(&state, q.service_id, &freed).await?;
    Ok(Json(rows))
}

/// Waiting or already-notified entries for the same service whose desired
/// window overlaps the freed range. FIFO by created_at: first come, first
/// called.
pub(crate) async fn find_matches(
    state: &AppState,
    service_id: Uuid,
    freed: &TimeRange,
) -> Result<Vec<WaitlistEntryRow>, ApiError> {
    let rows: Vec<WaitlistEntryRow> = sqlx::query_as::<_, WaitlistEntryRow>(&format!(
        r#"
        {ENTRY_SELECT}
        WHERE service_id = $1
          AND status IN (0, 1)
          AND window_start < $3
          AND window_end > $2
        ORDER BY created_at ASC
        "#
    ))
    .bind(service_id)
    .bind(freed.start)
    .bind(freed.end)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(rows)
}

/* ============================================================
   Status transitions
   ============================================================ */

/// waitlist_entry.status: 0 waiting, 1 notified, 2 booked, 3 cancelled, 4 expired
fn waitlist_transition_allowed(from: i16, to: i16) -> bool {
    match to {
        WAITLIST_NOTIFIED => from == WAITLIST_WAITING,
        WAITLIST_BOOKED => from == WAITLIST_WAITING || from == WAITLIST_NOTIFIED,
        WAITLIST_CANCELLED => from == WAITLIST_WAITING || from == WAITLIST_NOTIFIED,
        WAITLIST_EXPIRED => from == WAITLIST_WAITING || from == WAITLIST_NOTIFIED,
        _ => false,
    }
}

async fn apply_transition(
    state: &AppState,
    waitlist_id: Uuid,
    to: i16,
    stamp_notified: bool,
) -> Result<Json<WaitlistEntryRow>, ApiError> {
    let current: Option<i16> =
        sqlx::query_scalar(r#"SELECT status FROM waitlist_entry WHERE waitlist_id = $1"#)
            .bind(waitlist_id)
            .fetch_optional(&state.db)
            .await
            .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let Some(current) = current else {
        return Err(ApiError::not_found("waitlist entry"));
    };
    if !waitlist_transition_allowed(current, to) {
        return Err(ApiError::Conflict(
            "INVALID_STATUS_TRANSITION",
            format!("cannot move waitlist entry from status {current} to {to}"),
        ));
    }

    let stamp_sql = if stamp_notified {
        "notified_at = COALESCE(notified_at, now()),"
    } else {
        ""
    };

    let row: WaitlistEntryRow = sqlx::query_as::<_, WaitlistEntryRow>(&format!(
        r#"
        UPDATE waitlist_entry
        SET {stamp_sql}
            status = $2
        WHERE waitlist_id = $1
        RETURNING waitlist_id, customer_id, service_id, employee_id,
                  window_start, window_end, status, note, created_at, notified_at
        "#
    ))
    .bind(waitlist_id)
    .bind(to)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(row))
}

pub async fn mark_notified(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(waitlist_id): Path<Uuid>,
) -> Result<Json<WaitlistEntryRow>, ApiError> {
    ensure_manage(&auth)?;
    apply_transition(&state, waitlist_id, WAITLIST_NOTIFIED, true).await
}

pub async fn mark_booked(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(waitlist_id): Path<Uuid>,
) -> Result<Json<WaitlistEntryRow>, ApiError> {
    ensure_manage(&auth)?;
    apply_transition(&state, waitlist_id, WAITLIST_BOOKED, false).await
}

pub async fn mark_cancelled(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(waitlist_id): Path<Uuid>,
) -> Result<Json<WaitlistEntryRow>, ApiError> {
    // Customers may withdraw their own entry; staff may cancel any.
    if is_customer(&auth) {
        let owner: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT c.user_id
            FROM waitlist_entry w
            JOIN customer c ON c.customer_id = w.customer_id
            WHERE w.waitlist_id = $1
            "#,
        )
        .bind(waitlist_id)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
        .flatten();

        if owner != Some(auth.user_id) {
            return Err(ApiError::Forbidden(
                "FORBIDDEN",
                "Customers can only cancel their own waitlist entries".into(),
            ));
        }
    } else {
        ensure_manage(&auth)?;
    }

    apply_transition(&state, waitlist_id, WAITLIST_CANCELLED, false).await
}

/* ============================================================
   POST /waitlist/expire_past (sweep entries whose window passed)
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct ExpireResponse {
    pub data: ExpireData,
}

#[derive(Debug, Serialize)]
pub struct ExpireData {
    pub expired: u64,
}

pub async fn expire_past(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ExpireResponse>, ApiError> {
    ensure_manage(&auth)?;

    let res = sqlx::query(
        r#"
        UPDATE waitlist_entry
        SET status = 4
        WHERE status IN (0, 1)
          AND window_end <= now()
        "#,
    )
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(ExpireResponse {
        data: ExpireData {
            expired: res.rows_affected(),
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waitlist_transitions_from_waiting() {
        assert!(waitlist_transition_allowed(WAITLIST_WAITING, WAITLIST_NOTIFIED));
        assert!(waitlist_transition_allowed(WAITLIST_WAITING, WAITLIST_BOOKED));
        assert!(waitlist_transition_allowed(WAITLIST_WAITING, WAITLIST_CANCELLED));
        assert!(waitlist_transition_allowed(WAITLIST_WAITING, WAITLIST_EXPIRED));
    }

    #[test]
    fn test_waitlist_notified_cannot_go_back() {
        assert!(!waitlist_transition_allowed(WAITLIST_NOTIFIED, WAITLIST_NOTIFIED));
        assert!(waitlist_transition_allowed(WAITLIST_NOTIFIED, WAITLIST_BOOKED));
        assert!(waitlist_transition_allowed(WAITLIST_NOTIFIED, WAITLIST_CANCELLED));
    }

    #[test]
    fn test_waitlist_terminal_states_are_final() {
        for terminal in [WAITLIST_BOOKED, WAITLIST_CANCELLED, WAITLIST_EXPIRED] {
            for to in [
                WAITLIST_NOTIFIED,
                WAITLIST_BOOKED,
                WAITLIST_CANCELLED,
                WAITLIST_EXPIRED,
            ] {
                assert!(!waitlist_transition_allowed(terminal, to));
            }
        }
    }
}
