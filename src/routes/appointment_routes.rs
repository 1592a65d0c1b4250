// src/routes/appointment_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, patch, post, put},
    Json, Router,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, *},
    risk,
    routes::availability_routes::{
        load_blocking_slots, load_time_off, load_weekly_hours, recommend_for_window,
        resolve_booking_minutes,
    },
    routes::risk_routes::load_risk_facts,
    routes::salon_routes::load_late_cancel_hours,
    scheduling::conflict::{find_conflicts, TimeRange},
    scheduling::slots::windows_for_date,
};

/*
Roles (salon_user.roles):
0 customer
1 admin
2 manager
3 stylist
4 receptionist
*/

fn is_admin(auth: &AuthContext) -> bool {
    auth.role == 1
}
fn is_manager(auth: &AuthContext) -> bool {
    auth.role == 2
}
fn is_stylist(auth: &AuthContext) -> bool {
    auth.role == 3
}
fn is_receptionist(auth: &AuthContext) -> bool {
    auth.role == 4
}
fn is_customer(auth: &AuthContext) -> bool {
    auth.role == 0
}

fn can_manage_appointments(auth: &AuthContext) -> bool {
    is_admin(auth) || is_manager(auth) || is_receptionist(auth)
}

fn ensure_manage(auth: &AuthContext) -> Result<(), ApiError> {
    if can_manage_appointments(auth) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only admin/manager/receptionist can manage appointments".into(),
        ))
    }
}

fn ensure_view_employee_scope(
    auth: &AuthContext,
    requested_employee: Option<Uuid>,
) -> Result<Option<Uuid>, ApiError> {
    // Stylists may only view their own schedule; the desk may view anyone's.
    if can_manage_appointments(auth) {
        return Ok(requested_employee);
    }

    if is_stylist(auth) {
        if requested_employee.is_some() {
            return Err(ApiError::Forbidden(
                "FORBIDDEN",
                "Stylists can only view their own schedule".into(),
            ));
        }
        // stylist with None -> caller looks up employee_id by auth.user_id
        return Ok(None);
    }

    Err(ApiError::Forbidden(
        "FORBIDDEN",
        "You do not have permission to view schedules".into(),
    ))
}

async fn resolve_employee_id_by_user_id(
    state: &AppState,
    user_id: Uuid,
) -> Result<Uuid, ApiError> {
    let row = sqlx::query(
        r#"
        SELECT employee_id
        FROM employee
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let Some(row) = row else {
        return Err(ApiError::BadRequest(
            "NO_EMPLOYEE_PROFILE",
            "This account has no employee profile".into(),
        ));
    };

    let employee_id: Uuid = row
        .try_get("employee_id")
        .map_err(|e| ApiError::Internal(format!("row decode error: {e}")))?;
    Ok(employee_id)
}

async fn resolve_customer_id_by_user_id(
    state: &AppState,
    user_id: Uuid,
) -> Result<Uuid, ApiError> {
    let customer_id: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT customer_id
        FROM customer
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    customer_id.ok_or_else(|| {
        ApiError::BadRequest(
            "NO_CUSTOMER_PROFILE",
            "This account has no customer profile".into(),
        )
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments/day", get(get_appointments_day))
        .route("/appointments/week", get(get_appointments_week))
        .route("/appointments/mine", get(get_my_appointments))
        .route("/appointments/{appointment_id}", get(get_appointment))
        .route("/appointments", post(create_appointment))
        .route("/appointments/{appointment_id}", patch(patch_appointment))
        .route("/appointments/{appointment_id}/confirm", post(mark_confirmed))
        .route("/appointments/{appointment_id}/arrive", post(mark_arrived))
        .route("/appointments/{appointment_id}/start", post(mark_started))
        .route("/appointments/{appointment_id}/complete", post(mark_completed))
        .route("/appointments/{appointment_id}/cancel", post(cancel_appointment))
        .route("/appointments/{appointment_id}/no_show", post(mark_no_show))
        .route("/appointments/{appointment_id}/addons", put(put_addons))
}

/* ============================================================
   Response DTOs
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct PersonBrief {
    pub id: Uuid,
    pub display: String,
    pub number: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ServiceBrief {
    pub id: Uuid,
    pub display_name: String,
}

#[derive(Debug, Serialize)]
pub struct AppointmentAddonDto {
    pub addon_id: Uuid,
    pub display_name: String,
    pub qty: i32,
}

#[derive(Debug, Serialize)]
pub struct AppointmentBlockDto {
    pub appointment_id: Uuid,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: i16,
    pub source: i16,
    pub deposit_required: bool,
    pub note: Option<String>,
    pub customer: PersonBrief,
    pub employee: PersonBrief,
    pub service: ServiceBrief,
    pub addons: Vec<AppointmentAddonDto>,
    pub addon_summary: String,
}

/* ============================================================
   Query params
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct DayQuery {
    // YYYY-MM-DD (local interpretation belongs to frontend; DB stores timestamptz)
    pub date: String,
    pub employee_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct WeekQuery {
    pub start: String,
    pub days: Option<i64>,
    pub employee_id: Option<Uuid>,
}

const BLOCK_SELECT: &str = r#"
    SELECT
      a.appointment_id,
      a.start_at,
      a.end_at,
      a.status,
      a.source,
      a.deposit_required,
      a.note,

      c.customer_id,
      c.first_name AS c_first,
      c.last_name  AS c_last,

      e.employee_id AS e_id,
      e.employee_display_number AS e_no,
      e.first_name AS e_first,
      e.last_name  AS e_last,

      s.service_id AS svc_id,
      s.display_name AS svc_name,

      aa.addon_id AS addon_id,
      aa.qty AS addon_qty,
      ac.display_name AS addon_name

    FROM appointment a
    JOIN customer c ON c.customer_id = a.customer_id
    JOIN employee e ON e.employee_id = a.employee_id
    JOIN service_catalog s ON s.service_id = a.service_id
    LEFT JOIN appointment_addon aa ON aa.appointment_id = a.appointment_id
    LEFT JOIN addon_catalog ac ON ac.addon_id = aa.addon_id
"#;

/* ============================================================
   GET /appointments/day
   ============================================================ */

pub async fn get_appointments_day(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<DayQuery>,
) -> Result<Json<ApiOk<Vec<AppointmentBlockDto>>>, ApiError> {
    let date = NaiveDate::parse_from_str(q.date.trim(), "%Y-%m-%d").map_err(|_| {
        ApiError::BadRequest("VALIDATION_ERROR", "date must be YYYY-MM-DD".into())
    })?;

    let requested = ensure_view_employee_scope(&auth, q.employee_id)?;
    let employee_id = match requested {
        Some(id) => Some(id),
        None if is_stylist(&auth) => {
            Some(resolve_employee_id_by_user_id(&state, auth.user_id).await?)
        }
        // Desk roles omitting employee_id get the whole day board.
        None => None,
    };

    let start_ts = date.and_hms_opt(0, 0, 0).unwrap().and_utc();
    let end_ts = start_ts + Duration::days(1);

    let rows = sqlx::query(&format!(
        r#"
        {BLOCK_SELECT}
        WHERE ($1::uuid IS NULL OR a.employee_id = $1)
          AND a.start_at >= $2
          AND a.start_at <  $3
        ORDER BY a.start_at ASC
        "#
    ))
    .bind(employee_id)
    .bind(start_ts)
    .bind(end_ts)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(ApiOk {
        data: fold_rows_into_blocks(rows)?,
    }))
}

/* ============================================================
   GET /appointments/week
   ============================================================ */

pub async fn get_appointments_week(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<WeekQuery>,
) -> Result<Json<ApiOk<Vec<AppointmentBlockDto>>>, ApiError> {
    let days = q.days.unwrap_or(7);
    if !(1..=14).contains(&days) {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "days must be between 1 and 14".into(),
        ));
    }

    let start_date = NaiveDate::parse_from_str(q.start.trim(), "%Y-%m-%d").map_err(|_| {
        ApiError::BadRequest("VALIDATION_ERROR", "start must be YYYY-MM-DD".into())
    })?;

    let requested = ensure_view_employee_scope(&auth, q.employee_id)?;
    let employee_id = match requested {
        Some(id) => id,
        None => {
            if is_stylist(&auth) {
                resolve_employee_id_by_user_id(&state, auth.user_id).await?
            } else {
                // The week view is per employee; desk roles must pick one.
                return Err(ApiError::BadRequest(
                    "VALIDATION_ERROR",
                    "employee_id is required for non-stylist users".into(),
                ));
            }
        }
    };

    let start_ts = start_date.and_hms_opt(0, 0, 0).unwrap().and_utc();
    let end_ts = start_ts + Duration::days(days);

    let rows = sqlx::query(&format!(
        r#"
        {BLOCK_SELECT}
        WHERE a.employee_id = $1
          AND a.start_at >= $2
          AND a.start_at <  $3
        ORDER BY a.start_at ASC
        "#
    ))
    .bind(employee_id)
    .bind(start_ts)
    .bind(end_ts)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(ApiOk {
        data: fold_rows_into_blocks(rows)?,
    }))
}

/* ============================================================
   GET /appointments/mine (customer portal)
   ============================================================ */

pub async fn get_my_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<AppointmentBlockDto>>>, ApiError> {
    if !is_customer(&auth) {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only customer accounts have a personal appointment list".into(),
        ));
    }

    let customer_id = resolve_customer_id_by_user_id(&state, auth.user_id).await?;

    let rows = sqlx::query(&format!(
        r#"
        {BLOCK_SELECT}
        WHERE a.customer_id = $1
          AND a.start_at >= now() - interval '30 days'
        ORDER BY a.start_at ASC
        "#
    ))
    .bind(customer_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(ApiOk {
        data: fold_rows_into_blocks(rows)?,
    }))
}

/* ============================================================
   GET /appointments/{id}
   ============================================================ */

pub async fn get_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentBlockDto>>, ApiError> {
    let rows = sqlx::query(&format!(
        r#"
        {BLOCK_SELECT}
        WHERE a.appointment_id = $1
        "#
    ))
    .bind(appointment_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if rows.is_empty() {
        return Err(ApiError::not_found("appointment"));
    }

    let blocks = fold_rows_into_blocks(rows)?;
    let block = blocks.into_iter().next().unwrap();

    if is_stylist(&auth) {
        let my_emp = resolve_employee_id_by_user_id(&state, auth.user_id).await?;
        if block.employee.id != my_emp {
            return Err(ApiError::Forbidden(
                "FORBIDDEN",
                "Stylists can only view their own appointments".into(),
            ));
        }
    } else if is_customer(&auth) {
        let my_customer = resolve_customer_id_by_user_id(&state, auth.user_id).await?;
        if block.customer.id != my_customer {
            return Err(ApiError::Forbidden(
                "FORBIDDEN",
                "Customers can only view their own appointments".into(),
            ));
        }
    }

    Ok(Json(ApiOk { data: block }))
}

/* ============================================================
   POST /appointments (create)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    /// Required for desk bookings; ignored for customer-portal bookings,
    /// which always book for the caller's own customer profile.
    pub customer_id: Option<Uuid>,
    /// Omitted -> workload recommendation picks the employee.
    pub employee_id: Option<Uuid>,
    pub service_id: Uuid,
    pub start_at: DateTime<Utc>,
    /// Omitted -> derived from service + addons + buffer.
    pub end_at: Option<DateTime<Utc>>,
    pub addon_ids: Option<Vec<Uuid>>,
    pub note: Option<String>,
}

/// Working-hours / time-off / double-booking check for one employee and
/// window, with route-level error codes. The authoritative double-booking
/// check is re-run inside the insert/update transaction.
async fn check_employee_window(
    state: &AppState,
    employee_id: Uuid,
    candidate: &TimeRange,
    exclude_appointment: Option<Uuid>,
) -> Result<(), ApiError> {
    let hours = load_weekly_hours(state, employee_id).await?;
    let windows = windows_for_date(candidate.start.date_naive(), &hours);
    if !windows.iter().any(|w| w.contains(candidate)) {
        return Err(ApiError::BadRequest(
            "OUTSIDE_WORKING_HOURS",
            "employee does not work during this window".into(),
        ));
    }

    let time_off = load_time_off(state, employee_id, candidate).await?;
    if time_off.iter().any(|t| t.overlaps(candidate)) {
        return Err(ApiError::Conflict(
            "EMPLOYEE_TIME_OFF",
            "employee has time off during this window".into(),
        ));
    }

    let blocking = load_blocking_slots(state, employee_id, candidate, exclude_appointment).await?;
    let conflicts = find_conflicts(candidate, &blocking);
    if let Some(first) = conflicts.first() {
        return Err(ApiError::Conflict(
            "APPOINTMENT_CONFLICT",
            format!("window collides with appointment {}", first.appointment_id),
        ));
    }

    Ok(())
}

/// Query-time double-booking recount inside the open transaction; the
/// invariant "no two blocking appointments per employee overlap" is
/// enforced here.
async fn tx_conflict_count(
    tx: &mut sqlx::PgConnection,
    employee_id: Uuid,
    candidate: &TimeRange,
    exclude_appointment: Option<Uuid>,
) -> Result<i64, ApiError> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM appointment
        WHERE employee_id = $1
          AND status BETWEEN 0 AND 3
          AND start_at < $3
          AND end_at > $2
          AND ($4::uuid IS NULL OR appointment_id <> $4)
        "#,
    )
    .bind(employee_id)
    .bind(candidate.start)
    .bind(candidate.end)
    .bind(exclude_appointment)
    .fetch_one(tx)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(count)
}

pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentBlockDto>>, ApiError> {
    let (customer_id, source) = if is_customer(&auth) {
        (resolve_customer_id_by_user_id(&state, auth.user_id).await?, SOURCE_ONLINE)
    } else {
        ensure_manage(&auth)?;
        let Some(customer_id) = req.customer_id else {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "customer_id is required".into(),
            ));
        };
        (customer_id, SOURCE_DESK)
    };

    let addon_ids = req.addon_ids.clone().unwrap_or_default();
    let booked_min = resolve_booking_minutes(&state, req.service_id, &addon_ids).await?;

    let end_at = match req.end_at {
        Some(end_at) => end_at,
        None => req.start_at + Duration::minutes(booked_min),
    };
    let candidate = TimeRange::new(req.start_at, end_at)
        .map_err(|_| ApiError::BadRequest("VALIDATION_ERROR", "end_at must be > start_at".into()))?;

    if source == SOURCE_ONLINE {
        let earliest = Utc::now() + Duration::minutes(state.min_lead_min);
        if candidate.start < earliest {
            return Err(ApiError::BadRequest(
                "LEAD_TIME_TOO_SHORT",
                format!("online bookings must start at least {} minutes from now", state.min_lead_min),
            ));
        }
    }

    // Risk gate: recomputed from history on every booking, never cached.
    let facts = load_risk_facts(&state, customer_id).await?;
    let assessment = risk::assess(&facts);
    let tier = effective_tier(&state, customer_id, assessment.tier).await?;
    let mitigations = risk::mitigations_for(tier);

    if source == SOURCE_ONLINE && mitigations.contains(&risk::Mitigation::OnlineBookingBlocked) {
        return Err(ApiError::Forbidden(
            "ONLINE_BOOKING_BLOCKED",
            "This account must book through the salon directly".into(),
        ));
    }
    let deposit_required = mitigations.contains(&risk::Mitigation::DepositRequired);

    // Employee: requested or workload-recommended.
    let employee_id = match req.employee_id {
        Some(employee_id) => {
            check_employee_window(&state, employee_id, &candidate, None).await?;
            employee_id
        }
        None => match recommend_for_window(&state, req.service_id, &candidate, None).await? {
            Some(rec) => rec.employee_id,
            None => {
                return Err(ApiError::Conflict(
                    "NO_EMPLOYEE_AVAILABLE",
                    "no qualified employee is free for this window".into(),
                ));
            }
        },
    };

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let row = sqlx::query(
        r#"
        INSERT INTO appointment (
          customer_id,
          employee_id,
          service_id,
          start_at,
          end_at,
          status,
          source,
          deposit_required,
          note,
          created_by_user_id,
          updated_by_user_id
        )
        VALUES ($1,$2,$3,$4,$5, 0, $6, $7, $8, $9, $9)
        RETURNING appointment_id
        "#,
    )
    .bind(customer_id)
    .bind(employee_id)
    .bind(req.service_id)
    .bind(candidate.start)
    .bind(candidate.end)
    .bind(source)
    .bind(deposit_required)
    .bind(req.note)
    .bind(auth.user_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| ApiError::BadRequest("APPOINTMENT_CREATE_FAILED", format!("{e}")))?;

    let appointment_id: Uuid = row
        .try_get("appointment_id")
        .map_err(|e| ApiError::Internal(format!("row decode error: {e}")))?;

    // Authoritative double-booking check, excluding the row just written.
    if tx_conflict_count(&mut *tx, employee_id, &candidate, Some(appointment_id)).await? > 0 {
        return Err(ApiError::Conflict(
            "APPOINTMENT_CONFLICT",
            "employee was booked while this request was in flight".into(),
        ));
    }

    for addon_id in &addon_ids {
        sqlx::query(
            r#"
            INSERT INTO appointment_addon (appointment_id, addon_id, qty)
            VALUES ($1,$2,1)
            "#,
        )
        .bind(appointment_id)
        .bind(addon_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| ApiError::BadRequest("ADDON_ATTACH_FAILED", format!("{e}")))?;
    }

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    tracing::info!(
        %appointment_id, %employee_id, %customer_id,
        tier = tier.as_str(),
        "appointment created"
    );

    get_appointment(State(state), auth, Path(appointment_id)).await
}

/// Stored override wins over the computed tier.
async fn effective_tier(
    state: &AppState,
    customer_id: Uuid,
    computed: risk::RiskTier,
) -> Result<risk::RiskTier, ApiError> {
    let stored: Option<i16> = sqlx::query_scalar(
        r#"
        SELECT risk_override
        FROM customer
        WHERE customer_id = $1
        "#,
    )
    .bind(customer_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .flatten();

    Ok(stored.and_then(risk::RiskTier::from_i16).unwrap_or(computed))
}

/* ============================================================
   PATCH /appointments/{id} (reschedule / reassign / note)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct PatchAppointmentRequest {
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub employee_id: Option<Uuid>,
    pub note: Option<Option<String>>,
}

#[derive(Debug, sqlx::FromRow)]
struct ApptCoreRow {
    employee_id: Uuid,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    status: i16,
}

async fn load_appointment_core(
    state: &AppState,
    appointment_id: Uuid,
) -> Result<ApptCoreRow, ApiError> {
    sqlx::query_as::<_, ApptCoreRow>(
        r#"
        SELECT employee_id, start_at, end_at, status
        FROM appointment
        WHERE appointment_id = $1
        "#,
    )
    .bind(appointment_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::not_found("appointment"))
}

pub async fn patch_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<PatchAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentBlockDto>>, ApiError> {
    ensure_manage(&auth)?;

    let current = load_appointment_core(&state, appointment_id).await?;
    if !status_blocks_time(current.status) {
        return Err(ApiError::BadRequest(
            "APPOINTMENT_CLOSED",
            "completed/cancelled/no-show appointments cannot be edited".into(),
        ));
    }

    let employee_id = req.employee_id.unwrap_or(current.employee_id);
    let start_at = req.start_at.unwrap_or(current.start_at);
    let end_at = req.end_at.unwrap_or(current.end_at);
    let candidate = TimeRange::new(start_at, end_at)
        .map_err(|_| ApiError::BadRequest("VALIDATION_ERROR", "end_at must be > start_at".into()))?;

    let window_changed = employee_id != current.employee_id
        || start_at != current.start_at
        || end_at != current.end_at;

    if window_changed {
        check_employee_window(&state, employee_id, &candidate, Some(appointment_id)).await?;
    }

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let res = sqlx::query(
        r#"
        UPDATE appointment
        SET
          employee_id = $2,
          start_at = $3,
          end_at   = $4,
          note     = COALESCE($5, note),
          updated_at = now(),
          updated_by_user_id = $6
        WHERE appointment_id = $1
        "#,
    )
    .bind(appointment_id)
    .bind(employee_id)
    .bind(candidate.start)
    .bind(candidate.end)
    .bind(req.note.unwrap_or(None))
    .bind(auth.user_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| ApiError::BadRequest("APPOINTMENT_UPDATE_FAILED", format!("{e}")))?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("appointment"));
    }

    if window_changed
        && tx_conflict_count(&mut *tx, employee_id, &candidate, Some(appointment_id)).await? > 0
    {
        return Err(ApiError::Conflict(
            "APPOINTMENT_CONFLICT",
            "employee was booked while this request was in flight".into(),
        ));
    }

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    get_appointment(State(state), auth, Path(appointment_id)).await
}

/* ============================================================
   Status transitions
   ============================================================ */

/// Allowed edges of the appointment lifecycle. Timestamps are set with
/// COALESCE so replays keep the first value.
fn transition_allowed(from: i16, to: i16) -> bool {
    match to {
        APPT_CONFIRMED => from == APPT_PENDING,
        APPT_ARRIVED => from == APPT_PENDING || from == APPT_CONFIRMED,
        APPT_IN_SERVICE => (APPT_PENDING..=APPT_ARRIVED).contains(&from),
        APPT_COMPLETED => from == APPT_ARRIVED || from == APPT_IN_SERVICE,
        APPT_CANCELLED => (APPT_PENDING..=APPT_ARRIVED).contains(&from),
        APPT_NO_SHOW => from == APPT_PENDING || from == APPT_CONFIRMED,
        _ => false,
    }
}

async fn ensure_transition(
    state: &AppState,
    appointment_id: Uuid,
    to: i16,
) -> Result<ApptCoreRow, ApiError> {
    let current = load_appointment_core(state, appointment_id).await?;
    if !transition_allowed(current.status, to) {
        return Err(ApiError::Conflict(
            "INVALID_STATUS_TRANSITION",
            format!("cannot move appointment from status {} to {}", current.status, to),
        ));
    }
    Ok(current)
}

async fn apply_transition(
    state: &AppState,
    auth: &AuthContext,
    appointment_id: Uuid,
    to: i16,
    stamp_column: Option<&'static str>,
) -> Result<(), ApiError> {
    ensure_transition(state, appointment_id, to).await?;

    let stamp_sql = match stamp_column {
        Some(col) => format!("{col} = COALESCE({col}, now()),"),
        None => String::new(),
    };

    sqlx::query(&format!(
        r#"
        UPDATE appointment
        SET {stamp_sql}
            status = $2,
            updated_at = now(),
            updated_by_user_id = $3
        WHERE appointment_id = $1
        "#
    ))
    .bind(appointment_id)
    .bind(to)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::BadRequest("APPOINTMENT_UPDATE_FAILED", format!("{e}")))?;

    Ok(())
}

pub async fn mark_confirmed(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentBlockDto>>, ApiError> {
    ensure_manage(&auth)?;
    apply_transition(&state, &auth, appointment_id, APPT_CONFIRMED, None).await?;
    get_appointment(State(state), auth, Path(appointment_id)).await
}

pub async fn mark_arrived(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentBlockDto>>, ApiError> {
    ensure_manage(&auth)?;
    apply_transition(&state, &auth, appointment_id, APPT_ARRIVED, Some("arrived_at")).await?;
    get_appointment(State(state), auth, Path(appointment_id)).await
}

pub async fn mark_started(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentBlockDto>>, ApiError> {
    // Stylists may start their own appointment from the chair.
    if !can_manage_appointments(&auth) && !is_stylist(&auth) {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only staff can start appointments".into(),
        ));
    }
    if is_stylist(&auth) {
        let my_emp = resolve_employee_id_by_user_id(&state, auth.user_id).await?;
        let current = load_appointment_core(&state, appointment_id).await?;
        if current.employee_id != my_emp {
            return Err(ApiError::Forbidden(
                "FORBIDDEN",
                "Stylists can only start their own appointments".into(),
            ));
        }
    }
    apply_transition(&state, &auth, appointment_id, APPT_IN_SERVICE, Some("started_at")).await?;
    get_appointment(State(state), auth, Path(appointment_id)).await
}

pub async fn mark_completed(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentBlockDto>>, ApiError> {
    if !can_manage_appointments(&auth) && !is_stylist(&auth) {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only staff can complete appointments".into(),
        ));
    }
    apply_transition(&state, &auth, appointment_id, APPT_COMPLETED, Some("completed_at")).await?;
    get_appointment(State(state), auth, Path(appointment_id)).await
}

pub async fn mark_no_show(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentBlockDto>>, ApiError> {
    ensure_manage(&auth)?;
    apply_transition(&state, &auth, appointment_id, APPT_NO_SHOW, None).await?;
    get_appointment(State(state), auth, Path(appointment_id)).await
}

/* ============================================================
   POST /appointments/{id}/cancel
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct CancelResponseData {
    pub appointment: AppointmentBlockDto,
    pub was_late: bool,
    /// Waiting waitlist entries whose window overlaps the freed range,
    /// FIFO, so the desk can follow up immediately.
    pub waitlist_matches: Vec<crate::routes::waitlist_routes::WaitlistEntryRow>,
}

pub async fn cancel_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<CancelResponseData>>, ApiError> {
    ensure_manage(&auth)?;
    let current = ensure_transition(&state, appointment_id, APPT_CANCELLED).await?;

    let late_cancel_hours = load_late_cancel_hours(&state).await?;
    let was_late = current.start_at - Utc::now() < Duration::hours(late_cancel_hours);

    let service_id: Uuid = sqlx::query_scalar(
        r#"
        SELECT service_id FROM appointment WHERE appointment_id = $1
        "#,
    )
    .bind(appointment_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    sqlx::query(
        r#"
        UPDATE appointment
        SET cancelled_at = COALESCE(cancelled_at, now()),
            cancel_was_late = $2,
            status = 5,
            updated_at = now(),
            updated_by_user_id = $3
        WHERE appointment_id = $1
        "#,
    )
    .bind(appointment_id)
    .bind(was_late)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::BadRequest("APPOINTMENT_UPDATE_FAILED", format!("{e}")))?;

    let freed = TimeRange::new(current.start_at, current.end_at)
        .map_err(|e| ApiError::Internal(format!("corrupt appointment range: {e}")))?;
    let waitlist_matches = crate::routes::waitlist_routes::find_matches(
        &state,
        service_id,
        &freed,
    )
    .await?;

    if was_late {
        tracing::warn!(%appointment_id, "late cancellation recorded");
    }

    let appointment = get_appointment(State(state), auth, Path(appointment_id))
        .await?
        .0
        .data;

    Ok(Json(ApiOk {
        data: CancelResponseData {
            appointment,
            was_late,
            waitlist_matches,
        },
    }))
}

/* ============================================================
   PUT /appointments/{id}/addons  (replace all)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct PutAddonsRequest {
    pub addon_ids: Vec<Uuid>,
}

pub async fn put_addons(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<PutAddonsRequest>,
) -> Result<Json<ApiOk<AppointmentBlockDto>>, ApiError> {
    ensure_manage(&auth)?;

    let current = load_appointment_core(&state, appointment_id).await?;
    if !status_blocks_time(current.status) {
        return Err(ApiError::BadRequest(
            "APPOINTMENT_CLOSED",
            "completed/cancelled/no-show appointments cannot be edited".into(),
        ));
    }

    let service_id: Uuid = sqlx::query_scalar(
        r#"
        SELECT service_id FROM appointment WHERE appointment_id = $1
        "#,
    )
    .bind(appointment_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    // New end time follows the new addon set.
    let booked_min = resolve_booking_minutes(&state, service_id, &req.addon_ids).await?;
    let candidate = TimeRange::new(current.start_at, current.start_at + Duration::minutes(booked_min))
        .map_err(|e| ApiError::Internal(format!("corrupt appointment range: {e}")))?;

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    sqlx::query(r#"DELETE FROM appointment_addon WHERE appointment_id = $1"#)
        .bind(appointment_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    for addon_id in &req.addon_ids {
        sqlx::query(
            r#"
            INSERT INTO appointment_addon (appointment_id, addon_id, qty)
            VALUES ($1,$2,1)
            "#,
        )
        .bind(appointment_id)
        .bind(addon_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| ApiError::BadRequest("ADDON_ATTACH_FAILED", format!("{e}")))?;
    }

    sqlx::query(
        r#"
        UPDATE appointment
        SET end_at = $2, updated_at = now(), updated_by_user_id = $3
        WHERE appointment_id = $1
        "#,
    )
    .bind(appointment_id)
    .bind(candidate.end)
    .bind(auth.user_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if tx_conflict_count(&mut *tx, current.employee_id, &candidate, Some(appointment_id)).await? > 0 {
        return Err(ApiError::Conflict(
            "APPOINTMENT_CONFLICT",
            "extending this appointment would collide with the next booking".into(),
        ));
    }

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    get_appointment(State(state), auth, Path(appointment_id)).await
}

/* ============================================================
   Helper: fold joined rows into appointment blocks
   ============================================================ */

fn fold_rows_into_blocks(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<AppointmentBlockDto>, ApiError> {
    use std::collections::BTreeMap;

    // appointment_id -> dto
    let mut map: BTreeMap<Uuid, AppointmentBlockDto> = BTreeMap::new();
    let mut order: Vec<Uuid> = Vec::new();

    for r in rows {
        let appointment_id: Uuid = r.try_get("appointment_id").map_err(internal_row)?;
        let start_at: DateTime<Utc> = r.try_get("start_at").map_err(internal_row)?;
        let end_at: DateTime<Utc> = r.try_get("end_at").map_err(internal_row)?;
        let status: i16 = r.try_get("status").map_err(internal_row)?;
        let source: i16 = r.try_get("source").map_err(internal_row)?;
        let deposit_required: bool = r.try_get("deposit_required").map_err(internal_row)?;
        let note: Option<String> = r.try_get("note").map_err(internal_row)?;

        let c_id: Uuid = r.try_get("customer_id").map_err(internal_row)?;
        let c_first: String = r.try_get("c_first").map_err(internal_row)?;
        let c_last: String = r.try_get("c_last").map_err(internal_row)?;

        let e_id: Uuid = r.try_get("e_id").map_err(internal_row)?;
        let e_no: i64 = r.try_get("e_no").map_err(internal_row)?;
        let e_first: String = r.try_get("e_first").map_err(internal_row)?;
        let e_last: String = r.try_get("e_last").map_err(internal_row)?;

        let svc_id: Uuid = r.try_get("svc_id").map_err(internal_row)?;
        let svc_name: String = r.try_get("svc_name").map_err(internal_row)?;

        if !map.contains_key(&appointment_id) {
            order.push(appointment_id);
        }
        let entry = map.entry(appointment_id).or_insert_with(|| AppointmentBlockDto {
            appointment_id,
            start_at,
            end_at,
            status,
            source,
            deposit_required,
            note: note.clone(),
            customer: PersonBrief {
                id: c_id,
                display: format!("{c_first} {c_last}"),
                number: None,
            },
            employee: PersonBrief {
                id: e_id,
                display: format!("{e_first} {e_last}"),
                number: Some(e_no),
            },
            service: ServiceBrief {
                id: svc_id,
                display_name: svc_name,
            },
            addons: vec![],
            addon_summary: String::new(),
        });

        // collect addon row if present
        let addon_id: Option<Uuid> = r.try_get("addon_id").ok();
        if let Some(addon_id) = addon_id {
            let qty: i32 = r.try_get("addon_qty").unwrap_or(1);
            let name: String = r.try_get("addon_name").unwrap_or_else(|_| "Addon".into());
            entry.addons.push(AppointmentAddonDto {
                addon_id,
                display_name: name,
                qty,
            });
        }
    }

    // build addon_summary (e.g. "Cut + Gloss×2")
    for v in map.values_mut() {
        if v.addons.is_empty() {
            v.addon_summary = "(no addons)".into();
        } else {
            let mut parts: Vec<String> = vec![];
            for a in &v.addons {
                if a.qty <= 1 {
                    parts.push(a.display_name.clone());
                } else {
                    parts.push(format!("{}×{}", a.display_name, a.qty));
                }
            }
            v.addon_summary = parts.join(" + ");
        }
    }

    // preserve the query's ORDER BY start_at
    let mut blocks = Vec::with_capacity(order.len());
    for id in order {
        if let Some(block) = map.remove(&id) {
            blocks.push(block);
        }
    }
    Ok(blocks)
}

fn internal_row(e: sqlx::Error) -> ApiError {
    ApiError::Internal(format!("row decode error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_allowed_happy_path() {
        assert!(transition_allowed(APPT_PENDING, APPT_CONFIRMED));
        assert!(transition_allowed(APPT_CONFIRMED, APPT_ARRIVED));
        assert!(transition_allowed(APPT_ARRIVED, APPT_IN_SERVICE));
        assert!(transition_allowed(APPT_IN_SERVICE, APPT_COMPLETED));
    }

    #[test]
    fn test_transition_allowed_walk_ins_skip_steps() {
        // walk-in: pending straight to in-service
        assert!(transition_allowed(APPT_PENDING, APPT_IN_SERVICE));
        // arrived but never marked in-service
        assert!(transition_allowed(APPT_ARRIVED, APPT_COMPLETED));
    }

    #[test]
    fn test_transition_blocked_from_terminal_states() {
        for terminal in [APPT_COMPLETED, APPT_CANCELLED, APPT_NO_SHOW] {
            for to in [
                APPT_CONFIRMED,
                APPT_ARRIVED,
                APPT_IN_SERVICE,
                APPT_COMPLETED,
                APPT_CANCELLED,
                APPT_NO_SHOW,
            ] {
                assert!(!transition_allowed(terminal, to), "{terminal} -> {to} must be blocked");
            }
        }
    }

    #[test]
    fn test_no_show_requires_customer_never_arrived() {
        assert!(transition_allowed(APPT_PENDING, APPT_NO_SHOW));
        assert!(transition_allowed(APPT_CONFIRMED, APPT_NO_SHOW));
        assert!(!transition_allowed(APPT_ARRIVED, APPT_NO_SHOW));
        assert!(!transition_allowed(APPT_IN_SERVICE, APPT_NO_SHOW));
    }

    #[test]
    fn test_cancel_not_allowed_once_in_service() {
        assert!(transition_allowed(APPT_PENDING, APPT_CANCELLED));
        assert!(transition_allowed(APPT_ARRIVED, APPT_CANCELLED));
        assert!(!transition_allowed(APPT_IN_SERVICE, APPT_CANCELLED));
    }
}
