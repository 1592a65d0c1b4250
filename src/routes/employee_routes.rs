// src/routes/employee_routes.rs

use axum::{
    extract::{Path, State},
    routing::{delete, get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, EmployeeRow},
};

/*
Roles (salon_user.roles):
0 customer
1 admin
2 manager
3 stylist
4 receptionist
*/

fn is_admin(auth: &AuthContext) -> bool { auth.role == 1 }
fn is_manager(auth: &AuthContext) -> bool { auth.role == 2 }

fn ensure_manage_staff(auth: &AuthContext) -> Result<(), ApiError> {
    if is_admin(auth) || is_manager(auth) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only admin/manager can manage staff".into(),
        ))
    }
}

fn ensure_staff(auth: &AuthContext) -> Result<(), ApiError> {
    if auth.role >= 1 && auth.role <= 4 {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Staff only".into(),
        ))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_employees).post(create_employee))
        .route("/{employee_id}", get(get_employee).patch(patch_employee))
        .route("/{employee_id}/hours", get(get_hours).put(put_hours))
        .route("/{employee_id}/time_off", get(list_time_off).post(create_time_off))
        .route("/{employee_id}/time_off/{time_off_id}", delete(delete_time_off))
        .route("/{employee_id}/services", put(put_services))
}

pub async fn list_employees(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<Vec<EmployeeRow>>, ApiError> {
    ensure_staff(&auth)?;

    let rows: Vec<EmployeeRow> = sqlx::query_as::<_, EmployeeRow>(
        r#"
        SELECT employee_id, user_id, employee_display_number, first_name, last_name, is_active
        FROM employee
        WHERE is_active = true
        ORDER BY employee_display_number ASC
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

pub async fn get_employee(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(employee_id): Path<Uuid>,
) -> Result<Json<EmployeeRow>, ApiError> {
    ensure_staff(&auth)?;

    let row: Option<EmployeeRow> = sqlx::query_as::<_, EmployeeRow>(
        r#"
        SELECT employee_id, user_id, employee_display_number, first_name, last_name, is_active
        FROM employee
        WHERE employee_id = $1
        "#,
    )
    .bind(employee_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    row.map(Json)
        .ok_or_else(|| ApiError::not_found("employee"))
}

#[derive(Debug, Deserialize)]
pub struct CreateEmployeeRequest {
    pub first_name: String,
    pub last_name: String,
    pub user_id: Option<Uuid>,
}

pub async fn create_employee(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateEmployeeRequest>,
) -> Result<Json<EmployeeRow>, ApiError> {
    ensure_manage_staff(&auth)?;

    let first_name = req.first_name.trim();
    let last_name = req.last_name.trim();
    if first_name.is_empty() || last_name.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "first_name and last_name are required".into(),
        ));
    }

    let row: EmployeeRow = sqlx::query_as::<_, EmployeeRow>(
        r#"
        INSERT INTO employee (user_id, first_name, last_name, is_active)
        VALUES ($1, $2, $3, true)
        RETURNING employee_id, user_id, employee_display_number, first_name, last_name, is_active
        "#,
    )
    .bind(req.user_id)
    .bind(first_name)
    .bind(last_name)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::BadRequest("EMPLOYEE_CREATE_FAILED", format!("{e}")))?;

    Ok(Json(row))
}

#[derive(Debug, Deserialize)]
pub struct PatchEmployeeRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_active: Option<bool>,
}

pub async fn patch_employee(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(employee_id): Path<Uuid>,
    Json(req): Json<PatchEmployeeRequest>,
) -> Result<Json<EmployeeRow>, ApiError> {
    ensure_manage_staff(&auth)?;

    let row: Option<EmployeeRow> = sqlx::query_as::<_, EmployeeRow>(
        r#"
        UPDATE employee
        SET
          first_name = COALESCE($2, first_name),
          last_name  = COALESCE($3, last_name),
          is_active  = COALESCE($4, is_active)
        WHERE employee_id = $1
        RETURNING employee_id, user_id, employee_display_number, first_name, last_name, is_active
        "#,
    )
    .bind(employee_id)
    .bind(req.first_name.as_deref().map(str::trim))
    .bind(req.last_name.as_deref().map(str::trim))
    .bind(req.is_active)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::BadRequest("EMPLOYEE_UPDATE_FAILED", format!("{e}")))?;

    row.map(Json)
        .ok_or_else(|| ApiError::not_found("employee"))
}

/* ============================================================
   Weekly working hours
   ============================================================ */

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct HoursRow {
    pub weekday: i16,
    pub open_min: i32,
    pub close_min: i32,
}

#[derive(Debug, Deserialize)]
pub struct PutHoursRequest {
    pub hours: Vec<HoursRow>,
}

fn validate_hours_row(h: &HoursRow) -> Result<(), ApiError> {
    if !(0..=6).contains(&h.weekday) {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "weekday must be 0..6 (Monday-based)".into(),
        ));
    }
    if h.open_min < 0 || h.close_min > 24 * 60 || h.open_min >= h.close_min {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "hours must satisfy 0 <= open_min < close_min <= 1440".into(),
        ));
    }
    Ok(())
}

pub async fn get_hours(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(employee_id): Path<Uuid>,
) -> Result<Json<Vec<HoursRow>>, ApiError> {
    ensure_staff(&auth)?;

    let rows: Vec<HoursRow> = sqlx::query_as::<_, HoursRow>(
        r#"
        SELECT weekday, open_min, close_min
        FROM employee_hours
        WHERE employee_id = $1
        ORDER BY weekday ASC, open_min ASC
        "#,
    )
    .bind(employee_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

/// Replace the whole weekly grid in one transaction (same pattern as
/// appointment addon replacement).
pub async fn put_hours(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(employee_id): Path<Uuid>,
    Json(req): Json<PutHoursRequest>,
) -> Result<Json<Vec<HoursRow>>, ApiError> {
    ensure_manage_staff(&auth)?;

    for h in &req.hours {
        validate_hours_row(h)?;
    }

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    sqlx::query(r#"DELETE FROM employee_hours WHERE employee_id = $1"#)
        .bind(employee_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    for h in &req.hours {
        sqlx::query(
            r#"
            INSERT INTO employee_hours (employee_id, weekday, open_min, close_min)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(employee_id)
        .bind(h.weekday)
        .bind(h.open_min)
        .bind(h.close_min)
        .execute(&mut *tx)
        .await
        .map_err(|e| ApiError::BadRequest("HOURS_UPDATE_FAILED", format!("{e}")))?;
    }

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    get_hours(State(state), auth, Path(employee_id)).await
}

/* ============================================================
   Time off
   ============================================================ */

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct TimeOffRow {
    pub time_off_id: Uuid,
    pub employee_id: Uuid,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTimeOffRequest {
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub note: Option<String>,
}

pub async fn list_time_off(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(employee_id): Path<Uuid>,
) -> Result<Json<Vec<TimeOffRow>>, ApiError> {
    ensure_staff(&auth)?;

    let rows: Vec<TimeOffRow> = sqlx::query_as::<_, TimeOffRow>(
        r#"
        SELECT time_off_id, employee_id, start_at, end_at, note
        FROM time_off
        WHERE employee_id = $1 AND end_at > now()
        ORDER BY start_at ASC
        "#,
    )
    .bind(employee_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

pub async fn create_time_off(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(employee_id): Path<Uuid>,
    Json(req): Json<CreateTimeOffRequest>,
) -> Result<Json<TimeOffRow>, ApiError> {
    ensure_manage_staff(&auth)?;

    if req.end_at <= req.start_at {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "end_at must be > start_at".into(),
        ));
    }

    let row: TimeOffRow = sqlx::query_as::<_, TimeOffRow>(
        r#"
        INSERT INTO time_off (employee_id, start_at, end_at, note)
        VALUES ($1, $2, $3, $4)
        RETURNING time_off_id, employee_id, start_at, end_at, note
        "#,
    )
    .bind(employee_id)
    .bind(req.start_at)
    .bind(req.end_at)
    .bind(req.note)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::BadRequest("TIME_OFF_CREATE_FAILED", format!("{e}")))?;

    Ok(Json(row))
}

pub async fn delete_time_off(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((employee_id, time_off_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<crate::models::OkResponse>, ApiError> {
    ensure_manage_staff(&auth)?;

    let res = sqlx::query(
        r#"
        DELETE FROM time_off
        WHERE time_off_id = $1 AND employee_id = $2
        "#,
    )
    .bind(time_off_id)
    .bind(employee_id)
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("time off entry"));
    }

    Ok(Json(crate::models::OkResponse {
        data: crate::models::OkData { ok: true },
    }))
}

/* ============================================================
   Services an employee can perform
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct PutServicesRequest {
    pub service_ids: Vec<Uuid>,
}

pub async fn put_services(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(employee_id): Path<Uuid>,
    Json(req): Json<PutServicesRequest>,
) -> Result<Json<crate::models::OkResponse>, ApiError> {
    ensure_manage_staff(&auth)?;

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    sqlx::query(r#"DELETE FROM employee_service WHERE employee_id = $1"#)
        .bind(employee_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    for service_id in &req.service_ids {
        sqlx::query(
            r#"
            INSERT INTO employee_service (employee_id, service_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(employee_id)
        .bind(service_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| ApiError::BadRequest("EMPLOYEE_SERVICE_UPDATE_FAILED", format!("{e}")))?;
    }

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(crate::models::OkResponse {
        data: crate::models::OkData { ok: true },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hours(weekday: i16, open_min: i32, close_min: i32) -> HoursRow {
        HoursRow { weekday, open_min, close_min }
    }

    #[test]
    fn test_validate_hours_row() {
        assert!(validate_hours_row(&hours(0, 9 * 60, 17 * 60)).is_ok());
        assert!(validate_hours_row(&hours(6, 0, 1440)).is_ok());
        assert!(validate_hours_row(&hours(7, 9 * 60, 17 * 60)).is_err());
        assert!(validate_hours_row(&hours(-1, 9 * 60, 17 * 60)).is_err());
        assert!(validate_hours_row(&hours(0, 17 * 60, 9 * 60)).is_err());
        assert!(validate_hours_row(&hours(0, 600, 600)).is_err());
        assert!(validate_hours_row(&hours(0, -10, 600)).is_err());
        assert!(validate_hours_row(&hours(0, 600, 1441)).is_err());
    }
}
