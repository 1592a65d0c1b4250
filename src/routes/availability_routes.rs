// src/routes/availability_routes.rs
//
// Free-slot search and workload-balanced employee recommendation. The
// date-range arithmetic lives in crate::scheduling; this file only loads
// rows and shapes responses.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, EmployeeRow},
    scheduling::conflict::{find_conflicts, BookedSlot, TimeRange},
    scheduling::slots::{day_slots, windows_for_date, SlotQuery, WeeklyHours},
    scheduling::workload::{sorted_by_load, EmployeeLoad},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/availability", get(get_availability))
        .route("/availability/recommend", get(get_recommendation))
}

/* ============================================================
   Shared loaders (also used by appointment_routes)
   ============================================================ */

/// Total minutes to reserve for a booking: service duration + buffer +
/// every requested addon. Addons must belong to the service and be active.
pub(crate) async fn resolve_booking_minutes(
    state: &AppState,
    service_id: Uuid,
    addon_ids: &[Uuid],
) -> Result<i64, ApiError> {
    #[derive(sqlx::FromRow)]
    struct TimingRow {
        duration_min: i32,
        buffer_min: i32,
    }

    let timing: TimingRow = sqlx::query_as::<_, TimingRow>(
        r#"
        SELECT duration_min, buffer_min
        FROM service_catalog
        WHERE service_id = $1 AND is_active = true
        "#,
    )
    .bind(service_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::not_found("service"))?;

    let mut total = (timing.duration_min + timing.buffer_min) as i64;

    for addon_id in addon_ids {
        let extra_min: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT extra_min
            FROM addon_catalog
            WHERE addon_id = $1 AND service_id = $2 AND is_active = true
            "#,
        )
        .bind(addon_id)
        .bind(service_id)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

        let Some(extra_min) = extra_min else {
            return Err(ApiError::BadRequest(
                "ADDON_MISMATCH",
                format!("addon {addon_id} does not belong to this service"),
            ));
        };
        total += extra_min as i64;
    }

    Ok(total)
}

pub(crate) async fn load_qualified_employees(
    state: &AppState,
    service_id: Uuid,
) -> Result<Vec<EmployeeRow>, ApiError> {
    let rows: Vec<EmployeeRow> = sqlx::query_as::<_, EmployeeRow>(
        r#"
        SELECT e.employee_id, e.user_id, e.employee_display_number,
               e.first_name, e.last_name, e.is_active
        FROM employee e
        JOIN employee_service es ON es.employee_id = e.employee_id
        WHERE es.service_id = $1
          AND e.is_active = true
        ORDER BY e.employee_display_number ASC
        "#,
    )
    .bind(service_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(rows)
}

pub(crate) async fn load_weekly_hours(
    state: &AppState,
    employee_id: Uuid,
) -> Result<Vec<WeeklyHours>, ApiError> {
    #[derive(sqlx::FromRow)]
    struct Row {
        weekday: i16,
        open_min: i32,
        close_min: i32,
    }

    let rows: Vec<Row> = sqlx::query_as::<_, Row>(
        r#"
        SELECT weekday, open_min, close_min
        FROM employee_hours
        WHERE employee_id = $1
        "#,
    )
    .bind(employee_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(rows
        .into_iter()
        .map(|r| WeeklyHours {
            weekday: r.weekday,
            open_min: r.open_min,
            close_min: r.close_min,
        })
        .collect())
}

pub(crate) async fn load_time_off(
    state: &AppState,
    employee_id: Uuid,
    range: &TimeRange,
) -> Result<Vec<TimeRange>, ApiError> {
    #[derive(sqlx::FromRow)]
    struct Row {
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    }

    let rows: Vec<Row> = sqlx::query_as::<_, Row>(
        r#"
        SELECT start_at, end_at
        FROM time_off
        WHERE employee_id = $1
          AND start_at < $3
          AND end_at > $2
        "#,
    )
    .bind(employee_id)
    .bind(range.start)
    .bind(range.end)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(rows
        .into_iter()
        .map(|r| TimeRange { start: r.start_at, end: r.end_at })
        .collect())
}

/// Blocking appointments (status pending..in_service) overlapping a range.
/// `exclude_appointment` lets a reschedule ignore the row being moved.
pub(crate) async fn load_blocking_slots(
    state: &AppState,
    employee_id: Uuid,
    range: &TimeRange,
    exclude_appointment: Option<Uuid>,
) -> Result<Vec<BookedSlot>, ApiError> {
    #[derive(sqlx::FromRow)]
    struct Row {
        appointment_id: Uuid,
        employee_id: Uuid,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    }

    let rows: Vec<Row> = sqlx::query_as::<_, Row>(
        r#"
        SELECT appointment_id, employee_id, start_at, end_at
        FROM appointment
        WHERE employee_id = $1
          AND status BETWEEN 0 AND 3
          AND start_at < $3
          AND end_at > $2
          AND ($4::uuid IS NULL OR appointment_id <> $4)
        ORDER BY start_at ASC
        "#,
    )
    .bind(employee_id)
    .bind(range.start)
    .bind(range.end)
    .bind(exclude_appointment)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    rows.into_iter()
        .map(|r| {
            Ok(BookedSlot {
                appointment_id: r.appointment_id,
                employee_id: r.employee_id,
                range: TimeRange::new(r.start_at, r.end_at)
                    .map_err(|e| ApiError::Internal(format!("corrupt appointment range: {e}")))?,
            })
        })
        .collect()
}

fn day_range(date: NaiveDate) -> TimeRange {
    let start = date.and_hms_opt(0, 0, 0).unwrap().and_utc();
    TimeRange { start, end: start + Duration::days(1) }
}

fn load_for_day(employee: &EmployeeRow, day_blocking: &[BookedSlot]) -> EmployeeLoad {
    EmployeeLoad {
        employee_id: employee.employee_id,
        employee_display_number: employee.employee_display_number,
        booked_min: day_blocking.iter().map(|b| b.range.duration_min()).sum(),
        appointment_count: day_blocking.len() as i64,
    }
}

/// Can this employee take a concrete window: inside working hours, no
/// time off, no blocking appointment.
pub(crate) async fn is_employee_free(
    state: &AppState,
    employee_id: Uuid,
    candidate: &TimeRange,
    exclude_appointment: Option<Uuid>,
) -> Result<bool, ApiError> {
    let hours = load_weekly_hours(state, employee_id).await?;
    let windows = windows_for_date(candidate.start.date_naive(), &hours);
    if !windows.iter().any(|w| w.contains(candidate)) {
        return Ok(false);
    }

    let time_off = load_time_off(state, employee_id, candidate).await?;
    if time_off.iter().any(|t| t.overlaps(candidate)) {
        return Ok(false);
    }

    let blocking = load_blocking_slots(state, employee_id, candidate, exclude_appointment).await?;
    Ok(find_conflicts(candidate, &blocking).is_empty())
}

/* ============================================================
   GET /availability
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    // YYYY-MM-DD (UTC day; local presentation belongs to the frontend)
    pub date: String,
    pub service_id: Uuid,
    pub employee_id: Option<Uuid>,
    /// Comma-separated addon UUIDs.
    pub addon_ids: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct SlotDto {
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct EmployeeAvailabilityDto {
    pub employee_id: Uuid,
    pub display: String,
    pub employee_display_number: i64,
    pub booked_min: i64,
    pub appointment_count: i64,
    /// True on the workload-lightest employee that still has a free slot.
    pub recommended: bool,
    pub slots: Vec<SlotDto>,
}

fn parse_addon_ids(raw: Option<&str>) -> Result<Vec<Uuid>, ApiError> {
    let Some(raw) = raw else { return Ok(vec![]) };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Uuid::parse_str(s).map_err(|_| {
                ApiError::BadRequest("VALIDATION_ERROR", format!("invalid addon id: {s}"))
            })
        })
        .collect()
}

pub async fn get_availability(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<AvailabilityQuery>,
) -> Result<Json<ApiOk<Vec<EmployeeAvailabilityDto>>>, ApiError> {
    let date = NaiveDate::parse_from_str(q.date.trim(), "%Y-%m-%d").map_err(|_| {
        ApiError::BadRequest("VALIDATION_ERROR", "date must be YYYY-MM-DD".into())
    })?;
    let addon_ids = parse_addon_ids(q.addon_ids.as_deref())?;
    let duration_min = resolve_booking_minutes(&state, q.service_id, &addon_ids).await?;

    let employees = match q.employee_id {
        Some(employee_id) => {
            let all = load_qualified_employees(&state, q.service_id).await?;
            let Some(one) = all.into_iter().find(|e| e.employee_id == employee_id) else {
                return Err(ApiError::BadRequest(
                    "EMPLOYEE_NOT_QUALIFIED",
                    "employee does not perform this service".into(),
                ));
            };
            vec![one]
        }
        None => load_qualified_employees(&state, q.service_id).await?,
    };

    let day = day_range(date);
    let earliest_start = Utc::now() + Duration::minutes(state.min_lead_min);
    let slot_query = SlotQuery {
        duration_min,
        granularity_min: state.slot_granularity_min,
        earliest_start: Some(earliest_start),
    };

    // slots + day load per employee, then rank by workload
    let mut per_employee: Vec<(EmployeeLoad, EmployeeAvailabilityDto)> = Vec::new();
    for employee in &employees {
        let hours = load_weekly_hours(&state, employee.employee_id).await?;
        let windows = windows_for_date(date, &hours);
        let time_off = load_time_off(&state, employee.employee_id, &day).await?;
        let blocking = load_blocking_slots(&state, employee.employee_id, &day, None).await?;
        let booked_ranges: Vec<TimeRange> = blocking.iter().map(|b| b.range).collect();

        let slots = day_slots(&slot_query, &windows, &time_off, &booked_ranges)
            .map_err(|e| ApiError::BadRequest("VALIDATION_ERROR", e.to_string()))?;

        let load = load_for_day(employee, &blocking);
        per_employee.push((
            load,
            EmployeeAvailabilityDto {
                employee_id: employee.employee_id,
                display: format!("{} {}", employee.first_name, employee.last_name),
                employee_display_number: employee.employee_display_number,
                booked_min: load.booked_min,
                appointment_count: load.appointment_count,
                recommended: false,
                slots: slots
                    .iter()
                    .map(|s| SlotDto { start_at: s.start, end_at: s.end })
                    .collect(),
            },
        ));
    }

    let ranking = sorted_by_load(per_employee.iter().map(|(l, _)| *l).collect());
    let mut dtos: Vec<EmployeeAvailabilityDto> = ranking
        .iter()
        .filter_map(|l| {
            per_employee
                .iter()
                .position(|(pl, _)| pl.employee_id == l.employee_id)
                .map(|i| per_employee.swap_remove(i).1)
        })
        .collect();

    if let Some(first_free) = dtos.iter_mut().find(|d| !d.slots.is_empty()) {
        first_free.recommended = true;
    }

    Ok(Json(ApiOk { data: dtos }))
}

/* ============================================================
   GET /availability/recommend
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct RecommendQuery {
    pub service_id: Uuid,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RecommendationDto {
    pub employee_id: Uuid,
    pub display: String,
    pub employee_display_number: i64,
    pub booked_min: i64,
    pub appointment_count: i64,
}

/// Workload recommendation for one concrete window. Used by the desk when
/// the customer has no stylist preference.
pub async fn get_recommendation(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<RecommendQuery>,
) -> Result<Json<ApiOk<RecommendationDto>>, ApiError> {
    let candidate = TimeRange::new(q.start_at, q.end_at)
        .map_err(|e| ApiError::BadRequest("VALIDATION_ERROR", e.to_string()))?;

    match recommend_for_window(&state, q.service_id, &candidate, None).await? {
        Some(dto) => Ok(Json(ApiOk { data: dto })),
        None => Err(ApiError::Conflict(
            "NO_EMPLOYEE_AVAILABLE",
            "no qualified employee is free for this window".into(),
        )),
    }
}

/// Conflict-filter the qualified employees, then pick the lightest day
/// load (ties: fewer appointments, then lowest display number).
pub(crate) async fn recommend_for_window(
    state: &AppState,
    service_id: Uuid,
    candidate: &TimeRange,
    exclude_appointment: Option<Uuid>,
) -> Result<Option<RecommendationDto>, ApiError> {
    let employees = load_qualified_employees(state, service_id).await?;
    let day = day_range(candidate.start.date_naive());

    let mut free: Vec<(EmployeeLoad, &EmployeeRow)> = Vec::new();
    for employee in &employees {
        if !is_employee_free(state, employee.employee_id, candidate, exclude_appointment).await? {
            continue;
        }
        let day_blocking =
            load_blocking_slots(state, employee.employee_id, &day, exclude_appointment).await?;
        free.push((load_for_day(employee, &day_blocking), employee));
    }

    let ranked = sorted_by_load(free.iter().map(|(l, _)| *l).collect());
    let Some(best) = ranked.first() else {
        return Ok(None);
    };
    let (load, employee) = free
        .iter()
        .find(|(l, _)| l.employee_id == best.employee_id)
        .expect("ranked employee came from the free list");

    Ok(Some(RecommendationDto {
        employee_id: employee.employee_id,
        display: format!("{} {}", employee.first_name, employee.last_name),
        employee_display_number: employee.employee_display_number,
        booked_min: load.booked_min,
        appointment_count: load.appointment_count,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_addon_ids() {
        assert_eq!(parse_addon_ids(None).unwrap(), Vec::<Uuid>::new());
        assert_eq!(parse_addon_ids(Some("")).unwrap(), Vec::<Uuid>::new());

        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let raw = format!("{a}, {b},");
        assert_eq!(parse_addon_ids(Some(&raw)).unwrap(), vec![a, b]);

        assert!(parse_addon_ids(Some("not-a-uuid")).is_err());
    }
}
