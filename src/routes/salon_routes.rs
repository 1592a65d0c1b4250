// src/routes/salon_routes.rs

use axum::{
    extract::State,
    routing::{get, patch},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/salon", get(get_salon))
        .route("/salon", patch(update_salon))
}

#[derive(Debug, Serialize)]
pub struct SalonResponse {
    pub data: SalonData,
}

#[derive(Debug, Serialize)]
pub struct SalonData {
    pub salon_name: String,
    /// Cancellations inside this many hours before start_at count as late.
    pub late_cancel_hours: i32,
}

#[derive(Debug, sqlx::FromRow)]
struct SalonSettingsRow {
    salon_name: String,
    late_cancel_hours: i32,
}

pub async fn get_salon(
    State(state): State<AppState>,
    _auth: AuthContext, // require login for now (consistent + simplest)
) -> Result<Json<SalonResponse>, ApiError> {
    let row: Option<SalonSettingsRow> = sqlx::query_as::<_, SalonSettingsRow>(
        r#"
        SELECT salon_name, late_cancel_hours
        FROM salon_settings
        WHERE singleton_id = TRUE
        "#,
    )
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let (salon_name, late_cancel_hours) = match row {
        Some(r) => (r.salon_name, r.late_cancel_hours),
        None => ("Salon".to_string(), 24),
    };

    Ok(Json(SalonResponse {
        data: SalonData {
            salon_name,
            late_cancel_hours,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSalonRequest {
    pub salon_name: Option<String>,
    pub late_cancel_hours: Option<i32>,
}

fn ensure_admin_or_manager(auth: &AuthContext) -> Result<(), ApiError> {
    // roles: 1 admin, 2 manager
    if auth.role == 1 || auth.role == 2 {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only admin/manager can update salon settings".into(),
        ))
    }
}

pub async fn update_salon(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<UpdateSalonRequest>,
) -> Result<Json<SalonResponse>, ApiError> {
    ensure_admin_or_manager(&auth)?;

    let name = req.salon_name.as_deref().map(str::trim);
    if let Some(name) = name {
        if name.is_empty() {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "salon_name must not be empty".into(),
            ));
        }
        if name.len() > 128 {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "salon_name is too long (max 128)".into(),
            ));
        }
    }
    if let Some(h) = req.late_cancel_hours {
        if !(0..=24 * 7).contains(&h) {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "late_cancel_hours must be between 0 and 168".into(),
            ));
        }
    }

    // Upsert singleton row (safe even if missing)
    let row: SalonSettingsRow = sqlx::query_as::<_, SalonSettingsRow>(
        r#"
        INSERT INTO salon_settings (singleton_id, salon_name, late_cancel_hours)
        VALUES (TRUE, COALESCE($1, 'Salon'), COALESCE($2, 24))
        ON CONFLICT (singleton_id)
        DO UPDATE SET
          salon_name = COALESCE($1, salon_settings.salon_name),
          late_cancel_hours = COALESCE($2, salon_settings.late_cancel_hours)
        RETURNING salon_name, late_cancel_hours
        "#,
    )
    .bind(name)
    .bind(req.late_cancel_hours)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(SalonResponse {
        data: SalonData {
            salon_name: row.salon_name,
            late_cancel_hours: row.late_cancel_hours,
        },
    }))
}

/// Late-cancel window for cancellation classification; defaults to 24h
/// when the settings row has not been created yet.
pub async fn load_late_cancel_hours(state: &AppState) -> Result<i64, ApiError> {
    let hours: Option<i32> = sqlx::query_scalar(
        r#"
        SELECT late_cancel_hours
        FROM salon_settings
        WHERE singleton_id = TRUE
        "#,
    )
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(hours.unwrap_or(24) as i64)
}

pub async fn load_salon_name(state: &AppState) -> Result<String, ApiError> {
    let salon_name: Option<String> = sqlx::query_scalar(
        r#"
        SELECT salon_name
        FROM salon_settings
        WHERE singleton_id = TRUE
        "#,
    )
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(salon_name.unwrap_or_else(|| "Salon".to_string()))
}
