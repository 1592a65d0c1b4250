// src/routes/service_routes.rs

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AddonCatalogRow, AppState, ServiceCatalogRow},
};

fn ensure_admin_or_manager(auth: &AuthContext) -> Result<(), ApiError> {
    // roles: 1 admin, 2 manager
    if auth.role == 1 || auth.role == 2 {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only admin/manager can edit the service catalog".into(),
        ))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_services).post(create_service))
        .route("/{service_id}", get(get_service).patch(patch_service))
        .route("/{service_id}/addons", get(list_addons).post(create_addon))
}

pub async fn list_services(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<Vec<ServiceCatalogRow>>, ApiError> {
    let rows: Vec<ServiceCatalogRow> = sqlx::query_as::<_, ServiceCatalogRow>(
        r#"
        SELECT
          service_id,
          display_number,
          display_name,
          duration_min,
          buffer_min,
          price_cents,
          is_active,
          created_at,
          updated_at
        FROM service_catalog
        WHERE is_active = true
        ORDER BY display_number ASC, display_name ASC
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

pub async fn get_service(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(service_id): Path<Uuid>,
) -> Result<Json<ServiceCatalogRow>, ApiError> {
    let row: Option<ServiceCatalogRow> = sqlx::query_as::<_, ServiceCatalogRow>(
        r#"
        SELECT
          service_id, display_number, display_name, duration_min, buffer_min,
          price_cents, is_active, created_at, updated_at
        FROM service_catalog
        WHERE service_id = $1
        "#,
    )
    .bind(service_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    row.map(Json)
        .ok_or_else(|| ApiError::not_found("service"))
}

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub display_number: i32,
    pub display_name: String,
    pub duration_min: i32,
    pub buffer_min: Option<i32>,
    pub price_cents: i32,
}

fn validate_service_fields(
    display_name: &str,
    duration_min: i32,
    buffer_min: i32,
    price_cents: i32,
) -> Result<(), ApiError> {
    if display_name.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "display_name is required".into(),
        ));
    }
    if duration_min <= 0 || duration_min > 8 * 60 {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "duration_min must be between 1 and 480".into(),
        ));
    }
    if !(0..=120).contains(&buffer_min) {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "buffer_min must be between 0 and 120".into(),
        ));
    }
    if price_cents < 0 {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "price_cents must not be negative".into(),
        ));
    }
    Ok(())
}

pub async fn create_service(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateServiceRequest>,
) -> Result<Json<ServiceCatalogRow>, ApiError> {
    ensure_admin_or_manager(&auth)?;

    let buffer_min = req.buffer_min.unwrap_or(0);
    validate_service_fields(&req.display_name, req.duration_min, buffer_min, req.price_cents)?;

    let row: ServiceCatalogRow = sqlx::query_as::<_, ServiceCatalogRow>(
        r#"
        INSERT INTO service_catalog
          (display_number, display_name, duration_min, buffer_min, price_cents, is_active)
        VALUES ($1, $2, $3, $4, $5, true)
        RETURNING service_id, display_number, display_name, duration_min, buffer_min,
                  price_cents, is_active, created_at, updated_at
        "#,
    )
    .bind(req.display_number)
    .bind(req.display_name.trim())
    .bind(req.duration_min)
    .bind(buffer_min)
    .bind(req.price_cents)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::BadRequest("SERVICE_CREATE_FAILED", format!("{e}")))?;

    Ok(Json(row))
}

#[derive(Debug, Deserialize)]
pub struct PatchServiceRequest {
    pub display_number: Option<i32>,
    pub display_name: Option<String>,
    pub duration_min: Option<i32>,
    pub buffer_min: Option<i32>,
    pub price_cents: Option<i32>,
    pub is_active: Option<bool>,
}

pub async fn patch_service(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(service_id): Path<Uuid>,
    Json(req): Json<PatchServiceRequest>,
) -> Result<Json<ServiceCatalogRow>, ApiError> {
    ensure_admin_or_manager(&auth)?;

    if let Some(name) = req.display_name.as_deref() {
        if name.trim().is_empty() {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "display_name must not be empty".into(),
            ));
        }
    }
    if let Some(d) = req.duration_min {
        if d <= 0 || d > 8 * 60 {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "duration_min must be between 1 and 480".into(),
            ));
        }
    }
    if let Some(b) = req.buffer_min {
        if !(0..=120).contains(&b) {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "buffer_min must be between 0 and 120".into(),
            ));
        }
    }

    let row: Option<ServiceCatalogRow> = sqlx::query_as::<_, ServiceCatalogRow>(
        r#"
        UPDATE service_catalog
        SET
          display_number = COALESCE($2, display_number),
          display_name   = COALESCE($3, display_name),
          duration_min   = COALESCE($4, duration_min),
          buffer_min     = COALESCE($5, buffer_min),
          price_cents    = COALESCE($6, price_cents),
          is_active      = COALESCE($7, is_active),
          updated_at     = now()
        WHERE service_id = $1
        RETURNING service_id, display_number, display_name, duration_min, buffer_min,
                  price_cents, is_active, created_at, updated_at
        "#,
    )
    .bind(service_id)
    .bind(req.display_number)
    .bind(req.display_name.as_deref().map(str::trim))
    .bind(req.duration_min)
    .bind(req.buffer_min)
    .bind(req.price_cents)
    .bind(req.is_active)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::BadRequest("SERVICE_UPDATE_FAILED", format!("{e}")))?;

    row.map(Json)
        .ok_or_else(|| ApiError::not_found("service"))
}

pub async fn list_addons(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(service_id): Path<Uuid>,
) -> Result<Json<Vec<AddonCatalogRow>>, ApiError> {
    let rows: Vec<AddonCatalogRow> = sqlx::query_as::<_, AddonCatalogRow>(
        r#"
        SELECT addon_id, service_id, display_name, extra_min, price_cents, is_active
        FROM addon_catalog
        WHERE service_id = $1 AND is_active = true
        ORDER BY display_name ASC
        "#,
    )
    .bind(service_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct CreateAddonRequest {
    pub display_name: String,
    pub extra_min: i32,
    pub price_cents: i32,
}

pub async fn create_addon(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(service_id): Path<Uuid>,
    Json(req): Json<CreateAddonRequest>,
) -> Result<Json<AddonCatalogRow>, ApiError> {
    ensure_admin_or_manager(&auth)?;

    if req.display_name.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "display_name is required".into(),
        ));
    }
    if !(0..=240).contains(&req.extra_min) {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "extra_min must be between 0 and 240".into(),
        ));
    }
    if req.price_cents < 0 {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "price_cents must not be negative".into(),
        ));
    }

    let row: AddonCatalogRow = sqlx::query_as::<_, AddonCatalogRow>(
        r#"
        INSERT INTO addon_catalog (service_id, display_name, extra_min, price_cents, is_active)
        VALUES ($1, $2, $3, $4, true)
        RETURNING addon_id, service_id, display_name, extra_min, price_cents, is_active
        "#,
    )
    .bind(service_id)
    .bind(req.display_name.trim())
    .bind(req.extra_min)
    .bind(req.price_cents)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::BadRequest("ADDON_CREATE_FAILED", format!("{e}")))?;

    Ok(Json(row))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_service_fields() {
        assert!(validate_service_fields("Cut & Finish", 45, 10, 4500).is_ok());
        assert!(validate_service_fields("", 45, 10, 4500).is_err());
        assert!(validate_service_fields("Cut", 0, 10, 4500).is_err());
        assert!(validate_service_fields("Cut", 481, 10, 4500).is_err());
        assert!(validate_service_fields("Cut", 45, -1, 4500).is_err());
        assert!(validate_service_fields("Cut", 45, 121, 4500).is_err());
        assert!(validate_service_fields("Cut", 45, 10, -1).is_err());
    }
}
