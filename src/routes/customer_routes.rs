// src/routes/customer_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::AppState,
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct CustomerRow {
    pub customer_id: Uuid,
    pub user_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: i16,
    pub risk_override: Option<i16>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

const CUSTOMER_SELECT: &str = r#"
    SELECT customer_id, user_id, first_name, last_name, email, phone,
           status, risk_override, created_at
    FROM customer
"#;

fn ensure_staff(auth: &AuthContext) -> Result<(), ApiError> {
    // roles: 1 admin, 2 manager, 3 stylist, 4 receptionist
    if (1..=4).contains(&auth.role) {
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
        .route("/customers", post(create_customer).get(search_customers))
        .route("/customers/{customer_id}", get(get_customer).patch(update_customer))
        .route("/customers/{customer_id}/archive", post(archive_customer))
        .route("/customers/{customer_id}/restore", post(restore_customer))
}

#[derive(Debug, Deserialize)]
pub struct CreateCustomerRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub user_id: Option<Uuid>,
}

pub async fn create_customer(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateCustomerRequest>,
) -> Result<Json<CustomerRow>, ApiError> {
    ensure_staff(&auth)?;

    let first_name = req.first_name.trim();
    let last_name = req.last_name.trim();

    if first_name.is_empty() || last_name.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "first_name and last_name are required".to_string(),
        ));
    }

    let row: CustomerRow = sqlx::query_as::<_, CustomerRow>(
        r#"
        INSERT INTO customer (user_id, first_name, last_name, email, phone, status)
        VALUES ($1, $2, $3, $4, $5, 0)
        RETURNING customer_id, user_id, first_name, last_name, email, phone,
                  status, risk_override, created_at
        "#,
    )
    .bind(req.user_id)
    .bind(first_name)
    .bind(last_name)
    .bind(req.email.as_deref().map(str::trim))
    .bind(req.phone.as_deref().map(str::trim))
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::BadRequest("CUSTOMER_CREATE_FAILED", format!("{e}")))?;

    Ok(Json(row))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn search_customers(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<SearchQuery>,
) -> Result<Json<Vec<CustomerRow>>, ApiError> {
    ensure_staff(&auth)?;

    let limit = q.limit.unwrap_or(50).clamp(1, 200);
    let offset = q.offset.unwrap_or(0).max(0);
    let needle = q.q.as_deref().unwrap_or("").trim().to_string();
    let pattern = format!("%{needle}%");

    let rows: Vec<CustomerRow> = sqlx::query_as::<_, CustomerRow>(&format!(
        r#"
        {CUSTOMER_SELECT}
        WHERE ($1 = '%%'
               OR first_name ILIKE $1
               OR last_name ILIKE $1
               OR email ILIKE $1
               OR phone ILIKE $1)
        ORDER BY last_name ASC, first_name ASC
        LIMIT $2 OFFSET $3
        "#
    ))
    .bind(&pattern)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

pub async fn get_customer(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<CustomerRow>, ApiError> {
    ensure_staff(&auth)?;

    let row: Option<CustomerRow> =
        sqlx::query_as::<_, CustomerRow>(&format!("{CUSTOMER_SELECT} WHERE customer_id = $1"))
            .bind(customer_id)
            .fetch_optional(&state.db)
            .await
            .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    row.map(Json)
        .ok_or_else(|| ApiError::not_found("customer"))
}

#[derive(Debug, Deserialize)]
pub struct UpdateCustomerRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<Option<String>>,
    pub phone: Option<Option<String>>,
}

pub async fn update_customer(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(customer_id): Path<Uuid>,
    Json(req): Json<UpdateCustomerRequest>,
) -> Result<Json<CustomerRow>, ApiError> {
    ensure_staff(&auth)?;

    if let Some(name) = req.first_name.as_deref() {
        if name.trim().is_empty() {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "first_name must not be empty".into(),
            ));
        }
    }
    if let Some(name) = req.last_name.as_deref() {
        if name.trim().is_empty() {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "last_name must not be empty".into(),
            ));
        }
    }

    let row: Option<CustomerRow> = sqlx::query_as::<_, CustomerRow>(
        r#"
        UPDATE customer
        SET
          first_name = COALESCE($2, first_name),
          last_name  = COALESCE($3, last_name),
          email      = COALESCE($4, email),
          phone      = COALESCE($5, phone)
        WHERE customer_id = $1
        RETURNING customer_id, user_id, first_name, last_name, email, phone,
                  status, risk_override, created_at
        "#,
    )
    .bind(customer_id)
    .bind(req.first_name.as_deref().map(str::trim))
    .bind(req.last_name.as_deref().map(str::trim))
    .bind(req.email.unwrap_or(None))
    .bind(req.phone.unwrap_or(None))
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::BadRequest("CUSTOMER_UPDATE_FAILED", format!("{e}")))?;

    row.map(Json)
        .ok_or_else(|| ApiError::not_found("customer"))
}

async fn set_customer_status(
    state: &AppState,
    customer_id: Uuid,
    status: i16,
) -> Result<Json<CustomerRow>, ApiError> {
    let row: Option<CustomerRow> = sqlx::query_as::<_, CustomerRow>(
        r#"
        UPDATE customer
        SET status = $2
        WHERE customer_id = $1
        RETURNING customer_id, user_id, first_name, last_name, email, phone,
                  status, risk_override, created_at
        "#,
    )
    .bind(customer_id)
    .bind(status)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    row.map(Json)
        .ok_or_else(|| ApiError::not_found("customer"))
}

// customer.status: 0 active, 1 archived

pub async fn archive_customer(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<CustomerRow>, ApiError> {
    ensure_staff(&auth)?;
    set_customer_status(&state, customer_id, 1).await
}

pub async fn restore_customer(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<CustomerRow>, ApiError> {
    ensure_staff(&auth)?;
    set_customer_status(&state, customer_id, 0).await
}
