use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use chrono::{Duration, Utc};

use serde::Deserialize;

use crate::{
    auth::{generate_access_token, hash_access_token, verify_password, hash_password},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{role_to_string, *},
    routes::salon_routes::load_salon_name,
};

// session_token.session_type
const SESSION_TYPE_UNDEFINED: i16 = 0;
const SESSION_TYPE_STAFF_PORTAL: i16 = 1;
const SESSION_TYPE_CUSTOMER_WEB: i16 = 2;

const DEFAULT_CUSTOMER_TTL_HOURS: i64 = 24 * 3;

fn is_known_session_type(st: i16) -> bool {
    matches!(
        st,
        SESSION_TYPE_UNDEFINED | SESSION_TYPE_STAFF_PORTAL | SESSION_TYPE_CUSTOMER_WEB
    )
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        // Customer portal login (session_type=2, role must be customer)
        .route("/customer/login", post(customer_login))
        .route("/me", get(me))
        .route("/logout", post(logout))
        // Rotate access token for the current session (invalidates old token immediately)
        .route("/refresh", post(refresh))
        .route("/change_password", post(change_password))
}

async fn login_with_type(
    state: &AppState,
    req: &LoginRequest,
    session_type: i16,
    required_role: Option<i16>,
) -> Result<LoginResponse, ApiError> {
    let username = req.username.trim();
    if username.is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "username and password are required".into(),
        ));
    }
    if !is_known_session_type(session_type) {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            format!("unknown session_type: {session_type}"),
        ));
    }

    // 1) Load salon_user
    let salon_user: UserRow = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT user_id, username, display_name, password_hash, roles, is_active
        FROM salon_user
        WHERE username = $1
        "#,
    )
    .bind(username)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(ApiError::invalid_credentials)?;

    if !salon_user.is_active {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Account is disabled".into(),
        ));
    }

    if let Some(rr) = required_role {
        if salon_user.roles != rr {
            return Err(ApiError::Forbidden(
                "FORBIDDEN",
                "Account type not allowed for this login".into(),
            ));
        }
    }

    // 2) Verify password
    if !verify_password(&req.password, &salon_user.password_hash) {
        return Err(ApiError::invalid_credentials());
    }

    // 3) Load salon name (singleton)
    let salon_name = load_salon_name(state).await?;

    // 4) Create session_token
    let access_token = generate_access_token();
    let token_hash = hash_access_token(&access_token);

    let ttl_hours = if session_type == SESSION_TYPE_CUSTOMER_WEB {
        DEFAULT_CUSTOMER_TTL_HOURS
    } else if req.remember_me.unwrap_or(false) {
        24 * 7
    } else {
        state.session_ttl_hours
    };

    let expires_at = Utc::now() + Duration::hours(ttl_hours);

    let session: SessionTokenRow = sqlx::query_as::<_, SessionTokenRow>(
        r#"
        INSERT INTO session_token
            (user_id, session_token_hash, session_type, device_name, expires_at)
        VALUES
            ($1, $2, $3, $4, $5)
        RETURNING session_token_id, expires_at
        "#,
    )
    .bind(salon_user.user_id)
    .bind(&token_hash)
    .bind(session_type)
    .bind(req.device_name.as_deref())
    .bind(expires_at)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(LoginResponse {
        data: LoginResponseData {
            access_token,
            expires_at: session.expires_at,
            salon_user: UserProfile {
                user_id: salon_user.user_id,
                username: salon_user.username,
                display_name: salon_user.display_name,
                roles: vec![role_to_string(salon_user.roles)],
            },
            salon: SalonProfile { salon_name },
        },
    })
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let resp = login_with_type(&state, &req, SESSION_TYPE_STAFF_PORTAL, None).await?;
    Ok(Json(resp))
}

/// Customer portal login: same credential shape (username/password), but
/// enforces role=customer and uses session_type=2.
pub async fn customer_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let resp = login_with_type(&state, &req, SESSION_TYPE_CUSTOMER_WEB, Some(0)).await?;
    Ok(Json(resp))
}

pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<MeResponse>, ApiError> {
    let salon_user: UserRow = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT user_id, username, display_name, password_hash, roles, is_active
        FROM salon_user
        WHERE user_id = $1
        "#,
    )
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(ApiError::session_expired)?;

    let session: SessionTokenRow = sqlx::query_as::<_, SessionTokenRow>(
        r#"
        SELECT session_token_id, expires_at
        FROM session_token
        WHERE session_token_id = $1
        "#,
    )
    .bind(auth.session_token_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(ApiError::session_expired)?;

    let salon_name = load_salon_name(&state).await?;

    Ok(Json(MeResponse {
        data: MeResponseData {
            salon_user: UserProfile {
                user_id: salon_user.user_id,
                username: salon_user.username,
                display_name: salon_user.display_name,
                roles: vec![role_to_string(salon_user.roles)],
            },
            salon: SalonProfile { salon_name },
            session: SessionInfo {
                session_token_id: session.session_token_id,
                expires_at: session.expires_at,
            },
        },
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<OkResponse>, ApiError> {
    sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE session_token_id = $1
          AND revoked_at IS NULL
        "#,
    )
    .bind(auth.session_token_id)
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(OkResponse {
        data: OkData { ok: true },
    }))
}

/// Rotate the current session's token. The old token stops working the
/// moment the hash is replaced.
pub async fn refresh(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<LoginResponse>, ApiError> {
    let access_token = generate_access_token();
    let token_hash = hash_access_token(&access_token);

    let expires_at = Utc::now() + Duration::hours(state.session_ttl_hours);

    let session: SessionTokenRow = sqlx::query_as::<_, SessionTokenRow>(
        r#"
        UPDATE session_token
        SET session_token_hash = $2,
            expires_at = $3,
            last_seen_at = now()
        WHERE session_token_id = $1
          AND revoked_at IS NULL
        RETURNING session_token_id, expires_at
        "#,
    )
    .bind(auth.session_token_id)
    .bind(&token_hash)
    .bind(expires_at)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(ApiError::session_expired)?;

    let salon_user: UserRow = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT user_id, username, display_name, password_hash, roles, is_active
        FROM salon_user
        WHERE user_id = $1
        "#,
    )
    .bind(auth.user_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let salon_name = load_salon_name(&state).await?;

    Ok(Json(LoginResponse {
        data: LoginResponseData {
            access_token,
            expires_at: session.expires_at,
            salon_user: UserProfile {
                user_id: salon_user.user_id,
                username: salon_user.username,
                display_name: salon_user.display_name,
                roles: vec![role_to_string(salon_user.roles)],
            },
            salon: SalonProfile { salon_name },
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

fn validate_new_password(password: &str) -> Result<(), ApiError> {
    if password.len() < 8 {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "new_password must be at least 8 characters".into(),
        ));
    }
    Ok(())
}

pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    validate_new_password(&req.new_password)?;

    let salon_user: UserRow = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT user_id, username, display_name, password_hash, roles, is_active
        FROM salon_user
        WHERE user_id = $1
        "#,
    )
    .bind(auth.user_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if !verify_password(&req.current_password, &salon_user.password_hash) {
        return Err(ApiError::invalid_credentials());
    }

    let new_hash = hash_password(&req.new_password).map_err(ApiError::Internal)?;

    sqlx::query(
        r#"
        UPDATE salon_user
        SET password_hash = $2
        WHERE user_id = $1
        "#,
    )
    .bind(auth.user_id)
    .bind(&new_hash)
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    // All other sessions keep working; token rotation is the client's call.
    Ok(Json(OkResponse {
        data: OkData { ok: true },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_session_types() {
        assert!(is_known_session_type(SESSION_TYPE_UNDEFINED));
        assert!(is_known_session_type(SESSION_TYPE_STAFF_PORTAL));
        assert!(is_known_session_type(SESSION_TYPE_CUSTOMER_WEB));
        assert!(!is_known_session_type(3));
        assert!(!is_known_session_type(-1));
    }

    #[test]
    fn test_validate_new_password() {
        assert!(validate_new_password("longenough").is_ok());
        assert!(validate_new_password("short").is_err());
        assert!(validate_new_password("").is_err());
    }
}
