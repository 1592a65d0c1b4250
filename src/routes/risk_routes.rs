// src/routes/risk_routes.rs
//
// Customer risk profile endpoints. The score itself lives in crate::risk;
// this file loads the appointment-history facts and applies the stored
// override, if any.

use axum::{
    extract::{Path, State},
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::AppState,
    risk::{self, RiskAssessment, RiskFacts, RiskTier},
};

fn ensure_staff(auth: &AuthContext) -> Result<(), ApiError> {
    if (1..=4).contains(&auth.role) {
        Ok(())
    } else {
        Err(ApiError::Forbidden("FORBIDDEN", "Staff only".into()))
    }
}

fn ensure_admin_or_manager(auth: &AuthContext) -> Result<(), ApiError> {
    if auth.role == 1 || auth.role == 2 {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only admin/manager can override risk tiers".into(),
        ))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/customers/{customer_id}/risk", get(get_risk))
        .route(
            "/customers/{customer_id}/risk/override",
            put(put_override).delete(delete_override),
        )
}

/// Facts come straight from appointment history; nothing is cached.
/// Late cancellations were classified at cancel time (cancel_was_late).
pub(crate) async fn load_risk_facts(
    state: &AppState,
    customer_id: Uuid,
) -> Result<RiskFacts, ApiError> {
    #[derive(sqlx::FromRow)]
    struct FactsRow {
        completed: i64,
        no_shows: i64,
        late_cancels: i64,
        cancels: i64,
        days_since_last_incident: Option<i64>,
        account_age_days: Option<i64>,
    }

    let row: FactsRow = sqlx::query_as::<_, FactsRow>(
        r#"
        SELECT
          COUNT(*) FILTER (WHERE a.status = 4)                         AS completed,
          COUNT(*) FILTER (WHERE a.status = 6)                         AS no_shows,
          COUNT(*) FILTER (WHERE a.status = 5 AND a.cancel_was_late)   AS late_cancels,
          COUNT(*) FILTER (WHERE a.status = 5)                         AS cancels,
          (EXTRACT(EPOCH FROM now() - MAX(
              CASE
                WHEN a.status = 6 THEN a.start_at
                WHEN a.status = 5 AND a.cancel_was_late THEN a.cancelled_at
              END
          )) / 86400)::bigint                                          AS days_since_last_incident,
          (SELECT (EXTRACT(EPOCH FROM now() - c.created_at) / 86400)::bigint
           FROM customer c WHERE c.customer_id = $1)                   AS account_age_days
        FROM appointment a
        WHERE a.customer_id = $1
        "#,
    )
    .bind(customer_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if row.account_age_days.is_none() {
        return Err(ApiError::not_found("customer"));
    }

    Ok(RiskFacts {
        completed: row.completed,
        no_shows: row.no_shows,
        late_cancels: row.late_cancels,
        cancels: row.cancels,
        days_since_last_incident: row.days_since_last_incident,
        account_age_days: row.account_age_days.unwrap_or(0),
    })
}

#[derive(Debug, Serialize)]
pub struct RiskResponse {
    pub data: RiskData,
}

#[derive(Debug, Serialize)]
pub struct RiskData {
    pub customer_id: Uuid,
    pub facts: RiskFacts,
    pub assessment: RiskAssessment,
    /// Computed tier before any override, for the audit trail.
    pub computed_tier: RiskTier,
    pub override_tier: Option<RiskTier>,
}

pub async fn get_risk(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<RiskResponse>, ApiError> {
    ensure_staff(&auth)?;

    let facts = load_risk_facts(&state, customer_id).await?;
    let mut assessment = risk::assess(&facts);
    let computed_tier = assessment.tier;

    let stored: Option<i16> = sqlx::query_scalar(
        r#"
        SELECT risk_override FROM customer WHERE customer_id = $1
        "#,
    )
    .bind(customer_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .flatten();

    let override_tier = stored.and_then(RiskTier::from_i16);
    if let Some(tier) = override_tier {
        assessment.tier = tier;
        assessment.mitigations = risk::mitigations_for(tier);
    }

    Ok(Json(RiskResponse {
        data: RiskData {
            customer_id,
            facts,
            assessment,
            computed_tier,
            override_tier,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct PutOverrideRequest {
    /// 0 low, 1 moderate, 2 high, 3 critical
    pub tier: i16,
}

pub async fn put_override(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(customer_id): Path<Uuid>,
    Json(req): Json<PutOverrideRequest>,
) -> Result<Json<RiskResponse>, ApiError> {
    ensure_admin_or_manager(&auth)?;

    let Some(tier) = RiskTier::from_i16(req.tier) else {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "tier must be 0..3".into(),
        ));
    };

    let res = sqlx::query(
        r#"
        UPDATE customer
        SET risk_override = $2
        WHERE customer_id = $1
        "#,
    )
    .bind(customer_id)
    .bind(tier.as_i16())
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("customer"));
    }

    tracing::info!(%customer_id, tier = tier.as_str(), "risk override set");
    get_risk(State(state), auth, Path(customer_id)).await
}

pub async fn delete_override(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<RiskResponse>, ApiError> {
    ensure_admin_or_manager(&auth)?;

    let res = sqlx::query(
        r#"
        UPDATE customer
        SET risk_override = NULL
        WHERE customer_id = $1
        "#,
    )
    .bind(customer_id)
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("customer"));
    }

    get_risk(State(state), auth, Path(customer_id)).await
}
