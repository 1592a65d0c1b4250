use crate::models::AppState;
use axum::Router;

pub mod appointment_routes;
pub mod auth_routes;
pub mod availability_routes;
pub mod customer_routes;
pub mod employee_routes;
pub mod risk_routes;
pub mod salon_routes;
pub mod service_routes;
pub mod waitlist_routes;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/auth", auth_routes::router())
        .nest("/api/v1/services", service_routes::router())
        .nest("/api/v1/staff", employee_routes::router())
        .nest("/api/v1", salon_routes::router())
        .nest("/api/v1", customer_routes::router())
        .nest("/api/v1", availability_routes::router())
        .nest("/api/v1", appointment_routes::router())
        .nest("/api/v1", waitlist_routes::router())
        .nest("/api/v1", risk_routes::router())
        .with_state(state)
}
