pub mod dto;
pub mod errors;
pub mod handlers;

use axum::{
    routing::{delete, get},
    Router,
};
use sqlx::PgPool;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use crate::alarm::AlarmStatusView;
use crate::latest::LatestReadings;
use crate::store::PgRuleStore;
use handlers::ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub rules: PgRuleStore,
    pub latest: LatestReadings,
    pub alarms: AlarmStatusView,
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/sensors", get(handlers::get_sensors))
        .route("/sensors/latest", get(handlers::get_latest_readings))
        .route(
            "/alarms",
            get(handlers::get_alarm_rules).post(handlers::create_alarm_rule),
        )
        .route("/alarms/{rule_id}", delete(handlers::delete_alarm_rule))
        .route("/alarms/status", get(handlers::get_alarm_status))
        .route("/alarms/events", get(handlers::get_alarm_events))
        .with_state(state)
        .split_for_parts();

    router
        .route("/health", get(handlers::health))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
}
