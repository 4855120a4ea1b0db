use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use utoipa::OpenApi;

use super::dto::{
    AlarmEventDto, AlarmRuleDto, AlarmStatusDto, CreateAlarmRuleRequest, LatestReadingDto,
};
use super::errors::AppError;
use super::AppState;
use crate::db::models::{AccountId, Direction, Metric, RuleId, Sensor, SensorId};
use crate::display::LevelTier;
use crate::store::RuleStore;

#[derive(Debug, Deserialize)]
pub struct AccountParams {
    pub account_id: AccountId,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        get_sensors,
        get_latest_readings,
        get_alarm_rules,
        create_alarm_rule,
        delete_alarm_rule,
        get_alarm_status,
        get_alarm_events,
    ),
    components(schemas(
        Sensor,
        LatestReadingDto,
        AlarmRuleDto,
        CreateAlarmRuleRequest,
        AlarmStatusDto,
        AlarmEventDto,
        LevelTier,
        Metric,
        Direction,
    )),
    tags(
        (name = "sensors", description = "Sensors and their latest readings"),
        (name = "alarms", description = "Alarm rules, status and notifications"),
    )
)]
pub struct ApiDoc;

pub async fn health() -> &'static str {
    "OK"
}

/// All sensors belonging to an account.
#[utoipa::path(
    get,
    path = "/sensors",
    params(
        ("account_id" = AccountId, Query, description = "Owning account"),
    ),
    responses(
        (status = 200, description = "Sensors for the account", body = Vec<Sensor>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "sensors"
)]
pub async fn get_sensors(
    State(state): State<AppState>,
    Query(params): Query<AccountParams>,
) -> Result<Json<Vec<Sensor>>, AppError> {
    let sensors: Vec<Sensor> =
        sqlx::query_as("SELECT id, account_id, name FROM sensors WHERE account_id = $1 ORDER BY id")
            .bind(params.account_id)
            .fetch_all(&state.pool)
            .await?;
    Ok(Json(sensors))
}

/// Latest reliable reading per sensor of an account, with derived
/// battery/signal values. Sensors without a reliable reading yet are absent.
#[utoipa::path(
    get,
    path = "/sensors/latest",
    params(
        ("account_id" = AccountId, Query, description = "Owning account"),
    ),
    responses(
        (status = 200, description = "Latest reading per sensor", body = Vec<LatestReadingDto>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "sensors"
)]
pub async fn get_latest_readings(
    State(state): State<AppState>,
    Query(params): Query<AccountParams>,
) -> Result<Json<Vec<LatestReadingDto>>, AppError> {
    let sensor_ids: Vec<SensorId> =
        sqlx::query_scalar("SELECT id FROM sensors WHERE account_id = $1")
            .bind(params.account_id)
            .fetch_all(&state.pool)
            .await?;

    let readings: Vec<LatestReadingDto> = state
        .latest
        .all()
        .await
        .into_iter()
        .filter(|m| sensor_ids.contains(&m.sensor_id))
        .map(LatestReadingDto::try_from)
        .collect::<Result<_, _>>()?;
    Ok(Json(readings))
}

/// Alarm rules configured for an account.
#[utoipa::path(
    get,
    path = "/alarms",
    params(
        ("account_id" = AccountId, Query, description = "Owning account"),
    ),
    responses(
        (status = 200, description = "Alarm rules for the account", body = Vec<AlarmRuleDto>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "alarms"
)]
pub async fn get_alarm_rules(
    State(state): State<AppState>,
    Query(params): Query<AccountParams>,
) -> Result<Json<Vec<AlarmRuleDto>>, AppError> {
    let rules = state
        .rules
        .list_rules(params.account_id)
        .await
        .map_err(AppError::from_store)?;
    Ok(Json(rules.into_iter().map(Into::into).collect()))
}

/// Create an alarm rule. Malformed rules (e.g. a non-finite threshold) are
/// rejected with 400 and never reach the evaluator.
#[utoipa::path(
    post,
    path = "/alarms",
    request_body = CreateAlarmRuleRequest,
    responses(
        (status = 201, description = "Rule created", body = AlarmRuleDto),
        (status = 400, description = "Invalid rule"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "alarms"
)]
pub async fn create_alarm_rule(
    State(state): State<AppState>,
    Json(request): Json<CreateAlarmRuleRequest>,
) -> Result<(StatusCode, Json<AlarmRuleDto>), AppError> {
    let rule = state
        .rules
        .create_rule(request.into())
        .await
        .map_err(AppError::from_store)?;
    Ok((StatusCode::CREATED, Json(rule.into())))
}

/// Delete an alarm rule. The rule's evaluation state is dropped on the next
/// cycle; no final notification is emitted.
#[utoipa::path(
    delete,
    path = "/alarms/{rule_id}",
    params(
        ("rule_id" = RuleId, Path, description = "Rule to delete"),
        ("account_id" = AccountId, Query, description = "Owning account"),
    ),
    responses(
        (status = 204, description = "Rule deleted"),
        (status = 404, description = "No such rule for this account"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "alarms"
)]
pub async fn delete_alarm_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<RuleId>,
    Query(params): Query<AccountParams>,
) -> Result<StatusCode, AppError> {
    let deleted = state
        .rules
        .delete_rule(params.account_id, rule_id)
        .await
        .map_err(AppError::from_store)?;
    if !deleted {
        return Err(AppError::NotFound(format!(
            "no alarm rule {rule_id} for account {}",
            params.account_id
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Current status of every evaluated (rule, sensor) pair.
#[utoipa::path(
    get,
    path = "/alarms/status",
    responses(
        (status = 200, description = "Alarm status per (rule, sensor) pair", body = Vec<AlarmStatusDto>),
    ),
    tag = "alarms"
)]
pub async fn get_alarm_status(State(state): State<AppState>) -> Json<Vec<AlarmStatusDto>> {
    let statuses = state.alarms.all().await;
    Json(statuses.into_iter().map(Into::into).collect())
}

/// Most recent alarm notifications for an account, newest first.
#[utoipa::path(
    get,
    path = "/alarms/events",
    params(
        ("account_id" = AccountId, Query, description = "Owning account"),
    ),
    responses(
        (status = 200, description = "Recent alarm notifications", body = Vec<AlarmEventDto>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "alarms"
)]
pub async fn get_alarm_events(
    State(state): State<AppState>,
    Query(params): Query<AccountParams>,
) -> Result<Json<Vec<AlarmEventDto>>, AppError> {
    let events: Vec<AlarmEventDto> = sqlx::query_as(
        r#"
        SELECT id, account_id, rule_id, sensor_id, kind, occurred_at
        FROM alarm_events
        WHERE account_id = $1
        ORDER BY occurred_at DESC
        LIMIT 100
        "#,
    )
    .bind(params.account_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(events))
}
