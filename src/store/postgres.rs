use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::info;

use super::{MeasurementStore, NotificationSink, RuleStore, StoreError};
use crate::alarm::AlarmEvent;
use crate::db::models::{
    AccountId, AlarmRule, Measurement, NewAlarmRule, RuleId, RuleValidationError, Sensor,
    SensorId, SensorScope,
};

/// Raw `alerts` row; converted to the domain type so the nullable
/// `sensor_id` sentinel and the textual enums stay at the storage boundary.
#[derive(Debug, FromRow)]
struct AlarmRuleRow {
    id: RuleId,
    account_id: AccountId,
    sensor_id: Option<SensorId>,
    metric: String,
    direction: String,
    threshold: f64,
    sustain_minutes: i32,
}

impl TryFrom<AlarmRuleRow> for AlarmRule {
    type Error = RuleValidationError;

    fn try_from(row: AlarmRuleRow) -> Result<Self, Self::Error> {
        let sustain_minutes = u32::try_from(row.sustain_minutes)
            .map_err(|_| RuleValidationError::NegativeSustain(row.sustain_minutes))?;
        Ok(AlarmRule {
            id: row.id,
            account_id: row.account_id,
            scope: SensorScope::from_stored(row.sensor_id),
            metric: row.metric.parse()?,
            direction: row.direction.parse()?,
            threshold: row.threshold,
            sustain_minutes,
        })
    }
}

#[derive(Clone)]
pub struct PgRuleStore {
    pool: PgPool,
}

impl PgRuleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Validates and persists a new rule. Malformed rules are rejected here
    /// so the evaluator only ever sees well-formed ones.
    pub async fn create_rule(&self, rule: NewAlarmRule) -> Result<AlarmRule, StoreError> {
        rule.validate()?;
        let sustain_minutes = i32::try_from(rule.sustain_minutes)
            .map_err(|_| RuleValidationError::ExcessiveSustain(rule.sustain_minutes))?;
        let row: AlarmRuleRow = sqlx::query_as(
            r#"
            INSERT INTO alerts (account_id, sensor_id, metric, direction, threshold, sustain_minutes)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, account_id, sensor_id, metric, direction, threshold, sustain_minutes
            "#,
        )
        .bind(rule.account_id)
        .bind(rule.scope.stored())
        .bind(rule.metric.to_string())
        .bind(rule.direction.to_string())
        .bind(rule.threshold)
        .bind(sustain_minutes)
        .fetch_one(&self.pool)
        .await?;

        Ok(AlarmRule::try_from(row).map_err(StoreError::InvalidRule)?)
    }

    /// Owner-scoped delete. Returns whether a rule was actually removed, so
    /// callers can distinguish a real delete from a no-op on a rule that
    /// does not exist or belongs to another account.
    pub async fn delete_rule(
        &self,
        account_id: AccountId,
        rule_id: RuleId,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM alerts WHERE id = $1 AND account_id = $2")
            .bind(rule_id)
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RuleStore for PgRuleStore {
    async fn list_rules(&self, account_id: AccountId) -> Result<Vec<AlarmRule>, StoreError> {
        let rows: Vec<AlarmRuleRow> = sqlx::query_as(
            r#"
            SELECT id, account_id, sensor_id, metric, direction, threshold, sustain_minutes
            FROM alerts
            WHERE account_id = $1
            ORDER BY id
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| AlarmRule::try_from(row).map_err(StoreError::InvalidRule))
            .collect()
    }
}

#[derive(Clone)]
pub struct PgMeasurementStore {
    pool: PgPool,
}

impl PgMeasurementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MeasurementStore for PgMeasurementStore {
    async fn list_sensors(&self, account_id: AccountId) -> Result<Vec<Sensor>, StoreError> {
        let sensors: Vec<Sensor> =
            sqlx::query_as("SELECT id, account_id, name FROM sensors WHERE account_id = $1 ORDER BY id")
                .bind(account_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(sensors)
    }

    async fn list_measurements(
        &self,
        sensor_ids: &[SensorId],
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Measurement>, StoreError> {
        let measurements: Vec<Measurement> = sqlx::query_as(
            r#"
            SELECT sensor_id, timestamp, temperature, humidity, vcc,
                   b2s_input_dbm, s2b_input_dbm, flags
            FROM measurements
            WHERE sensor_id = ANY($1)
              AND ($2::timestamptz IS NULL OR timestamp >= $2)
            ORDER BY sensor_id, timestamp
            "#,
        )
        .bind(sensor_ids)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(measurements)
    }
}

/// Records alarm transitions in the `alarm_events` table, where the
/// dashboard's notification list reads them.
#[derive(Clone)]
pub struct PgNotificationSink {
    pool: PgPool,
}

impl PgNotificationSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationSink for PgNotificationSink {
    async fn notify(&self, account_id: AccountId, event: &AlarmEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO alarm_events (account_id, rule_id, sensor_id, kind, occurred_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(account_id)
        .bind(event.rule_id)
        .bind(event.sensor_id)
        .bind(event.kind.to_string())
        .bind(event.at)
        .execute(&self.pool)
        .await?;

        info!(
            account_id,
            rule_id = event.rule_id,
            sensor_id = event.sensor_id,
            kind = %event.kind,
            at = %event.at,
            "Alarm notification recorded"
        );
        Ok(())
    }
}
