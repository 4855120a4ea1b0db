mod postgres;

pub use postgres::{PgMeasurementStore, PgNotificationSink, PgRuleStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::alarm::AlarmEvent;
use crate::db::models::{AccountId, AlarmRule, Measurement, RuleValidationError, Sensor, SensorId};

/// Storage-layer failures, split along the error taxonomy the evaluator
/// cares about: `InvalidRule` is a creation-time configuration error and
/// never reaches evaluation; `Unavailable` aborts the current cycle with no
/// state changes.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid alarm rule: {0}")]
    InvalidRule(#[from] RuleValidationError),
    #[error("storage unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

/// Source of user-authored alarm rules.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn list_rules(&self, account_id: AccountId) -> Result<Vec<AlarmRule>, StoreError>;
}

/// Source of sensors and their measurement stream.
#[async_trait]
pub trait MeasurementStore: Send + Sync {
    async fn list_sensors(&self, account_id: AccountId) -> Result<Vec<Sensor>, StoreError>;

    /// Measurements for the given sensors ordered by `(sensor_id, timestamp)`.
    /// `since = None` fetches full history; otherwise rows from `since`
    /// onward (inclusive).
    async fn list_measurements(
        &self,
        sensor_ids: &[SensorId],
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Measurement>, StoreError>;
}

/// Destination for alarm state-transition notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, account_id: AccountId, event: &AlarmEvent) -> Result<(), StoreError>;
}
