use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::alarm::AlarmStatus;
use crate::db::models::{
    AccountId, AlarmRule, Direction, Measurement, Metric, NewAlarmRule, RuleId, SensorId,
    SensorScope,
};
use crate::display::{self, DisplayError, LevelTier};

/// A sensor's latest reliable reading plus the derived display values the
/// dashboard renders next to it.
#[derive(Debug, Serialize, ToSchema)]
pub struct LatestReadingDto {
    pub sensor_id: SensorId,
    pub timestamp: DateTime<Utc>,
    /// Degrees Celsius
    pub temperature: f64,
    /// Relative humidity percentage
    pub humidity: f64,
    pub battery_percent: f64,
    pub battery_tier: LevelTier,
    /// Base-to-sensor link quality
    pub downlink_percent: f64,
    pub downlink_tier: LevelTier,
    /// Sensor-to-base link quality
    pub uplink_percent: f64,
    pub uplink_tier: LevelTier,
}

impl TryFrom<Measurement> for LatestReadingDto {
    type Error = DisplayError;

    fn try_from(m: Measurement) -> Result<Self, Self::Error> {
        let battery_percent = display::battery_percent(m.vcc)?;
        let downlink_percent = display::signal_percent(m.b2s_input_dbm)?;
        let uplink_percent = display::signal_percent(m.s2b_input_dbm)?;
        Ok(Self {
            sensor_id: m.sensor_id,
            timestamp: m.timestamp,
            temperature: m.temperature,
            humidity: m.humidity,
            battery_percent,
            battery_tier: LevelTier::from_percent(battery_percent),
            downlink_percent,
            downlink_tier: LevelTier::from_percent(downlink_percent),
            uplink_percent,
            uplink_tier: LevelTier::from_percent(uplink_percent),
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AlarmStatusDto {
    pub rule_id: RuleId,
    pub sensor_id: SensorId,
    pub active: bool,
    pub breach_started_at: Option<DateTime<Utc>>,
}

impl From<AlarmStatus> for AlarmStatusDto {
    fn from(s: AlarmStatus) -> Self {
        Self {
            rule_id: s.rule_id,
            sensor_id: s.sensor_id,
            active: s.active,
            breach_started_at: s.breach_started_at,
        }
    }
}

/// Body for creating an alarm rule. A `null` (or omitted) `sensor_id`
/// watches every sensor of the account.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateAlarmRuleRequest {
    pub account_id: AccountId,
    #[serde(default)]
    pub sensor_id: Option<SensorId>,
    pub metric: Metric,
    pub direction: Direction,
    pub threshold: f64,
    pub sustain_minutes: u32,
}

impl From<CreateAlarmRuleRequest> for NewAlarmRule {
    fn from(req: CreateAlarmRuleRequest) -> Self {
        Self {
            account_id: req.account_id,
            scope: SensorScope::from_stored(req.sensor_id),
            metric: req.metric,
            direction: req.direction,
            threshold: req.threshold,
            sustain_minutes: req.sustain_minutes,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AlarmRuleDto {
    pub id: RuleId,
    pub account_id: AccountId,
    /// `null` means the rule watches every sensor of the account.
    pub sensor_id: Option<SensorId>,
    pub metric: Metric,
    pub direction: Direction,
    pub threshold: f64,
    pub sustain_minutes: u32,
}

impl From<AlarmRule> for AlarmRuleDto {
    fn from(r: AlarmRule) -> Self {
        Self {
            id: r.id,
            account_id: r.account_id,
            sensor_id: r.scope.stored(),
            metric: r.metric,
            direction: r.direction,
            threshold: r.threshold,
            sustain_minutes: r.sustain_minutes,
        }
    }
}

/// A recorded alarm state transition, as read back from the notification
/// sink table.
#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct AlarmEventDto {
    pub id: i64,
    pub account_id: AccountId,
    pub rule_id: RuleId,
    pub sensor_id: SensorId,
    /// `became_active` or `cleared`
    pub kind: String,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn latest_reading_dto_derives_display_values() {
        let m = Measurement {
            sensor_id: 1,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            temperature: 21.5,
            humidity: 55.0,
            vcc: 3.4,
            b2s_input_dbm: -80.0,
            s2b_input_dbm: -110.0,
            flags: 0,
        };
        let dto = LatestReadingDto::try_from(m).unwrap();
        assert_eq!(dto.battery_percent, 100.0);
        assert_eq!(dto.battery_tier, LevelTier::Full);
        assert_eq!(dto.downlink_tier, LevelTier::Half);
        assert_eq!(dto.uplink_percent, 0.0);
        assert_eq!(dto.uplink_tier, LevelTier::Quarter);
    }

    #[test]
    fn omitted_sensor_id_means_every_sensor() {
        let req: CreateAlarmRuleRequest = serde_json::from_value(serde_json::json!({
            "account_id": 1,
            "metric": "temperature",
            "direction": "above",
            "threshold": 25.0,
            "sustain_minutes": 5,
        }))
        .unwrap();
        let rule = NewAlarmRule::from(req);
        assert_eq!(rule.scope, SensorScope::Any);
    }

    #[test]
    fn rule_dto_exposes_scope_as_nullable_sensor_id() {
        let rule = AlarmRule {
            id: 9,
            account_id: 1,
            scope: SensorScope::Specific(4),
            metric: Metric::Humidity,
            direction: Direction::Below,
            threshold: 35.0,
            sustain_minutes: 10,
        };
        let dto = AlarmRuleDto::from(rule);
        assert_eq!(dto.sensor_id, Some(4));
    }
}
