use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use utoipa::ToSchema;

pub type AccountId = i64;
pub type SensorId = i32;
pub type RuleId = i32;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Sensor {
    pub id: SensorId,
    pub account_id: AccountId,
    pub name: String,
}

/// One sensor report. Rows are append-only: never mutated, never deleted.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Measurement {
    pub sensor_id: SensorId,
    pub timestamp: DateTime<Utc>,
    /// Degrees Celsius
    pub temperature: f64,
    /// Relative humidity percentage
    pub humidity: f64,
    /// Battery voltage
    pub vcc: f64,
    /// Base-to-sensor signal strength (dBm), as measured by the sensor
    pub b2s_input_dbm: f64,
    /// Sensor-to-base signal strength (dBm), as measured by the base station
    pub s2b_input_dbm: f64,
    /// 0 = reliable; anything else marks the reading as bad
    pub flags: i16,
}

impl Measurement {
    /// Bad readings are invisible to alarm evaluation and latest-reading
    /// aggregation: they neither breach nor clear.
    pub fn is_excluded(&self) -> bool {
        self.flags != 0
    }

    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Temperature => self.temperature,
            Metric::Humidity => self.humidity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Temperature,
    Humidity,
}

impl FromStr for Metric {
    type Err = RuleValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temperature" => Ok(Self::Temperature),
            "humidity" => Ok(Self::Humidity),
            other => Err(RuleValidationError::UnknownMetric(other.to_owned())),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Above,
    Below,
}

impl FromStr for Direction {
    type Err = RuleValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "above" => Ok(Self::Above),
            "below" => Ok(Self::Below),
            other => Err(RuleValidationError::UnknownDirection(other.to_owned())),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Above => "above",
            Self::Below => "below",
        })
    }
}

/// Which sensors an alarm rule watches.
///
/// Stored as a nullable `sensor_id` column; modeled as a tagged variant so
/// no sign-sentinel comparisons leak into the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorScope {
    /// Every sensor of the owning account, each evaluated independently.
    Any,
    Specific(SensorId),
}

impl SensorScope {
    pub fn from_stored(sensor_id: Option<SensorId>) -> Self {
        match sensor_id {
            Some(id) => Self::Specific(id),
            None => Self::Any,
        }
    }

    pub fn stored(&self) -> Option<SensorId> {
        match *self {
            Self::Any => None,
            Self::Specific(id) => Some(id),
        }
    }

    /// The sensors this scope binds to, out of the account's sensor list.
    /// A specific scope pointing at a sensor the account no longer has
    /// resolves to nothing.
    pub fn sensors_for(&self, sensors: &[SensorId]) -> Vec<SensorId> {
        match *self {
            Self::Any => sensors.to_vec(),
            Self::Specific(id) if sensors.contains(&id) => vec![id],
            Self::Specific(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlarmRule {
    pub id: RuleId,
    pub account_id: AccountId,
    pub scope: SensorScope,
    pub metric: Metric,
    pub direction: Direction,
    pub threshold: f64,
    /// Minimum continuous breach time before the rule goes active.
    /// Zero triggers on the first breaching measurement.
    pub sustain_minutes: u32,
}

impl AlarmRule {
    pub fn sustain(&self) -> Duration {
        Duration::minutes(i64::from(self.sustain_minutes))
    }

    /// Strict inequality only: a value equal to the threshold never breaches.
    pub fn breaches(&self, m: &Measurement) -> bool {
        let value = m.value(self.metric);
        match self.direction {
            Direction::Above => value > self.threshold,
            Direction::Below => value < self.threshold,
        }
    }
}

/// A rule as submitted for creation, before it has an id.
#[derive(Debug, Clone)]
pub struct NewAlarmRule {
    pub account_id: AccountId,
    pub scope: SensorScope,
    pub metric: Metric,
    pub direction: Direction,
    pub threshold: f64,
    pub sustain_minutes: u32,
}

impl NewAlarmRule {
    /// Creation-time validation. Rules that fail here never reach the
    /// evaluator, which assumes its inputs are well-formed.
    pub fn validate(&self) -> Result<(), RuleValidationError> {
        if !self.threshold.is_finite() {
            return Err(RuleValidationError::NonFiniteThreshold(self.threshold));
        }
        // Stored as a 32-bit signed column; anything above that would wrap
        // negative on the way in.
        if i32::try_from(self.sustain_minutes).is_err() {
            return Err(RuleValidationError::ExcessiveSustain(self.sustain_minutes));
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RuleValidationError {
    #[error("threshold must be a finite number, got {0}")]
    NonFiniteThreshold(f64),
    #[error("unknown metric: {0:?}")]
    UnknownMetric(String),
    #[error("unknown direction: {0:?}")]
    UnknownDirection(String),
    #[error("sustain duration must be non-negative, got {0}")]
    NegativeSustain(i32),
    #[error("sustain duration too large: {0} minutes")]
    ExcessiveSustain(u32),
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn measurement(temperature: f64, humidity: f64) -> Measurement {
        Measurement {
            sensor_id: 1,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            temperature,
            humidity,
            vcc: 3.0,
            b2s_input_dbm: -70.0,
            s2b_input_dbm: -72.0,
            flags: 0,
        }
    }

    fn rule(metric: Metric, direction: Direction, threshold: f64) -> AlarmRule {
        AlarmRule {
            id: 1,
            account_id: 1,
            scope: SensorScope::Any,
            metric,
            direction,
            threshold,
            sustain_minutes: 0,
        }
    }

    #[test]
    fn above_breaches_strictly() {
        let r = rule(Metric::Temperature, Direction::Above, 25.0);
        assert!(r.breaches(&measurement(25.1, 50.0)));
        assert!(!r.breaches(&measurement(25.0, 50.0)));
        assert!(!r.breaches(&measurement(24.9, 50.0)));
    }

    #[test]
    fn below_breaches_strictly() {
        let r = rule(Metric::Humidity, Direction::Below, 40.0);
        assert!(r.breaches(&measurement(20.0, 39.9)));
        assert!(!r.breaches(&measurement(20.0, 40.0)));
        assert!(!r.breaches(&measurement(20.0, 40.1)));
    }

    #[test]
    fn scope_round_trips_through_storage() {
        assert_eq!(SensorScope::from_stored(None), SensorScope::Any);
        assert_eq!(SensorScope::from_stored(Some(7)), SensorScope::Specific(7));
        assert_eq!(SensorScope::Any.stored(), None);
        assert_eq!(SensorScope::Specific(7).stored(), Some(7));
    }

    #[test]
    fn any_scope_expands_to_all_sensors() {
        assert_eq!(SensorScope::Any.sensors_for(&[1, 2, 3]), vec![1, 2, 3]);
    }

    #[test]
    fn specific_scope_ignores_missing_sensor() {
        assert_eq!(SensorScope::Specific(2).sensors_for(&[1, 2, 3]), vec![2]);
        assert!(SensorScope::Specific(9).sensors_for(&[1, 2, 3]).is_empty());
    }

    #[test]
    fn metric_and_direction_parse_round_trip() {
        assert_eq!("temperature".parse::<Metric>().unwrap(), Metric::Temperature);
        assert_eq!("humidity".parse::<Metric>().unwrap(), Metric::Humidity);
        assert_eq!("above".parse::<Direction>().unwrap(), Direction::Above);
        assert_eq!("below".parse::<Direction>().unwrap(), Direction::Below);
        assert!("pressure".parse::<Metric>().is_err());
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn non_finite_threshold_is_rejected() {
        let new_rule = NewAlarmRule {
            account_id: 1,
            scope: SensorScope::Any,
            metric: Metric::Temperature,
            direction: Direction::Above,
            threshold: f64::NAN,
            sustain_minutes: 5,
        };
        assert!(matches!(
            new_rule.validate(),
            Err(RuleValidationError::NonFiniteThreshold(_))
        ));
    }

    #[test]
    fn oversized_sustain_is_rejected() {
        let new_rule = NewAlarmRule {
            account_id: 1,
            scope: SensorScope::Any,
            metric: Metric::Temperature,
            direction: Direction::Above,
            threshold: 25.0,
            sustain_minutes: 4_000_000_000,
        };
        assert_eq!(
            new_rule.validate(),
            Err(RuleValidationError::ExcessiveSustain(4_000_000_000))
        );
    }

    #[test]
    fn finite_threshold_passes_validation() {
        let new_rule = NewAlarmRule {
            account_id: 1,
            scope: SensorScope::Specific(3),
            metric: Metric::Humidity,
            direction: Direction::Below,
            threshold: 35.0,
            sustain_minutes: 0,
        };
        assert!(new_rule.validate().is_ok());
    }

    #[test]
    fn flagged_measurement_is_excluded() {
        let mut m = measurement(20.0, 50.0);
        assert!(!m.is_excluded());
        m.flags = 2;
        assert!(m.is_excluded());
    }
}
