//! Derived display values for the dashboard: battery and radio-signal
//! percentages and the discrete tiers the UI picks icons from.

use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Battery voltage range mapped onto 0..=100%.
pub const BATTERY_VCC_MIN: f64 = 2.0;
pub const BATTERY_VCC_MAX: f64 = 3.4;

/// Radio signal strength range (dBm) mapped onto 0..=100%, used for both
/// uplink and downlink.
pub const SIGNAL_DBM_MIN: f64 = -110.0;
pub const SIGNAL_DBM_MAX: f64 = -50.0;

#[derive(Debug, Error, PartialEq)]
pub enum DisplayError {
    /// `min == max` makes the percentage undefined. This is a configuration
    /// error and must not silently collapse to 0 or 100.
    #[error("degenerate percent range: min and max are both {0}")]
    DegenerateRange(f64),
}

/// Linear position of `x` within `[min, max]`, clamped to `[0, 100]`.
pub fn percent(x: f64, min: f64, max: f64) -> Result<f64, DisplayError> {
    if min == max {
        return Err(DisplayError::DegenerateRange(min));
    }
    Ok((((x - min) / (max - min)) * 100.0).clamp(0.0, 100.0))
}

pub fn battery_percent(vcc: f64) -> Result<f64, DisplayError> {
    percent(vcc, BATTERY_VCC_MIN, BATTERY_VCC_MAX)
}

pub fn signal_percent(dbm: f64) -> Result<f64, DisplayError> {
    percent(dbm, SIGNAL_DBM_MIN, SIGNAL_DBM_MAX)
}

/// Icon tier for a percentage. Upper bounds are inclusive: 25% is still the
/// lowest tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LevelTier {
    Quarter,
    Half,
    ThreeQuarters,
    Full,
}

impl LevelTier {
    pub fn from_percent(percent: f64) -> Self {
        if percent <= 25.0 {
            Self::Quarter
        } else if percent <= 50.0 {
            Self::Half
        } else if percent <= 75.0 {
            Self::ThreeQuarters
        } else {
            Self::Full
        }
    }
}
