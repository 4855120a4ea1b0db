use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};

use crate::db::models::{AlarmRule, Measurement, RuleId, SensorId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    BecameActive,
    Cleared,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BecameActive => "became_active",
            Self::Cleared => "cleared",
        })
    }
}

/// A state transition of one (rule, sensor) pair, stamped with the
/// measurement timestamp that caused it.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmEvent {
    pub rule_id: RuleId,
    pub sensor_id: SensorId,
    pub kind: EventKind,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlarmStatus {
    pub rule_id: RuleId,
    pub sensor_id: SensorId,
    pub active: bool,
    pub breach_started_at: Option<DateTime<Utc>>,
}

/// Per-pair bookkeeping.
///
/// `breach_started_at` is the timestamp of the first measurement in the
/// current unbroken run of breaching, non-excluded measurements; `None`
/// while idle. `last_seen` is the high-water timestamp of processed
/// measurements, used both to ignore re-fetched rows and to size the next
/// incremental fetch.
#[derive(Debug, Clone, Copy, Default)]
struct PairState {
    breach_started_at: Option<DateTime<Utc>>,
    active: bool,
    last_seen: Option<DateTime<Utc>>,
}

/// Sustained-breach state machine over (rule, sensor) pairs.
///
/// A wildcard rule expands to one independent pair per sensor of the
/// account; pairs never share or pool measurements. Per pair, processing
/// non-excluded measurements in timestamp order:
///
/// - idle -> breaching: the first breaching measurement records
///   `breach_started_at`
/// - breaching -> active: the first breaching measurement at least
///   `sustain` after `breach_started_at` (a zero sustain activates
///   immediately)
/// - breaching/active -> idle: the first non-breaching measurement
///
/// Excluded (`flags != 0`) measurements cause no transition in either
/// direction and do not reset an in-progress run.
///
/// Purely in-memory and synchronous; the engine never touches storage.
#[derive(Debug, Default)]
pub struct AlarmEngine {
    states: HashMap<(RuleId, SensorId), PairState>,
}

impl AlarmEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timestamp from which the next measurement fetch must start, or
    /// `None` for full history.
    ///
    /// Full history is required whenever some current (rule, sensor) pair
    /// has never been evaluated; otherwise the earliest high-water mark
    /// across pairs suffices, since rows at or before a pair's own mark are
    /// ignored on re-feed.
    pub fn fetch_since(&self, rules: &[AlarmRule], sensors: &[SensorId]) -> Option<DateTime<Utc>> {
        let mut earliest: Option<DateTime<Utc>> = None;
        for rule in rules {
            for sensor_id in rule.scope.sensors_for(sensors) {
                let state = self.states.get(&(rule.id, sensor_id))?;
                if let Some(last) = state.last_seen {
                    earliest = Some(earliest.map_or(last, |e| e.min(last)));
                }
            }
        }
        earliest
    }

    /// Feed one batch of measurements, ordered by `(sensor_id, timestamp)`,
    /// through every (rule, sensor) pair. Returns the state transitions the
    /// batch caused, in processing order.
    ///
    /// Pairs whose rule or sensor has disappeared upstream are forgotten
    /// first. Feeding an overlapping window twice is harmless: already-seen
    /// timestamps are skipped per pair.
    pub fn evaluate(
        &mut self,
        rules: &[AlarmRule],
        sensors: &[SensorId],
        measurements: &[Measurement],
    ) -> Vec<AlarmEvent> {
        let live: HashSet<(RuleId, SensorId)> = rules
            .iter()
            .flat_map(|r| {
                r.scope
                    .sensors_for(sensors)
                    .into_iter()
                    .map(move |s| (r.id, s))
            })
            .collect();
        self.states.retain(|pair, _| live.contains(pair));

        let mut by_sensor: HashMap<SensorId, Vec<&Measurement>> = HashMap::new();
        for m in measurements {
            by_sensor.entry(m.sensor_id).or_default().push(m);
        }

        let mut events = Vec::new();
        for rule in rules {
            for sensor_id in rule.scope.sensors_for(sensors) {
                let state = self.states.entry((rule.id, sensor_id)).or_default();
                let Some(stream) = by_sensor.get(&sensor_id) else {
                    continue;
                };

                for m in stream {
                    if state.last_seen.is_some_and(|seen| m.timestamp <= seen) {
                        continue;
                    }
                    state.last_seen = Some(m.timestamp);

                    if m.is_excluded() {
                        continue;
                    }

                    if rule.breaches(m) {
                        let started = *state.breach_started_at.get_or_insert(m.timestamp);
                        if !state.active && m.timestamp - started >= rule.sustain() {
                            state.active = true;
                            events.push(AlarmEvent {
                                rule_id: rule.id,
                                sensor_id,
                                kind: EventKind::BecameActive,
                                at: m.timestamp,
                            });
                        }
                    } else if state.breach_started_at.take().is_some() && state.active {
                        state.active = false;
                        events.push(AlarmEvent {
                            rule_id: rule.id,
                            sensor_id,
                            kind: EventKind::Cleared,
                            at: m.timestamp,
                        });
                    }
                }
            }
        }
        events
    }

    /// Current status of every tracked (rule, sensor) pair, ordered by
    /// `(rule_id, sensor_id)`.
    pub fn snapshot(&self) -> Vec<AlarmStatus> {
        let mut statuses: Vec<AlarmStatus> = self
            .states
            .iter()
            .map(|(&(rule_id, sensor_id), s)| AlarmStatus {
                rule_id,
                sensor_id,
                active: s.active,
                breach_started_at: s.breach_started_at,
            })
            .collect();
        statuses.sort_by_key(|s| (s.rule_id, s.sensor_id));
        statuses
    }
}
