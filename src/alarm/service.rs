use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time;
use tracing::{error, info};

use super::engine::{AlarmEngine, AlarmStatus};
use crate::db::models::{AccountId, SensorId};
use crate::latest::LatestReadings;
use crate::store::{MeasurementStore, NotificationSink, RuleStore};

/// Shared snapshot of every (rule, sensor) pair's current status, refreshed
/// after each evaluation pass and read by the dashboard API.
#[derive(Clone, Default)]
pub struct AlarmStatusView {
    inner: Arc<RwLock<Vec<AlarmStatus>>>,
}

impl AlarmStatusView {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn replace(&self, statuses: Vec<AlarmStatus>) {
        *self.inner.write().await = statuses;
    }

    pub async fn all(&self) -> Vec<AlarmStatus> {
        self.inner.read().await.clone()
    }
}

/// Periodic batch evaluation of alarm rules, one engine per account.
///
/// Each tick fetches the account's rules, sensors and the incremental
/// measurement window, feeds the engine, records the resulting transitions
/// through the notification sink and refreshes the shared latest-reading
/// and alarm-status views.
///
/// Fetch failures are fail-safe: the affected account's pass is aborted
/// before any state is touched and retried on the next tick. Accounts are
/// independent; one account failing does not stop the others.
pub struct EvaluatorService<R, M, N> {
    rules: R,
    measurements: M,
    sink: N,
    accounts: Vec<AccountId>,
    interval: Duration,
    /// One reporting period of overlap on incremental fetches, so a report
    /// that lands between cycles is never missed.
    fetch_slack: chrono::Duration,
    engines: HashMap<AccountId, AlarmEngine>,
    latest: LatestReadings,
    status: AlarmStatusView,
}

impl<R, M, N> EvaluatorService<R, M, N>
where
    R: RuleStore,
    M: MeasurementStore,
    N: NotificationSink,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rules: R,
        measurements: M,
        sink: N,
        accounts: Vec<AccountId>,
        interval: Duration,
        measurement_period: Duration,
        latest: LatestReadings,
        status: AlarmStatusView,
    ) -> Self {
        let fetch_slack = chrono::Duration::from_std(measurement_period)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        Self {
            rules,
            measurements,
            sink,
            accounts,
            interval,
            fetch_slack,
            engines: HashMap::new(),
            latest,
            status,
        }
    }

    /// Runs the evaluation loop indefinitely.
    /// Spawn this via `tokio::spawn`.
    pub async fn run(mut self) {
        info!(
            interval_secs = self.interval.as_secs(),
            accounts = self.accounts.len(),
            "Alarm evaluation loop started"
        );
        let mut ticker = time::interval(self.interval);

        loop {
            ticker.tick().await;
            self.run_cycle().await;
        }
    }

    /// One evaluation pass over every configured account.
    pub async fn run_cycle(&mut self) {
        for account_id in self.accounts.clone() {
            if let Err(e) = self.evaluate_account(account_id).await {
                error!(
                    account_id,
                    error = %e,
                    "Evaluation cycle failed; alarm states left unchanged"
                );
            }
        }

        let mut statuses: Vec<AlarmStatus> = self
            .engines
            .values()
            .flat_map(|engine| engine.snapshot())
            .collect();
        statuses.sort_by_key(|s| (s.rule_id, s.sensor_id));
        self.status.replace(statuses).await;
    }

    async fn evaluate_account(&mut self, account_id: AccountId) -> anyhow::Result<()> {
        let rules = self.rules.list_rules(account_id).await?;
        let sensors = self.measurements.list_sensors(account_id).await?;
        let sensor_ids: Vec<SensorId> = sensors.iter().map(|s| s.id).collect();

        let engine = self.engines.entry(account_id).or_default();
        let since = engine
            .fetch_since(&rules, &sensor_ids)
            .map(|watermark| watermark - self.fetch_slack);
        let measurements = self
            .measurements
            .list_measurements(&sensor_ids, since)
            .await?;

        let events = engine.evaluate(&rules, &sensor_ids, &measurements);
        self.latest.apply(&measurements).await;

        for event in &events {
            info!(
                account_id,
                rule_id = event.rule_id,
                sensor_id = event.sensor_id,
                kind = %event.kind,
                at = %event.at,
                "Alarm transition"
            );
            if let Err(e) = self.sink.notify(account_id, event).await {
                // The in-memory transition stands; only the persisted
                // notification is missing.
                error!(
                    account_id,
                    rule_id = event.rule_id,
                    error = %e,
                    "Failed to record alarm notification"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::alarm::{AlarmEvent, EventKind};
    use crate::db::models::{
        AlarmRule, Direction, Measurement, Metric, Sensor, SensorScope,
    };
    use crate::store::StoreError;

    fn ts(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap() + chrono::Duration::minutes(minute)
    }

    fn reading(sensor_id: SensorId, minute: i64, temperature: f64) -> Measurement {
        Measurement {
            sensor_id,
            timestamp: ts(minute),
            temperature,
            humidity: 50.0,
            vcc: 3.0,
            b2s_input_dbm: -70.0,
            s2b_input_dbm: -72.0,
            flags: 0,
        }
    }

    fn unavailable() -> StoreError {
        StoreError::Unavailable(sqlx::Error::PoolClosed)
    }

    #[derive(Default)]
    struct FakeRules {
        rules: Vec<AlarmRule>,
        fail_for: Option<AccountId>,
    }

    #[async_trait]
    impl RuleStore for FakeRules {
        async fn list_rules(&self, account_id: AccountId) -> Result<Vec<AlarmRule>, StoreError> {
            if self.fail_for == Some(account_id) {
                return Err(unavailable());
            }
            Ok(self
                .rules
                .iter()
                .filter(|r| r.account_id == account_id)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct FakeMeasurements {
        sensors: Vec<Sensor>,
        measurements: Mutex<Vec<Measurement>>,
        fail: AtomicBool,
    }

    impl FakeMeasurements {
        fn push(&self, m: Measurement) {
            self.measurements.lock().unwrap().push(m);
        }
    }

    #[async_trait]
    impl MeasurementStore for Arc<FakeMeasurements> {
        async fn list_sensors(&self, account_id: AccountId) -> Result<Vec<Sensor>, StoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(unavailable());
            }
            Ok(self
                .sensors
                .iter()
                .filter(|s| s.account_id == account_id)
                .cloned()
                .collect())
        }

        async fn list_measurements(
            &self,
            sensor_ids: &[SensorId],
            since: Option<DateTime<Utc>>,
        ) -> Result<Vec<Measurement>, StoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(unavailable());
            }
            let mut rows: Vec<Measurement> = self
                .measurements
                .lock()
                .unwrap()
                .iter()
                .filter(|m| sensor_ids.contains(&m.sensor_id))
                .filter(|m| since.map_or(true, |cutoff| m.timestamp >= cutoff))
                .cloned()
                .collect();
            rows.sort_by_key(|m| (m.sensor_id, m.timestamp));
            Ok(rows)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<(AccountId, AlarmEvent)>>,
    }

    #[async_trait]
    impl NotificationSink for Arc<RecordingSink> {
        async fn notify(
            &self,
            account_id: AccountId,
            event: &AlarmEvent,
        ) -> Result<(), StoreError> {
            self.events.lock().unwrap().push((account_id, event.clone()));
            Ok(())
        }
    }

    fn sensor(id: SensorId, account_id: AccountId) -> Sensor {
        Sensor {
            id,
            account_id,
            name: format!("sensor-{id}"),
        }
    }

    fn temp_rule(id: i32, account_id: AccountId, sustain_minutes: u32) -> AlarmRule {
        AlarmRule {
            id,
            account_id,
            scope: SensorScope::Any,
            metric: Metric::Temperature,
            direction: Direction::Above,
            threshold: 25.0,
            sustain_minutes,
        }
    }

    #[tokio::test]
    async fn cycle_records_transitions_and_refreshes_views() {
        let rules = FakeRules {
            rules: vec![temp_rule(1, 1, 0)],
            fail_for: None,
        };
        let data = Arc::new(FakeMeasurements {
            sensors: vec![sensor(1, 1)],
            ..Default::default()
        });
        data.push(reading(1, 0, 26.0));
        let sink = Arc::new(RecordingSink::default());

        let latest = LatestReadings::new();
        let status = AlarmStatusView::new();
        let mut service = EvaluatorService::new(
            rules,
            data.clone(),
            sink.clone(),
            vec![1],
            Duration::from_secs(60),
            Duration::from_secs(300),
            latest.clone(),
            status.clone(),
        );

        service.run_cycle().await;

        let recorded = sink.events.lock().unwrap().clone();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, 1);
        assert_eq!(recorded[0].1.kind, EventKind::BecameActive);

        let statuses = status.all().await;
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].active);

        assert_eq!(latest.get(1).await.unwrap().timestamp, ts(0));
    }

    #[tokio::test]
    async fn fetch_failure_leaves_alarm_state_unchanged() {
        let rules = FakeRules {
            rules: vec![temp_rule(1, 1, 0)],
            fail_for: None,
        };
        let data = Arc::new(FakeMeasurements {
            sensors: vec![sensor(1, 1)],
            ..Default::default()
        });
        data.push(reading(1, 0, 26.0));
        let sink = Arc::new(RecordingSink::default());

        let status = AlarmStatusView::new();
        let mut service = EvaluatorService::new(
            rules,
            data.clone(),
            sink.clone(),
            vec![1],
            Duration::from_secs(60),
            Duration::from_secs(300),
            LatestReadings::new(),
            status.clone(),
        );

        service.run_cycle().await;
        assert!(status.all().await[0].active);

        // Storage goes away; a non-breaching reading is in the table but
        // cannot be fetched. The alarm must stay active, with no spurious
        // clear event.
        data.push(reading(1, 5, 20.0));
        data.fail.store(true, Ordering::SeqCst);
        service.run_cycle().await;

        assert!(status.all().await[0].active);
        assert_eq!(sink.events.lock().unwrap().len(), 1);

        // Storage recovers; the clear is applied on the next cycle.
        data.fail.store(false, Ordering::SeqCst);
        service.run_cycle().await;

        assert!(!status.all().await[0].active);
        let recorded = sink.events.lock().unwrap().clone();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[1].1.kind, EventKind::Cleared);
    }

    #[tokio::test]
    async fn one_failing_account_does_not_stop_the_others() {
        let rules = FakeRules {
            rules: vec![temp_rule(1, 1, 0), temp_rule(2, 2, 0)],
            fail_for: Some(2),
        };
        let data = Arc::new(FakeMeasurements {
            sensors: vec![sensor(1, 1), sensor(2, 2)],
            ..Default::default()
        });
        data.push(reading(1, 0, 26.0));
        data.push(reading(2, 0, 26.0));
        let sink = Arc::new(RecordingSink::default());

        let status = AlarmStatusView::new();
        let mut service = EvaluatorService::new(
            rules,
            data.clone(),
            sink.clone(),
            vec![1, 2],
            Duration::from_secs(60),
            Duration::from_secs(300),
            LatestReadings::new(),
            status.clone(),
        );

        service.run_cycle().await;

        let recorded = sink.events.lock().unwrap().clone();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, 1);
    }

    #[tokio::test]
    async fn incremental_fetch_does_not_drop_sustained_breaches() {
        // Sustained rule spanning several cycles with incremental windows.
        let rules = FakeRules {
            rules: vec![temp_rule(1, 1, 5)],
            fail_for: None,
        };
        let data = Arc::new(FakeMeasurements {
            sensors: vec![sensor(1, 1)],
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());

        let status = AlarmStatusView::new();
        let mut service = EvaluatorService::new(
            rules,
            data.clone(),
            sink.clone(),
            vec![1],
            Duration::from_secs(60),
            Duration::from_secs(60),
            LatestReadings::new(),
            status.clone(),
        );

        for minute in 0..3 {
            data.push(reading(1, minute, 26.0));
        }
        service.run_cycle().await;
        assert!(sink.events.lock().unwrap().is_empty());

        for minute in 3..6 {
            data.push(reading(1, minute, 26.0));
        }
        service.run_cycle().await;

        let recorded = sink.events.lock().unwrap().clone();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].1.kind, EventKind::BecameActive);
        assert_eq!(recorded[0].1.at, ts(5));
    }
}
