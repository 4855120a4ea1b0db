use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::db::models::{Measurement, SensorId};

/// Reduce a measurement batch to the most recent reliable reading per
/// sensor. Flagged rows never win, whatever their timestamp; a sensor whose
/// rows are all flagged is simply absent from the result.
pub fn latest_readings(measurements: &[Measurement]) -> HashMap<SensorId, Measurement> {
    let mut latest: HashMap<SensorId, Measurement> = HashMap::new();
    for m in measurements {
        if m.is_excluded() {
            continue;
        }
        match latest.get(&m.sensor_id) {
            Some(current) if current.timestamp >= m.timestamp => {}
            _ => {
                latest.insert(m.sensor_id, m.clone());
            }
        }
    }
    latest
}

/// Shared view of the latest reliable reading per sensor, refreshed by the
/// evaluation loop and read by the dashboard API.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks.
#[derive(Clone, Default)]
pub struct LatestReadings {
    inner: Arc<RwLock<HashMap<SensorId, Measurement>>>,
}

impl LatestReadings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a measurement batch into the view. An existing entry is only
    /// replaced by a strictly newer reliable reading, so overlapping fetch
    /// windows cannot move a sensor's latest reading backwards.
    pub async fn apply(&self, batch: &[Measurement]) {
        let fresh = latest_readings(batch);
        if fresh.is_empty() {
            return;
        }
        let mut inner = self.inner.write().await;
        for (sensor_id, m) in fresh {
            match inner.get(&sensor_id) {
                Some(current) if current.timestamp >= m.timestamp => {}
                _ => {
                    inner.insert(sensor_id, m);
                }
            }
        }
    }

    /// Snapshot of every sensor's latest reading, ordered by sensor id.
    pub async fn all(&self) -> Vec<Measurement> {
        let mut readings: Vec<Measurement> = self.inner.read().await.values().cloned().collect();
        readings.sort_by_key(|m| m.sensor_id);
        readings
    }

    #[allow(dead_code)]
    pub async fn get(&self, sensor_id: SensorId) -> Option<Measurement> {
        self.inner.read().await.get(&sensor_id).cloned()
    }
}
