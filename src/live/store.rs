//! Live Data Store
//!
//! Keeps two bounded buffers of recent readings per device and a running
//! data-quality tally per `(equipment, metric)` pair. Listeners are notified
//! through a broadcast channel after each batch is stored.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use super::ring::RingBuffer;
use crate::config::LiveDataConfig;
use crate::protocol::{DataQuality, MetricReading};
use crate::query::TimeRange;

/// Per-key counts of reading quality flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DataQualityTally {
    pub total: u64,
    pub normal: u64,
    pub estimated: u64,
    pub questionable: u64,
    pub bad: u64,
}

impl DataQualityTally {
    pub fn record(&mut self, quality: DataQuality) {
        self.total += 1;
        match quality {
            DataQuality::Normal => self.normal += 1,
            DataQuality::Estimated => self.estimated += 1,
            DataQuality::Questionable => self.questionable += 1,
            DataQuality::Bad => self.bad += 1,
        }
    }
}

/// One row of the quality report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityEntry {
    pub equipment_id: String,
    pub metric_type: String,
    pub tally: DataQualityTally,
}

/// Last reported status of a device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatusEntry {
    pub status: String,
    pub updated_at: i64,
}

/// Notification sent to listeners after a batch is stored
#[derive(Debug, Clone)]
pub struct LiveUpdate {
    pub device_id: String,
    pub readings: Arc<Vec<MetricReading>>,
}

struct DeviceBuffers {
    recent: RingBuffer<MetricReading>,
    history: RingBuffer<MetricReading>,
}

#[derive(Default)]
struct LiveState {
    devices: HashMap<String, DeviceBuffers>,
    /// (equipment_id, metric_type) → tally
    quality: HashMap<(String, String), DataQualityTally>,
    statuses: HashMap<String, DeviceStatusEntry>,
}

/// Shared handle to the live buffers
#[derive(Clone)]
pub struct LiveDataStore {
    state: Arc<RwLock<LiveState>>,
    config: LiveDataConfig,
    updates: broadcast::Sender<LiveUpdate>,
}

impl LiveDataStore {
    pub fn new(config: LiveDataConfig) -> Self {
        let (updates, _) = broadcast::channel(config.listener_capacity.max(1));
        Self {
            state: Arc::new(RwLock::new(LiveState::default())),
            config,
            updates,
        }
    }

    /// Store a batch of readings for a device and notify listeners
    ///
    /// Returns the number of readings stored.
    pub async fn ingest(&self, device_id: &str, readings: Vec<MetricReading>) -> usize {
        if readings.is_empty() {
            return 0;
        }

        let count = readings.len();
        {
            let mut state = self.state.write().await;

            for reading in &readings {
                state
                    .quality
                    .entry((reading.equipment_id.clone(), reading.metric_type.clone()))
                    .or_default()
                    .record(reading.quality);
            }

            let recent_capacity = self.config.recent_capacity;
            let history_capacity = self.config.history_capacity;
            let buffers = state
                .devices
                .entry(device_id.to_string())
                .or_insert_with(|| DeviceBuffers {
                    recent: RingBuffer::new(recent_capacity),
                    history: RingBuffer::new(history_capacity),
                });

            buffers.recent.extend(readings.iter().cloned());
            let dropped = buffers.history.extend(readings.iter().cloned());
            if dropped > 0 {
                tracing::trace!(device_id = %device_id, dropped, "History buffer full, dropped oldest readings");
            }
        }

        // No receivers is fine
        let _ = self.updates.send(LiveUpdate {
            device_id: device_id.to_string(),
            readings: Arc::new(readings),
        });

        tracing::trace!(device_id = %device_id, count, "Stored live readings");
        count
    }

    /// Readings in the short-term buffer, oldest first
    pub async fn recent(&self, device_id: &str) -> Vec<MetricReading> {
        self.state
            .read()
            .await
            .devices
            .get(device_id)
            .map(|b| b.recent.to_vec())
            .unwrap_or_default()
    }

    /// Most recent reading of one metric for a device
    pub async fn latest(&self, device_id: &str, metric_type: &str) -> Option<MetricReading> {
        let state = self.state.read().await;
        let found = state
            .devices
            .get(device_id)?
            .recent
            .iter()
            .rev()
            .find(|r| r.metric_type == metric_type)
            .cloned();
        found
    }

    /// Readings from the history buffer, optionally filtered by inclusive bounds
    pub async fn get_history_data(
        &self,
        device_id: &str,
        range: Option<TimeRange>,
    ) -> Vec<MetricReading> {
        let state = self.state.read().await;
        let Some(buffers) = state.devices.get(device_id) else {
            return Vec::new();
        };

        match range {
            Some(range) => buffers
                .history
                .iter()
                .filter(|r| range.contains(r.timestamp))
                .cloned()
                .collect(),
            None => buffers.history.to_vec(),
        }
    }

    pub async fn quality(&self, equipment_id: &str, metric_type: &str) -> Option<DataQualityTally> {
        self.state
            .read()
            .await
            .quality
            .get(&(equipment_id.to_string(), metric_type.to_string()))
            .copied()
    }

    /// All tallies, sorted by equipment then metric
    pub async fn quality_report(&self) -> Vec<QualityEntry> {
        let state = self.state.read().await;
        let mut report: Vec<QualityEntry> = state
            .quality
            .iter()
            .map(|((equipment_id, metric_type), tally)| QualityEntry {
                equipment_id: equipment_id.clone(),
                metric_type: metric_type.clone(),
                tally: *tally,
            })
            .collect();
        report.sort_by(|a, b| {
            (&a.equipment_id, &a.metric_type).cmp(&(&b.equipment_id, &b.metric_type))
        });
        report
    }

    pub async fn update_device_status(&self, device_id: &str, status: &str, timestamp: i64) {
        self.state.write().await.statuses.insert(
            device_id.to_string(),
            DeviceStatusEntry {
                status: status.to_string(),
                updated_at: timestamp,
            },
        );
    }

    pub async fn device_status(&self, device_id: &str) -> Option<DeviceStatusEntry> {
        self.state.read().await.statuses.get(device_id).cloned()
    }

    /// Devices with at least one stored reading, sorted
    pub async fn tracked_devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self.state.read().await.devices.keys().cloned().collect();
        devices.sort();
        devices
    }

    /// Register a listener for stored batches
    pub fn subscribe(&self) -> broadcast::Receiver<LiveUpdate> {
        self.updates.subscribe()
    }

    /// Drop all buffers, tallies and statuses
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.devices.clear();
        state.quality.clear();
        state.statuses.clear();
        tracing::debug!("Live data cleared");
    }
}
