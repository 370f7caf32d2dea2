//! Periodic status polling and fan-out to sensor sinks.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::decoder::Snapshot;
use crate::device_client::{DeviceClient, DeviceIdentity};
use crate::error::Result;

/// Value pushed to sinks for measurements the device did not report.
pub const UNAVAILABLE: &str = "unavailable";

pub const SOURCE_POLL: &str = "poll";
pub const SOURCE_PUSH: &str = "push";

/// Retries for the very first fetch, which must succeed for setup.
const FIRST_FETCH_RETRIES: u32 = 10;
/// Retries per steady-state poll tick.
const STEADY_FETCH_RETRIES: u32 = 3;

/// Shortest allowed scan interval.
pub const MIN_SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// External consumer of snapshot values, one per sensor instance.
pub trait SensorSink: Send + Sync {
    fn update_value(&self, key: &str, value: &str, source: &str);
    /// Host-driven predicate; disabled sinks are skipped entirely.
    fn is_enabled(&self) -> bool;
}

/// Pushes current values into sinks by their snapshot key. Sinks always
/// receive the raw current value; a key absent from the snapshot degrades
/// that sink to [`UNAVAILABLE`].
pub fn update_sinks(sinks: &[(String, Arc<dyn SensorSink>)], snapshot: &Snapshot, source: &str) {
    for (key, sink) in sinks {
        if !sink.is_enabled() {
            continue;
        }
        let value = snapshot.get(key).map(String::as_str).unwrap_or(UNAVAILABLE);
        sink.update_value(key, value, source);
    }
}

/// Polls one device on a fixed interval and distributes each snapshot to
/// the registered sinks.
pub struct PollingLoop {
    client: DeviceClient,
    identity: DeviceIdentity,
    scan_interval: Duration,
    sinks: Vec<(String, Arc<dyn SensorSink>)>,
    last_snapshot: Mutex<Option<Snapshot>>,
}

impl PollingLoop {
    /// Performs the first snapshot fetch and builds the loop around it.
    ///
    /// First-fetch failure propagates so device setup can fail fast; the
    /// caller derives the sensor set from the returned snapshot before
    /// adding sinks.
    pub async fn initialize(
        client: DeviceClient,
        identity: DeviceIdentity,
        scan_interval: Duration,
    ) -> Result<(Self, Snapshot)> {
        let snapshot = client.fetch_snapshot(&identity, FIRST_FETCH_RETRIES).await?;
        info!(
            mac = %identity.mac,
            keys = snapshot.len(),
            "first snapshot fetched"
        );
        let polling_loop = Self {
            client,
            identity,
            scan_interval: scan_interval.max(MIN_SCAN_INTERVAL),
            sinks: Vec::new(),
            last_snapshot: Mutex::new(Some(snapshot.clone())),
        };
        Ok((polling_loop, snapshot))
    }

    pub fn add_sink(&mut self, key: String, sink: Arc<dyn SensorSink>) {
        self.sinks.push((key, sink));
    }

    /// Distributes a snapshot to all enabled sinks.
    pub fn distribute(&self, snapshot: &Snapshot) {
        update_sinks(&self.sinks, snapshot, SOURCE_POLL);
    }

    /// One steady-state refresh: fetch, degrade to an empty snapshot on
    /// failure, distribute. Never aborts the loop.
    pub async fn refresh(&self) {
        let snapshot = match self
            .client
            .fetch_snapshot(&self.identity, STEADY_FETCH_RETRIES)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(mac = %self.identity.mac, %err, "status fetch failed, sensors unavailable");
                Snapshot::new()
            }
        };
        self.distribute(&snapshot);
        let mut last = self.last_snapshot.lock().unwrap_or_else(|e| e.into_inner());
        *last = Some(snapshot);
    }

    /// Most recent snapshot, for diagnostics only.
    pub fn last_snapshot(&self) -> Option<Snapshot> {
        let last = self.last_snapshot.lock().unwrap_or_else(|e| e.into_inner());
        last.clone()
    }

    /// Spawns the polling task. The caller aborts the returned handle on
    /// shutdown.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            debug!(mac = %self.identity.mac, interval = ?self.scan_interval, "polling started");
            let mut ticker = tokio::time::interval(self.scan_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately and the first snapshot
            // was already distributed during setup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.refresh().await;
            }
        })
    }
}
