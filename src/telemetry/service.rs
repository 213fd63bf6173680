use std::{collections::BTreeMap, sync::Arc};

use chrono::Utc;
use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot},
    task::{JoinError, JoinHandle, JoinSet},
};
use tracing::{debug, error, info, warn};

use crate::{
    alerts::AlertSink,
    models::{Alert, DeviceReading, PH_POINTER},
    notify::{AlertNotification, Dispatcher, NotificationId},
    reading_cache::ReadingCache,
};

use super::threshold::PhEvaluator;

/// Terminal state of one device in one pass over a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceOutcome {
    /// Entry was not an object or lacked a pH reading or owner.
    Skipped,
    NoAlert,
    /// The alert record could not be written; no notification was attempted.
    PersistFailed,
    Delivered(NotificationId),
    /// The alert record was written but the notification failed.
    DeliveryFailed,
}

/// Per-device outcomes of one pass, keyed by device id.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub outcomes: BTreeMap<String, DeviceOutcome>,
}

impl PassSummary {
    pub fn count(&self, pred: impl Fn(&DeviceOutcome) -> bool) -> usize {
        self.outcomes.values().filter(|o| pred(*o)).count()
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceOutcome> {
        self.outcomes.get(device_id)
    }
}

/// Evaluates a full `devices` snapshot: threshold check, alert write, and
/// notification for each device.
#[derive(Clone)]
pub struct TelemetryPipeline {
    evaluator: PhEvaluator,
    sink: Arc<dyn AlertSink>,
    dispatcher: Arc<dyn Dispatcher>,
    cache: ReadingCache,
}

impl TelemetryPipeline {
    pub fn new(
        evaluator: PhEvaluator,
        sink: Arc<dyn AlertSink>,
        dispatcher: Arc<dyn Dispatcher>,
        cache: ReadingCache,
    ) -> Self {
        Self {
            evaluator,
            sink,
            dispatcher,
            cache,
        }
    }

    /// Process every device in `snapshot` independently and wait for all of
    /// them to finish. Devices run concurrently; a failure on one never
    /// affects another.
    pub async fn process_snapshot(&self, snapshot: &Value) -> PassSummary {
        let mut summary = PassSummary::default();
        let Some(devices) = snapshot.as_object() else {
            debug!("Snapshot is empty or not an object; nothing to evaluate");
            return summary;
        };

        let now = Utc::now();
        let mut tasks = JoinSet::new();

        for (device_id, entry) in devices {
            if let Some(reading) = DeviceReading::from_entry(device_id, entry, now) {
                self.cache.update(reading).await;
            }

            let Some((ph_level, user_id)) = extract(entry) else {
                debug!(device_id = %device_id, "Skipping incomplete device entry");
                summary.outcomes.insert(device_id.clone(), DeviceOutcome::Skipped);
                continue;
            };

            info!(device_id = %device_id, ph_level, user_id = %user_id, "Device reading observed");

            let pipeline = self.clone();
            let device_id = device_id.clone();
            let user_id = user_id.to_owned();
            tasks.spawn(async move {
                let outcome = pipeline.process_device(&device_id, &user_id, ph_level).await;
                (device_id, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((device_id, outcome)) => {
                    summary.outcomes.insert(device_id, outcome);
                }
                Err(e) => error!(error = %e, "Device evaluation task failed"),
            }
        }

        summary
    }

    async fn process_device(&self, device_id: &str, user_id: &str, ph_level: f64) -> DeviceOutcome {
        if !self.evaluator.evaluate(ph_level).should_alert {
            return DeviceOutcome::NoAlert;
        }

        warn!(
            device_id = %device_id,
            user_id = %user_id,
            ph_level,
            threshold = self.evaluator.threshold(),
            "High pH detected"
        );

        let alert = Alert::new(device_id, user_id, ph_level, Utc::now());
        if let Err(e) = self.sink.record_alert(&alert).await {
            error!(device_id = %device_id, error = %e, "Failed to record alert");
            return DeviceOutcome::PersistFailed;
        }

        let notification = AlertNotification {
            user_id: user_id.to_owned(),
            device_id: device_id.to_owned(),
            ph_level,
        };
        match self.dispatcher.dispatch(&notification).await {
            Ok(id) => {
                info!(device_id = %device_id, notification_id = %id, "Notification sent");
                DeviceOutcome::Delivered(id)
            }
            Err(e) => {
                error!(device_id = %device_id, error = %e, "Notification failed");
                DeviceOutcome::DeliveryFailed
            }
        }
    }
}

/// pH reading and owner of a device entry, if it has both.
fn extract(entry: &Value) -> Option<(f64, &str)> {
    if !entry.is_object() {
        return None;
    }
    let ph_level = entry.pointer(PH_POINTER)?.as_f64()?;
    let user_id = entry.get("userId")?.as_str().filter(|s| !s.is_empty())?;
    Some((ph_level, user_id))
}

// ---------------------------------------------------------------------------
// Watcher lifecycle
// ---------------------------------------------------------------------------

/// Runs a `TelemetryPipeline` over every snapshot received on a channel.
pub struct TelemetryWatcher;

/// Handle to a running watcher task.
pub struct WatcherHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<u64>,
}

impl TelemetryWatcher {
    /// Spawn the watcher. Snapshots are processed one pass at a time, in
    /// arrival order, until the handle is stopped or `snapshots` closes.
    pub fn start(pipeline: TelemetryPipeline, snapshots: mpsc::Receiver<Value>) -> WatcherHandle {
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run(pipeline, snapshots, stop_rx));
        WatcherHandle { stop, task }
    }
}

impl WatcherHandle {
    /// Stop the watcher after the pass in progress, returning the number of
    /// passes it completed.
    pub async fn stop(self) -> Result<u64, JoinError> {
        // The task may already have exited if the channel closed.
        let _ = self.stop.send(());
        self.task.await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn run(
    pipeline: TelemetryPipeline,
    mut snapshots: mpsc::Receiver<Value>,
    mut stop: oneshot::Receiver<()>,
) -> u64 {
    info!("Telemetry watcher running");
    let mut passes = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => {
                info!(passes, "Telemetry watcher stop requested");
                break;
            }
            snapshot = snapshots.recv() => {
                let Some(snapshot) = snapshot else {
                    info!(passes, "Snapshot channel closed");
                    break;
                };
                let summary = pipeline.process_snapshot(&snapshot).await;
                passes += 1;
                debug!(
                    devices = summary.outcomes.len(),
                    alerts = summary.count(|o| !matches!(o, DeviceOutcome::Skipped | DeviceOutcome::NoAlert)),
                    "Snapshot pass complete"
                );
            }
        }
    }

    passes
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Mutex};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::{
        alerts::StoreAlertSink,
        notify::DispatchError,
        rtdb::memory::MemoryStore,
    };

    #[derive(Default)]
    struct RecordingDispatcher {
        calls: Mutex<Vec<AlertNotification>>,
        reject: HashSet<String>,
    }

    impl RecordingDispatcher {
        fn rejecting(device_ids: &[&str]) -> Self {
            Self {
                reject: device_ids.iter().map(|s| (*s).to_owned()).collect(),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<AlertNotification> {
            let mut calls = self.calls.lock().unwrap().clone();
            calls.sort_by(|a, b| a.device_id.cmp(&b.device_id));
            calls
        }
    }

    #[async_trait]
    impl Dispatcher for RecordingDispatcher {
        async fn dispatch(&self, n: &AlertNotification) -> Result<NotificationId, DispatchError> {
            self.calls.lock().unwrap().push(n.clone());
            if self.reject.contains(&n.device_id) {
                return Err(DispatchError::Status {
                    status: 500,
                    body: "boom".to_owned(),
                });
            }
            Ok(NotificationId(format!("n-{}", n.device_id)))
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        dispatcher: Arc<RecordingDispatcher>,
        cache: ReadingCache,
        pipeline: TelemetryPipeline,
    }

    fn fixture(dispatcher: RecordingDispatcher) -> Fixture {
        let store = Arc::new(MemoryStore::default());
        let dispatcher = Arc::new(dispatcher);
        let cache = ReadingCache::new();
        let pipeline = TelemetryPipeline::new(
            PhEvaluator::default(),
            Arc::new(StoreAlertSink::new(store.clone())),
            dispatcher.clone(),
            cache.clone(),
        );
        Fixture {
            store,
            dispatcher,
            cache,
            pipeline,
        }
    }

    fn device(ph: f64, user: &str) -> Value {
        json!({"data": {"phlevel": {"pHLevel": ph}}, "userId": user})
    }

    #[tokio::test]
    async fn alerting_device_gets_record_and_notification() {
        let f = fixture(RecordingDispatcher::default());
        let snapshot = json!({"D1": device(9.0, "U1"), "D2": device(7.2, "U2")});

        let summary = f.pipeline.process_snapshot(&snapshot).await;

        assert_eq!(
            summary.get("D1"),
            Some(&DeviceOutcome::Delivered(NotificationId("n-D1".to_owned())))
        );
        assert_eq!(summary.get("D2"), Some(&DeviceOutcome::NoAlert));

        let alerts = f.store.value("alerts");
        assert_eq!(alerts.as_object().unwrap().len(), 1);
        assert_eq!(alerts["D1"]["pHLevel"], 9.0);
        assert_eq!(alerts["D1"]["userId"], "U1");
        assert_eq!(alerts["D1"]["deviceId"], "D1");
        assert_eq!(alerts["D1"]["handled"], false);

        assert_eq!(
            f.dispatcher.calls(),
            vec![AlertNotification {
                user_id: "U1".to_owned(),
                device_id: "D1".to_owned(),
                ph_level: 9.0,
            }]
        );
    }

    #[tokio::test]
    async fn threshold_reading_itself_does_not_alert() {
        let f = fixture(RecordingDispatcher::default());
        let summary = f.pipeline.process_snapshot(&json!({"D1": device(8.5, "U1")})).await;
        assert_eq!(summary.get("D1"), Some(&DeviceOutcome::NoAlert));
        assert!(f.store.writes().is_empty());
        assert!(f.dispatcher.calls().is_empty());
    }

    #[tokio::test]
    async fn reprocessing_same_snapshot_keeps_one_record_per_device() {
        let f = fixture(RecordingDispatcher::default());
        let snapshot = json!({"D1": device(9.0, "U1")});

        f.pipeline.process_snapshot(&snapshot).await;
        f.pipeline.process_snapshot(&snapshot).await;

        let alerts = f.store.value("alerts");
        assert_eq!(alerts.as_object().unwrap().len(), 1);
        assert_eq!(alerts["D1"]["pHLevel"], 9.0);
        assert_eq!(f.store.writes().len(), 2);
    }

    #[tokio::test]
    async fn malformed_entries_are_skipped() {
        let f = fixture(RecordingDispatcher::default());
        let snapshot = json!({
            "no_user": {"data": {"phlevel": {"pHLevel": 9.5}}},
            "empty_user": device(9.5, ""),
            "no_ph": {"userId": "U1", "data": {"turbidityData": {"NTU": 2.0}}},
            "ph_as_text": {"userId": "U1", "data": {"phlevel": {"pHLevel": "9.5"}}},
            "scalar": 42,
            "list": [1, 2, 3]
        });

        let summary = f.pipeline.process_snapshot(&snapshot).await;

        assert_eq!(summary.outcomes.len(), 6);
        assert_eq!(summary.count(|o| *o == DeviceOutcome::Skipped), 6);
        assert!(f.store.writes().is_empty());
        assert!(f.dispatcher.calls().is_empty());
    }

    #[tokio::test]
    async fn n_devices_m_breaches_give_m_dispatches() {
        let f = fixture(RecordingDispatcher::default());
        let snapshot = json!({
            "A": device(9.1, "U1"),
            "B": device(6.9, "U1"),
            "C": device(8.6, "U2"),
            "D": device(8.5, "U3"),
            "E": device(12.0, "U4")
        });

        f.pipeline.process_snapshot(&snapshot).await;

        let calls = f.dispatcher.calls();
        let triples: Vec<(&str, &str, f64)> = calls
            .iter()
            .map(|c| (c.device_id.as_str(), c.user_id.as_str(), c.ph_level))
            .collect();
        assert_eq!(
            triples,
            vec![("A", "U1", 9.1), ("C", "U2", 8.6), ("E", "U4", 12.0)]
        );
    }

    #[tokio::test]
    async fn delivery_failure_keeps_record_and_other_devices() {
        let f = fixture(RecordingDispatcher::rejecting(&["X"]));
        let snapshot = json!({"X": device(9.0, "U1"), "Y": device(9.2, "U2")});

        let summary = f.pipeline.process_snapshot(&snapshot).await;

        assert_eq!(summary.get("X"), Some(&DeviceOutcome::DeliveryFailed));
        assert!(matches!(summary.get("Y"), Some(DeviceOutcome::Delivered(_))));
        assert_eq!(f.store.value("alerts/X/pHLevel"), json!(9.0));
        assert_eq!(f.store.value("alerts/Y/pHLevel"), json!(9.2));
    }

    #[tokio::test]
    async fn persist_failure_skips_notification() {
        let f = fixture(RecordingDispatcher::default());
        f.store.fail_writes_under("alerts");

        let summary = f.pipeline.process_snapshot(&json!({"D1": device(9.0, "U1")})).await;

        assert_eq!(summary.get("D1"), Some(&DeviceOutcome::PersistFailed));
        assert!(f.dispatcher.calls().is_empty());
    }

    #[tokio::test]
    async fn cache_tracks_latest_readings() {
        let f = fixture(RecordingDispatcher::default());
        let snapshot = json!({
            "D1": {"data": {"phlevel": {"pHLevel": 7.0}, "turbidityData": {"NTU": 3.1}}},
            "D2": "not a device"
        });

        f.pipeline.process_snapshot(&snapshot).await;

        let d1 = f.cache.get("D1").await.unwrap();
        assert_eq!(d1.ph_level, Some(7.0));
        assert_eq!(d1.turbidity_ntu, Some(3.1));
        assert!(f.cache.get("D2").await.is_none());
    }

    #[tokio::test]
    async fn empty_snapshot_is_a_no_op() {
        let f = fixture(RecordingDispatcher::default());
        assert!(f.pipeline.process_snapshot(&Value::Null).await.outcomes.is_empty());
    }

    #[tokio::test]
    async fn watcher_processes_until_channel_closes() {
        let f = fixture(RecordingDispatcher::default());
        let (tx, rx) = mpsc::channel(4);
        let handle = TelemetryWatcher::start(f.pipeline.clone(), rx);

        tx.send(json!({"D1": device(9.0, "U1")})).await.unwrap();
        tx.send(json!({"D1": device(7.0, "U1")})).await.unwrap();
        drop(tx);

        while !handle.is_finished() {
            tokio::task::yield_now().await;
        }
        let passes = handle.stop().await.unwrap();
        assert_eq!(passes, 2);
        assert_eq!(f.dispatcher.calls().len(), 1);
        assert_eq!(f.cache.get("D1").await.unwrap().ph_level, Some(7.0));
    }

    #[tokio::test]
    async fn watcher_stops_on_request() {
        let f = fixture(RecordingDispatcher::default());
        let (tx, rx) = mpsc::channel(4);
        let handle = TelemetryWatcher::start(f.pipeline.clone(), rx);

        let passes = handle.stop().await.unwrap();
        assert_eq!(passes, 0);
        assert!(tx.is_closed());
    }
}
