use crate::alert::{Alert, AlertEngine, AlertPolicy, ConnectivityAlert};
use crate::config::HeartlinkConfig;
use crate::contact::ContactToleranceFilter;
use crate::delivery::{delivery_channel, DeliveryHandle, DeliveryReport, DeliveryWorker, Submission};
use crate::events::{EventBus, EventReceiver, MonitorEvent};
use crate::quality::{QualityVerdict, SignalQualityClassifier};
use crate::queue::OfflineQueue;
use crate::reading::Reading;
use crate::sink::Sink;
use crate::supervisor::ConnectionState;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Thresholds and switches for the reading pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub quality_enabled: bool,
    pub quality_window: Duration,
    pub contact_tolerance: u32,
    pub alerts_enabled: bool,
    pub min_heart_rate: i32,
    pub max_heart_rate: i32,
    pub alert_policy: AlertPolicy,
    pub flush_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&HeartlinkConfig::default())
    }
}

impl PipelineSettings {
    pub fn from_config(config: &HeartlinkConfig) -> Self {
        Self {
            quality_enabled: config.quality.enabled,
            quality_window: Duration::from_secs(config.quality.window_seconds),
            contact_tolerance: config.device.contact_tolerance,
            alerts_enabled: config.alert.enabled,
            min_heart_rate: config.alert.min_heart_rate,
            max_heart_rate: config.alert.max_heart_rate,
            alert_policy: AlertPolicy {
                window: Duration::from_secs(config.alert.window_seconds),
                min_exceed_count: config.alert.min_exceed_count,
                cooldown: Duration::from_secs(config.alert.cooldown_minutes * 60),
                connectivity_cooldown: Duration::from_secs(
                    config.alert.connectivity_cooldown_minutes * 60,
                ),
            },
            flush_interval: Duration::from_secs(config.queue.flush_interval_seconds),
        }
    }
}

/// Counters describing what the pipeline did with incoming readings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub received: u64,
    pub accepted: u64,
    pub rejected_noise: u64,
    pub contact_lost: u64,
    pub sent: u64,
    pub queued: u64,
    pub flushed: u64,
    pub alerts: u64,
}

/// Shared read access to a pipeline's counters
#[derive(Clone, Default)]
pub struct PipelineStatsHandle {
    inner: Arc<Mutex<PipelineStats>>,
}

impl PipelineStatsHandle {
    pub fn snapshot(&self) -> PipelineStats {
        self.inner.lock().clone()
    }

    pub(crate) fn update<F: FnOnce(&mut PipelineStats)>(&self, apply: F) {
        apply(&mut self.inner.lock());
    }
}

/// What happened to one reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingOutcome {
    /// Sensor contact was lost; nothing transmitted
    ContactLost,
    /// Classified as noise; kept in the quality window only
    Noise,
    /// Handed to the delivery worker
    Submitted,
    /// Delivery backlog full; stored in the offline queue
    Queued,
}

/// Consumes supervisor events and runs each reading through contact
/// smoothing, quality classification and alerting before handing it to
/// the delivery worker
pub struct ReadingPipeline {
    settings: PipelineSettings,
    contact: ContactToleranceFilter,
    classifier: SignalQualityClassifier,
    alerts: AlertEngine,
    delivery: DeliveryHandle,
    worker: Option<(DeliveryWorker, mpsc::UnboundedReceiver<DeliveryReport>)>,
    queue: Arc<OfflineQueue>,
    output: EventBus,
    stats: PipelineStatsHandle,
    offline_count: Option<usize>,
}

impl ReadingPipeline {
    pub fn new(
        settings: PipelineSettings,
        sink: Arc<dyn Sink>,
        queue: Arc<OfflineQueue>,
        output: EventBus,
    ) -> Self {
        let stats = PipelineStatsHandle::default();
        let (delivery, worker, reports) = delivery_channel(
            sink,
            Arc::clone(&queue),
            stats.clone(),
            settings.flush_interval,
        );
        Self {
            contact: ContactToleranceFilter::with_tolerance(settings.contact_tolerance),
            classifier: SignalQualityClassifier::with_window(settings.quality_window),
            alerts: AlertEngine::new(settings.alert_policy.clone()),
            settings,
            delivery,
            worker: Some((worker, reports)),
            queue,
            output,
            stats,
            offline_count: None,
        }
    }

    pub fn stats(&self) -> PipelineStatsHandle {
        self.stats.clone()
    }

    /// Process events until cancelled or the supervisor goes away
    pub async fn run(mut self, mut input: EventReceiver, cancel: CancellationToken) {
        let Some((worker, mut reports)) = self.worker.take() else {
            warn!("Reading pipeline has no delivery worker, not starting");
            return;
        };
        info!("Reading pipeline started");

        let worker_cancel = cancel.child_token();
        let delivery_task = tokio::spawn(worker.run(worker_cancel.clone()));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = input.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        debug!("Supervisor event stream closed");
                        break;
                    }
                },
                Some(report) = reports.recv() => {
                    self.handle_report(report, tokio::time::Instant::now().into_std())
                        .await;
                }
            }
        }

        worker_cancel.cancel();
        if let Err(e) = delivery_task.await {
            warn!("Delivery worker ended abnormally: {}", e);
        }

        let stats = self.stats.snapshot();
        info!(
            "Reading pipeline stopped: {} received, {} sent, {} queued, {} noise, {} alerts",
            stats.received, stats.sent, stats.queued, stats.rejected_noise, stats.alerts
        );
    }

    pub async fn handle_event(&mut self, event: MonitorEvent) {
        let now = tokio::time::Instant::now().into_std();
        match event {
            MonitorEvent::HeartRateReceived { reading } => {
                self.process_reading(reading, now).await;
            }
            MonitorEvent::ConnectionStateChanged { state, .. } => {
                if state == ConnectionState::Disconnected {
                    self.restart_window();
                    self.raise_connectivity(ConnectivityAlert::BleDisconnected, now)
                        .await;
                }
                self.forward(event).await;
            }
            MonitorEvent::DataStale { .. } => {
                self.raise_connectivity(ConnectivityAlert::DataStale, now).await;
                self.forward(event).await;
            }
            other => self.forward(other).await,
        }
    }

    /// React to what the delivery worker saw
    pub async fn handle_report(&mut self, report: DeliveryReport, now: Instant) {
        match report {
            DeliveryReport::SinkFailed => {
                self.raise_connectivity(ConnectivityAlert::ApiUnreachable, now)
                    .await;
            }
            DeliveryReport::QueueDepth(count) => self.publish_offline_count(count).await,
        }
    }

    /// Run one reading through the pipeline
    pub async fn process_reading(&mut self, reading: Reading, now: Instant) -> ReadingOutcome {
        self.stats.update(|s| s.received += 1);

        if !self.contact.update(reading.sensor_contact) {
            self.stats.update(|s| s.contact_lost += 1);
            if self.classifier.sample_count() > 0 {
                debug!("Sensor contact lost, discarding quality window");
                self.classifier.reset();
            }
            return ReadingOutcome::ContactLost;
        }

        let verdict = if self.settings.quality_enabled {
            self.classifier.add_reading(reading.bpm(), now)
        } else {
            QualityVerdict::unchecked()
        };

        self.forward(MonitorEvent::ReadingClassified {
            reading: reading.clone(),
            verdict: verdict.clone(),
            effective_contact: true,
        })
        .await;

        if verdict.is_noise {
            self.stats.update(|s| s.rejected_noise += 1);
            debug!(
                "Rejected {} BPM as noise: quality {:.2} ({})",
                reading.heart_rate, verdict.quality, verdict.reason
            );
            return ReadingOutcome::Noise;
        }
        self.stats.update(|s| s.accepted += 1);

        if self.settings.alerts_enabled {
            if let Some(alert) = self.alerts.evaluate(
                reading.bpm(),
                self.settings.min_heart_rate,
                self.settings.max_heart_rate,
                now,
            ) {
                self.raise(alert).await;
            }
        }

        match self.delivery.submit(reading).await {
            Submission::Pending => ReadingOutcome::Submitted,
            Submission::Spilled => {
                let count = self.queue.count().await;
                self.publish_offline_count(count).await;
                ReadingOutcome::Queued
            }
        }
    }

    fn restart_window(&mut self) {
        self.contact.reset();
        self.classifier.reset();
    }

    async fn publish_offline_count(&mut self, count: usize) {
        if self.offline_count != Some(count) {
            self.offline_count = Some(count);
            self.forward(MonitorEvent::OfflineQueueChanged { count }).await;
        }
    }

    async fn raise_connectivity(&mut self, condition: ConnectivityAlert, now: Instant) {
        if self.settings.alerts_enabled && self.alerts.evaluate_connectivity(condition, now) {
            self.raise(Alert::connectivity(condition)).await;
        }
    }

    async fn raise(&mut self, alert: Alert) {
        self.stats.update(|s| s.alerts += 1);
        warn!(kind = alert.kind.as_str(), "{}", alert.message);
        self.forward(MonitorEvent::AlertRaised { alert }).await;
    }

    async fn forward(&mut self, event: MonitorEvent) {
        if let Err(e) = self.output.publish(event).await {
            debug!("Pipeline output dropped: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertKind;
    use crate::delivery::DELIVERY_BACKLOG;
    use crate::error::SinkError;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Sink whose availability can be toggled
    #[derive(Default)]
    struct SwitchSink {
        down: AtomicBool,
        delivered: Mutex<Vec<u16>>,
    }

    #[async_trait]
    impl Sink for SwitchSink {
        async fn send(&self, reading: &Reading) -> Result<(), SinkError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(SinkError::Unreachable {
                    details: "connection refused".to_string(),
                });
            }
            self.delivered.lock().push(reading.heart_rate);
            Ok(())
        }

        fn sink_name(&self) -> &str {
            "switch"
        }
    }

    fn reading(bpm: u16, contact: bool) -> Reading {
        Reading {
            heart_rate: bpm,
            rr_intervals: vec![],
            sensor_contact: contact,
            sensor_contact_supported: true,
            battery_level: Some(80),
            device_id: "strap".to_string(),
            recorded_at: Utc::now(),
        }
    }

    fn pipeline(settings: PipelineSettings) -> (ReadingPipeline, Arc<SwitchSink>, EventReceiver) {
        let sink = Arc::new(SwitchSink::default());
        let (output, receiver) = EventBus::new(1024);
        let pipeline = ReadingPipeline::new(
            settings,
            Arc::clone(&sink) as Arc<dyn Sink>,
            Arc::new(OfflineQueue::in_memory(1000)),
            output,
        );
        (pipeline, sink, receiver)
    }

    /// Run the delivery worker until `count` readings reached the sink
    async fn deliver_all(pipeline: &mut ReadingPipeline, count: u64) {
        let (worker, _reports) = pipeline.worker.take().unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(worker.run(cancel.clone()));

        let stats = pipeline.stats();
        tokio::time::timeout(Duration::from_secs(5), async {
            while stats.snapshot().sent < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("readings were not delivered");

        cancel.cancel();
        task.await.unwrap();
    }

    fn alerts(receiver: &mut EventReceiver) -> Vec<AlertKind> {
        let mut kinds = Vec::new();
        while let Ok(Some(event)) = receiver.try_recv() {
            if let MonitorEvent::AlertRaised { alert } = event {
                kinds.push(alert.kind);
            }
        }
        kinds
    }

    #[tokio::test]
    async fn test_clean_readings_are_sent() {
        let (mut pipeline, sink, _rx) = pipeline(PipelineSettings::default());
        let start = Instant::now();

        for i in 0..10u16 {
            let outcome = pipeline
                .process_reading(reading(70 + i % 3, true), start + Duration::from_secs(i as u64))
                .await;
            assert_eq!(outcome, ReadingOutcome::Submitted);
        }
        deliver_all(&mut pipeline, 10).await;

        assert_eq!(
            *sink.delivered.lock(),
            vec![70, 71, 72, 70, 71, 72, 70, 71, 72, 70]
        );
        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.received, 10);
        assert_eq!(stats.accepted, 10);
        assert_eq!(stats.sent, 10);
        assert_eq!(stats.rejected_noise, 0);
    }

    #[tokio::test]
    async fn test_noise_band_readings_are_dropped() {
        let (mut pipeline, _sink, _rx) = pipeline(PipelineSettings::default());
        let start = Instant::now();

        let mut outcomes = Vec::new();
        for i in 0..10u64 {
            outcomes.push(
                pipeline
                    .process_reading(reading(150, true), start + Duration::from_secs(i))
                    .await,
            );
        }

        // Insufficient stage accepts the first four readings
        assert!(outcomes[..4].iter().all(|o| *o == ReadingOutcome::Submitted));
        assert!(outcomes[4..].iter().all(|o| *o == ReadingOutcome::Noise));
        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.accepted, 4);
        assert_eq!(stats.rejected_noise, 6);
    }

    #[tokio::test]
    async fn test_contact_loss_after_tolerance() {
        let (mut pipeline, _sink, _rx) = pipeline(PipelineSettings::default());
        let start = Instant::now();

        let mut outcomes = Vec::new();
        for (i, contact) in [true, false, false, false, true].into_iter().enumerate() {
            outcomes.push(
                pipeline
                    .process_reading(reading(72, contact), start + Duration::from_secs(i as u64))
                    .await,
            );
        }

        assert_eq!(
            outcomes,
            vec![
                ReadingOutcome::Submitted,
                ReadingOutcome::Submitted,
                ReadingOutcome::Submitted,
                ReadingOutcome::ContactLost,
                ReadingOutcome::Submitted,
            ]
        );
        assert_eq!(pipeline.stats().snapshot().accepted, 4);
        assert_eq!(pipeline.stats().snapshot().contact_lost, 1);
        // Window restarted by the contact loss
        assert_eq!(pipeline.classifier.sample_count(), 1);
    }

    #[tokio::test]
    async fn test_backlog_overflow_goes_to_offline_queue() {
        let settings = PipelineSettings {
            quality_enabled: false,
            alerts_enabled: false,
            ..PipelineSettings::default()
        };
        let (mut pipeline, _sink, mut rx) = pipeline(settings);
        let start = Instant::now();

        // No worker is draining, as when the sink hangs
        let mut outcomes = Vec::new();
        for i in 0..40u64 {
            outcomes.push(
                pipeline
                    .process_reading(reading(70, true), start + Duration::from_secs(i))
                    .await,
            );
        }

        let submitted = outcomes
            .iter()
            .filter(|o| **o == ReadingOutcome::Submitted)
            .count();
        assert_eq!(submitted, DELIVERY_BACKLOG);
        assert!(outcomes[DELIVERY_BACKLOG..]
            .iter()
            .all(|o| *o == ReadingOutcome::Queued));
        assert_eq!(pipeline.queue.count().await, 40 - DELIVERY_BACKLOG);
        assert_eq!(pipeline.stats().snapshot().queued, 8);

        let mut counts = Vec::new();
        while let Ok(Some(event)) = rx.try_recv() {
            if let MonitorEvent::OfflineQueueChanged { count } = event {
                counts.push(count);
            }
        }
        assert_eq!(counts, (1..=8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_delivery_reports_raise_alert_and_queue_changes() {
        let (mut pipeline, _sink, mut rx) = pipeline(PipelineSettings::default());
        let now = Instant::now();

        pipeline.handle_report(DeliveryReport::QueueDepth(0), now).await;
        pipeline.handle_report(DeliveryReport::SinkFailed, now).await;
        pipeline.handle_report(DeliveryReport::QueueDepth(1), now).await;
        // Cooldown holds back the second alert, unchanged depth is not republished
        pipeline
            .handle_report(DeliveryReport::SinkFailed, now + Duration::from_secs(1))
            .await;
        pipeline.handle_report(DeliveryReport::QueueDepth(1), now).await;
        pipeline.handle_report(DeliveryReport::QueueDepth(0), now).await;

        let mut seen = Vec::new();
        while let Ok(Some(event)) = rx.try_recv() {
            match event {
                MonitorEvent::AlertRaised { alert } => seen.push(format!("{:?}", alert.kind)),
                MonitorEvent::OfflineQueueChanged { count } => seen.push(count.to_string()),
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(seen, vec!["0", "ApiUnreachable", "1", "0"]);
    }

    #[tokio::test]
    async fn test_failed_sink_alerts_while_running() {
        let (pipeline, sink, mut rx) = pipeline(PipelineSettings::default());
        sink.down.store(true, Ordering::SeqCst);
        let stats = pipeline.stats();

        let (bus, input) = EventBus::new(16);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(pipeline.run(input, cancel.clone()));

        for bpm in [70, 71] {
            bus.publish(MonitorEvent::HeartRateReceived {
                reading: reading(bpm, true),
            })
            .await
            .unwrap();
        }

        let mut kinds = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Some(MonitorEvent::AlertRaised { alert }) => kinds.push(alert.kind),
                    Some(MonitorEvent::OfflineQueueChanged { count: 2 }) => break,
                    Some(_) => {}
                    None => panic!("pipeline output closed"),
                }
            }
        })
        .await
        .expect("offline queue never reached two readings");

        assert_eq!(kinds, vec![AlertKind::ApiUnreachable]);
        assert_eq!(stats.snapshot().queued, 2);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_threshold_alerts_with_cooldown() {
        let (mut pipeline, _sink, mut rx) = pipeline(PipelineSettings::default());
        let start = Instant::now();

        pipeline.process_reading(reading(130, true), start).await;
        pipeline
            .process_reading(reading(131, true), start + Duration::from_secs(1))
            .await;
        pipeline
            .process_reading(reading(40, true), start + Duration::from_secs(2))
            .await;

        assert_eq!(alerts(&mut rx), vec![AlertKind::High, AlertKind::Low]);
        assert_eq!(pipeline.stats().snapshot().alerts, 2);
    }

    #[tokio::test]
    async fn test_alerts_disabled() {
        let settings = PipelineSettings {
            alerts_enabled: false,
            ..PipelineSettings::default()
        };
        let (mut pipeline, _sink, mut rx) = pipeline(settings);

        pipeline.process_reading(reading(200, true), Instant::now()).await;
        pipeline
            .handle_event(MonitorEvent::DataStale {
                silent_for: Duration::from_secs(10),
            })
            .await;
        pipeline
            .handle_report(DeliveryReport::SinkFailed, Instant::now())
            .await;
        assert!(alerts(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_connectivity_events_raise_alerts_and_forward() {
        let (mut pipeline, _sink, mut rx) = pipeline(PipelineSettings::default());

        pipeline
            .handle_event(MonitorEvent::ConnectionStateChanged {
                state: ConnectionState::Disconnected,
                timestamp: std::time::SystemTime::now(),
            })
            .await;
        pipeline
            .handle_event(MonitorEvent::DataStale {
                silent_for: Duration::from_secs(10),
            })
            .await;
        // Cooldown suppresses a second disconnect alert
        pipeline
            .handle_event(MonitorEvent::ConnectionStateChanged {
                state: ConnectionState::Disconnected,
                timestamp: std::time::SystemTime::now(),
            })
            .await;

        let mut types = Vec::new();
        let mut kinds = Vec::new();
        while let Ok(Some(event)) = rx.try_recv() {
            if let MonitorEvent::AlertRaised { alert } = &event {
                kinds.push(alert.kind);
            }
            types.push(event.event_type());
        }
        assert_eq!(kinds, vec![AlertKind::BleDisconnected, AlertKind::DataStale]);
        assert_eq!(
            types,
            vec![
                "alert_raised",
                "connection_state_changed",
                "alert_raised",
                "data_stale",
                "connection_state_changed",
            ]
        );
    }

    #[tokio::test]
    async fn test_quality_disabled_accepts_noise_band() {
        let settings = PipelineSettings {
            quality_enabled: false,
            alerts_enabled: false,
            ..PipelineSettings::default()
        };
        let (mut pipeline, sink, _rx) = pipeline(settings);
        let start = Instant::now();

        for i in 0..10u64 {
            let outcome = pipeline
                .process_reading(reading(150, true), start + Duration::from_secs(i))
                .await;
            assert_eq!(outcome, ReadingOutcome::Submitted);
        }
        deliver_all(&mut pipeline, 10).await;
        assert_eq!(sink.delivered.lock().len(), 10);
    }
}
