use super::*;
use crate::config::HeartlinkConfig;
use crate::error::SinkError;
use crate::events::{EventReceiver, MonitorEvent};
use crate::protocol::PacketBuilder;
use crate::queue::OfflineQueue;
use crate::reading::Reading;
use crate::sink::Sink;
use crate::supervisor::ConnectionState;
use crate::transport::MockTransport;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct RecordingSink {
    delivered: Mutex<Vec<u16>>,
}

#[async_trait]
impl Sink for RecordingSink {
    async fn send(&self, reading: &Reading) -> Result<(), SinkError> {
        self.delivered.lock().push(reading.heart_rate);
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "recording"
    }
}

/// Sink that takes half a minute per reading
#[derive(Default)]
struct SlowSink {
    delivered: Mutex<Vec<u16>>,
}

#[async_trait]
impl Sink for SlowSink {
    async fn send(&self, reading: &Reading) -> Result<(), SinkError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        self.delivered.lock().push(reading.heart_rate);
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "slow"
    }
}

fn create_test_config() -> HeartlinkConfig {
    let mut config = HeartlinkConfig::default();
    config.device.peer_id = Some("strap-1".to_string());
    config.alert.enabled = false;
    config
}

fn create_orchestrator() -> (MonitorOrchestrator, MockTransport, Arc<RecordingSink>) {
    let (transport, events) = MockTransport::new();
    let sink = Arc::new(RecordingSink::default());
    let orchestrator = MonitorOrchestrator::with_components(
        create_test_config(),
        Arc::new(transport.clone()),
        events,
        sink.clone(),
        Arc::new(OfflineQueue::in_memory(100)),
    );
    (orchestrator, transport, sink)
}

async fn wait_for<F>(output: &mut EventReceiver, mut matches: F) -> MonitorEvent
where
    F: FnMut(&MonitorEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), output.recv())
            .await
            .expect("timed out waiting for pipeline output")
            .expect("pipeline output closed");
        if matches(&event) {
            return event;
        }
    }
}

async fn wait_until_connected(output: &mut EventReceiver) {
    wait_for(output, |event| {
        matches!(
            event,
            MonitorEvent::ConnectionStateChanged {
                state: ConnectionState::Connected,
                ..
            }
        )
    })
    .await;
}

#[tokio::test]
async fn test_orchestrator_creation() {
    let (orchestrator, _transport, _sink) = create_orchestrator();

    assert!(orchestrator.get_all_component_states().is_empty());
    assert!(orchestrator.supervisor().is_none());
    assert!(orchestrator.pipeline_stats().is_none());
    assert_eq!(
        orchestrator.config().device.peer_id.as_deref(),
        Some("strap-1")
    );
}

#[tokio::test]
async fn test_new_builds_configured_sink_and_queue() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config();
    config.queue.path = dir.path().join("queue.json").to_string_lossy().into_owned();
    config.sink.kind = crate::config::SinkKind::Jsonl;
    config.sink.path = dir.path().join("out.jsonl").to_string_lossy().into_owned();

    let (transport, events) = MockTransport::new();
    let orchestrator = MonitorOrchestrator::new(config, Arc::new(transport), events).unwrap();

    assert_eq!(orchestrator.queue().capacity(), 1000);
    assert_eq!(orchestrator.queue().count().await, 0);
}

#[tokio::test]
async fn test_start_marks_components_running() {
    let (mut orchestrator, _transport, _sink) = create_orchestrator();
    orchestrator.start().await.unwrap();

    assert_eq!(
        orchestrator.get_component_state("pipeline"),
        Some(ComponentState::Running)
    );
    assert_eq!(
        orchestrator.get_component_state("supervisor"),
        Some(ComponentState::Running)
    );
    assert!(orchestrator.supervisor().is_some());

    let exit_code = orchestrator.shutdown().await.unwrap();
    assert_eq!(exit_code, 0);
}

#[tokio::test]
async fn test_start_twice_fails() {
    let (mut orchestrator, _transport, _sink) = create_orchestrator();
    orchestrator.start().await.unwrap();

    let err = orchestrator.start().await.unwrap_err();
    assert!(err.to_string().contains("already started"));

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_readings_flow_to_sink() {
    let (mut orchestrator, transport, sink) = create_orchestrator();
    orchestrator.start().await.unwrap();
    let mut output = orchestrator.take_output().unwrap();

    wait_until_connected(&mut output).await;

    for bpm in [70u16, 71, 72] {
        let packet = PacketBuilder::new(bpm).contact(true).rr_millis(&[850]).build();
        assert!(transport.notify_heart_rate(packet));
        wait_for(&mut output, |event| {
            matches!(event, MonitorEvent::ReadingClassified { reading, .. } if reading.heart_rate == bpm)
        })
        .await;
    }

    // Delivery follows classification, so wait for the last send to land
    let stats = orchestrator.pipeline_stats().unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while stats.snapshot().sent < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(*sink.delivered.lock(), vec![70, 71, 72]);
    assert_eq!(stats.snapshot().received, 3);

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_slow_sink_does_not_delay_reconnect() {
    let (transport, events) = MockTransport::new();
    let sink = Arc::new(SlowSink::default());
    let mut config = create_test_config();
    config.system.event_bus_capacity = 4;
    config.quality.enabled = false;
    let mut orchestrator = MonitorOrchestrator::with_components(
        config,
        Arc::new(transport.clone()),
        events,
        sink.clone(),
        Arc::new(OfflineQueue::in_memory(100)),
    );
    orchestrator.start().await.unwrap();
    orchestrator.start_presenter();
    let supervisor = orchestrator.supervisor().unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while supervisor.state() != ConnectionState::Connected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("never connected");

    for i in 0..50u16 {
        let packet = PacketBuilder::new(70 + i % 5).contact(true).build();
        assert!(transport.notify_heart_rate(packet));
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    let dropped_at = tokio::time::Instant::now();
    assert!(transport.drop_link("strap out of range"));

    tokio::time::timeout(Duration::from_secs(10), async {
        while transport.connect_attempts().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("no reconnect attempt");

    // The first fast retry, not one held back by the sink
    let retry_after = transport.connect_attempts()[1] - dropped_at;
    assert!(retry_after >= Duration::from_millis(500), "{:?}", retry_after);
    assert!(retry_after < Duration::from_secs(1), "{:?}", retry_after);

    let stats = orchestrator.pipeline_stats().unwrap().snapshot();
    assert_eq!(stats.received, 50);
    assert!(stats.queued > 0);
    assert!(sink.delivered.lock().len() < 50);

    let exit_code = orchestrator.shutdown().await.unwrap();
    assert_eq!(exit_code, 0);
    assert_eq!(
        orchestrator.get_component_state("pipeline"),
        Some(ComponentState::Stopped)
    );
}

#[tokio::test]
async fn test_shutdown_releases_link_and_stops_components() {
    let (mut orchestrator, transport, _sink) = create_orchestrator();
    orchestrator.start().await.unwrap();
    let mut output = orchestrator.take_output().unwrap();
    wait_until_connected(&mut output).await;

    let handle = transport.active_handle().unwrap();
    let exit_code = orchestrator.shutdown().await.unwrap();

    assert_eq!(exit_code, 0);
    assert!(transport.active_handle().is_none());
    assert!(transport.disconnect_calls().contains(&handle));
    assert!(orchestrator.cancellation_token().is_cancelled());

    for component in ["supervisor", "pipeline"] {
        assert_eq!(
            orchestrator.get_component_state(component),
            Some(ComponentState::Stopped)
        );
    }
}

#[tokio::test]
async fn test_run_returns_after_trigger() {
    let (mut orchestrator, _transport, _sink) = create_orchestrator();
    orchestrator.start().await.unwrap();
    let trigger = orchestrator.shutdown_trigger().unwrap();

    trigger.send(ShutdownReason::UserRequest).unwrap();
    let exit_code = tokio::time::timeout(Duration::from_secs(5), orchestrator.run())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(exit_code, 0);
    assert_eq!(
        orchestrator.get_component_state("presenter"),
        Some(ComponentState::Stopped)
    );
}

#[tokio::test]
async fn test_component_state_transitions() {
    let (orchestrator, _transport, _sink) = create_orchestrator();
    let component = "test_component";

    assert_eq!(orchestrator.get_component_state(component), None);

    for state in [
        ComponentState::Starting,
        ComponentState::Running,
        ComponentState::Stopping,
        ComponentState::Stopped,
    ] {
        orchestrator.set_component_state(component, state);
        assert_eq!(orchestrator.get_component_state(component), Some(state));
    }

    orchestrator.set_component_state("other", ComponentState::Failed);
    assert_eq!(orchestrator.get_all_component_states().len(), 2);
}

#[test]
fn test_shutdown_reason_debug_formatting() {
    let reasons = vec![
        ShutdownReason::Signal("SIGTERM".to_string()),
        ShutdownReason::Error("Test error".to_string()),
        ShutdownReason::UserRequest,
    ];

    for reason in reasons {
        let debug_str = format!("{:?}", reason);
        match reason {
            ShutdownReason::Signal(ref sig) => assert!(debug_str.contains(sig)),
            ShutdownReason::Error(ref msg) => assert!(debug_str.contains(msg)),
            ShutdownReason::UserRequest => assert!(debug_str.contains("UserRequest")),
        }
    }
}
