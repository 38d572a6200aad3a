use super::types::{ComponentState, ShutdownReason};
use crate::config::{HeartlinkConfig, SinkKind};
use crate::error::Result;
use crate::events::EventReceiver;
use crate::pipeline::PipelineStatsHandle;
use crate::queue::{FileQueueStore, OfflineQueue};
use crate::sink::{JsonLinesSink, LogSink, Sink};
use crate::supervisor::SupervisorHandle;
use crate::transport::{Transport, TransportEvent};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Owns every long-running part of the monitor and their lifecycles
pub struct MonitorOrchestrator {
    pub(super) config: HeartlinkConfig,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) transport_events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    pub(super) sink: Arc<dyn Sink>,
    pub(super) queue: Arc<OfflineQueue>,

    // Running components
    pub(super) supervisor: Option<SupervisorHandle>,
    pub(super) supervisor_task: Option<JoinHandle<()>>,
    pub(super) pipeline_task: Option<JoinHandle<()>>,
    pub(super) presenter_task: Option<JoinHandle<()>>,
    pub(super) pipeline_stats: Option<PipelineStatsHandle>,
    pub(super) output: Option<EventReceiver>,

    // Lifecycle management
    pub(super) component_states: Mutex<HashMap<String, ComponentState>>,
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl MonitorOrchestrator {
    /// Create an orchestrator with the sink and offline queue named in `config`
    pub fn new(
        config: HeartlinkConfig,
        transport: Arc<dyn Transport>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Result<Self> {
        let sink: Arc<dyn Sink> = match config.sink.kind {
            SinkKind::Log => Arc::new(LogSink),
            SinkKind::Jsonl => Arc::new(JsonLinesSink::new(&config.sink.path)),
        };
        if let Some(endpoint) = &config.sink.endpoint {
            info!("Upstream endpoint configured: {}", endpoint);
        }

        let queue = Arc::new(OfflineQueue::new(
            Arc::new(FileQueueStore::new(&config.queue.path)),
            config.queue.capacity,
        ));

        Ok(Self::with_components(
            config,
            transport,
            transport_events,
            sink,
            queue,
        ))
    }

    /// Create an orchestrator around explicit sink and queue instances
    pub fn with_components(
        config: HeartlinkConfig,
        transport: Arc<dyn Transport>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        sink: Arc<dyn Sink>,
        queue: Arc<OfflineQueue>,
    ) -> Self {
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();
        Self {
            config,
            transport,
            transport_events: Some(transport_events),
            sink,
            queue,
            supervisor: None,
            supervisor_task: None,
            pipeline_task: None,
            presenter_task: None,
            pipeline_stats: None,
            output: None,
            component_states: Mutex::new(HashMap::new()),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &HeartlinkConfig {
        &self.config
    }

    /// Command handle of the running supervisor
    pub fn supervisor(&self) -> Option<SupervisorHandle> {
        self.supervisor.clone()
    }

    pub fn pipeline_stats(&self) -> Option<PipelineStatsHandle> {
        self.pipeline_stats.clone()
    }

    pub fn queue(&self) -> Arc<OfflineQueue> {
        Arc::clone(&self.queue)
    }

    /// Token cancelled when the orchestrator shuts down
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Take the pipeline's output events instead of having them logged
    ///
    /// Must be called after `start` and before `run`.
    pub fn take_output(&mut self) -> Option<EventReceiver> {
        self.output.take()
    }

    pub fn set_component_state(&self, component: &str, state: ComponentState) {
        self.component_states
            .lock()
            .insert(component.to_string(), state);
        debug!("Component '{}' state changed to: {:?}", component, state);
    }

    pub fn get_component_state(&self, component: &str) -> Option<ComponentState> {
        self.component_states.lock().get(component).copied()
    }

    pub fn get_all_component_states(&self) -> HashMap<String, ComponentState> {
        self.component_states.lock().clone()
    }
}
