use super::{ComponentState, MonitorOrchestrator};
use crate::error::{HeartlinkError, Result};
use crate::events::{EventBus, EventReceiver, MonitorEvent};
use crate::pipeline::{PipelineSettings, ReadingPipeline};
use crate::supervisor::{ConnectionSupervisor, SupervisorSettings};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

impl MonitorOrchestrator {
    /// Start the pipeline and the connection supervisor
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting heart-rate monitor");

        let transport_events = self
            .transport_events
            .take()
            .ok_or_else(|| HeartlinkError::system("Monitor already started"))?;

        let capacity = self.config.system.event_bus_capacity;
        let (supervisor_bus, supervisor_events) = EventBus::new(capacity);
        let (output_bus, output_events) = EventBus::new(capacity);

        // The supervisor publishes as soon as it spawns, so the pipeline goes first
        self.set_component_state("pipeline", ComponentState::Starting);
        let pipeline = ReadingPipeline::new(
            PipelineSettings::from_config(&self.config),
            Arc::clone(&self.sink),
            Arc::clone(&self.queue),
            output_bus,
        );
        self.pipeline_stats = Some(pipeline.stats());
        let pipeline_cancel = self.cancellation_token.child_token();
        self.pipeline_task = Some(tokio::spawn(
            pipeline.run(supervisor_events, pipeline_cancel),
        ));
        self.output = Some(output_events);
        self.set_component_state("pipeline", ComponentState::Running);

        self.set_component_state("supervisor", ComponentState::Starting);
        let settings = SupervisorSettings::from_config(&self.config);
        if settings.peer_id.is_none() {
            warn!("No device.peer_id configured; waiting for discovery");
        }
        let (handle, task) = ConnectionSupervisor::spawn(
            settings,
            Arc::clone(&self.transport),
            transport_events,
            supervisor_bus,
            self.cancellation_token.child_token(),
        );
        self.supervisor = Some(handle);
        self.supervisor_task = Some(task);
        self.set_component_state("supervisor", ComponentState::Running);

        info!("Heart-rate monitor started");
        Ok(())
    }

    /// Log pipeline output unless a caller took it with `take_output`
    pub(super) fn start_presenter(&mut self) {
        let Some(events) = self.output.take() else {
            debug!("Pipeline output taken by caller, not starting presenter");
            return;
        };

        self.set_component_state("presenter", ComponentState::Running);
        let cancel = self.cancellation_token.child_token();
        self.presenter_task = Some(tokio::spawn(present_events(events, cancel)));
    }
}

/// Stand-in for the notification collaborator: reports pipeline output in the log
async fn present_events(mut events: EventReceiver, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match &event {
            MonitorEvent::AlertRaised { alert } if alert.wants_attention => {
                error!(kind = alert.kind.as_str(), "ALERT: {}", alert.message);
            }
            MonitorEvent::AlertRaised { alert } => {
                warn!(kind = alert.kind.as_str(), "Alert: {}", alert.message);
            }
            MonitorEvent::ReadingClassified { .. } | MonitorEvent::HeartRateReceived { .. } => {
                debug!("{}", event.description());
            }
            _ => info!("{}", event.description()),
        }
    }
    debug!("Presenter stopped");
}
