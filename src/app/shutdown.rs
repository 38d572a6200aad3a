use super::{ComponentState, MonitorOrchestrator};
use crate::error::{HeartlinkError, Result};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info};

const STOP_TIMEOUT: Duration = Duration::from_secs(10);

impl MonitorOrchestrator {
    /// Perform graceful shutdown of all components
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        // Let the supervisor release the link itself before the token goes
        if let Some(supervisor) = self.supervisor.take() {
            if let Err(e) = supervisor.shutdown().await {
                debug!("Supervisor already stopped: {}", e);
            }
        }

        self.cancellation_token.cancel();

        let mut exit_code = 0;

        // Reverse dependency order: producer first, consumers last
        let supervisor_task = self.supervisor_task.take();
        if let Err(e) = self.stop_task("supervisor", supervisor_task).await {
            error!("Error stopping supervisor: {}", e);
            exit_code = 1;
        }

        let pipeline_task = self.pipeline_task.take();
        if let Err(e) = self.stop_task("pipeline", pipeline_task).await {
            error!("Error stopping pipeline: {}", e);
            exit_code = 1;
        }

        let presenter_task = self.presenter_task.take();
        if let Err(e) = self.stop_task("presenter", presenter_task).await {
            error!("Error stopping presenter: {}", e);
            exit_code = 1;
        }

        if let Some(stats) = &self.pipeline_stats {
            let stats = stats.snapshot();
            info!(
                received = stats.received,
                accepted = stats.accepted,
                rejected_noise = stats.rejected_noise,
                contact_lost = stats.contact_lost,
                sent = stats.sent,
                queued = stats.queued,
                flushed = stats.flushed,
                alerts = stats.alerts,
                "Final pipeline statistics"
            );
        }

        let pending = self.queue.count().await;
        if pending > 0 {
            info!("{} readings left in the offline queue", pending);
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    /// Wait for one component task to finish after cancellation
    async fn stop_task(&self, component: &str, task: Option<JoinHandle<()>>) -> Result<()> {
        let Some(task) = task else {
            return Ok(());
        };

        info!("Stopping {} component", component);
        self.set_component_state(component, ComponentState::Stopping);

        match timeout(STOP_TIMEOUT, task).await {
            Ok(Ok(())) => {
                self.set_component_state(component, ComponentState::Stopped);
                info!("{} component stopped", component);
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_component_state(component, ComponentState::Failed);
                Err(HeartlinkError::component(
                    component,
                    format!("task ended abnormally: {}", e),
                ))
            }
            Err(_) => {
                self.set_component_state(component, ComponentState::Failed);
                Err(HeartlinkError::component(component, "stop timeout"))
            }
        }
    }
}
