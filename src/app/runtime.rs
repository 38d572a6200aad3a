use super::{MonitorOrchestrator, ShutdownReason};
use crate::error::{HeartlinkError, Result};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info};

impl MonitorOrchestrator {
    /// Run until a shutdown signal arrives, then shut down gracefully
    pub async fn run(&mut self) -> Result<i32> {
        info!("Heart-rate monitor is running");
        self.start_presenter();

        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| HeartlinkError::system("Shutdown receiver already taken"))?;

        match self.shutdown_sender.take() {
            Some(sender) => self.setup_signal_handlers(sender),
            None => debug!("Shutdown trigger held by caller, not installing signal handlers"),
        }

        let shutdown_reason = shutdown_receiver
            .await
            .map_err(|_| HeartlinkError::system("Shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {:?}", shutdown_reason);

        let exit_code = self.shutdown().await?;

        info!("Heart-rate monitor shutdown complete");
        Ok(exit_code)
    }

    /// Hand out the shutdown trigger; `run` then installs no signal handlers
    pub fn shutdown_trigger(&mut self) -> Option<oneshot::Sender<ShutdownReason>> {
        self.shutdown_sender.take()
    }

    fn setup_signal_handlers(&self, shutdown_sender: oneshot::Sender<ShutdownReason>) {
        let shutdown_sender = Arc::new(Mutex::new(Some(shutdown_sender)));

        // SIGTERM from systemd or a container runtime
        #[cfg(unix)]
        {
            let sender = Arc::clone(&shutdown_sender);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};

                let mut sigterm = match signal(SignalKind::terminate()) {
                    Ok(sigterm) => sigterm,
                    Err(e) => {
                        error!("Failed to register SIGTERM handler: {}", e);
                        return;
                    }
                };
                if sigterm.recv().await.is_some() {
                    info!("Received SIGTERM signal");
                    if let Some(sender) = sender.lock().await.take() {
                        let _ = sender.send(ShutdownReason::Signal("SIGTERM".to_string()));
                    }
                }
            });
        }

        let sender = Arc::clone(&shutdown_sender);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                if let Some(sender) = sender.lock().await.take() {
                    let _ = sender.send(ShutdownReason::Signal("SIGINT".to_string()));
                }
            }
        });
    }
}
