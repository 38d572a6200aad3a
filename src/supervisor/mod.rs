//! Connection supervision for the heart-rate peripheral.
//!
//! The supervisor runs as a single actor task that owns the transport
//! handle, the reconnect schedule, the staleness watchdog and the battery
//! poll timer. Collaborators talk to it through a [`SupervisorHandle`] and
//! observe it through the [`EventBus`](crate::events::EventBus).

mod actor;
mod state;


pub use actor::ConnectionSupervisor;
pub use state::ConnectionState;

use crate::config::HeartlinkConfig;
use crate::error::{HeartlinkError, Result};
use crate::recovery::ReconnectPolicy;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Battery characteristic poll period once subscribed
pub const DEFAULT_BATTERY_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Silence after which the link is considered stale
pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_secs(10);

/// Timing and identity the supervisor runs with
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorSettings {
    /// Peer to connect to directly; `None` waits for discovery
    pub peer_id: Option<String>,
    pub reconnect: ReconnectPolicy,
    /// Delay before reconnecting after a forced teardown
    pub forced_reconnect_delay: Duration,
    pub stale_timeout: Duration,
    pub watchdog_interval: Duration,
    pub battery_interval: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            peer_id: None,
            reconnect: ReconnectPolicy::default(),
            forced_reconnect_delay: Duration::from_millis(500),
            stale_timeout: DEFAULT_STALE_TIMEOUT,
            watchdog_interval: DEFAULT_STALE_TIMEOUT / 2,
            battery_interval: DEFAULT_BATTERY_INTERVAL,
        }
    }
}

impl SupervisorSettings {
    pub fn from_config(config: &HeartlinkConfig) -> Self {
        let connection = &config.connection;
        Self {
            peer_id: config.device.peer_id.clone(),
            reconnect: ReconnectPolicy {
                fast_retry_delay: Duration::from_millis(connection.fast_retry_delay_ms),
                fast_retries: connection.fast_retry_count,
                base_delay: Duration::from_millis(connection.backoff_base_ms),
                max_delay: Duration::from_millis(connection.backoff_max_ms),
                ..ReconnectPolicy::default()
            },
            forced_reconnect_delay: Duration::from_millis(connection.forced_reconnect_delay_ms),
            stale_timeout: Duration::from_secs(connection.stale_timeout_secs),
            watchdog_interval: Duration::from_secs(connection.watchdog_interval_secs),
            battery_interval: Duration::from_secs(config.device.battery_poll_interval_secs),
        }
    }
}

/// Requests accepted by the supervisor actor
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorCommand {
    /// Tear down and reconnect after the forced delay, resetting backoff
    ForceReconnect,
    /// External radio adapter notification
    RadioChanged { powered: bool },
    /// Scan for peers for the given duration
    StartDiscovery { duration: Duration },
    /// Adopt a new peer identifier and connect to it
    ConnectTo { peer_id: String },
    Shutdown,
}

/// Cloneable command handle for a running supervisor
#[derive(Clone)]
pub struct SupervisorHandle {
    commands: mpsc::Sender<SupervisorCommand>,
    state: Arc<RwLock<ConnectionState>>,
}

impl SupervisorHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<SupervisorCommand>,
        state: Arc<RwLock<ConnectionState>>,
    ) -> Self {
        Self { commands, state }
    }

    /// Last state the supervisor published
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub async fn force_reconnect(&self) -> Result<()> {
        self.send(SupervisorCommand::ForceReconnect).await
    }

    pub async fn radio_changed(&self, powered: bool) -> Result<()> {
        self.send(SupervisorCommand::RadioChanged { powered }).await
    }

    pub async fn start_discovery(&self, duration: Duration) -> Result<()> {
        self.send(SupervisorCommand::StartDiscovery { duration }).await
    }

    pub async fn connect_to(&self, peer_id: impl Into<String>) -> Result<()> {
        self.send(SupervisorCommand::ConnectTo {
            peer_id: peer_id.into(),
        })
        .await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(SupervisorCommand::Shutdown).await
    }

    async fn send(&self, command: SupervisorCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HeartlinkError::component("supervisor", "actor is not running"))
    }
}
