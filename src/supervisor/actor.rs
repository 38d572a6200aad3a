use super::{ConnectionState, SupervisorCommand, SupervisorHandle, SupervisorSettings};
use crate::error::TransportError;
use crate::events::{EventBus, MonitorEvent};
use crate::protocol::{decode, decode_battery_level};
use crate::reading::Reading;
use crate::recovery::ReconnectBackoff;
use crate::transport::{
    Characteristic, ConnectionHandle, DiscoveredPeer, Transport, TransportEvent,
};
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

const COMMAND_CHANNEL_CAPACITY: usize = 32;

type ScanOutcome = Result<Vec<DiscoveredPeer>, TransportError>;

/// Resolves at `deadline`, or never when no timer is armed
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Connect, discover services and subscribe to heart-rate notifications
async fn establish(
    transport: &dyn Transport,
    peer_id: &str,
) -> Result<ConnectionHandle, TransportError> {
    let handle = transport.connect(peer_id).await?;
    debug!("Connected to {} (handle {}), discovering services", peer_id, handle);

    let setup = async {
        transport.discover_services(handle).await?;
        transport
            .subscribe(handle, Characteristic::HeartRateMeasurement)
            .await
    }
    .await;

    if let Err(e) = setup {
        if let Err(release) = transport.disconnect(handle).await {
            debug!("Failed to release handle {}: {}", handle, release);
        }
        return Err(e);
    }
    Ok(handle)
}

/// Actor owning the peripheral connection lifecycle
pub struct ConnectionSupervisor {
    settings: SupervisorSettings,
    transport: Arc<dyn Transport>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    commands: mpsc::Receiver<SupervisorCommand>,
    bus: EventBus,
    cancel: CancellationToken,
    shared_state: Arc<RwLock<ConnectionState>>,

    state: ConnectionState,
    backoff: ReconnectBackoff,
    handle: Option<ConnectionHandle>,
    battery_level: Option<u8>,
    radio_on: bool,
    last_data_at: Instant,
    stale_reported: bool,

    reconnect_at: Option<Instant>,
    watchdog_at: Option<Instant>,
    battery_at: Option<Instant>,

    discovering: bool,
    scan_tx: mpsc::UnboundedSender<ScanOutcome>,
    scan_rx: mpsc::UnboundedReceiver<ScanOutcome>,
}

impl ConnectionSupervisor {
    /// Start the actor; it connects to the configured peer straight away
    pub fn spawn(
        settings: SupervisorSettings,
        transport: Arc<dyn Transport>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        bus: EventBus,
        cancel: CancellationToken,
    ) -> (SupervisorHandle, JoinHandle<()>) {
        let (command_tx, commands) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let shared_state = Arc::new(RwLock::new(ConnectionState::Idle));
        let (scan_tx, scan_rx) = mpsc::unbounded_channel();

        let supervisor = Self {
            backoff: ReconnectBackoff::new(settings.reconnect.clone()),
            settings,
            transport,
            transport_events,
            commands,
            bus,
            cancel,
            shared_state: Arc::clone(&shared_state),
            state: ConnectionState::Idle,
            handle: None,
            battery_level: None,
            radio_on: true,
            last_data_at: Instant::now(),
            stale_reported: false,
            reconnect_at: None,
            watchdog_at: None,
            battery_at: None,
            discovering: false,
            scan_tx,
            scan_rx,
        };

        let task = tokio::spawn(supervisor.run());
        (SupervisorHandle::new(command_tx, shared_state), task)
    }

    async fn run(mut self) {
        info!(
            "Connection supervisor started on {} transport (peer: {})",
            self.transport.transport_name(),
            self.settings.peer_id.as_deref().unwrap_or("none")
        );

        self.connect_now().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("Supervisor cancelled");
                    break;
                }
                command = self.commands.recv() => match command {
                    Some(SupervisorCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                event = self.transport_events.recv() => match event {
                    Some(event) => self.handle_transport_event(event).await,
                    None => {
                        warn!("Transport event stream closed");
                        break;
                    }
                },
                Some(outcome) = self.scan_rx.recv() => self.finish_discovery(outcome).await,
                _ = wait_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.connect_now().await;
                }
                _ = wait_until(self.watchdog_at) => self.check_watchdog().await,
                _ = wait_until(self.battery_at) => self.poll_battery().await,
            }
        }

        self.teardown().await;
        self.reconnect_at = None;
        self.set_state(ConnectionState::Idle).await;
        info!("Connection supervisor stopped");
    }

    async fn handle_command(&mut self, command: SupervisorCommand) {
        debug!("Supervisor command: {:?}", command);
        match command {
            SupervisorCommand::ForceReconnect => self.force_reconnect().await,
            SupervisorCommand::RadioChanged { powered } => self.on_radio_changed(powered).await,
            SupervisorCommand::StartDiscovery { duration } => self.start_discovery(duration).await,
            SupervisorCommand::ConnectTo { peer_id } => {
                info!("Switching peer to {}", peer_id);
                self.settings.peer_id = Some(peer_id);
                self.release_for_restart().await;
                self.backoff.reset();
                self.reconnect_at = None;
                self.connect_now().await;
            }
            SupervisorCommand::Shutdown => {}
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Notification {
                handle,
                characteristic,
                value,
            } => {
                if self.handle != Some(handle) {
                    trace!("Ignoring notification from stale handle {}", handle);
                    return;
                }
                match characteristic {
                    Characteristic::HeartRateMeasurement => self.on_heart_rate(&value).await,
                    Characteristic::BatteryLevel => match decode_battery_level(&value) {
                        Ok(level) => self.record_battery(level).await,
                        Err(e) => debug!("Dropping battery notification: {}", e),
                    },
                }
            }
            TransportEvent::Disconnected { handle, reason } => {
                if self.handle != Some(handle) {
                    trace!("Ignoring disconnect of stale handle {}", handle);
                    return;
                }
                warn!("Link to peer lost: {}", reason);
                self.teardown().await;
                self.set_state(ConnectionState::Disconnected).await;
                self.schedule_reconnect();
            }
            TransportEvent::RadioStateChanged { powered } => self.on_radio_changed(powered).await,
        }
    }

    /// Attempt a direct connection to the configured peer
    async fn connect_now(&mut self) {
        let Some(peer_id) = self.settings.peer_id.clone() else {
            debug!("No peer configured, waiting for discovery");
            return;
        };
        if !self.radio_on || self.handle.is_some() {
            return;
        }

        self.set_state(ConnectionState::Connecting).await;

        let transport = Arc::clone(&self.transport);
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = establish(transport.as_ref(), &peer_id) => result,
        };

        match result {
            Ok(handle) => self.on_connected(&peer_id, handle).await,
            Err(TransportError::RadioOff) => {
                warn!("Radio is off, waiting for it to come back");
                self.radio_on = false;
                self.publish(MonitorEvent::RadioStateChanged { powered: false })
                    .await;
                self.enter_radio_off().await;
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", peer_id, e);
                self.set_state(ConnectionState::Disconnected).await;
                self.schedule_reconnect();
            }
        }
    }

    async fn on_connected(&mut self, peer_id: &str, handle: ConnectionHandle) {
        info!("Subscribed to heart-rate notifications from {}", peer_id);
        self.handle = Some(handle);
        self.backoff.reset();

        // Every new link starts its own silence episode
        let now = Instant::now();
        self.last_data_at = now;
        self.stale_reported = false;
        self.watchdog_at = Some(now + self.settings.watchdog_interval);

        self.set_state(ConnectionState::Connected).await;
        self.poll_battery().await;
    }

    /// Stop timers tied to the link and release the transport handle
    async fn teardown(&mut self) {
        self.watchdog_at = None;
        self.battery_at = None;

        if let Some(handle) = self.handle.take() {
            debug!("Releasing connection handle {}", handle);
            if let Err(e) = self.transport.disconnect(handle).await {
                warn!("Failed to release handle {}: {}", handle, e);
            }
        }
    }

    /// Tear down a live link, reporting the disconnect before any new attempt
    async fn release_for_restart(&mut self) {
        let was_connected = self.state.is_connected();
        self.teardown().await;
        if was_connected {
            self.set_state(ConnectionState::Disconnected).await;
        }
    }

    fn schedule_reconnect(&mut self) {
        let delay = self.backoff.next_delay();
        self.reconnect_at = Some(Instant::now() + delay);
    }

    async fn force_reconnect(&mut self) {
        info!("Forcing reconnect");
        self.release_for_restart().await;
        self.backoff.reset();
        self.reconnect_at = None;

        if !self.radio_on || self.settings.peer_id.is_none() {
            return;
        }
        self.set_state(ConnectionState::Disconnected).await;
        self.reconnect_at = Some(Instant::now() + self.settings.forced_reconnect_delay);
    }

    async fn on_radio_changed(&mut self, powered: bool) {
        if powered == self.radio_on {
            trace!("Radio already {}", if powered { "on" } else { "off" });
            return;
        }
        self.radio_on = powered;
        self.publish(MonitorEvent::RadioStateChanged { powered }).await;

        if powered {
            if self.settings.peer_id.is_some() {
                self.connect_now().await;
            } else {
                self.set_state(ConnectionState::Idle).await;
            }
        } else {
            self.enter_radio_off().await;
        }
    }

    async fn enter_radio_off(&mut self) {
        self.teardown().await;
        self.reconnect_at = None;
        self.set_state(ConnectionState::RadioOff).await;
    }

    async fn on_heart_rate(&mut self, value: &[u8]) {
        let measurement = match decode(value) {
            Ok(measurement) => measurement,
            Err(e) => {
                debug!("Dropping malformed heart-rate packet: {}", e);
                return;
            }
        };

        self.last_data_at = Instant::now();
        if self.stale_reported {
            info!("Heart-rate data resumed");
            self.stale_reported = false;
        }

        let device_id = self.settings.peer_id.clone().unwrap_or_default();
        let reading = Reading::from_measurement(measurement, device_id, self.battery_level, Utc::now());
        self.publish(MonitorEvent::HeartRateReceived { reading }).await;
    }

    async fn check_watchdog(&mut self) {
        self.watchdog_at = None;
        if !self.state.is_connected() {
            return;
        }

        let now = Instant::now();
        let silent_for = now.saturating_duration_since(self.last_data_at);
        if silent_for >= self.settings.stale_timeout {
            if !self.stale_reported {
                self.stale_reported = true;
                self.publish(MonitorEvent::DataStale { silent_for }).await;
                self.force_reconnect().await;
                return;
            }
            trace!("Link still silent after {:?}", silent_for);
        }

        self.watchdog_at = Some(now + self.settings.watchdog_interval);
    }

    async fn poll_battery(&mut self) {
        self.battery_at = None;
        let Some(handle) = self.handle else {
            return;
        };

        match self.transport.read(handle, Characteristic::BatteryLevel).await {
            Ok(value) => match decode_battery_level(&value) {
                Ok(level) => self.record_battery(level).await,
                Err(e) => debug!("Ignoring malformed battery value: {}", e),
            },
            Err(e) => warn!("Battery read failed: {}", e),
        }

        if self.handle == Some(handle) {
            self.battery_at = Some(Instant::now() + self.settings.battery_interval);
        }
    }

    async fn record_battery(&mut self, level: u8) {
        debug!("Battery level {}%", level);
        self.battery_level = Some(level);
        self.publish(MonitorEvent::BatteryLevelReceived { level }).await;
    }

    async fn start_discovery(&mut self, duration: Duration) {
        if self.discovering {
            warn!("Discovery already running");
            return;
        }
        if !self.radio_on {
            warn!("Cannot scan while the radio is off");
            return;
        }

        info!("Starting discovery for {:?}", duration);
        self.discovering = true;
        self.publish(MonitorEvent::DiscoveryStateChanged { active: true }).await;
        if self.state == ConnectionState::Idle {
            self.set_state(ConnectionState::Scanning).await;
        }

        let transport = Arc::clone(&self.transport);
        let results = self.scan_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = transport.scan(duration) => outcome,
            };
            let _ = results.send(outcome);
        });
    }

    async fn finish_discovery(&mut self, outcome: ScanOutcome) {
        self.discovering = false;
        match outcome {
            Ok(peers) => {
                info!("Discovery found {} peer(s)", peers.len());
                for peer in peers {
                    self.publish(MonitorEvent::PeerDiscovered { peer }).await;
                }
            }
            Err(e) => warn!("Discovery failed: {}", e),
        }

        self.publish(MonitorEvent::DiscoveryStateChanged { active: false }).await;
        if self.state == ConnectionState::Scanning {
            self.set_state(ConnectionState::Idle).await;
        }
    }

    async fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        debug!("Connection state {} -> {}", self.state, state);
        self.state = state;
        *self.shared_state.write() = state;
        self.publish(MonitorEvent::ConnectionStateChanged {
            state,
            timestamp: SystemTime::now(),
        })
        .await;
    }

    async fn publish(&mut self, event: MonitorEvent) {
        if let Err(e) = self.bus.publish(event).await {
            debug!("Supervisor event dropped: {}", e);
        }
    }
}
