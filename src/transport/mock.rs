use super::{Characteristic, ConnectionHandle, DiscoveredPeer, Transport, TransportEvent};
use crate::error::TransportError;
use crate::protocol::PacketBuilder;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

#[derive(Debug)]
struct MockState {
    radio_on: bool,
    peer_available: bool,
    connect_failures_remaining: u32,
    next_handle: ConnectionHandle,
    active: Option<ConnectionHandle>,
    subscribed: bool,
    battery_level: u8,
    connect_attempts: Vec<Instant>,
    disconnect_calls: Vec<ConnectionHandle>,
    battery_reads: u32,
    scan_results: Vec<DiscoveredPeer>,
}

/// Scriptable in-process transport standing in for a radio stack
///
/// Used by tests to drive the supervisor through radio loss, failed
/// connects and silent links, and by `--simulate` to run without hardware.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl MockTransport {
    /// Create a transport and the event stream the supervisor consumes
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let transport = Self {
            state: Arc::new(Mutex::new(MockState {
                radio_on: true,
                peer_available: true,
                connect_failures_remaining: 0,
                next_handle: 1,
                active: None,
                subscribed: false,
                battery_level: 100,
                connect_attempts: Vec::new(),
                disconnect_calls: Vec::new(),
                battery_reads: 0,
                scan_results: Vec::new(),
            })),
            events,
        };
        (transport, receiver)
    }

    /// Make the next `count` connection attempts fail
    pub fn fail_next_connects(&self, count: u32) {
        self.state.lock().connect_failures_remaining = count;
    }

    pub fn set_peer_available(&self, available: bool) {
        self.state.lock().peer_available = available;
    }

    pub fn set_battery_level(&self, level: u8) {
        self.state.lock().battery_level = level;
    }

    pub fn set_scan_results(&self, peers: Vec<DiscoveredPeer>) {
        self.state.lock().scan_results = peers;
    }

    /// Toggle the local radio; switching off drops any link
    pub fn set_radio(&self, powered: bool) {
        {
            let mut state = self.state.lock();
            state.radio_on = powered;
            if !powered {
                state.active = None;
                state.subscribed = false;
            }
        }
        let _ = self.events.send(TransportEvent::RadioStateChanged { powered });
    }

    /// Deliver a heart-rate notification on the live, subscribed link
    pub fn notify_heart_rate(&self, packet: Vec<u8>) -> bool {
        let handle = {
            let state = self.state.lock();
            match state.active {
                Some(handle) if state.subscribed => handle,
                _ => return false,
            }
        };
        self.events
            .send(TransportEvent::Notification {
                handle,
                characteristic: Characteristic::HeartRateMeasurement,
                value: packet,
            })
            .is_ok()
    }

    /// Simulate the peripheral dropping the link
    pub fn drop_link(&self, reason: &str) -> bool {
        let handle = {
            let mut state = self.state.lock();
            state.subscribed = false;
            state.active.take()
        };
        match handle {
            Some(handle) => self
                .events
                .send(TransportEvent::Disconnected {
                    handle,
                    reason: reason.to_string(),
                })
                .is_ok(),
            None => false,
        }
    }

    /// Push a raw event onto the stream, bypassing the link state
    pub fn inject_event(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn active_handle(&self) -> Option<ConnectionHandle> {
        self.state.lock().active
    }

    pub fn is_streaming(&self) -> bool {
        let state = self.state.lock();
        state.active.is_some() && state.subscribed
    }

    /// Instants at which `connect` was called
    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.state.lock().connect_attempts.clone()
    }

    pub fn disconnect_calls(&self) -> Vec<ConnectionHandle> {
        self.state.lock().disconnect_calls.clone()
    }

    pub fn battery_reads(&self) -> u32 {
        self.state.lock().battery_reads
    }

    fn check_handle(&self, handle: ConnectionHandle) -> Result<(), TransportError> {
        let state = self.state.lock();
        if !state.radio_on {
            return Err(TransportError::RadioOff);
        }
        if state.active != Some(handle) {
            return Err(TransportError::StaleHandle { handle });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, peer_id: &str) -> Result<ConnectionHandle, TransportError> {
        let mut state = self.state.lock();
        state.connect_attempts.push(Instant::now());

        if !state.radio_on {
            return Err(TransportError::RadioOff);
        }
        if state.connect_failures_remaining > 0 {
            state.connect_failures_remaining -= 1;
            return Err(TransportError::ConnectFailed {
                peer_id: peer_id.to_string(),
                details: "simulated connection failure".to_string(),
            });
        }
        if !state.peer_available {
            return Err(TransportError::PeerNotFound {
                peer_id: peer_id.to_string(),
            });
        }

        let handle = state.next_handle;
        state.next_handle += 1;
        state.active = Some(handle);
        state.subscribed = false;
        debug!("Mock transport connected to {} (handle {})", peer_id, handle);
        Ok(handle)
    }

    async fn disconnect(&self, handle: ConnectionHandle) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.disconnect_calls.push(handle);
        if state.active == Some(handle) {
            state.active = None;
            state.subscribed = false;
        }
        Ok(())
    }

    async fn discover_services(&self, handle: ConnectionHandle) -> Result<(), TransportError> {
        self.check_handle(handle)
    }

    async fn subscribe(
        &self,
        handle: ConnectionHandle,
        characteristic: Characteristic,
    ) -> Result<(), TransportError> {
        self.check_handle(handle)?;
        if characteristic == Characteristic::HeartRateMeasurement {
            self.state.lock().subscribed = true;
        }
        Ok(())
    }

    async fn read(
        &self,
        handle: ConnectionHandle,
        characteristic: Characteristic,
    ) -> Result<Vec<u8>, TransportError> {
        self.check_handle(handle)?;
        match characteristic {
            Characteristic::BatteryLevel => {
                let mut state = self.state.lock();
                state.battery_reads += 1;
                Ok(vec![state.battery_level])
            }
            Characteristic::HeartRateMeasurement => Err(TransportError::ReadFailed {
                characteristic: characteristic.to_string(),
                details: "characteristic is notify-only".to_string(),
            }),
        }
    }

    async fn scan(&self, duration: Duration) -> Result<Vec<DiscoveredPeer>, TransportError> {
        if !self.state.lock().radio_on {
            return Err(TransportError::RadioOff);
        }
        tokio::time::sleep(duration).await;
        Ok(self.state.lock().scan_results.clone())
    }

    fn transport_name(&self) -> &str {
        "mock"
    }
}

/// Synthetic 1 Hz heart-rate source feeding a [`MockTransport`]
pub struct SimulatedStrap {
    transport: MockTransport,
    base_bpm: u16,
    interval: Duration,
    seed: u32,
}

impl SimulatedStrap {
    pub fn new(transport: MockTransport, base_bpm: u16) -> Self {
        Self {
            transport,
            base_bpm,
            interval: Duration::from_secs(1),
            seed: 0x2545_f491,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn next_jitter(&mut self) -> i32 {
        // xorshift32
        self.seed ^= self.seed << 13;
        self.seed ^= self.seed >> 17;
        self.seed ^= self.seed << 5;
        (self.seed % 7) as i32 - 3
    }

    /// Emit packets while a link is up, until cancelled
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Simulated strap started at ~{} BPM", self.base_bpm);
        let mut ticker = tokio::time::interval(self.interval);
        let mut tick: u64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    tick += 1;
                    let drift = ((tick as f64 / 30.0).sin() * 8.0) as i32;
                    let bpm = (i32::from(self.base_bpm) + drift + self.next_jitter()).clamp(30, 220) as u16;
                    let rr_ms = (60_000 / u32::from(bpm.max(1))) as u16;
                    let packet = PacketBuilder::new(bpm)
                        .contact(true)
                        .rr_millis(&[rr_ms])
                        .build();
                    if self.transport.notify_heart_rate(packet) {
                        trace!("Simulated strap sent {} BPM", bpm);
                    }
                }
            }
        }

        info!("Simulated strap stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode;

    #[tokio::test]
    async fn test_mock_connect_subscribe_notify() {
        let (transport, mut events) = MockTransport::new();
        let handle = transport.connect("strap").await.unwrap();
        transport.discover_services(handle).await.unwrap();
        assert!(!transport.notify_heart_rate(vec![0, 60]));

        transport
            .subscribe(handle, Characteristic::HeartRateMeasurement)
            .await
            .unwrap();
        assert!(transport.notify_heart_rate(vec![0, 60]));

        match events.recv().await.unwrap() {
            TransportEvent::Notification { handle: h, value, .. } => {
                assert_eq!(h, handle);
                assert_eq!(decode(&value).unwrap().heart_rate, 60);
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mock_failures() {
        let (transport, _events) = MockTransport::new();
        transport.fail_next_connects(1);
        assert!(matches!(
            transport.connect("strap").await,
            Err(TransportError::ConnectFailed { .. })
        ));

        transport.set_radio(false);
        assert_eq!(transport.connect("strap").await, Err(TransportError::RadioOff));
        assert_eq!(transport.connect_attempts().len(), 2);

        transport.set_radio(true);
        let handle = transport.connect("strap").await.unwrap();
        transport.disconnect(handle).await.unwrap();
        assert_eq!(
            transport.read(handle, Characteristic::BatteryLevel).await,
            Err(TransportError::StaleHandle { handle })
        );
    }

    #[tokio::test]
    async fn test_battery_read() {
        let (transport, _events) = MockTransport::new();
        transport.set_battery_level(42);
        let handle = transport.connect("strap").await.unwrap();
        assert_eq!(
            transport.read(handle, Characteristic::BatteryLevel).await,
            Ok(vec![42])
        );
        assert_eq!(transport.battery_reads(), 1);
    }
}
