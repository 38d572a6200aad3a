//! Radio transport seam between the supervisor and a BLE-class stack.

mod mock;

pub use mock::{MockTransport, SimulatedStrap};

use crate::error::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Opaque identifier of one established connection
pub type ConnectionHandle = u64;

/// GATT characteristics the monitor uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Characteristic {
    HeartRateMeasurement,
    BatteryLevel,
}

impl Characteristic {
    pub fn uuid(&self) -> &'static str {
        match self {
            Characteristic::HeartRateMeasurement => "00002a37-0000-1000-8000-00805f9b34fb",
            Characteristic::BatteryLevel => "00002a19-0000-1000-8000-00805f9b34fb",
        }
    }
}

impl std::fmt::Display for Characteristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Characteristic::HeartRateMeasurement => write!(f, "heart_rate_measurement"),
            Characteristic::BatteryLevel => write!(f, "battery_level"),
        }
    }
}

/// A peripheral found while scanning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredPeer {
    pub id: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

/// Asynchronous notifications from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A subscribed characteristic changed value
    Notification {
        handle: ConnectionHandle,
        characteristic: Characteristic,
        value: Vec<u8>,
    },
    /// The link dropped without being asked to
    Disconnected {
        handle: ConnectionHandle,
        reason: String,
    },
    /// The local radio adapter was switched on or off
    RadioStateChanged { powered: bool },
}

/// Connection primitives of the platform radio stack
///
/// Notifications, peer-initiated disconnects and radio state changes are
/// delivered on the event channel handed to the supervisor alongside the
/// transport, so byte delivery looks the same on every platform.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, peer_id: &str) -> Result<ConnectionHandle, TransportError>;

    async fn disconnect(&self, handle: ConnectionHandle) -> Result<(), TransportError>;

    async fn discover_services(&self, handle: ConnectionHandle) -> Result<(), TransportError>;

    async fn subscribe(
        &self,
        handle: ConnectionHandle,
        characteristic: Characteristic,
    ) -> Result<(), TransportError>;

    async fn read(
        &self,
        handle: ConnectionHandle,
        characteristic: Characteristic,
    ) -> Result<Vec<u8>, TransportError>;

    /// Look for nearby heart-rate peripherals for up to `duration`
    async fn scan(&self, duration: Duration) -> Result<Vec<DiscoveredPeer>, TransportError>;

    /// Name used in logs
    fn transport_name(&self) -> &str;
}
