use crate::alert::Alert;
use crate::error::EventBusError;
use crate::quality::QualityVerdict;
use crate::reading::Reading;
use crate::supervisor::ConnectionState;
use crate::transport::DiscoveredPeer;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Events flowing from the supervisor to the pipeline, and from the
/// pipeline to whoever presents them
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// The supervisor moved to a new connection state
    ConnectionStateChanged {
        state: ConnectionState,
        timestamp: SystemTime,
    },
    /// A decoded reading arrived, annotated with the last battery level
    HeartRateReceived { reading: Reading },
    /// Battery characteristic was read
    BatteryLevelReceived { level: u8 },
    /// Discovery scanning started or stopped
    DiscoveryStateChanged { active: bool },
    /// A peer was found while scanning
    PeerDiscovered { peer: DiscoveredPeer },
    /// The local radio adapter was switched on or off
    RadioStateChanged { powered: bool },
    /// The watchdog saw no data for `silent_for` and forced a reconnect
    DataStale { silent_for: Duration },
    /// The pipeline classified a reading
    ReadingClassified {
        reading: Reading,
        verdict: QualityVerdict,
        effective_contact: bool,
    },
    /// An alert fired
    AlertRaised { alert: Alert },
    /// Number of readings waiting in the offline queue changed
    OfflineQueueChanged { count: usize },
}

impl MonitorEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            MonitorEvent::ConnectionStateChanged { state, .. } => {
                format!("Connection state: {}", state)
            }
            MonitorEvent::HeartRateReceived { reading } => {
                format!("Heart rate {} BPM from {}", reading.heart_rate, reading.device_id)
            }
            MonitorEvent::BatteryLevelReceived { level } => format!("Battery at {}%", level),
            MonitorEvent::DiscoveryStateChanged { active } => {
                format!("Discovery {}", if *active { "started" } else { "stopped" })
            }
            MonitorEvent::PeerDiscovered { peer } => format!(
                "Discovered {} ({})",
                peer.id,
                peer.name.as_deref().unwrap_or("unnamed")
            ),
            MonitorEvent::RadioStateChanged { powered } => {
                format!("Radio {}", if *powered { "on" } else { "off" })
            }
            MonitorEvent::DataStale { silent_for } => {
                format!("No data for {:?}", silent_for)
            }
            MonitorEvent::ReadingClassified { reading, verdict, .. } => format!(
                "{} BPM scored {:.2} ({})",
                reading.heart_rate, verdict.quality, verdict.reason
            ),
            MonitorEvent::AlertRaised { alert } => format!("Alert: {}", alert.message),
            MonitorEvent::OfflineQueueChanged { count } => {
                format!("{} reading(s) queued offline", count)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            MonitorEvent::ConnectionStateChanged { .. } => "connection_state_changed",
            MonitorEvent::HeartRateReceived { .. } => "heart_rate_received",
            MonitorEvent::BatteryLevelReceived { .. } => "battery_level_received",
            MonitorEvent::DiscoveryStateChanged { .. } => "discovery_state_changed",
            MonitorEvent::PeerDiscovered { .. } => "peer_discovered",
            MonitorEvent::RadioStateChanged { .. } => "radio_state_changed",
            MonitorEvent::DataStale { .. } => "data_stale",
            MonitorEvent::ReadingClassified { .. } => "reading_classified",
            MonitorEvent::AlertRaised { .. } => "alert_raised",
            MonitorEvent::OfflineQueueChanged { .. } => "offline_queue_changed",
        }
    }
}

/// Ordered, single-consumer event channel
///
/// Every producer publishes through a clone of the bus; exactly one
/// [`EventReceiver`] sees the events, in publish order.
pub struct EventBus {
    sender: mpsc::Sender<MonitorEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a bus with the specified channel capacity and its receiver
    pub fn new(capacity: usize) -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                debug_logging: false,
            },
            EventReceiver { receiver },
        )
    }

    /// Create a bus that logs every event at debug level
    pub fn with_debug_logging(capacity: usize) -> (Self, EventReceiver) {
        let (mut bus, receiver) = Self::new(capacity);
        bus.debug_logging = true;
        (bus, receiver)
    }

    /// Publish an event, waiting for room in the channel
    pub async fn publish(&self, event: MonitorEvent) -> Result<(), EventBusError> {
        if self.debug_logging {
            debug!("Publishing event: {}", event.description());
        }

        match &event {
            MonitorEvent::ConnectionStateChanged { state, .. } => {
                info!("Connection state changed to {}", state);
            }
            MonitorEvent::RadioStateChanged { powered } => {
                if *powered {
                    info!("Radio switched on");
                } else {
                    warn!("Radio switched off");
                }
            }
            MonitorEvent::DataStale { silent_for } => {
                warn!("No heart-rate data for {:?}", silent_for);
            }
            _ => {}
        }

        self.sender
            .send(event)
            .await
            .map_err(|_| EventBusError::ChannelClosed)
    }

    /// Whether the consumer is still listening
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            debug_logging: self.debug_logging,
        }
    }
}

/// The consuming end of an [`EventBus`]
pub struct EventReceiver {
    receiver: mpsc::Receiver<MonitorEvent>,
}

impl EventReceiver {
    /// Receive the next event; `None` once every publisher is gone
    pub async fn recv(&mut self) -> Option<MonitorEvent> {
        self.receiver.recv().await
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<MonitorEvent>, EventBusError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(EventBusError::ChannelClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (bus, mut receiver) = EventBus::new(10);
        let producer = bus.clone();

        bus.publish(MonitorEvent::RadioStateChanged { powered: false })
            .await
            .unwrap();
        producer
            .publish(MonitorEvent::RadioStateChanged { powered: true })
            .await
            .unwrap();
        bus.publish(MonitorEvent::BatteryLevelReceived { level: 50 })
            .await
            .unwrap();

        let types: Vec<&str> = [
            receiver.recv().await.unwrap(),
            receiver.recv().await.unwrap(),
            receiver.recv().await.unwrap(),
        ]
        .iter()
        .map(|e| e.event_type())
        .collect();
        assert_eq!(
            types,
            vec!["radio_state_changed", "radio_state_changed", "battery_level_received"]
        );
        assert!(receiver.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_publish_after_receiver_dropped() {
        let (bus, receiver) = EventBus::new(1);
        drop(receiver);
        assert!(!bus.is_open());
        assert_eq!(
            bus.publish(MonitorEvent::BatteryLevelReceived { level: 1 }).await,
            Err(EventBusError::ChannelClosed)
        );
    }

    #[tokio::test]
    async fn test_closed_when_publishers_dropped() {
        let (bus, mut receiver) = EventBus::new(1);
        drop(bus);
        assert!(receiver.recv().await.is_none());
        assert!(matches!(
            receiver.try_recv(),
            Err(EventBusError::ChannelClosed)
        ));
    }

    #[test]
    fn test_event_descriptions() {
        let event = MonitorEvent::DiscoveryStateChanged { active: true };
        assert_eq!(event.description(), "Discovery started");
        assert_eq!(event.event_type(), "discovery_state_changed");
    }
}
