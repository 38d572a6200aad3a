use thiserror::Error;

#[derive(Error, Debug)]
pub enum HeartlinkError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Offline queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl HeartlinkError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<C: Into<String>, M: Into<String>>(component: C, message: M) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Malformed heart-rate measurement packets
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Empty packet")]
    Empty,

    #[error("Packet truncated: {field} needs {needed} bytes at offset {offset}, have {available}")]
    Truncated {
        field: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },
}

/// Failures reported by the radio transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Radio is off")]
    RadioOff,

    #[error("Peer {peer_id} not found")]
    PeerNotFound { peer_id: String },

    #[error("Connection to {peer_id} failed: {details}")]
    ConnectFailed { peer_id: String, details: String },

    #[error("Service discovery failed: {details}")]
    DiscoveryFailed { details: String },

    #[error("Subscription to {characteristic} failed: {details}")]
    SubscribeFailed {
        characteristic: String,
        details: String,
    },

    #[error("Read of {characteristic} failed: {details}")]
    ReadFailed {
        characteristic: String,
        details: String,
    },

    #[error("Scan failed: {details}")]
    ScanFailed { details: String },

    #[error("Stale connection handle {handle}")]
    StaleHandle { handle: u64 },
}

impl TransportError {
    /// Whether the reconnect policy should keep retrying after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, TransportError::RadioOff)
    }
}

/// Upstream delivery failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Upstream unreachable: {details}")]
    Unreachable { details: String },

    #[error("Upstream rejected reading: {details}")]
    Rejected { details: String },

    #[error("Sink write failed: {details}")]
    Write { details: String },
}

/// Offline queue persistence failures
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue storage unavailable: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Queue file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, HeartlinkError>;
