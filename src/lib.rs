pub mod alert;
pub mod app;
pub mod config;
pub mod contact;
pub mod delivery;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod protocol;
pub mod quality;
pub mod queue;
pub mod reading;
pub mod recovery;
pub mod sink;
pub mod supervisor;
pub mod transport;

pub use alert::{Alert, AlertEngine, AlertKind, ConnectivityAlert};
pub use app::{ComponentState, MonitorOrchestrator, ShutdownReason};
pub use config::HeartlinkConfig;
pub use contact::ContactToleranceFilter;
pub use delivery::{DeliveryReport, DELIVERY_BACKLOG};
pub use error::{HeartlinkError, Result};
pub use events::{EventBus, EventReceiver, MonitorEvent};
pub use pipeline::{PipelineStats, ReadingOutcome, ReadingPipeline};
pub use protocol::{decode, decode_battery_level, PacketBuilder};
pub use quality::{QualityVerdict, SignalQualityClassifier};
pub use queue::{FileQueueStore, MemoryQueueStore, OfflineQueue, QueueStore};
pub use reading::{Measurement, Reading};
pub use recovery::{ReconnectBackoff, ReconnectPolicy};
pub use sink::{JsonLinesSink, LogSink, Sink};
pub use supervisor::{ConnectionState, ConnectionSupervisor, SupervisorHandle};
pub use transport::{MockTransport, Transport, TransportEvent};
