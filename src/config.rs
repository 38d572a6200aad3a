use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct HeartlinkConfig {
    pub device: DeviceConfig,
    pub connection: ConnectionConfig,
    pub quality: QualityConfig,
    pub alert: AlertConfig,
    pub queue: QueueConfig,
    pub sink: SinkConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DeviceConfig {
    /// Identifier of the strap to connect to directly; unset waits for discovery
    #[serde(default)]
    pub peer_id: Option<String>,

    /// Battery characteristic poll period in seconds
    #[serde(default = "default_battery_poll_interval")]
    pub battery_poll_interval_secs: u64,

    /// Consecutive "no contact" packets tolerated before contact counts as lost
    #[serde(default = "default_contact_tolerance")]
    pub contact_tolerance: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Delay for the first reconnect attempts
    #[serde(default = "default_fast_retry_delay")]
    pub fast_retry_delay_ms: u64,

    /// Attempts made at the fast delay before exponential backoff
    #[serde(default = "default_fast_retry_count")]
    pub fast_retry_count: u32,

    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,

    /// Delay before reconnecting after a watchdog or user forced teardown
    #[serde(default = "default_forced_reconnect_delay")]
    pub forced_reconnect_delay_ms: u64,

    /// Silence after which the link is treated as stale
    #[serde(default = "default_stale_timeout")]
    pub stale_timeout_secs: u64,

    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct QualityConfig {
    /// Drop readings classified as noise
    #[serde(default = "default_quality_enabled")]
    pub enabled: bool,

    /// Rolling classification window in seconds
    #[serde(default = "default_quality_window")]
    pub window_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AlertConfig {
    #[serde(default = "default_alerts_enabled")]
    pub enabled: bool,

    /// Readings below this raise a low heart-rate alert
    #[serde(default = "default_min_heart_rate")]
    pub min_heart_rate: i32,

    /// Readings above this raise a high heart-rate alert
    #[serde(default = "default_max_heart_rate")]
    pub max_heart_rate: i32,

    /// Sliding window in seconds; 0 alerts on single readings
    #[serde(default = "default_alert_window")]
    pub window_seconds: u64,

    /// Breaching readings within the window needed to fire
    #[serde(default = "default_min_exceed_count")]
    pub min_exceed_count: usize,

    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u64,

    #[serde(default = "default_connectivity_cooldown_minutes")]
    pub connectivity_cooldown_minutes: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct QueueConfig {
    /// File backing the offline queue
    #[serde(default = "default_queue_path")]
    pub path: String,

    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,

    /// Period of the background queue flush in seconds
    #[serde(default = "default_flush_interval")]
    pub flush_interval_seconds: u64,
}

/// Where accepted readings are delivered
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Log each reading
    Log,
    /// Append each reading as a JSON line to `sink.path`
    Jsonl,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SinkConfig {
    #[serde(default = "default_sink_kind")]
    pub kind: SinkKind,

    /// Output file for the `jsonl` sink
    #[serde(default = "default_sink_path")]
    pub path: String,

    /// Upstream collector URL, reported for diagnostics
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl HeartlinkConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("heartlink.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default(
                "device.battery_poll_interval_secs",
                default_battery_poll_interval(),
            )?
            .set_default("device.contact_tolerance", default_contact_tolerance())?
            .set_default("connection.fast_retry_delay_ms", default_fast_retry_delay())?
            .set_default("connection.fast_retry_count", default_fast_retry_count())?
            .set_default("connection.backoff_base_ms", default_backoff_base())?
            .set_default("connection.backoff_max_ms", default_backoff_max())?
            .set_default(
                "connection.forced_reconnect_delay_ms",
                default_forced_reconnect_delay(),
            )?
            .set_default("connection.stale_timeout_secs", default_stale_timeout())?
            .set_default("connection.watchdog_interval_secs", default_watchdog_interval())?
            .set_default("quality.enabled", default_quality_enabled())?
            .set_default("quality.window_seconds", default_quality_window())?
            .set_default("alert.enabled", default_alerts_enabled())?
            .set_default("alert.min_heart_rate", default_min_heart_rate())?
            .set_default("alert.max_heart_rate", default_max_heart_rate())?
            .set_default("alert.window_seconds", default_alert_window())?
            .set_default("alert.min_exceed_count", default_min_exceed_count() as u64)?
            .set_default("alert.cooldown_minutes", default_cooldown_minutes())?
            .set_default(
                "alert.connectivity_cooldown_minutes",
                default_connectivity_cooldown_minutes(),
            )?
            .set_default("queue.path", default_queue_path())?
            .set_default("queue.capacity", default_queue_capacity() as u64)?
            .set_default("queue.flush_interval_seconds", default_flush_interval())?
            .set_default("sink.kind", "log")?
            .set_default("sink.path", default_sink_path())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as u64,
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // HEARTLINK__ALERT__MAX_HEART_RATE=140 and friends
            .add_source(
                Environment::with_prefix("HEARTLINK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: HeartlinkConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.contact_tolerance == 0 {
            return Err(ConfigError::Message(
                "Contact tolerance must be greater than 0".to_string(),
            ));
        }

        if self.device.battery_poll_interval_secs == 0 {
            return Err(ConfigError::Message(
                "Battery poll interval must be greater than 0".to_string(),
            ));
        }

        if self.connection.backoff_base_ms == 0
            || self.connection.backoff_max_ms < self.connection.backoff_base_ms
        {
            return Err(ConfigError::Message(
                "Backoff max must be at least the (non-zero) backoff base".to_string(),
            ));
        }

        if self.connection.watchdog_interval_secs == 0
            || self.connection.stale_timeout_secs < self.connection.watchdog_interval_secs
        {
            return Err(ConfigError::Message(
                "Stale timeout must be at least the (non-zero) watchdog interval".to_string(),
            ));
        }

        if self.quality.window_seconds == 0 {
            return Err(ConfigError::Message(
                "Quality window must be greater than 0".to_string(),
            ));
        }

        if self.alert.min_heart_rate >= self.alert.max_heart_rate {
            return Err(ConfigError::Message(format!(
                "Alert min_heart_rate ({}) must be below max_heart_rate ({})",
                self.alert.min_heart_rate, self.alert.max_heart_rate
            )));
        }

        if self.alert.min_exceed_count == 0 {
            return Err(ConfigError::Message(
                "Alert min_exceed_count must be greater than 0".to_string(),
            ));
        }

        if self.queue.capacity == 0 {
            return Err(ConfigError::Message(
                "Queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.queue.flush_interval_seconds == 0 {
            return Err(ConfigError::Message(
                "Queue flush interval must be greater than 0".to_string(),
            ));
        }

        if self.sink.kind == SinkKind::Jsonl && self.sink.path.trim().is_empty() {
            return Err(ConfigError::Message(
                "The jsonl sink needs a path".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for HeartlinkConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig {
                peer_id: None,
                battery_poll_interval_secs: default_battery_poll_interval(),
                contact_tolerance: default_contact_tolerance(),
            },
            connection: ConnectionConfig {
                fast_retry_delay_ms: default_fast_retry_delay(),
                fast_retry_count: default_fast_retry_count(),
                backoff_base_ms: default_backoff_base(),
                backoff_max_ms: default_backoff_max(),
                forced_reconnect_delay_ms: default_forced_reconnect_delay(),
                stale_timeout_secs: default_stale_timeout(),
                watchdog_interval_secs: default_watchdog_interval(),
            },
            quality: QualityConfig {
                enabled: default_quality_enabled(),
                window_seconds: default_quality_window(),
            },
            alert: AlertConfig {
                enabled: default_alerts_enabled(),
                min_heart_rate: default_min_heart_rate(),
                max_heart_rate: default_max_heart_rate(),
                window_seconds: default_alert_window(),
                min_exceed_count: default_min_exceed_count(),
                cooldown_minutes: default_cooldown_minutes(),
                connectivity_cooldown_minutes: default_connectivity_cooldown_minutes(),
            },
            queue: QueueConfig {
                path: default_queue_path(),
                capacity: default_queue_capacity(),
                flush_interval_seconds: default_flush_interval(),
            },
            sink: SinkConfig {
                kind: default_sink_kind(),
                path: default_sink_path(),
                endpoint: None,
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
            },
        }
    }
}

// Default value functions
fn default_battery_poll_interval() -> u64 {
    300
}
fn default_contact_tolerance() -> u32 {
    3
}

fn default_fast_retry_delay() -> u64 {
    500
}
fn default_fast_retry_count() -> u32 {
    3
}
fn default_backoff_base() -> u64 {
    2_000
}
fn default_backoff_max() -> u64 {
    60_000
}
fn default_forced_reconnect_delay() -> u64 {
    500
}
fn default_stale_timeout() -> u64 {
    10
}
fn default_watchdog_interval() -> u64 {
    5
}

fn default_quality_enabled() -> bool {
    true
}
fn default_quality_window() -> u64 {
    30
}

fn default_alerts_enabled() -> bool {
    true
}
fn default_min_heart_rate() -> i32 {
    50
}
fn default_max_heart_rate() -> i32 {
    120
}
fn default_alert_window() -> u64 {
    0
}
fn default_min_exceed_count() -> usize {
    1
}
fn default_cooldown_minutes() -> u64 {
    5
}
fn default_connectivity_cooldown_minutes() -> u64 {
    5
}

fn default_queue_path() -> String {
    "./heartlink-queue.json".to_string()
}
fn default_queue_capacity() -> usize {
    1000
}
fn default_flush_interval() -> u64 {
    60
}

fn default_sink_kind() -> SinkKind {
    SinkKind::Log
}
fn default_sink_path() -> String {
    "./readings.jsonl".to_string()
}

fn default_event_bus_capacity() -> usize {
    256
}
