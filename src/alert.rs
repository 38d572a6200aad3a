use crate::reading::TimestampedSample;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Hard bound on the windowed breach buffer, independent of its age limit
pub const MAX_WINDOW_SAMPLES: usize = 120;

/// Padding added to the window to tolerate sampling jitter at its edges
const WINDOW_JITTER_PAD: Duration = Duration::from_secs(1);

/// Kinds of alert subject to cooldown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    Low,
    High,
    ApiUnreachable,
    BleDisconnected,
    DataStale,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Low => "low_heart_rate",
            AlertKind::High => "high_heart_rate",
            AlertKind::ApiUnreachable => "api_unreachable",
            AlertKind::BleDisconnected => "ble_disconnected",
            AlertKind::DataStale => "data_stale",
        }
    }
}

/// Connectivity conditions that can raise an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectivityAlert {
    ApiUnreachable,
    BleDisconnected,
    DataStale,
}

impl ConnectivityAlert {
    pub fn kind(&self) -> AlertKind {
        match self {
            ConnectivityAlert::ApiUnreachable => AlertKind::ApiUnreachable,
            ConnectivityAlert::BleDisconnected => AlertKind::BleDisconnected,
            ConnectivityAlert::DataStale => AlertKind::DataStale,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ConnectivityAlert::ApiUnreachable => "Upstream server unreachable, readings are being queued",
            ConnectivityAlert::BleDisconnected => "Heart-rate sensor disconnected",
            ConnectivityAlert::DataStale => "No heart-rate data received from sensor",
        }
    }
}

/// An alert ready for the notification collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
    /// Whether the receiver should sound or vibrate
    pub wants_attention: bool,
}

impl Alert {
    pub fn connectivity(condition: ConnectivityAlert) -> Self {
        Self {
            kind: condition.kind(),
            message: condition.message().to_string(),
            wants_attention: true,
        }
    }
}

/// Windowing and cooldown settings
#[derive(Debug, Clone, PartialEq)]
pub struct AlertPolicy {
    /// Zero alerts on every single breaching reading
    pub window: Duration,
    /// Breaching readings within the window needed to fire
    pub min_exceed_count: usize,
    /// Minimum time between two heart-rate alerts of the same direction
    pub cooldown: Duration,
    /// Minimum time between two connectivity alerts of the same kind
    pub connectivity_cooldown: Duration,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            window: Duration::ZERO,
            min_exceed_count: 1,
            cooldown: Duration::from_secs(5 * 60),
            connectivity_cooldown: Duration::from_secs(5 * 60),
        }
    }
}

/// Threshold alerting with sliding window and per-kind cooldown
#[derive(Debug)]
pub struct AlertEngine {
    policy: AlertPolicy,
    samples: VecDeque<TimestampedSample>,
    last_triggered: HashMap<AlertKind, Instant>,
}

impl AlertEngine {
    pub fn new(policy: AlertPolicy) -> Self {
        Self {
            policy,
            samples: VecDeque::with_capacity(MAX_WINDOW_SAMPLES),
            last_triggered: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &AlertPolicy {
        &self.policy
    }

    /// Replace the policy, dropping any breach history collected under the old one
    pub fn set_policy(&mut self, policy: AlertPolicy) {
        self.policy = policy;
        self.samples.clear();
    }

    /// Evaluate a reading against the thresholds
    pub fn evaluate(
        &mut self,
        heart_rate: i32,
        min_threshold: i32,
        max_threshold: i32,
        now: Instant,
    ) -> Option<Alert> {
        if self.policy.window.is_zero() {
            return self.evaluate_single(heart_rate, min_threshold, max_threshold, now);
        }
        self.evaluate_windowed(heart_rate, min_threshold, max_threshold, now)
    }

    fn evaluate_single(
        &mut self,
        heart_rate: i32,
        min_threshold: i32,
        max_threshold: i32,
        now: Instant,
    ) -> Option<Alert> {
        let kind = if heart_rate < min_threshold {
            AlertKind::Low
        } else if heart_rate > max_threshold {
            AlertKind::High
        } else {
            return None;
        };

        if !self.cooldown_elapsed(kind, self.policy.cooldown, now) {
            debug!("{} alert suppressed by cooldown", kind.as_str());
            return None;
        }

        self.last_triggered.insert(kind, now);
        let message = match kind {
            AlertKind::Low => format!(
                "Heart rate {} BPM is below the minimum of {} BPM",
                heart_rate, min_threshold
            ),
            _ => format!(
                "Heart rate {} BPM is above the maximum of {} BPM",
                heart_rate, max_threshold
            ),
        };
        Some(self.fire(kind, message))
    }

    fn evaluate_windowed(
        &mut self,
        heart_rate: i32,
        min_threshold: i32,
        max_threshold: i32,
        now: Instant,
    ) -> Option<Alert> {
        self.samples.push_back(TimestampedSample::new(heart_rate, now));
        let horizon = self.policy.window + WINDOW_JITTER_PAD;
        while let Some(front) = self.samples.front() {
            if front.is_older_than(horizon, now) {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        while self.samples.len() > MAX_WINDOW_SAMPLES {
            self.samples.pop_front();
        }

        let low_count = self.samples.iter().filter(|s| s.value < min_threshold).count();
        let high_count = self.samples.iter().filter(|s| s.value > max_threshold).count();
        let required = self.policy.min_exceed_count.max(1);
        let window_secs = self.policy.window.as_secs();

        let candidates = [
            (AlertKind::Low, low_count, min_threshold, "below the minimum"),
            (AlertKind::High, high_count, max_threshold, "above the maximum"),
        ];

        for (kind, count, threshold, relation) in candidates {
            if count < required {
                continue;
            }
            if !self.cooldown_elapsed(kind, self.policy.cooldown, now) {
                debug!(
                    "{} alert suppressed by cooldown ({} breaches in window)",
                    kind.as_str(),
                    count
                );
                continue;
            }

            self.last_triggered.insert(kind, now);
            // Start over so stale breaches cannot immediately re-trigger
            self.samples.clear();
            let message = format!(
                "Heart rate {} BPM: {} of {} BPM for {} readings within {} s",
                heart_rate, relation, threshold, count, window_secs
            );
            return Some(self.fire(kind, message));
        }

        None
    }

    /// Check a connectivity condition, returning true when the alert should fire
    pub fn evaluate_connectivity(&mut self, condition: ConnectivityAlert, now: Instant) -> bool {
        let kind = condition.kind();
        if !self.cooldown_elapsed(kind, self.policy.connectivity_cooldown, now) {
            debug!("{} alert suppressed by cooldown", kind.as_str());
            return false;
        }
        self.last_triggered.insert(kind, now);
        warn!("Connectivity alert: {}", condition.message());
        true
    }

    fn cooldown_elapsed(&self, kind: AlertKind, cooldown: Duration, now: Instant) -> bool {
        match self.last_triggered.get(&kind) {
            Some(last) => now.saturating_duration_since(*last) >= cooldown,
            None => true,
        }
    }

    fn fire(&self, kind: AlertKind, message: String) -> Alert {
        warn!("Alert {}: {}", kind.as_str(), message);
        Alert {
            kind,
            message,
            wants_attention: true,
        }
    }

    /// Last time an alert of this kind fired
    pub fn last_triggered(&self, kind: AlertKind) -> Option<Instant> {
        self.last_triggered.get(&kind).copied()
    }

    pub fn window_len(&self) -> usize {
        self.samples.len()
    }

    /// Forget breach history and cooldowns
    pub fn reset(&mut self) {
        self.samples.clear();
        self.last_triggered.clear();
    }
}
