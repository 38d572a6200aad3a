use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Fields extracted from a single heart-rate measurement packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
    /// Beats per minute as sent by the strap (8 or 16 bit on the wire)
    pub heart_rate: u16,
    /// RR intervals in milliseconds, in packet order
    pub rr_intervals: Vec<u16>,
    /// Effective contact flag (true when the strap cannot detect contact)
    pub sensor_contact: bool,
    /// Whether the strap reports contact at all
    pub sensor_contact_supported: bool,
    /// Energy expended in kilojoules, when present
    pub energy_expended: Option<u16>,
}

/// A decoded heart-rate reading attributed to a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub heart_rate: u16,
    pub rr_intervals: Vec<u16>,
    pub sensor_contact: bool,
    pub sensor_contact_supported: bool,
    /// Last battery level seen on the peripheral, in percent
    pub battery_level: Option<u8>,
    pub device_id: String,
    pub recorded_at: DateTime<Utc>,
}

impl Reading {
    /// Attach device identity and capture time to a decoded measurement
    pub fn from_measurement(
        measurement: Measurement,
        device_id: impl Into<String>,
        battery_level: Option<u8>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            heart_rate: measurement.heart_rate,
            rr_intervals: measurement.rr_intervals,
            sensor_contact: measurement.sensor_contact,
            sensor_contact_supported: measurement.sensor_contact_supported,
            battery_level,
            device_id: device_id.into(),
            recorded_at,
        }
    }

    /// Heart rate as a signed sample value for the rolling buffers
    pub fn bpm(&self) -> i32 {
        i32::from(self.heart_rate)
    }
}

/// A value with the monotonic instant it was observed at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampedSample {
    pub value: i32,
    pub at: Instant,
}

impl TimestampedSample {
    pub fn new(value: i32, at: Instant) -> Self {
        Self { value, at }
    }

    /// Whether the sample falls outside `window` measured back from `now`
    pub fn is_older_than(&self, window: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.at) > window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_from_measurement() {
        let measurement = Measurement {
            heart_rate: 72,
            rr_intervals: vec![833],
            sensor_contact: true,
            sensor_contact_supported: true,
            energy_expended: None,
        };
        let now = Utc::now();
        let reading = Reading::from_measurement(measurement, "AA:BB", Some(80), now);

        assert_eq!(reading.bpm(), 72);
        assert_eq!(reading.device_id, "AA:BB");
        assert_eq!(reading.battery_level, Some(80));
        assert_eq!(reading.recorded_at, now);
    }

    #[test]
    fn test_sample_age() {
        let start = Instant::now();
        let sample = TimestampedSample::new(60, start);
        let later = start + Duration::from_secs(31);

        assert!(sample.is_older_than(Duration::from_secs(30), later));
        assert!(!sample.is_older_than(Duration::from_secs(31), later));
        assert!(!sample.is_older_than(Duration::ZERO, start));
    }
}
