//! Heart-rate measurement packet codec.
//!
//! Packet layout: one flags byte followed by the heart-rate value and the
//! optional fields announced by the flags, all little-endian.
//!
//! | bit | meaning                                        |
//! |-----|------------------------------------------------|
//! | 0   | heart rate is a 16-bit value                   |
//! | 1   | sensor contact is supported                    |
//! | 2   | sensor contact is detected                     |
//! | 3   | energy expended present (2 bytes)              |
//! | 4   | RR intervals present (2 bytes each, to the end) |

use crate::error::DecodeError;
use crate::reading::Measurement;
use tracing::trace;

pub const FLAG_HR_16BIT: u8 = 0x01;
pub const FLAG_CONTACT_SUPPORTED: u8 = 0x02;
pub const FLAG_CONTACT_DETECTED: u8 = 0x04;
pub const FLAG_ENERGY_EXPENDED: u8 = 0x08;
pub const FLAG_RR_INTERVALS: u8 = 0x10;

/// RR intervals are transmitted in 1/1024 s units
const RR_UNITS_PER_SECOND: u32 = 1024;

/// Decode a heart-rate measurement packet
pub fn decode(bytes: &[u8]) -> Result<Measurement, DecodeError> {
    let (&flags, _) = bytes.split_first().ok_or(DecodeError::Empty)?;
    let mut offset = 1;

    let heart_rate = if flags & FLAG_HR_16BIT != 0 {
        let value = read_u16(bytes, offset, "heart_rate")?;
        offset += 2;
        value
    } else {
        let value = *bytes.get(offset).ok_or(DecodeError::Truncated {
            field: "heart_rate",
            offset,
            needed: 1,
            available: bytes.len().saturating_sub(offset),
        })?;
        offset += 1;
        u16::from(value)
    };

    let sensor_contact_supported = flags & FLAG_CONTACT_SUPPORTED != 0;
    // Straps that cannot sense contact are assumed to be worn
    let sensor_contact = !sensor_contact_supported || flags & FLAG_CONTACT_DETECTED != 0;

    let energy_expended = if flags & FLAG_ENERGY_EXPENDED != 0 {
        let value = read_u16(bytes, offset, "energy_expended")?;
        offset += 2;
        Some(value)
    } else {
        None
    };

    let mut rr_intervals = Vec::new();
    if flags & FLAG_RR_INTERVALS != 0 {
        while offset + 2 <= bytes.len() {
            let raw = u16::from_le_bytes([bytes[offset], bytes[offset + 1]]);
            rr_intervals.push(rr_raw_to_millis(raw));
            offset += 2;
        }
        if offset < bytes.len() {
            trace!("Ignoring {} dangling RR byte(s)", bytes.len() - offset);
        }
    }

    Ok(Measurement {
        heart_rate,
        rr_intervals,
        sensor_contact,
        sensor_contact_supported,
        energy_expended,
    })
}

/// Decode a battery level characteristic value (percent)
pub fn decode_battery_level(bytes: &[u8]) -> Result<u8, DecodeError> {
    bytes.first().copied().ok_or(DecodeError::Empty)
}

/// Convert a raw RR interval (1/1024 s) to whole milliseconds, truncating
pub fn rr_raw_to_millis(raw: u16) -> u16 {
    (u32::from(raw) * 1000 / RR_UNITS_PER_SECOND) as u16
}

/// Smallest raw RR value that decodes back to `millis`
pub fn rr_millis_to_raw(millis: u16) -> u16 {
    let scaled = u32::from(millis) * RR_UNITS_PER_SECOND;
    scaled.div_ceil(1000).min(u32::from(u16::MAX)) as u16
}

fn read_u16(bytes: &[u8], offset: usize, field: &'static str) -> Result<u16, DecodeError> {
    match bytes.get(offset..offset + 2) {
        Some(pair) => Ok(u16::from_le_bytes([pair[0], pair[1]])),
        None => Err(DecodeError::Truncated {
            field,
            offset,
            needed: 2,
            available: bytes.len().saturating_sub(offset),
        }),
    }
}

/// Builds measurement packets, used by the simulated transport and tests
#[derive(Debug, Clone, Default)]
pub struct PacketBuilder {
    heart_rate: u16,
    wide: bool,
    contact: Option<bool>,
    energy_expended: Option<u16>,
    rr_raw: Option<Vec<u16>>,
}

impl PacketBuilder {
    pub fn new(heart_rate: u16) -> Self {
        Self {
            heart_rate,
            wide: heart_rate > u16::from(u8::MAX),
            ..Default::default()
        }
    }

    /// Force the 16-bit heart-rate format
    pub fn wide(mut self, wide: bool) -> Self {
        self.wide = wide || self.heart_rate > u16::from(u8::MAX);
        self
    }

    /// Mark contact as supported and set the detected bit
    pub fn contact(mut self, detected: bool) -> Self {
        self.contact = Some(detected);
        self
    }

    pub fn energy_expended(mut self, kilojoules: u16) -> Self {
        self.energy_expended = Some(kilojoules);
        self
    }

    /// Append RR intervals given in raw 1/1024 s units
    pub fn rr_raw(mut self, raw: &[u16]) -> Self {
        self.rr_raw.get_or_insert_with(Vec::new).extend_from_slice(raw);
        self
    }

    /// Append RR intervals given in milliseconds
    pub fn rr_millis(self, millis: &[u16]) -> Self {
        let raw: Vec<u16> = millis.iter().map(|&ms| rr_millis_to_raw(ms)).collect();
        self.rr_raw(&raw)
    }

    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.wide {
            flags |= FLAG_HR_16BIT;
        }
        if let Some(detected) = self.contact {
            flags |= FLAG_CONTACT_SUPPORTED;
            if detected {
                flags |= FLAG_CONTACT_DETECTED;
            }
        }
        if self.energy_expended.is_some() {
            flags |= FLAG_ENERGY_EXPENDED;
        }
        if self.rr_raw.is_some() {
            flags |= FLAG_RR_INTERVALS;
        }
        flags
    }

    pub fn build(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(8);
        packet.push(self.flags());

        if self.wide {
            packet.extend_from_slice(&self.heart_rate.to_le_bytes());
        } else {
            packet.push(self.heart_rate as u8);
        }

        if let Some(energy) = self.energy_expended {
            packet.extend_from_slice(&energy.to_le_bytes());
        }

        if let Some(rr) = &self.rr_raw {
            for raw in rr {
                packet.extend_from_slice(&raw.to_le_bytes());
            }
        }

        packet
    }
}
