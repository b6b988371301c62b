//! iBeacon manufacturer-data frame.
//!
//! Layout of the manufacturer-specific data following company id `0x004C`:
//!
//! ```text
//! 0      1      2 ........ 17  18  19  20  21  22
//! +------+------+----------+-------+-------+-----+
//! | 0x02 | 0x15 |  UUID    | major | minor | pwr |
//! +------+------+----------+-------+-------+-----+
//! ```
//!
//! Major and minor are big-endian; `pwr` is the signed RSSI at one metre.

use thiserror::Error;
use uuid::Uuid;

use crate::types::{BeaconIdentity, ProximityBucket};

/// Bluetooth SIG company identifier the frame is registered under.
pub const APPLE_COMPANY_ID: u16 = 0x004C;

/// Frame type byte.
pub const FRAME_TYPE: u8 = 0x02;

/// Length byte: bytes remaining after the type and length bytes.
pub const FRAME_DATA_LEN: u8 = 0x15;

/// Total encoded frame length.
pub const FRAME_LEN: usize = 2 + FRAME_DATA_LEN as usize;

/// Measured power used when none is configured.
pub const DEFAULT_MEASURED_POWER: i8 = -59;

/// Errors decoding a manufacturer-data frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    /// Frame is not exactly [`FRAME_LEN`] bytes.
    #[error("iBeacon frame must be {FRAME_LEN} bytes, got {actual}")]
    InvalidLength {
        /// Bytes received.
        actual: usize,
    },

    /// Type or length prefix is not `02 15`.
    #[error("Not an iBeacon frame (prefix {type_byte:#04x} {len_byte:#04x})")]
    NotIBeacon {
        /// First byte received.
        type_byte: u8,
        /// Second byte received.
        len_byte: u8,
    },
}

/// A decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IBeaconFrame {
    /// Broadcast identity.
    pub identity: BeaconIdentity,
    /// RSSI at one metre.
    pub measured_power: i8,
}

impl IBeaconFrame {
    /// Frame for an identity, falling back to [`DEFAULT_MEASURED_POWER`].
    #[must_use]
    pub fn new(identity: BeaconIdentity, measured_power: Option<i8>) -> Self {
        Self {
            identity,
            measured_power: measured_power.unwrap_or(DEFAULT_MEASURED_POWER),
        }
    }

    /// Render the manufacturer-data bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_LEN);
        out.push(FRAME_TYPE);
        out.push(FRAME_DATA_LEN);
        out.extend_from_slice(self.identity.uuid.as_bytes());
        out.extend_from_slice(&self.identity.major.to_be_bytes());
        out.extend_from_slice(&self.identity.minor.to_be_bytes());
        out.extend_from_slice(&self.measured_power.to_be_bytes());
        out
    }

    /// Parse manufacturer-data bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError`] if the bytes are not an iBeacon frame.
    pub fn decode(data: &[u8]) -> Result<Self, PayloadError> {
        if data.len() != FRAME_LEN {
            return Err(PayloadError::InvalidLength { actual: data.len() });
        }
        if data[0] != FRAME_TYPE || data[1] != FRAME_DATA_LEN {
            return Err(PayloadError::NotIBeacon {
                type_byte: data[0],
                len_byte: data[1],
            });
        }

        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&data[2..18]);

        Ok(Self {
            identity: BeaconIdentity {
                uuid: Uuid::from_bytes(uuid),
                major: u16::from_be_bytes([data[18], data[19]]),
                minor: u16::from_be_bytes([data[20], data[21]]),
            },
            measured_power: i8::from_be_bytes([data[22]]),
        })
    }
}

/// Path-loss exponent for free space.
const PATH_LOSS_EXPONENT: f64 = 2.0;

/// Rough distance in metres from RSSI and the frame's measured power.
#[must_use]
pub fn estimate_distance(rssi: i16, measured_power: i8) -> f64 {
    10f64.powf((f64::from(measured_power) - f64::from(rssi)) / (10.0 * PATH_LOSS_EXPONENT))
}

/// Bucket a sighting the way receivers conventionally do.
///
/// Below half a metre is immediate, below three metres near, anything else
/// far. Missing or zero RSSI cannot be placed.
#[must_use]
pub fn estimate_proximity(rssi: Option<i16>, measured_power: i8) -> ProximityBucket {
    match rssi {
        None | Some(0) => ProximityBucket::Unknown,
        Some(rssi) => {
            let metres = estimate_distance(rssi, measured_power);
            if metres < 0.5 {
                ProximityBucket::Immediate
            } else if metres < 3.0 {
                ProximityBucket::Near
            } else {
                ProximityBucket::Far
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> BeaconIdentity {
        BeaconIdentity {
            uuid: Uuid::parse_str("E2C56DB5-DFFB-48D2-B060-D0F5A71096E0").unwrap(),
            major: 100,
            minor: 50,
        }
    }

    #[test]
    fn test_encode_layout() {
        let bytes = IBeaconFrame::new(identity(), None).encode();
        assert_eq!(bytes.len(), FRAME_LEN);
        assert_eq!(&bytes[..4], &[0x02, 0x15, 0xE2, 0xC5]);
        assert_eq!(&bytes[18..22], &[0x00, 100, 0x00, 50]);
        assert_eq!(bytes[22] as i8, DEFAULT_MEASURED_POWER);
    }

    #[test]
    fn test_decode_reads_back_identity() {
        let frame = IBeaconFrame::new(identity(), Some(-65));
        let decoded = IBeaconFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_decode_rejects_short_frame() {
        assert_eq!(
            IBeaconFrame::decode(&[0x02, 0x15, 0x00]),
            Err(PayloadError::InvalidLength { actual: 3 })
        );
    }

    #[test]
    fn test_decode_rejects_other_frame_types() {
        let mut bytes = IBeaconFrame::new(identity(), None).encode();
        bytes[0] = 0xBE;
        assert!(matches!(
            IBeaconFrame::decode(&bytes),
            Err(PayloadError::NotIBeacon { type_byte: 0xBE, .. })
        ));
    }

    #[test]
    fn test_proximity_estimate_thresholds() {
        assert_eq!(estimate_proximity(None, -59), ProximityBucket::Unknown);
        assert_eq!(estimate_proximity(Some(0), -59), ProximityBucket::Unknown);
        assert_eq!(estimate_proximity(Some(-45), -59), ProximityBucket::Immediate);
        assert_eq!(estimate_proximity(Some(-59), -59), ProximityBucket::Near);
        assert_eq!(estimate_proximity(Some(-80), -59), ProximityBucket::Far);
    }
}
