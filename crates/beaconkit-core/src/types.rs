//! Shared beacon data model.
//!
//! Everything the engine stores or exchanges with the radio collaborator is
//! defined here: identity constraints, regions, observations and the small
//! state enums reported by the radio stack.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Coarse distance classification assigned by the radio stack per observation.
///
/// The declaration order is the canonical partition order and drives `Ord`,
/// so a [`crate::ProximityView`] always iterates `Unknown, Immediate, Near, Far`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ProximityBucket {
    /// Distance could not be estimated.
    Unknown,
    /// Within roughly half a metre.
    Immediate,
    /// Within a few metres.
    Near,
    /// Detected, but further away.
    Far,
}

impl ProximityBucket {
    /// All buckets in canonical order.
    pub const ALL: [Self; 4] = [Self::Unknown, Self::Immediate, Self::Near, Self::Far];

    /// Stable lowercase name, as used in JSON.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Immediate => "immediate",
            Self::Near => "near",
            Self::Far => "far",
        }
    }
}

impl fmt::Display for ProximityBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A watched beacon identity pattern.
///
/// A constraint always names a namespace UUID and may narrow it by major, or
/// by major and minor. A minor without a major cannot be expressed.
/// Constraints compare and hash by value and are used as map keys throughout
/// the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "ConstraintFields", into = "ConstraintFields")]
pub struct IdentityConstraint {
    uuid: Uuid,
    major: Option<u16>,
    minor: Option<u16>,
}

impl IdentityConstraint {
    /// Matches every transmitter in the namespace.
    #[must_use]
    pub const fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            major: None,
            minor: None,
        }
    }

    /// Matches transmitters in the namespace with the given major.
    #[must_use]
    pub const fn with_major(uuid: Uuid, major: u16) -> Self {
        Self {
            uuid,
            major: Some(major),
            minor: None,
        }
    }

    /// Matches exactly one transmitter identity.
    #[must_use]
    pub const fn with_major_minor(uuid: Uuid, major: u16, minor: u16) -> Self {
        Self {
            uuid,
            major: Some(major),
            minor: Some(minor),
        }
    }

    /// Builds a constraint from optional parts.
    ///
    /// Returns `None` when a minor is given without a major.
    #[must_use]
    pub const fn from_parts(uuid: Uuid, major: Option<u16>, minor: Option<u16>) -> Option<Self> {
        match (major, minor) {
            (None, Some(_)) => None,
            _ => Some(Self { uuid, major, minor }),
        }
    }

    /// Namespace UUID.
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Optional major value.
    #[must_use]
    pub const fn major(&self) -> Option<u16> {
        self.major
    }

    /// Optional minor value.
    #[must_use]
    pub const fn minor(&self) -> Option<u16> {
        self.minor
    }

    /// Whether a transmitter with this identity satisfies the constraint.
    #[must_use]
    pub fn matches(&self, uuid: Uuid, major: u16, minor: u16) -> bool {
        self.uuid == uuid
            && self.major.map_or(true, |m| m == major)
            && self.minor.map_or(true, |m| m == minor)
    }

    /// Stable name for the region that monitors this constraint.
    #[must_use]
    pub fn region_identifier(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for IdentityConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let uuid = self.uuid.hyphenated().to_string().to_uppercase();
        match (self.major, self.minor) {
            (Some(major), Some(minor)) => write!(f, "{uuid}:{major}:{minor}"),
            (Some(major), None) => write!(f, "{uuid}:{major}"),
            _ => f.write_str(&uuid),
        }
    }
}

/// Wire shape of an [`IdentityConstraint`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct ConstraintFields {
    /// Namespace UUID.
    pub uuid: Uuid,
    /// Optional major value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major: Option<u16>,
    /// Optional minor value; requires `major`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minor: Option<u16>,
}

impl TryFrom<ConstraintFields> for IdentityConstraint {
    type Error = String;

    fn try_from(fields: ConstraintFields) -> Result<Self, Self::Error> {
        Self::from_parts(fields.uuid, fields.major, fields.minor)
            .ok_or_else(|| "minor requires a major value".to_string())
    }
}

impl From<IdentityConstraint> for ConstraintFields {
    fn from(c: IdentityConstraint) -> Self {
        Self {
            uuid: c.uuid,
            major: c.major,
            minor: c.minor,
        }
    }
}

/// This device's own broadcast identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BeaconIdentity {
    /// Namespace UUID.
    pub uuid: Uuid,
    /// Major value.
    pub major: u16,
    /// Minor value.
    pub minor: u16,
}

impl From<BeaconIdentity> for IdentityConstraint {
    fn from(id: BeaconIdentity) -> Self {
        Self::with_major_minor(id.uuid, id.major, id.minor)
    }
}

/// A monitored region: a named identity constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BeaconRegion {
    /// Region name handed to the radio stack.
    pub identifier: String,
    /// Constraint the region watches for.
    pub constraint: IdentityConstraint,
}

impl BeaconRegion {
    /// Region named after its constraint.
    #[must_use]
    pub fn for_constraint(constraint: IdentityConstraint) -> Self {
        Self {
            identifier: constraint.region_identifier(),
            constraint,
        }
    }
}

/// One detected transmitter in one ranging cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Constraint whose ranging produced this observation.
    pub constraint: IdentityConstraint,
    /// Transmitter major.
    pub major: u16,
    /// Transmitter minor.
    pub minor: u16,
    /// Bucket assigned by the radio stack.
    pub proximity: ProximityBucket,
    /// Received signal strength, if reported.
    pub rssi: Option<i16>,
    /// Monotonic time of the reading.
    pub observed_at: Instant,
}

impl Observation {
    /// Observation stamped with the current instant and no RSSI.
    #[must_use]
    pub fn new(
        constraint: IdentityConstraint,
        major: u16,
        minor: u16,
        proximity: ProximityBucket,
    ) -> Self {
        Self {
            constraint,
            major,
            minor,
            proximity,
            rssi: None,
            observed_at: Instant::now(),
        }
    }

    /// Attach a signal strength reading.
    #[must_use]
    pub const fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }
}

/// Radio power state as reported by the collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    /// Radio is on and usable.
    PoweredOn,
    /// Radio is off.
    PoweredOff,
    /// Radio stack lost its connection and is recovering.
    Resetting,
    /// The application may not use the radio.
    Unauthorized,
    /// The platform has no suitable radio.
    Unsupported,
    /// No state reported yet.
    #[default]
    Unknown,
}

impl PowerState {
    /// Only a powered radio accepts start commands.
    #[must_use]
    pub const fn is_powered_on(self) -> bool {
        matches!(self, Self::PoweredOn)
    }
}

/// Region presence reported by monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionState {
    /// At least one matching transmitter is present.
    Inside,
    /// No matching transmitter is present.
    Outside,
    /// Presence not yet determined.
    Unknown,
}

/// Location authorization as reported by the collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Authorization {
    /// The user has not been asked yet.
    #[default]
    NotDetermined,
    /// The user refused.
    Denied,
    /// Policy forbids access.
    Restricted,
    /// Access granted.
    Authorized,
}

impl Authorization {
    /// Whether monitoring can never start in this state without user action.
    #[must_use]
    pub const fn is_refused(self) -> bool {
        matches!(self, Self::Denied | Self::Restricted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: Uuid = Uuid::from_u128(0xE2C5_6DB5_DFFB_48D2_B060_D0F5_A710_96E0);

    #[test]
    fn test_bucket_order_is_canonical() {
        let mut buckets = vec![
            ProximityBucket::Far,
            ProximityBucket::Near,
            ProximityBucket::Unknown,
            ProximityBucket::Immediate,
        ];
        buckets.sort();
        assert_eq!(buckets, ProximityBucket::ALL.to_vec());
    }

    #[test]
    fn test_constraint_matching() {
        let any = IdentityConstraint::new(NS);
        let major = IdentityConstraint::with_major(NS, 100);
        let exact = IdentityConstraint::with_major_minor(NS, 100, 50);

        assert!(any.matches(NS, 1, 2));
        assert!(major.matches(NS, 100, 2));
        assert!(!major.matches(NS, 101, 2));
        assert!(exact.matches(NS, 100, 50));
        assert!(!exact.matches(NS, 100, 51));
        assert!(!any.matches(Uuid::nil(), 1, 2));
    }

    #[test]
    fn test_minor_without_major_is_rejected() {
        assert!(IdentityConstraint::from_parts(NS, None, Some(3)).is_none());
        let json = r#"{"uuid":"e2c56db5-dffb-48d2-b060-d0f5a71096e0","minor":3}"#;
        assert!(serde_json::from_str::<IdentityConstraint>(json).is_err());
    }

    #[test]
    fn test_region_identifier_format() {
        assert_eq!(
            IdentityConstraint::new(NS).region_identifier(),
            "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0"
        );
        assert_eq!(
            IdentityConstraint::with_major_minor(NS, 100, 50).region_identifier(),
            "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0:100:50"
        );
    }

    #[test]
    fn test_constraint_serde_shape() {
        let c = IdentityConstraint::with_major(NS, 7);
        let json = serde_json::to_string(&c).unwrap();
        assert!(json.contains("\"major\":7"));
        assert!(!json.contains("minor"));
        let back: IdentityConstraint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_identity_converts_to_exact_constraint() {
        let id = BeaconIdentity {
            uuid: NS,
            major: 100,
            minor: 50,
        };
        let c: IdentityConstraint = id.into();
        assert_eq!(c, IdentityConstraint::with_major_minor(NS, 100, 50));
    }
}
