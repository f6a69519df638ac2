//! Entity identifiers and correlation keys.
//!
//! Every canonical entity carries an [`EntityId`]: its kind plus a sequence
//! number drawn from a per-kind monotonic counter. The textual form
//! (`PAT-000001`) is what codecs use as logical ids, so it must stay stable
//! across re-export and parse back losslessly.

use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Every kind of entity the session can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Person,
    Patient,
    Member,
    RxMember,
    Subject,
    Encounter,
    Condition,
    Observation,
    Claim,
    Prescription,
    AdverseEvent,
}

impl EntityKind {
    pub const ALL: [EntityKind; 11] = [
        EntityKind::Person,
        EntityKind::Patient,
        EntityKind::Member,
        EntityKind::RxMember,
        EntityKind::Subject,
        EntityKind::Encounter,
        EntityKind::Condition,
        EntityKind::Observation,
        EntityKind::Claim,
        EntityKind::Prescription,
        EntityKind::AdverseEvent,
    ];

    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            EntityKind::Person => "PER",
            EntityKind::Patient => "PAT",
            EntityKind::Member => "MBR",
            EntityKind::RxMember => "RXM",
            EntityKind::Subject => "SUB",
            EntityKind::Encounter => "ENC",
            EntityKind::Condition => "CON",
            EntityKind::Observation => "OBS",
            EntityKind::Claim => "CLM",
            EntityKind::Prescription => "RX",
            EntityKind::AdverseEvent => "AE",
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EntityKind::Person => "person",
            EntityKind::Patient => "patient",
            EntityKind::Member => "member",
            EntityKind::RxMember => "rx_member",
            EntityKind::Subject => "subject",
            EntityKind::Encounter => "encounter",
            EntityKind::Condition => "condition",
            EntityKind::Observation => "observation",
            EntityKind::Claim => "claim",
            EntityKind::Prescription => "prescription",
            EntityKind::AdverseEvent => "adverse_event",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.prefix() == prefix)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of one canonical entity.
///
/// Sequence zero is unrepresentable; allocation starts at one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    kind: EntityKind,
    seq: NonZeroU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityIdError {
    #[error("entity id sequence must be non-zero")]
    ZeroSequence,
    #[error("malformed entity id: {0}")]
    Malformed(String),
}

impl EntityId {
    pub fn new(kind: EntityKind, seq: u64) -> Result<Self, EntityIdError> {
        NonZeroU64::new(seq)
            .map(|seq| Self { kind, seq })
            .ok_or(EntityIdError::ZeroSequence)
    }

    #[must_use]
    pub const fn from_seq(kind: EntityKind, seq: NonZeroU64) -> Self {
        Self { kind, seq }
    }

    #[must_use]
    pub const fn kind(self) -> EntityKind {
        self.kind
    }

    #[must_use]
    pub const fn seq(self) -> u64 {
        self.seq.get()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:06}", self.kind.prefix(), self.seq)
    }
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || EntityIdError::Malformed(s.to_string());
        let (prefix, digits) = s.trim().split_once('-').ok_or_else(malformed)?;
        let kind = EntityKind::from_prefix(prefix).ok_or_else(malformed)?;
        let seq: u64 = digits.parse().map_err(|_err| malformed())?;
        Self::new(kind, seq)
    }
}

impl TryFrom<String> for EntityId {
    type Error = EntityIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntityId> for String {
    fn from(value: EntityId) -> Self {
        value.to_string()
    }
}

/// Stable key binding all product identities of one synthetic individual.
///
/// Assigned once when a Person is created and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(Uuid);

impl CorrelationKey {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationKey {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}
