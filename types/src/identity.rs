//! Product identities: typed views of a Person inside one product line.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CorrelationKey, EntityId, EntityKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    Patient,
    Member,
    RxMember,
    Subject,
}

impl ProductType {
    pub const ALL: [ProductType; 4] = [
        ProductType::Patient,
        ProductType::Member,
        ProductType::RxMember,
        ProductType::Subject,
    ];

    #[must_use]
    pub const fn entity_kind(self) -> EntityKind {
        match self {
            ProductType::Patient => EntityKind::Patient,
            ProductType::Member => EntityKind::Member,
            ProductType::RxMember => EntityKind::RxMember,
            ProductType::Subject => EntityKind::Subject,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        self.entity_kind().as_str()
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|product| product.as_str() == raw.trim().to_ascii_lowercase())
    }
}

/// Product-specific state carried by an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "product", rename_all = "snake_case")]
pub enum IdentityProfile {
    Patient {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        facility: Option<String>,
    },
    Member {
        /// Key into the payer profile's plan table.
        plan_code: String,
        group_number: String,
    },
    RxMember {
        bin: String,
        pcn: String,
        rx_group: String,
        plan_code: String,
    },
    Subject {
        study_id: String,
        site_id: String,
        arm: String,
        consent_date: NaiveDate,
    },
}

impl IdentityProfile {
    #[must_use]
    pub const fn product(&self) -> ProductType {
        match self {
            IdentityProfile::Patient { .. } => ProductType::Patient,
            IdentityProfile::Member { .. } => ProductType::Member,
            IdentityProfile::RxMember { .. } => ProductType::RxMember,
            IdentityProfile::Subject { .. } => ProductType::Subject,
        }
    }

    /// Coverage plan referenced by claims and pharmacy identities.
    #[must_use]
    pub fn plan_code(&self) -> Option<&str> {
        match self {
            IdentityProfile::Member { plan_code, .. }
            | IdentityProfile::RxMember { plan_code, .. } => Some(plan_code),
            IdentityProfile::Patient { .. } | IdentityProfile::Subject { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("identity {id} already closed on {closed_on}")]
pub struct IdentityClosedError {
    pub id: EntityId,
    pub closed_on: NaiveDate,
}

/// A product-scoped record bound to exactly one Person.
///
/// Identity, owning person and correlation key are fixed at bind time. The
/// enrollment window is `[effective, end)`; an identity without an end date is
/// active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductIdentity {
    id: EntityId,
    person: EntityId,
    correlation_key: CorrelationKey,
    /// Record number, enrollment number or pharmacy cardholder id.
    pub local_id: String,
    pub effective: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end: Option<NaiveDate>,
    pub profile: IdentityProfile,
}

impl ProductIdentity {
    #[must_use]
    pub fn new(
        id: EntityId,
        person: EntityId,
        correlation_key: CorrelationKey,
        local_id: impl Into<String>,
        effective: NaiveDate,
        profile: IdentityProfile,
    ) -> Self {
        Self {
            id,
            person,
            correlation_key,
            local_id: local_id.into(),
            effective,
            end: None,
            profile,
        }
    }

    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    #[must_use]
    pub const fn person(&self) -> EntityId {
        self.person
    }

    #[must_use]
    pub const fn correlation_key(&self) -> CorrelationKey {
        self.correlation_key
    }

    #[must_use]
    pub const fn product(&self) -> ProductType {
        self.profile.product()
    }

    #[must_use]
    pub const fn end(&self) -> Option<NaiveDate> {
        self.end
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.end.is_none()
    }

    /// Whether the enrollment window covers `date`.
    #[must_use]
    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.effective && self.end.is_none_or(|end| date < end)
    }

    pub fn close(&mut self, on: NaiveDate) -> Result<(), IdentityClosedError> {
        match self.end {
            Some(closed_on) => Err(IdentityClosedError {
                id: self.id,
                closed_on,
            }),
            None => {
                self.end = Some(on);
                Ok(())
            }
        }
    }
}
