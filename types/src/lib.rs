//! Canonical entity model for HealthSim.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Every other crate speaks in these types: the correlation graph binds them,
//! the adjudication engine prices them, codecs serialize them and the session
//! layer persists them.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod claim;
mod clinical;
mod codes;
mod entity_set;
mod identity;
mod ids;
mod money;
mod person;
mod pharmacy;
mod report;

pub use claim::{
    AdjustmentGroup, AppealOutcome, AppealRecord, AppealRights, Claim, ClaimLine, ClaimStatus,
    CostShare, Denial, DenialReason, InvalidTransition, LineOutcome, LineStatus,
};
pub use clinical::{
    AdverseEvent, AeSeverity, Condition, ConditionStatus, Encounter, EncounterClass,
    Interpretation, Observation, Quantity, ReferenceRange,
};
pub use codes::{Code, CodeSystem};
pub use entity_set::{Cohort, CohortCriteria, CohortSummary, Entity, EntitySet};
pub use identity::{IdentityClosedError, IdentityProfile, ProductIdentity, ProductType};
pub use ids::{CorrelationKey, EntityId, EntityIdError, EntityKind};
pub use money::Money;
pub use person::{Address, Person, PersonName, Sex};
pub use pharmacy::{
    Drug, DurAction, DurAlert, DurKind, DurSeverity, FillStatus, PharmacyOutcome,
    Prescription, PricingBasis, PricingBreakdown,
};
pub use report::{Severity, SkippedEntity, ValidationIssue, ValidationReport};

use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Cohort Names
// ============================================================================

/// Name a cohort is saved under.
///
/// Non-empty after trimming, at most 64 characters, and limited to
/// ASCII letters, digits, `-`, `_` and `.` so it is safe as a store key
/// and a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CohortName(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CohortNameError {
    #[error("cohort name must not be empty")]
    Empty,
    #[error("cohort name exceeds {max} characters")]
    TooLong { max: usize },
    #[error("cohort name contains invalid character {0:?}")]
    InvalidChar(char),
}

impl CohortName {
    pub const MAX_LEN: usize = 64;

    pub fn new(value: impl Into<String>) -> Result<Self, CohortNameError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(CohortNameError::Empty);
        }
        if trimmed.chars().count() > Self::MAX_LEN {
            return Err(CohortNameError::TooLong { max: Self::MAX_LEN });
        }
        if let Some(bad) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(CohortNameError::InvalidChar(bad));
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl TryFrom<String> for CohortName {
    type Error = CohortNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for CohortName {
    type Error = CohortNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CohortName> for String {
    fn from(value: CohortName) -> Self {
        value.0
    }
}

impl Deref for CohortName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl AsRef<str> for CohortName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for CohortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
