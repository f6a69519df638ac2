//! The root identity of one synthetic individual.
//!
//! All demographic truth lives on [`Person`]. Product identities reference it
//! through the correlation key and never copy name, birth date or address.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::{CorrelationKey, EntityId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Female,
    Male,
    Unknown,
}

impl Sex {
    /// FHIR administrative-gender code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Sex::Female => "female",
            Sex::Male => "male",
            Sex::Unknown => "unknown",
        }
    }

    /// Single-letter code shared by HL7 v2 PID-8, X12 DMG03 and SDTM SEX.
    #[must_use]
    pub const fn letter(self) -> &'static str {
        match self {
            Sex::Female => "F",
            Sex::Male => "M",
            Sex::Unknown => "U",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "female" | "f" => Some(Sex::Female),
            "male" | "m" => Some(Sex::Male),
            "unknown" | "u" | "other" => Some(Sex::Unknown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonName {
    pub given: String,
    pub family: String,
}

impl PersonName {
    #[must_use]
    pub fn new(given: impl Into<String>, family: impl Into<String>) -> Self {
        Self {
            given: given.into(),
            family: family.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

impl Address {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.line.trim().is_empty()
            && !self.city.trim().is_empty()
            && !self.state.trim().is_empty()
            && !self.postal_code.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    id: EntityId,
    correlation_key: CorrelationKey,
    pub name: PersonName,
    pub birth_date: NaiveDate,
    pub sex: Sex,
    #[serde(default)]
    pub address: Address,
}

impl Person {
    #[must_use]
    pub fn new(
        id: EntityId,
        correlation_key: CorrelationKey,
        name: PersonName,
        birth_date: NaiveDate,
        sex: Sex,
        address: Address,
    ) -> Self {
        Self {
            id,
            correlation_key,
            name,
            birth_date,
            sex,
            address,
        }
    }

    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    #[must_use]
    pub const fn correlation_key(&self) -> CorrelationKey {
        self.correlation_key
    }

    /// Age in completed years on `date`.
    #[must_use]
    pub fn age_on(&self, date: NaiveDate) -> u32 {
        let mut years = date.year() - self.birth_date.year();
        if (date.month(), date.day()) < (self.birth_date.month(), self.birth_date.day()) {
            years -= 1;
        }
        u32::try_from(years).unwrap_or(0)
    }
}
