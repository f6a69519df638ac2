//! Clinical events owned by a Patient identity, plus trial adverse events
//! owned by a Subject identity.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Code, EntityId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncounterClass {
    Inpatient,
    Ambulatory,
    Emergency,
}

impl EncounterClass {
    pub const ALL: [EncounterClass; 3] = [
        EncounterClass::Inpatient,
        EncounterClass::Ambulatory,
        EncounterClass::Emergency,
    ];

    /// HL7 v3 ActCode used by FHIR `Encounter.class`.
    #[must_use]
    pub const fn act_code(self) -> &'static str {
        match self {
            EncounterClass::Inpatient => "IMP",
            EncounterClass::Ambulatory => "AMB",
            EncounterClass::Emergency => "EMER",
        }
    }

    /// HL7 v2 PV1-2 patient class.
    #[must_use]
    pub const fn patient_class(self) -> &'static str {
        match self {
            EncounterClass::Inpatient => "I",
            EncounterClass::Ambulatory => "O",
            EncounterClass::Emergency => "E",
        }
    }

    #[must_use]
    pub fn from_act_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|class| class.act_code() == code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encounter {
    id: EntityId,
    patient: EntityId,
    pub class: EncounterClass,
    pub start: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDateTime>,
    /// Diagnoses in rank order; the first is principal.
    #[serde(default)]
    pub diagnoses: Vec<Code>,
    #[serde(default)]
    pub procedures: Vec<Code>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility: Option<String>,
}

impl Encounter {
    #[must_use]
    pub fn new(id: EntityId, patient: EntityId, class: EncounterClass, start: NaiveDateTime) -> Self {
        Self {
            id,
            patient,
            class,
            start,
            end: None,
            diagnoses: Vec::new(),
            procedures: Vec::new(),
            facility: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    #[must_use]
    pub const fn patient(&self) -> EntityId {
        self.patient
    }

    #[must_use]
    pub fn service_date(&self) -> NaiveDate {
        self.start.date()
    }

    #[must_use]
    pub fn principal_diagnosis(&self) -> Option<&Code> {
        self.diagnoses.first()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionStatus {
    Active,
    Resolved,
}

impl ConditionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ConditionStatus::Active => "active",
            ConditionStatus::Resolved => "resolved",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(ConditionStatus::Active),
            "resolved" => Some(ConditionStatus::Resolved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    id: EntityId,
    patient: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter: Option<EntityId>,
    pub code: Code,
    pub onset: NaiveDate,
    pub status: ConditionStatus,
}

impl Condition {
    #[must_use]
    pub fn new(id: EntityId, patient: EntityId, code: Code, onset: NaiveDate) -> Self {
        Self {
            id,
            patient,
            encounter: None,
            code,
            onset,
            status: ConditionStatus::Active,
        }
    }

    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    #[must_use]
    pub const fn patient(&self) -> EntityId {
        self.patient
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: Decimal,
    pub unit: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<Decimal>,
}

impl ReferenceRange {
    /// HL7 v2 OBX-7 form, e.g. `70-99`, `>40`, `<200`.
    #[must_use]
    pub fn to_hl7(&self) -> String {
        match (self.low, self.high) {
            (Some(low), Some(high)) => format!("{low}-{high}"),
            (Some(low), None) => format!(">{low}"),
            (None, Some(high)) => format!("<{high}"),
            (None, None) => String::new(),
        }
    }
}

/// Abnormal flag relative to the reference range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interpretation {
    Low,
    Normal,
    High,
}

impl Interpretation {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Interpretation::Low => "L",
            Interpretation::Normal => "N",
            Interpretation::High => "H",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    id: EntityId,
    patient: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter: Option<EntityId>,
    pub code: Code,
    pub effective: NaiveDateTime,
    pub value: Quantity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_range: Option<ReferenceRange>,
}

impl Observation {
    #[must_use]
    pub fn new(
        id: EntityId,
        patient: EntityId,
        code: Code,
        effective: NaiveDateTime,
        value: Quantity,
    ) -> Self {
        Self {
            id,
            patient,
            encounter: None,
            code,
            effective,
            value,
            reference_range: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    #[must_use]
    pub const fn patient(&self) -> EntityId {
        self.patient
    }

    #[must_use]
    pub fn interpretation(&self) -> Option<Interpretation> {
        let range = self.reference_range.as_ref()?;
        if range.low.is_some_and(|low| self.value.value < low) {
            Some(Interpretation::Low)
        } else if range.high.is_some_and(|high| self.value.value > high) {
            Some(Interpretation::High)
        } else {
            Some(Interpretation::Normal)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AeSeverity {
    Mild,
    Moderate,
    Severe,
}

impl AeSeverity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            AeSeverity::Mild => "MILD",
            AeSeverity::Moderate => "MODERATE",
            AeSeverity::Severe => "SEVERE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdverseEvent {
    id: EntityId,
    subject: EntityId,
    pub term: String,
    pub severity: AeSeverity,
    pub serious: bool,
    pub start: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDate>,
}

impl AdverseEvent {
    #[must_use]
    pub fn new(
        id: EntityId,
        subject: EntityId,
        term: impl Into<String>,
        severity: AeSeverity,
        start: NaiveDate,
    ) -> Self {
        Self {
            id,
            subject,
            term: term.into(),
            severity,
            serious: false,
            start,
            end: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    #[must_use]
    pub const fn subject(&self) -> EntityId {
        self.subject
    }
}

#[cfg(test)]
mod tests {
    use super::{Interpretation, Observation, Quantity, ReferenceRange};
    use crate::{Code, EntityId, EntityKind};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn glucose(value: i64) -> Observation {
        let effective = NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(8, 0, 0))
            .expect("valid timestamp");
        let mut obs = Observation::new(
            EntityId::new(EntityKind::Observation, 1).expect("id"),
            EntityId::new(EntityKind::Patient, 1).expect("id"),
            Code::loinc("2345-7"),
            effective,
            Quantity {
                value: Decimal::from(value),
                unit: "mg/dL".to_string(),
            },
        );
        obs.reference_range = Some(ReferenceRange {
            low: Some(Decimal::from(70)),
            high: Some(Decimal::from(99)),
        });
        obs
    }

    #[test]
    fn interpretation_follows_reference_range() {
        assert_eq!(glucose(65).interpretation(), Some(Interpretation::Low));
        assert_eq!(glucose(85).interpretation(), Some(Interpretation::Normal));
        assert_eq!(glucose(140).interpretation(), Some(Interpretation::High));
    }

    #[test]
    fn reference_range_hl7_forms() {
        let both = ReferenceRange {
            low: Some(Decimal::from(70)),
            high: Some(Decimal::from(99)),
        };
        assert_eq!(both.to_hl7(), "70-99");
        let high_only = ReferenceRange {
            low: None,
            high: Some(Decimal::from(200)),
        };
        assert_eq!(high_only.to_hl7(), "<200");
    }
}
