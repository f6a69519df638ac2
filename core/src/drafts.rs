//! Inbound entity drafts and their normalization.
//!
//! Drafts are proposed field values from an untrusted producer (the generation
//! gateway, a request file, a test). Every field is optional at the wire level
//! so that a missing or malformed value becomes a report entry against that
//! one draft instead of failing the whole batch. A draft that collects any
//! error is skipped; nothing is coerced.
//!
//! Drafts reference each other by a batch-local `ref` label, or reference
//! existing entities by canonical id (`PAT-000001`).

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use healthsim_types::{
    Address, AdverseEvent, AeSeverity, Claim, ClaimLine, Code, CodeSystem, Condition,
    ConditionStatus, CorrelationKey, Drug, DurKind, Encounter, EncounterClass, Entity, EntityId,
    EntityKind, IdentityProfile, Money, Observation, Person, PersonName, Prescription,
    ProductType, Quantity, ReferenceRange, Sex, ValidationReport,
};

use crate::BindRequest;
use crate::codes::{is_ndc, is_procedure_code, is_well_formed};

/// Largest dispensed quantity a prescription draft may carry.
const MAX_QUANTITY: Decimal = Decimal::from_parts(9_999_999, 0, 0, false, 0);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityDraft {
    Person(PersonDraft),
    Identity(IdentityDraft),
    Encounter(EncounterDraft),
    Condition(ConditionDraft),
    Observation(ObservationDraft),
    Claim(ClaimDraft),
    Prescription(PrescriptionDraft),
    AdverseEvent(AdverseEventDraft),
}

impl EntityDraft {
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        match self {
            EntityDraft::Person(d) => d.label.as_deref(),
            EntityDraft::Identity(d) => d.label.as_deref(),
            EntityDraft::Encounter(d) => d.label.as_deref(),
            EntityDraft::Condition(d) => d.label.as_deref(),
            EntityDraft::Observation(d) => d.label.as_deref(),
            EntityDraft::Claim(d) => d.label.as_deref(),
            EntityDraft::Prescription(d) => d.label.as_deref(),
            EntityDraft::AdverseEvent(d) => d.label.as_deref(),
        }
    }

    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            EntityDraft::Person(_) => "person",
            EntityDraft::Identity(_) => "identity",
            EntityDraft::Encounter(_) => "encounter",
            EntityDraft::Condition(_) => "condition",
            EntityDraft::Observation(_) => "observation",
            EntityDraft::Claim(_) => "claim",
            EntityDraft::Prescription(_) => "prescription",
            EntityDraft::AdverseEvent(_) => "adverse_event",
        }
    }

    /// Report subject for draft number `index` of a batch.
    #[must_use]
    pub fn subject(&self, index: usize) -> String {
        match self.label() {
            Some(label) if !label.trim().is_empty() => format!("{}:{}", self.type_name(), label),
            _ => format!("{}#{index}", self.type_name()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeDraft {
    /// System name (`icd10-cm`), URI or HL7 mnemonic.
    pub system: Option<String>,
    pub code: Option<String>,
    pub display: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonDraft {
    #[serde(rename = "ref")]
    pub label: Option<String>,
    pub given: Option<String>,
    pub family: Option<String>,
    pub birth_date: Option<String>,
    pub sex: Option<String>,
    pub address: Option<Address>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityDraft {
    #[serde(rename = "ref")]
    pub label: Option<String>,
    pub person: Option<String>,
    pub product: Option<String>,
    pub local_id: Option<String>,
    pub effective: Option<String>,
    /// Product attributes: `plan_code`, `group_number`, `bin`, `pcn`,
    /// `rx_group`, `study_id`, `site_id`, `arm`, `consent_date`, `facility`.
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncounterDraft {
    #[serde(rename = "ref")]
    pub label: Option<String>,
    pub patient: Option<String>,
    pub class: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub diagnoses: Vec<CodeDraft>,
    pub procedures: Vec<CodeDraft>,
    pub facility: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionDraft {
    #[serde(rename = "ref")]
    pub label: Option<String>,
    pub patient: Option<String>,
    pub encounter: Option<String>,
    pub code: Option<CodeDraft>,
    pub onset: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservationDraft {
    #[serde(rename = "ref")]
    pub label: Option<String>,
    pub patient: Option<String>,
    pub encounter: Option<String>,
    pub code: Option<CodeDraft>,
    pub effective: Option<String>,
    pub value: Option<Decimal>,
    pub unit: Option<String>,
    pub low: Option<Decimal>,
    pub high: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimLineDraft {
    pub procedure: Option<String>,
    pub modifiers: Vec<String>,
    pub units: Option<u32>,
    pub billed: Option<Money>,
    pub authorization: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimDraft {
    #[serde(rename = "ref")]
    pub label: Option<String>,
    pub member: Option<String>,
    pub encounter: Option<String>,
    pub service_date: Option<String>,
    pub submission_date: Option<String>,
    /// ICD-10-CM codes, principal first.
    pub diagnoses: Vec<String>,
    pub billing_npi: Option<String>,
    pub place_of_service: Option<String>,
    pub lines: Vec<ClaimLineDraft>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrescriptionDraft {
    #[serde(rename = "ref")]
    pub label: Option<String>,
    pub rx_member: Option<String>,
    pub ndc: Option<String>,
    pub drug_name: Option<String>,
    pub quantity: Option<Decimal>,
    pub days_supply: Option<u32>,
    pub fill_date: Option<String>,
    pub prescriber_npi: Option<String>,
    pub pharmacy_npi: Option<String>,
    pub usual_and_customary: Option<Money>,
    pub overrides: Vec<DurKind>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdverseEventDraft {
    #[serde(rename = "ref")]
    pub label: Option<String>,
    pub subject: Option<String>,
    pub term: Option<String>,
    pub severity: Option<String>,
    pub serious: bool,
    pub start: Option<String>,
    pub end: Option<String>,
}

/// What a draft batch can see of the session it is being applied to.
pub trait DraftContext {
    /// Resolve a batch label or a canonical id of an existing entity.
    fn resolve(&self, reference: &str) -> Option<EntityId>;

    /// Assign the next identifier of `kind`.
    fn allocate(&self, kind: EntityKind) -> EntityId;
}

/// A draft that passed validation, ready to be added to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    Person(Person),
    Identity { id: EntityId, request: BindRequest },
    Entity(Entity),
}

impl Normalized {
    #[must_use]
    pub fn id(&self) -> EntityId {
        match self {
            Normalized::Person(person) => person.id(),
            Normalized::Identity { id, .. } => *id,
            Normalized::Entity(entity) => entity.id(),
        }
    }
}

/// Validate one draft and, if clean, build its canonical entity.
///
/// Problems are recorded against [`EntityDraft::subject`]; `None` means the
/// draft was skipped.
pub fn normalize(
    draft: &EntityDraft,
    index: usize,
    context: &impl DraftContext,
    report: &mut ValidationReport,
) -> Option<Normalized> {
    let subject = draft.subject(index);
    let mut check = Checker {
        report,
        context,
        subject: &subject,
    };
    let built = match draft {
        EntityDraft::Person(d) => check.person(d),
        EntityDraft::Identity(d) => check.identity(d),
        EntityDraft::Encounter(d) => check.encounter(d),
        EntityDraft::Condition(d) => check.condition(d),
        EntityDraft::Observation(d) => check.observation(d),
        EntityDraft::Claim(d) => check.claim(d),
        EntityDraft::Prescription(d) => check.prescription(d),
        EntityDraft::AdverseEvent(d) => check.adverse_event(d),
    };
    if !report.admit(&subject) {
        tracing::warn!(draft = %subject, "Rejected entity draft");
        return None;
    }
    built
}

struct Checker<'a, C> {
    report: &'a mut ValidationReport,
    context: &'a C,
    subject: &'a str,
}

impl<C: DraftContext> Checker<'_, C> {
    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.report.error(self.subject, field, message);
    }

    fn warn(&mut self, field: &str, message: impl Into<String>) {
        self.report.warn(self.subject, field, message);
    }

    fn text(&mut self, field: &str, value: Option<&String>) -> Option<String> {
        let value = value.map(|v| v.trim()).unwrap_or_default();
        if self.report.require(self.subject, field, value) {
            Some(value.to_string())
        } else {
            None
        }
    }

    fn date(&mut self, field: &str, value: Option<&String>) -> Option<NaiveDate> {
        let raw = self.text(field, value)?;
        self.parse_date(field, &raw)
    }

    fn optional_date(&mut self, field: &str, value: Option<&String>) -> Option<NaiveDate> {
        let raw = value.map(|v| v.trim()).filter(|v| !v.is_empty())?;
        self.parse_date(field, raw)
    }

    fn parse_date(&mut self, field: &str, raw: &str) -> Option<NaiveDate> {
        match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(date) => Some(date),
            Err(_) => {
                self.error(field, format!("expected YYYY-MM-DD, got {raw:?}"));
                None
            }
        }
    }

    fn datetime(&mut self, field: &str, value: Option<&String>) -> Option<NaiveDateTime> {
        let raw = self.text(field, value)?;
        self.parse_datetime(field, &raw)
    }

    fn parse_datetime(&mut self, field: &str, raw: &str) -> Option<NaiveDateTime> {
        let parsed = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .ok()
                    .map(|date| date.and_time(NaiveTime::MIN))
            });
        if parsed.is_none() {
            self.error(field, format!("expected YYYY-MM-DDTHH:MM:SS, got {raw:?}"));
        }
        parsed
    }

    fn reference(
        &mut self,
        field: &str,
        value: Option<&String>,
        expected: EntityKind,
    ) -> Option<EntityId> {
        let raw = self.text(field, value)?;
        self.resolve(field, &raw, expected)
    }

    fn optional_reference(
        &mut self,
        field: &str,
        value: Option<&String>,
        expected: EntityKind,
    ) -> Option<EntityId> {
        let raw = value.map(|v| v.trim()).filter(|v| !v.is_empty())?;
        self.resolve(field, raw, expected)
    }

    fn resolve(&mut self, field: &str, raw: &str, expected: EntityKind) -> Option<EntityId> {
        match self.context.resolve(raw) {
            Some(id) if id.kind() == expected => Some(id),
            Some(id) => {
                self.error(
                    field,
                    format!("{raw} resolves to {id}, expected a {}", expected.as_str()),
                );
                None
            }
            None => {
                self.error(field, format!("unresolved reference {raw:?}"));
                None
            }
        }
    }

    fn code(&mut self, field: &str, draft: Option<&CodeDraft>) -> Option<Code> {
        let Some(draft) = draft else {
            self.error(field, "required field is missing");
            return None;
        };
        let system_raw = self.text(&format!("{field}.system"), draft.system.as_ref())?;
        let value = self.text(&format!("{field}.code"), draft.code.as_ref())?;
        let Some(system) = parse_system(&system_raw) else {
            self.error(field, format!("unknown code system {system_raw:?}"));
            return None;
        };
        let mut code = Code::new(system, value);
        code.display = draft.display.clone().filter(|d| !d.trim().is_empty());
        self.well_formed(field, code)
    }

    fn well_formed(&mut self, field: &str, code: Code) -> Option<Code> {
        if is_well_formed(&code) {
            Some(code)
        } else {
            self.error(
                field,
                format!("{} is not a well-formed {:?} code", code.code, code.system),
            );
            None
        }
    }

    fn npi(&mut self, field: &str, value: Option<&String>) -> String {
        let value = value.map(|v| v.trim()).unwrap_or_default();
        if value.is_empty() {
            self.warn(field, "expected field is missing");
        } else if value.len() != 10 || !value.bytes().all(|b| b.is_ascii_digit()) {
            self.error(field, format!("NPI must be 10 digits, got {value:?}"));
        }
        value.to_string()
    }

    fn person(&mut self, d: &PersonDraft) -> Option<Normalized> {
        let given = self.text("given", d.given.as_ref());
        let family = self.text("family", d.family.as_ref());
        let birth_date = self.date("birth_date", d.birth_date.as_ref());
        let sex = match d.sex.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => Some(Sex::Unknown),
            Some(raw) => {
                let sex = Sex::parse(raw);
                if sex.is_none() {
                    self.error("sex", format!("unknown sex {raw:?}"));
                }
                sex
            }
        };
        let address = d.address.clone().unwrap_or_default();
        if !address.is_complete() {
            self.warn("address", "address is incomplete");
        }
        let (Some(given), Some(family), Some(birth_date), Some(sex)) =
            (given, family, birth_date, sex)
        else {
            return None;
        };
        Some(Normalized::Person(Person::new(
            self.context.allocate(EntityKind::Person),
            CorrelationKey::generate(),
            PersonName::new(given, family),
            birth_date,
            sex,
            address,
        )))
    }

    fn attribute(&mut self, d: &IdentityDraft, name: &str) -> Option<String> {
        self.text(&format!("attributes.{name}"), d.attributes.get(name))
    }

    fn identity(&mut self, d: &IdentityDraft) -> Option<Normalized> {
        let person = self.reference("person", d.person.as_ref(), EntityKind::Person);
        let local_id = self.text("local_id", d.local_id.as_ref());
        let effective = self.date("effective", d.effective.as_ref());
        let product_raw = self.text("product", d.product.as_ref())?;
        let Some(product) = ProductType::parse(&product_raw) else {
            self.error("product", format!("unknown product {product_raw:?}"));
            return None;
        };

        let profile = match product {
            ProductType::Patient => Some(IdentityProfile::Patient {
                facility: d.attributes.get("facility").cloned(),
            }),
            ProductType::Member => {
                let plan_code = self.attribute(d, "plan_code");
                let group_number = self.attribute(d, "group_number");
                plan_code.zip(group_number).map(|(plan_code, group_number)| {
                    IdentityProfile::Member {
                        plan_code,
                        group_number,
                    }
                })
            }
            ProductType::RxMember => {
                let bin = self.attribute(d, "bin");
                if let Some(bin) = &bin
                    && (bin.len() != 6 || !bin.bytes().all(|b| b.is_ascii_digit()))
                {
                    self.error("attributes.bin", format!("BIN must be 6 digits, got {bin:?}"));
                }
                let pcn = self.attribute(d, "pcn");
                let rx_group = self.attribute(d, "rx_group");
                let plan_code = self.attribute(d, "plan_code");
                match (bin, pcn, rx_group, plan_code) {
                    (Some(bin), Some(pcn), Some(rx_group), Some(plan_code)) => {
                        Some(IdentityProfile::RxMember {
                            bin,
                            pcn,
                            rx_group,
                            plan_code,
                        })
                    }
                    _ => None,
                }
            }
            ProductType::Subject => {
                let study_id = self.attribute(d, "study_id");
                let site_id = self.attribute(d, "site_id");
                let arm = self.attribute(d, "arm");
                let consent_date =
                    self.date("attributes.consent_date", d.attributes.get("consent_date"));
                match (study_id, site_id, arm, consent_date) {
                    (Some(study_id), Some(site_id), Some(arm), Some(consent_date)) => {
                        Some(IdentityProfile::Subject {
                            study_id,
                            site_id,
                            arm,
                            consent_date,
                        })
                    }
                    _ => None,
                }
            }
        };

        let (Some(person), Some(local_id), Some(effective), Some(profile)) =
            (person, local_id, effective, profile)
        else {
            return None;
        };
        Some(Normalized::Identity {
            id: self.context.allocate(product.entity_kind()),
            request: BindRequest {
                person,
                local_id,
                effective,
                profile,
            },
        })
    }

    fn encounter(&mut self, d: &EncounterDraft) -> Option<Normalized> {
        let patient = self.reference("patient", d.patient.as_ref(), EntityKind::Patient);
        let class = self.text("class", d.class.as_ref()).and_then(|raw| {
            let class = parse_encounter_class(&raw);
            if class.is_none() {
                self.error("class", format!("unknown encounter class {raw:?}"));
            }
            class
        });
        let start = self.datetime("start", d.start.as_ref());
        let end = d
            .end
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .and_then(|raw| self.parse_datetime("end", raw));
        if let (Some(start), Some(end)) = (start, end)
            && end < start
        {
            self.error("end", "encounter ends before it starts");
        }
        let diagnoses = self.codes("diagnoses", &d.diagnoses);
        let procedures = self.codes("procedures", &d.procedures);
        if diagnoses.is_empty() {
            self.warn("diagnoses", "encounter has no diagnoses");
        }

        let (Some(patient), Some(class), Some(start)) = (patient, class, start) else {
            return None;
        };
        let mut encounter = Encounter::new(
            self.context.allocate(EntityKind::Encounter),
            patient,
            class,
            start,
        );
        encounter.end = end;
        encounter.diagnoses = diagnoses;
        encounter.procedures = procedures;
        encounter.facility = d.facility.clone().filter(|f| !f.trim().is_empty());
        Some(Normalized::Entity(Entity::Encounter(encounter)))
    }

    fn codes(&mut self, field: &str, drafts: &[CodeDraft]) -> Vec<Code> {
        drafts
            .iter()
            .enumerate()
            .filter_map(|(i, draft)| self.code(&format!("{field}[{i}]"), Some(draft)))
            .collect()
    }

    fn condition(&mut self, d: &ConditionDraft) -> Option<Normalized> {
        let patient = self.reference("patient", d.patient.as_ref(), EntityKind::Patient);
        let encounter =
            self.optional_reference("encounter", d.encounter.as_ref(), EntityKind::Encounter);
        let code = self.code("code", d.code.as_ref());
        let onset = self.date("onset", d.onset.as_ref());
        let status = match d.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => Some(ConditionStatus::Active),
            Some(raw) => {
                let status = ConditionStatus::parse(raw);
                if status.is_none() {
                    self.error("status", format!("unknown condition status {raw:?}"));
                }
                status
            }
        };

        let (Some(patient), Some(code), Some(onset), Some(status)) =
            (patient, code, onset, status)
        else {
            return None;
        };
        let mut condition = Condition::new(
            self.context.allocate(EntityKind::Condition),
            patient,
            code,
            onset,
        );
        condition.encounter = encounter;
        condition.status = status;
        Some(Normalized::Entity(Entity::Condition(condition)))
    }

    fn observation(&mut self, d: &ObservationDraft) -> Option<Normalized> {
        let patient = self.reference("patient", d.patient.as_ref(), EntityKind::Patient);
        let encounter =
            self.optional_reference("encounter", d.encounter.as_ref(), EntityKind::Encounter);
        let code = self.code("code", d.code.as_ref());
        let effective = self.datetime("effective", d.effective.as_ref());
        let unit = self.text("unit", d.unit.as_ref());
        if d.value.is_none() {
            self.error("value", "required field is missing");
        }
        if let (Some(low), Some(high)) = (d.low, d.high)
            && low > high
        {
            self.error("low", "reference range low exceeds high");
        }

        let (Some(patient), Some(code), Some(effective), Some(value), Some(unit)) =
            (patient, code, effective, d.value, unit)
        else {
            return None;
        };
        let mut observation = Observation::new(
            self.context.allocate(EntityKind::Observation),
            patient,
            code,
            effective,
            Quantity { value, unit },
        );
        observation.encounter = encounter;
        if d.low.is_some() || d.high.is_some() {
            observation.reference_range = Some(ReferenceRange {
                low: d.low,
                high: d.high,
            });
        }
        Some(Normalized::Entity(Entity::Observation(observation)))
    }

    fn claim(&mut self, d: &ClaimDraft) -> Option<Normalized> {
        let member = self.reference("member", d.member.as_ref(), EntityKind::Member);
        let encounter =
            self.optional_reference("encounter", d.encounter.as_ref(), EntityKind::Encounter);
        let service_date = self.date("service_date", d.service_date.as_ref());
        let submission_date = self.date("submission_date", d.submission_date.as_ref());
        let billing_npi = self.npi("billing_npi", d.billing_npi.as_ref());

        let diagnoses: Vec<Code> = d
            .diagnoses
            .iter()
            .enumerate()
            .filter_map(|(i, raw)| {
                self.well_formed(&format!("diagnoses[{i}]"), Code::icd10(raw.trim()))
            })
            .collect();
        if d.diagnoses.is_empty() {
            self.warn("diagnoses", "claim has no diagnoses");
        }
        if d.lines.is_empty() {
            self.error("lines", "claim has no service lines");
        }
        let mut lines = Vec::with_capacity(d.lines.len());
        for (i, line) in d.lines.iter().enumerate() {
            if let Some(line) = self.claim_line(i, line) {
                lines.push(line);
            }
        }

        let (Some(member), Some(service_date), Some(submission_date)) =
            (member, service_date, submission_date)
        else {
            return None;
        };
        let mut claim = Claim::new(
            self.context.allocate(EntityKind::Claim),
            member,
            service_date,
            submission_date,
        );
        claim.encounter = encounter;
        claim.diagnoses = diagnoses;
        claim.billing_npi = billing_npi;
        if let Some(pos) = d.place_of_service.as_ref().filter(|p| !p.trim().is_empty()) {
            claim.place_of_service = pos.trim().to_string();
        }
        claim.lines = lines;
        Some(Normalized::Entity(Entity::Claim(claim)))
    }

    fn claim_line(&mut self, index: usize, d: &ClaimLineDraft) -> Option<ClaimLine> {
        let field = format!("lines[{index}]");
        let procedure = self
            .text(&format!("{field}.procedure"), d.procedure.as_ref())
            .and_then(|raw| {
                if is_procedure_code(&raw) {
                    let system = if raw.starts_with(|c: char| c.is_ascii_digit()) {
                        CodeSystem::Cpt
                    } else {
                        CodeSystem::Hcpcs
                    };
                    Some(Code::new(system, raw))
                } else {
                    self.error(
                        &format!("{field}.procedure"),
                        format!("{raw} is not a CPT or HCPCS code"),
                    );
                    None
                }
            });
        let billed = match d.billed {
            Some(billed) if billed.is_negative() => {
                self.error(&format!("{field}.billed"), "billed charge is negative");
                None
            }
            Some(billed) if billed.exceeds_charge_limit() => {
                self.error(
                    &format!("{field}.billed"),
                    format!("billed charge exceeds {}", Money::MAX_CHARGE),
                );
                None
            }
            Some(billed) => Some(billed),
            None => {
                self.error(&format!("{field}.billed"), "required field is missing");
                None
            }
        };
        let (Some(procedure), Some(billed)) = (procedure, billed) else {
            return None;
        };
        let line_number = u32::try_from(index + 1).unwrap_or(u32::MAX);
        let mut line = ClaimLine::new(line_number, procedure, d.units.unwrap_or(1), billed);
        line.modifiers.clone_from(&d.modifiers);
        line.authorization = d.authorization.clone().filter(|a| !a.trim().is_empty());
        Some(line)
    }

    fn prescription(&mut self, d: &PrescriptionDraft) -> Option<Normalized> {
        let rx_member = self.reference("rx_member", d.rx_member.as_ref(), EntityKind::RxMember);
        let ndc = self.text("ndc", d.ndc.as_ref()).and_then(|raw| {
            let compact = raw.replace('-', "");
            if is_ndc(&compact) {
                Some(compact)
            } else {
                self.error("ndc", format!("{raw} is not an 11-digit NDC"));
                None
            }
        });
        let drug_name = self.text("drug_name", d.drug_name.as_ref());
        let fill_date = self.date("fill_date", d.fill_date.as_ref());
        let quantity = match d.quantity {
            Some(quantity) if quantity > MAX_QUANTITY => {
                self.error("quantity", format!("quantity exceeds {MAX_QUANTITY}"));
                None
            }
            Some(quantity) if quantity > Decimal::ZERO => Some(quantity),
            Some(_) => {
                self.error("quantity", "quantity must be positive");
                None
            }
            None => {
                self.error("quantity", "required field is missing");
                None
            }
        };
        let days_supply = match d.days_supply {
            Some(days) if days > 0 => Some(days),
            _ => {
                self.error("days_supply", "days supply must be a positive integer");
                None
            }
        };
        let usual_and_customary = match d.usual_and_customary {
            Some(amount) if amount.exceeds_charge_limit() => {
                self.error(
                    "usual_and_customary",
                    format!("amount exceeds {}", Money::MAX_CHARGE),
                );
                None
            }
            Some(amount) if !amount.is_negative() => Some(amount),
            _ => {
                self.error("usual_and_customary", "non-negative amount required");
                None
            }
        };
        let prescriber_npi = self.npi("prescriber_npi", d.prescriber_npi.as_ref());
        let pharmacy_npi = self.npi("pharmacy_npi", d.pharmacy_npi.as_ref());

        let (
            Some(rx_member),
            Some(ndc),
            Some(name),
            Some(fill_date),
            Some(quantity),
            Some(days_supply),
            Some(usual_and_customary),
        ) = (
            rx_member,
            ndc,
            drug_name,
            fill_date,
            quantity,
            days_supply,
            usual_and_customary,
        )
        else {
            return None;
        };
        let mut prescription = Prescription::new(
            self.context.allocate(EntityKind::Prescription),
            rx_member,
            Drug { ndc, name },
            quantity,
            days_supply,
            fill_date,
            usual_and_customary,
        );
        prescription.prescriber_npi = prescriber_npi;
        prescription.pharmacy_npi = pharmacy_npi;
        prescription.overrides.clone_from(&d.overrides);
        Some(Normalized::Entity(Entity::Prescription(prescription)))
    }

    fn adverse_event(&mut self, d: &AdverseEventDraft) -> Option<Normalized> {
        let subject = self.reference("subject", d.subject.as_ref(), EntityKind::Subject);
        let term = self.text("term", d.term.as_ref());
        let severity = self.text("severity", d.severity.as_ref()).and_then(|raw| {
            let severity = parse_ae_severity(&raw);
            if severity.is_none() {
                self.error("severity", format!("unknown severity {raw:?}"));
            }
            severity
        });
        let start = self.date("start", d.start.as_ref());
        let end = self.optional_date("end", d.end.as_ref());
        if let (Some(start), Some(end)) = (start, end)
            && end < start
        {
            self.error("end", "adverse event ends before it starts");
        }

        let (Some(subject), Some(term), Some(severity), Some(start)) =
            (subject, term, severity, start)
        else {
            return None;
        };
        let mut event = AdverseEvent::new(
            self.context.allocate(EntityKind::AdverseEvent),
            subject,
            term,
            severity,
            start,
        );
        event.serious = d.serious;
        event.end = end;
        Some(Normalized::Entity(Entity::AdverseEvent(event)))
    }
}

fn parse_system(raw: &str) -> Option<CodeSystem> {
    serde_json::from_value::<CodeSystem>(Value::String(raw.to_ascii_lowercase()))
        .ok()
        .or_else(|| CodeSystem::from_uri(raw))
        .or_else(|| CodeSystem::from_hl7_mnemonic(raw))
}

fn parse_encounter_class(raw: &str) -> Option<EncounterClass> {
    serde_json::from_value::<EncounterClass>(Value::String(raw.to_ascii_lowercase()))
        .ok()
        .or_else(|| EncounterClass::from_act_code(&raw.to_ascii_uppercase()))
}

fn parse_ae_severity(raw: &str) -> Option<AeSeverity> {
    serde_json::from_value::<AeSeverity>(Value::String(raw.to_ascii_uppercase())).ok()
}
