//! X12 837 professional claims (005010X222A1).
//!
//! One transaction set per claim. The canonical claim and member ids travel
//! in `CLM01` and `REF*1W` so an import reproduces the same claim. The
//! subscriber loop also carries the person id and correlation key (`REF*ZZ`),
//! the address (`N3`/`N4`), the plan (`SBR04`) and the coverage dates
//! (`DTP*356`/`DTP*357`), so the member and the person come back too.
//! Adjudication results are not part of an 837; imported claims come back
//! `Submitted`.

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use healthsim_core::codes::{icd10_with_decimal, is_well_formed};
use healthsim_types::{
    Address, Claim, ClaimLine, Code, CodeSystem, CorrelationKey, Entity, EntityId, EntitySet,
    IdentityProfile, Money, Person, PersonName, ProductIdentity, Sex, ValidationReport,
};

use crate::text::{d8, money, parse_d8};
use crate::x12::{
    PROFESSIONAL_CLAIM, Segment, TransactionSet, composite, interchange, parse_interchange,
};
use crate::{Codec, CodecError, Export, ExportOptions, Import};

const NAME: &str = "x12-837p";
const SUBMITTER: &str = "HEALTHSIM";
/// Diagnosis pointers one `HI` segment can hold.
const HI_CODES: usize = 12;
const PERSON_REF: &str = "PERSON";
const CORRELATION_REF: &str = "CORRELATION";

#[derive(Debug, Clone, Copy, Default)]
pub struct X12Professional;

impl Codec for X12Professional {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "X12 837 professional claims (005010X222A1)"
    }

    fn supports_import(&self) -> bool {
        true
    }

    fn export(&self, entities: &EntitySet, options: &ExportOptions) -> Result<Export, CodecError> {
        let mut report = ValidationReport::new();
        let mut sets = Vec::new();

        for claim in &entities.claims {
            let subject = claim.id();
            let member = entities.identity(claim.member());
            let person = member.and_then(|member| entities.person(member.person()));
            if person.is_none() {
                report.error(
                    subject,
                    "NM1*IL",
                    format!("member {} is not in the set", claim.member()),
                );
            }
            report.require(subject, "NM1*85 billing NPI", &claim.billing_npi);
            if claim.diagnoses.is_empty() {
                report.error(subject, "HI", "claim has no diagnosis codes");
            }
            if claim.lines.is_empty() {
                report.error(subject, "LX", "claim has no service lines");
            }
            let (Some(member), Some(person)) = (member, person) else {
                report.admit(subject);
                continue;
            };
            if !report.admit(subject) {
                continue;
            }
            sets.push(claim_set(claim, member, person, options));
        }

        let sender = options.x12.sender_id.as_deref().unwrap_or(SUBMITTER);
        let receiver = options.x12.receiver_id.as_deref().unwrap_or(&options.payer_id);
        let text = interchange(options, PROFESSIONAL_CLAIM, sender, receiver, &sets);
        tracing::debug!(codec = NAME, claims = sets.len(), "Built 837P interchange");
        Ok(Export::single("claims.837", text, report))
    }

    fn import(&self, bytes: &[u8]) -> Result<Import, CodecError> {
        let sets = parse_interchange(NAME, bytes)?;
        let mut import = Import::default();
        for set in &sets {
            let location = format!("ST {}", set.control);
            match read_claim(set) {
                Ok((claim, subscriber)) => {
                    match subscriber {
                        Some((person, member)) => {
                            if import.entities.person(person.id()).is_none() {
                                import.entities.insert(Entity::Person(person));
                            }
                            if import.entities.identity(member.id()).is_none() {
                                import.entities.insert(Entity::Identity(member));
                            }
                        }
                        None => import.report.warn(
                            claim.id(),
                            "REF*ZZ",
                            "subscriber carries no person reference; only the claim was read",
                        ),
                    }
                    import.entities.insert(Entity::Claim(claim));
                }
                Err(message) => {
                    import.report.error(&location, "claim", message);
                    import.report.skip(&location, "transaction set could not be read");
                }
            }
        }
        tracing::debug!(
            codec = NAME,
            claims = import.entities.claims.len(),
            "Read 837P interchange"
        );
        Ok(import)
    }
}

fn claim_set(
    claim: &Claim,
    member: &ProductIdentity,
    person: &Person,
    options: &ExportOptions,
) -> Vec<Segment> {
    let claim_id = claim.id().to_string();
    let (plan_code, group_number) = match &member.profile {
        IdentityProfile::Member {
            plan_code,
            group_number,
        } => (plan_code.as_str(), group_number.as_str()),
        _ => ("", ""),
    };
    let address = &person.address;

    let mut segments = vec![
        Segment::new(
            "BHT",
            &["0019", "00", &claim_id, &d8(claim.submission_date), "0000", "CH"],
        ),
        Segment::new("NM1", &["41", "2", SUBMITTER, "", "", "", "", "46", SUBMITTER]),
        Segment::new(
            "NM1",
            &["40", "2", &options.payer_name, "", "", "", "", "46", &options.payer_id],
        ),
        Segment::new("HL", &["1", "", "20", "1"]),
        Segment::new(
            "NM1",
            &["85", "2", "BILLING PROVIDER", "", "", "", "", "XX", &claim.billing_npi],
        ),
        Segment::new("HL", &["2", "1", "22", "0"]),
        Segment::new("SBR", &["P", "18", group_number, plan_code, "", "", "", "", "CI"]),
        Segment::new(
            "NM1",
            &[
                "IL",
                "1",
                &person.name.family,
                &person.name.given,
                "",
                "",
                "",
                "MI",
                &member.local_id,
            ],
        ),
        Segment::new("N3", &[&address.line]),
        Segment::new("N4", &[&address.city, &address.state, &address.postal_code]),
        Segment::new("DMG", &["D8", &d8(person.birth_date), person.sex.letter()]),
        Segment::new("DTP", &["356", "D8", &d8(member.effective)]),
    ];
    if let Some(end) = member.end() {
        segments.push(Segment::new("DTP", &["357", "D8", &d8(end)]));
    }
    segments.extend([
        Segment::new("REF", &["1W", &claim.member().to_string()]),
        Segment::new("REF", &["ZZ", &person.id().to_string(), PERSON_REF]),
        Segment::new(
            "REF",
            &["ZZ", &person.correlation_key().to_string(), CORRELATION_REF],
        ),
        Segment::new(
            "NM1",
            &["PR", "2", &options.payer_name, "", "", "", "", "PI", &options.payer_id],
        ),
        Segment::new(
            "CLM",
            &[
                &claim_id,
                &money(claim.total_billed()),
                "",
                "",
                &composite(&[&claim.place_of_service, "B", "1"]),
                "Y",
                "A",
                "Y",
                "Y",
            ],
        ),
    ]);
    if let Some(encounter) = claim.encounter {
        segments.push(Segment::new("REF", &["EA", &encounter.to_string()]));
    }

    let diagnoses: Vec<String> = claim
        .diagnoses
        .iter()
        .enumerate()
        .map(|(index, code)| {
            let qualifier = if index == 0 { "ABK" } else { "ABF" };
            composite(&[qualifier, &code.compact()])
        })
        .collect();
    for chunk in diagnoses.chunks(HI_CODES) {
        let chunk: Vec<&str> = chunk.iter().map(String::as_str).collect();
        segments.push(Segment::new("HI", &chunk));
    }

    for line in &claim.lines {
        let mut procedure = vec!["HC", line.procedure.code.as_str()];
        procedure.extend(line.modifiers.iter().map(String::as_str));
        segments.push(Segment::new("LX", &[&line.line_number.to_string()]));
        segments.push(Segment::new(
            "SV1",
            &[
                &composite(&procedure),
                &money(line.billed),
                "UN",
                &line.units.to_string(),
                "",
                "",
                "1",
            ],
        ));
        segments.push(Segment::new("DTP", &["472", "D8", &d8(claim.service_date)]));
        if let Some(authorization) = &line.authorization {
            segments.push(Segment::new("REF", &["G1", authorization]));
        }
    }
    segments
}

/// The person and member identity a subscriber loop describes.
type Enrollment = (Person, ProductIdentity);

/// Subscriber loop fields, collected while walking a transaction set.
#[derive(Default)]
struct Subscriber {
    name: PersonName,
    local_id: String,
    address: Address,
    birth_date: Option<NaiveDate>,
    sex: Option<Sex>,
    plan_code: String,
    group_number: String,
    effective: Option<NaiveDate>,
    end: Option<NaiveDate>,
    person: Option<EntityId>,
    correlation_key: Option<CorrelationKey>,
}

impl Subscriber {
    fn read(&mut self, segment: &Segment) -> Result<(), String> {
        match segment.id() {
            "SBR" => {
                self.group_number = segment.element(3).to_string();
                self.plan_code = segment.element(4).to_string();
            }
            "NM1" => {
                self.name = PersonName::new(segment.element(4), segment.element(3));
                self.local_id = segment.element(9).to_string();
            }
            "N3" => self.address.line = segment.element(1).to_string(),
            "N4" => {
                self.address.city = segment.element(1).to_string();
                self.address.state = segment.element(2).to_string();
                self.address.postal_code = segment.element(3).to_string();
            }
            "DMG" => {
                self.birth_date = parse_d8(segment.element(2));
                self.sex = Sex::parse(segment.element(3));
            }
            "DTP" if segment.element(1) == "356" => self.effective = parse_d8(segment.element(3)),
            "DTP" if segment.element(1) == "357" => self.end = parse_d8(segment.element(3)),
            "REF" if segment.element(1) == "ZZ" => match segment.element(3) {
                PERSON_REF => self.person = Some(entity_id(segment.element(2), "REF*ZZ person")?),
                CORRELATION_REF => {
                    let key = CorrelationKey::from_str(segment.element(2))
                        .map_err(|err| format!("REF*ZZ correlation key: {err}"))?;
                    self.correlation_key = Some(key);
                }
                _ => {}
            },
            _ => {}
        }
        Ok(())
    }

    /// The person and member, when the loop named the person.
    fn build(self, member: EntityId) -> Result<Option<Enrollment>, String> {
        let (Some(person_id), Some(key)) = (self.person, self.correlation_key) else {
            return Ok(None);
        };
        let birth_date = self.birth_date.ok_or("missing or invalid DMG02 birth date")?;
        let sex = self.sex.ok_or("missing or unknown DMG03 sex")?;
        let effective = self.effective.ok_or("missing DTP*356 coverage start")?;
        let person = Person::new(person_id, key, self.name, birth_date, sex, self.address);
        let mut identity = ProductIdentity::new(
            member,
            person_id,
            key,
            self.local_id,
            effective,
            IdentityProfile::Member {
                plan_code: self.plan_code,
                group_number: self.group_number,
            },
        );
        if let Some(end) = self.end {
            identity.close(end).map_err(|err| err.to_string())?;
        }
        Ok(Some((person, identity)))
    }
}

/// Rebuild one claim, and its subscriber when present, from a transaction set.
fn read_claim(set: &TransactionSet) -> Result<(Claim, Option<Enrollment>), String> {
    let mut subscriber = Subscriber::default();
    let mut in_subscriber = false;
    let mut claim_id = None;
    let mut member = None;
    let mut submitted = None;
    let mut service_date = None;
    let mut billing_npi = String::new();
    let mut place_of_service = None;
    let mut encounter = None;
    let mut diagnoses = Vec::new();
    let mut lines: Vec<ClaimLine> = Vec::new();
    let mut line_number = None;

    for segment in &set.segments {
        match segment.id() {
            "SBR" => in_subscriber = true,
            "NM1" if in_subscriber => in_subscriber = segment.element(1) == "IL",
            "CLM" => in_subscriber = false,
            _ => {}
        }
        if in_subscriber {
            subscriber.read(segment)?;
        }
        match segment.id() {
            "BHT" => submitted = parse_d8(segment.element(4)),
            "NM1" if segment.element(1) == "85" => billing_npi = segment.element(9).to_string(),
            "REF" => match segment.element(1) {
                "1W" => member = Some(entity_id(segment.element(2), "REF*1W")?),
                "EA" => encounter = Some(entity_id(segment.element(2), "REF*EA")?),
                "G1" => {
                    let line = lines.last_mut().ok_or("REF*G1 before any service line")?;
                    line.authorization = Some(segment.element(2).to_string());
                }
                _ => {}
            },
            "CLM" => {
                claim_id = Some(entity_id(segment.element(1), "CLM01")?);
                place_of_service = segment.components(5).first().map(|pos| (*pos).to_string());
            }
            "HI" => {
                for n in 1..=HI_CODES {
                    let parts = segment.components(n);
                    if let [_, code, ..] = parts.as_slice() {
                        diagnoses.push(Code::icd10(icd10_with_decimal(code)));
                    }
                }
            }
            "LX" => {
                line_number = Some(
                    segment
                        .element(1)
                        .parse::<u32>()
                        .map_err(|_| format!("LX01 is not a line number: {}", segment.element(1)))?,
                );
            }
            "SV1" => lines.push(read_line(segment, line_number.take())?),
            "DTP" if segment.element(1) == "472" && service_date.is_none() => {
                service_date = parse_d8(segment.element(3));
            }
            _ => {}
        }
    }

    let id = claim_id.ok_or("missing CLM segment")?;
    let member = member.ok_or("missing REF*1W member id")?;
    let submitted = submitted.ok_or("missing or invalid BHT04 date")?;
    let service_date = service_date.ok_or("missing DTP*472 service date")?;

    let mut claim = Claim::new(id, member, service_date, submitted);
    claim.encounter = encounter;
    claim.billing_npi = billing_npi;
    if let Some(place_of_service) = place_of_service {
        claim.place_of_service = place_of_service;
    }
    claim.diagnoses = diagnoses;
    claim.lines = lines;
    let subscriber = subscriber.build(member)?;
    Ok((claim, subscriber))
}

fn read_line(segment: &Segment, line_number: Option<u32>) -> Result<ClaimLine, String> {
    let line_number = line_number.ok_or("SV1 without a preceding LX")?;
    let procedure = segment.components(1);
    let [_, code, modifiers @ ..] = procedure.as_slice() else {
        return Err(format!("SV101 has no procedure code: {}", segment.element(1)));
    };
    let billed = Decimal::from_str(segment.element(2))
        .map(Money::new)
        .map_err(|_| format!("SV102 is not an amount: {}", segment.element(2)))?;
    if billed.exceeds_charge_limit() {
        return Err(format!("SV102 exceeds {}: {billed}", Money::MAX_CHARGE));
    }
    let units = segment
        .element(4)
        .parse::<u32>()
        .map_err(|_| format!("SV104 is not a unit count: {}", segment.element(4)))?;

    let cpt = Code::cpt(*code);
    let procedure = if is_well_formed(&cpt) {
        cpt
    } else {
        Code::new(CodeSystem::Hcpcs, *code)
    };
    let mut line = ClaimLine::new(line_number, procedure, units, billed);
    line.modifiers = modifiers.iter().map(|modifier| (*modifier).to_string()).collect();
    Ok(line)
}

fn entity_id(raw: &str, field: &str) -> Result<EntityId, String> {
    EntityId::from_str(raw).map_err(|err| format!("{field}: {err}"))
}
