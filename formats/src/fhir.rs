//! FHIR R4 `collection` Bundle, JSON.
//!
//! Patient identities become `Patient` resources; encounters, conditions and
//! observations follow as their own resources. Every resource's logical id is
//! the canonical entity id, so references (`Patient/PAT-000001`) are stable
//! across re-exports and the bundle can be imported back losslessly.
//!
//! Quantities are JSON numbers. When a binary float cannot hold the decimal
//! exactly, the element also gets an `_value` extension carrying the exact
//! text, and import reads that instead of the number.

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Map, Number, Value, json};

use healthsim_types::{
    Address, Code, CodeSystem, Condition, ConditionStatus, CorrelationKey, Encounter,
    EncounterClass, Entity, EntityId, EntityKind, EntitySet, IdentityProfile, Observation, Person,
    PersonName, ProductIdentity, ProductType, Quantity, ReferenceRange, Sex, ValidationReport,
};

use crate::{Codec, CodecError, Export, ExportOptions, Import};

const NAME: &str = "fhir-r4";
const PERSON_SYSTEM: &str = "urn:healthsim:person";
const CORRELATION_SYSTEM: &str = "urn:healthsim:correlation-key";
const RECORD_SYSTEM: &str = "urn:healthsim:mrn";
const ENROLLMENT_EXTENSION: &str = "urn:healthsim:enrollment";
const PROCEDURE_EXTENSION: &str = "urn:healthsim:procedure";
const EXACT_DECIMAL_EXTENSION: &str = "urn:healthsim:exact-decimal";
const ACT_CODE_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/v3-ActCode";
const CLINICAL_STATUS_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/condition-clinical";
const INTERPRETATION_SYSTEM: &str =
    "http://terminology.hl7.org/CodeSystem/v3-ObservationInterpretation";
const UCUM_SYSTEM: &str = "http://unitsofmeasure.org";

#[derive(Debug, Clone, Copy, Default)]
pub struct FhirR4;

impl Codec for FhirR4 {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "FHIR R4 collection Bundle (JSON)"
    }

    fn supports_import(&self) -> bool {
        true
    }

    fn export(&self, entities: &EntitySet, options: &ExportOptions) -> Result<Export, CodecError> {
        let mut report = ValidationReport::new();
        let mut entries = Vec::new();
        let mut exported: Vec<EntityId> = Vec::new();

        for identity in entities
            .identities
            .iter()
            .filter(|identity| identity.product() == ProductType::Patient)
        {
            let subject = identity.id();
            let person = entities.person(identity.person());
            match person {
                Some(person) => {
                    report.require(subject, "name.family", &person.name.family);
                    report.require(subject, "name.given", &person.name.given);
                    if !person.address.is_complete() {
                        report.warn(subject, "address", "address is incomplete");
                    }
                }
                None => report.error(subject, "person", "bound person is not in the set"),
            }
            if let Some(person) = person
                && report.admit(subject)
            {
                entries.push(entry("Patient", subject, patient_resource(person, identity)));
                exported.push(subject);
            }
        }

        for encounter in &entities.encounters {
            if admit_owned(&mut report, encounter.id(), encounter.patient(), &exported) {
                entries.push(entry("Encounter", encounter.id(), encounter_resource(encounter)));
            }
        }
        for condition in &entities.conditions {
            if admit_owned(&mut report, condition.id(), condition.patient(), &exported) {
                entries.push(entry("Condition", condition.id(), condition_resource(condition)));
            }
        }
        for observation in &entities.observations {
            if observation.value.unit.trim().is_empty() {
                report.warn(observation.id(), "valueQuantity.unit", "unit is missing");
            }
            if admit_owned(&mut report, observation.id(), observation.patient(), &exported) {
                entries.push(entry(
                    "Observation",
                    observation.id(),
                    observation_resource(observation),
                ));
            }
        }

        let bundle = json!({
            "resourceType": "Bundle",
            "type": "collection",
            "timestamp": datetime(options.generated_at),
            "entry": entries,
        });
        let text = serde_json::to_string_pretty(&bundle)
            .map_err(|err| CodecError::malformed(NAME, "Bundle", err.to_string()))?;
        tracing::debug!(codec = NAME, resources = entries_len(&bundle), "Built bundle");
        Ok(Export::single("bundle.json", text, report))
    }

    fn import(&self, bytes: &[u8]) -> Result<Import, CodecError> {
        let bundle: Value = serde_json::from_slice(bytes)
            .map_err(|err| CodecError::malformed(NAME, "Bundle", err.to_string()))?;
        if bundle["resourceType"] != "Bundle" {
            return Err(CodecError::malformed(NAME, "Bundle.resourceType", "not a Bundle"));
        }
        if bundle["type"] != "collection" {
            return Err(CodecError::malformed(NAME, "Bundle.type", "expected collection"));
        }
        let entries = bundle["entry"].as_array().map(Vec::as_slice).unwrap_or_default();

        let mut import = Import::default();
        for (index, entry) in entries.iter().enumerate() {
            let resource = &entry["resource"];
            let location = format!("Bundle.entry[{index}]");
            let parsed = match resource["resourceType"].as_str() {
                Some("Patient") => parse_patient(resource, &mut import.entities),
                Some("Encounter") => parse_encounter(resource, &mut import.entities),
                Some("Condition") => parse_condition(resource, &mut import.entities),
                Some("Observation") => parse_observation(resource, &mut import.entities),
                Some(other) => {
                    import
                        .report
                        .warn(&location, "resourceType", format!("{other} is not imported"));
                    Ok(())
                }
                None => Err("resourceType is missing".to_string()),
            };
            if let Err(message) = parsed {
                import.report.error(&location, "resource", message);
                import.report.skip(&location, "resource could not be parsed");
            }
        }
        Ok(import)
    }
}

fn entries_len(bundle: &Value) -> usize {
    bundle["entry"].as_array().map_or(0, Vec::len)
}

/// Admit an owned resource only when its patient was exported.
fn admit_owned(
    report: &mut ValidationReport,
    id: EntityId,
    owner: EntityId,
    exported: &[EntityId],
) -> bool {
    if !exported.contains(&owner) {
        report.error(id, "subject", format!("patient {owner} is not in the export"));
    }
    report.admit(id)
}

fn entry(resource_type: &str, id: EntityId, resource: Value) -> Value {
    json!({
        "fullUrl": format!("urn:healthsim:{resource_type}/{id}"),
        "resource": resource,
    })
}

fn reference(resource_type: &str, id: EntityId) -> Value {
    json!({ "reference": format!("{resource_type}/{id}") })
}

/// Fractional seconds are written only when present.
fn datetime(at: NaiveDateTime) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.fZ").to_string()
}

fn date(on: NaiveDate) -> String {
    on.format("%Y-%m-%d").to_string()
}

/// The JSON number for `value`, and its exact text when the number rounds it.
fn number(value: Decimal) -> (Value, Option<String>) {
    if value.fract().is_zero()
        && let Some(whole) = value.to_i64()
    {
        return (Value::Number(whole.into()), None);
    }
    match value.to_f64().and_then(Number::from_f64) {
        Some(number) if from_number(&number).is_ok_and(|back| back == value) => {
            (Value::Number(number), None)
        }
        Some(number) => (Value::Number(number), Some(value.to_string())),
        None => (Value::String(value.to_string()), None),
    }
}

/// Set `field` on `object`, with a `_field` exact-decimal extension when needed.
fn put_decimal(object: &mut Map<String, Value>, field: &str, value: Decimal) {
    let (json, exact) = number(value);
    object.insert(field.to_string(), json);
    if let Some(exact) = exact {
        object.insert(
            format!("_{field}"),
            json!({ "extension": [{ "url": EXACT_DECIMAL_EXTENSION, "valueString": exact }] }),
        );
    }
}

fn codeable(code: &Code) -> Value {
    let mut coding = Map::new();
    coding.insert("system".into(), code.system.uri().into());
    coding.insert("code".into(), code.code.clone().into());
    if let Some(display) = &code.display {
        coding.insert("display".into(), display.clone().into());
    }
    json!({ "coding": [coding] })
}

fn patient_resource(person: &Person, identity: &ProductIdentity) -> Value {
    let mut resource = json!({
        "resourceType": "Patient",
        "id": identity.id().to_string(),
        "identifier": [
            { "system": PERSON_SYSTEM, "value": person.id().to_string() },
            { "system": CORRELATION_SYSTEM, "value": person.correlation_key().to_string() },
            { "system": RECORD_SYSTEM, "value": identity.local_id },
        ],
        "active": identity.is_active(),
        "name": [{ "family": person.name.family, "given": [person.name.given] }],
        "gender": person.sex.as_str(),
        "birthDate": date(person.birth_date),
        "extension": [{
            "url": ENROLLMENT_EXTENSION,
            "valuePeriod": period(identity.effective, identity.end()),
        }],
    });
    if person.address != Address::default() {
        resource["address"] = json!([{
            "line": [person.address.line],
            "city": person.address.city,
            "state": person.address.state,
            "postalCode": person.address.postal_code,
        }]);
    }
    if let IdentityProfile::Patient {
        facility: Some(facility),
    } = &identity.profile
    {
        resource["managingOrganization"] = json!({ "display": facility });
    }
    resource
}

fn period(start: NaiveDate, end: Option<NaiveDate>) -> Value {
    let mut period = json!({ "start": date(start) });
    if let Some(end) = end {
        period["end"] = date(end).into();
    }
    period
}

fn encounter_resource(encounter: &Encounter) -> Value {
    let mut period = json!({ "start": datetime(encounter.start) });
    if let Some(end) = encounter.end {
        period["end"] = datetime(end).into();
    }
    let mut resource = json!({
        "resourceType": "Encounter",
        "id": encounter.id().to_string(),
        "status": if encounter.end.is_some() { "finished" } else { "in-progress" },
        "class": { "system": ACT_CODE_SYSTEM, "code": encounter.class.act_code() },
        "subject": reference("Patient", encounter.patient()),
        "period": period,
    });
    if !encounter.diagnoses.is_empty() {
        resource["reasonCode"] = encounter.diagnoses.iter().map(codeable).collect();
    }
    if !encounter.procedures.is_empty() {
        resource["extension"] = encounter
            .procedures
            .iter()
            .map(|procedure| {
                json!({ "url": PROCEDURE_EXTENSION, "valueCodeableConcept": codeable(procedure) })
            })
            .collect();
    }
    if let Some(facility) = &encounter.facility {
        resource["serviceProvider"] = json!({ "display": facility });
    }
    resource
}

fn condition_resource(condition: &Condition) -> Value {
    let mut resource = json!({
        "resourceType": "Condition",
        "id": condition.id().to_string(),
        "clinicalStatus": {
            "coding": [{ "system": CLINICAL_STATUS_SYSTEM, "code": condition.status.as_str() }],
        },
        "code": codeable(&condition.code),
        "subject": reference("Patient", condition.patient()),
        "onsetDateTime": date(condition.onset),
    });
    if let Some(encounter) = condition.encounter {
        resource["encounter"] = reference("Encounter", encounter);
    }
    resource
}

fn observation_resource(observation: &Observation) -> Value {
    let mut resource = json!({
        "resourceType": "Observation",
        "id": observation.id().to_string(),
        "status": "final",
        "code": codeable(&observation.code),
        "subject": reference("Patient", observation.patient()),
        "effectiveDateTime": datetime(observation.effective),
    });
    let mut quantity = Map::new();
    put_decimal(&mut quantity, "value", observation.value.value);
    quantity.insert("unit".into(), observation.value.unit.clone().into());
    quantity.insert("system".into(), UCUM_SYSTEM.into());
    quantity.insert("code".into(), observation.value.unit.clone().into());
    resource["valueQuantity"] = Value::Object(quantity);
    if let Some(encounter) = observation.encounter {
        resource["encounter"] = reference("Encounter", encounter);
    }
    if let Some(range) = &observation.reference_range {
        let mut bounds = Map::new();
        for (name, bound) in [("low", range.low), ("high", range.high)] {
            if let Some(bound) = bound {
                let mut simple = Map::new();
                put_decimal(&mut simple, "value", bound);
                bounds.insert(name.into(), Value::Object(simple));
            }
        }
        resource["referenceRange"] = json!([bounds]);
    }
    if let Some(interpretation) = observation.interpretation() {
        resource["interpretation"] = json!([{
            "coding": [{ "system": INTERPRETATION_SYSTEM, "code": interpretation.code() }],
        }]);
    }
    resource
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

type Parsed = Result<(), String>;

fn text<'a>(value: &'a Value, field: &str) -> Result<&'a str, String> {
    value[field]
        .as_str()
        .ok_or_else(|| format!("{field} is missing"))
}

fn entity_id(raw: &str, expected: EntityKind) -> Result<EntityId, String> {
    let id = EntityId::from_str(raw).map_err(|err| err.to_string())?;
    if id.kind() == expected {
        Ok(id)
    } else {
        Err(format!("{raw} is not a {expected} id"))
    }
}

fn referenced(value: &Value, resource_type: &str, expected: EntityKind) -> Result<EntityId, String> {
    let raw = value["reference"]
        .as_str()
        .ok_or_else(|| "reference is missing".to_string())?;
    let id = raw
        .strip_prefix(resource_type)
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(|| format!("{raw} does not reference a {resource_type}"))?;
    entity_id(id, expected)
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|err| format!("{raw}: {err}"))
}

fn parse_datetime(raw: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(raw.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|err| format!("{raw}: {err}"))
}

/// Large and tiny floats print in exponent form (`1e21`).
fn from_number(number: &Number) -> Result<Decimal, String> {
    let raw = number.to_string();
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|err| format!("{raw}: {err}"))
}

fn parse_decimal(value: &Value) -> Result<Decimal, String> {
    match value {
        Value::Number(number) => from_number(number),
        Value::String(raw) => Decimal::from_str(raw).map_err(|err| err.to_string()),
        _ => Err("expected a number".to_string()),
    }
}

/// `object[field]`, preferring the exact text of a `_field` extension.
fn decimal_field(object: &Value, field: &str) -> Result<Decimal, String> {
    let exact = object
        .get(format!("_{field}"))
        .and_then(|element| element["extension"].as_array())
        .and_then(|extensions| {
            extensions
                .iter()
                .find(|extension| extension["url"] == EXACT_DECIMAL_EXTENSION)
        })
        .and_then(|extension| extension["valueString"].as_str());
    match exact {
        Some(raw) => Decimal::from_str(raw).map_err(|err| format!("{raw}: {err}")),
        None => parse_decimal(&object[field]),
    }
}

fn parse_code(value: &Value) -> Result<Code, String> {
    let coding = &value["coding"][0];
    let uri = text(coding, "system")?;
    let system = CodeSystem::from_uri(uri).ok_or_else(|| format!("unknown code system {uri}"))?;
    let mut code = Code::new(system, text(coding, "code")?);
    code.display = coding["display"].as_str().map(str::to_string);
    Ok(code)
}

fn identifier<'a>(resource: &'a Value, system: &str) -> Result<&'a str, String> {
    resource["identifier"]
        .as_array()
        .and_then(|identifiers| {
            identifiers
                .iter()
                .find(|identifier| identifier["system"] == system)
        })
        .and_then(|identifier| identifier["value"].as_str())
        .ok_or_else(|| format!("identifier {system} is missing"))
}

fn parse_patient(resource: &Value, entities: &mut EntitySet) -> Parsed {
    let id = entity_id(text(resource, "id")?, EntityKind::Patient)?;
    let person_id = entity_id(identifier(resource, PERSON_SYSTEM)?, EntityKind::Person)?;
    let key = CorrelationKey::from_str(identifier(resource, CORRELATION_SYSTEM)?)
        .map_err(|err| err.to_string())?;
    let local_id = identifier(resource, RECORD_SYSTEM)?;

    let name = &resource["name"][0];
    let given = name["given"][0].as_str().unwrap_or_default();
    let family = name["family"].as_str().unwrap_or_default();
    let sex = Sex::parse(text(resource, "gender")?).ok_or("unknown gender")?;
    let birth_date = parse_date(text(resource, "birthDate")?)?;
    let address = match resource["address"].get(0) {
        Some(address) => Address {
            line: address["line"][0].as_str().unwrap_or_default().to_string(),
            city: address["city"].as_str().unwrap_or_default().to_string(),
            state: address["state"].as_str().unwrap_or_default().to_string(),
            postal_code: address["postalCode"].as_str().unwrap_or_default().to_string(),
        },
        None => Address::default(),
    };

    let enrollment = resource["extension"]
        .as_array()
        .and_then(|extensions| {
            extensions
                .iter()
                .find(|extension| extension["url"] == ENROLLMENT_EXTENSION)
        })
        .map(|extension| &extension["valuePeriod"])
        .ok_or("enrollment period is missing")?;
    let effective = parse_date(text(enrollment, "start")?)?;
    let facility = resource["managingOrganization"]["display"]
        .as_str()
        .map(str::to_string);

    let mut identity = ProductIdentity::new(
        id,
        person_id,
        key,
        local_id,
        effective,
        IdentityProfile::Patient { facility },
    );
    if let Some(end) = enrollment["end"].as_str() {
        identity
            .close(parse_date(end)?)
            .map_err(|err| err.to_string())?;
    }

    if entities.person(person_id).is_none() {
        entities.insert(Entity::Person(Person::new(
            person_id,
            key,
            PersonName::new(given, family),
            birth_date,
            sex,
            address,
        )));
    }
    entities.insert(Entity::Identity(identity));
    Ok(())
}

fn parse_encounter(resource: &Value, entities: &mut EntitySet) -> Parsed {
    let id = entity_id(text(resource, "id")?, EntityKind::Encounter)?;
    let patient = referenced(&resource["subject"], "Patient", EntityKind::Patient)?;
    let class_code = text(&resource["class"], "code")?;
    let class = EncounterClass::from_act_code(class_code)
        .ok_or_else(|| format!("unknown encounter class {class_code}"))?;
    let start = parse_datetime(text(&resource["period"], "start")?)?;

    let mut encounter = Encounter::new(id, patient, class, start);
    encounter.end = resource["period"]["end"]
        .as_str()
        .map(parse_datetime)
        .transpose()?;
    encounter.diagnoses = resource["reasonCode"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .map(parse_code)
        .collect::<Result<_, _>>()?;
    encounter.procedures = resource["extension"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .filter(|extension| extension["url"] == PROCEDURE_EXTENSION)
        .map(|extension| parse_code(&extension["valueCodeableConcept"]))
        .collect::<Result<_, _>>()?;
    encounter.facility = resource["serviceProvider"]["display"]
        .as_str()
        .map(str::to_string);
    entities.insert(Entity::Encounter(encounter));
    Ok(())
}

fn parse_condition(resource: &Value, entities: &mut EntitySet) -> Parsed {
    let id = entity_id(text(resource, "id")?, EntityKind::Condition)?;
    let patient = referenced(&resource["subject"], "Patient", EntityKind::Patient)?;
    let onset = parse_date(text(resource, "onsetDateTime")?)?;
    let mut condition = Condition::new(id, patient, parse_code(&resource["code"])?, onset);
    let status = text(&resource["clinicalStatus"]["coding"][0], "code")?;
    condition.status =
        ConditionStatus::parse(status).ok_or_else(|| format!("unknown clinical status {status}"))?;
    if !resource["encounter"].is_null() {
        condition.encounter = Some(referenced(
            &resource["encounter"],
            "Encounter",
            EntityKind::Encounter,
        )?);
    }
    entities.insert(Entity::Condition(condition));
    Ok(())
}

fn parse_observation(resource: &Value, entities: &mut EntitySet) -> Parsed {
    let id = entity_id(text(resource, "id")?, EntityKind::Observation)?;
    let patient = referenced(&resource["subject"], "Patient", EntityKind::Patient)?;
    let effective = parse_datetime(text(resource, "effectiveDateTime")?)?;
    let quantity = &resource["valueQuantity"];
    let value = Quantity {
        value: decimal_field(quantity, "value")?,
        unit: quantity["unit"].as_str().unwrap_or_default().to_string(),
    };

    let mut observation =
        Observation::new(id, patient, parse_code(&resource["code"])?, effective, value);
    if !resource["encounter"].is_null() {
        observation.encounter = Some(referenced(
            &resource["encounter"],
            "Encounter",
            EntityKind::Encounter,
        )?);
    }
    if let Some(range) = resource["referenceRange"].get(0) {
        observation.reference_range = Some(ReferenceRange {
            low: range.get("low").map(|low| decimal_field(low, "value")).transpose()?,
            high: range.get("high").map(|high| decimal_field(high, "value")).transpose()?,
        });
    }
    entities.insert(Entity::Observation(observation));
    Ok(())
}
