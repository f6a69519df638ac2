//! CDISC SDTM tabulations as CSV: DM, AE and LB.
//!
//! Every Subject identity is one DM row. AE rows come from the subject's
//! adverse events; LB rows from observations recorded against the Patient
//! identity correlated to the same person.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use healthsim_types::{
    AdverseEvent, EntityId, EntitySet, IdentityProfile, Interpretation, Observation, Person,
    ProductIdentity, ProductType, ValidationReport,
};

use crate::text::{csv_row, decimal};
use crate::{Codec, CodecError, Export, ExportFile, ExportOptions};

const NAME: &str = "sdtm";

const DM_COLUMNS: [&str; 11] = [
    "STUDYID", "DOMAIN", "USUBJID", "SUBJID", "SITEID", "BRTHDTC", "AGE", "AGEU", "SEX", "ARM",
    "RFICDTC",
];
const AE_COLUMNS: [&str; 9] = [
    "STUDYID", "DOMAIN", "USUBJID", "AESEQ", "AETERM", "AESEV", "AESER", "AESTDTC", "AEENDTC",
];
const LB_COLUMNS: [&str; 12] = [
    "STUDYID", "DOMAIN", "USUBJID", "LBSEQ", "LBTESTCD", "LBTEST", "LBORRES", "LBORRESU",
    "LBORNRLO", "LBORNRHI", "LBNRIND", "LBDTC",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct Sdtm;

/// Subject-level values repeated on every row.
struct SubjectKeys<'a> {
    study_id: &'a str,
    usubjid: String,
}

impl Codec for Sdtm {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "CDISC SDTM DM, AE and LB domains (CSV)"
    }

    fn export(&self, entities: &EntitySet, _options: &ExportOptions) -> Result<Export, CodecError> {
        let mut report = ValidationReport::new();
        let mut dm = csv_row(&DM_COLUMNS);
        let mut ae = csv_row(&AE_COLUMNS);
        let mut lb = csv_row(&LB_COLUMNS);
        let mut exported: Vec<EntityId> = Vec::new();

        for identity in &entities.identities {
            let IdentityProfile::Subject {
                study_id,
                site_id,
                arm,
                consent_date,
            } = &identity.profile
            else {
                continue;
            };
            let subject = identity.id();
            let person = entities.person(identity.person());
            if person.is_none() {
                report.error(subject, "USUBJID", "bound person is not in the set");
            }
            report.require(subject, "STUDYID", study_id);
            report.require(subject, "SITEID", site_id);
            report.expect(subject, "ARM", arm);
            let Some(person) = person else {
                report.admit(subject);
                continue;
            };
            if !report.admit(subject) {
                continue;
            }

            let keys = SubjectKeys {
                study_id,
                usubjid: format!("{study_id}-{site_id}-{}", identity.local_id),
            };
            dm.push_str(&demographics_row(&keys, identity, person, site_id, arm, *consent_date));
            exported.push(subject);

            let mut events: Vec<&AdverseEvent> = entities.adverse_events_of(subject).collect();
            events.sort_by_key(|event| (event.start, event.id()));
            for (seq, event) in events.into_iter().enumerate() {
                ae.push_str(&adverse_event_row(&keys, seq + 1, event));
            }

            let patients: Vec<EntityId> = entities
                .correlated(identity, ProductType::Patient)
                .map(ProductIdentity::id)
                .collect();
            let mut observations: Vec<&Observation> = entities
                .observations
                .iter()
                .filter(|observation| patients.contains(&observation.patient()))
                .collect();
            observations.sort_by_key(|observation| (observation.effective, observation.id()));
            for (seq, observation) in observations.into_iter().enumerate() {
                lb.push_str(&lab_row(&keys, seq + 1, observation));
            }
        }

        for event in &entities.adverse_events {
            if !exported.contains(&event.subject()) {
                report.warn(
                    event.id(),
                    "USUBJID",
                    format!("subject {} is not in the export", event.subject()),
                );
                report.skip(event.id(), "AE rows need an exported DM subject");
            }
        }

        tracing::debug!(codec = NAME, subjects = exported.len(), "Built SDTM tables");
        Ok(Export {
            files: [("dm.csv", dm), ("ae.csv", ae), ("lb.csv", lb)]
                .into_iter()
                .map(|(name, content)| ExportFile {
                    name: name.to_string(),
                    content: content.into_bytes(),
                })
                .collect(),
            report,
        })
    }
}

fn demographics_row(
    keys: &SubjectKeys<'_>,
    identity: &ProductIdentity,
    person: &Person,
    site_id: &str,
    arm: &str,
    consent_date: NaiveDate,
) -> String {
    csv_row(&[
        keys.study_id,
        "DM",
        &keys.usubjid,
        &identity.local_id,
        site_id,
        &person.birth_date.to_string(),
        &person.age_on(consent_date).to_string(),
        "YEARS",
        person.sex.letter(),
        arm,
        &consent_date.to_string(),
    ])
}

fn adverse_event_row(keys: &SubjectKeys<'_>, seq: usize, event: &AdverseEvent) -> String {
    csv_row(&[
        keys.study_id,
        "AE",
        &keys.usubjid,
        &seq.to_string(),
        &event.term,
        event.severity.as_str(),
        if event.serious { "Y" } else { "N" },
        &event.start.to_string(),
        &event.end.map(|end| end.to_string()).unwrap_or_default(),
    ])
}

fn lab_row(keys: &SubjectKeys<'_>, seq: usize, observation: &Observation) -> String {
    let range = observation.reference_range.as_ref();
    let bound = |value: Option<Decimal>| value.map(decimal).unwrap_or_default();
    let indicator = match observation.interpretation() {
        Some(Interpretation::Low) => "LOW",
        Some(Interpretation::Normal) => "NORMAL",
        Some(Interpretation::High) => "HIGH",
        None => "",
    };
    csv_row(&[
        keys.study_id,
        "LB",
        &keys.usubjid,
        &seq.to_string(),
        &observation.code.code,
        observation.code.display.as_deref().unwrap_or_default(),
        &decimal(observation.value.value),
        &observation.value.unit,
        &bound(range.and_then(|range| range.low)),
        &bound(range.and_then(|range| range.high)),
        indicator,
        &observation.effective.format("%Y-%m-%dT%H:%M:%S").to_string(),
    ])
}

#[cfg(test)]
mod tests {
    use super::Sdtm;
    use crate::{Codec, Export, ExportOptions};
    use chrono::NaiveDate;
    use healthsim_types::{
        Address, AdverseEvent, AeSeverity, Code, CorrelationKey, Entity, EntityId, EntityKind,
        EntitySet, IdentityProfile, Observation, Person, PersonName, ProductIdentity, Quantity,
        ReferenceRange, Sex,
    };
    use rust_decimal::Decimal;

    fn id(kind: EntityKind, seq: u64) -> EntityId {
        EntityId::new(kind, seq).expect("id")
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn trial_set() -> EntitySet {
        let key = CorrelationKey::generate();
        let mut set = EntitySet::new();
        set.insert(Entity::Person(Person::new(
            id(EntityKind::Person, 1),
            key,
            PersonName::new("Ada", "Lovelace"),
            date(1961, 12, 10),
            Sex::Female,
            Address::default(),
        )));
        set.insert(Entity::Identity(ProductIdentity::new(
            id(EntityKind::Subject, 1),
            id(EntityKind::Person, 1),
            key,
            "0042",
            date(2024, 2, 1),
            IdentityProfile::Subject {
                study_id: "HS-301".to_string(),
                site_id: "101".to_string(),
                arm: "PLACEBO".to_string(),
                consent_date: date(2024, 2, 1),
            },
        )));
        set.insert(Entity::Identity(ProductIdentity::new(
            id(EntityKind::Patient, 1),
            id(EntityKind::Person, 1),
            key,
            "MRN-1",
            date(2020, 1, 1),
            IdentityProfile::Patient { facility: None },
        )));

        let mut nausea = AdverseEvent::new(
            id(EntityKind::AdverseEvent, 1),
            id(EntityKind::Subject, 1),
            "Nausea, mild",
            AeSeverity::Mild,
            date(2024, 2, 10),
        );
        nausea.end = Some(date(2024, 2, 12));
        set.insert(Entity::AdverseEvent(nausea));

        let mut glucose = Observation::new(
            id(EntityKind::Observation, 1),
            id(EntityKind::Patient, 1),
            Code::loinc("2345-7").with_display("Glucose"),
            date(2024, 2, 15).and_hms_opt(8, 30, 0).expect("valid time"),
            Quantity {
                value: Decimal::new(1425, 1),
                unit: "mg/dL".to_string(),
            },
        );
        glucose.reference_range = Some(ReferenceRange {
            low: Some(Decimal::from(70)),
            high: Some(Decimal::from(99)),
        });
        set.insert(Entity::Observation(glucose));
        set
    }

    fn options() -> ExportOptions {
        ExportOptions::new(date(2024, 3, 1).and_hms_opt(0, 0, 0).expect("valid time"))
    }

    fn table(export: &Export, name: &str) -> String {
        let file = export.file(name).expect("table present");
        String::from_utf8(file.content.clone()).expect("utf-8")
    }

    #[test]
    fn one_table_per_domain() {
        let export = Sdtm.export(&trial_set(), &options()).expect("export");
        assert!(export.report.is_clean(), "{:?}", export.report);
        insta::assert_snapshot!(table(&export, "dm.csv").replace("\r\n", "\n"), @r"
        STUDYID,DOMAIN,USUBJID,SUBJID,SITEID,BRTHDTC,AGE,AGEU,SEX,ARM,RFICDTC
        HS-301,DM,HS-301-101-0042,0042,101,1961-12-10,62,YEARS,F,PLACEBO,2024-02-01
        ");
        insta::assert_snapshot!(table(&export, "ae.csv").replace("\r\n", "\n"), @r#"
        STUDYID,DOMAIN,USUBJID,AESEQ,AETERM,AESEV,AESER,AESTDTC,AEENDTC
        HS-301,AE,HS-301-101-0042,1,"Nausea, mild",MILD,N,2024-02-10,2024-02-12
        "#);
        insta::assert_snapshot!(table(&export, "lb.csv").replace("\r\n", "\n"), @r"
        STUDYID,DOMAIN,USUBJID,LBSEQ,LBTESTCD,LBTEST,LBORRES,LBORRESU,LBORNRLO,LBORNRHI,LBNRIND,LBDTC
        HS-301,LB,HS-301-101-0042,1,2345-7,Glucose,142.5,mg/dL,70,99,HIGH,2024-02-15T08:30:00
        ");
    }

    #[test]
    fn orphan_adverse_event_is_skipped() {
        let mut set = trial_set();
        set.insert(Entity::AdverseEvent(AdverseEvent::new(
            id(EntityKind::AdverseEvent, 2),
            id(EntityKind::Subject, 9),
            "Headache",
            AeSeverity::Moderate,
            date(2024, 2, 20),
        )));
        let export = Sdtm.export(&set, &options()).expect("export");
        assert_eq!(export.report.skipped()[0].subject, "AE-000002");
        assert!(!table(&export, "ae.csv").contains("Headache"));
    }
}
