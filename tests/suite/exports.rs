//! Wire-format exports driven through a session and the codec registry.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use chrono::NaiveDateTime;
use serde_json::Value;

use healthsim_formats::{BatchOutcome, CodecRegistry, ExportJob, ExportOptions, export_batch};
use healthsim_session::Session;
use healthsim_types::ProductType;

use crate::common::{BILLING_NPI, apply_clean, date, drafts, enrolled, identity_of};

const CLINICAL: &str = r#"[
    {"type": "person", "ref": "ada", "given": "Ada", "family": "Lovelace",
     "birth_date": "1960-12-10", "sex": "female",
     "address": {"line": "1 Main St", "city": "Springfield", "state": "IL", "postal_code": "62701"}},
    {"type": "identity", "ref": "pat", "person": "ada", "product": "patient",
     "local_id": "MRN001", "effective": "2020-01-01"},
    {"type": "encounter", "ref": "visit", "patient": "pat", "class": "ambulatory",
     "start": "2024-03-01T09:00:00", "end": "2024-03-01T10:00:00",
     "diagnoses": [{"system": "icd10-cm", "code": "E11.9"}]},
    {"type": "observation", "patient": "pat", "encounter": "visit",
     "code": {"system": "loinc", "code": "2345-7"}, "effective": "2024-03-01T09:00:00",
     "value": "142", "unit": "mg/dL", "low": "70", "high": "99"},
    {"type": "observation", "patient": "pat", "encounter": "visit",
     "code": {"system": "loinc", "code": "4548-4"}, "effective": "2024-03-01T09:00:00",
     "value": "7", "unit": "%"}
]"#;

fn clinical() -> Session {
    let mut session = Session::new();
    apply_clean(&mut session, CLINICAL);
    session
}

fn options() -> ExportOptions {
    let at: NaiveDateTime = date(2024, 3, 20).and_hms_opt(8, 0, 0).expect("valid time");
    ExportOptions::new(at)
}

#[test]
fn fhir_bundle_uses_canonical_ids_for_resources_and_references() {
    let session = clinical();
    let export = session
        .export(&CodecRegistry::standard(), "fhir-r4", &options())
        .expect("export");
    assert!(export.report.is_clean(), "{:?}", export.report);

    let bundle: Value = serde_json::from_slice(&export.files[0].content).expect("json");
    assert_eq!(bundle["resourceType"], "Bundle");
    assert_eq!(bundle["type"], "collection");
    let resources: Vec<&Value> = bundle["entry"]
        .as_array()
        .expect("entries")
        .iter()
        .map(|entry| &entry["resource"])
        .collect();
    let count = |kind: &str| {
        resources
            .iter()
            .filter(|resource| resource["resourceType"] == kind)
            .count()
    };
    assert_eq!(count("Patient"), 1);
    assert_eq!(count("Encounter"), 1);
    assert_eq!(count("Observation"), 2);

    let entities = session.entities();
    let patient = entities.identities[0].id().to_string();
    let encounter = entities.encounters[0].id().to_string();
    for resource in &resources {
        let id = resource["id"].as_str().expect("resource id");
        match resource["resourceType"].as_str() {
            Some("Patient") => assert_eq!(id, patient),
            Some("Encounter") => {
                assert_eq!(id, encounter);
                assert_eq!(resource["subject"]["reference"], format!("Patient/{patient}"));
            }
            Some("Observation") => {
                assert!(entities.observations.iter().any(|o| o.id().to_string() == id));
                assert_eq!(resource["subject"]["reference"], format!("Patient/{patient}"));
                assert_eq!(
                    resource["encounter"]["reference"],
                    format!("Encounter/{encounter}")
                );
            }
            other => panic!("unexpected resource {other:?}"),
        }
    }
}

#[test]
fn fhir_import_restores_the_clinical_set() {
    let session = clinical();
    let registry = CodecRegistry::standard();
    let export = session.export(&registry, "fhir-r4", &options()).expect("export");

    let import = registry
        .lookup("fhir-r4")
        .expect("registered")
        .import(&export.files[0].content)
        .expect("import");
    assert!(import.report.is_clean(), "{:?}", import.report);
    assert_eq!(&import.entities, session.entities());
}

#[test]
fn professional_claims_survive_an_837_round_trip() {
    let mut session = Session::new();
    apply_clean(
        &mut session,
        &format!(
            r#"[{{"type": "person", "ref": "ana", "given": "Ana", "family": "Ruiz",
                 "birth_date": "1980-02-29", "sex": "female",
                 "address": {{"line": "1 Main St", "city": "Austin", "state": "TX", "postal_code": "78701"}}}},
                {{"type": "identity", "ref": "mbr", "person": "ana", "product": "member",
                 "local_id": "W100", "effective": "2023-01-01",
                 "attributes": {{"plan_code": "PPO-GOLD", "group_number": "GRP-1"}}}},
                {{"type": "claim", "member": "mbr", "service_date": "2024-03-01",
                 "submission_date": "2024-03-08", "diagnoses": ["E11.9", "I10"],
                 "billing_npi": "{BILLING_NPI}",
                 "lines": [{{"procedure": "99214", "modifiers": ["25"], "units": 1, "billed": "150.00"}},
                           {{"procedure": "70553", "units": 1, "billed": "1500.00", "authorization": "AUTH778"}}]}}]"#
        ),
    );

    let registry = CodecRegistry::standard();
    let export = session.export(&registry, "x12-837p", &options()).expect("export");
    assert!(export.report.is_clean(), "{:?}", export.report);
    let import = registry
        .lookup("x12-837p")
        .expect("registered")
        .import(&export.files[0].content)
        .expect("import");
    assert!(import.report.is_clean(), "{:?}", import.report);
    assert_eq!(&import.entities, session.entities());
}

#[test]
fn oversized_charges_are_rejected_before_they_reach_an_export() {
    let mut session = enrolled();
    let member = identity_of(&session, ProductType::Member);
    let report = session.apply_drafts(&drafts(&format!(
        r#"[{{"type": "claim", "member": "{member}", "service_date": "2024-03-01",
             "submission_date": "2024-03-08", "diagnoses": ["I10"],
             "billing_npi": "{BILLING_NPI}",
             "lines": [{{"procedure": "99213", "units": 1, "billed": "79228162514264337593543950335"}},
                       {{"procedure": "99214", "units": 1, "billed": "79228162514264337593543950335"}}]}}]"#
    )));
    assert_eq!(report.skipped().len(), 1);
    assert!(
        report
            .errors()
            .any(|issue| issue.field == "lines[1].billed")
    );
    assert!(session.entities().claims.is_empty());

    let export = session
        .export(&CodecRegistry::standard(), "x12-837p", &options())
        .expect("export");
    assert!(export.text().contains("GE*0*1~"));
}

#[test]
fn registry_names_are_sorted() {
    let registry = CodecRegistry::standard();
    let names: Vec<&str> = registry.names().collect();
    insta::assert_snapshot!(names.join("\n"), @r"
    fhir-r4
    hl7v2
    ncpdp-d0
    sdtm
    x12-835
    x12-837p
    ");
}

#[test]
fn unknown_format_is_an_error() {
    let session = clinical();
    assert!(
        session
            .export(&CodecRegistry::standard(), "csv", &options())
            .is_err()
    );
}

#[tokio::test]
async fn batch_runs_every_job_in_order() {
    let session = clinical();
    let entities = Arc::new(session.entities().clone());
    let jobs = ["hl7v2", "fhir-r4", "sdtm"]
        .into_iter()
        .map(|codec| ExportJob {
            codec: codec.to_string(),
            entities: Arc::clone(&entities),
            options: options(),
        })
        .collect();

    let outcomes = export_batch(
        &CodecRegistry::standard(),
        jobs,
        Arc::new(AtomicBool::new(false)),
    )
    .await;
    let codecs: Vec<&str> = outcomes.iter().map(BatchOutcome::codec).collect();
    assert_eq!(codecs, ["hl7v2", "fhir-r4", "sdtm"]);
    assert!(
        outcomes
            .iter()
            .all(|outcome| matches!(outcome, BatchOutcome::Completed { .. }))
    );
}

#[tokio::test]
async fn raised_cancel_flag_starts_nothing() {
    let entities = Arc::new(clinical().entities().clone());
    let jobs = vec![
        ExportJob {
            codec: "fhir-r4".to_string(),
            entities: Arc::clone(&entities),
            options: options(),
        },
        ExportJob {
            codec: "hl7v2".to_string(),
            entities,
            options: options(),
        },
    ];

    let outcomes = export_batch(
        &CodecRegistry::standard(),
        jobs,
        Arc::new(AtomicBool::new(true)),
    )
    .await;
    assert_eq!(outcomes.len(), 2);
    assert!(
        outcomes
            .iter()
            .all(|outcome| matches!(outcome, BatchOutcome::Cancelled { .. }))
    );
}
