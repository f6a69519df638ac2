//! Identity correlation across products.

use healthsim_core::{BindRequest, CorrelationError, CorrelationGraph};
use healthsim_session::SessionError;
use healthsim_types::{EntityId, IdentityProfile, ProductType};

use crate::common::{apply_clean, date, drafts, enrolled};

fn member_request(person: EntityId, local_id: &str, effective: &str) -> BindRequest {
    BindRequest {
        person,
        local_id: local_id.to_string(),
        effective: effective.parse().expect("date"),
        profile: IdentityProfile::Member {
            plan_code: "HDHP-BRONZE".to_string(),
            group_number: "GRP-2".to_string(),
        },
    }
}

#[test]
fn every_product_identity_resolves_to_the_same_person() {
    let session = enrolled();
    let entities = session.entities();
    let person = &entities.persons[0];

    assert_eq!(entities.identities.len(), 3);
    for identity in &entities.identities {
        assert_eq!(identity.correlation_key(), person.correlation_key());
        assert_eq!(identity.person(), person.id());
        assert_eq!(
            entities.resolve_person(identity.id()).expect("resolves").id(),
            person.id()
        );
    }
    assert_eq!(entities.identities_for_key(person.correlation_key()).len(), 3);
    entities.verify_correlation().expect("consistent");
}

#[test]
fn second_active_member_draft_is_skipped() {
    let mut session = enrolled();
    let person = session.entities().persons[0].id();
    let report = session.apply_drafts(&drafts(&format!(
        r#"[{{"type": "identity", "ref": "mbr2", "person": "{person}", "product": "member",
             "local_id": "W200", "effective": "2024-01-01",
             "attributes": {{"plan_code": "HDHP-BRONZE", "group_number": "GRP-2"}}}}]"#
    )));

    assert_eq!(report.skipped().len(), 1);
    assert!(report.skipped()[0].reason.contains("already has active"), "{report:?}");
    assert_eq!(session.entities().identities.len(), 3);
}

#[test]
fn bind_refuses_duplicate_then_supersede_replaces() {
    let mut session = enrolled();
    let person = session.entities().persons[0].id();
    let existing = session
        .entities()
        .active_identity(person, ProductType::Member)
        .map(|identity| identity.id())
        .expect("member bound");

    let err = session
        .bind_identity(member_request(person, "W200", "2024-01-01"))
        .expect_err("duplicate active member");
    assert!(matches!(
        err,
        SessionError::Correlation(CorrelationError::DuplicateActiveIdentity { existing: found, .. })
            if found == existing
    ));

    let replacement = session
        .supersede_identity(existing, member_request(person, "W200", "2024-01-01"))
        .expect("superseded");
    let entities = session.entities();
    let prior = entities.identity(existing).expect("prior kept");
    assert!(!prior.is_active());
    assert_eq!(prior.end(), Some(date(2024, 1, 1)));
    assert_eq!(
        entities
            .active_identity(person, ProductType::Member)
            .map(|identity| identity.id()),
        Some(replacement)
    );

    let timeline: Vec<_> = session
        .identity_timeline(person)
        .into_iter()
        .filter(|identity| identity.product() == ProductType::Member)
        .map(|identity| identity.id())
        .collect();
    assert_eq!(timeline, vec![existing, replacement]);
}

#[test]
fn closed_identity_frees_the_product_slot() {
    let mut session = enrolled();
    let person = session.entities().persons[0].id();
    let existing = session
        .entities()
        .active_identity(person, ProductType::Member)
        .map(|identity| identity.id())
        .expect("member bound");

    session
        .close_identity(existing, date(2023, 12, 31))
        .expect("closed");
    assert!(matches!(
        session.close_identity(existing, date(2024, 1, 1)),
        Err(SessionError::Correlation(CorrelationError::IdentityAlreadyClosed { .. }))
    ));
    session
        .bind_identity(member_request(person, "W300", "2024-01-01"))
        .expect("slot free");
}

#[test]
fn identity_for_unknown_person_is_rejected() {
    let mut session = enrolled();
    let report = session.apply_drafts(&drafts(
        r#"[{"type": "identity", "person": "PER-999999", "product": "patient",
             "local_id": "MRN-9", "effective": "2024-01-01"}]"#,
    ));
    assert_eq!(report.skipped().len(), 1);
    apply_clean(
        &mut session,
        r#"[{"type": "person", "ref": "bo", "given": "Bo", "family": "Lee",
             "birth_date": "1990-07-04", "sex": "male"},
            {"type": "identity", "person": "bo", "product": "patient",
             "local_id": "MRN-2", "effective": "2024-01-01"}]"#,
    );
    assert_eq!(session.entities().persons.len(), 2);
}
