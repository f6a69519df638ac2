//! Cohort persistence on an on-disk store.

use healthsim_session::{CohortManager, CohortStore, Session, SessionError, SqliteCohortStore};
use healthsim_types::{ClaimStatus, CohortName, EntityKind, ProductType};

use crate::common::{BILLING_NPI, apply_clean, date, enrolled, identity_of, profile};

fn name(raw: &str) -> CohortName {
    CohortName::new(raw).expect("valid name")
}

fn open(dir: &tempfile::TempDir) -> CohortManager<SqliteCohortStore> {
    CohortManager::new(SqliteCohortStore::open(dir.path().join("cohorts.db")).expect("open store"))
}

#[test]
fn saved_cohort_reloads_identically_from_a_fresh_connection() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut session = enrolled();
    session.description = Some("PPO members".to_string());
    session.criteria.inclusion.push("age >= 18".to_string());
    open(&dir)
        .save_as(&mut session, &name("ppo-adults"), false)
        .expect("saved");

    let loaded = open(&dir).load(&name("ppo-adults")).expect("loaded");
    assert_eq!(loaded.entities(), session.entities());
    assert_eq!(loaded.description, session.description);
    assert_eq!(loaded.criteria, session.criteria);
    assert_eq!(loaded.origin(), Some(&name("ppo-adults")));
}

#[test]
fn list_is_ordered_by_name_and_delete_removes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cohorts = open(&dir);
    for raw in ["zeta", "alpha", "mid"] {
        cohorts
            .save_as(&mut enrolled(), &name(raw), false)
            .expect("saved");
    }

    let listed: Vec<String> = cohorts
        .list()
        .expect("list")
        .into_iter()
        .map(|summary| summary.name.to_string())
        .collect();
    assert_eq!(listed, ["alpha", "mid", "zeta"]);

    cohorts.delete(&name("mid")).expect("deleted");
    assert!(matches!(
        cohorts.load(&name("mid")),
        Err(SessionError::CohortNotFound { .. })
    ));
    assert_eq!(cohorts.list().expect("list").len(), 2);
}

#[test]
fn overwriting_with_a_smaller_session_never_reuses_ids() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cohorts = open(&dir);
    let mut rich = enrolled();
    let used = rich.entities().persons[0].id().seq();
    cohorts
        .save_as(&mut rich, &name("reused"), false)
        .expect("saved");
    cohorts
        .save_as(&mut Session::new(), &name("reused"), true)
        .expect("overwritten");

    let loaded = cohorts.load(&name("reused")).expect("loaded");
    assert!(loaded.is_empty());
    assert!(loaded.allocate(EntityKind::Person).seq() > used);
}

#[test]
fn adjudicated_outcomes_persist() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut session = enrolled();
    let member = identity_of(&session, ProductType::Member);
    apply_clean(
        &mut session,
        &format!(
            r#"[{{"type": "claim", "member": "{member}", "service_date": "2024-03-01",
                 "submission_date": "2024-03-08", "diagnoses": ["I10"],
                 "billing_npi": "{BILLING_NPI}",
                 "lines": [{{"procedure": "99213", "units": 1, "billed": "120.00"}}]}}]"#
        ),
    );
    session.adjudicate(&profile(), date(2024, 3, 15));
    let cohorts = open(&dir);
    cohorts
        .save_as(&mut session, &name("adjudicated"), false)
        .expect("saved");

    let loaded = cohorts.load(&name("adjudicated")).expect("loaded");
    let claim = &loaded.entities().claims[0];
    assert_eq!(claim.status(), ClaimStatus::Paid);
    assert_eq!(claim.adjudicated_on, Some(date(2024, 3, 15)));
    assert_eq!(loaded.entities(), session.entities());
}

#[test]
fn query_reads_entity_rows_but_refuses_writes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cohorts = open(&dir);
    cohorts
        .save_as(&mut enrolled(), &name("q"), false)
        .expect("saved");

    let rows = cohorts
        .store()
        .query("SELECT kind, COUNT(*) AS n FROM cohort_entities GROUP BY kind ORDER BY kind")
        .expect("query");
    assert_eq!(rows.columns, ["kind", "n"]);
    assert_eq!(rows.rows.len(), 4);

    assert!(matches!(
        cohorts.store().query("DROP TABLE cohorts"),
        Err(SessionError::WriteQuery)
    ));
    assert_eq!(cohorts.list().expect("list").len(), 1);
}
