//! Shared fixtures for integration tests.

#![allow(dead_code)]

use chrono::{Days, NaiveDate};

use healthsim_config::PolicyProfile;
use healthsim_core::EntityDraft;
use healthsim_session::Session;
use healthsim_types::{EntityId, ProductType};

/// One person enrolled in every product, coverage effective 2023-01-01.
pub const ENROLLED_PERSON: &str = r#"[
    {"type": "person", "ref": "ana", "given": "Ana", "family": "Ruiz",
     "birth_date": "1980-02-29", "sex": "female",
     "address": {"line": "1 Main St", "city": "Austin", "state": "TX", "postal_code": "78701"}},
    {"type": "identity", "ref": "pat", "person": "ana", "product": "patient",
     "local_id": "MRN-1", "effective": "2023-01-01"},
    {"type": "identity", "ref": "mbr", "person": "ana", "product": "member",
     "local_id": "W100", "effective": "2023-01-01",
     "attributes": {"plan_code": "PPO-GOLD", "group_number": "GRP-1"}},
    {"type": "identity", "ref": "rx", "person": "ana", "product": "rx_member",
     "local_id": "RX100", "effective": "2023-01-01",
     "attributes": {"bin": "610014", "pcn": "SIMRX", "rx_group": "GRP100", "plan_code": "PPO-GOLD"}}
]"#;

pub const BILLING_NPI: &str = "1234567893";

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub fn plus_days(day: NaiveDate, days: u64) -> NaiveDate {
    day.checked_add_days(Days::new(days)).expect("date in range")
}

pub fn profile() -> PolicyProfile {
    PolicyProfile::example().expect("example profile")
}

pub fn drafts(json: &str) -> Vec<EntityDraft> {
    serde_json::from_str(json).expect("drafts parse")
}

/// Apply `json` to `session`, failing the test on any rejected draft.
pub fn apply_clean(session: &mut Session, json: &str) {
    let report = session.apply_drafts(&drafts(json));
    assert!(!report.has_errors(), "{report:?}");
    assert!(report.skipped().is_empty(), "{report:?}");
}

pub fn enrolled() -> Session {
    let mut session = Session::new();
    apply_clean(&mut session, ENROLLED_PERSON);
    session
}

pub fn identity_of(session: &Session, product: ProductType) -> EntityId {
    session
        .entities()
        .identities
        .iter()
        .find(|identity| identity.product() == product && identity.is_active())
        .map(|identity| identity.id())
        .expect("identity bound")
}
