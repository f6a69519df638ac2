//! Claim adjudication through a session: denials, balancing and appeals.

use healthsim_engine::AdjudicationError;
use healthsim_session::{Session, SessionError};
use healthsim_types::{
    AdjustmentGroup, AppealOutcome, ClaimStatus, DenialReason, EntityId, LineStatus, Money,
    ProductType,
};
use rust_decimal::Decimal;

use crate::common::{BILLING_NPI, apply_clean, date, enrolled, identity_of, plus_days, profile};

fn submit(session: &mut Session, service: &str, submitted: &str, lines: &str) -> EntityId {
    let member = identity_of(session, ProductType::Member);
    let before = session.entities().claims.len();
    apply_clean(
        session,
        &format!(
            r#"[{{"type": "claim", "member": "{member}", "service_date": "{service}",
                 "submission_date": "{submitted}", "diagnoses": ["M17.11"],
                 "billing_npi": "{BILLING_NPI}", "lines": {lines}}}]"#
        ),
    );
    assert_eq!(session.entities().claims.len(), before + 1);
    session.entities().claims[before].id()
}

#[test]
fn missing_authorization_denies_at_zero_with_appeal_window() {
    let mut session = enrolled();
    let claim = submit(
        &mut session,
        "2024-03-01",
        "2024-03-08",
        r#"[{"procedure": "27447", "units": 1, "billed": "1500.00"}]"#,
    );
    let adjudicated_on = date(2024, 3, 15);
    let summary = session.adjudicate(&profile(), adjudicated_on);
    assert_eq!(summary.claims, 1);

    let claim = session.entities().claim(claim).expect("claim kept");
    assert_eq!(claim.status(), ClaimStatus::Denied);
    let outcome = claim.lines[0].outcome.as_ref().expect("line decided");
    assert_eq!(outcome.status, LineStatus::Denied);
    assert_eq!(outcome.allowed, Money::ZERO);
    assert_eq!(outcome.plan_paid, Money::ZERO);
    assert_eq!(outcome.patient_responsibility, Money::ZERO);

    let denial = outcome.denial.as_ref().expect("denial recorded");
    assert_eq!(denial.reason, DenialReason::AuthorizationRequired);
    assert_eq!(denial.group, AdjustmentGroup::ContractualObligation);
    let rights = denial.appeal.expect("appeal permitted");
    assert_eq!(rights.deadline, plus_days(adjudicated_on, 180));
}

#[test]
fn authorized_line_is_priced_from_the_fee_schedule() {
    let mut session = enrolled();
    let claim = submit(
        &mut session,
        "2024-03-01",
        "2024-03-08",
        r#"[{"procedure": "27447", "units": 1, "billed": "1500.00", "authorization": "AUTH-1"}]"#,
    );
    session.adjudicate(&profile(), date(2024, 3, 15));

    let claim = session.entities().claim(claim).expect("claim kept");
    assert_eq!(claim.status(), ClaimStatus::Paid);
    assert_eq!(claim.total_allowed(), Money::new(Decimal::new(1450, 0)));
}

#[test]
fn every_adjudicated_line_balances_and_stays_within_billed() {
    let mut session = enrolled();
    let bundled = submit(
        &mut session,
        "2024-02-01",
        "2024-02-05",
        r#"[{"procedure": "99214", "units": 1, "billed": "50.00"},
            {"procedure": "80053", "units": 1, "billed": "40.00"},
            {"procedure": "36415", "units": 1, "billed": "12.00"},
            {"procedure": "97110", "units": 2, "billed": "180.00"}]"#,
    );
    submit(
        &mut session,
        "2024-04-10",
        "2024-04-12",
        r#"[{"procedure": "99213", "units": 1, "billed": "140.00"},
            {"procedure": "70553", "units": 1, "billed": "900.00", "authorization": "A-9"}]"#,
    );
    let summary = session.adjudicate(&profile(), date(2024, 4, 20));
    assert_eq!(summary.claims, 2);
    assert!(summary.failures.is_empty());

    let mut denied = 0;
    for claim in &session.entities().claims {
        for line in &claim.lines {
            let outcome = line.outcome.as_ref().expect("line decided");
            assert_eq!(
                outcome.plan_paid + outcome.patient_responsibility,
                outcome.allowed,
                "{} line {}",
                claim.id(),
                line.line_number
            );
            assert!(outcome.allowed <= line.billed);
            if outcome.status == LineStatus::Denied {
                denied += 1;
                assert_eq!(
                    outcome.denial.as_ref().map(|denial| denial.reason),
                    Some(DenialReason::Bundling)
                );
            }
        }
    }
    assert_eq!(denied, 1);
    assert_eq!(
        session.entities().claim(bundled).expect("claim").status(),
        ClaimStatus::PartiallyDenied
    );
}

#[test]
fn timely_filing_fires_only_past_the_limit() {
    let mut session = enrolled();
    let on_time = submit(
        &mut session,
        "2023-02-01",
        &plus_days(date(2023, 2, 1), 365).to_string(),
        r#"[{"procedure": "99213", "units": 1, "billed": "120.00"}]"#,
    );
    let late = submit(
        &mut session,
        "2023-03-01",
        &plus_days(date(2023, 3, 1), 366).to_string(),
        r#"[{"procedure": "99213", "units": 1, "billed": "120.00"}]"#,
    );
    session.adjudicate(&profile(), date(2024, 4, 1));

    let entities = session.entities();
    assert_eq!(entities.claim(on_time).expect("claim").status(), ClaimStatus::Paid);
    let late = entities.claim(late).expect("claim");
    assert_eq!(late.status(), ClaimStatus::Denied);
    let denial = late.lines[0]
        .outcome
        .as_ref()
        .and_then(|outcome| outcome.denial.as_ref())
        .expect("denied");
    assert_eq!(denial.reason, DenialReason::TimelyFiling);
}

#[test]
fn appeal_is_accepted_through_the_deadline_only() {
    let profile = profile();
    let adjudicated_on = date(2024, 3, 15);
    let deadline = plus_days(adjudicated_on, 180);

    let mut late = enrolled();
    let claim = submit(
        &mut late,
        "2024-03-01",
        "2024-03-08",
        r#"[{"procedure": "27447", "units": 1, "billed": "1500.00"}]"#,
    );
    late.adjudicate(&profile, adjudicated_on);
    let err = late
        .file_appeal(&profile, claim, plus_days(deadline, 1))
        .expect_err("past deadline");
    assert!(matches!(
        err,
        SessionError::Adjudication(AdjudicationError::AppealWindowExpired { .. })
    ));

    let mut timely = enrolled();
    let claim = submit(
        &mut timely,
        "2024-03-01",
        "2024-03-08",
        r#"[{"procedure": "27447", "units": 1, "billed": "1500.00"}]"#,
    );
    timely.adjudicate(&profile, adjudicated_on);
    timely
        .file_appeal(&profile, claim, deadline)
        .expect("filed on the deadline");
    assert_eq!(
        timely.entities().claim(claim).expect("claim").status(),
        ClaimStatus::Appealed
    );

    timely
        .resolve_appeal(&profile, claim, AppealOutcome::Upheld, plus_days(deadline, 30))
        .expect("resolved");
    let claim = timely.entities().claim(claim).expect("claim");
    assert_eq!(claim.status(), ClaimStatus::Upheld);
    assert_eq!(claim.total_allowed(), Money::ZERO);
}
