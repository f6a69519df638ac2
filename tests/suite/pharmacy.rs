//! Pharmacy adjudication: lesser-of pricing, DUR alerts and formulary rejects.

use healthsim_session::Session;
use healthsim_types::{
    DurAction, DurSeverity, EntityId, FillStatus, Money, PricingBasis, ProductType,
};
use rust_decimal::Decimal;

use crate::common::{BILLING_NPI, apply_clean, date, enrolled, identity_of, profile};

fn fill(session: &mut Session, ndc: &str, name: &str, fill_date: &str, uc: &str) -> EntityId {
    let rx_member = identity_of(session, ProductType::RxMember);
    let before = session.entities().prescriptions.len();
    apply_clean(
        session,
        &format!(
            r#"[{{"type": "prescription", "rx_member": "{rx_member}", "ndc": "{ndc}",
                 "drug_name": "{name}", "quantity": "180", "days_supply": 30,
                 "fill_date": "{fill_date}", "prescriber_npi": "{BILLING_NPI}",
                 "pharmacy_npi": "{BILLING_NPI}", "usual_and_customary": "{uc}"}}]"#
        ),
    );
    assert_eq!(session.entities().prescriptions.len(), before + 1);
    session
        .entities()
        .prescriptions
        .iter()
        .map(|rx| rx.id())
        .max()
        .expect("fill added")
}

fn cents(value: i64) -> Money {
    Money::new(Decimal::new(value, 2))
}

#[test]
fn fill_prices_at_lesser_of_cost_and_usual_charge() {
    let mut session = enrolled();
    let id = fill(&mut session, "00093717601", "clopidogrel 75 MG", "2024-05-01", "18.50");
    let summary = session.adjudicate(&profile(), date(2024, 5, 1));
    assert_eq!(summary.prescriptions, 1);

    let rx = session.entities().prescription(id).expect("fill kept");
    let outcome = rx.outcome.as_ref().expect("decided");
    assert_eq!(outcome.status, FillStatus::Paid);
    assert!(outcome.alerts.is_empty());
    let pricing = outcome.pricing.as_ref().expect("priced");
    assert_eq!(pricing.calculated, cents(1460));
    assert_eq!(pricing.basis, PricingBasis::IngredientCost);
    assert_eq!(pricing.allowed, cents(1460));
    assert_eq!(pricing.patient_pay, cents(1000));
    assert_eq!(pricing.plan_paid, cents(460));
    assert_eq!(pricing.tier, 1);
}

#[test]
fn usual_and_customary_wins_when_lower() {
    let mut session = enrolled();
    let id = fill(&mut session, "00093717601", "clopidogrel 75 MG", "2024-05-01", "9.99");
    session.adjudicate(&profile(), date(2024, 5, 1));

    let pricing = session
        .entities()
        .prescription(id)
        .and_then(|rx| rx.outcome.as_ref())
        .and_then(|outcome| outcome.pricing.as_ref())
        .expect("priced");
    assert_eq!(pricing.basis, PricingBasis::UsualAndCustomary);
    assert_eq!(pricing.allowed, cents(999));
    assert_eq!(pricing.patient_pay + pricing.plan_paid, pricing.allowed);
}

#[test]
fn interaction_with_active_anticoagulant_notifies_but_pays() {
    let mut session = enrolled();
    let warfarin = fill(&mut session, "00056017270", "warfarin 5 MG", "2024-05-01", "40.00");
    session.adjudicate(&profile(), date(2024, 5, 1));

    let clopidogrel = fill(&mut session, "00093717601", "clopidogrel 75 MG", "2024-05-10", "18.50");
    let summary = session.adjudicate(&profile(), date(2024, 5, 10));
    assert_eq!(summary.prescriptions, 1);

    let outcome = session
        .entities()
        .prescription(clopidogrel)
        .and_then(|rx| rx.outcome.as_ref())
        .expect("decided");
    assert_eq!(outcome.status, FillStatus::Paid);
    assert_eq!(outcome.alerts.len(), 1);
    let alert = &outcome.alerts[0];
    assert_eq!(alert.severity, DurSeverity::High);
    assert_eq!(alert.action, DurAction::NotifyPrescriber);
    assert_eq!(alert.conflicting, warfarin);
    assert_eq!(alert.conflicting_ndc, "00056017270");
}

#[test]
fn expired_supply_raises_no_alert() {
    let mut session = enrolled();
    fill(&mut session, "00056017270", "warfarin 5 MG", "2024-01-01", "40.00");
    let later = fill(&mut session, "00093717601", "clopidogrel 75 MG", "2024-03-01", "18.50");
    session.adjudicate(&profile(), date(2024, 3, 1));

    let outcome = session
        .entities()
        .prescription(later)
        .and_then(|rx| rx.outcome.as_ref())
        .expect("decided");
    assert!(outcome.alerts.is_empty());
}

#[test]
fn off_formulary_product_is_rejected_as_not_covered() {
    let mut session = enrolled();
    let id = fill(&mut session, "99999999999", "unlisted", "2024-05-01", "12.00");
    session.adjudicate(&profile(), date(2024, 5, 1));

    let outcome = session
        .entities()
        .prescription(id)
        .and_then(|rx| rx.outcome.as_ref())
        .expect("decided");
    assert!(matches!(&outcome.status, FillStatus::Rejected { code, .. } if code == "70"));
    assert!(outcome.pricing.is_none());
}
