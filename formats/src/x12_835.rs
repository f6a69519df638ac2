//! X12 835 remittance advice (005010X221A1) from adjudicated claims.
//!
//! One transaction set per billing provider. Every service line balances:
//! `SVC02 == SVC03 + sum(CAS amounts)`.

use std::collections::BTreeMap;

use healthsim_types::{
    Claim, ClaimLine, ClaimStatus, EntitySet, LineStatus, Money, ValidationReport,
};

use crate::text::{d8, money};
use crate::x12::{REMITTANCE, Segment, composite, interchange};
use crate::{Codec, CodecError, Export, ExportOptions};

const NAME: &str = "x12-835";
const PROVIDER: &str = "HEALTHSIM";

/// `CLP02` claim status codes.
const PROCESSED_AS_PRIMARY: &str = "1";
const DENIED: &str = "4";

#[derive(Debug, Clone, Copy, Default)]
pub struct X12Remittance;

impl Codec for X12Remittance {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "X12 835 remittance advice (005010X221A1)"
    }

    fn export(&self, entities: &EntitySet, options: &ExportOptions) -> Result<Export, CodecError> {
        let mut report = ValidationReport::new();
        let mut by_payee: BTreeMap<&str, Vec<ClaimLoop>> = BTreeMap::new();

        for claim in &entities.claims {
            let subject = claim.id();
            match claim.status() {
                ClaimStatus::Submitted | ClaimStatus::UnderReview => {
                    report.warn(subject, "status", "claim has not been adjudicated");
                    report.skip(subject, "no remittance before adjudication");
                    continue;
                }
                ClaimStatus::Appealed => {
                    report.warn(subject, "status", "appeal is pending");
                    report.skip(subject, "no remittance while an appeal is open");
                    continue;
                }
                ClaimStatus::Paid
                | ClaimStatus::Denied
                | ClaimStatus::PartiallyDenied
                | ClaimStatus::Overturned
                | ClaimStatus::Upheld => {}
            }

            let member = entities.identity(claim.member());
            let person = member.and_then(|member| entities.person(member.person()));
            if person.is_none() {
                report.error(
                    subject,
                    "NM1*QC",
                    format!("member {} is not in the set", claim.member()),
                );
            }
            report.require(subject, "N1*PE payee NPI", &claim.billing_npi);
            if claim.lines.iter().any(|line| line.outcome.is_none()) {
                report.error(subject, "SVC", "service line has no adjudication outcome");
            }
            let (Some(member), Some(person)) = (member, person) else {
                report.admit(subject);
                continue;
            };
            if !report.admit(subject) {
                continue;
            }

            let mut segments = vec![
                Segment::new(
                    "CLP",
                    &[
                        &claim.id().to_string(),
                        claim_status_code(claim),
                        &money(claim.total_billed()),
                        &money(claim.total_plan_paid()),
                        &money(claim.total_patient_responsibility()),
                        "12",
                        &claim.id().to_string(),
                        &claim.place_of_service,
                        "1",
                    ],
                ),
                Segment::new(
                    "NM1",
                    &[
                        "QC",
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
                Segment::new("DTM", &["050", &d8(claim.submission_date)]),
                Segment::new("DTM", &["232", &d8(claim.service_date)]),
            ];
            for line in &claim.lines {
                segments.extend(service_line(claim, line));
            }
            by_payee
                .entry(claim.billing_npi.as_str())
                .or_default()
                .push(ClaimLoop {
                    paid: claim.total_plan_paid(),
                    segments,
                });
        }

        let sets: Vec<Vec<Segment>> = by_payee
            .iter()
            .enumerate()
            .map(|(index, (npi, claims))| payment_set(index, npi, claims, options))
            .collect();
        let sender = options.x12.receiver_id.as_deref().unwrap_or(&options.payer_id);
        let receiver = options.x12.sender_id.as_deref().unwrap_or(PROVIDER);
        let text = interchange(options, REMITTANCE, sender, receiver, &sets);
        tracing::debug!(codec = NAME, payees = sets.len(), "Built 835 interchange");
        Ok(Export::single("remittance.835", text, report))
    }
}

struct ClaimLoop {
    paid: Money,
    segments: Vec<Segment>,
}

/// Header, payer/payee identification and the claim loops for one payee.
fn payment_set(
    index: usize,
    npi: &str,
    claims: &[ClaimLoop],
    options: &ExportOptions,
) -> Vec<Segment> {
    let total: Money = claims.iter().map(|claim| claim.paid).sum();
    let (handling, method) = if total.is_zero() {
        ("H", "NON")
    } else {
        ("I", "CHK")
    };
    let paid_on = d8(options.generated_at.date());
    let trace = format!(
        "{}{:04}",
        options.x12.control_number.unwrap_or(1),
        index + 1
    );

    let mut segments = vec![
        Segment::new(
            "BPR",
            &[
                handling,
                &money(total),
                "C",
                method,
                "",
                "",
                "",
                "",
                "",
                "",
                "",
                "",
                "",
                "",
                "",
                &paid_on,
            ],
        ),
        Segment::new("TRN", &["1", &trace, &format!("1{}", options.payer_id)]),
        Segment::new("DTM", &["405", &paid_on]),
        Segment::new("N1", &["PR", &options.payer_name, "XV", &options.payer_id]),
        Segment::new("N1", &["PE", "BILLING PROVIDER", "XX", npi]),
        Segment::new("LX", &["1"]),
    ];
    for claim in claims {
        segments.extend(claim.segments.iter().cloned());
    }
    segments
}

/// `4` when nothing on the claim was paid, otherwise processed as primary.
fn claim_status_code(claim: &Claim) -> &'static str {
    if claim.lines.iter().all(ClaimLine::is_denied) {
        DENIED
    } else {
        PROCESSED_AS_PRIMARY
    }
}

fn service_line(claim: &Claim, line: &ClaimLine) -> Vec<Segment> {
    let Some(outcome) = line.outcome.as_ref() else {
        return Vec::new();
    };
    let mut procedure = vec!["HC", line.procedure.code.as_str()];
    procedure.extend(line.modifiers.iter().map(String::as_str));

    let mut segments = vec![
        Segment::new(
            "SVC",
            &[
                &composite(&procedure),
                &money(line.billed),
                &money(outcome.plan_paid),
                "",
                &line.units.to_string(),
            ],
        ),
        Segment::new("DTM", &["472", &d8(claim.service_date)]),
    ];

    match (outcome.status, outcome.denial.as_ref()) {
        (LineStatus::Denied, Some(denial)) => {
            segments.push(Segment::new(
                "CAS",
                &[denial.group.code(), denial.reason.carc(), &money(line.billed)],
            ));
        }
        _ => {
            let contractual = line.billed.saturating_sub(outcome.allowed);
            if !contractual.is_zero() {
                segments.push(Segment::new("CAS", &["CO", "45", &money(contractual)]));
            }
            let share = outcome.cost_share;
            let mut patient: Vec<String> = vec!["PR".to_string()];
            for (carc, amount) in [
                ("1", share.deductible),
                ("2", share.coinsurance),
                ("3", share.copay),
            ] {
                if !amount.is_zero() {
                    if patient.len() > 1 {
                        patient.push(String::new());
                    }
                    patient.push(carc.to_string());
                    patient.push(money(amount));
                }
            }
            if patient.len() > 1 {
                let elements: Vec<&str> = patient.iter().map(String::as_str).collect();
                segments.push(Segment::new("CAS", &elements));
            }
        }
    }
    segments.push(Segment::new("AMT", &["B6", &money(outcome.allowed)]));
    segments
}
