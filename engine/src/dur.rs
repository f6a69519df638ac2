//! Drug-utilization review.
//!
//! Rules match on formulary therapeutic class. Review only reports; whether
//! an alert blocks the fill is decided by [`decide_fill`].

use healthsim_config::{DurRule, PolicyProfile};
use healthsim_types::{DurAction, DurAlert, DurKind, FillStatus, Prescription};

/// NCPDP reject code for a fill stopped by a DUR conflict.
pub const DUR_REJECT_CODE: &str = "88";

/// Alerts for `fill` against the member's active medications.
///
/// Each active medication is compared once per rule, so a pair that trips
/// two rules yields two alerts. Medications whose NDC is off formulary carry
/// no class and never match.
#[must_use]
pub fn review(
    profile: &PolicyProfile,
    fill: &Prescription,
    active: &[&Prescription],
) -> Vec<DurAlert> {
    let Some(entry) = profile.formulary(&fill.drug.ndc) else {
        return Vec::new();
    };
    let class = entry.class.as_str();

    let mut alerts = Vec::new();
    for other in active.iter().filter(|other| other.id() != fill.id()) {
        let Some(other_entry) = profile.formulary(&other.drug.ndc) else {
            continue;
        };
        let other_class = other_entry.class.as_str();
        for rule in &profile.dur_rules {
            let hit = match rule {
                DurRule::Interaction {
                    classes,
                    severity,
                    action,
                }
                | DurRule::HighRiskCombination {
                    classes,
                    severity,
                    action,
                } => is_pair(classes, class, other_class).then_some((*severity, *action)),
                DurRule::DuplicateTherapy { severity, action } => {
                    (class == other_class).then_some((*severity, *action))
                }
            };
            if let Some((severity, action)) = hit {
                alerts.push(DurAlert {
                    kind: rule.kind(),
                    severity,
                    action,
                    conflicting: other.id(),
                    conflicting_ndc: other.drug.ndc.clone(),
                    message: message(rule.kind(), &fill.drug.name, &other.drug.name),
                });
            }
        }
    }

    if !alerts.is_empty() {
        tracing::debug!(
            prescription = %fill.id(),
            alerts = alerts.len(),
            "DUR review raised alerts"
        );
    }
    alerts
}

/// Whether a fill with these alerts may proceed.
///
/// Only a `Reject` recommendation without a recorded override of the same
/// kind stops the fill. Notify and override recommendations never block.
#[must_use]
pub fn decide_fill(alerts: &[DurAlert], overrides: &[DurKind]) -> FillStatus {
    alerts
        .iter()
        .find(|alert| alert.action == DurAction::Reject && !overrides.contains(&alert.kind))
        .map_or(FillStatus::Paid, |alert| FillStatus::Rejected {
            code: DUR_REJECT_CODE.to_string(),
            message: alert.message.clone(),
        })
}

fn is_pair(classes: &[String], a: &str, b: &str) -> bool {
    match classes {
        [first, second] => (first == a && second == b) || (first == b && second == a),
        _ => false,
    }
}

fn message(kind: DurKind, drug: &str, conflicting: &str) -> String {
    match kind {
        DurKind::DrugDrugInteraction => format!("{drug} interacts with {conflicting}"),
        DurKind::DuplicateTherapy => format!("{drug} duplicates therapy with {conflicting}"),
        DurKind::HighRiskCombination => {
            format!("{drug} with {conflicting} is a high-risk combination")
        }
    }
}
