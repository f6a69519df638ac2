//! Denial rule evaluation.
//!
//! Rules run in a fixed precedence order and the first match wins. Each rule
//! kind is matched exhaustively, so a new kind has to be handled here before
//! it can be configured.

use chrono::{Days, NaiveDate};

use healthsim_config::{DenialRule, PolicyProfile};
use healthsim_types::{AppealRights, Claim, ClaimLine, Denial};

use crate::ClaimHistory;

/// The first rule in precedence order that denies `line`, if any.
#[must_use]
pub fn first_denial<'p>(
    profile: &'p PolicyProfile,
    claim: &Claim,
    line: &ClaimLine,
    history: ClaimHistory<'_>,
) -> Option<&'p DenialRule> {
    profile
        .denial_rules_by_precedence()
        .into_iter()
        .find(|rule| rule_matches(rule, claim, line, history))
}

/// Build the denial for `rule`, with appeal rights measured from `adjudicated_on`.
#[must_use]
pub fn denial_for(rule: &DenialRule, adjudicated_on: NaiveDate) -> Denial {
    let appeal = rule.appeal();
    let rights = appeal
        .permitted
        .then(|| adjudicated_on.checked_add_days(Days::new(u64::from(appeal.window_days))))
        .flatten()
        .map(|deadline| AppealRights { deadline });
    Denial {
        reason: rule.reason(),
        group: rule.liability().adjustment_group(),
        appeal: rights,
    }
}

fn rule_matches(
    rule: &DenialRule,
    claim: &Claim,
    line: &ClaimLine,
    history: ClaimHistory<'_>,
) -> bool {
    let procedure = line.procedure.code.as_str();
    let matched = match rule {
        DenialRule::AuthorizationRequired {
            procedure_codes, ..
        } => {
            line.authorization.is_none() && procedure_codes.iter().any(|code| code == procedure)
        }
        DenialRule::DuplicateSubmission { .. } => history.is_duplicate(claim, line),
        DenialRule::TimelyFiling {
            filing_limit_days, ..
        } => days_elapsed(claim.service_date, claim.submission_date) > i64::from(*filing_limit_days),
        DenialRule::Bundling { pairs, .. } => pairs.iter().any(|pair| {
            pair.component == procedure
                && claim.lines.iter().any(|other| {
                    other.line_number != line.line_number && other.procedure.code == pair.primary
                })
        }),
        DenialRule::MedicalNecessity { requirements, .. } => requirements
            .iter()
            .filter(|requirement| requirement.procedure == procedure)
            .any(|requirement| {
                !claim.diagnoses.iter().any(|diagnosis| {
                    let compact = diagnosis.compact();
                    requirement
                        .diagnosis_prefixes
                        .iter()
                        .any(|prefix| compact.starts_with(&prefix.replace('.', "")))
                })
            }),
        DenialRule::InformationInconsistent { .. } => {
            line.units == 0
                || claim.billing_npi.trim().is_empty()
                || claim.diagnoses.is_empty()
                || claim.service_date > claim.submission_date
        }
    };
    if matched {
        tracing::debug!(
            claim = %claim.id(),
            line = line.line_number,
            reason = rule.reason().as_str(),
            "Denial rule matched"
        );
    }
    matched
}

/// Whole days from service to submission; negative if submitted first.
#[must_use]
pub fn days_elapsed(service: NaiveDate, submitted: NaiveDate) -> i64 {
    (submitted - service).num_days()
}
