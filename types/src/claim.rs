//! Professional claims, their lines and adjudication outcomes.
//!
//! Claim status follows a fixed state machine:
//!
//! ```text
//! Submitted -> UnderReview -> { Paid | Denied | PartiallyDenied }
//! Denied | PartiallyDenied -> Appealed -> { Overturned | Upheld }
//! ```
//!
//! Paid, Overturned and Upheld are terminal. Denied and PartiallyDenied are
//! terminal unless an appeal is filed.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Code, EntityId, Money};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Submitted,
    UnderReview,
    Paid,
    Denied,
    PartiallyDenied,
    Appealed,
    Overturned,
    Upheld,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("claim cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub from: ClaimStatus,
    pub to: ClaimStatus,
}

impl ClaimStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ClaimStatus::Submitted => "submitted",
            ClaimStatus::UnderReview => "under_review",
            ClaimStatus::Paid => "paid",
            ClaimStatus::Denied => "denied",
            ClaimStatus::PartiallyDenied => "partially_denied",
            ClaimStatus::Appealed => "appealed",
            ClaimStatus::Overturned => "overturned",
            ClaimStatus::Upheld => "upheld",
        }
    }

    #[must_use]
    pub const fn can_transition_to(self, next: ClaimStatus) -> bool {
        matches!(
            (self, next),
            (ClaimStatus::Submitted, ClaimStatus::UnderReview)
                | (
                    ClaimStatus::UnderReview,
                    ClaimStatus::Paid | ClaimStatus::Denied | ClaimStatus::PartiallyDenied
                )
                | (
                    ClaimStatus::Denied | ClaimStatus::PartiallyDenied,
                    ClaimStatus::Appealed
                )
                | (
                    ClaimStatus::Appealed,
                    ClaimStatus::Overturned | ClaimStatus::Upheld
                )
        )
    }

    /// Whether a decision has been reached for the claim.
    #[must_use]
    pub const fn is_adjudicated(self) -> bool {
        !matches!(self, ClaimStatus::Submitted | ClaimStatus::UnderReview)
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coded reason a line was not paid. Declaration order is evaluation
/// precedence: the first matching reason wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    AuthorizationRequired,
    DuplicateSubmission,
    TimelyFiling,
    Bundling,
    MedicalNecessity,
    InformationInconsistent,
}

impl DenialReason {
    pub const PRECEDENCE: [DenialReason; 6] = [
        DenialReason::AuthorizationRequired,
        DenialReason::DuplicateSubmission,
        DenialReason::TimelyFiling,
        DenialReason::Bundling,
        DenialReason::MedicalNecessity,
        DenialReason::InformationInconsistent,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            DenialReason::AuthorizationRequired => "authorization_required",
            DenialReason::DuplicateSubmission => "duplicate_submission",
            DenialReason::TimelyFiling => "timely_filing",
            DenialReason::Bundling => "bundling",
            DenialReason::MedicalNecessity => "medical_necessity",
            DenialReason::InformationInconsistent => "information_inconsistent",
        }
    }

    /// Claim adjustment reason code reported on remittances.
    #[must_use]
    pub const fn carc(self) -> &'static str {
        match self {
            DenialReason::AuthorizationRequired => "197",
            DenialReason::DuplicateSubmission => "18",
            DenialReason::TimelyFiling => "29",
            DenialReason::Bundling => "97",
            DenialReason::MedicalNecessity => "50",
            DenialReason::InformationInconsistent => "16",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claim adjustment group: who carries the unpaid amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdjustmentGroup {
    /// Provider write-off (`CO`).
    ContractualObligation,
    /// Patient may be billed (`PR`).
    PatientResponsibility,
}

impl AdjustmentGroup {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            AdjustmentGroup::ContractualObligation => "CO",
            AdjustmentGroup::PatientResponsibility => "PR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppealRights {
    pub deadline: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denial {
    pub reason: DenialReason,
    pub group: AdjustmentGroup,
    /// `None` when the payer does not permit appeal for this reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appeal: Option<AppealRights>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStatus {
    Paid,
    Denied,
}

/// Member cost-share on one paid line, by component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostShare {
    pub deductible: Money,
    pub copay: Money,
    pub coinsurance: Money,
}

impl CostShare {
    #[must_use]
    pub fn total(&self) -> Money {
        self.deductible + self.copay + self.coinsurance
    }

    /// Trim components, coinsurance first, until the total fits in `limit`.
    #[must_use]
    pub fn capped_to(mut self, limit: Money) -> Self {
        let mut excess = self.total().saturating_sub(limit);
        for part in [
            &mut self.coinsurance,
            &mut self.copay,
            &mut self.deductible,
        ] {
            let cut = excess.min(*part);
            *part = *part - cut;
            excess = excess - cut;
        }
        self
    }
}

/// Priced result for one claim line.
///
/// Constructors keep `plan_paid + patient_responsibility == allowed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineOutcome {
    pub status: LineStatus,
    pub allowed: Money,
    pub plan_paid: Money,
    pub patient_responsibility: Money,
    #[serde(default)]
    pub cost_share: CostShare,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial: Option<Denial>,
}

impl LineOutcome {
    /// Patient share is capped at `allowed`; the plan pays the remainder.
    #[must_use]
    pub fn paid(allowed: Money, cost_share: CostShare) -> Self {
        let cost_share = cost_share.capped_to(allowed);
        let patient_responsibility = cost_share.total();
        Self {
            status: LineStatus::Paid,
            allowed,
            plan_paid: allowed - patient_responsibility,
            patient_responsibility,
            cost_share,
            denial: None,
        }
    }

    #[must_use]
    pub fn denied(denial: Denial) -> Self {
        Self {
            status: LineStatus::Denied,
            allowed: Money::ZERO,
            plan_paid: Money::ZERO,
            patient_responsibility: Money::ZERO,
            cost_share: CostShare::default(),
            denial: Some(denial),
        }
    }

    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.plan_paid + self.patient_responsibility == self.allowed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimLine {
    pub line_number: u32,
    pub procedure: Code,
    #[serde(default)]
    pub modifiers: Vec<String>,
    pub units: u32,
    pub billed: Money,
    /// Prior authorization number, when one was obtained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<LineOutcome>,
}

impl ClaimLine {
    #[must_use]
    pub fn new(line_number: u32, procedure: Code, units: u32, billed: Money) -> Self {
        Self {
            line_number,
            procedure,
            modifiers: Vec::new(),
            units,
            billed,
            authorization: None,
            outcome: None,
        }
    }

    #[must_use]
    pub fn is_denied(&self) -> bool {
        self.outcome
            .as_ref()
            .is_some_and(|outcome| outcome.status == LineStatus::Denied)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppealOutcome {
    Overturned,
    Upheld,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppealRecord {
    pub filed_on: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_on: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<AppealOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    id: EntityId,
    member: EntityId,
    /// Originating encounter. When set, service date and principal
    /// diagnosis must match it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter: Option<EntityId>,
    pub service_date: NaiveDate,
    pub submission_date: NaiveDate,
    pub diagnoses: Vec<Code>,
    pub billing_npi: String,
    pub place_of_service: String,
    pub lines: Vec<ClaimLine>,
    status: ClaimStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjudicated_on: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appeal: Option<AppealRecord>,
}

impl Claim {
    #[must_use]
    pub fn new(
        id: EntityId,
        member: EntityId,
        service_date: NaiveDate,
        submission_date: NaiveDate,
    ) -> Self {
        Self {
            id,
            member,
            encounter: None,
            service_date,
            submission_date,
            diagnoses: Vec::new(),
            billing_npi: String::new(),
            place_of_service: "11".to_string(),
            lines: Vec::new(),
            status: ClaimStatus::Submitted,
            adjudicated_on: None,
            appeal: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    #[must_use]
    pub const fn member(&self) -> EntityId {
        self.member
    }

    #[must_use]
    pub const fn status(&self) -> ClaimStatus {
        self.status
    }

    pub fn transition(&mut self, next: ClaimStatus) -> Result<(), InvalidTransition> {
        if self.status.can_transition_to(next) {
            self.status = next;
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self.status,
                to: next,
            })
        }
    }

    #[must_use]
    pub fn principal_diagnosis(&self) -> Option<&Code> {
        self.diagnoses.first()
    }

    #[must_use]
    pub fn total_billed(&self) -> Money {
        self.lines.iter().map(|line| line.billed).sum()
    }

    #[must_use]
    pub fn total_allowed(&self) -> Money {
        self.outcomes().map(|outcome| outcome.allowed).sum()
    }

    #[must_use]
    pub fn total_plan_paid(&self) -> Money {
        self.outcomes().map(|outcome| outcome.plan_paid).sum()
    }

    #[must_use]
    pub fn total_patient_responsibility(&self) -> Money {
        self.outcomes()
            .map(|outcome| outcome.patient_responsibility)
            .sum()
    }

    fn outcomes(&self) -> impl Iterator<Item = &LineOutcome> {
        self.lines.iter().filter_map(|line| line.outcome.as_ref())
    }
}
