//! Professional claim adjudication and appeals.

use chrono::NaiveDate;

use healthsim_config::{PlanCostShare, PolicyProfile};
use healthsim_types::{
    AppealOutcome, AppealRecord, Claim, ClaimStatus, EntityId, EntitySet, InvalidTransition,
    LineOutcome, LineStatus, ProductIdentity, ProductType,
};

use crate::denial::{denial_for, first_denial};
use crate::pricing::{Accumulator, price_line};
use crate::{AdjudicationError, ClaimHistory};

/// Adjudicates claims against one payer profile.
///
/// Holds no state between calls; every result is a function of the claim,
/// the coverage, the supplied history and the adjudication date.
#[derive(Debug, Clone, Copy)]
pub struct Adjudicator<'p> {
    profile: &'p PolicyProfile,
}

impl<'p> Adjudicator<'p> {
    #[must_use]
    pub const fn new(profile: &'p PolicyProfile) -> Self {
        Self { profile }
    }

    #[must_use]
    pub const fn profile(&self) -> &'p PolicyProfile {
        self.profile
    }

    /// Resolve the plan a claim is billed against.
    pub fn coverage(
        &self,
        claim: &Claim,
        member: Option<&ProductIdentity>,
    ) -> Result<&'p PlanCostShare, AdjudicationError> {
        self.plan_for(
            claim.id(),
            claim.member(),
            ProductType::Member,
            claim.service_date,
            member,
        )
    }

    pub(crate) fn plan_for(
        &self,
        entity: EntityId,
        owner: EntityId,
        product: ProductType,
        date: NaiveDate,
        identity: Option<&ProductIdentity>,
    ) -> Result<&'p PlanCostShare, AdjudicationError> {
        let not_found = |reason: &'static str| AdjudicationError::CoverageNotFound {
            entity,
            coverage: owner,
            reason,
        };
        let identity = identity.ok_or_else(|| not_found("owning identity does not exist"))?;
        if identity.id() != owner || identity.product() != product {
            return Err(not_found("identity is not the entity's owner"));
        }
        if !identity.covers(date) {
            return Err(not_found("enrollment does not cover the date of service"));
        }
        let plan_code = identity
            .profile
            .plan_code()
            .ok_or_else(|| not_found("identity carries no plan"))?;
        self.profile
            .plan(plan_code)
            .ok_or_else(|| not_found("plan is not in the payer profile"))
    }

    /// Adjudicate a submitted claim, returning the decided copy.
    ///
    /// Each line is denied by the first matching rule or priced normally.
    /// The claim is Paid when no line is denied, Denied when every line is,
    /// and PartiallyDenied otherwise.
    pub fn adjudicate_claim(
        &self,
        claim: &Claim,
        member: Option<&ProductIdentity>,
        history: ClaimHistory<'_>,
        adjudicated_on: NaiveDate,
    ) -> Result<Claim, AdjudicationError> {
        let plan = self.coverage(claim, member)?;
        if claim.lines.is_empty() {
            return Err(AdjudicationError::NoServiceLines { claim: claim.id() });
        }

        let mut decided = claim.clone();
        transition(&mut decided, ClaimStatus::UnderReview)?;

        let applied = history.deductible_applied(claim.member(), claim.service_date, claim.id());
        let mut accumulator = Accumulator::for_claim(plan, applied);
        for line in &mut decided.lines {
            let outcome = match first_denial(self.profile, claim, line, history) {
                Some(rule) => LineOutcome::denied(denial_for(rule, adjudicated_on)),
                None => price_line(self.profile, plan, line, &mut accumulator),
            };
            line.outcome = Some(outcome);
        }

        let denied = decided.lines.iter().filter(|line| line.is_denied()).count();
        let status = if denied == 0 {
            ClaimStatus::Paid
        } else if denied == decided.lines.len() {
            ClaimStatus::Denied
        } else {
            ClaimStatus::PartiallyDenied
        };
        transition(&mut decided, status)?;
        decided.adjudicated_on = Some(adjudicated_on);

        tracing::debug!(
            claim = %claim.id(),
            status = %status,
            allowed = %decided.total_allowed(),
            plan_paid = %decided.total_plan_paid(),
            "Adjudicated claim"
        );
        Ok(decided)
    }

    /// Adjudicate every submitted claim in `entities`.
    ///
    /// Claims run in `(service_date, submission_date, id)` order so earlier
    /// claims feed deductible accumulation of later ones. A failure affects
    /// only its own claim.
    pub fn adjudicate_batch(
        &self,
        entities: &EntitySet,
        adjudicated_on: NaiveDate,
    ) -> Vec<Result<Claim, (EntityId, AdjudicationError)>> {
        let mut pending: Vec<&Claim> = entities
            .claims
            .iter()
            .filter(|claim| claim.status() == ClaimStatus::Submitted)
            .collect();
        pending.sort_by_key(|claim| (claim.service_date, claim.submission_date, claim.id()));

        let mut history: Vec<Claim> = entities.claims.clone();
        let mut results = Vec::with_capacity(pending.len());
        for claim in pending {
            let member = entities.identity(claim.member());
            match self.adjudicate_claim(claim, member, ClaimHistory::new(&history), adjudicated_on)
            {
                Ok(decided) => {
                    if let Some(slot) = history.iter_mut().find(|c| c.id() == decided.id()) {
                        *slot = decided.clone();
                    }
                    results.push(Ok(decided));
                }
                Err(err) => {
                    tracing::warn!(claim = %claim.id(), error = %err, "Claim adjudication failed");
                    results.push(Err((claim.id(), err)));
                }
            }
        }
        results
    }

    /// File an appeal against a denied or partially denied claim.
    ///
    /// At least one denied line must carry appeal rights whose deadline is on
    /// or after `filed_on`.
    pub fn file_appeal(&self, claim: &mut Claim, filed_on: NaiveDate) -> Result<(), AdjudicationError> {
        if !matches!(
            claim.status(),
            ClaimStatus::Denied | ClaimStatus::PartiallyDenied
        ) {
            return Err(AdjudicationError::InvalidTransition {
                claim: claim.id(),
                source: InvalidTransition {
                    from: claim.status(),
                    to: ClaimStatus::Appealed,
                },
            });
        }
        let latest_deadline = appeal_deadlines(claim).max().ok_or(
            AdjudicationError::AppealNotPermitted { claim: claim.id() },
        )?;
        if filed_on > latest_deadline {
            return Err(AdjudicationError::AppealWindowExpired {
                claim: claim.id(),
                deadline: latest_deadline,
                filed_on,
            });
        }
        transition(claim, ClaimStatus::Appealed)?;
        claim.appeal = Some(AppealRecord {
            filed_on,
            resolved_on: None,
            outcome: None,
        });
        tracing::info!(claim = %claim.id(), filed_on = %filed_on, "Appeal filed");
        Ok(())
    }

    /// Decide an appeal. Overturning reprices every denied line whose appeal
    /// was filed in time, as if no rule had matched it.
    pub fn resolve_appeal(
        &self,
        claim: &mut Claim,
        outcome: AppealOutcome,
        resolved_on: NaiveDate,
        member: Option<&ProductIdentity>,
        history: ClaimHistory<'_>,
    ) -> Result<(), AdjudicationError> {
        let Some(filed_on) = claim.appeal.as_ref().map(|appeal| appeal.filed_on) else {
            return Err(AdjudicationError::InvalidTransition {
                claim: claim.id(),
                source: InvalidTransition {
                    from: claim.status(),
                    to: appeal_status(outcome),
                },
            });
        };

        if outcome == AppealOutcome::Overturned {
            let plan = self.coverage(claim, member)?;
            let applied =
                history.deductible_applied(claim.member(), claim.service_date, claim.id());
            let already_on_claim = claim
                .lines
                .iter()
                .filter_map(|line| line.outcome.as_ref())
                .filter(|o| o.status == LineStatus::Paid)
                .map(|o| o.cost_share.deductible)
                .sum();
            let mut accumulator = Accumulator::for_claim(plan, applied + already_on_claim);
            accumulator.copay_due = !claim
                .lines
                .iter()
                .filter_map(|line| line.outcome.as_ref())
                .any(|o| !o.cost_share.copay.is_zero());

            let mut staged = claim.clone();
            transition(&mut staged, appeal_status(outcome))?;
            for line in &mut staged.lines {
                let appealable = line
                    .outcome
                    .as_ref()
                    .and_then(|o| o.denial.as_ref())
                    .and_then(|denial| denial.appeal)
                    .is_some_and(|rights| filed_on <= rights.deadline);
                if appealable {
                    line.outcome = Some(price_line(self.profile, plan, line, &mut accumulator));
                }
            }
            *claim = staged;
        } else {
            transition(claim, appeal_status(outcome))?;
        }

        if let Some(appeal) = claim.appeal.as_mut() {
            appeal.resolved_on = Some(resolved_on);
            appeal.outcome = Some(outcome);
        }
        tracing::info!(claim = %claim.id(), outcome = ?outcome, "Appeal resolved");
        Ok(())
    }
}

fn appeal_deadlines(claim: &Claim) -> impl Iterator<Item = NaiveDate> + '_ {
    claim
        .lines
        .iter()
        .filter_map(|line| line.outcome.as_ref())
        .filter_map(|outcome| outcome.denial.as_ref())
        .filter_map(|denial| denial.appeal.map(|rights| rights.deadline))
}

const fn appeal_status(outcome: AppealOutcome) -> ClaimStatus {
    match outcome {
        AppealOutcome::Overturned => ClaimStatus::Overturned,
        AppealOutcome::Upheld => ClaimStatus::Upheld,
    }
}

fn transition(claim: &mut Claim, next: ClaimStatus) -> Result<(), AdjudicationError> {
    let id = claim.id();
    claim
        .transition(next)
        .map_err(|source| AdjudicationError::InvalidTransition { claim: id, source })
}

#[cfg(test)]
mod tests {
    use super::Adjudicator;
    use crate::{AdjudicationError, ClaimHistory};
    use chrono::NaiveDate;
    use healthsim_config::PolicyProfile;
    use healthsim_types::{
        AdjustmentGroup, AppealOutcome, Claim, ClaimLine, ClaimStatus, Code, CorrelationKey,
        DenialReason, EntityId, EntityKind, IdentityProfile, Money, ProductIdentity,
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn member() -> ProductIdentity {
        ProductIdentity::new(
            EntityId::new(EntityKind::Member, 1).expect("id"),
            EntityId::new(EntityKind::Person, 1).expect("id"),
            CorrelationKey::generate(),
            "MBR0001",
            date(2024, 1, 1),
            IdentityProfile::Member {
                plan_code: "PPO-GOLD".to_string(),
                group_number: "GRP100".to_string(),
            },
        )
    }

    fn claim(seq: u64, lines: &[(&str, i64)]) -> Claim {
        let mut claim = Claim::new(
            EntityId::new(EntityKind::Claim, seq).expect("id"),
            EntityId::new(EntityKind::Member, 1).expect("id"),
            date(2024, 3, 1),
            date(2024, 3, 5),
        );
        claim.billing_npi = "1234567893".to_string();
        claim.diagnoses.push(Code::icd10("I10"));
        for (n, (code, cents)) in lines.iter().enumerate() {
            claim.lines.push(ClaimLine::new(
                u32::try_from(n + 1).expect("small"),
                Code::cpt(*code),
                1,
                Money::from_cents(*cents),
            ));
        }
        claim
    }

    #[test]
    fn missing_authorization_denies_with_zero_amounts() {
        let profile = PolicyProfile::example().expect("profile");
        let adjudicator = Adjudicator::new(&profile);
        let on = date(2024, 3, 10);
        let decided = adjudicator
            .adjudicate_claim(&claim(1, &[("27447", 150_000)]), Some(&member()), ClaimHistory::empty(), on)
            .expect("adjudicated");

        assert_eq!(decided.status(), ClaimStatus::Denied);
        let outcome = decided.lines[0].outcome.as_ref().expect("outcome");
        assert_eq!(outcome.allowed, Money::ZERO);
        assert_eq!(outcome.plan_paid, Money::ZERO);
        assert_eq!(outcome.patient_responsibility, Money::ZERO);
        let denial = outcome.denial.as_ref().expect("denial");
        assert_eq!(denial.reason, DenialReason::AuthorizationRequired);
        assert_eq!(denial.group, AdjustmentGroup::ContractualObligation);
        assert_eq!(denial.appeal.expect("appealable").deadline, date(2024, 9, 6));
    }

    #[test]
    fn bundled_component_partially_denies() {
        let profile = PolicyProfile::example().expect("profile");
        let decided = Adjudicator::new(&profile)
            .adjudicate_claim(
                &claim(1, &[("80053", 4_000), ("36415", 1_500)]),
                Some(&member()),
                ClaimHistory::empty(),
                date(2024, 3, 10),
            )
            .expect("adjudicated");
        assert_eq!(decided.status(), ClaimStatus::PartiallyDenied);
        assert!(!decided.lines[0].is_denied());
        assert!(decided.lines[1].is_denied());
        for line in &decided.lines {
            let outcome = line.outcome.as_ref().expect("outcome");
            assert!(outcome.is_balanced());
            assert!(outcome.allowed <= line.billed);
        }
    }

    #[test]
    fn coverage_must_span_service_date() {
        let profile = PolicyProfile::example().expect("profile");
        let mut lapsed = member();
        lapsed.close(date(2024, 2, 1)).expect("close");
        let err = Adjudicator::new(&profile)
            .adjudicate_claim(
                &claim(1, &[("99213", 15_000)]),
                Some(&lapsed),
                ClaimHistory::empty(),
                date(2024, 3, 10),
            )
            .expect_err("no coverage");
        assert!(matches!(err, AdjudicationError::CoverageNotFound { .. }));
    }

    #[test]
    fn adjudication_is_deterministic() {
        let profile = PolicyProfile::example().expect("profile");
        let adjudicator = Adjudicator::new(&profile);
        let input = claim(1, &[("99214", 20_000), ("93000", 6_000)]);
        let first = adjudicator
            .adjudicate_claim(&input, Some(&member()), ClaimHistory::empty(), date(2024, 3, 10))
            .expect("first");
        let second = adjudicator
            .adjudicate_claim(&input, Some(&member()), ClaimHistory::empty(), date(2024, 3, 10))
            .expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn overturned_appeal_reprices_denied_line() {
        let profile = PolicyProfile::example().expect("profile");
        let adjudicator = Adjudicator::new(&profile);
        let identity = member();
        let mut decided = adjudicator
            .adjudicate_claim(
                &claim(1, &[("70553", 90_000)]),
                Some(&identity),
                ClaimHistory::empty(),
                date(2024, 3, 10),
            )
            .expect("adjudicated");

        let mut late = decided.clone();
        assert!(matches!(
            adjudicator.file_appeal(&mut late, date(2024, 9, 7)),
            Err(AdjudicationError::AppealWindowExpired { .. })
        ));

        adjudicator
            .file_appeal(&mut decided, date(2024, 4, 1))
            .expect("appeal filed");
        assert_eq!(decided.status(), ClaimStatus::Appealed);
        adjudicator
            .resolve_appeal(
                &mut decided,
                AppealOutcome::Overturned,
                date(2024, 5, 1),
                Some(&identity),
                ClaimHistory::empty(),
            )
            .expect("resolved");

        assert_eq!(decided.status(), ClaimStatus::Overturned);
        let outcome = decided.lines[0].outcome.as_ref().expect("outcome");
        assert_eq!(outcome.allowed, Money::from_cents(41_000));
        // Full 500.00 deductible exceeds the 410.00 allowed.
        assert_eq!(outcome.patient_responsibility, Money::from_cents(41_000));
        assert!(outcome.is_balanced());
        let appeal = decided.appeal.as_ref().expect("appeal");
        assert_eq!(appeal.outcome, Some(AppealOutcome::Overturned));
    }

    #[test]
    fn non_appealable_denial_rejects_appeal() {
        let profile = PolicyProfile::example().expect("profile");
        let adjudicator = Adjudicator::new(&profile);
        let first = claim(1, &[("99213", 15_000)]);
        let mut second = claim(2, &[("99213", 15_000)]);
        second.submission_date = date(2024, 3, 20);
        let claims = vec![first, second.clone()];
        let mut decided = adjudicator
            .adjudicate_claim(&second, Some(&member()), ClaimHistory::new(&claims), date(2024, 3, 21))
            .expect("adjudicated");
        assert_eq!(decided.status(), ClaimStatus::Denied);
        assert!(matches!(
            adjudicator.file_appeal(&mut decided, date(2024, 3, 22)),
            Err(AdjudicationError::AppealNotPermitted { .. })
        ));
    }

    #[test]
    fn paid_claim_cannot_be_appealed() {
        let profile = PolicyProfile::example().expect("profile");
        let adjudicator = Adjudicator::new(&profile);
        let mut decided = adjudicator
            .adjudicate_claim(
                &claim(1, &[("99213", 15_000)]),
                Some(&member()),
                ClaimHistory::empty(),
                date(2024, 3, 10),
            )
            .expect("adjudicated");
        assert_eq!(decided.status(), ClaimStatus::Paid);
        assert!(matches!(
            adjudicator.file_appeal(&mut decided, date(2024, 3, 11)),
            Err(AdjudicationError::InvalidTransition { .. })
        ));
    }
}
