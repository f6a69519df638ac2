//! Prior-claim history for a member.
//!
//! Everything adjudication needs from the past (duplicate detection, deductible
//! accumulation) is derived from the claims passed in, so identical history
//! yields identical results.

use chrono::{Datelike, NaiveDate};

use healthsim_types::{Claim, ClaimLine, EntityId, LineStatus, Money};

#[derive(Debug, Clone, Copy)]
pub struct ClaimHistory<'a> {
    claims: &'a [Claim],
}

impl<'a> ClaimHistory<'a> {
    #[must_use]
    pub const fn new(claims: &'a [Claim]) -> Self {
        Self { claims }
    }

    #[must_use]
    pub const fn empty() -> Self {
        Self { claims: &[] }
    }

    /// Claims that precede `claim` in submission order.
    ///
    /// Order is `(submission_date, id)`, so of two identical submissions only
    /// the later one is ever the duplicate.
    pub fn prior_to(&self, claim: &Claim) -> impl Iterator<Item = &'a Claim> + use<'a> {
        let key = (claim.submission_date, claim.id());
        let member = claim.member();
        self.claims.iter().filter(move |other| {
            other.member() == member && (other.submission_date, other.id()) < key
        })
    }

    /// Whether `line` was already billed by an earlier claim for the same
    /// member and date of service.
    #[must_use]
    pub fn is_duplicate(&self, claim: &Claim, line: &ClaimLine) -> bool {
        self.prior_to(claim)
            .filter(|prior| prior.service_date == claim.service_date)
            .flat_map(|prior| prior.lines.iter())
            .any(|prior_line| {
                prior_line.procedure.same_concept(&line.procedure)
                    && prior_line.modifiers == line.modifiers
                    && prior_line.units == line.units
            })
    }

    /// Deductible already satisfied by `member` in the calendar year of `date`,
    /// excluding `exclude`.
    #[must_use]
    pub fn deductible_applied(&self, member: EntityId, date: NaiveDate, exclude: EntityId) -> Money {
        self.claims
            .iter()
            .filter(|other| {
                other.member() == member
                    && other.id() != exclude
                    && other.service_date.year() == date.year()
                    && other.status().is_adjudicated()
            })
            .flat_map(|other| other.lines.iter())
            .filter_map(|line| line.outcome.as_ref())
            .filter(|outcome| outcome.status == LineStatus::Paid)
            .map(|outcome| outcome.cost_share.deductible)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::ClaimHistory;
    use chrono::NaiveDate;
    use healthsim_types::{
        Claim, ClaimLine, ClaimStatus, Code, CostShare, EntityId, EntityKind, LineOutcome, Money,
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn claim(seq: u64, service: NaiveDate, submitted: NaiveDate) -> Claim {
        let mut claim = Claim::new(
            EntityId::new(EntityKind::Claim, seq).expect("id"),
            EntityId::new(EntityKind::Member, 1).expect("id"),
            service,
            submitted,
        );
        claim
            .lines
            .push(ClaimLine::new(1, Code::cpt("99213"), 1, Money::from_cents(15_000)));
        claim
    }

    #[test]
    fn only_later_submission_is_duplicate() {
        let first = claim(1, date(2024, 3, 1), date(2024, 3, 2));
        let second = claim(2, date(2024, 3, 1), date(2024, 3, 9));
        let claims = vec![first.clone(), second.clone()];
        let history = ClaimHistory::new(&claims);
        assert!(!history.is_duplicate(&claims[0], &first.lines[0]));
        assert!(history.is_duplicate(&claims[1], &second.lines[0]));
    }

    #[test]
    fn deductible_counts_same_year_only() {
        let mut paid = claim(1, date(2024, 2, 1), date(2024, 2, 2));
        paid.transition(ClaimStatus::UnderReview).expect("review");
        paid.transition(ClaimStatus::Paid).expect("paid");
        paid.lines[0].outcome = Some(LineOutcome::paid(
            Money::from_cents(9_200),
            CostShare {
                deductible: Money::from_cents(9_200),
                ..CostShare::default()
            },
        ));
        let mut last_year = paid.clone();
        last_year.service_date = date(2023, 12, 30);
        let claims = vec![paid, last_year];
        let history = ClaimHistory::new(&claims);
        let member = EntityId::new(EntityKind::Member, 1).expect("id");
        let current = EntityId::new(EntityKind::Claim, 9).expect("id");
        assert_eq!(
            history.deductible_applied(member, date(2024, 6, 1), current),
            Money::from_cents(9_200)
        );
        assert_eq!(
            history.deductible_applied(member, date(2025, 1, 1), current),
            Money::ZERO
        );
    }
}
