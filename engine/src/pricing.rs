//! Professional line pricing and member cost-share.

use healthsim_config::{PlanCostShare, PolicyProfile};
use healthsim_types::{ClaimLine, CostShare, LineOutcome, Money};

/// Cost-share state carried from line to line within one claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accumulator {
    pub deductible_remaining: Money,
    /// Copay is taken once per claim, on the first priced line.
    pub copay_due: bool,
}

impl Accumulator {
    #[must_use]
    pub fn for_claim(plan: &PlanCostShare, deductible_applied: Money) -> Self {
        Self {
            deductible_remaining: plan.deductible.saturating_sub(deductible_applied),
            copay_due: true,
        }
    }
}

/// Fee-schedule amount for the line, or the default share of billed charge
/// for unscheduled codes.
#[must_use]
pub fn calculated_price(profile: &PolicyProfile, line: &ClaimLine) -> Money {
    match profile.fee_schedule.get(&line.procedure.code) {
        Some(fee) => fee.times(line.units.into()),
        None => line.billed.times(profile.payer.default_allowed_pct),
    }
}

/// Price one line that no denial rule matched.
///
/// `allowed = min(calculated, billed)`. The member pays deductible first,
/// then the copay, then coinsurance on what remains; the plan pays the rest,
/// so rounding never leaks out of `allowed`.
pub fn price_line(
    profile: &PolicyProfile,
    plan: &PlanCostShare,
    line: &ClaimLine,
    accumulator: &mut Accumulator,
) -> LineOutcome {
    let allowed = calculated_price(profile, line).min(line.billed);

    let deductible = allowed.min(accumulator.deductible_remaining);
    accumulator.deductible_remaining = accumulator.deductible_remaining - deductible;
    let mut remaining = allowed - deductible;

    let copay = if accumulator.copay_due && !allowed.is_zero() {
        accumulator.copay_due = false;
        plan.office_copay.min(remaining)
    } else {
        Money::ZERO
    };
    remaining = remaining - copay;

    let coinsurance = remaining.times(plan.coinsurance);
    LineOutcome::paid(
        allowed,
        CostShare {
            deductible,
            copay,
            coinsurance,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::{Accumulator, calculated_price, price_line};
    use healthsim_config::PolicyProfile;
    use healthsim_types::{ClaimLine, Code, LineStatus, Money};

    fn profile() -> PolicyProfile {
        PolicyProfile::example().expect("example profile")
    }

    #[test]
    fn scheduled_fee_scales_with_units() {
        let line = ClaimLine::new(1, Code::cpt("36415"), 2, Money::from_cents(5_000));
        assert_eq!(calculated_price(&profile(), &line), Money::from_cents(600));
    }

    #[test]
    fn unscheduled_code_uses_default_share() {
        let line = ClaimLine::new(1, Code::cpt("99999"), 1, Money::from_cents(10_001));
        // 100.01 * 0.80 = 80.008, rounded half away from zero.
        assert_eq!(calculated_price(&profile(), &line), Money::from_cents(8_001));
    }

    #[test]
    fn allowed_never_exceeds_billed() {
        let profile = profile();
        let plan = profile.plan("PPO-GOLD").expect("plan");
        let line = ClaimLine::new(1, Code::cpt("99213"), 1, Money::from_cents(5_000));
        let mut acc = Accumulator {
            deductible_remaining: Money::ZERO,
            copay_due: false,
        };
        let outcome = price_line(&profile, plan, &line, &mut acc);
        assert_eq!(outcome.allowed, Money::from_cents(5_000));
        assert!(outcome.is_balanced());
    }

    #[test]
    fn deductible_then_copay_then_coinsurance() {
        let profile = profile();
        let plan = profile.plan("PPO-GOLD").expect("plan");
        let mut acc = Accumulator::for_claim(plan, Money::from_cents(45_000));
        assert_eq!(acc.deductible_remaining, Money::from_cents(5_000));

        // Allowed 131.00: deductible 50.00, copay 25.00, 20% of 56.00 = 11.20.
        let line = ClaimLine::new(1, Code::cpt("99214"), 1, Money::from_cents(20_000));
        let outcome = price_line(&profile, plan, &line, &mut acc);
        assert_eq!(outcome.status, LineStatus::Paid);
        assert_eq!(outcome.allowed, Money::from_cents(13_100));
        assert_eq!(outcome.cost_share.deductible, Money::from_cents(5_000));
        assert_eq!(outcome.cost_share.copay, Money::from_cents(2_500));
        assert_eq!(outcome.cost_share.coinsurance, Money::from_cents(1_120));
        assert_eq!(outcome.patient_responsibility, Money::from_cents(8_620));
        assert_eq!(outcome.plan_paid, Money::from_cents(4_480));
        assert!(outcome.is_balanced());

        // Second line: deductible met, copay already taken.
        let line = ClaimLine::new(2, Code::cpt("80053"), 1, Money::from_cents(4_000));
        let outcome = price_line(&profile, plan, &line, &mut acc);
        assert_eq!(outcome.cost_share.deductible, Money::ZERO);
        assert_eq!(outcome.cost_share.copay, Money::ZERO);
        assert_eq!(outcome.cost_share.coinsurance, Money::from_cents(290));
        assert_eq!(outcome.plan_paid, Money::from_cents(1_160));
    }

    #[test]
    fn odd_cent_coinsurance_stays_balanced() {
        let profile = profile();
        let plan = profile.plan("HDHP-BRONZE").expect("plan");
        let mut acc = Accumulator {
            deductible_remaining: Money::ZERO,
            copay_due: true,
        };
        let line = ClaimLine::new(1, Code::cpt("99999"), 1, Money::from_cents(3_333));
        let outcome = price_line(&profile, plan, &line, &mut acc);
        // 33.33 * 0.80 = 26.664 -> 26.66; 30% = 7.998 -> 8.00.
        assert_eq!(outcome.allowed, Money::from_cents(2_666));
        assert_eq!(outcome.patient_responsibility, Money::from_cents(800));
        assert_eq!(outcome.plan_paid, Money::from_cents(1_866));
        assert!(outcome.is_balanced());
    }
}
