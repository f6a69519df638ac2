//! Pharmacy claim adjudication: formulary, lesser-of pricing, tier copay
//! and DUR.

use chrono::NaiveDate;

use healthsim_config::{FormularyEntry, PlanCostShare, PolicyProfile};
use healthsim_types::{
    EntityId, EntitySet, FillStatus, Money, PharmacyOutcome, Prescription, PricingBasis,
    PricingBreakdown, ProductIdentity, ProductType,
};

use crate::dur::{decide_fill, review};
use crate::{AdjudicationError, Adjudicator};

/// NCPDP reject code for a product the formulary does not cover.
pub const NOT_COVERED_CODE: &str = "70";

/// Lesser of ingredient cost plus dispensing fee and the pharmacy's
/// usual-and-customary charge. Ties price on ingredient cost.
#[must_use]
pub fn price_fill(
    profile: &PolicyProfile,
    plan: &PlanCostShare,
    entry: &FormularyEntry,
    fill: &Prescription,
) -> PricingBreakdown {
    let ingredient_cost = Money::new(entry.unit_cost.saturating_mul(fill.quantity));
    let dispensing_fee = profile.pharmacy.dispensing_fee;
    let calculated = ingredient_cost + dispensing_fee;
    let (basis, allowed) = if fill.usual_and_customary < calculated {
        (PricingBasis::UsualAndCustomary, fill.usual_and_customary)
    } else {
        (PricingBasis::IngredientCost, calculated)
    };
    let patient_pay = plan.tier_copay(entry.tier).unwrap_or(Money::ZERO).min(allowed);
    PricingBreakdown {
        ingredient_cost,
        dispensing_fee,
        calculated,
        usual_and_customary: fill.usual_and_customary,
        basis,
        allowed,
        patient_pay,
        plan_paid: allowed - patient_pay,
        tier: entry.tier,
    }
}

/// Dispensed fills still in supply on `fill`'s date, across every RxMember
/// identity of the same Person.
#[must_use]
pub fn active_medications<'a>(entities: &'a EntitySet, fill: &Prescription) -> Vec<&'a Prescription> {
    let Some(identity) = entities.identity(fill.rx_member()) else {
        return Vec::new();
    };
    let members: Vec<EntityId> = entities
        .correlated(identity, ProductType::RxMember)
        .map(ProductIdentity::id)
        .collect();
    entities
        .prescriptions
        .iter()
        .filter(|other| {
            other.id() != fill.id()
                && members.contains(&other.rx_member())
                && other.was_dispensed()
                && other.is_active_on(fill.fill_date)
        })
        .collect()
}

impl Adjudicator<'_> {
    /// Adjudicate one pharmacy fill, returning the decided copy.
    ///
    /// A fill off formulary is rejected with code `70`. Otherwise it is
    /// priced, reviewed against `active`, and paid unless an unoverridden
    /// `Reject` alert stops it. Alerts are kept on every outcome.
    pub fn adjudicate_prescription(
        &self,
        fill: &Prescription,
        rx_member: Option<&ProductIdentity>,
        active: &[&Prescription],
        adjudicated_on: NaiveDate,
    ) -> Result<Prescription, AdjudicationError> {
        let plan = self.plan_for(
            fill.id(),
            fill.rx_member(),
            ProductType::RxMember,
            fill.fill_date,
            rx_member,
        )?;
        let profile = self.profile();
        let mut decided = fill.clone();

        let Some(entry) = profile.formulary(&fill.drug.ndc) else {
            tracing::debug!(prescription = %fill.id(), ndc = %fill.drug.ndc, "NDC not on formulary");
            decided.outcome = Some(PharmacyOutcome {
                status: FillStatus::Rejected {
                    code: NOT_COVERED_CODE.to_string(),
                    message: "Product/Service Not Covered".to_string(),
                },
                pricing: None,
                alerts: Vec::new(),
                adjudicated_on,
            });
            return Ok(decided);
        };

        let alerts = review(profile, fill, active);
        let status = decide_fill(&alerts, &fill.overrides);
        let pricing = (status == FillStatus::Paid).then(|| price_fill(profile, plan, entry, fill));
        tracing::debug!(
            prescription = %fill.id(),
            status = status.response_code(),
            alerts = alerts.len(),
            "Adjudicated pharmacy claim"
        );
        decided.outcome = Some(PharmacyOutcome {
            status,
            pricing,
            alerts,
            adjudicated_on,
        });
        Ok(decided)
    }

    /// Adjudicate every fill in `entities` that has no outcome yet.
    ///
    /// Fills run in `(fill_date, id)` order; each decided fill joins the
    /// medication list seen by the ones after it.
    pub fn adjudicate_prescriptions(
        &self,
        entities: &EntitySet,
        adjudicated_on: NaiveDate,
    ) -> Vec<Result<Prescription, (EntityId, AdjudicationError)>> {
        let mut pending: Vec<EntityId> = entities
            .prescriptions
            .iter()
            .filter(|rx| rx.outcome.is_none())
            .map(Prescription::id)
            .collect();
        pending.sort_by_key(|id| {
            entities
                .prescription(*id)
                .map(|rx| (rx.fill_date, rx.id()))
        });

        let mut working = entities.clone();
        let mut results = Vec::with_capacity(pending.len());
        for id in pending {
            let Some(fill) = working.prescription(id) else {
                continue;
            };
            let active = active_medications(&working, fill);
            let rx_member = working.identity(fill.rx_member());
            match self.adjudicate_prescription(fill, rx_member, &active, adjudicated_on) {
                Ok(decided) => {
                    if let Some(slot) = working.prescriptions.iter_mut().find(|rx| rx.id() == id) {
                        *slot = decided.clone();
                    }
                    results.push(Ok(decided));
                }
                Err(err) => {
                    tracing::warn!(prescription = %id, error = %err, "Pharmacy adjudication failed");
                    results.push(Err((id, err)));
                }
            }
        }
        results
    }
}
