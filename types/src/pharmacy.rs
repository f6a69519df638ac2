//! Prescriptions and pharmacy claim outcomes.

use std::fmt;

use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{EntityId, Money};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drug {
    /// 11-digit National Drug Code.
    pub ndc: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DurSeverity {
    Low,
    Moderate,
    High,
}

impl DurSeverity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            DurSeverity::Low => "LOW",
            DurSeverity::Moderate => "MODERATE",
            DurSeverity::High => "HIGH",
        }
    }

    /// NCPDP clinical significance code (528-FS).
    #[must_use]
    pub const fn clinical_significance(self) -> &'static str {
        match self {
            DurSeverity::High => "1",
            DurSeverity::Moderate => "2",
            DurSeverity::Low => "3",
        }
    }
}

impl fmt::Display for DurSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurKind {
    DrugDrugInteraction,
    DuplicateTherapy,
    HighRiskCombination,
}

impl DurKind {
    /// NCPDP reason-for-service code (439-E4).
    #[must_use]
    pub const fn reason_for_service(self) -> &'static str {
        match self {
            DurKind::DrugDrugInteraction => "DD",
            DurKind::DuplicateTherapy => "TD",
            DurKind::HighRiskCombination => "HC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurAction {
    FillWithOverride,
    NotifyPrescriber,
    Reject,
}

impl DurAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            DurAction::FillWithOverride => "fill_with_override",
            DurAction::NotifyPrescriber => "notify_prescriber",
            DurAction::Reject => "reject",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurAlert {
    pub kind: DurKind,
    pub severity: DurSeverity,
    pub action: DurAction,
    /// The active prescription this fill conflicts with.
    pub conflicting: EntityId,
    pub conflicting_ndc: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingBasis {
    /// Ingredient cost plus dispensing fee.
    IngredientCost,
    UsualAndCustomary,
}

impl PricingBasis {
    /// NCPDP basis of reimbursement determination (522-FM).
    #[must_use]
    pub const fn ncpdp_code(self) -> &'static str {
        match self {
            PricingBasis::IngredientCost => "01",
            PricingBasis::UsualAndCustomary => "04",
        }
    }
}

/// Lesser-of pricing result for one fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingBreakdown {
    pub ingredient_cost: Money,
    pub dispensing_fee: Money,
    pub calculated: Money,
    pub usual_and_customary: Money,
    pub basis: PricingBasis,
    pub allowed: Money,
    pub patient_pay: Money,
    pub plan_paid: Money,
    pub tier: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FillStatus {
    Paid,
    Rejected { code: String, message: String },
}

impl FillStatus {
    /// NCPDP transaction response status (112-AN).
    #[must_use]
    pub const fn response_code(&self) -> &'static str {
        match self {
            FillStatus::Paid => "P",
            FillStatus::Rejected { .. } => "R",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PharmacyOutcome {
    pub status: FillStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<PricingBreakdown>,
    #[serde(default)]
    pub alerts: Vec<DurAlert>,
    pub adjudicated_on: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prescription {
    id: EntityId,
    rx_member: EntityId,
    pub drug: Drug,
    pub quantity: Decimal,
    pub days_supply: u32,
    pub fill_date: NaiveDate,
    pub prescriber_npi: String,
    pub pharmacy_npi: String,
    /// Pharmacy's submitted usual-and-customary charge.
    pub usual_and_customary: Money,
    /// DUR conflicts the pharmacist has recorded an override for.
    #[serde(default)]
    pub overrides: Vec<DurKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<PharmacyOutcome>,
}

impl Prescription {
    #[must_use]
    pub fn new(
        id: EntityId,
        rx_member: EntityId,
        drug: Drug,
        quantity: Decimal,
        days_supply: u32,
        fill_date: NaiveDate,
        usual_and_customary: Money,
    ) -> Self {
        Self {
            id,
            rx_member,
            drug,
            quantity,
            days_supply,
            fill_date,
            prescriber_npi: String::new(),
            pharmacy_npi: String::new(),
            usual_and_customary,
            overrides: Vec::new(),
            outcome: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    #[must_use]
    pub const fn rx_member(&self) -> EntityId {
        self.rx_member
    }

    /// Whether the supply from this fill still covers `date`.
    #[must_use]
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        let runs_out = self
            .fill_date
            .checked_add_days(Days::new(u64::from(self.days_supply)));
        date >= self.fill_date && runs_out.is_some_and(|end| date < end)
    }

    /// Fills that were rejected never became active medications.
    #[must_use]
    pub fn was_dispensed(&self) -> bool {
        self.outcome
            .as_ref()
            .is_none_or(|outcome| outcome.status == FillStatus::Paid)
    }
}
