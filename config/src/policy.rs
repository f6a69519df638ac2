//! Payer/policy profiles.
//!
//! A profile carries every number the adjudication engine needs: cost-share
//! per plan, the professional fee schedule, pharmacy pricing basis, the
//! denial rules (with their liability and appeal windows) and DUR rules.
//!
//! ```toml
//! [payer]
//! id = "SIMPAYER01"
//! name = "Synthetic Health Plan"
//! default_allowed_pct = "0.80"
//!
//! [plans.PPO-GOLD]
//! deductible = "500.00"
//! coinsurance = "0.20"
//! office_copay = "25.00"
//! rx_tier_copays = ["10.00", "35.00", "70.00"]
//!
//! [[denial_rules]]
//! kind = "timely_filing"
//! filing_limit_days = 365
//! liability = "provider"
//! appeal = { permitted = true, window_days = 365 }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use rust_decimal::Decimal;
use serde::Deserialize;

use healthsim_types::{AdjustmentGroup, DenialReason, DurAction, DurKind, DurSeverity, Money};

use crate::ConfigError;

const EXAMPLE_PROFILE: &str = include_str!("../policy.example.toml");

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PayerInfo {
    pub id: String,
    pub name: String,
    /// Share of billed charge allowed for procedures absent from the fee schedule.
    pub default_allowed_pct: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlanCostShare {
    /// Annual deductible per member, reset each calendar year.
    pub deductible: Money,
    /// Member share after deductible and copay, in `[0, 1]`.
    pub coinsurance: Decimal,
    /// Applied once per professional claim.
    #[serde(default)]
    pub office_copay: Money,
    /// Copay per formulary tier; tier 1 is index 0.
    #[serde(default)]
    pub rx_tier_copays: Vec<Money>,
}

impl PlanCostShare {
    #[must_use]
    pub fn tier_copay(&self, tier: u8) -> Option<Money> {
        let index = usize::from(tier).checked_sub(1)?;
        self.rx_tier_copays.get(index).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FormularyEntry {
    pub name: String,
    /// Ingredient cost per dispensed unit; may carry more than two places.
    pub unit_cost: Decimal,
    pub tier: u8,
    /// Therapeutic class used by DUR rules.
    pub class: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PharmacyPolicy {
    pub dispensing_fee: Money,
    /// Keyed by 11-digit NDC.
    #[serde(default)]
    pub formulary: BTreeMap<String, FormularyEntry>,
}

/// Who carries a denied amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liability {
    /// Administrative failure; the provider writes it off.
    Provider,
    /// The member may be billed outside the plan.
    Patient,
}

impl Liability {
    #[must_use]
    pub const fn adjustment_group(self) -> AdjustmentGroup {
        match self {
            Liability::Provider => AdjustmentGroup::ContractualObligation,
            Liability::Patient => AdjustmentGroup::PatientResponsibility,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AppealPolicy {
    pub permitted: bool,
    /// Days after the adjudication date an appeal may be filed.
    #[serde(default)]
    pub window_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BundledPair {
    pub primary: String,
    /// Denied when billed on the same claim as `primary`.
    pub component: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NecessityRequirement {
    pub procedure: String,
    /// At least one claim diagnosis must start with one of these.
    pub diagnosis_prefixes: Vec<String>,
}

/// One payer denial rule. Each kind carries its own parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenialRule {
    AuthorizationRequired {
        procedure_codes: Vec<String>,
        liability: Liability,
        appeal: AppealPolicy,
    },
    DuplicateSubmission {
        liability: Liability,
        appeal: AppealPolicy,
    },
    TimelyFiling {
        filing_limit_days: u32,
        liability: Liability,
        appeal: AppealPolicy,
    },
    Bundling {
        pairs: Vec<BundledPair>,
        liability: Liability,
        appeal: AppealPolicy,
    },
    MedicalNecessity {
        requirements: Vec<NecessityRequirement>,
        liability: Liability,
        appeal: AppealPolicy,
    },
    InformationInconsistent {
        liability: Liability,
        appeal: AppealPolicy,
    },
}

impl DenialRule {
    #[must_use]
    pub const fn reason(&self) -> DenialReason {
        match self {
            DenialRule::AuthorizationRequired { .. } => DenialReason::AuthorizationRequired,
            DenialRule::DuplicateSubmission { .. } => DenialReason::DuplicateSubmission,
            DenialRule::TimelyFiling { .. } => DenialReason::TimelyFiling,
            DenialRule::Bundling { .. } => DenialReason::Bundling,
            DenialRule::MedicalNecessity { .. } => DenialReason::MedicalNecessity,
            DenialRule::InformationInconsistent { .. } => DenialReason::InformationInconsistent,
        }
    }

    #[must_use]
    pub const fn liability(&self) -> Liability {
        match self {
            DenialRule::AuthorizationRequired { liability, .. }
            | DenialRule::DuplicateSubmission { liability, .. }
            | DenialRule::TimelyFiling { liability, .. }
            | DenialRule::Bundling { liability, .. }
            | DenialRule::MedicalNecessity { liability, .. }
            | DenialRule::InformationInconsistent { liability, .. } => *liability,
        }
    }

    #[must_use]
    pub const fn appeal(&self) -> AppealPolicy {
        match self {
            DenialRule::AuthorizationRequired { appeal, .. }
            | DenialRule::DuplicateSubmission { appeal, .. }
            | DenialRule::TimelyFiling { appeal, .. }
            | DenialRule::Bundling { appeal, .. }
            | DenialRule::MedicalNecessity { appeal, .. }
            | DenialRule::InformationInconsistent { appeal, .. } => *appeal,
        }
    }
}

/// One drug-utilization review rule, matched on therapeutic class.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DurRule {
    /// Fires when the new fill and an active medication carry the two classes.
    Interaction {
        classes: Vec<String>,
        severity: DurSeverity,
        action: DurAction,
    },
    /// Fires when an active medication shares the new fill's class.
    DuplicateTherapy {
        severity: DurSeverity,
        action: DurAction,
    },
    /// Like `Interaction`, for combinations flagged as high risk.
    HighRiskCombination {
        classes: Vec<String>,
        severity: DurSeverity,
        action: DurAction,
    },
}

impl DurRule {
    #[must_use]
    pub const fn kind(&self) -> DurKind {
        match self {
            DurRule::Interaction { .. } => DurKind::DrugDrugInteraction,
            DurRule::DuplicateTherapy { .. } => DurKind::DuplicateTherapy,
            DurRule::HighRiskCombination { .. } => DurKind::HighRiskCombination,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PolicyProfile {
    pub payer: PayerInfo,
    #[serde(default)]
    pub plans: BTreeMap<String, PlanCostShare>,
    /// Allowed amount per unit, keyed by procedure code.
    #[serde(default)]
    pub fee_schedule: BTreeMap<String, Money>,
    #[serde(default)]
    pub pharmacy: PharmacyPolicy,
    #[serde(default)]
    pub denial_rules: Vec<DenialRule>,
    #[serde(default)]
    pub dur_rules: Vec<DurRule>,
}

impl PolicyProfile {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let profile: PolicyProfile = toml::from_str(content)
            .map_err(|source| ConfigError::Parse { path: None, source })?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read policy profile at {:?}: {}", path, source);
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let profile: PolicyProfile = toml::from_str(&content).map_err(|source| {
            tracing::warn!("Failed to parse policy profile at {:?}: {}", path, source);
            ConfigError::Parse {
                path: Some(path.to_path_buf()),
                source,
            }
        })?;
        profile.validate()?;
        tracing::info!(payer = %profile.payer.id, plans = profile.plans.len(), "Loaded policy profile");
        Ok(profile)
    }

    /// The bundled example profile, for demos and tests.
    pub fn example() -> Result<Self, ConfigError> {
        Self::from_toml_str(EXAMPLE_PROFILE)
    }

    #[must_use]
    pub fn plan(&self, plan_code: &str) -> Option<&PlanCostShare> {
        self.plans.get(plan_code)
    }

    #[must_use]
    pub fn formulary(&self, ndc: &str) -> Option<&FormularyEntry> {
        self.pharmacy.formulary.get(ndc)
    }

    /// Denial rules in evaluation precedence, regardless of file order.
    #[must_use]
    pub fn denial_rules_by_precedence(&self) -> Vec<&DenialRule> {
        let mut rules: Vec<&DenialRule> = self.denial_rules.iter().collect();
        rules.sort_by_key(|rule| rule.reason());
        rules
    }

    #[must_use]
    pub fn denial_rule(&self, reason: DenialReason) -> Option<&DenialRule> {
        self.denial_rules.iter().find(|rule| rule.reason() == reason)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = Decimal::ZERO..=Decimal::ONE;
        if !unit.contains(&self.payer.default_allowed_pct) {
            return Err(ConfigError::invalid(
                "payer.default_allowed_pct must be between 0 and 1",
            ));
        }
        for (code, plan) in &self.plans {
            if !unit.contains(&plan.coinsurance) {
                return Err(ConfigError::invalid(format!(
                    "plans.{code}.coinsurance must be between 0 and 1"
                )));
            }
            let negative = plan.deductible.is_negative()
                || plan.office_copay.is_negative()
                || plan.rx_tier_copays.iter().any(|copay| copay.is_negative());
            if negative {
                return Err(ConfigError::invalid(format!(
                    "plans.{code} has a negative amount"
                )));
            }
        }
        if let Some((code, _)) = self.fee_schedule.iter().find(|(_, fee)| fee.is_negative()) {
            return Err(ConfigError::invalid(format!(
                "fee_schedule.{code} is negative"
            )));
        }
        if self.pharmacy.dispensing_fee.is_negative() {
            return Err(ConfigError::invalid("pharmacy.dispensing_fee is negative"));
        }
        for (ndc, entry) in &self.pharmacy.formulary {
            if entry.tier == 0 || entry.unit_cost.is_sign_negative() {
                return Err(ConfigError::invalid(format!(
                    "pharmacy.formulary.{ndc} needs tier >= 1 and a non-negative unit_cost"
                )));
            }
        }
        let mut seen = BTreeSet::new();
        for rule in &self.denial_rules {
            if !seen.insert(rule.reason()) {
                return Err(ConfigError::invalid(format!(
                    "more than one {} denial rule",
                    rule.reason()
                )));
            }
        }
        for rule in &self.dur_rules {
            if let DurRule::Interaction { classes, .. }
            | DurRule::HighRiskCombination { classes, .. } = rule
                && classes.len() != 2
            {
                return Err(ConfigError::invalid(
                    "interaction rules need exactly two classes",
                ));
            }
        }
        Ok(())
    }
}
