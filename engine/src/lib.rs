//! Deterministic adjudication engine for HealthSim.
//!
//! Prices professional claims against a payer profile, applies denial rules
//! in precedence order, runs the claim state machine through appeals, and
//! adjudicates pharmacy fills with lesser-of pricing and DUR. No clock, no
//! randomness: the adjudication date and the claim history are inputs.

use chrono::NaiveDate;
use thiserror::Error;

use healthsim_types::{EntityId, InvalidTransition};

mod claims;
mod denial;
pub mod dur;
mod history;
mod pharmacy;
mod pricing;

pub use claims::Adjudicator;
pub use denial::{days_elapsed, denial_for, first_denial};
pub use dur::{decide_fill, review};
pub use history::ClaimHistory;
pub use pharmacy::{NOT_COVERED_CODE, active_medications, price_fill};
pub use pricing::{Accumulator, calculated_price, price_line};

/// Adjudication failures. Denials and rejected fills are outcomes, not
/// errors; these mean the request itself could not be processed.
#[derive(Debug, Error)]
pub enum AdjudicationError {
    #[error("no coverage for {entity} under {coverage}: {reason}")]
    CoverageNotFound {
        entity: EntityId,
        coverage: EntityId,
        reason: &'static str,
    },
    #[error("claim {claim}: {source}")]
    InvalidTransition {
        claim: EntityId,
        #[source]
        source: InvalidTransition,
    },
    #[error("claim {claim} has no appealable denial")]
    AppealNotPermitted { claim: EntityId },
    #[error("appeal for claim {claim} filed {filed_on}, after the {deadline} deadline")]
    AppealWindowExpired {
        claim: EntityId,
        deadline: NaiveDate,
        filed_on: NaiveDate,
    },
    #[error("claim {claim} has no service lines")]
    NoServiceLines { claim: EntityId },
}
