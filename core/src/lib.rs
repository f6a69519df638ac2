//! Identity and consistency rules for HealthSim entity sets.
//!
//! Everything entering a session passes through here: drafts are validated
//! and normalized, identities are bound through the correlation graph, and
//! cross-entity references are checked before an entity joins a set.

pub mod codes;
mod consistency;
mod correlation;
pub mod drafts;

pub use consistency::{
    ConsistencyError, check_adverse_event, check_claim, check_condition, check_encounter,
    check_entity, check_observation, check_prescription,
};
pub use correlation::{BindRequest, CorrelationError, CorrelationGraph};
pub use drafts::{DraftContext, EntityDraft, Normalized, normalize};
