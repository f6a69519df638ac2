//! Session and cohort management for HealthSim.
//!
//! A [`Session`] is the in-memory working set: entities enter it through
//! correlation and consistency checks and draw identifiers from a shared
//! per-kind allocator. A [`CohortManager`] promotes a session to a named
//! cohort in a [`CohortStore`] and loads it back.

mod cohorts;
mod ids;
mod session;
mod store;

pub use cohorts::CohortManager;
pub use ids::IdAllocator;
pub use session::{AdjudicationSummary, Session};
pub use store::{CohortStore, QueryRows, SqliteCohortStore, WriteMode};

use thiserror::Error;

use healthsim_core::{ConsistencyError, CorrelationError};
use healthsim_engine::AdjudicationError;
use healthsim_formats::CodecError;
use healthsim_types::{CohortName, EntityId};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cohort {name} already exists")]
    DuplicateCohortName { name: CohortName },
    #[error("cohort {name} not found")]
    CohortNotFound { name: CohortName },
    #[error("cohort {name} failed its integrity check: expected {expected}, found {actual}")]
    ChecksumMismatch {
        name: CohortName,
        expected: String,
        actual: String,
    },
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),
    #[error(transparent)]
    Adjudication(#[from] AdjudicationError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("entity {id} is not in the session")]
    UnknownEntity { id: EntityId },
    #[error("entity {id} is already in the session")]
    DuplicateEntity { id: EntityId },
    #[error("only read-only SELECT statements may be queried")]
    WriteQuery,
    #[error("cohort store: {0:#}")]
    Store(#[from] anyhow::Error),
}
