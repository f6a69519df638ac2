//! Promotion of sessions to named cohorts and back.

use chrono::Utc;

use healthsim_types::{Cohort, CohortName, CohortSummary};

use crate::{CohortStore, Session, SessionError, WriteMode};

pub struct CohortManager<S> {
    store: S,
}

impl<S: CohortStore> CohortManager<S> {
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Save the session under `name`. Without `overwrite`, an existing
    /// cohort of that name is left untouched and the save fails.
    pub fn save_as(
        &self,
        session: &mut Session,
        name: &CohortName,
        overwrite: bool,
    ) -> Result<Cohort, SessionError> {
        let cohort = session.to_cohort(name.clone(), Utc::now());
        let mode = if overwrite {
            WriteMode::Overwrite
        } else {
            WriteMode::Create
        };
        self.store.put(&cohort, mode)?;
        session.set_origin(name.clone());
        tracing::info!(
            cohort = %name,
            entities = cohort.entities.len(),
            overwrite,
            "Cohort saved"
        );
        Ok(cohort)
    }

    /// Load a cohort into a new session.
    pub fn load(&self, name: &CohortName) -> Result<Session, SessionError> {
        let cohort = self.store.get(name)?;
        Session::from_cohort(cohort)
    }

    pub fn delete(&self, name: &CohortName) -> Result<(), SessionError> {
        self.store.delete(name)?;
        tracing::info!(cohort = %name, "Cohort deleted");
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<CohortSummary>, SessionError> {
        self.store.list()
    }
}
