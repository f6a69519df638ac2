//! The in-memory working set.
//!
//! Every entity enters through [`Session::add_entities`] or
//! [`Session::apply_drafts`]: persons and identities go through the
//! correlation graph, everything else through the consistency checks.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

use healthsim_config::PolicyProfile;
use healthsim_core::{
    BindRequest, CorrelationGraph, DraftContext, EntityDraft, Normalized, check_entity, normalize,
};
use healthsim_engine::{AdjudicationError, Adjudicator, ClaimHistory};
use healthsim_formats::{CodecRegistry, Export, ExportOptions};
use healthsim_types::{
    AppealOutcome, Cohort, CohortCriteria, CohortName, Entity, EntityId, EntityKind, EntitySet,
    ProductIdentity, ValidationReport,
};

use crate::{IdAllocator, SessionError};

/// The active working set of entities.
#[derive(Debug)]
pub struct Session {
    entities: EntitySet,
    ids: Arc<IdAllocator>,
    /// Cohort this session was loaded from, if any.
    origin: Option<CohortName>,
    pub description: Option<String>,
    pub criteria: CohortCriteria,
}

/// What one adjudication pass decided.
#[derive(Debug, Default)]
pub struct AdjudicationSummary {
    pub claims: usize,
    pub prescriptions: usize,
    pub failures: Vec<(EntityId, AdjudicationError)>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        tracing::info!("Session created");
        Self {
            entities: EntitySet::new(),
            ids: Arc::new(IdAllocator::new()),
            origin: None,
            description: None,
            criteria: CohortCriteria::default(),
        }
    }

    /// Rebuild a session from a stored cohort, re-checking correlation.
    pub fn from_cohort(cohort: Cohort) -> Result<Self, SessionError> {
        cohort.entities.verify_correlation()?;
        let ids = IdAllocator::seeded(&cohort.high_water);
        for id in cohort.entities.ids() {
            ids.observe(id);
        }
        tracing::info!(
            cohort = %cohort.name,
            entities = cohort.entities.len(),
            "Session loaded from cohort"
        );
        Ok(Self {
            entities: cohort.entities,
            ids: Arc::new(ids),
            origin: Some(cohort.name),
            description: cohort.description,
            criteria: cohort.criteria,
        })
    }

    /// Snapshot for saving under `name`.
    #[must_use]
    pub fn to_cohort(&self, name: CohortName, saved_at: DateTime<Utc>) -> Cohort {
        Cohort {
            name,
            description: self.description.clone(),
            criteria: self.criteria.clone(),
            saved_at,
            entities: self.entities.clone(),
            high_water: self.ids.high_water(),
        }
    }

    #[must_use]
    pub fn origin(&self) -> Option<&CohortName> {
        self.origin.as_ref()
    }

    pub(crate) fn set_origin(&mut self, name: CohortName) {
        self.origin = Some(name);
    }

    #[must_use]
    pub fn entities(&self) -> &EntitySet {
        &self.entities
    }

    /// Allocator handle for workers generating entities in parallel.
    #[must_use]
    pub fn ids(&self) -> Arc<IdAllocator> {
        Arc::clone(&self.ids)
    }

    pub fn allocate(&self, kind: EntityKind) -> EntityId {
        self.ids.allocate(kind)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Add already-built entities. Either all of them join or none do.
    ///
    /// Persons are registered first, then closed identities, then active
    /// ones, then encounters, then everything that may reference them.
    pub fn add_entities(
        &mut self,
        entities: impl IntoIterator<Item = Entity>,
    ) -> Result<Vec<EntityId>, SessionError> {
        let mut batch: Vec<Entity> = entities.into_iter().collect();
        batch.sort_by_key(admission_rank);

        let mut staged = self.entities.clone();
        let mut added = Vec::with_capacity(batch.len());
        for entity in batch {
            let id = entity.id();
            if staged.contains(id) {
                return Err(SessionError::DuplicateEntity { id });
            }
            admit(&mut staged, entity)?;
            added.push(id);
        }

        self.entities = staged;
        for id in &added {
            self.ids.observe(*id);
        }
        tracing::info!(added = added.len(), total = self.entities.len(), "Entities added");
        Ok(added)
    }

    /// Validate and normalize drafts in order, adding each one that passes.
    ///
    /// A draft may reference earlier drafts of the same batch by `ref`
    /// label. Drafts that fail validation, correlation or consistency are
    /// skipped and reported; the rest of the batch proceeds.
    pub fn apply_drafts(&mut self, drafts: &[EntityDraft]) -> ValidationReport {
        let mut report = ValidationReport::new();
        let mut labels: BTreeMap<String, EntityId> = BTreeMap::new();
        let mut accepted = 0usize;

        for (index, draft) in drafts.iter().enumerate() {
            let context = BatchContext {
                labels: &labels,
                entities: &self.entities,
                ids: &self.ids,
            };
            let Some(normalized) = normalize(draft, index, &context, &mut report) else {
                continue;
            };
            let id = normalized.id();
            let applied = match normalized {
                Normalized::Person(person) => self
                    .entities
                    .add_person(person)
                    .map_err(SessionError::from),
                Normalized::Identity { id, request } => self
                    .entities
                    .bind_identity(id, request)
                    .map(|_| ())
                    .map_err(SessionError::from),
                Normalized::Entity(entity) => admit(&mut self.entities, entity),
            };
            match applied {
                Ok(()) => {
                    if let Some(label) = draft.label().filter(|label| !label.trim().is_empty()) {
                        labels.insert(label.trim().to_string(), id);
                    }
                    accepted += 1;
                }
                Err(err) => {
                    let subject = draft.subject(index);
                    tracing::warn!(draft = %subject, error = %err, "Draft rejected");
                    report.error(&subject, draft.type_name(), err.to_string());
                    report.admit(&subject);
                }
            }
        }

        tracing::info!(
            drafts = drafts.len(),
            accepted,
            skipped = report.skipped().len(),
            "Applied entity drafts"
        );
        report
    }

    pub fn bind_identity(&mut self, request: BindRequest) -> Result<EntityId, SessionError> {
        let id = self.ids.allocate(request.profile.product().entity_kind());
        self.entities.bind_identity(id, request)?;
        Ok(id)
    }

    pub fn close_identity(&mut self, identity: EntityId, on: NaiveDate) -> Result<(), SessionError> {
        self.entities.close_identity(identity, on)?;
        Ok(())
    }

    /// Close `prior` and bind its replacement, effective `request.effective`.
    pub fn supersede_identity(
        &mut self,
        prior: EntityId,
        request: BindRequest,
    ) -> Result<EntityId, SessionError> {
        let id = self.ids.allocate(request.profile.product().entity_kind());
        self.entities.supersede_identity(prior, id, request)?;
        tracing::info!(prior = %prior, identity = %id, "Identity superseded");
        Ok(id)
    }

    #[must_use]
    pub fn identity_timeline(&self, person: EntityId) -> Vec<&ProductIdentity> {
        self.entities.identity_timeline(person)
    }

    /// Adjudicate every submitted claim and every fill without an outcome.
    ///
    /// Failures stay local to their claim or fill and are listed in the
    /// summary; undecided entities keep their prior state.
    pub fn adjudicate(
        &mut self,
        profile: &PolicyProfile,
        adjudicated_on: NaiveDate,
    ) -> AdjudicationSummary {
        let adjudicator = Adjudicator::new(profile);
        let mut summary = AdjudicationSummary::default();

        for result in adjudicator.adjudicate_batch(&self.entities, adjudicated_on) {
            match result {
                Ok(claim) => {
                    self.entities.insert(Entity::Claim(claim));
                    summary.claims += 1;
                }
                Err(failure) => summary.failures.push(failure),
            }
        }
        for result in adjudicator.adjudicate_prescriptions(&self.entities, adjudicated_on) {
            match result {
                Ok(fill) => {
                    self.entities.insert(Entity::Prescription(fill));
                    summary.prescriptions += 1;
                }
                Err(failure) => summary.failures.push(failure),
            }
        }

        tracing::info!(
            claims = summary.claims,
            prescriptions = summary.prescriptions,
            failures = summary.failures.len(),
            "Adjudication finished"
        );
        summary
    }

    pub fn file_appeal(
        &mut self,
        profile: &PolicyProfile,
        claim: EntityId,
        filed_on: NaiveDate,
    ) -> Result<(), SessionError> {
        let mut appealed = self
            .entities
            .claim(claim)
            .cloned()
            .ok_or(SessionError::UnknownEntity { id: claim })?;
        Adjudicator::new(profile).file_appeal(&mut appealed, filed_on)?;
        self.entities.insert(Entity::Claim(appealed));
        Ok(())
    }

    pub fn resolve_appeal(
        &mut self,
        profile: &PolicyProfile,
        claim: EntityId,
        outcome: AppealOutcome,
        resolved_on: NaiveDate,
    ) -> Result<(), SessionError> {
        let mut resolved = self
            .entities
            .claim(claim)
            .cloned()
            .ok_or(SessionError::UnknownEntity { id: claim })?;
        let member = self.entities.identity(resolved.member());
        Adjudicator::new(profile).resolve_appeal(
            &mut resolved,
            outcome,
            resolved_on,
            member,
            ClaimHistory::new(&self.entities.claims),
        )?;
        self.entities.insert(Entity::Claim(resolved));
        Ok(())
    }

    /// Serialize the working set with the named codec.
    pub fn export(
        &self,
        registry: &CodecRegistry,
        codec: &str,
        options: &ExportOptions,
    ) -> Result<Export, SessionError> {
        let export = registry.lookup(codec)?.export(&self.entities, options)?;
        tracing::info!(
            codec,
            files = export.files.len(),
            bytes = export.byte_len(),
            skipped = export.report.skipped().len(),
            "Export completed"
        );
        Ok(export)
    }
}

fn admission_rank(entity: &Entity) -> u8 {
    match entity {
        Entity::Person(_) => 0,
        Entity::Identity(identity) if !identity.is_active() => 1,
        Entity::Identity(_) => 2,
        Entity::Encounter(_) => 3,
        Entity::Condition(_)
        | Entity::Observation(_)
        | Entity::Claim(_)
        | Entity::Prescription(_)
        | Entity::AdverseEvent(_) => 4,
    }
}

fn admit(entities: &mut EntitySet, entity: Entity) -> Result<(), SessionError> {
    match entity {
        Entity::Person(person) => entities.add_person(person)?,
        Entity::Identity(identity) => {
            let id = identity.id();
            let end = identity.end();
            let request = BindRequest {
                person: identity.person(),
                local_id: identity.local_id,
                effective: identity.effective,
                profile: identity.profile,
            };
            entities.bind_identity(id, request)?;
            if let Some(end) = end {
                entities.close_identity(id, end)?;
            }
        }
        other => {
            check_entity(entities, &other)?;
            entities.insert(other);
        }
    }
    Ok(())
}

/// Label and id resolution for one draft batch.
struct BatchContext<'a> {
    labels: &'a BTreeMap<String, EntityId>,
    entities: &'a EntitySet,
    ids: &'a IdAllocator,
}

impl DraftContext for BatchContext<'_> {
    fn resolve(&self, reference: &str) -> Option<EntityId> {
        let reference = reference.trim();
        self.labels.get(reference).copied().or_else(|| {
            reference
                .parse::<EntityId>()
                .ok()
                .filter(|id| self.entities.contains(*id))
        })
    }

    fn allocate(&self, kind: EntityKind) -> EntityId {
        self.ids.allocate(kind)
    }
}
