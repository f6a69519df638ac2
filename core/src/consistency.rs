//! Cross-entity consistency checks.
//!
//! These run before an entity joins a set. A violation is fatal to the single
//! create operation and carries enough context to fix the input.

use thiserror::Error;

use healthsim_types::{
    AdverseEvent, Claim, Condition, Encounter, Entity, EntityId, EntityKind, EntitySet,
    Observation, Prescription,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyError {
    #[error("{entity} references {owner}, which is not a {expected}")]
    OwnerKind {
        entity: EntityId,
        owner: EntityId,
        expected: &'static str,
    },
    #[error("{entity} references {reference}, which does not exist")]
    MissingReference {
        entity: EntityId,
        reference: EntityId,
    },
    #[error("{claim} {field} is {actual} but encounter {encounter} has {expected}")]
    ClaimEncounterMismatch {
        claim: EntityId,
        encounter: EntityId,
        field: &'static str,
        expected: String,
        actual: String,
    },
    #[error("{entity} and {reference} belong to different people")]
    OwnerMismatch {
        entity: EntityId,
        reference: EntityId,
    },
}

/// Check `entity` against the set it is about to join.
pub fn check_entity(entities: &EntitySet, entity: &Entity) -> Result<(), ConsistencyError> {
    match entity {
        // Correlation owns the identity checks.
        Entity::Person(_) | Entity::Identity(_) => Ok(()),
        Entity::Encounter(encounter) => check_encounter(entities, encounter),
        Entity::Condition(condition) => check_condition(entities, condition),
        Entity::Observation(observation) => check_observation(entities, observation),
        Entity::Claim(claim) => check_claim(entities, claim),
        Entity::Prescription(prescription) => check_prescription(entities, prescription),
        Entity::AdverseEvent(event) => check_adverse_event(entities, event),
    }
}

pub fn check_encounter(entities: &EntitySet, encounter: &Encounter) -> Result<(), ConsistencyError> {
    require_owner(entities, encounter.id(), encounter.patient(), EntityKind::Patient)
}

pub fn check_condition(entities: &EntitySet, condition: &Condition) -> Result<(), ConsistencyError> {
    require_owner(entities, condition.id(), condition.patient(), EntityKind::Patient)?;
    if let Some(encounter) = condition.encounter {
        same_owner_encounter(entities, condition.id(), condition.patient(), encounter)?;
    }
    Ok(())
}

pub fn check_observation(
    entities: &EntitySet,
    observation: &Observation,
) -> Result<(), ConsistencyError> {
    require_owner(
        entities,
        observation.id(),
        observation.patient(),
        EntityKind::Patient,
    )?;
    if let Some(encounter) = observation.encounter {
        same_owner_encounter(entities, observation.id(), observation.patient(), encounter)?;
    }
    Ok(())
}

/// A claim linked to an encounter must carry its service date and principal
/// diagnosis, and the encounter's patient must be the same person as the
/// claim's member.
pub fn check_claim(entities: &EntitySet, claim: &Claim) -> Result<(), ConsistencyError> {
    require_owner(entities, claim.id(), claim.member(), EntityKind::Member)?;
    let Some(encounter_id) = claim.encounter else {
        return Ok(());
    };
    let encounter = entities
        .encounter(encounter_id)
        .ok_or(ConsistencyError::MissingReference {
            entity: claim.id(),
            reference: encounter_id,
        })?;

    if encounter.service_date() != claim.service_date {
        return Err(ConsistencyError::ClaimEncounterMismatch {
            claim: claim.id(),
            encounter: encounter_id,
            field: "service_date",
            expected: encounter.service_date().to_string(),
            actual: claim.service_date.to_string(),
        });
    }

    let expected = encounter.principal_diagnosis();
    let actual = claim.principal_diagnosis();
    let diagnosis_matches = match (expected, actual) {
        (Some(expected), Some(actual)) => expected.same_concept(actual),
        (None, _) => true,
        (Some(_), None) => false,
    };
    if !diagnosis_matches {
        return Err(ConsistencyError::ClaimEncounterMismatch {
            claim: claim.id(),
            encounter: encounter_id,
            field: "principal_diagnosis",
            expected: expected.map(ToString::to_string).unwrap_or_default(),
            actual: actual.map_or_else(|| "none".to_string(), ToString::to_string),
        });
    }

    if !same_person(entities, claim.member(), encounter.patient()) {
        return Err(ConsistencyError::OwnerMismatch {
            entity: claim.id(),
            reference: encounter_id,
        });
    }
    Ok(())
}

pub fn check_prescription(
    entities: &EntitySet,
    prescription: &Prescription,
) -> Result<(), ConsistencyError> {
    require_owner(
        entities,
        prescription.id(),
        prescription.rx_member(),
        EntityKind::RxMember,
    )
}

pub fn check_adverse_event(
    entities: &EntitySet,
    event: &AdverseEvent,
) -> Result<(), ConsistencyError> {
    require_owner(entities, event.id(), event.subject(), EntityKind::Subject)
}

fn require_owner(
    entities: &EntitySet,
    entity: EntityId,
    owner: EntityId,
    expected: EntityKind,
) -> Result<(), ConsistencyError> {
    if owner.kind() != expected {
        return Err(ConsistencyError::OwnerKind {
            entity,
            owner,
            expected: expected.as_str(),
        });
    }
    if entities.identity(owner).is_none() {
        return Err(ConsistencyError::MissingReference {
            entity,
            reference: owner,
        });
    }
    Ok(())
}

fn same_owner_encounter(
    entities: &EntitySet,
    entity: EntityId,
    patient: EntityId,
    encounter: EntityId,
) -> Result<(), ConsistencyError> {
    let linked = entities
        .encounter(encounter)
        .ok_or(ConsistencyError::MissingReference {
            entity,
            reference: encounter,
        })?;
    if linked.patient() == patient {
        Ok(())
    } else {
        Err(ConsistencyError::OwnerMismatch {
            entity,
            reference: encounter,
        })
    }
}

fn same_person(entities: &EntitySet, left: EntityId, right: EntityId) -> bool {
    match (entities.identity(left), entities.identity(right)) {
        (Some(left), Some(right)) => left.correlation_key() == right.correlation_key(),
        _ => false,
    }
}
