//! Identity correlation over an [`EntitySet`].
//!
//! Every product identity resolves to exactly one Person through the Person's
//! correlation key, and a Person holds at most one active identity per
//! product. Referential integrity is checked when identities are bound, so
//! reads only fail for identities that were never bound.

use chrono::NaiveDate;
use thiserror::Error;

use healthsim_types::{
    CorrelationKey, Entity, EntityId, EntityKind, EntitySet, IdentityProfile, Person,
    ProductIdentity, ProductType,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelationError {
    #[error("person {person} does not exist")]
    UnresolvedPerson { person: EntityId },
    #[error("person {person} already has active {product} identity {existing}")]
    DuplicateActiveIdentity {
        person: EntityId,
        product: &'static str,
        existing: EntityId,
    },
    #[error("identity {identity} does not exist")]
    IdentityNotFound { identity: EntityId },
    #[error("identity {identity} was closed on {closed_on}")]
    IdentityAlreadyClosed {
        identity: EntityId,
        closed_on: NaiveDate,
    },
    #[error("correlation key {key} is already held by person {existing}")]
    DuplicateCorrelationKey {
        key: CorrelationKey,
        existing: EntityId,
    },
    #[error("id {id} cannot name a {expected} identity")]
    IdentityKindMismatch { id: EntityId, expected: &'static str },
    #[error("identity {identity} cannot close on {on}, before its effective date {effective}")]
    CloseBeforeEffective {
        identity: EntityId,
        on: NaiveDate,
        effective: NaiveDate,
    },
}

/// Attributes for a new product identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindRequest {
    pub person: EntityId,
    pub local_id: String,
    pub effective: NaiveDate,
    pub profile: IdentityProfile,
}

/// Correlation operations on a set of entities.
pub trait CorrelationGraph {
    /// Register a Person. Correlation keys are unique across the set.
    fn add_person(&mut self, person: Person) -> Result<(), CorrelationError>;

    /// Bind a new active identity to an existing Person.
    fn bind_identity(
        &mut self,
        id: EntityId,
        request: BindRequest,
    ) -> Result<&ProductIdentity, CorrelationError>;

    fn resolve_person(&self, identity: EntityId) -> Result<&Person, CorrelationError>;

    fn close_identity(&mut self, identity: EntityId, on: NaiveDate)
    -> Result<(), CorrelationError>;

    /// Close `prior` on `request.effective` and bind `id` in its place.
    /// Nothing changes unless both steps succeed.
    fn supersede_identity(
        &mut self,
        prior: EntityId,
        id: EntityId,
        request: BindRequest,
    ) -> Result<&ProductIdentity, CorrelationError>;

    /// Every identity ever bound to `person`, oldest first.
    fn identity_timeline(&self, person: EntityId) -> Vec<&ProductIdentity>;

    fn identities_for_key(&self, key: CorrelationKey) -> Vec<&ProductIdentity>;

    fn active_identity(&self, person: EntityId, product: ProductType)
    -> Option<&ProductIdentity>;

    /// Check every identity in the set, e.g. after loading a cohort.
    fn verify_correlation(&self) -> Result<(), CorrelationError>;
}

impl CorrelationGraph for EntitySet {
    fn add_person(&mut self, person: Person) -> Result<(), CorrelationError> {
        if let Some(existing) = self
            .person_by_key(person.correlation_key())
            .filter(|existing| existing.id() != person.id())
        {
            return Err(CorrelationError::DuplicateCorrelationKey {
                key: person.correlation_key(),
                existing: existing.id(),
            });
        }
        tracing::debug!(person = %person.id(), "Added person");
        self.insert(Entity::Person(person));
        Ok(())
    }

    fn bind_identity(
        &mut self,
        id: EntityId,
        request: BindRequest,
    ) -> Result<&ProductIdentity, CorrelationError> {
        let identity = prepare_binding(self, id, request)?;
        tracing::debug!(
            identity = %id,
            person = %identity.person(),
            product = identity.product().as_str(),
            "Bound identity"
        );
        self.insert(Entity::Identity(identity));
        self.identity(id)
            .ok_or(CorrelationError::IdentityNotFound { identity: id })
    }

    fn resolve_person(&self, identity: EntityId) -> Result<&Person, CorrelationError> {
        let bound = self
            .identity(identity)
            .ok_or(CorrelationError::IdentityNotFound { identity })?;
        self.person(bound.person())
            .ok_or(CorrelationError::UnresolvedPerson {
                person: bound.person(),
            })
    }

    fn close_identity(
        &mut self,
        identity: EntityId,
        on: NaiveDate,
    ) -> Result<(), CorrelationError> {
        let target = self
            .identities
            .iter_mut()
            .find(|candidate| candidate.id() == identity)
            .ok_or(CorrelationError::IdentityNotFound { identity })?;
        if on < target.effective {
            return Err(CorrelationError::CloseBeforeEffective {
                identity,
                on,
                effective: target.effective,
            });
        }
        target
            .close(on)
            .map_err(|err| CorrelationError::IdentityAlreadyClosed {
                identity: err.id,
                closed_on: err.closed_on,
            })?;
        tracing::debug!(identity = %identity, closed_on = %on, "Closed identity");
        Ok(())
    }

    fn supersede_identity(
        &mut self,
        prior: EntityId,
        id: EntityId,
        request: BindRequest,
    ) -> Result<&ProductIdentity, CorrelationError> {
        let previous = self
            .identity(prior)
            .ok_or(CorrelationError::IdentityNotFound { identity: prior })?;
        if let Some(closed_on) = previous.end() {
            return Err(CorrelationError::IdentityAlreadyClosed {
                identity: prior,
                closed_on,
            });
        }
        if previous.person() != request.person
            || previous.product() != request.profile.product()
        {
            return Err(CorrelationError::IdentityKindMismatch {
                id,
                expected: previous.product().as_str(),
            });
        }
        if request.effective < previous.effective {
            return Err(CorrelationError::CloseBeforeEffective {
                identity: prior,
                on: request.effective,
                effective: previous.effective,
            });
        }

        // Validate the replacement as if the prior identity were already closed.
        let mut staged = self.clone();
        staged.close_identity(prior, request.effective)?;
        let replacement = prepare_binding(&staged, id, request)?;

        self.close_identity(prior, replacement.effective)?;
        tracing::debug!(prior = %prior, identity = %id, "Superseded identity");
        self.insert(Entity::Identity(replacement));
        self.identity(id)
            .ok_or(CorrelationError::IdentityNotFound { identity: id })
    }

    fn identity_timeline(&self, person: EntityId) -> Vec<&ProductIdentity> {
        let mut timeline: Vec<&ProductIdentity> = self
            .identities
            .iter()
            .filter(|identity| identity.person() == person)
            .collect();
        timeline.sort_by_key(|identity| (identity.effective, identity.id()));
        timeline
    }

    fn identities_for_key(&self, key: CorrelationKey) -> Vec<&ProductIdentity> {
        self.identities
            .iter()
            .filter(|identity| identity.correlation_key() == key)
            .collect()
    }

    fn active_identity(
        &self,
        person: EntityId,
        product: ProductType,
    ) -> Option<&ProductIdentity> {
        self.identities.iter().find(|identity| {
            identity.person() == person && identity.product() == product && identity.is_active()
        })
    }

    fn verify_correlation(&self) -> Result<(), CorrelationError> {
        for identity in &self.identities {
            let person = self
                .person(identity.person())
                .ok_or(CorrelationError::UnresolvedPerson {
                    person: identity.person(),
                })?;
            if person.correlation_key() != identity.correlation_key() {
                return Err(CorrelationError::UnresolvedPerson {
                    person: identity.person(),
                });
            }
            if identity.is_active()
                && let Some(other) = self.identities.iter().find(|other| {
                    other.id() != identity.id()
                        && other.is_active()
                        && other.person() == identity.person()
                        && other.product() == identity.product()
                })
            {
                return Err(CorrelationError::DuplicateActiveIdentity {
                    person: identity.person(),
                    product: identity.product().as_str(),
                    existing: other.id().min(identity.id()),
                });
            }
        }
        Ok(())
    }
}

fn prepare_binding(
    entities: &EntitySet,
    id: EntityId,
    request: BindRequest,
) -> Result<ProductIdentity, CorrelationError> {
    let product = request.profile.product();
    if id.kind() != product.entity_kind() {
        return Err(CorrelationError::IdentityKindMismatch {
            id,
            expected: product.as_str(),
        });
    }
    if request.person.kind() != EntityKind::Person {
        return Err(CorrelationError::UnresolvedPerson {
            person: request.person,
        });
    }
    let person = entities
        .person(request.person)
        .ok_or(CorrelationError::UnresolvedPerson {
            person: request.person,
        })?;
    if let Some(existing) = entities.active_identity(request.person, product) {
        return Err(CorrelationError::DuplicateActiveIdentity {
            person: request.person,
            product: product.as_str(),
            existing: existing.id(),
        });
    }
    Ok(ProductIdentity::new(
        id,
        person.id(),
        person.correlation_key(),
        request.local_id,
        request.effective,
        request.profile,
    ))
}

#[cfg(test)]
mod tests {
    use super::{BindRequest, CorrelationError, CorrelationGraph};
    use chrono::NaiveDate;
    use healthsim_types::{
        Address, CorrelationKey, EntityId, EntityKind, EntitySet, IdentityProfile, Person,
        PersonName, ProductType, Sex,
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn id(kind: EntityKind, seq: u64) -> EntityId {
        EntityId::new(kind, seq).expect("valid id")
    }

    fn person(seq: u64) -> Person {
        Person::new(
            id(EntityKind::Person, seq),
            CorrelationKey::generate(),
            PersonName::new("Maria", "Lopez"),
            date(1961, 4, 2),
            Sex::Female,
            Address::default(),
        )
    }

    fn member_request(person: EntityId, plan: &str, effective: NaiveDate) -> BindRequest {
        BindRequest {
            person,
            local_id: format!("M-{plan}"),
            effective,
            profile: IdentityProfile::Member {
                plan_code: plan.to_string(),
                group_number: "GRP100".to_string(),
            },
        }
    }

    fn bound_set() -> EntitySet {
        let mut set = EntitySet::new();
        set.add_person(person(1)).expect("person");
        let who = id(EntityKind::Person, 1);
        set.bind_identity(
            id(EntityKind::Patient, 1),
            BindRequest {
                person: who,
                local_id: "MRN0001".to_string(),
                effective: date(2024, 1, 1),
                profile: IdentityProfile::Patient { facility: None },
            },
        )
        .expect("patient");
        set.bind_identity(
            id(EntityKind::Member, 1),
            member_request(who, "PPO-GOLD", date(2024, 1, 1)),
        )
        .expect("member");
        set.bind_identity(
            id(EntityKind::RxMember, 1),
            BindRequest {
                person: who,
                local_id: "RX0001".to_string(),
                effective: date(2024, 1, 1),
                profile: IdentityProfile::RxMember {
                    bin: "610014".to_string(),
                    pcn: "SIMRX".to_string(),
                    rx_group: "RXGRP1".to_string(),
                    plan_code: "PPO-GOLD".to_string(),
                },
            },
        )
        .expect("rx member");
        set
    }

    #[test]
    fn all_identities_share_the_person_key() {
        let set = bound_set();
        let key = set
            .person(id(EntityKind::Person, 1))
            .expect("person")
            .correlation_key();
        let identities = set.identities_for_key(key);
        assert_eq!(identities.len(), 3);
        for identity in identities {
            assert_eq!(identity.correlation_key(), key);
            let resolved = set.resolve_person(identity.id()).expect("resolves");
            assert_eq!(resolved.id(), id(EntityKind::Person, 1));
        }
    }

    #[test]
    fn second_active_member_is_rejected() {
        let mut set = bound_set();
        let err = set
            .bind_identity(
                id(EntityKind::Member, 2),
                member_request(id(EntityKind::Person, 1), "HDHP-BRONZE", date(2024, 6, 1)),
            )
            .expect_err("duplicate active member");
        assert_eq!(
            err,
            CorrelationError::DuplicateActiveIdentity {
                person: id(EntityKind::Person, 1),
                product: "member",
                existing: id(EntityKind::Member, 1),
            }
        );
    }

    #[test]
    fn binding_to_missing_person_fails() {
        let mut set = EntitySet::new();
        let err = set
            .bind_identity(
                id(EntityKind::Member, 1),
                member_request(id(EntityKind::Person, 9), "PPO-GOLD", date(2024, 1, 1)),
            )
            .expect_err("unresolved");
        assert!(matches!(err, CorrelationError::UnresolvedPerson { .. }));
    }

    #[test]
    fn id_kind_must_match_product() {
        let mut set = bound_set();
        let err = set
            .bind_identity(
                id(EntityKind::Patient, 7),
                member_request(id(EntityKind::Person, 1), "PPO-GOLD", date(2024, 1, 1)),
            )
            .expect_err("kind mismatch");
        assert!(matches!(err, CorrelationError::IdentityKindMismatch { .. }));
    }

    #[test]
    fn close_then_bind_keeps_history() {
        let mut set = bound_set();
        let who = id(EntityKind::Person, 1);
        set.close_identity(id(EntityKind::Member, 1), date(2024, 6, 30))
            .expect("close");
        assert!(set.active_identity(who, ProductType::Member).is_none());
        set.bind_identity(
            id(EntityKind::Member, 2),
            member_request(who, "HDHP-BRONZE", date(2024, 7, 1)),
        )
        .expect("rebind");

        let members: Vec<EntityId> = set
            .identity_timeline(who)
            .into_iter()
            .filter(|identity| identity.product() == ProductType::Member)
            .map(|identity| identity.id())
            .collect();
        assert_eq!(
            members,
            vec![id(EntityKind::Member, 1), id(EntityKind::Member, 2)]
        );
        assert!(set.verify_correlation().is_ok());
    }

    #[test]
    fn closing_twice_fails() {
        let mut set = bound_set();
        set.close_identity(id(EntityKind::Member, 1), date(2024, 6, 30))
            .expect("close");
        let err = set
            .close_identity(id(EntityKind::Member, 1), date(2024, 8, 1))
            .expect_err("already closed");
        assert!(matches!(err, CorrelationError::IdentityAlreadyClosed { .. }));
    }

    #[test]
    fn supersede_is_atomic() {
        let mut set = bound_set();
        let who = id(EntityKind::Person, 1);

        // Replacement id names the wrong product, so nothing may change.
        let before = set.clone();
        let err = set
            .supersede_identity(
                id(EntityKind::Member, 1),
                id(EntityKind::Subject, 1),
                member_request(who, "HDHP-BRONZE", date(2025, 1, 1)),
            )
            .expect_err("mismatch");
        assert!(matches!(err, CorrelationError::IdentityKindMismatch { .. }));
        assert_eq!(set, before);

        let replacement = set
            .supersede_identity(
                id(EntityKind::Member, 1),
                id(EntityKind::Member, 2),
                member_request(who, "HDHP-BRONZE", date(2025, 1, 1)),
            )
            .expect("supersede");
        assert_eq!(replacement.profile.plan_code(), Some("HDHP-BRONZE"));
        let prior = set.identity(id(EntityKind::Member, 1)).expect("kept");
        assert_eq!(prior.end(), Some(date(2025, 1, 1)));
    }

    #[test]
    fn duplicate_correlation_key_rejected() {
        let mut set = EntitySet::new();
        let first = person(1);
        let key = first.correlation_key();
        set.add_person(first).expect("first");
        let clash = Person::new(
            id(EntityKind::Person, 2),
            key,
            PersonName::new("Other", "Person"),
            date(1980, 1, 1),
            Sex::Male,
            Address::default(),
        );
        assert!(matches!(
            set.add_person(clash),
            Err(CorrelationError::DuplicateCorrelationKey { .. })
        ));
    }
}
