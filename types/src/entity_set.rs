//! Entity sets and cohorts.
//!
//! An [`EntitySet`] is the unit codecs serialize and the persistence store
//! saves. Each collection is kept sorted by id so two sets holding the same
//! entities compare equal regardless of insertion order.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    AdverseEvent, Claim, CohortName, Condition, CorrelationKey, Encounter, EntityId, EntityKind,
    Observation, Person, Prescription, ProductIdentity, ProductType,
};

/// Any one canonical entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entity {
    Person(Person),
    Identity(ProductIdentity),
    Encounter(Encounter),
    Condition(Condition),
    Observation(Observation),
    Claim(Claim),
    Prescription(Prescription),
    AdverseEvent(AdverseEvent),
}

impl Entity {
    #[must_use]
    pub fn id(&self) -> EntityId {
        match self {
            Entity::Person(e) => e.id(),
            Entity::Identity(e) => e.id(),
            Entity::Encounter(e) => e.id(),
            Entity::Condition(e) => e.id(),
            Entity::Observation(e) => e.id(),
            Entity::Claim(e) => e.id(),
            Entity::Prescription(e) => e.id(),
            Entity::AdverseEvent(e) => e.id(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.id().kind()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySet {
    #[serde(default)]
    pub persons: Vec<Person>,
    #[serde(default)]
    pub identities: Vec<ProductIdentity>,
    #[serde(default)]
    pub encounters: Vec<Encounter>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observations: Vec<Observation>,
    #[serde(default)]
    pub claims: Vec<Claim>,
    #[serde(default)]
    pub prescriptions: Vec<Prescription>,
    #[serde(default)]
    pub adverse_events: Vec<AdverseEvent>,
}

impl EntitySet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.persons.len()
            + self.identities.len()
            + self.encounters.len()
            + self.conditions.len()
            + self.observations.len()
            + self.claims.len()
            + self.prescriptions.len()
            + self.adverse_events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entity count per kind; kinds with no entities are omitted.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<EntityKind, usize> {
        let mut counts = BTreeMap::new();
        for id in self.ids() {
            *counts.entry(id.kind()).or_insert(0) += 1;
        }
        counts
    }

    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.persons
            .iter()
            .map(Person::id)
            .chain(self.identities.iter().map(ProductIdentity::id))
            .chain(self.encounters.iter().map(Encounter::id))
            .chain(self.conditions.iter().map(Condition::id))
            .chain(self.observations.iter().map(Observation::id))
            .chain(self.claims.iter().map(Claim::id))
            .chain(self.prescriptions.iter().map(Prescription::id))
            .chain(self.adverse_events.iter().map(AdverseEvent::id))
    }

    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.ids().any(|existing| existing == id)
    }

    pub fn insert(&mut self, entity: Entity) {
        match entity {
            Entity::Person(e) => insert_sorted(&mut self.persons, e, Person::id),
            Entity::Identity(e) => insert_sorted(&mut self.identities, e, ProductIdentity::id),
            Entity::Encounter(e) => insert_sorted(&mut self.encounters, e, Encounter::id),
            Entity::Condition(e) => insert_sorted(&mut self.conditions, e, Condition::id),
            Entity::Observation(e) => insert_sorted(&mut self.observations, e, Observation::id),
            Entity::Claim(e) => insert_sorted(&mut self.claims, e, Claim::id),
            Entity::Prescription(e) => {
                insert_sorted(&mut self.prescriptions, e, Prescription::id);
            }
            Entity::AdverseEvent(e) => {
                insert_sorted(&mut self.adverse_events, e, AdverseEvent::id);
            }
        }
    }

    /// Remove one entity by id. Returns whether it existed.
    pub fn remove(&mut self, id: EntityId) -> bool {
        fn take<T>(items: &mut Vec<T>, id: EntityId, key: fn(&T) -> EntityId) -> bool {
            let before = items.len();
            items.retain(|item| key(item) != id);
            items.len() != before
        }
        match id.kind() {
            EntityKind::Person => take(&mut self.persons, id, Person::id),
            EntityKind::Patient
            | EntityKind::Member
            | EntityKind::RxMember
            | EntityKind::Subject => take(&mut self.identities, id, ProductIdentity::id),
            EntityKind::Encounter => take(&mut self.encounters, id, Encounter::id),
            EntityKind::Condition => take(&mut self.conditions, id, Condition::id),
            EntityKind::Observation => take(&mut self.observations, id, Observation::id),
            EntityKind::Claim => take(&mut self.claims, id, Claim::id),
            EntityKind::Prescription => take(&mut self.prescriptions, id, Prescription::id),
            EntityKind::AdverseEvent => take(&mut self.adverse_events, id, AdverseEvent::id),
        }
    }

    /// Restore id ordering after bulk edits of the public collections.
    pub fn normalize(&mut self) {
        self.persons.sort_by_key(Person::id);
        self.identities.sort_by_key(ProductIdentity::id);
        self.encounters.sort_by_key(Encounter::id);
        self.conditions.sort_by_key(Condition::id);
        self.observations.sort_by_key(Observation::id);
        self.claims.sort_by_key(Claim::id);
        self.prescriptions.sort_by_key(Prescription::id);
        self.adverse_events.sort_by_key(AdverseEvent::id);
    }

    #[must_use]
    pub fn person(&self, id: EntityId) -> Option<&Person> {
        find(&self.persons, id, Person::id)
    }

    #[must_use]
    pub fn person_by_key(&self, key: CorrelationKey) -> Option<&Person> {
        self.persons
            .iter()
            .find(|person| person.correlation_key() == key)
    }

    #[must_use]
    pub fn identity(&self, id: EntityId) -> Option<&ProductIdentity> {
        find(&self.identities, id, ProductIdentity::id)
    }

    /// The Person behind any product identity in the set.
    #[must_use]
    pub fn person_of(&self, identity: EntityId) -> Option<&Person> {
        self.identity(identity)
            .and_then(|identity| self.person(identity.person()))
    }

    /// All identities of `product` bound to the same Person as `identity`.
    pub fn correlated<'a>(
        &'a self,
        identity: &'a ProductIdentity,
        product: ProductType,
    ) -> impl Iterator<Item = &'a ProductIdentity> + 'a {
        self.identities.iter().filter(move |other| {
            other.product() == product && other.correlation_key() == identity.correlation_key()
        })
    }

    #[must_use]
    pub fn encounter(&self, id: EntityId) -> Option<&Encounter> {
        find(&self.encounters, id, Encounter::id)
    }

    #[must_use]
    pub fn claim(&self, id: EntityId) -> Option<&Claim> {
        find(&self.claims, id, Claim::id)
    }

    #[must_use]
    pub fn prescription(&self, id: EntityId) -> Option<&Prescription> {
        find(&self.prescriptions, id, Prescription::id)
    }

    pub fn encounters_of(&self, patient: EntityId) -> impl Iterator<Item = &Encounter> {
        self.encounters
            .iter()
            .filter(move |encounter| encounter.patient() == patient)
    }

    pub fn observations_of(&self, patient: EntityId) -> impl Iterator<Item = &Observation> {
        self.observations
            .iter()
            .filter(move |observation| observation.patient() == patient)
    }

    pub fn claims_of(&self, member: EntityId) -> impl Iterator<Item = &Claim> {
        self.claims
            .iter()
            .filter(move |claim| claim.member() == member)
    }

    pub fn prescriptions_of(&self, rx_member: EntityId) -> impl Iterator<Item = &Prescription> {
        self.prescriptions
            .iter()
            .filter(move |rx| rx.rx_member() == rx_member)
    }

    pub fn adverse_events_of(&self, subject: EntityId) -> impl Iterator<Item = &AdverseEvent> {
        self.adverse_events
            .iter()
            .filter(move |event| event.subject() == subject)
    }
}

fn find<T>(items: &[T], id: EntityId, key: fn(&T) -> EntityId) -> Option<&T> {
    items.iter().find(|item| key(item) == id)
}

fn insert_sorted<T>(items: &mut Vec<T>, item: T, key: fn(&T) -> EntityId) {
    match items.binary_search_by_key(&key(&item), key) {
        Ok(index) => items[index] = item,
        Err(index) => items.insert(index, item),
    }
}

/// Inclusion/exclusion criteria a cohort was generated under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortCriteria {
    #[serde(default)]
    pub inclusion: Vec<String>,
    #[serde(default)]
    pub exclusion: Vec<String>,
}

/// A named, durable set of entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cohort {
    pub name: CohortName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub criteria: CohortCriteria,
    pub saved_at: DateTime<Utc>,
    pub entities: EntitySet,
    /// Highest sequence ever allocated per kind, including deleted entities.
    #[serde(default)]
    pub high_water: BTreeMap<EntityKind, u64>,
}

/// Listing row for a stored cohort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortSummary {
    pub name: CohortName,
    pub saved_at: DateTime<Utc>,
    pub entity_count: usize,
}

#[cfg(test)]
mod tests {
    use super::{Entity, EntitySet};
    use crate::{
        Address, CorrelationKey, EntityId, EntityKind, Person, PersonName, Sex,
    };
    use chrono::NaiveDate;

    fn person(seq: u64) -> Person {
        Person::new(
            EntityId::new(EntityKind::Person, seq).expect("id"),
            CorrelationKey::generate(),
            PersonName::new("Given", "Family"),
            NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid"),
            Sex::Unknown,
            Address::default(),
        )
    }

    #[test]
    fn insert_keeps_id_order() {
        let mut set = EntitySet::new();
        set.insert(Entity::Person(person(3)));
        set.insert(Entity::Person(person(1)));
        set.insert(Entity::Person(person(2)));
        let seqs: Vec<u64> = set.persons.iter().map(|p| p.id().seq()).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn remove_reports_presence() {
        let mut set = EntitySet::new();
        let p = person(1);
        let id = p.id();
        set.insert(Entity::Person(p));
        assert!(set.remove(id));
        assert!(!set.remove(id));
        assert!(set.is_empty());
    }

    #[test]
    fn counts_group_by_kind() {
        let mut set = EntitySet::new();
        set.insert(Entity::Person(person(1)));
        set.insert(Entity::Person(person(2)));
        assert_eq!(set.counts().get(&EntityKind::Person), Some(&2));
        assert_eq!(set.counts().get(&EntityKind::Claim), None);
    }
}
