//! Per-kind identifier allocation.
//!
//! Counters only move forward. A session seeded from a cohort starts past
//! the cohort's high-water marks, so an id handed out once is never handed
//! out again for the cohort's lifetime, deleted entities included.

use std::array;
use std::collections::BTreeMap;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use healthsim_types::{EntityId, EntityKind};

/// Shared allocator; safe to use from parallel generation workers.
#[derive(Debug)]
pub struct IdAllocator {
    counters: [AtomicU64; EntityKind::ALL.len()],
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            counters: array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Start after the given marks.
    #[must_use]
    pub fn seeded(high_water: &BTreeMap<EntityKind, u64>) -> Self {
        let allocator = Self::new();
        for (kind, seq) in high_water {
            allocator.observe_seq(*kind, *seq);
        }
        allocator
    }

    pub fn allocate(&self, kind: EntityKind) -> EntityId {
        let previous = self.counter(kind).fetch_add(1, Ordering::SeqCst);
        EntityId::from_seq(kind, NonZeroU64::MIN.saturating_add(previous))
    }

    /// Record an id assigned elsewhere so it is never allocated again.
    pub fn observe(&self, id: EntityId) {
        self.observe_seq(id.kind(), id.seq());
    }

    fn observe_seq(&self, kind: EntityKind, seq: u64) {
        self.counter(kind).fetch_max(seq, Ordering::SeqCst);
    }

    #[must_use]
    pub fn high_water(&self) -> BTreeMap<EntityKind, u64> {
        EntityKind::ALL
            .into_iter()
            .map(|kind| (kind, self.counter(kind).load(Ordering::SeqCst)))
            .filter(|(_, seq)| *seq > 0)
            .collect()
    }

    fn counter(&self, kind: EntityKind) -> &AtomicU64 {
        &self.counters[kind as usize]
    }
}
